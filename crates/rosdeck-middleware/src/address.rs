//! Robot address normalisation and validation.
//!
//! Operators type one of three shapes:
//!
//! | Input | Example | Rule |
//! |---|---|---|
//! | bare IPv4 host | `192.168.1.40` | dotted quad, each octet 0–255 |
//! | websocket URL | `ws://192.168.1.40:9090` | `ws`/`wss`, IPv4 host, explicit port |
//! | HTTP URL | `https://robot.example.com` | `http`/`https` URL |
//!
//! Bare hosts are expanded to `ws://<host>:<default port>`; anything already
//! carrying a scheme passes through unchanged.

use std::sync::LazyLock;

use regex::Regex;
use rosdeck_types::DeckError;

const OCTET: &str = r"(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)";

static IP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{OCTET}\.{OCTET}\.{OCTET}\.{OCTET}$")).expect("static regex")
});

static WEBSOCKET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(wss?://){OCTET}\.{OCTET}\.{OCTET}\.{OCTET}:(0|[1-9]\d{{0,3}}|[1-5]\d{{4}}|6[0-4]\d{{3}}|65[0-4]\d{{2}}|655[0-2]\d|6553[0-5])$"
    ))
    .expect("static regex")
});

static HTTP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)(www\.)?[-a-zA-Z0-9@:%._+~#=]{2,256}(\.[a-z]{2,6})?\b([-a-zA-Z0-9()@:%_+.~#?&/=]*)$",
    )
    .expect("static regex")
});

/// Expand a bare host into a websocket URL on `default_port`.
pub fn normalize(address: &str, default_port: u16) -> String {
    let address = address.trim();
    if address.starts_with("ws") || address.starts_with("http") {
        address.to_string()
    } else {
        format!("ws://{address}:{default_port}")
    }
}

/// Check `address` against the rule for its shape.
pub fn validate(address: &str) -> Result<(), DeckError> {
    let address = address.trim();
    let valid = if address.starts_with("ws") {
        WEBSOCKET_REGEX.is_match(address)
    } else if address.starts_with("http") {
        HTTP_REGEX.is_match(address)
    } else {
        IP_REGEX.is_match(address)
    };
    if valid {
        Ok(())
    } else {
        Err(DeckError::InvalidAddress(address.to_string()))
    }
}

/// Host part of a normalised `ws://host:port` URL.
pub fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split([':', '/']).next()?;
    (!host.is_empty()).then_some(host)
}
