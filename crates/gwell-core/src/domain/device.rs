//! Device identity, metadata, and access credentials.
//!
//! # Secret handling
//!
//! [`AccessCredential`] deliberately does not implement `Serialize`, and its
//! `Debug` output never contains the token.  The only way to put a token into
//! a log line is [`AccessCredential::redacted_token`], which yields at most
//! [`TOKEN_LOG_PREFIX_CHARS`] characters and never more than half of the
//! token.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of token characters that may ever appear in a log line.
pub const TOKEN_LOG_PREFIX_CHARS: usize = 40;

/// Opaque device identifier as issued by the account service (usually the
/// camera MAC, e.g. `GW_BE1_7C78B2A1C3D4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A camera and the metadata fetched for it once per orchestration run.
///
/// Field names on the wire follow the account service's JSON
/// (`cameraId`, `streamName`, `lanIp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "cameraId")]
    pub id: DeviceId,
    #[serde(rename = "streamName", default)]
    pub stream_name: Option<String>,
    /// LAN address as reported by the cloud or a manual override.  Kept as a
    /// string because the account service does not validate it.
    #[serde(rename = "lanIp", default)]
    pub lan_address: Option<String>,
}

impl Device {
    /// Creates a device with no metadata.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            stream_name: None,
            lan_address: None,
        }
    }

    pub fn with_stream_name(mut self, stream_name: impl Into<String>) -> Self {
        self.stream_name = Some(stream_name.into());
        self
    }

    pub fn with_lan_address(mut self, lan_address: impl Into<String>) -> Self {
        self.lan_address = Some(lan_address.into());
        self
    }

    /// Returns the stream name, falling back to `live/<device id>`.
    pub fn stream_name_or_default(&self) -> String {
        self.stream_name
            .clone()
            .unwrap_or_else(|| format!("live/{}", self.id.as_str().to_lowercase()))
    }
}

/// The `(accessId, accessToken)` pair authorising one streaming session.
///
/// Upstream tokens are single-use: a restarted orchestration must fetch a
/// fresh credential rather than replay an old one.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AccessCredential {
    #[serde(rename = "accessId")]
    pub access_id: String,
    #[serde(rename = "accessToken")]
    access_token: String,
}

impl AccessCredential {
    pub fn new(access_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Returns the full secret.  Only the session phases should call this.
    pub fn expose_token(&self) -> &str {
        &self.access_token
    }

    /// Returns a log-safe view of the token.
    pub fn redacted_token(&self) -> RedactedToken<'_> {
        RedactedToken(&self.access_token)
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("access_id", &self.access_id)
            .field("access_token", &self.redacted_token())
            .finish()
    }
}

/// Display adapter that prints only a short prefix of a token followed by `...`.
#[derive(Clone, Copy)]
pub struct RedactedToken<'a>(&'a str);

impl RedactedToken<'_> {
    /// Number of characters of the secret that [`fmt::Display`] reveals.
    pub fn visible_chars(&self) -> usize {
        let total = self.0.chars().count();
        TOKEN_LOG_PREFIX_CHARS.min(total / 2)
    }
}

impl fmt::Display for RedactedToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(self.visible_chars()).collect();
        write!(f, "{prefix}...")
    }
}

impl fmt::Debug for RedactedToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
