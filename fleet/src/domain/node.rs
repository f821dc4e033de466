//! Node lifecycle states, classes, and pure path helpers.

use std::fmt;

/// Connection lifecycle of a single node.
///
/// `Disconnected → Connecting → Connected → Provisioning → Ready`, with
/// `Connecting → Unresponsive` on any failure to establish the session.
/// A provisioning failure falls back to `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Provisioning,
    Ready,
    Unresponsive,
}

impl ConnectionState {
    /// States in which the node accepts commands.
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }

    /// States that hold (or are acquiring) a session.
    #[must_use]
    pub fn holds_session(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Provisioning | Self::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Unresponsive => "unresponsive",
        };
        f.write_str(s)
    }
}

/// Role a node plays in the fleet; selects which tolerance flag applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Compute,
    Data,
    Unclassified,
}

/// Replaces a leading `~` in `path` with `home`.
///
/// Only `~` on its own or `~/...` is expanded; `~user` forms and `~` in the
/// middle of a path are left alone. With no home yet, `path` is returned as is.
#[must_use]
pub fn expand_home(path: &str, home: Option<&str>) -> String {
    let Some(home) = home else {
        return path.to_string();
    };
    match path.strip_prefix('~') {
        Some("") => home.to_string(),
        Some(rest) if rest.starts_with('/') => format!("{}{rest}", home.trim_end_matches('/')),
        _ => path.to_string(),
    }
}

/// Machine type prefix of a host name, e.g. `c220g5` for `c220g5-110931.example`.
#[must_use]
pub fn machine_name(host: &str) -> &str {
    host.split('-').next().unwrap_or(host)
}
