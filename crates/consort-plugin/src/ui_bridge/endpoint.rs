use crate::{PluginError, Result};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

pub const URL_SCHEME: &str = "osc.udp://";

/// A UDP peer plus the OSC path its messages live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub path: String,
}

impl Endpoint {
    pub fn new(addr: SocketAddr, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            addr,
            path: path.trim_end_matches('/').to_string(),
        }
    }

    /// Parse `osc.udp://host:port/path`.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| PluginError::ProtocolError(format!("'{url}' is not an osc.udp URL")))?;
        let (authority, path) = match rest.find('/') {
            Some(slash) => rest.split_at(slash),
            None => (rest, ""),
        };
        if path.trim_end_matches('/').is_empty() {
            return Err(PluginError::ProtocolError(format!("'{url}' has no OSC path")));
        }

        let addr = authority
            .to_socket_addrs()
            .map_err(|err| PluginError::ProtocolError(format!("bad address in '{url}': {err}")))?
            .next()
            .ok_or_else(|| PluginError::ProtocolError(format!("'{url}' resolves to nothing")))?;

        Ok(Self::new(addr, path))
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", URL_SCHEME, self.addr, self.path)
    }
}
