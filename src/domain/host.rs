//! Cluster management host parsing

use crate::error::{Error, Result};
use reqwest::Url;

/// A validated management host: name or address with an optional port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementHost {
    host: String,
    port: Option<u16>,
}

impl ManagementHost {
    /// Parse a host as written in `clusterHost`.
    ///
    /// Accepts `host`, `host:port`, `[v6]:port` and an optional `https://`
    /// prefix. Paths, queries, credentials and plain `http://` are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| Error::InvalidHost {
            host: raw.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("host is empty"));
        }
        if trimmed.starts_with("http://") {
            return Err(invalid("the management API requires https"));
        }
        let authority = trimmed.strip_prefix("https://").unwrap_or(trimmed);
        let authority = authority.strip_suffix('/').unwrap_or(authority);
        if authority.contains('/') || authority.contains('?') || authority.contains('#') {
            return Err(invalid("host must not carry a path or query"));
        }
        if authority.contains('@') {
            return Err(invalid("host must not embed credentials"));
        }

        let url = Url::parse(&format!("https://{}", authority))
            .map_err(|e| invalid(&e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("no host name"))?;

        Ok(Self {
            host: host.to_string(),
            port: url.port(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Base URL of the REST API
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("https://{}:{}", self.host, port),
            None => format!("https://{}", self.host),
        }
    }
}

impl std::fmt::Display for ManagementHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}
