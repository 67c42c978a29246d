//! HTTP server configuration settings.

use std::net::SocketAddr;

use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    ///
    /// Defaults to `127.0.0.1:4100` when unset.
    pub listen_address: Option<SocketAddr>,
}

impl ServerConfig {
    /// The address to bind, falling back to the default when unset.
    pub fn listen_address_or_default(&self) -> SocketAddr {
        self.listen_address
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 4100)))
    }
}
