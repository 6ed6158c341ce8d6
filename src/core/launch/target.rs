use serde::{Deserialize, Serialize};

/// Server the client is pointed at for one launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTarget {
    /// Display name, written to `SERVERNAME`.
    pub name: String,
    /// Host or address, written to `AUTHSERVERIP`.
    pub address: String,
    /// Whether the server speaks the TCP/UDP transport instead of RakNet.
    #[serde(default)]
    pub tcp_udp: bool,
}

impl LaunchTarget {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            tcp_udp: false,
        }
    }

    pub fn with_tcp_udp(mut self, tcp_udp: bool) -> Self {
        self.tcp_udp = tcp_udp;
        self
    }
}
