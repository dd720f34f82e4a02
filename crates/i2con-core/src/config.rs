use i2con_proto::DEFAULT_PORT;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Read/write timeout applied to every session socket. `None` blocks
    /// indefinitely.
    pub io_timeout: Option<Duration>,
    /// How long the accept loop sleeps between polls while idle.
    pub accept_poll: Duration,
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            io_timeout: None,
            accept_poll: Duration::from_millis(100),
            nodelay: true,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub port: u16,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
    pub nodelay: bool,
    /// Frames to keep in the client's transcript; 0 disables it.
    pub transcript_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: None,
            io_timeout: None,
            nodelay: true,
            transcript_capacity: 0,
        }
    }
}
