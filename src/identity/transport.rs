use std::net::{Ipv4Addr, SocketAddr};

use rama::{
    dns::GlobalDnsResolver,
    rt::Executor,
    tcp::{self, client::service::TcpStreamConnectorCloneFactory},
};

pub type BoundTcpConnector = tcp::client::service::TcpConnector<
    GlobalDnsResolver,
    TcpStreamConnectorCloneFactory<BoundTcpStreamConnector>,
>;

pub fn new_bound_tcp_connector(exec: Executor, local_addr: Ipv4Addr) -> BoundTcpConnector {
    tcp::client::service::TcpConnector::new(exec)
        .with_connector(BoundTcpStreamConnector::new(local_addr))
}

/// Connects with the socket bound to a fixed local loopback address,
/// so every source identity draws from its own source port space.
#[derive(Debug, Clone)]
pub struct BoundTcpStreamConnector {
    local_addr: Ipv4Addr,
}

impl BoundTcpStreamConnector {
    pub fn new(local_addr: Ipv4Addr) -> Self {
        Self { local_addr }
    }
}

impl rama::tcp::client::TcpStreamConnector for BoundTcpStreamConnector {
    type Error = std::io::Error;

    async fn connect(&self, addr: SocketAddr) -> Result<rama::tcp::TcpStream, Self::Error> {
        match addr {
            SocketAddr::V4(_) => {
                let socket = tokio::net::TcpSocket::new_v4()?;
                // port 0: the identity multiplexes over its own ephemeral port range
                socket.bind(SocketAddr::new(self.local_addr.into(), 0))?;
                socket.connect(addr).await
            }
            // identities live in the v4 loopback range; v6 targets connect unbound
            SocketAddr::V6(_) => {
                let socket = tokio::net::TcpSocket::new_v6()?;
                socket.connect(addr).await
            }
        }
    }
}
