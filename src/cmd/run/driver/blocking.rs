use std::{
    io::{Read as _, Write as _},
    net::{Ipv4Addr, SocketAddr},
};

use rama::{
    error::{ErrorContext as _, ErrorExt as _, OpaqueError},
    net::address::SocketAddress,
    telemetry::tracing,
};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{sync::mpsc, time::Instant};

use crate::identity::{assign_identity, identity_local_addr};

use super::{DriverEvent, RequestResult};

/// One dedicated OS thread per request, each with its own direct,
/// non-pooled connection bound to the request's source identity.
///
/// Deliberately unforgiving: any I/O error (bind, connect, read) is
/// reported as fatal instead of a per-request failure, so resource
/// exhaustion (threads, sockets, source ports) stays observable.
pub(super) struct BlockingDispatcher {
    per_identity_cap: usize,
    target: SocketAddr,
    started: Instant,
    event_tx: mpsc::Sender<DriverEvent>,
}

impl BlockingDispatcher {
    pub(super) fn new(
        per_identity_cap: usize,
        target: SocketAddress,
        started: Instant,
        event_tx: mpsc::Sender<DriverEvent>,
    ) -> Self {
        Self {
            per_identity_cap,
            target: SocketAddr::new(target.ip_addr, target.port),
            started,
            event_tx,
        }
    }

    pub(super) fn dispatch(&self, index: usize) -> Result<(), OpaqueError> {
        let identity = assign_identity(index, self.per_identity_cap);
        let local_addr = identity_local_addr(identity);
        let target = self.target;
        let started = self.started;
        let dispatched_at = started.elapsed();
        let event_tx = self.event_tx.clone();

        std::thread::Builder::new()
            .name(format!("req-{index}"))
            .spawn(move || {
                let event = match blocking_get(local_addr, target) {
                    Ok(status) => DriverEvent::Finished(RequestResult {
                        index,
                        identity,
                        dispatched_at,
                        completed_at: started.elapsed(),
                        status: Some(status),
                        failure: None,
                    }),
                    Err(err) => DriverEvent::Fatal(
                        err.context(format!("blocking request {index} via {local_addr}")),
                    ),
                };
                if event_tx.blocking_send(event).is_err() {
                    tracing::debug!("result collector gone before request {index} reported");
                }
            })
            .with_context(|| format!("spawn thread for request {index}"))?;

        Ok(())
    }
}

/// A single synchronous HTTP/1.1 GET over a fresh socket bound to the
/// identity's local address. No need for the full client stack here.
fn blocking_get(local_addr: Ipv4Addr, target: SocketAddr) -> std::io::Result<u16> {
    let socket = match target {
        SocketAddr::V4(_) => {
            let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
            socket.bind(&SocketAddr::new(local_addr.into(), 0).into())?;
            socket
        }
        // identities live in the v4 loopback range; v6 targets connect unbound
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?,
    };
    socket.connect(&target.into())?;

    let mut stream: std::net::TcpStream = socket.into();
    let request = format!("GET / HTTP/1.1\r\nHost: {target}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;

    parse_status(&response).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed http response")
    })
}

fn parse_status(raw: &[u8]) -> Option<u16> {
    let line = raw.split(|b| *b == b'\n').next()?;
    let line = std::str::from_utf8(line).ok()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parsing() {
        assert_eq!(
            Some(200),
            parse_status(b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nfoo")
        );
        assert_eq!(Some(503), parse_status(b"HTTP/1.1 503 Service Unavailable\r\n"));
        assert_eq!(None, parse_status(b""));
        assert_eq!(None, parse_status(b"not http"));
        assert_eq!(None, parse_status(&[0xff, 0xfe, b'\n']));
    }
}
