use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

use anyhow::Context;
use tracing::info;

/// A non-blocking listening socket registered with the reactor.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    addr: SocketAddr,
}

impl Listener {
    pub fn bind(addr: &str) -> anyhow::Result<Self> {
        let inner = TcpListener::bind(addr).with_context(|| format!("Failed to bind {addr}"))?;
        inner
            .set_nonblocking(true)
            .with_context(|| format!("Failed to make {addr} non-blocking"))?;
        let addr = inner.local_addr()?;

        info!("Listening on {}", addr);
        Ok(Self { inner, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    /// Accepts every pending connection until the backlog is empty.
    ///
    /// Accepted streams are already non-blocking. Errors on individual
    /// accepts are logged and skipped.
    pub fn accept_pending(&self) -> Vec<TcpStream> {
        let mut accepted = Vec::new();
        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(peer = %peer, error = %e, "Dropping connection");
                        continue;
                    }
                    tracing::debug!(peer = %peer, fd = stream.as_raw_fd(), "Accepted connection");
                    accepted.push(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(listener = %self.addr, error = %e, "Accept failed");
                    break;
                }
            }
        }
        accepted
    }
}
