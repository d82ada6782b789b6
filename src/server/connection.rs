//! Per-connection state and the work a worker performs on each readiness event.
//!
//! # Connection State Machine
//!
//! ```text
//!   accept ──► HttpActive ──(keep-alive response)──► HttpActive (re-armed)
//!                  │  │
//!                  │  └──(101 upgrade)──► WebSocketActive ──(frame)──► WebSocketActive (re-armed)
//!                  │                          │
//!                  └──(close / error / EOF)───┴──────────────────────► Closed
//! ```
//!
//! Every unit of work ends in exactly one [`Disposition`], applied by
//! [`settle`]: `Rearm` performs the single one-shot re-arm, `Close` tears the
//! connection down.

use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::http::parser::{parse_http_request_with_limits, Limits, ParseError};
use crate::http::response::{Response, StatusCode};
use crate::http::router::{Exchange, RouteError, Router};
use crate::http::writer::{serialize_response, ResponseWriter};
use crate::server::reactor::{Interest, Poller};
use crate::server::registry::ConnectionRegistry;
use crate::websocket::frame::{decode_frame, encode_frame, encode_text_frame, Frame, OpCode};

const READ_CHUNK: usize = 4096;

/// Registry key of a connection; equal to its descriptor for accepted sockets
/// and used verbatim as the `epoll` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub RawFd);

impl ConnId {
    pub fn token(self) -> u64 {
        self.0 as u64
    }

    pub fn from_token(token: u64) -> Self {
        ConnId(token as RawFd)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    HttpClient,
    WebSocketClient,
    WakeupSource,
}

/// What to do with a connection once a unit of work is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Re-arm the one-shot registration and wait for the next event.
    Rearm,
    /// A message was handled and more bytes are already buffered; run again
    /// before re-arming, since edge-triggered readiness will not fire for them.
    Continue,
    /// Tear the connection down.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOutcome {
    pub bytes: usize,
    /// The peer shut down its sending side.
    pub eof: bool,
}

#[derive(Debug)]
struct State {
    role: Role,
    username: Option<String>,
    closed: bool,
}

/// One accepted client socket.
pub struct Connection {
    id: ConnId,
    stream: TcpStream,
    peer: Option<SocketAddr>,
    state: Mutex<State>,
    buffer: Mutex<BytesMut>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Connection {
    /// Wraps an accepted, non-blocking stream keyed by its own descriptor.
    pub fn new(stream: TcpStream) -> Self {
        let id = ConnId(stream.as_raw_fd());
        Self::with_id(id, stream)
    }

    pub fn with_id(id: ConnId, stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            id,
            stream,
            peer,
            state: Mutex::new(State {
                role: Role::HttpClient,
                username: None,
                closed: false,
            }),
            buffer: Mutex::new(BytesMut::with_capacity(READ_CHUNK)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn username(&self) -> Option<String> {
        self.state.lock().username.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Switches to the WebSocket role bound to `username`. Only the registry
    /// calls this, so the username index stays in step.
    pub(crate) fn become_websocket(&self, username: &str) {
        let mut state = self.state.lock();
        state.role = Role::WebSocketClient;
        state.username = Some(username.to_string());
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Reads everything the socket has until it would block.
    pub fn fill_buffer(&self) -> io::Result<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        let mut buffer = self.buffer.lock();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match (&self.stream).read(&mut chunk) {
                Ok(0) => {
                    outcome.eof = true;
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    outcome.bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// Writes `bytes` in full. Concurrent senders are serialised so frames
    /// from different broadcasters never interleave.
    pub fn send(&self, bytes: Vec<u8>) -> io::Result<()> {
        let _guard = self.write_lock.lock();
        ResponseWriter::from_bytes(bytes).write_to(&mut &self.stream)
    }

    /// Shuts the socket down; the descriptor itself is released when the
    /// last reference goes away.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);

        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!(fd = self.id.0, error = %e, "Socket shutdown failed");
            }
        }
    }
}

/// Everything a worker needs to process a connection.
pub struct ConnContext {
    pub poller: Arc<dyn Poller>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<Router>,
    pub limits: Limits,
    pub max_frame_len: usize,
}

/// Worker entry point for one readiness event on `id`.
///
/// The id is resolved through the registry; a connection that was torn down
/// in the meantime is simply skipped. A panic in a handler closes the
/// connection, after a 500 response if it was still speaking HTTP.
pub fn process(ctx: &ConnContext, id: ConnId) {
    let Some(conn) = ctx.registry.get(id) else {
        tracing::debug!(fd = id.0, "Event for unknown connection");
        return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| loop {
        let step = match conn.role() {
            Role::HttpClient => handle_http(ctx, &conn),
            Role::WebSocketClient => handle_websocket(ctx, &conn),
            Role::Listener | Role::WakeupSource => Disposition::Close,
        };
        if step != Disposition::Continue {
            break step;
        }
    }));

    let disposition = match outcome {
        Ok(disposition) => disposition,
        Err(_) => {
            tracing::error!(fd = id.0, role = ?conn.role(), "Handler panicked, closing connection");
            if conn.role() == Role::HttpClient {
                let _ = conn.send(serialize_response(&Response::internal_error()));
            }
            Disposition::Close
        }
    };

    settle(ctx, &conn, disposition);
}

/// Applies the outcome of a unit of work: one re-arm, or a teardown.
pub fn settle(ctx: &ConnContext, conn: &Connection, disposition: Disposition) {
    match disposition {
        Disposition::Rearm | Disposition::Continue => {
            if let Err(e) = ctx.poller.modify(conn.fd(), conn.id().token(), Interest::client()) {
                tracing::warn!(fd = conn.id().0, error = %e, "Re-arm failed, closing");
                teardown(ctx, conn.id());
            }
        }
        Disposition::Close => teardown(ctx, conn.id()),
    }
}

/// Removes a connection from the reactor and both registry indices and shuts
/// its socket down.
pub fn teardown(ctx: &ConnContext, id: ConnId) {
    let Some(conn) = ctx.registry.remove(id) else {
        return;
    };

    if let Err(e) = ctx.poller.deregister(conn.fd()) {
        tracing::debug!(fd = id.0, error = %e, "Deregister failed");
    }
    conn.close();

    tracing::debug!(fd = id.0, peer = ?conn.peer_addr(), "Connection closed");
}

/// Reads, decodes, routes and answers at most one HTTP request.
pub fn handle_http(ctx: &ConnContext, conn: &Connection) -> Disposition {
    let read = match conn.fill_buffer() {
        Ok(read) => read,
        Err(e) => {
            tracing::debug!(fd = conn.id().0, error = %e, "Read failed");
            return Disposition::Close;
        }
    };

    let parsed = {
        let mut buffer = conn.buffer.lock();
        if buffer.is_empty() {
            return if read.eof { Disposition::Close } else { Disposition::Rearm };
        }
        match parse_http_request_with_limits(&buffer, ctx.limits) {
            Ok((request, consumed)) => {
                buffer.advance(consumed);
                Ok(request)
            }
            Err(e) => Err(e),
        }
    };

    let request = match parsed {
        Ok(request) => request,
        Err(ParseError::Incomplete) => {
            return if read.eof { Disposition::Close } else { Disposition::Rearm };
        }
        Err(e) => {
            tracing::warn!(fd = conn.id().0, error = %e, "Malformed request");
            let mut resp = Response::bad_request();
            if let ParseError::BodyTooLarge(_) = e {
                resp.set_error(StatusCode::PayloadTooLarge);
            }
            resp.set_header("Connection", "close");
            let _ = conn.send(serialize_response(&resp));
            return Disposition::Close;
        }
    };

    let mut resp = Response {
        version: request.version,
        ..Response::default()
    };
    let mut exchange = Exchange::new(conn.id());

    if let Err(RouteError::NotFound(path)) = ctx.router.dispatch(&request, &mut resp, &mut exchange) {
        tracing::debug!(fd = conn.id().0, path = %path, "No route");
        resp.set_error(StatusCode::NotFound);
    }

    let upgrade = exchange
        .take_upgrade()
        .filter(|_| resp.status == StatusCode::SwitchingProtocols);
    let keep_alive = upgrade.is_none() && request.keep_alive() && !read.eof;

    if upgrade.is_none() && !resp.headers.contains_key("Connection") {
        let value = if keep_alive { "keep-alive" } else { "close" };
        resp.set_header("Connection", value);
    }

    tracing::info!(
        fd = conn.id().0,
        method = request.method.as_str(),
        path = %request.path,
        status = resp.status.as_u16(),
        "Request served"
    );

    if let Err(e) = conn.send(serialize_response(&resp)) {
        tracing::debug!(fd = conn.id().0, error = %e, "Write failed");
        return Disposition::Close;
    }

    if let Some(username) = upgrade {
        if let Err(e) = ctx.registry.bind_username(conn.id(), &username) {
            tracing::warn!(fd = conn.id().0, error = %e, "Upgrade lost its connection");
            return Disposition::Close;
        }
        tracing::info!(fd = conn.id().0, username = %username, "Upgraded to WebSocket");
        return if conn.buffered() > 0 { Disposition::Continue } else { Disposition::Rearm };
    }

    if !keep_alive {
        return Disposition::Close;
    }
    if conn.buffered() > 0 {
        Disposition::Continue
    } else {
        Disposition::Rearm
    }
}

/// Reads and handles every complete frame currently available.
pub fn handle_websocket(ctx: &ConnContext, conn: &Connection) -> Disposition {
    let read = match conn.fill_buffer() {
        Ok(read) => read,
        Err(e) => {
            tracing::debug!(fd = conn.id().0, error = %e, "Read failed");
            return Disposition::Close;
        }
    };

    let mut frames = Vec::new();
    {
        let mut buffer = conn.buffer.lock();
        loop {
            match decode_frame(&buffer, ctx.max_frame_len) {
                Ok(Some((frame, used))) => {
                    buffer.advance(used);
                    frames.push(frame);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(fd = conn.id().0, error = %e, "Dropping WebSocket client");
                    return Disposition::Close;
                }
            }
        }
    }

    for frame in frames {
        if handle_frame(ctx, conn, frame) == Disposition::Close {
            return Disposition::Close;
        }
    }

    if read.eof { Disposition::Close } else { Disposition::Rearm }
}

fn handle_frame(ctx: &ConnContext, conn: &Connection, frame: Frame) -> Disposition {
    match frame.opcode {
        OpCode::Text | OpCode::Binary | OpCode::Continuation => {
            broadcast(ctx, conn, &frame.payload);
            Disposition::Rearm
        }
        OpCode::Ping => {
            if conn.send(encode_frame(OpCode::Pong, &frame.payload)).is_err() {
                return Disposition::Close;
            }
            Disposition::Rearm
        }
        OpCode::Pong => Disposition::Rearm,
        OpCode::Close => {
            let _ = conn.send(encode_frame(OpCode::Close, &frame.payload));
            Disposition::Close
        }
        OpCode::Reserved(op) => {
            tracing::warn!(fd = conn.id().0, opcode = op, "Reserved opcode");
            Disposition::Close
        }
    }
}

/// Sends `"<username>: <message>"` to every other WebSocket connection.
pub fn broadcast(ctx: &ConnContext, from: &Connection, payload: &[u8]) -> usize {
    let username = from.username().unwrap_or_default();
    let message = format!("{}: {}", username, String::from_utf8_lossy(payload));
    let frame = encode_text_frame(message.as_bytes());

    let mut delivered = 0;
    for peer in ctx.registry.websocket_peers(from.id()) {
        match peer.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => tracing::debug!(fd = peer.id().0, error = %e, "Broadcast to peer failed"),
        }
    }

    tracing::trace!(from = %username, delivered, "Broadcast");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::os::fd::RawFd;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::http::handlers::AppState;
    use crate::http::static_files::StaticFiles;

    #[derive(Default)]
    struct MockPoller {
        modified: AtomicUsize,
        deregistered: AtomicUsize,
    }

    impl Poller for MockPoller {
        fn register(&self, _fd: RawFd, _token: u64, _interest: Interest) -> io::Result<()> {
            Ok(())
        }

        fn modify(&self, _fd: RawFd, _token: u64, interest: Interest) -> io::Result<()> {
            assert!(interest.is_oneshot());
            self.modified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn deregister(&self, _fd: RawFd) -> io::Result<()> {
            self.deregistered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn context(poller: Arc<MockPoller>) -> ConnContext {
        let files = StaticFiles::new("/nonexistent", "index.html", "dashboard.html");
        let state = Arc::new(AppState::new(files, "12345"));
        ConnContext {
            poller,
            registry: Arc::new(ConnectionRegistry::new()),
            router: Arc::new(Router::standard(state)),
            limits: Limits::default(),
            max_frame_len: 1024,
        }
    }

    /// Returns the client side and the registered server side once `data`
    /// has arrived.
    fn connected(ctx: &ConnContext, data: &[u8]) -> (TcpStream, ConnId) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        client.write_all(data).unwrap();
        server.peek(&mut [0u8; 1]).unwrap();
        server.set_nonblocking(true).unwrap();

        let conn = Arc::new(Connection::new(server));
        let id = conn.id();
        ctx.registry.insert(conn);
        (client, id)
    }

    #[test]
    fn keep_alive_request_rearms_exactly_once() {
        let poller = Arc::new(MockPoller::default());
        let ctx = context(poller.clone());
        let (_client, id) = connected(
            &ctx,
            b"GET /missing HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
        );

        process(&ctx, id);

        assert_eq!(poller.modified.load(Ordering::SeqCst), 1);
        assert_eq!(poller.deregistered.load(Ordering::SeqCst), 0);
        assert!(ctx.registry.contains(id));
    }

    #[test]
    fn partial_request_rearms_and_keeps_residue() {
        let poller = Arc::new(MockPoller::default());
        let ctx = context(poller.clone());
        let (_client, id) = connected(&ctx, b"GET / HTTP/1.1\r\nHost: x");

        process(&ctx, id);

        assert_eq!(poller.modified.load(Ordering::SeqCst), 1);
        let conn = ctx.registry.get(id).unwrap();
        assert_eq!(conn.buffered(), "GET / HTTP/1.1\r\nHost: x".len());
    }

    #[test]
    fn non_keep_alive_request_tears_down() {
        let poller = Arc::new(MockPoller::default());
        let ctx = context(poller.clone());
        let (_client, id) = connected(&ctx, b"GET /missing HTTP/1.1\r\n\r\n");

        process(&ctx, id);

        assert_eq!(poller.modified.load(Ordering::SeqCst), 0);
        assert_eq!(poller.deregistered.load(Ordering::SeqCst), 1);
        assert!(!ctx.registry.contains(id));
    }

    #[test]
    fn malformed_request_closes() {
        let poller = Arc::new(MockPoller::default());
        let ctx = context(poller.clone());
        let (_client, id) = connected(&ctx, b"BREW /pot HTCPCP/1.0\r\n\r\n");

        process(&ctx, id);

        assert_eq!(poller.modified.load(Ordering::SeqCst), 0);
        assert!(!ctx.registry.contains(id));
    }

    #[test]
    fn upgrade_switches_role_and_binds_username() {
        let poller = Arc::new(MockPoller::default());
        let ctx = context(poller.clone());
        let (_client, id) = connected(
            &ctx,
            b"GET /upgrade?username=bob HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        );

        process(&ctx, id);

        assert_eq!(poller.modified.load(Ordering::SeqCst), 1);
        let conn = ctx.registry.by_username("bob").unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(conn.role(), Role::WebSocketClient);
    }

    #[test]
    fn unmasked_frame_closes_websocket() {
        let poller = Arc::new(MockPoller::default());
        let ctx = context(poller.clone());
        let (_client, id) = connected(&ctx, &encode_text_frame(b"hello"));
        ctx.registry.bind_username(id, "eve").unwrap();

        process(&ctx, id);

        assert_eq!(poller.modified.load(Ordering::SeqCst), 0);
        assert!(ctx.registry.by_username("eve").is_none());
    }

    #[test]
    fn panicking_handler_closes_with_500() {
        let poller = Arc::new(MockPoller::default());
        let mut router = Router::new();
        router.route("/boom", |_, _, _| panic!("handler failure"));
        let ctx = ConnContext {
            router: Arc::new(router),
            ..context(poller.clone())
        };
        let (mut client, id) = connected(&ctx, b"GET /boom HTTP/1.1\r\n\r\n");

        process(&ctx, id);

        assert_eq!(poller.modified.load(Ordering::SeqCst), 0);
        assert_eq!(poller.deregistered.load(Ordering::SeqCst), 1);
        assert!(!ctx.registry.contains(id));

        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[test]
    fn oversized_body_is_refused_with_413() {
        let poller = Arc::new(MockPoller::default());
        let ctx = ConnContext {
            limits: Limits {
                max_body_bytes: 16,
                ..Limits::default()
            },
            ..context(poller.clone())
        };
        let (mut client, id) = connected(
            &ctx,
            b"POST /login HTTP/1.1\r\nContent-Length: 17\r\n\r\n",
        );

        process(&ctx, id);

        assert!(!ctx.registry.contains(id));
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(reply.contains("Connection: close\r\n"));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let poller = Arc::new(MockPoller::default());
        let ctx = context(poller.clone());

        process(&ctx, ConnId(-1));

        assert_eq!(poller.modified.load(Ordering::SeqCst), 0);
        assert_eq!(poller.deregistered.load(Ordering::SeqCst), 0);
    }
}
