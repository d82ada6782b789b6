//! The reactor thread and everything it drives.
//!
//! # Architecture
//!
//! - **`reactor`**: `epoll` wrapper and the [`Poller`](reactor::Poller) seam
//! - **`pool`**: fixed-size worker pool executing protocol work
//! - **`registry`**: descriptor and username indices of live connections
//! - **`connection`**: per-connection state machine run by the workers
//! - **`listener`**: non-blocking listening sockets
//! - **`shutdown`**: self-pipe wake-up for SIGINT and programmatic stops
//!
//! The thread calling [`Server::start`] waits on the reactor, accepts new
//! clients itself and hands every other readiness event to the pool as a task
//! carrying only the connection's [`ConnId`].

pub mod connection;
pub mod listener;
pub mod pool;
pub mod reactor;
pub mod registry;
pub mod shutdown;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::http::handlers::AppState;
use crate::http::parser::Limits;
use crate::http::router::Router;
use crate::http::static_files::StaticFiles;
use connection::{ConnContext, ConnId, Connection};
use listener::Listener;
use pool::WorkerPool;
use reactor::{Event, EventReactor, Events, Interest, Poller};
use registry::ConnectionRegistry;
use shutdown::{Shutdown, ShutdownHandle};

pub struct Server {
    config: Config,
    listeners: Vec<Listener>,
    reactor: Arc<EventReactor>,
    pool: WorkerPool,
    ctx: Arc<ConnContext>,
    shutdown: Shutdown,
}

impl Server {
    /// Binds every configured address and builds the server with the
    /// standard routes.
    pub fn bind(config: Config) -> anyhow::Result<Self> {
        let files = StaticFiles::new(
            config.static_root.clone(),
            config.index_file.clone(),
            config.dashboard_file.clone(),
        );
        let state = Arc::new(AppState::new(files, config.session_id.clone()));
        Self::with_router(config, Router::standard(state))
    }

    pub fn with_router(config: Config, router: Router) -> anyhow::Result<Self> {
        let mut listeners = vec![Listener::bind(&config.listen_addr)?];
        for addr in &config.extra_listen_addrs {
            listeners.push(Listener::bind(addr)?);
        }

        let reactor = Arc::new(EventReactor::new().context("Failed to create epoll instance")?);
        let pool = WorkerPool::new(config.workers).context("Failed to start worker pool")?;
        let shutdown = Shutdown::new().context("Failed to create wake-up pipe")?;

        let poller: Arc<dyn Poller> = reactor.clone();
        let ctx = Arc::new(ConnContext {
            poller,
            registry: Arc::new(ConnectionRegistry::new()),
            router: Arc::new(router),
            limits: Limits {
                max_header_bytes: config.max_header_bytes,
                max_body_bytes: config.max_body_bytes,
            },
            max_frame_len: config.max_frame_len,
        });

        Ok(Self {
            config,
            listeners,
            reactor,
            pool,
            ctx,
            shutdown,
        })
    }

    /// Address of the primary listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.listeners[0].local_addr()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(Listener::local_addr).collect()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    /// Runs the reactor on the calling thread until shutdown.
    ///
    /// Returns `0` after a requested shutdown and `1` if the reactor failed.
    pub fn start(mut self) -> i32 {
        if let Err(e) = self.register_sources() {
            error!("Failed to register with the reactor: {:#}", e);
            self.stop();
            return 1;
        }

        if self.config.handle_sigint {
            if let Err(e) = self.shutdown.install_sigint() {
                warn!(error = %e, "SIGINT handler not installed");
            }
        }

        info!(workers = self.pool.size(), "Server started");

        let code = match self.run() {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "Reactor failed");
                1
            }
        };

        self.stop();
        code
    }

    fn register_sources(&self) -> anyhow::Result<()> {
        for listener in &self.listeners {
            self.reactor
                .register(listener.fd(), listener.fd() as u64, Interest::listener())
                .with_context(|| format!("listener {}", listener.local_addr()))?;
        }
        let wake = self.shutdown.wakeup_fd();
        self.reactor
            .register(wake, wake as u64, Interest::wakeup())
            .context("wake-up pipe")?;
        Ok(())
    }

    fn run(&self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.config.max_events);
        let wake_token = self.shutdown.wakeup_fd() as u64;

        loop {
            match self.reactor.wait(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }

            let mut stopping = false;
            for event in events.iter() {
                let token = event.token();
                if token == wake_token {
                    self.shutdown.drain();
                    stopping = true;
                } else if let Some(listener) = self.listener_for(token) {
                    if !stopping {
                        self.accept(listener);
                    }
                } else {
                    self.dispatch(event);
                }
            }

            if stopping || self.shutdown.is_triggered() {
                info!("Shutdown signal received");
                break;
            }
        }

        Ok(())
    }

    fn listener_for(&self, token: u64) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.fd() as u64 == token)
    }

    fn accept(&self, listener: &Listener) {
        for stream in listener.accept_pending() {
            let conn = Arc::new(Connection::new(stream));
            let id = conn.id();

            self.ctx.registry.insert(Arc::clone(&conn));
            if let Err(e) = self.reactor.register(conn.fd(), id.token(), Interest::client()) {
                warn!(fd = id.0, error = %e, "Failed to register connection");
                self.ctx.registry.remove(id);
                conn.close();
                continue;
            }

            info!(fd = id.0, peer = ?conn.peer_addr(), "New connection");
        }
    }

    fn dispatch(&self, event: Event) {
        let id = ConnId::from_token(event.token());

        if event.is_error() || event.is_hangup() {
            connection::teardown(&self.ctx, id);
            return;
        }

        let ctx = Arc::clone(&self.ctx);
        if let Err(e) = self.pool.submit(move || connection::process(&ctx, id)) {
            warn!(fd = id.0, error = %e, "Dropping event");
            connection::teardown(&self.ctx, id);
        }
    }

    fn stop(&self) {
        let discarded = self.pool.shutdown();

        let connections = self.ctx.registry.drain();
        let closed = connections.len();
        for conn in connections {
            let _ = self.reactor.deregister(conn.fd());
            conn.close();
        }

        info!(closed, discarded, "Server stopped");
    }
}
