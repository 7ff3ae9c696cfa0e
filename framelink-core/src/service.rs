//! Accept-side and dial-side services.
//!
//! A service is a shared handle whose mutable state (acceptor or dial
//! attempts) lives in one actor task on the pool. `start` and `stop` are
//! idempotent; every service emits `ServiceEvent::Close` exactly once, as its
//! final event. Both variants register with the process-wide stop-signal
//! watcher at construction.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::{accept_error_is_fatal, classify_dial_error, DialClass, NetError};
use crate::event::{ServiceEvent, ServiceEventTx};
use crate::pool::{IoHandle, IoThreadPool};
use crate::signal;

/// Host/service pair resolved before dialing. `service` is a numeric port or
/// a registered service name.
#[derive(Debug, Clone)]
pub struct ResolveTarget {
    pub host: String,
    pub service: String,
}

impl ResolveTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
        }
    }
}

impl std::fmt::Display for ResolveTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.service)
    }
}

struct ServerSeed {
    listener: TcpListener,
    stop_rx: Receiver<()>,
    event_tx: ServiceEventTx,
}

/// Listening service: binds at construction, accepts after `start`.
pub struct ServerService {
    running: AtomicBool,
    stop_tx: Sender<()>,
    seed: Mutex<Option<ServerSeed>>,
    local_addr: SocketAddr,
    io: IoHandle,
}

impl ServerService {
    /// Bind `addr` and prepare the accept loop. Binding happens here so a
    /// bad address fails startup instead of surfacing later as a Close.
    pub fn new(
        addr: SocketAddr,
        event_tx: ServiceEventTx,
        pool: &IoThreadPool,
    ) -> Result<Arc<Self>, NetError> {
        let io = pool.try_handle()?;
        let listener = io.block_on(TcpListener::bind(addr))?;
        let local_addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = flume::unbounded();
        let service = Arc::new(Self {
            running: AtomicBool::new(false),
            stop_tx,
            seed: Mutex::new(Some(ServerSeed {
                listener,
                stop_rx,
                event_tx,
            })),
            local_addr,
            io,
        });
        let weak = Arc::downgrade(&service);
        signal::register_stop_hook(
            &service.io,
            Box::new(move || {
                if let Some(service) = weak.upgrade() {
                    service.stop();
                }
            }),
        );
        info!(addr = %local_addr, "server service listening");
        Ok(service)
    }

    /// The bound address; useful when binding to port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin accepting. Idempotent; a service cannot be restarted.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(seed) = self.seed.lock().take() else {
            warn!("server service cannot be restarted");
            return;
        };
        info!(addr = %self.local_addr, "server service started");
        let this = Arc::clone(self);
        self.io.spawn(this.run(seed));
    }

    /// Post an orderly close. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("server service stopping");
        let _ = self.stop_tx.send(());
    }

    async fn run(self: Arc<Self>, seed: ServerSeed) {
        let ServerSeed {
            listener,
            stop_rx,
            event_tx,
        } = seed;
        loop {
            tokio::select! {
                _ = stop_rx.recv_async() => break,
                result = listener.accept() => match result {
                    Ok((socket, peer)) => {
                        debug!(%peer, "accepted client connection");
                        let _ = event_tx.send(ServiceEvent::Accept(socket));
                    }
                    Err(error) => {
                        if accept_error_is_fatal(error.kind()) {
                            error!(%error, "accept failed");
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        debug!(%error, "transient accept error");
                    }
                },
            }
        }
        drop(listener);
        let _ = event_tx.send(ServiceEvent::Close);
        info!("server service closed");
    }
}

struct ClientSeed {
    stop_rx: Receiver<()>,
    event_tx: ServiceEventTx,
}

/// Dialing service: resolves its target, then runs `connect_count`
/// independent connection attempts.
pub struct ClientService {
    running: AtomicBool,
    stop_tx: Sender<()>,
    seed: Mutex<Option<ClientSeed>>,
    target: ResolveTarget,
    connect_count: usize,
    io: IoHandle,
}

impl ClientService {
    pub fn new(
        target: ResolveTarget,
        connect_count: usize,
        event_tx: ServiceEventTx,
        pool: &IoThreadPool,
    ) -> Result<Arc<Self>, NetError> {
        assert!(connect_count > 0, "client service needs at least one connection");
        let io = pool.try_handle()?;
        let (stop_tx, stop_rx) = flume::unbounded();
        let service = Arc::new(Self {
            running: AtomicBool::new(false),
            stop_tx,
            seed: Mutex::new(Some(ClientSeed { stop_rx, event_tx })),
            target,
            connect_count,
            io,
        });
        let weak = Arc::downgrade(&service);
        signal::register_stop_hook(
            &service.io,
            Box::new(move || {
                if let Some(service) = weak.upgrade() {
                    service.stop();
                }
            }),
        );
        Ok(service)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin resolving and dialing. Idempotent; cannot be restarted.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(seed) = self.seed.lock().take() else {
            warn!("client service cannot be restarted");
            return;
        };
        info!(target = %self.target, connections = self.connect_count, "client service started");
        let this = Arc::clone(self);
        self.io.spawn(this.run(seed));
    }

    /// Post an orderly close. Idempotent. Outstanding dial attempts are
    /// cancelled; no Connect is emitted after the Close.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("client service stopping");
        let _ = self.stop_tx.send(());
    }

    async fn run(self: Arc<Self>, seed: ClientSeed) {
        let ClientSeed { stop_rx, event_tx } = seed;
        self.drive(&stop_rx, &event_tx).await;
        let _ = event_tx.send(ServiceEvent::Close);
        info!("client service closed");
    }

    async fn drive(&self, stop_rx: &Receiver<()>, event_tx: &ServiceEventTx) {
        let query = self.target.to_string();
        let resolved = tokio::select! {
            _ = stop_rx.recv_async() => return,
            result = lookup_host(query.as_str()) => result,
        };
        let addrs: Vec<SocketAddr> = match resolved {
            Ok(endpoints) => endpoints.collect(),
            Err(error) => {
                error!(%error, target = %query, "failed to resolve target");
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };
        if addrs.is_empty() {
            error!(target = %query, "target resolved to no endpoints");
            self.running.store(false, Ordering::SeqCst);
            return;
        }
        for addr in &addrs {
            debug!(endpoint = %addr, "resolved endpoint");
        }

        let mut dials: FuturesUnordered<_> =
            (0..self.connect_count).map(|_| dial(addrs.clone())).collect();
        loop {
            tokio::select! {
                _ = stop_rx.recv_async() => return,
                // the branch disables itself once every dial has finished
                Some(result) = dials.next() => match result {
                    Ok(socket) => {
                        debug!(target = %query, "connected to server");
                        let _ = event_tx.send(ServiceEvent::Connect(socket));
                    }
                    Err(error) => match classify_dial_error(error.kind()) {
                        DialClass::Terminal => {
                            error!(%error, target = %query, "connection attempt failed");
                            self.running.store(false, Ordering::SeqCst);
                            return;
                        }
                        DialClass::Transient => {
                            debug!(%error, target = %query, "connection attempt abandoned");
                        }
                    },
                },
            }
        }
    }
}

/// Try each resolved endpoint in order; first to accept wins.
async fn dial(addrs: Vec<SocketAddr>) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(socket) => return Ok(socket),
            Err(error) => {
                debug!(endpoint = %addr, %error, "endpoint rejected connection");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no endpoints to dial")
    }))
}
