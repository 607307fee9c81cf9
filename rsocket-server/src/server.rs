//! TCP server implementation.

use crate::acceptor::SocketAcceptor;
use crate::config::Config;
use crate::error::ServerError;
use bytes::Bytes;
use rsocket_core::{
    Connection, ConnectionConfig, FrameReader, FrameWriter, RSocketError, Side, TcpTransport,
    TcpWriter, Transport,
};
use rsocket_protocol::{Frame, FrameType, ProtocolError, SetupFrame, DEFAULT_PORT, MAJOR_VERSION};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Prefetch used by accepted connections.
    pub prefetch: u32,
    /// How long a new connection may take to send SETUP.
    pub setup_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 1000,
            prefetch: rsocket_core::config::DEFAULT_PREFETCH,
            setup_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            prefetch: config.connection.prefetch,
            setup_timeout: config.connection.setup_timeout(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for RSocket connections.
pub struct Server {
    config: ServerConfig,
    acceptor: Arc<dyn SocketAcceptor>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, acceptor: impl SocketAcceptor) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            acceptor: Arc::new(acceptor),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds to the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        // Subscribed before `running` is set; a shutdown after that is seen.
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let acceptor = self.acceptor.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let conn_id = Uuid::new_v4();
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    conn_id,
                                    acceptor,
                                    config,
                                    conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!(
                                        "[{}] Connection {} error: {}",
                                        conn_id,
                                        addr,
                                        e
                                    );
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("[{}] Client disconnected: {}", conn_id, addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Performs the SETUP handshake, then serves the connection until it
    /// ends or the server shuts down.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        conn_id: Uuid,
        acceptor: Arc<dyn SocketAcceptor>,
        config: ServerConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = TcpTransport::new(stream).split();

        let first = match tokio::time::timeout(config.setup_timeout, reader.read_frame()).await {
            Ok(Ok(Some(first))) => first,
            Ok(Ok(None)) => {
                tracing::debug!("[{}] {} closed before SETUP", conn_id, addr);
                return Ok(());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let err = ServerError::SetupTimeout(config.setup_timeout);
                reject(&mut writer, RSocketError::InvalidSetup(err.to_string())).await;
                return Err(err);
            }
        };

        let setup = match validate_setup(first) {
            Ok(setup) => setup,
            Err(err) => {
                tracing::warn!("[{}] Rejecting setup from {}: {}", conn_id, addr, err);
                reject(&mut writer, err.clone()).await;
                return Err(ServerError::SetupRejected(err));
            }
        };

        let rsocket = match acceptor.accept(&setup).await {
            Ok(rsocket) => rsocket,
            Err(err) => {
                let err = RSocketError::RejectedSetup(err.message());
                tracing::warn!("[{}] Rejecting setup from {}: {}", conn_id, addr, err);
                reject(&mut writer, err.clone()).await;
                return Err(ServerError::SetupRejected(err));
            }
        };

        tracing::info!(
            "[{}] Client connected: {} (keepalive {:?}, lifetime {:?})",
            conn_id,
            addr,
            setup.keepalive_interval,
            setup.max_lifetime
        );
        let connection_config = ConnectionConfig::default()
            .with_keepalive(setup.keepalive_interval, setup.max_lifetime)
            .with_prefetch(config.prefetch);
        let connection = Connection::start_split(
            Side::Server,
            reader,
            writer,
            connection_config,
            rsocket,
            None,
        );

        tokio::select! {
            cause = connection.closed() => {
                tracing::debug!("[{}] Connection ended: {}", conn_id, cause);
            }
            _ = shutdown.recv() => {
                connection.close();
                connection.closed().await;
            }
        }
        Ok(())
    }

    /// Signals the server and every open connection to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Checks the first frame of a connection.
pub fn validate_setup(bytes: Bytes) -> Result<SetupFrame, RSocketError> {
    let setup = match Frame::decode(bytes) {
        Ok(Frame::Setup(setup)) => setup,
        Ok(other) => {
            return Err(RSocketError::InvalidSetup(format!(
                "expected SETUP, got {:?}",
                other.frame_type()
            )))
        }
        Err(ProtocolError::UnsupportedFrameType {
            frame_type: FrameType::Resume,
            ..
        }) => {
            return Err(RSocketError::RejectedResume(
                "resumption is not supported".to_string(),
            ))
        }
        Err(e) => return Err(RSocketError::InvalidSetup(e.to_string())),
    };

    if setup.major_version != MAJOR_VERSION {
        return Err(RSocketError::UnsupportedSetup(format!(
            "unsupported version {}.{}",
            setup.major_version, setup.minor_version
        )));
    }
    if setup.resume_token.is_some() {
        return Err(RSocketError::UnsupportedSetup(
            "resumption is not supported".to_string(),
        ));
    }
    if setup.lease {
        return Err(RSocketError::UnsupportedSetup(
            "lease is not supported".to_string(),
        ));
    }
    Ok(setup)
}

/// Sends ERROR(0) for `err` and closes the transport.
async fn reject(writer: &mut TcpWriter, err: RSocketError) {
    let frame = Frame::error(0, err.error_code(), err.message());
    if let Ok(bytes) = frame.encode() {
        let _ = writer.write_frame(bytes.freeze()).await;
    }
    let _ = writer.shutdown().await;
}
