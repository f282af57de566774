//! TCP accept loop and server lifetime.

use log::{error, info, warn};
use shared::crypto::KeyPair;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::context::ArenaContext;
use crate::coordinator::TickCoordinator;
use crate::error::ServerError;
use crate::game::SnakeWorld;
use crate::session::ClientSession;

/// Stops a running server: the accept loop, the tick coordinator and every
/// session, each of which still runs its cleanup.
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

/// Resolves once shutdown is requested or the signal's sender is gone.
/// Spurious wake-ups with the value still `false` are absorbed here, so
/// callers can race it against reads that are not cancel-safe.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let requested = *shutdown.borrow_and_update();
        if requested || shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub struct ArenaServer {
    listener: TcpListener,
    context: Arc<ArenaContext>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ArenaServer {
    /// Validates the config, generates the server key pair and binds.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        info!("Generating {}-bit server key", config.key_bits);
        let keys = KeyPair::generate(config.key_bits)?;
        Self::bind_with_keys(config, keys).await
    }

    pub async fn bind_with_keys(config: ServerConfig, keys: KeyPair) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(config.address()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let world = SnakeWorld::new(config.grid_rows, config.snack_count, config.world_seed);
        let context = Arc::new(ArenaContext::new(config, keys, Box::new(world)));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            context,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> Arc<ArenaContext> {
        Arc::clone(&self.context)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: Arc::clone(&self.shutdown),
        }
    }

    /// Starts the tick coordinator and accepts connections until shutdown.
    /// Returns once every session has finished its cleanup.
    pub async fn run(self) -> Result<(), ServerError> {
        let coordinator = TickCoordinator::start(self.context(), self.shutdown.subscribe())?;
        let mut shutdown = self.shutdown.subscribe();
        let mut sessions = JoinSet::new();

        info!("Server started, waiting for connections");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Connected to: {}", addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Cannot set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let session = ClientSession::new(
                            self.context(),
                            stream,
                            addr.to_string(),
                            self.shutdown.subscribe(),
                        );
                        sessions.spawn(async move {
                            let identity = session.identity();
                            if let Err(e) = session.run().await {
                                warn!("Session {} ended with error: {}", identity, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!("Session task panicked: {}", e);
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                error!("Session task panicked: {}", e);
            }
        }
        if let Err(e) = coordinator.await {
            error!("Tick coordinator panicked: {}", e);
        }
        info!("Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keys, server_keys};
    use shared::framing::{read_frame, write_frame};
    use shared::{ServerPush, MAX_FRAME_BYTES};
    use tokio::net::TcpStream;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            tick_period: Duration::from_millis(20),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            grid_rows: 0,
            ..local_config()
        };
        assert!(matches!(
            ArenaServer::bind_with_keys(config, server_keys()).await,
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = ArenaServer::bind_with_keys(local_config(), server_keys())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        let context = server.context();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        handle.await.unwrap().unwrap();

        assert!(context.latest_state().await.is_some());
        assert!(matches!(
            context.claim_coordinator(),
            Err(ServerError::CoordinatorRunning)
        ));
    }

    /// Completes the key exchange over TCP and waits for the welcome push.
    async fn join_over_tcp(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        read_frame(&mut stream, MAX_FRAME_BYTES).await.unwrap().unwrap();
        let pem = keys()[0].public_pem().unwrap();
        write_frame(&mut stream, pem.as_bytes(), MAX_FRAME_BYTES)
            .await
            .unwrap();
        let welcome = read_frame(&mut stream, MAX_FRAME_BYTES).await.unwrap().unwrap();
        assert!(matches!(
            ServerPush::decode(&welcome).unwrap(),
            ServerPush::Welcome { .. }
        ));
        stream
    }

    #[tokio::test]
    async fn test_run_waits_for_session_cleanup() {
        let server = ArenaServer::bind_with_keys(local_config(), server_keys())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let context = server.context();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        let mut streams = Vec::new();
        for _ in 0..3 {
            streams.push(join_over_tcp(addr).await);
        }
        assert_eq!(context.session_count().await, 3);

        shutdown.trigger();
        handle.await.unwrap().unwrap();

        // No polling: every session has left by the time run returns.
        assert_eq!(context.session_count().await, 0);
        for mut stream in streams {
            assert!(read_frame(&mut stream, MAX_FRAME_BYTES).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_shutdown_requested_ignores_false_updates() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            shutdown_requested(&mut rx).await;
        });

        tx.send_replace(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
