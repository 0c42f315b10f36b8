//! RespVault TCP Server
//!
//! Replays the append-only file, then serves RESP clients with one tokio
//! task per connection. Mutating requests are logged before they are applied.

use crate::{
    command::Request,
    config::ServerConfig,
    engine::Engine,
    error::{RespVaultError, Result},
    protocol::{DecodeLimits, RespReader, RespWriter, Value},
    store::KeySpaces,
    wal::WriteAheadLog,
};
use std::sync::Arc;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, Semaphore},
};
use tracing::{debug, error, info, warn};

/// RespVault TCP server
pub struct RespVaultServer {
    config: ServerConfig,
    engine: Arc<Engine>,
    wal: Arc<WriteAheadLog>,
    connections: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RespVaultServer {
    /// Open the log, replay it, and get ready to accept clients.
    ///
    /// Fails on an unusable config, or if the log cannot be replayed;
    /// nothing is served from a partially restored state.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let wal = Arc::new(
            WriteAheadLog::open(&config.aof_path, config.sync_policy)
                .await?
                .with_limits(config.decode_limits()),
        );
        let engine = Engine::with_wal(KeySpaces::new(), Arc::clone(&wal));

        info!(path = %config.aof_path.display(), "restoring state from append-only file");
        let records = engine.replay(&wal).await?;
        info!(
            records,
            keys = engine.spaces().scalar_len().await,
            hashes = engine.spaces().hash_len().await,
            "state restored"
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            connections: Arc::new(Semaphore::new(config.max_connections)),
            config,
            engine: Arc::new(engine),
            wal,
            shutdown_tx,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown, then close the log.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "RespVault server listening");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let engine = Arc::clone(&self.engine);
                            let connections = Arc::clone(&self.connections);
                            let limits = self.config.decode_limits();
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                // Excess clients wait here for a free slot.
                                let Ok(_permit) = connections.acquire_owned().await else {
                                    return;
                                };
                                debug!(%addr, "client connected");
                                if let Err(e) = handle_client(stream, engine, limits, shutdown_rx).await {
                                    warn!(%addr, error = %e, "client connection failed");
                                }
                                debug!(%addr, "client disconnected");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }

        self.wal.close().await?;
        info!("server stopped");
        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send(()).map_err(|_| {
            RespVaultError::Server("Failed to send shutdown signal".to_string())
        })?;
        Ok(())
    }
}

/// Serve one client: one request in, one response out, in arrival order.
async fn handle_client(
    stream: TcpStream,
    engine: Arc<Engine>,
    limits: DecodeLimits,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = RespReader::with_limits(read_half, limits);
    let mut writer = RespWriter::new(write_half);

    loop {
        let next = tokio::select! {
            result = reader.read_value() => result,
            _ = shutdown_rx.recv() => {
                debug!("shutdown signal received, closing client connection");
                break;
            }
        };

        let value = match next {
            Ok(Some(value)) => value,
            Ok(None) => break,
            Err(e @ RespVaultError::Protocol(_)) => {
                let _ = writer.write_value(&Value::error(format!("ERR {}", e))).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let reply = respond(&engine, &value).await;
        writer.write_value(&reply).await?;
    }

    Ok(())
}

/// Validate, dispatch and execute one decoded request.
async fn respond(engine: &Engine, value: &Value) -> Value {
    let Some(request) = Request::from_value(value) else {
        return Value::error("ERR invalid request format");
    };
    let Some(kind) = request.kind() else {
        return Value::error(format!("ERR unknown command '{}'", request.display_name()));
    };

    match engine.execute_logged(kind, &request.args, value).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(command = kind.name(), error = %e, "failed to log command, not executed");
            Value::error("ERR internal server error")
        }
    }
}
