use std::io;
use std::net::SocketAddr;
use thiserror::Error as ThisError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, instrument, warn};

use crate::commands::{Context, Handler, Registry};
use crate::config::Config;
use crate::connection::Connection;
use crate::store::Store;
use crate::Error;

#[derive(Debug, ThisError)]
pub enum ServerError {
    #[error("listener error: {0}")]
    Listener(#[from] io::Error),
    #[error("giving up after {} failed accepts:\n{}", .0.len(), join_errors(.0))]
    TooManyAcceptFailures(Vec<io::Error>),
}

fn join_errors(errors: &[io::Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

// Failed accepts seen by one listener. Up to `limit` of them are tolerated.
struct AcceptFailures {
    limit: usize,
    errors: Vec<io::Error>,
}

impl AcceptFailures {
    fn new(limit: usize) -> AcceptFailures {
        AcceptFailures {
            limit,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, err: io::Error) -> Result<(), ServerError> {
        warn!("Failed to accept connection: {}", err);
        self.errors.push(err);

        if self.errors.len() > self.limit {
            return Err(ServerError::TooManyAcceptFailures(std::mem::take(
                &mut self.errors,
            )));
        }
        Ok(())
    }
}

/// A key-value server instance: its own store, command table and listener lifecycle.
///
/// Several servers can run in the same process without sharing any data. Must be created from
/// within a Tokio runtime, since the store starts its expiration task right away.
pub struct Server {
    config: Config,
    store: Store,
    registry: Registry,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: Config) -> Server {
        Server {
            config,
            store: Store::new(),
            registry: Registry::with_builtins(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Adds or replaces a command. Takes effect for every command dispatched afterwards,
    /// including on connections that are already open.
    pub fn register_command<H: Handler>(&self, name: &str, handler: H) {
        self.registry.register(name, handler);
    }

    /// Stops accepting new connections. Open connections and pending expirations are left to
    /// finish on their own. Calling it more than once has no further effect.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub async fn listen_and_serve(&self, addr: impl ToSocketAddrs) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until the server is closed, either by [`Server::close`]
    /// or by a client sending QUIT. Each connection is served by its own task.
    ///
    /// Failed accepts are retried; once more than `max_accept_failures` have happened the loop
    /// stops and all collected errors are returned.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Server listening on {}", listener.local_addr()?);

        let mut failures = AcceptFailures::new(self.config.max_accept_failures);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.shutdown.cancelled() => {
                    info!("Listener closed");
                    return Ok(());
                }
            };

            let (socket, client_address) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    failures.record(e)?;
                    continue;
                }
            };

            info!("Accepted connection from {:?}", client_address);

            let ctx = self.context();
            let registry = self.registry.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(socket, client_address, ctx, registry, config).await
                {
                    error!(e);
                }
            });
        }
    }

    fn context(&self) -> Context {
        Context {
            store: self.store.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

#[instrument(
    name = "connection",
    skip(stream, ctx, registry, config),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    ctx: Context,
    registry: Registry,
    config: Config,
) -> Result<(), Error> {
    let mut conn = Connection::with_config(stream, &config);

    tracing::Span::current()
        .record("connection_id", field::display(conn.id))
        .record("client_address", field::display(client_address));

    serve_connection(&mut conn, &ctx, &registry).await?;

    info!("Connection closed");
    Ok(())
}

/// Reads frames from `conn` until the peer hangs up, dispatching each one and writing its reply,
/// if any, before the next frame is looked at.
pub async fn serve_connection<S>(
    conn: &mut Connection<S>,
    ctx: &Context,
    registry: &Registry,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = conn.read_frame().await? {
        debug!("Received frame from client: {}", frame);

        if let Some(res) = registry.dispatch(ctx, frame) {
            debug!("Sending response to client: {}", res);
            conn.write_frame(&res).await?;
        }
    }

    Ok(())
}
