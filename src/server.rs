use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::Credentials;
use crate::config::Config;
use crate::connection::Connection;
use crate::session::Session;
use crate::table::TableStore;
use crate::Error;

/// Pause after a failed `accept`, so running out of file descriptors does not turn into a busy
/// loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State handed to every connection. Only the credentials are shared; each session builds its own
/// result cache.
#[derive(Clone)]
pub struct Context {
    pub credentials: Arc<Credentials>,
    pub tables: TableStore,
    pub cache_ttl: Duration,
    pub max_connections: Option<usize>,
}

impl Context {
    pub fn from_config(config: &Config) -> Context {
        Context {
            credentials: Arc::new(Credentials::default()),
            tables: TableStore::new(&config.data_dir),
            cache_ttl: config.cache_ttl(),
            max_connections: config.max_connections,
        }
    }
}

/// Where connections come from. `TcpListener` is the only implementation outside of tests.
pub trait Listener {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
    let listener = TcpListener::bind(config.address()).await?;
    serve(listener, Context::from_config(&config), shutdown).await
}

/// Accepts connections and spawns one task per connection. Sessions never share mutable state, so
/// a failing session only ever takes itself down. A failed `accept` is logged and retried; only
/// `shutdown` ends the loop.
pub async fn serve<L: Listener>(
    mut listener: L,
    context: Context,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let limit = match context.max_connections {
        Some(max) if max == 0 || max > Semaphore::MAX_PERMITS => {
            return Err(format!("connection limit {max} is out of range").into());
        }
        Some(max) => Some(Arc::new(Semaphore::new(max))),
        None => None,
    };

    info!(
        data_dir = %context.tables.root().display(),
        "Server listening on {}",
        listener.local_addr()?
    );

    tokio::pin!(shutdown);

    loop {
        let permit = match &limit {
            Some(limit) => tokio::select! {
                permit = limit.clone().acquire_owned() => Some(permit?),
                _ = &mut shutdown => break,
            },
            None => None,
        };

        let (socket, client_address) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::select! {
                        _ = time::sleep(ACCEPT_BACKOFF) => continue,
                        _ = &mut shutdown => break,
                    }
                }
            },
            _ = &mut shutdown => break,
        };
        info!("Accepted connection from {:?}", client_address);

        let context = context.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, context, permit).await {
                error!(error = %e, "Connection failed");
            }
        });
    }

    info!("Server shutting down");
    Ok(())
}

#[instrument(
    name = "connection",
    skip(stream, context, _permit),
    fields(connection_id, client_address)
)]
async fn handle_connection<S>(
    stream: S,
    client_address: SocketAddr,
    context: Context,
    _permit: Option<OwnedSemaphorePermit>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let conn = Connection::new(stream);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    let mut session = Session::new(
        conn,
        context.credentials,
        context.tables,
        context.cache_ttl,
    );
    session.run().await?;

    debug!(state = %session.state(), "Session finished");
    Ok(())
}
