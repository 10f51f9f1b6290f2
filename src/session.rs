use bytes::Bytes;
use std::str;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error as ThisError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{self, JoinError};
use tracing::{debug, info, instrument, warn};

use crate::auth::{self, Credentials};
use crate::cache::ResultCache;
use crate::codec::ProtocolError;
use crate::connection::Connection;
use crate::query::{ParseError, Query};
use crate::table::{TableError, TableStore};

pub const AUTH_OK: &str = "AUTH_OK";
pub const AUTH_FAIL: &str = "AUTH_FAIL";
pub const GET_JSON: &str = "GET_JSON";
/// Every failed request is answered with a payload starting with this prefix.
pub const ERROR_PREFIX: &str = "ERROR: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum State {
    Connected,
    Authenticating,
    Authenticated,
    Closed,
}

/// Failures scoped to a single request. They are reported back to the client and the session
/// carries on with the next request.
#[derive(Debug, ThisError)]
pub enum RequestError {
    #[error(transparent)]
    MalformedQuery(#[from] ParseError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("invalid request; payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("internal error; {0}")]
    Task(#[from] JoinError),
    #[error("internal error; {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    AuthOk,
    AuthFail,
    /// JSON object mapping each table to its columns.
    Schema(String),
    /// Rendered query result.
    Rows(String),
    Error(String),
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        match response {
            Response::AuthOk => Bytes::from_static(AUTH_OK.as_bytes()),
            Response::AuthFail => Bytes::from_static(AUTH_FAIL.as_bytes()),
            Response::Schema(text) | Response::Rows(text) => Bytes::from(text),
            Response::Error(message) => Bytes::from(format!("{ERROR_PREFIX}{message}")),
        }
    }
}

impl From<RequestError> for Response {
    fn from(err: RequestError) -> Self {
        Response::Error(err.to_string())
    }
}

/// Serves one client from accept to disconnect.
///
/// The first message must be the credentials. A wrong or malformed login is answered with
/// `AUTH_FAIL` and ends the session; there is no second attempt. Once authenticated, every
/// message is either `GET_JSON` or a query, and every one of them gets exactly one response. An
/// empty message ends the session like a hang-up.
pub struct Session<S> {
    connection: Connection<S>,
    credentials: Arc<Credentials>,
    tables: TableStore,
    cache: ResultCache,
    state: State,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        connection: Connection<S>,
        credentials: Arc<Credentials>,
        tables: TableStore,
        cache_ttl: Duration,
    ) -> Session<S> {
        Session {
            connection,
            credentials,
            tables,
            cache: ResultCache::new(cache_ttl),
            state: State::Connected,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Drives the session until the peer goes away. Only I/O failures on the connection itself
    /// are returned as errors; request failures are answered and forgotten.
    pub async fn run(&mut self) -> Result<(), ProtocolError> {
        self.state = State::Authenticating;
        let authenticated = self.authenticate().await;
        if !matches!(authenticated, Ok(true)) {
            self.state = State::Closed;
            return authenticated.map(|_| ());
        }
        self.state = State::Authenticated;

        let served = self.serve_requests().await;
        self.state = State::Closed;
        served
    }

    async fn authenticate(&mut self) -> Result<bool, ProtocolError> {
        let Some(payload) = self.receive().await? else {
            info!("Connection closed before authenticating");
            return Ok(false);
        };

        let authenticated = match auth::parse_login(&payload) {
            Some((username, password)) => {
                let valid = self.credentials.check(username, password);
                info!(username, valid, "Login attempt");
                valid
            }
            None => {
                info!("Malformed login message");
                false
            }
        };

        let response = if authenticated {
            Response::AuthOk
        } else {
            Response::AuthFail
        };
        self.send(response).await?;

        Ok(authenticated)
    }

    async fn serve_requests(&mut self) -> Result<(), ProtocolError> {
        while let Some(payload) = self.receive().await? {
            if payload.is_empty() {
                info!("Empty request, closing");
                break;
            }
            let response = self.handle_request(&payload).await;
            self.send(response).await?;
        }

        info!("Connection closed");
        Ok(())
    }

    #[instrument(name = "request", skip_all, fields(bytes = payload.len()))]
    async fn handle_request(&mut self, payload: &[u8]) -> Response {
        match self.dispatch(payload).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "Request failed");
                err.into()
            }
        }
    }

    async fn dispatch(&mut self, payload: &[u8]) -> Result<Response, RequestError> {
        let command = str::from_utf8(payload)
            .map_err(|_| RequestError::InvalidUtf8)?
            .trim();

        if command.eq_ignore_ascii_case(GET_JSON) {
            let tables = self.tables.clone();
            let schema = task::spawn_blocking(move || tables.describe_schema()).await??;
            return Ok(Response::Schema(serde_json::to_string(&schema)?));
        }

        let query = Query::parse(command)?;
        debug!(%query, "Parsed query");

        if let Some(result) = self.cache.lookup(&query) {
            debug!("Cache hit");
            return Ok(Response::Rows(result.to_string()));
        }
        debug!("Cache miss");

        let tables = self.tables.clone();
        let result = task::spawn_blocking({
            let query = query.clone();
            move || tables.execute(&query)
        })
        .await??;

        self.cache.store(&query, result.clone());
        Ok(Response::Rows(result))
    }

    /// `Ok(None)` when the peer is gone, including when it hung up halfway through a message.
    async fn receive(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.connection.read_message().await {
            Err(err @ ProtocolError::Truncated { .. }) => {
                warn!(error = %err, "Dropping partial message");
                Ok(None)
            }
            result => result,
        }
    }

    async fn send(&mut self, response: Response) -> Result<(), ProtocolError> {
        self.connection.write_message(Bytes::from(response)).await
    }
}
