use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::connection::Connection;
use crate::session::{AUTH_OK, ERROR_PREFIX, GET_JSON};
use crate::table::Schema;
use crate::Error;

/// Answer to a request, split on the server's error prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(String),
    Error(String),
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        match text.strip_prefix(ERROR_PREFIX) {
            Some(message) => Reply::Error(message.to_string()),
            None => Reply::Ok(text),
        }
    }
}

/// Async client speaking the server's framed protocol.
pub struct Client {
    connection: Connection,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Client, Error> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Client {
            connection: Connection::new(stream),
        })
    }

    /// Sends the credentials. The server closes the connection after a failed attempt, so a
    /// client that got `false` back is no longer usable.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool, Error> {
        let reply = self.round_trip(format!("{username} {password}")).await?;
        Ok(reply == AUTH_OK)
    }

    pub async fn request(&mut self, command: &str) -> Result<Reply, Error> {
        self.round_trip(command).await.map(Reply::from)
    }

    pub async fn schema(&mut self) -> Result<Schema, Error> {
        match self.request(GET_JSON).await? {
            Reply::Ok(json) => Ok(serde_json::from_str(&json)?),
            Reply::Error(message) => Err(message.into()),
        }
    }

    async fn round_trip(&mut self, payload: impl AsRef<[u8]>) -> Result<String, Error> {
        self.connection.write_message(payload).await?;

        let reply = self
            .connection
            .read_message()
            .await?
            .ok_or("connection closed by server")?;
        debug!(bytes = reply.len(), "Received reply");

        Ok(String::from_utf8(reply.to_vec())?)
    }
}
