//! Client library for connecting to a RespVault server
//!
//! Speaks RESP over one TCP connection: each call sends one request array and
//! waits for its reply.

use crate::error::{RespVaultError, Result};
use crate::protocol::{RespReader, RespWriter, Value};
use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Client for connecting to a RespVault server
pub struct Client {
    reader: RespReader<OwnedReadHalf>,
    writer: RespWriter<OwnedWriteHalf>,
}

impl Client {
    /// Connect to a RespVault server
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: RespReader::new(read_half),
            writer: RespWriter::new(write_half),
        })
    }

    /// Send an arbitrary request and return the raw reply.
    ///
    /// Error replies are returned as `Value::Error`, not as `Err`.
    pub async fn command<I, T>(&mut self, parts: I) -> Result<Value>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.send(&Value::request(parts)).await
    }

    /// Send a pre-built value and return the raw reply.
    pub async fn send(&mut self, request: &Value) -> Result<Value> {
        self.writer.write_value(request).await?;
        self.reader
            .read_value()
            .await?
            .ok_or_else(|| RespVaultError::Client("connection closed by server".to_string()))
    }

    /// Like `command`, but error replies become `RespVaultError::Server`.
    async fn call<I, T>(&mut self, parts: I) -> Result<Value>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        match self.command(parts).await? {
            Value::Error(e) => Err(RespVaultError::Server(e)),
            reply => Ok(reply),
        }
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.call([Bytes::from_static(b"PING")]).await? {
            Value::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    /// Set a key-value pair
    pub async fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        match self.call([Bytes::from_static(b"SET"), key.into(), value.into()]).await? {
            Value::SimpleString(_) => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    /// Get a value by key
    pub async fn get(&mut self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        match self.call([Bytes::from_static(b"GET"), key.into()]).await? {
            Value::Bulk(value) => Ok(Some(value)),
            Value::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    /// Delete keys, returning how many existed
    pub async fn del<I, T>(&mut self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let parts =
            std::iter::once(Bytes::from_static(b"DEL")).chain(keys.into_iter().map(Into::into));
        integer("DEL", self.call(parts).await?)
    }

    /// Count how many of the given keys exist
    pub async fn exists<I, T>(&mut self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let parts =
            std::iter::once(Bytes::from_static(b"EXISTS")).chain(keys.into_iter().map(Into::into));
        integer("EXISTS", self.call(parts).await?)
    }

    pub async fn incr(&mut self, key: impl Into<Bytes>) -> Result<i64> {
        integer("INCR", self.call([Bytes::from_static(b"INCR"), key.into()]).await?)
    }

    pub async fn hset(
        &mut self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        let parts = [Bytes::from_static(b"HSET"), key.into(), field.into(), value.into()];
        match self.call(parts).await? {
            Value::SimpleString(_) => Ok(()),
            other => Err(unexpected("HSET", &other)),
        }
    }

    pub async fn hget(
        &mut self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
    ) -> Result<Option<Bytes>> {
        match self.call([Bytes::from_static(b"HGET"), key.into(), field.into()]).await? {
            Value::Bulk(value) => Ok(Some(value)),
            Value::Null => Ok(None),
            other => Err(unexpected("HGET", &other)),
        }
    }

    /// All field/value pairs of a hash, or `None` if the hash does not exist.
    pub async fn hgetall(&mut self, key: impl Into<Bytes>) -> Result<Option<Vec<(Bytes, Bytes)>>> {
        let items = match self.call([Bytes::from_static(b"HGETALL"), key.into()]).await? {
            Value::Null => return Ok(None),
            Value::Array(items) if items.len() % 2 == 0 => items,
            other => return Err(unexpected("HGETALL", &other)),
        };

        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            match (field, value) {
                (Value::Bulk(field), Value::Bulk(value)) => pairs.push((field, value)),
                _ => {
                    return Err(RespVaultError::Protocol(
                        "Unexpected element in HGETALL reply".to_string(),
                    ))
                }
            }
        }
        Ok(Some(pairs))
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}

fn integer(command: &str, reply: Value) -> Result<i64> {
    match reply {
        Value::Integer(n) => Ok(n),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &str, reply: &Value) -> RespVaultError {
    RespVaultError::Protocol(format!("Unexpected response for {}: {:?}", command, reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_reply() {
        assert_eq!(integer("INCR", Value::Integer(7)).unwrap(), 7);

        let err = integer("INCR", Value::bulk("7")).unwrap_err();
        assert!(matches!(err, RespVaultError::Protocol(_)));
        assert!(err.to_string().contains("INCR"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = Client::connect(&addr).await;
        assert!(matches!(result, Err(RespVaultError::Io(_))));
    }
}
