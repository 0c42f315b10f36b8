//! Command execution engine
//!
//! Runs the commands in `CommandKind` against the key spaces it owns. There
//! are two ways in:
//!
//! - [`Engine::execute`] never touches the log. Replay uses it, as does any
//!   caller without persistence.
//! - [`Engine::execute_logged`] appends the original request to the log
//!   before a mutating command changes anything. The append happens while the
//!   touched space's write lock is held, so log order matches apply order.
//!
//! Arity and domain checks run before the append: a request that cannot
//! succeed is neither logged nor applied.

use crate::command::{CommandKind, Request};
use crate::error::{CommandError, RespVaultError, Result};
use crate::protocol::Value;
use crate::store::KeySpaces;
use crate::wal::WriteAheadLog;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub struct Engine {
    spaces: KeySpaces,
    wal: Option<Arc<WriteAheadLog>>,
}

impl Engine {
    /// Engine without persistence; `execute_logged` behaves like `execute`.
    pub fn new(spaces: KeySpaces) -> Self {
        Self { spaces, wal: None }
    }

    /// Engine whose logged entry point appends to `wal`
    pub fn with_wal(spaces: KeySpaces, wal: Arc<WriteAheadLog>) -> Self {
        Self {
            spaces,
            wal: Some(wal),
        }
    }

    pub fn spaces(&self) -> &KeySpaces {
        &self.spaces
    }

    /// Run a command without logging it.
    ///
    /// Command-level failures come back as `Value::Error`; `Err` is reserved
    /// for failures outside the command itself.
    pub async fn execute(&self, kind: CommandKind, args: &[Bytes]) -> Result<Value> {
        self.dispatch(kind, args, None).await
    }

    /// Run a command, first appending `request` to the log if it mutates.
    ///
    /// An append failure is returned as `Err` and nothing is applied.
    pub async fn execute_logged(
        &self,
        kind: CommandKind,
        args: &[Bytes],
        request: &Value,
    ) -> Result<Value> {
        self.dispatch(kind, args, Some(request)).await
    }

    /// Rebuild state from `wal` through the unlogged entry point.
    pub async fn replay(&self, wal: &WriteAheadLog) -> Result<u64> {
        wal.replay(|record| self.apply_recorded(record)).await
    }

    async fn apply_recorded(&self, record: Value) -> Result<()> {
        let request = Request::from_value(&record).ok_or_else(|| {
            RespVaultError::Protocol("record is not an array of bulk strings".to_string())
        })?;
        let kind = request.kind().ok_or_else(|| {
            RespVaultError::Protocol(format!("unknown command '{}'", request.display_name()))
        })?;

        if let Value::Error(message) = self.execute(kind, &request.args).await? {
            debug!(command = kind.name(), error = %message, "replayed command was rejected");
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        kind: CommandKind,
        args: &[Bytes],
        request: Option<&Value>,
    ) -> Result<Value> {
        if let Err(e) = kind.check_arity(args.len()) {
            return Ok(Value::error(e.to_string()));
        }
        let record = request.filter(|_| kind.is_mutating());

        let result = match kind {
            CommandKind::Ping => Ok(ping(args)),
            CommandKind::Set => self.set(args, record).await,
            CommandKind::Get => self.get(args).await,
            CommandKind::Del => self.del(args, record).await,
            CommandKind::Exists => self.exists(args).await,
            CommandKind::Incr => self.incr(args, record).await,
            CommandKind::HSet => self.hset(args, record).await,
            CommandKind::HGet => self.hget(args).await,
            CommandKind::HGetAll => self.hgetall(args).await,
        };

        match result {
            Err(RespVaultError::Command(e)) => Ok(Value::error(e.to_string())),
            other => other,
        }
    }

    /// Append `record` if there is one and a log to append it to.
    async fn journal(&self, record: Option<&Value>) -> Result<()> {
        match (record, &self.wal) {
            (Some(request), Some(wal)) => wal.append(request).await,
            _ => Ok(()),
        }
    }

    async fn set(&self, args: &[Bytes], record: Option<&Value>) -> Result<Value> {
        let mut scalars = self.spaces.scalars.write().await;
        self.journal(record).await?;
        scalars.insert(args[0].clone(), args[1].clone());
        Ok(Value::ok())
    }

    async fn get(&self, args: &[Bytes]) -> Result<Value> {
        let scalars = self.spaces.scalars.read().await;
        Ok(scalars
            .get(&args[0])
            .map_or(Value::Null, |value| Value::Bulk(value.clone())))
    }

    async fn del(&self, args: &[Bytes], record: Option<&Value>) -> Result<Value> {
        let mut scalars = self.spaces.scalars.write().await;
        self.journal(record).await?;
        let removed = args
            .iter()
            .filter(|key| scalars.remove(*key).is_some())
            .count();
        Ok(Value::Integer(removed as i64))
    }

    async fn exists(&self, args: &[Bytes]) -> Result<Value> {
        let scalars = self.spaces.scalars.read().await;
        let present = args.iter().filter(|key| scalars.contains_key(*key)).count();
        Ok(Value::Integer(present as i64))
    }

    async fn incr(&self, args: &[Bytes], record: Option<&Value>) -> Result<Value> {
        let key = &args[0];
        let mut scalars = self.spaces.scalars.write().await;
        let next = match scalars.get(key) {
            None => 1,
            Some(current) => parse_integer(current)?
                .checked_add(1)
                .ok_or(CommandError::Overflow)?,
        };
        self.journal(record).await?;
        scalars.insert(key.clone(), Bytes::from(next.to_string()));
        Ok(Value::Integer(next))
    }

    async fn hset(&self, args: &[Bytes], record: Option<&Value>) -> Result<Value> {
        let mut hashes = self.spaces.hashes.write().await;
        self.journal(record).await?;
        hashes
            .entry(args[0].clone())
            .or_default()
            .insert(args[1].clone(), args[2].clone());
        Ok(Value::ok())
    }

    async fn hget(&self, args: &[Bytes]) -> Result<Value> {
        let hashes = self.spaces.hashes.read().await;
        Ok(hashes
            .get(&args[0])
            .and_then(|hash| hash.get(&args[1]))
            .map_or(Value::Null, |value| Value::Bulk(value.clone())))
    }

    async fn hgetall(&self, args: &[Bytes]) -> Result<Value> {
        let hashes = self.spaces.hashes.read().await;
        let Some(hash) = hashes.get(&args[0]) else {
            return Ok(Value::Null);
        };
        let flattened = hash
            .iter()
            .flat_map(|(field, value)| [Value::Bulk(field.clone()), Value::Bulk(value.clone())])
            .collect();
        Ok(Value::Array(flattened))
    }
}

/// `+PONG`, or the argument echoed back. The echo is a bulk string rather
/// than a simple string so that arbitrary bytes, CR and LF included, survive.
fn ping(args: &[Bytes]) -> Value {
    match args.first() {
        Some(message) => Value::Bulk(message.clone()),
        None => Value::SimpleString("PONG".to_string()),
    }
}

fn parse_integer(value: &[u8]) -> std::result::Result<i64, CommandError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}
