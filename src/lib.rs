//! RespVault - a small Redis-compatible key-value server with an append-only file
//!
//! This library provides:
//! - A RESP codec built on nom, usable over sockets and files alike
//! - Scalar (string/integer) and hash key spaces behind independent locks
//! - Write-ahead logging of every mutating request, replayed at startup
//! - A tokio TCP server and a matching client

pub mod client;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;
pub mod wal;

pub use client::Client;
pub use command::{CommandKind, Request};
pub use config::{ServerConfig, SyncPolicy};
pub use engine::Engine;
pub use error::{CommandError, RespVaultError, Result};
pub use protocol::{DecodeLimits, Decoder, Value};
pub use server::RespVaultServer;
pub use store::KeySpaces;
pub use wal::WriteAheadLog;
