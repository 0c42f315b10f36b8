//! Command table and request extraction
//!
//! `CommandKind` is the one place that knows command names, their arity and
//! whether they mutate state. Dispatch and the decision to log a request both
//! read it from here.

use crate::error::CommandError;
use crate::protocol::Value;
use bytes::Bytes;

/// Commands understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ping,
    Set,
    Get,
    Del,
    Exists,
    Incr,
    HSet,
    HGet,
    HGetAll,
}

/// Accepted argument counts, command name excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exactly(want) => n == want,
            Arity::AtLeast(min) => n >= min,
            Arity::Between(min, max) => (min..=max).contains(&n),
        }
    }
}

#[derive(Debug)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub arity: Arity,
    pub mutating: bool,
}

/// Indexed by `CommandKind as usize`.
static TABLE: [CommandSpec; 9] = [
    CommandSpec { kind: CommandKind::Ping, name: "ping", arity: Arity::Between(0, 1), mutating: false },
    CommandSpec { kind: CommandKind::Set, name: "set", arity: Arity::Exactly(2), mutating: true },
    CommandSpec { kind: CommandKind::Get, name: "get", arity: Arity::Exactly(1), mutating: false },
    CommandSpec { kind: CommandKind::Del, name: "del", arity: Arity::AtLeast(1), mutating: true },
    CommandSpec { kind: CommandKind::Exists, name: "exists", arity: Arity::AtLeast(1), mutating: false },
    CommandSpec { kind: CommandKind::Incr, name: "incr", arity: Arity::Exactly(1), mutating: true },
    CommandSpec { kind: CommandKind::HSet, name: "hset", arity: Arity::Exactly(3), mutating: true },
    CommandSpec { kind: CommandKind::HGet, name: "hget", arity: Arity::Exactly(2), mutating: false },
    CommandSpec { kind: CommandKind::HGetAll, name: "hgetall", arity: Arity::Exactly(1), mutating: false },
];

impl CommandKind {
    /// Case-insensitive lookup by command name.
    pub fn lookup(name: &[u8]) -> Option<Self> {
        TABLE
            .iter()
            .find(|spec| spec.name.as_bytes().eq_ignore_ascii_case(name))
            .map(|spec| spec.kind)
    }

    pub fn spec(self) -> &'static CommandSpec {
        &TABLE[self as usize]
    }

    /// Lower-case name, as used in error messages
    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Whether the command changes key-space state and must be logged.
    pub fn is_mutating(self) -> bool {
        self.spec().mutating
    }

    pub fn check_arity(self, args: usize) -> Result<(), CommandError> {
        if self.spec().arity.accepts(args) {
            Ok(())
        } else {
            Err(CommandError::WrongArity(self.name()))
        }
    }

    pub fn all() -> impl Iterator<Item = CommandKind> {
        TABLE.iter().map(|spec| spec.kind)
    }
}

/// A decoded request split into command name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: Bytes,
    pub args: Vec<Bytes>,
}

impl Request {
    /// Accepts only a non-empty array whose elements are all bulk strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Array(items) = value else {
            return None;
        };
        let mut parts = items
            .iter()
            .map(|item| item.as_bulk().cloned())
            .collect::<Option<Vec<Bytes>>>()?
            .into_iter();
        let name = parts.next()?;
        Some(Self {
            name,
            args: parts.collect(),
        })
    }

    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::lookup(&self.name)
    }

    /// Upper-cased command name for messages
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).to_ascii_uppercase()
    }
}
