pub mod key;
pub mod server_cmd;
pub mod string;

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::connection::ClientState;
use crate::error::{ProxyError, ProxyResult};
use crate::resp::RespValue;
use crate::store::KvStore;
use crate::ttl::TtlNormalizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Get,
    Set,
    MGet,
    MSet,
    Del,
    Exists,
    Expire,
    PExpire,
    Ttl,
    PTtl,
    Ping,
    Quit,
}

/// Accepted argument counts, including the command name itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&argc),
        }
    }
}

#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub kind: CommandKind,
    pub arity: Arity,
}

const fn spec(name: &'static str, kind: CommandKind, arity: Arity) -> CommandSpec {
    CommandSpec { name, kind, arity }
}

/// Every command the proxy understands.
pub const COMMAND_TABLE: &[CommandSpec] = &[
    spec("GET", CommandKind::Get, Arity::Exact(2)),
    // SET's modifier shape is checked by the handler.
    spec("SET", CommandKind::Set, Arity::AtLeast(3)),
    spec("MGET", CommandKind::MGet, Arity::AtLeast(2)),
    spec("MSET", CommandKind::MSet, Arity::AtLeast(3)),
    spec("DEL", CommandKind::Del, Arity::AtLeast(2)),
    spec("EXISTS", CommandKind::Exists, Arity::AtLeast(2)),
    spec("EXPIRE", CommandKind::Expire, Arity::Exact(3)),
    spec("PEXPIRE", CommandKind::PExpire, Arity::Exact(3)),
    spec("TTL", CommandKind::Ttl, Arity::Exact(3)),
    spec("PTTL", CommandKind::PTtl, Arity::Exact(3)),
    spec("PING", CommandKind::Ping, Arity::Between(1, 2)),
    spec("QUIT", CommandKind::Quit, Arity::Exact(1)),
];

/// Case-insensitive command lookup.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    COMMAND_TABLE
        .iter()
        .find(|c| c.name.as_bytes().eq_ignore_ascii_case(name))
}

/// Validates commands and runs them against the configured store.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn KvStore>,
    ttl: TtlNormalizer,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn KvStore>, ttl: TtlNormalizer) -> Self {
        Dispatcher { store, ttl }
    }

    /// Run one parsed request and produce its reply. Never fails: every
    /// error becomes an error reply.
    pub async fn dispatch(&self, request: RespValue, client: &mut ClientState) -> RespValue {
        let items = match request {
            RespValue::Array(Some(items)) if !items.is_empty() => items,
            _ => return RespValue::error(ProxyError::InvalidFormat.to_string()),
        };
        let mut argv = Vec::with_capacity(items.len());
        for item in items {
            match item.into_bytes() {
                Some(arg) => argv.push(arg),
                None => return RespValue::error(ProxyError::InvalidFormat.to_string()),
            }
        }

        let Some(spec) = lookup(&argv[0]) else {
            return RespValue::error(unknown_command(&argv).to_string());
        };
        if !spec.arity.accepts(argv.len()) {
            return wrong_arg_count(spec.name);
        }
        client.commands_processed += 1;

        let args = &argv[1..];
        let store = self.store.as_ref();
        let result = match spec.kind {
            CommandKind::Get => string::cmd_get(args, store).await,
            CommandKind::Set => string::cmd_set(args, store, &self.ttl).await,
            CommandKind::MGet => string::cmd_mget(args, store).await,
            CommandKind::MSet => string::cmd_mset(args, store).await,
            CommandKind::Del => key::cmd_del(args, store).await,
            CommandKind::Exists => key::cmd_exists(args, store).await,
            CommandKind::Expire | CommandKind::Ttl => {
                key::cmd_expire(spec.name, args, store, &self.ttl, TtlUnit::Seconds).await
            }
            CommandKind::PExpire | CommandKind::PTtl => {
                key::cmd_expire(spec.name, args, store, &self.ttl, TtlUnit::Millis).await
            }
            CommandKind::Ping => Ok(server_cmd::cmd_ping(args)),
            CommandKind::Quit => Ok(server_cmd::cmd_quit(client)),
        };

        result.unwrap_or_else(|e| {
            debug!("{} from client {} failed: {e}", spec.name, client.id);
            RespValue::error(e.to_resp_error(spec.name))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlUnit {
    Seconds,
    Millis,
}

fn unknown_command(argv: &[Bytes]) -> ProxyError {
    let preview: Vec<String> = argv[1..]
        .iter()
        .take(3)
        .map(|a| format!("'{}'", String::from_utf8_lossy(a)))
        .collect();
    ProxyError::UnknownCommand(String::from_utf8_lossy(&argv[0]).into_owned(), preview.join(" "))
}

/// Parse an expiry argument: a non-negative integer.
pub fn parse_expiry_arg(cmd: &str, arg: &[u8]) -> ProxyResult<u64> {
    let n: i64 = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProxyError::NotInteger)?;
    u64::try_from(n).map_err(|_| ProxyError::InvalidExpire(cmd.to_ascii_lowercase()))
}

/// Return a wrong number of arguments error.
pub fn wrong_arg_count(cmd: &str) -> RespValue {
    RespValue::error(ProxyError::WrongArgCount(cmd.to_ascii_lowercase()).to_string())
}
