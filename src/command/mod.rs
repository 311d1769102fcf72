pub mod key;
pub mod server_cmd;
pub mod stream;
pub mod string;
pub mod transaction;

use crate::connection::ClientState;
use crate::error::{ReplisError, ReplisResult};
use crate::replication::master;
use crate::resp::RespValue;
use crate::server::Server;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// The future a command handler returns. Boxed so handlers can await
/// (blocking reads, WAIT, EXEC replays) behind a plain `fn` pointer.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Vec<RespValue>> + Send + 'a>>;

/// A command handler. Receives the arguments after the command name.
pub type Handler = for<'a> fn(&'a Server, &'a mut ClientState, Vec<String>) -> HandlerFuture<'a>;

#[derive(Clone, Copy)]
struct CommandSpec {
    handler: Handler,
    /// Word count including the command name; negative means "at least".
    arity: i32,
}

impl CommandSpec {
    fn accepts(&self, words: usize) -> bool {
        let words = words as i32;
        if self.arity >= 0 {
            words == self.arity
        } else {
            words >= -self.arity
        }
    }
}

/// Routes decoded requests to handlers and applies MULTI queuing.
pub struct Dispatcher {
    commands: HashMap<&'static str, CommandSpec>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let table: [(&'static str, Handler, i32); 18] = [
            // Connection
            ("ping", server_cmd::cmd_ping, -1),
            ("echo", server_cmd::cmd_echo, 2),
            // Server
            ("config", server_cmd::cmd_config, -2),
            ("info", server_cmd::cmd_info, -1),
            // Strings
            ("set", string::cmd_set, -3),
            ("get", string::cmd_get, 2),
            ("incr", string::cmd_incr, 2),
            // Keys
            ("keys", key::cmd_keys, 2),
            ("type", key::cmd_type, 2),
            // Streams
            ("xadd", stream::cmd_xadd, -5),
            ("xrange", stream::cmd_xrange, -4),
            ("xread", stream::cmd_xread, -4),
            // Transactions
            ("multi", transaction::cmd_multi, 1),
            ("exec", transaction::cmd_exec, 1),
            ("discard", transaction::cmd_discard, 1),
            // Replication
            ("replconf", master::cmd_replconf, -2),
            ("psync", master::cmd_psync, 3),
            ("wait", master::cmd_wait, 3),
        ];
        let commands = table
            .into_iter()
            .map(|(name, handler, arity)| (name, CommandSpec { handler, arity }))
            .collect();
        Dispatcher { commands }
    }

    /// Run one decoded request. Returns the lower-cased command name and
    /// the replies for the client.
    ///
    /// The name is empty whenever nothing was executed (malformed request
    /// or a command queued by MULTI), so callers never propagate it.
    pub async fn dispatch(
        &self,
        server: &Server,
        client: &mut ClientState,
        request: &RespValue,
    ) -> (String, Vec<RespValue>) {
        let items = match request {
            RespValue::Array(items) if !items.is_empty() => items,
            _ => return (String::new(), vec![RespValue::error("ERR invalid command format")]),
        };
        let raw_name = match &items[0] {
            RespValue::BulkString(name) => String::from_utf8_lossy(name).into_owned(),
            _ => return (String::new(), vec![RespValue::error("ERR invalid command name")]),
        };
        let name = raw_name.to_lowercase();
        let args: Vec<String> = items[1..].iter().map(arg_text).collect();

        if client.in_multi && !matches!(name.as_str(), "exec" | "discard" | "multi") {
            client.multi_queue.push(request.clone());
            return (String::new(), vec![RespValue::simple_string("QUEUED")]);
        }

        let Some(spec) = self.commands.get(name.as_str()).copied() else {
            let preview: Vec<String> = args.iter().take(3).map(|a| format!("'{a}'")).collect();
            let err = ReplisError::UnknownCommand(raw_name, preview.join(" "));
            return (name, vec![err.to_resp()]);
        };

        if !spec.accepts(items.len()) {
            return (name.clone(), vec![wrong_arg_count(&name)]);
        }

        let replies = (spec.handler)(server, client, args).await;
        (name, replies)
    }
}

/// Commands whose effects are forwarded to replicas.
pub fn is_write_command(name: &str) -> bool {
    matches!(name, "set" | "incr")
}

/// Text form of a request argument.
fn arg_text(arg: &RespValue) -> String {
    match arg {
        RespValue::Integer(n) => n.to_string(),
        other => other.to_string_lossy().unwrap_or_default(),
    }
}

/// Parse an integer argument.
pub fn parse_i64(arg: &str) -> ReplisResult<i64> {
    arg.parse().map_err(|_| ReplisError::NotInteger)
}

/// Parse a non-negative integer argument.
pub fn parse_u64(arg: &str) -> ReplisResult<u64> {
    arg.parse().map_err(|_| ReplisError::NotInteger)
}

/// One reply from a fallible handler body.
pub fn reply(result: ReplisResult<RespValue>) -> Vec<RespValue> {
    vec![result.unwrap_or_else(|e| e.to_resp())]
}

/// Return a wrong number of arguments error.
pub fn wrong_arg_count(cmd: &str) -> RespValue {
    ReplisError::WrongArgCount(cmd.to_string()).to_resp()
}
