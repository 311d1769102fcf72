use crate::command::HandlerFuture;
use crate::connection::ClientState;
use crate::resp::RespValue;
use crate::server::Server;
use std::future::ready;

pub fn cmd_ping<'a>(
    _server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    let reply = match args.into_iter().next() {
        Some(msg) => RespValue::bulk_string(msg),
        None => RespValue::simple_string("PONG"),
    };
    Box::pin(ready(vec![reply]))
}

pub fn cmd_echo<'a>(
    _server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    let msg = args.into_iter().next().unwrap_or_default();
    Box::pin(ready(vec![RespValue::bulk_string(msg)]))
}

/// CONFIG GET <name> [<name> ...]
pub fn cmd_config<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    let reply = match args.split_first() {
        Some((sub, names)) if sub.eq_ignore_ascii_case("get") && !names.is_empty() => {
            let mut pairs = Vec::with_capacity(names.len() * 2);
            for name in names {
                if let Some(value) = server.config.get(name) {
                    pairs.push(RespValue::bulk_string(name.to_lowercase()));
                    pairs.push(RespValue::bulk_string(value));
                }
            }
            RespValue::array(pairs)
        }
        Some((sub, [])) if sub.eq_ignore_ascii_case("get") => {
            RespValue::error("ERR wrong number of arguments for 'config|get' command")
        }
        Some((sub, _)) => RespValue::error(format!(
            "ERR unknown subcommand '{sub}'. Try CONFIG HELP."
        )),
        None => RespValue::error("ERR wrong number of arguments for 'config' command"),
    };
    Box::pin(ready(vec![reply]))
}

/// INFO [section]. Only the replication section exists.
pub fn cmd_info<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let section = args.first().map(|s| s.to_lowercase());
        let wanted = matches!(
            section.as_deref(),
            None | Some("replication") | Some("all") | Some("default") | Some("everything")
        );
        if !wanted {
            return vec![RespValue::bulk_string("")];
        }

        let repl = &server.replication;
        let mut info = String::new();
        info.push_str("# Replication\r\n");
        info.push_str(&format!("role:{}\r\n", repl.role()));
        info.push_str(&format!("connected_slaves:{}\r\n", repl.replica_count().await));
        info.push_str(&format!("master_replid:{}\r\n", repl.replid()));
        info.push_str(&format!("master_repl_offset:{}\r\n", repl.offset()));
        vec![RespValue::bulk_string(info)]
    })
}
