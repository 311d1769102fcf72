use crate::command::HandlerFuture;
use crate::connection::ClientState;
use crate::resp::RespValue;
use crate::server::Server;

/// KEYS *. Glob patterns other than `*` are rejected.
pub fn cmd_keys<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        if args[0] != "*" {
            return vec![RespValue::error("ERR only the '*' pattern is supported")];
        }
        let mut keys = server.store.keys().await;
        keys.sort_unstable();
        vec![RespValue::array(
            keys.into_iter().map(RespValue::bulk_string).collect(),
        )]
    })
}

pub fn cmd_type<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        vec![RespValue::simple_string(server.store.type_of(&args[0]).await)]
    })
}
