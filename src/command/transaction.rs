use crate::command::HandlerFuture;
use crate::connection::ClientState;
use crate::resp::RespValue;
use crate::server::Server;
use std::future::ready;

pub fn cmd_multi<'a>(
    _server: &'a Server,
    client: &'a mut ClientState,
    _args: Vec<String>,
) -> HandlerFuture<'a> {
    let reply = if client.in_multi {
        RespValue::error("ERR MULTI calls can not be nested")
    } else {
        client.in_multi = true;
        client.multi_queue.clear();
        RespValue::ok()
    };
    Box::pin(ready(vec![reply]))
}

/// Run every queued command in order and reply with one array element per
/// command. Other connections may interleave between queued commands.
pub fn cmd_exec<'a>(
    server: &'a Server,
    client: &'a mut ClientState,
    _args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        if !client.in_multi {
            return vec![RespValue::error("ERR EXEC without MULTI")];
        }
        client.in_multi = false;

        let queue = std::mem::take(&mut client.multi_queue);
        let mut results = Vec::with_capacity(queue.len());
        for request in queue {
            let mut replies = server.execute(client, request).await;
            let result = if replies.len() == 1 {
                replies.remove(0)
            } else {
                RespValue::array(replies)
            };
            results.push(result);
        }
        vec![RespValue::array(results)]
    })
}

pub fn cmd_discard<'a>(
    _server: &'a Server,
    client: &'a mut ClientState,
    _args: Vec<String>,
) -> HandlerFuture<'a> {
    let reply = if client.in_multi {
        client.in_multi = false;
        client.multi_queue.clear();
        RespValue::ok()
    } else {
        RespValue::error("ERR DISCARD without MULTI")
    };
    Box::pin(ready(vec![reply]))
}
