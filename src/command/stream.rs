use crate::command::{HandlerFuture, parse_u64, reply};
use crate::connection::ClientState;
use crate::error::{ReplisError, ReplisResult};
use crate::resp::RespValue;
use crate::server::Server;
use crate::types::stream::{Fields, IdSpec, StreamId};
use std::time::Duration;
use tokio::time::Instant;

fn entry_to_resp(id: StreamId, fields: Fields) -> RespValue {
    let mut field_values = Vec::with_capacity(fields.len() * 2);
    for (f, v) in fields {
        field_values.push(RespValue::bulk_string(f));
        field_values.push(RespValue::bulk_string(v));
    }
    RespValue::array(vec![
        RespValue::bulk_string(id.to_string()),
        RespValue::array(field_values),
    ])
}

fn entries_to_resp(entries: Vec<(StreamId, Fields)>) -> RespValue {
    RespValue::array(
        entries
            .into_iter()
            .map(|(id, fields)| entry_to_resp(id, fields))
            .collect(),
    )
}

/// XADD key <id | ms-* | *> field value [field value ...]
pub fn cmd_xadd<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move { reply(xadd(server, args).await) })
}

async fn xadd(server: &Server, args: Vec<String>) -> ReplisResult<RespValue> {
    let mut args = args.into_iter();
    let key = args.next().unwrap_or_default();
    let spec = IdSpec::parse(&args.next().unwrap_or_default())?;
    let rest: Vec<String> = args.collect();
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(ReplisError::WrongArgCount("xadd".into()));
    }
    let mut fields = Vec::with_capacity(rest.len() / 2);
    let mut pairs = rest.into_iter();
    while let (Some(f), Some(v)) = (pairs.next(), pairs.next()) {
        fields.push((f, v));
    }

    let id = server.store.xadd(&key, spec, fields).await?;
    Ok(RespValue::bulk_string(id.to_string()))
}

/// XRANGE key start end [COUNT n]
pub fn cmd_xrange<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move { reply(xrange(server, args).await) })
}

async fn xrange(server: &Server, args: Vec<String>) -> ReplisResult<RespValue> {
    let start = StreamId::parse_range_bound(&args[1], true)?;
    let end = StreamId::parse_range_bound(&args[2], false)?;
    let count = match &args[3..] {
        [] => None,
        [opt, n] if opt.eq_ignore_ascii_case("count") => Some(parse_u64(n)? as usize),
        _ => return Err(ReplisError::SyntaxError),
    };
    let entries = server.store.xrange(&args[0], start, end, count).await?;
    Ok(entries_to_resp(entries))
}

#[derive(Debug, PartialEq, Eq)]
struct XreadRequest {
    count: Option<usize>,
    /// `None` for a non-blocking read, `Some(0)` to wait without a deadline.
    block_ms: Option<u64>,
    keys: Vec<String>,
    ids: Vec<String>,
}

impl XreadRequest {
    fn parse(args: Vec<String>) -> ReplisResult<Self> {
        let mut count = None;
        let mut block_ms = None;
        let mut i = 0;
        loop {
            let Some(opt) = args.get(i) else {
                return Err(ReplisError::SyntaxError);
            };
            match opt.to_lowercase().as_str() {
                "streams" => {
                    i += 1;
                    break;
                }
                "count" => {
                    let n = args.get(i + 1).ok_or(ReplisError::SyntaxError)?;
                    count = Some(parse_u64(n)? as usize);
                }
                "block" => {
                    let ms = args.get(i + 1).ok_or(ReplisError::SyntaxError)?;
                    block_ms = Some(
                        parse_u64(ms)
                            .map_err(|_| ReplisError::Generic("timeout is not an integer or out of range".into()))?,
                    );
                }
                _ => return Err(ReplisError::SyntaxError),
            }
            i += 2;
        }

        let rest = &args[i..];
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(ReplisError::Generic(
                "Unbalanced 'xread' list of streams: for each stream key an ID or '$' must be specified.".into(),
            ));
        }
        let (keys, ids) = rest.split_at(rest.len() / 2);
        Ok(XreadRequest {
            count,
            block_ms,
            keys: keys.to_vec(),
            ids: ids.to_vec(),
        })
    }
}

/// XREAD [COUNT n] [BLOCK ms] STREAMS key [key ...] id [id ...]
///
/// Ids are exclusive lower bounds; `$` means "only entries added from now".
pub fn cmd_xread<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move { reply(xread(server, args).await) })
}

async fn xread(server: &Server, args: Vec<String>) -> ReplisResult<RespValue> {
    let req = XreadRequest::parse(args)?;

    // Subscribe before resolving ids so no insert can fall between the
    // initial query and the wait.
    let mut subscription = req
        .block_ms
        .map(|_| server.store.watcher().subscribe(&req.keys));

    let mut starts = Vec::with_capacity(req.ids.len());
    for (key, id) in req.keys.iter().zip(&req.ids) {
        let start = if id == "$" {
            server.store.stream_last_id(key).await?
        } else {
            StreamId::parse(id, 0).ok_or(ReplisError::InvalidStreamId)?
        };
        starts.push(start);
    }

    let found = collect_new_entries(server, &req, &starts).await?;
    if !found.is_empty() {
        return Ok(RespValue::array(found));
    }
    let (Some(block_ms), Some(subscription)) = (req.block_ms, subscription.as_mut()) else {
        return Ok(RespValue::Null);
    };

    let deadline = (block_ms > 0).then(|| Instant::now() + Duration::from_millis(block_ms));
    loop {
        let event = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, subscription.recv()).await {
                Ok(event) => event,
                Err(_) => return Ok(RespValue::Null),
            },
            None => subscription.recv().await,
        };
        let Some(event) = event else {
            return Ok(RespValue::Null);
        };
        let newer = req
            .keys
            .iter()
            .zip(&starts)
            .any(|(key, start)| *key == event.key && event.id > *start);
        if !newer {
            continue;
        }
        let found = collect_new_entries(server, &req, &starts).await?;
        if !found.is_empty() {
            return Ok(RespValue::array(found));
        }
    }
}

/// `[key, entries]` pairs for every requested stream with entries past its start.
async fn collect_new_entries(
    server: &Server,
    req: &XreadRequest,
    starts: &[StreamId],
) -> ReplisResult<Vec<RespValue>> {
    let mut found = Vec::new();
    for (key, start) in req.keys.iter().zip(starts) {
        let entries = server.store.xread_after(key, *start, req.count).await?;
        if !entries.is_empty() {
            found.push(RespValue::array(vec![
                RespValue::bulk_string(key.as_str()),
                entries_to_resp(entries),
            ]));
        }
    }
    Ok(found)
}
