use crate::command::{HandlerFuture, parse_i64, reply};
use crate::connection::ClientState;
use crate::error::{ReplisError, ReplisResult};
use crate::resp::RespValue;
use crate::server::Server;

/// SET key value [PX milliseconds | EX seconds]
pub fn cmd_set<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move { reply(set(server, args).await) })
}

async fn set(server: &Server, args: Vec<String>) -> ReplisResult<RespValue> {
    let mut args = args.into_iter();
    let (Some(key), Some(value)) = (args.next(), args.next()) else {
        return Err(ReplisError::WrongArgCount("set".into()));
    };
    let ttl_ms = parse_set_options(&args.collect::<Vec<_>>())?;
    let expires_at = ttl_ms.map(|ms| server.store.now_millis().saturating_add(ms));
    server.store.set_string(&key, value, expires_at).await;
    Ok(RespValue::ok())
}

/// Returns the relative TTL in milliseconds, if one was given.
fn parse_set_options(opts: &[String]) -> ReplisResult<Option<u64>> {
    let mut ttl = None;
    let mut i = 0;
    while i < opts.len() {
        let unit = match opts[i].to_uppercase().as_str() {
            "PX" => 1,
            "EX" => 1000,
            _ => return Err(ReplisError::SyntaxError),
        };
        if ttl.is_some() {
            return Err(ReplisError::SyntaxError);
        }
        let amount = opts.get(i + 1).ok_or(ReplisError::SyntaxError)?;
        let amount = parse_i64(amount)?;
        if amount <= 0 {
            return Err(ReplisError::Generic(
                "invalid expire time in 'set' command".into(),
            ));
        }
        ttl = Some((amount as u64).saturating_mul(unit));
        i += 2;
    }
    Ok(ttl)
}

pub fn cmd_get<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        reply(
            server
                .store
                .get_string(&args[0])
                .await
                .map(|value| value.map_or(RespValue::Null, RespValue::bulk_string)),
        )
    })
}

pub fn cmd_incr<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move { reply(server.store.incr(&args[0]).await.map(RespValue::integer)) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_set_options() {
        assert_eq!(parse_set_options(&[]).unwrap(), None);
        assert_eq!(parse_set_options(&opts(&["px", "100"])).unwrap(), Some(100));
        assert_eq!(parse_set_options(&opts(&["EX", "2"])).unwrap(), Some(2000));
        assert!(matches!(
            parse_set_options(&opts(&["PX"])),
            Err(ReplisError::SyntaxError)
        ));
        assert!(matches!(
            parse_set_options(&opts(&["PX", "abc"])),
            Err(ReplisError::NotInteger)
        ));
        assert!(parse_set_options(&opts(&["PX", "0"])).is_err());
        assert!(parse_set_options(&opts(&["PX", "1", "EX", "1"])).is_err());
        assert!(parse_set_options(&opts(&["KEEPTTL"])).is_err());
    }
}
