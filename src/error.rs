use crate::resp::RespValue;

/// Errors surfaced by the store, the command layer and startup.
///
/// Variants that reach clients carry their exact wire text in `Display`.
#[derive(Debug, thiserror::Error)]
pub enum ReplisError {
    #[error("ERR {0}")]
    Generic(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR unknown command '{0}', with args beginning with: {1}")]
    UnknownCommand(String, String),

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdNotIncreasing,

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("replication handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReplisError {
    /// The RESP error value sent back to the client for this failure.
    pub fn to_resp(&self) -> RespValue {
        RespValue::error(self.to_string())
    }
}

pub type ReplisResult<T> = Result<T, ReplisError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::RespError;

    #[test]
    fn test_protocol_error_reply() {
        let err = ReplisError::Protocol(RespError::InvalidByte(b'?').to_string());
        assert_eq!(
            err.to_resp(),
            RespValue::error("ERR Protocol error: unexpected type byte '?'")
        );
        assert_eq!(
            ReplisError::WrongArgCount("get".into()).to_resp().serialize(),
            b"-ERR wrong number of arguments for 'get' command\r\n".to_vec()
        );
    }
}
