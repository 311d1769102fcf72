use crate::error::{ReplisError, ReplisResult};
use crate::store::Store;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, info};

// RDB opcodes
const RDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const RDB_OPCODE_EXPIRETIME: u8 = 0xFD;
const RDB_OPCODE_SELECTDB: u8 = 0xFE;
const RDB_OPCODE_EOF: u8 = 0xFF;
const RDB_OPCODE_RESIZEDB: u8 = 0xFB;

const RDB_TYPE_STRING: u8 = 0;

const RDB_MAGIC: &[u8] = b"REDIS";
const RDB_VERSION: &[u8] = b"0011";

/// One string key recovered from (or written to) a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    pub key: String,
    pub value: String,
    /// Absolute expiry in milliseconds since UNIX epoch.
    pub expires_at: Option<u64>,
}

impl SnapshotKey {
    pub fn new(key: impl Into<String>, value: impl Into<String>, expires_at: Option<u64>) -> Self {
        SnapshotKey {
            key: key.into(),
            value: value.into(),
            expires_at,
        }
    }
}

/// Load `path` into `store`. A missing file leaves the store empty; every
/// other failure is returned. Returns the number of keys loaded.
pub async fn load_file(path: &Path, store: &Store) -> ReplisResult<usize> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no snapshot file, starting empty");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };
    let count = load_bytes(&bytes, store).await?;
    info!(path = %path.display(), keys = count, "snapshot loaded");
    Ok(count)
}

/// Parse a snapshot held in memory and insert its keys into `store`.
pub async fn load_bytes(bytes: &[u8], store: &Store) -> ReplisResult<usize> {
    let keys = parse(&mut &bytes[..])?;
    let count = keys.len();
    for k in keys {
        store.set_string(&k.key, k.value, k.expires_at).await;
    }
    Ok(count)
}

/// Parse a snapshot stream into its string keys, across all databases.
pub fn parse(r: &mut impl Read) -> ReplisResult<Vec<SnapshotKey>> {
    let magic: [u8; 5] = read_array(r)?;
    let version: [u8; 4] = read_array(r)?;
    if magic != *RDB_MAGIC || !version.iter().all(u8::is_ascii_digit) {
        return Err(ReplisError::Snapshot("invalid header".into()));
    }

    // Metadata is skipped byte by byte up to the first section marker.
    let mut marker = read_u8(r)?;
    while marker != RDB_OPCODE_SELECTDB && marker != RDB_OPCODE_EOF {
        marker = read_u8(r)?;
    }

    let mut keys = Vec::new();
    while marker == RDB_OPCODE_SELECTDB {
        let db = read_size(r)?;
        let resize = read_u8(r)?;
        if resize != RDB_OPCODE_RESIZEDB {
            return Err(ReplisError::Snapshot(format!(
                "expected hash table size marker, got 0x{resize:02X}"
            )));
        }
        let key_count = read_size(r)?;
        let _expires_count = read_size(r)?;
        debug!(db, key_count, "reading snapshot database");

        for _ in 0..key_count {
            keys.push(read_key_entry(r)?);
        }
        marker = read_u8(r)?;
    }

    if marker != RDB_OPCODE_EOF {
        return Err(ReplisError::Snapshot(format!(
            "unexpected opcode 0x{marker:02X}"
        )));
    }
    let _checksum: [u8; 8] = read_array(r)?;
    Ok(keys)
}

fn read_key_entry(r: &mut impl Read) -> ReplisResult<SnapshotKey> {
    let mut type_byte = read_u8(r)?;
    let mut expires_at = None;
    match type_byte {
        RDB_OPCODE_EXPIRETIME => {
            let secs = u32::from_le_bytes(read_array(r)?);
            expires_at = Some(u64::from(secs) * 1000);
            type_byte = read_u8(r)?;
        }
        RDB_OPCODE_EXPIRETIME_MS => {
            expires_at = Some(u64::from_le_bytes(read_array(r)?));
            type_byte = read_u8(r)?;
        }
        _ => {}
    }
    if type_byte != RDB_TYPE_STRING {
        return Err(ReplisError::Snapshot(format!(
            "unsupported value type 0x{type_byte:02X}"
        )));
    }
    let key = read_string(r)?;
    let value = read_string(r)?;
    Ok(SnapshotKey {
        key,
        value,
        expires_at,
    })
}

/// Decode a size-encoded integer. The top two bits of the first byte pick
/// a 6-bit, 14-bit or 4-byte big-endian form; `11` switches to a 1, 2 or
/// 4 byte little-endian length chosen by the low bits.
fn read_size(r: &mut impl Read) -> ReplisResult<u64> {
    let first = read_u8(r)?;
    match first >> 6 {
        0 => Ok(u64::from(first & 0x3F)),
        1 => {
            let next = read_u8(r)?;
            Ok((u64::from(first & 0x3F) << 8) | u64::from(next))
        }
        2 => Ok(u64::from(u32::from_be_bytes(read_array(r)?))),
        _ => match first & 0x3F {
            0 => Ok(u64::from(read_u8(r)?)),
            1 => Ok(u64::from(u16::from_le_bytes(read_array(r)?))),
            2 => Ok(u64::from(u32::from_le_bytes(read_array(r)?))),
            other => Err(ReplisError::Snapshot(format!(
                "unsupported string encoding {other}"
            ))),
        },
    }
}

fn read_string(r: &mut impl Read) -> ReplisResult<String> {
    let len = read_size(r)?;
    let mut buf = Vec::new();
    let read = r.take(len).read_to_end(&mut buf)?;
    if read as u64 != len {
        return Err(truncated());
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_u8(r: &mut impl Read) -> ReplisResult<u8> {
    let [b] = read_array(r)?;
    Ok(b)
}

fn read_array<const N: usize>(r: &mut impl Read) -> ReplisResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => truncated(),
        _ => ReplisError::Io(e),
    })?;
    Ok(buf)
}

fn truncated() -> ReplisError {
    ReplisError::Snapshot("unexpected end of file".into())
}

/// Write string keys in the snapshot format, as a single database.
pub fn write_snapshot(w: &mut impl Write, keys: &[SnapshotKey]) -> io::Result<()> {
    w.write_all(RDB_MAGIC)?;
    w.write_all(RDB_VERSION)?;

    if !keys.is_empty() {
        w.write_all(&[RDB_OPCODE_SELECTDB])?;
        write_size(w, 0)?;

        let expires = keys.iter().filter(|k| k.expires_at.is_some()).count();
        w.write_all(&[RDB_OPCODE_RESIZEDB])?;
        write_size(w, keys.len() as u64)?;
        write_size(w, expires as u64)?;

        for k in keys {
            if let Some(exp) = k.expires_at {
                w.write_all(&[RDB_OPCODE_EXPIRETIME_MS])?;
                w.write_all(&exp.to_le_bytes())?;
            }
            w.write_all(&[RDB_TYPE_STRING])?;
            write_string(w, k.key.as_bytes())?;
            write_string(w, k.value.as_bytes())?;
        }
    }

    // Checksum is not computed.
    w.write_all(&[RDB_OPCODE_EOF])?;
    w.write_all(&[0u8; 8])?;
    Ok(())
}

/// Snapshot of the live string keys in `store`, as bytes.
pub async fn snapshot_bytes(store: &Store) -> io::Result<Vec<u8>> {
    let keys: Vec<SnapshotKey> = store
        .snapshot_strings()
        .await
        .into_iter()
        .map(|(key, value, expires_at)| SnapshotKey {
            key,
            value,
            expires_at,
        })
        .collect();
    let mut buf = Vec::with_capacity(64);
    write_snapshot(&mut buf, &keys)?;
    Ok(buf)
}

fn write_size(w: &mut impl Write, len: u64) -> io::Result<()> {
    if len < 64 {
        w.write_all(&[len as u8])
    } else if len < 16384 {
        w.write_all(&[0x40 | (len >> 8) as u8, len as u8])
    } else {
        let len = u32::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length too large"))?;
        w.write_all(&[0x80])?;
        w.write_all(&len.to_be_bytes())
    }
}

fn write_string(w: &mut impl Write, data: &[u8]) -> io::Result<()> {
    write_size(w, data.len() as u64)?;
    w.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_of(bytes: &[u8]) -> u64 {
        read_size(&mut &bytes[..]).unwrap()
    }

    #[test]
    fn test_size_encodings() {
        assert_eq!(size_of(&[0x05]), 5);
        assert_eq!(size_of(&[0x5F, 0x5A]), 8026);
        assert_eq!(size_of(&[0xBF, 0x00, 0x04, 0x00, 0x01]), 262145);
        assert_eq!(size_of(&[0xC1, 0x10, 0x01]), 0x0110);
    }

    #[test]
    fn test_string_with_one_byte_length() {
        let mut data = vec![0xC0, 0x0D];
        data.extend_from_slice(b"Hello, World!");
        assert_eq!(read_string(&mut &data[..]).unwrap(), "Hello, World!");
    }

    #[test]
    fn test_parse_hand_built_file() {
        let mut data = b"REDIS0011".to_vec();
        // Metadata section: redis-ver aux field, skipped.
        data.extend_from_slice(&[0xFA, 0x09]);
        data.extend_from_slice(b"redis-ver");
        data.extend_from_slice(&[0x05]);
        data.extend_from_slice(b"7.2.0");
        data.extend_from_slice(&[0xFE, 0x00, 0xFB, 0x03, 0x02]);
        data.extend_from_slice(&[0x00, 0x03]);
        data.extend_from_slice(b"foo");
        data.extend_from_slice(&[0x03]);
        data.extend_from_slice(b"bar");
        data.push(0xFC);
        data.extend_from_slice(&1_713_824_559_637u64.to_le_bytes());
        data.extend_from_slice(&[0x00, 0x01]);
        data.extend_from_slice(b"a");
        data.extend_from_slice(&[0x01]);
        data.extend_from_slice(b"1");
        data.push(0xFD);
        data.extend_from_slice(&1_714_089_298u32.to_le_bytes());
        data.extend_from_slice(&[0x00, 0x01]);
        data.extend_from_slice(b"b");
        data.extend_from_slice(&[0x01]);
        data.extend_from_slice(b"2");
        data.push(0xFF);
        data.extend_from_slice(&[0xAB; 8]);

        let keys = parse(&mut &data[..]).unwrap();
        assert_eq!(
            keys,
            vec![
                SnapshotKey::new("foo", "bar", None),
                SnapshotKey::new("a", "1", Some(1_713_824_559_637)),
                SnapshotKey::new("b", "2", Some(1_714_089_298_000)),
            ]
        );
    }

    #[test]
    fn test_empty_database_is_valid() {
        let mut data = b"REDIS0011".to_vec();
        data.extend_from_slice(&[0xFE, 0x00, 0xFB, 0x00, 0x00, 0xFF]);
        data.extend_from_slice(&[0u8; 8]);
        assert!(parse(&mut &data[..]).unwrap().is_empty());

        let mut no_db = b"REDIS0003".to_vec();
        no_db.push(0xFF);
        no_db.extend_from_slice(&[0u8; 8]);
        assert!(parse(&mut &no_db[..]).unwrap().is_empty());
    }

    #[test]
    fn test_bad_header_is_error() {
        let data = b"RADIS0011\xFF\0\0\0\0\0\0\0\0";
        assert!(matches!(parse(&mut &data[..]), Err(ReplisError::Snapshot(_))));
        let data = b"REDIS00x1\xFF\0\0\0\0\0\0\0\0";
        assert!(parse(&mut &data[..]).is_err());
    }

    #[test]
    fn test_non_string_type_is_error() {
        let mut data = b"REDIS0011".to_vec();
        data.extend_from_slice(&[0xFE, 0x00, 0xFB, 0x01, 0x00, 0x01, 0x01, b'l', 0x00]);
        data.push(0xFF);
        data.extend_from_slice(&[0u8; 8]);
        assert!(matches!(parse(&mut &data[..]), Err(ReplisError::Snapshot(_))));
    }

    #[test]
    fn test_truncated_file_is_error() {
        let mut data = b"REDIS0011".to_vec();
        data.extend_from_slice(&[0xFE, 0x00, 0xFB, 0x01, 0x00, 0x00, 0x03, b'f']);
        assert!(matches!(parse(&mut &data[..]), Err(ReplisError::Snapshot(_))));
    }

    #[test]
    fn test_writer_output_parses_back() {
        let keys = vec![
            SnapshotKey::new("k", "v", None),
            SnapshotKey::new("long", "x".repeat(20_000), Some(99)),
        ];
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &keys).unwrap();
        assert_eq!(parse(&mut &buf[..]).unwrap(), keys);

        let mut empty = Vec::new();
        write_snapshot(&mut empty, &[]).unwrap();
        assert_eq!(empty.len(), 9 + 1 + 8);
        assert!(parse(&mut &empty[..]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_file_populates_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &[SnapshotKey::new("mango", "pear", None)]).unwrap();
        std::fs::write(&path, &buf).unwrap();

        let store = Store::new();
        assert_eq!(load_file(&path, &store).await.unwrap(), 1);
        assert_eq!(store.keys().await, vec!["mango".to_string()]);
        assert_eq!(store.get_string("mango").await.unwrap(), Some("pear".into()));
    }

    #[tokio::test]
    async fn test_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new();
        let loaded = load_file(&dir.path().join("absent.rdb"), &store).await.unwrap();
        assert_eq!(loaded, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(load_file(&path, &Store::new()).await.is_err());
    }
}
