use crate::error::{AppError, AppResult};

/// A Postgres WAL log sequence number, kept as a plain `u64` (the natural
/// representation: high 32 bits are the "file", low 32 bits the byte
/// offset within it) rather than the textual `X/Y` form Postgres prints.
pub type Lsn = u64;

pub fn parse_lsn(text: &str) -> AppResult<Lsn> {
    let (hi, lo) = text
        .split_once('/')
        .ok_or_else(|| AppError::Protocol(format!("malformed LSN: {text}")))?;

    let hi = u32::from_str_radix(hi, 16)
        .map_err(|e| AppError::Protocol(format!("malformed LSN high half '{hi}': {e}")))?;
    let lo = u32::from_str_radix(lo, 16)
        .map_err(|e| AppError::Protocol(format!("malformed LSN low half '{lo}': {e}")))?;

    Ok(((hi as u64) << 32) | lo as u64)
}

pub fn format_lsn(lsn: Lsn) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}

/// The outer envelope carried inside every `CopyData` message once a
/// replication stream is started: either a primary keepalive or a chunk of
/// WAL (`XLogData`), tagged by its first byte.
#[derive(Debug, Clone)]
pub enum ReplicationMessage {
    PrimaryKeepalive { end_lsn: Lsn, reply_requested: bool },
    XLogData { wal_start: Lsn, wal_end: Lsn, data: Vec<u8> },
}

const PRIMARY_KEEPALIVE_BYTE: u8 = b'k';
const XLOG_DATA_BYTE: u8 = b'w';

pub fn parse_copy_data(buf: &[u8]) -> AppResult<ReplicationMessage> {
    let (&tag, rest) = buf
        .split_first()
        .ok_or_else(|| AppError::Protocol("empty CopyData message".into()))?;

    match tag {
        PRIMARY_KEEPALIVE_BYTE => {
            if rest.len() < 17 {
                return Err(AppError::Protocol("truncated keepalive message".into()));
            }
            let end_lsn = u64::from_be_bytes(rest[0..8].try_into().unwrap());
            let reply_requested = rest[16] != 0;
            Ok(ReplicationMessage::PrimaryKeepalive {
                end_lsn,
                reply_requested,
            })
        }
        XLOG_DATA_BYTE => {
            if rest.len() < 16 {
                return Err(AppError::Protocol("truncated XLogData message".into()));
            }
            let wal_start = u64::from_be_bytes(rest[0..8].try_into().unwrap());
            let wal_end = u64::from_be_bytes(rest[8..16].try_into().unwrap());
            let data = rest[16..].to_vec();
            Ok(ReplicationMessage::XLogData {
                wal_start,
                wal_end,
                data,
            })
        }
        other => Err(AppError::Protocol(format!(
            "unknown CopyData message tag: {other}"
        ))),
    }
}

/// Builds a standby status update ('r') message: tells the primary how far
/// we've written/flushed/applied, which is what lets it advance
/// `confirmed_flush_lsn` for the slot.
pub fn encode_standby_status_update(write_lsn: Lsn, flush_lsn: Lsn, apply_lsn: Lsn) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 * 3 + 8 + 1);
    buf.push(b'r');
    buf.extend_from_slice(&write_lsn.to_be_bytes());
    buf.extend_from_slice(&flush_lsn.to_be_bytes());
    buf.extend_from_slice(&apply_lsn.to_be_bytes());
    // client timestamp in microseconds since the Postgres epoch (2000-01-01);
    // zero is accepted by the server and only used for monitoring.
    buf.extend_from_slice(&0i64.to_be_bytes());
    buf.push(0); // reply not requested
    buf
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub type_oid: u32,
}

// A handful of well-known Postgres type OIDs this listener needs to decode
// `pgoutput`'s text-format tuple data (spec.md §4.5: "decode using the type
// map for the column's OID, falling back to raw string").
const OID_BYTEA: u32 = 17;
const OID_INT4: u32 = 23;
const OID_INT8: u32 = 20;
const OID_TIMESTAMPTZ: u32 = 1184;

/// A tuple column decoded according to its Postgres type OID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Null,
    Bytes(Vec<u8>),
    Int(i64),
    Text(String),
}

/// Decodes one `pgoutput` text-format column value by its type OID.
/// `pgoutput` always sends column values as their textual representation,
/// never raw binary, so every branch here parses ASCII text.
pub fn decode_column(type_oid: u32, raw: &[u8]) -> AppResult<ColumnValue> {
    match type_oid {
        OID_BYTEA => {
            // Postgres's text format for bytea is `\x` followed by hex pairs.
            let text = std::str::from_utf8(raw)
                .map_err(|e| AppError::Protocol(format!("non-utf8 bytea column: {e}")))?;
            let hex = text
                .strip_prefix("\\x")
                .ok_or_else(|| AppError::Protocol(format!("malformed bytea text value: {text}")))?;
            let mut bytes = Vec::with_capacity(hex.len() / 2);
            let mut chars = hex.chars();
            while let (Some(hi), Some(lo)) = (chars.next(), chars.next()) {
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16)
                    .map_err(|e| AppError::Protocol(format!("malformed bytea hex digit: {e}")))?;
                bytes.push(byte);
            }
            Ok(ColumnValue::Bytes(bytes))
        }
        OID_INT4 | OID_INT8 => {
            let text = std::str::from_utf8(raw)
                .map_err(|e| AppError::Protocol(format!("non-utf8 integer column: {e}")))?;
            let value = text
                .parse::<i64>()
                .map_err(|e| AppError::Protocol(format!("malformed integer column '{text}': {e}")))?;
            Ok(ColumnValue::Int(value))
        }
        OID_TIMESTAMPTZ => {
            // Fall back to raw text: parsing Postgres's timestamptz text
            // format precisely is the caller's business if it needs it; the
            // listener only ever reads `insert_time` for observability.
            let text = String::from_utf8(raw.to_vec())
                .map_err(|e| AppError::Protocol(format!("non-utf8 timestamp column: {e}")))?;
            Ok(ColumnValue::Text(text))
        }
        _ => {
            let text = String::from_utf8(raw.to_vec())
                .map_err(|e| AppError::Protocol(format!("non-utf8 column: {e}")))?;
            Ok(ColumnValue::Text(text))
        }
    }
}

/// A decoded `pgoutput` logical-replication message. Only the message types
/// this crate needs to act on are broken out; everything else collapses
/// into `Other`.
#[derive(Debug, Clone)]
pub enum PgOutputMessage {
    Begin,
    Commit,
    Relation {
        id: u32,
        namespace: String,
        name: String,
        columns: Vec<ColumnInfo>,
    },
    Insert {
        relation_id: u32,
        values: Vec<Option<Vec<u8>>>,
    },
    Other,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> AppResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| AppError::Protocol("unexpected end of pgoutput message".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> AppResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn u32(&mut self) -> AppResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn take(&mut self, n: usize) -> AppResult<&'a [u8]> {
        if self.buf.len() < self.pos + n {
            return Err(AppError::Protocol("unexpected end of pgoutput message".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn cstring(&mut self) -> AppResult<String> {
        let start = self.pos;
        while *self
            .buf
            .get(self.pos)
            .ok_or_else(|| AppError::Protocol("unterminated string in pgoutput message".into()))?
            != 0
        {
            self.pos += 1;
        }
        let s = String::from_utf8(self.buf[start..self.pos].to_vec())
            .map_err(|e| AppError::Protocol(format!("invalid utf-8 in pgoutput message: {e}")))?;
        self.pos += 1; // skip NUL
        Ok(s)
    }
}

/// Parses one `pgoutput` message (the payload of an `XLogData` chunk once
/// `proto_version '1'` is negotiated). Only `Relation` and `Insert` carry
/// data this crate acts on; `Update`/`Delete`/`Truncate`/`Type` are folded
/// into `Other` since the egress table is append-only from this listener's
/// point of view.
pub fn parse_pgoutput_message(buf: &[u8]) -> AppResult<PgOutputMessage> {
    let mut cur = Cursor::new(buf);
    let tag = cur.u8()?;

    match tag {
        b'B' => Ok(PgOutputMessage::Begin),
        b'C' => Ok(PgOutputMessage::Commit),
        b'R' => {
            let id = cur.u32()?;
            let namespace = cur.cstring()?;
            let name = cur.cstring()?;
            let _replica_identity = cur.u8()?;
            let n_columns = cur.u16()?;

            let mut columns = Vec::with_capacity(n_columns as usize);
            for _ in 0..n_columns {
                let _flags = cur.u8()?;
                let col_name = cur.cstring()?;
                let type_oid = cur.u32()?;
                let _type_modifier = cur.u32()?;
                columns.push(ColumnInfo {
                    name: col_name,
                    type_oid,
                });
            }

            Ok(PgOutputMessage::Relation {
                id,
                namespace,
                name,
                columns,
            })
        }
        b'I' => {
            let relation_id = cur.u32()?;
            let tuple_tag = cur.u8()?;
            if tuple_tag != b'N' {
                return Err(AppError::Protocol(format!(
                    "unexpected tuple tag in Insert message: {tuple_tag}"
                )));
            }
            let values = parse_tuple_data(&mut cur)?;
            Ok(PgOutputMessage::Insert {
                relation_id,
                values,
            })
        }
        _ => Ok(PgOutputMessage::Other),
    }
}

fn parse_tuple_data(cur: &mut Cursor<'_>) -> AppResult<Vec<Option<Vec<u8>>>> {
    let n_columns = cur.u16()?;
    let mut values = Vec::with_capacity(n_columns as usize);

    for _ in 0..n_columns {
        let kind = cur.u8()?;
        match kind {
            b'n' => values.push(None),
            b'u' => values.push(None), // TOASTed and unchanged; not needed here
            b't' => {
                let len = cur.u32()?;
                let bytes = cur.take(len as usize)?.to_vec();
                values.push(Some(bytes));
            }
            other => {
                return Err(AppError::Protocol(format!(
                    "unknown tuple column kind: {other}"
                )))
            }
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_round_trips_through_text_form() {
        let lsn = parse_lsn("16/B374D848").unwrap();
        assert_eq!(format_lsn(lsn), "16/B374D848");
    }

    #[test]
    fn rejects_malformed_lsn_text() {
        assert!(parse_lsn("not-an-lsn").is_err());
    }

    #[test]
    fn parses_keepalive_envelope() {
        let mut buf = vec![b'k'];
        buf.extend_from_slice(&42u64.to_be_bytes());
        buf.extend_from_slice(&0i64.to_be_bytes());
        buf.push(1);

        match parse_copy_data(&buf).unwrap() {
            ReplicationMessage::PrimaryKeepalive {
                end_lsn,
                reply_requested,
            } => {
                assert_eq!(end_lsn, 42);
                assert!(reply_requested);
            }
            other => panic!("expected keepalive, got {other:?}"),
        }
    }

    #[test]
    fn parses_xlogdata_envelope() {
        let mut buf = vec![b'w'];
        buf.extend_from_slice(&10u64.to_be_bytes());
        buf.extend_from_slice(&20u64.to_be_bytes());
        buf.extend_from_slice(b"BEGIN");

        match parse_copy_data(&buf).unwrap() {
            ReplicationMessage::XLogData {
                wal_start,
                wal_end,
                data,
            } => {
                assert_eq!(wal_start, 10);
                assert_eq!(wal_end, 20);
                assert_eq!(data, b"BEGIN");
            }
            other => panic!("expected XLogData, got {other:?}"),
        }
    }

    #[test]
    fn parses_relation_message() {
        let mut buf = vec![b'R'];
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.extend_from_slice(b"public\0");
        buf.extend_from_slice(b"egress_outbox\0");
        buf.push(b'd');
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.push(1);
        buf.extend_from_slice(b"batch_id\0");
        buf.extend_from_slice(&25u32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());

        match parse_pgoutput_message(&buf).unwrap() {
            PgOutputMessage::Relation {
                id,
                namespace,
                name,
                columns,
            } => {
                assert_eq!(id, 7);
                assert_eq!(namespace, "public");
                assert_eq!(name, "egress_outbox");
                assert_eq!(columns.len(), 1);
                assert_eq!(columns[0].name, "batch_id");
                assert_eq!(columns[0].type_oid, 25);
            }
            other => panic!("expected Relation, got {other:?}"),
        }
    }

    #[test]
    fn decodes_bytea_text_format() {
        let value = decode_column(OID_BYTEA, b"\\x0102ff").unwrap();
        assert_eq!(value, ColumnValue::Bytes(vec![0x01, 0x02, 0xff]));
    }

    #[test]
    fn decodes_int4_column() {
        let value = decode_column(OID_INT4, b"42").unwrap();
        assert_eq!(value, ColumnValue::Int(42));
    }

    #[test]
    fn unknown_oid_falls_back_to_raw_text() {
        let value = decode_column(999, b"hello").unwrap();
        assert_eq!(value, ColumnValue::Text("hello".into()));
    }

    #[test]
    fn parses_insert_message_with_text_and_null_columns() {
        let mut buf = vec![b'I'];
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.push(b'N');
        buf.extend_from_slice(&2u16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&9u32.to_be_bytes());
        buf.extend_from_slice(b"batch-123");
        buf.push(b'n');

        match parse_pgoutput_message(&buf).unwrap() {
            PgOutputMessage::Insert {
                relation_id,
                values,
            } => {
                assert_eq!(relation_id, 7);
                assert_eq!(values.len(), 2);
                assert_eq!(values[0].as_deref(), Some(b"batch-123".as_slice()));
                assert_eq!(values[1], None);
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }
}
