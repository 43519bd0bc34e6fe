//! Binary log and snapshot codec.
//!
//! Two decoding styles share the varint/timestamp primitives in this
//! module, keeping encode/decode logic for one concern colocated rather
//! than split across crates:
//!
//! - The plain decoders ([`read_log_header`], [`read_snapshot_header`],
//!   [`decode_varint`], [`decode_timestamp`]) are used by runtime readers
//!   that only need a pass/fail answer.
//! - The offset-tracking parsers ([`parse_log_fields`],
//!   [`parse_snapshot_fields`]) never fail upward — they embed errors as
//!   values in their output — and back the `notecove-inspect` binary.

pub const LOG_MAGIC: [u8; 4] = *b"NCLG";
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"NCSN";
pub const FORMAT_VERSION: u8 = 1;
pub const LOG_HEADER_SIZE: usize = 5;
pub const SNAPSHOT_HEADER_SIZE: usize = 6;
const SNAPSHOT_STATUS_COMPLETE: u8 = 0x01;

/// Result of validating a log file's fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeaderCheck {
    pub valid: bool,
    pub error: Option<String>,
}

/// Validate the magic and version of a log header, consuming exactly
/// [`LOG_HEADER_SIZE`] bytes.
pub fn read_log_header(buf: &[u8]) -> LogHeaderCheck {
    if buf.len() < LOG_HEADER_SIZE {
        return LogHeaderCheck {
            valid: false,
            error: Some(format!(
                "Truncated header: expected at least {LOG_HEADER_SIZE} bytes"
            )),
        };
    }
    if buf[0..4] != LOG_MAGIC {
        return LogHeaderCheck {
            valid: false,
            error: Some("bad magic".to_string()),
        };
    }
    if buf[4] != FORMAT_VERSION {
        return LogHeaderCheck {
            valid: false,
            error: Some(format!("unsupported version {}", buf[4])),
        };
    }
    LogHeaderCheck {
        valid: true,
        error: None,
    }
}

/// Result of validating a snapshot file's fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeaderCheck {
    pub valid: bool,
    pub complete: bool,
    pub error: Option<String>,
}

/// Validate the magic, version, and status of a snapshot header,
/// consuming exactly [`SNAPSHOT_HEADER_SIZE`] bytes.
pub fn read_snapshot_header(buf: &[u8]) -> SnapshotHeaderCheck {
    if buf.len() < SNAPSHOT_HEADER_SIZE {
        return SnapshotHeaderCheck {
            valid: false,
            complete: false,
            error: Some(format!(
                "Truncated header: expected at least {SNAPSHOT_HEADER_SIZE} bytes"
            )),
        };
    }
    if buf[0..4] != SNAPSHOT_MAGIC {
        return SnapshotHeaderCheck {
            valid: false,
            complete: false,
            error: Some("bad magic".to_string()),
        };
    }
    if buf[4] != FORMAT_VERSION {
        return SnapshotHeaderCheck {
            valid: false,
            complete: false,
            error: Some(format!("unsupported version {}", buf[4])),
        };
    }
    SnapshotHeaderCheck {
        valid: true,
        complete: buf[5] == SNAPSHOT_STATUS_COMPLETE,
        error: None,
    }
}

/// A decoded unsigned LEB128 varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarintResult {
    pub value: u64,
    pub bytes_read: usize,
}

/// Decode an unsigned, little-endian, 7-bit-group varint starting at
/// `offset`. Fails if the buffer ends mid-varint or the value overflows a
/// `u64`.
pub fn decode_varint(buf: &[u8], offset: usize) -> Result<VarintResult, String> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    let mut pos = offset;
    loop {
        let byte = *buf
            .get(pos)
            .ok_or_else(|| format!("truncated varint at offset {offset}"))?;
        let low7 = (byte & 0x7F) as u64;
        if shift >= 64 || (shift == 63 && low7 > 1) {
            return Err(format!("varint overflow at offset {offset}"));
        }
        value |= low7 << shift;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(VarintResult {
        value,
        bytes_read: pos - offset,
    })
}

/// Decode a big-endian 8-byte unsigned timestamp starting at `offset`.
/// Returns `None` if fewer than 8 bytes remain.
pub fn decode_timestamp(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset + 8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Some(u64::from_be_bytes(arr))
}

/// Tag identifying what a [`Field`] represents, for the inspector's
/// offset-annotated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Magic,
    Version,
    Status,
    Timestamp,
    Sequence,
    Length,
    Data,
    VectorClock,
    Error,
    Termination,
}

/// A field's decoded value, kept loosely typed so the inspector can render
/// any of them uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    UInt(u64),
    Bytes(Vec<u8>),
    Text(String),
    None,
}

/// One annotated field in an offset-tracking parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    pub start_offset: usize,
    pub end_offset: usize,
    pub field_type: FieldType,
}

impl Field {
    fn new(
        name: &str,
        value: FieldValue,
        start_offset: usize,
        end_offset: usize,
        field_type: FieldType,
    ) -> Self {
        Field {
            name: name.to_string(),
            value,
            start_offset,
            end_offset,
            field_type,
        }
    }
}

/// One fully decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: u64,
    pub sequence: u64,
    pub data: Vec<u8>,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Result of an offset-tracking log parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogParseResult {
    pub fields: Vec<Field>,
    pub records: Vec<LogRecord>,
    pub error: Option<String>,
}

/// Parse a log file byte-for-byte, annotating every field with its byte
/// range. Never panics or returns `Err`: truncation and framing problems
/// are reported as an `Error` field plus the top-level `error` string,
/// alongside every record successfully parsed before the problem.
pub fn parse_log_fields(buf: &[u8]) -> LogParseResult {
    let mut fields = Vec::new();
    let mut records = Vec::new();

    let header = read_log_header(buf);
    if buf.len() < LOG_HEADER_SIZE {
        let msg = header.error.unwrap();
        fields.push(Field::new(
            "error",
            FieldValue::Text(msg.clone()),
            0,
            buf.len(),
            FieldType::Error,
        ));
        return LogParseResult {
            fields,
            records,
            error: Some(msg),
        };
    }

    fields.push(Field::new(
        "magic",
        FieldValue::Bytes(buf[0..4].to_vec()),
        0,
        4,
        FieldType::Magic,
    ));
    fields.push(Field::new(
        "version",
        FieldValue::UInt(buf[4] as u64),
        4,
        LOG_HEADER_SIZE,
        FieldType::Version,
    ));
    if !header.valid {
        let msg = header.error.unwrap();
        fields.push(Field::new(
            "error",
            FieldValue::Text(msg.clone()),
            0,
            LOG_HEADER_SIZE,
            FieldType::Error,
        ));
        return LogParseResult {
            fields,
            records,
            error: Some(msg),
        };
    }

    let mut offset = LOG_HEADER_SIZE;
    loop {
        let length_start = offset;
        let length = match decode_varint(buf, offset) {
            Ok(v) => v,
            Err(reason) => {
                let msg = format!("truncated length varint at offset {offset}: {reason}");
                fields.push(Field::new(
                    "error",
                    FieldValue::Text(msg.clone()),
                    length_start,
                    buf.len(),
                    FieldType::Error,
                ));
                return LogParseResult {
                    fields,
                    records,
                    error: Some(msg),
                };
            }
        };
        let length_end = offset + length.bytes_read;
        fields.push(Field::new(
            "length",
            FieldValue::UInt(length.value),
            length_start,
            length_end,
            FieldType::Length,
        ));
        offset = length_end;

        if length.value == 0 {
            fields.push(Field::new(
                "termination",
                FieldValue::None,
                length_start,
                length_end,
                FieldType::Termination,
            ));
            break;
        }

        let payload_length = length.value as usize;
        let payload_start = offset;
        let payload_end = payload_start + payload_length;
        if payload_end > buf.len() {
            let missing = payload_end - buf.len();
            let msg = format!(
                "truncated record payload at offset {payload_start}: missing {missing} bytes"
            );
            fields.push(Field::new(
                "error",
                FieldValue::Text(msg.clone()),
                payload_start,
                buf.len(),
                FieldType::Error,
            ));
            return LogParseResult {
                fields,
                records,
                error: Some(msg),
            };
        }

        let ts_start = payload_start;
        let timestamp = match decode_timestamp(buf, ts_start) {
            Some(t) => t,
            None => {
                let msg = format!("truncated timestamp at offset {ts_start}");
                fields.push(Field::new(
                    "error",
                    FieldValue::Text(msg.clone()),
                    ts_start,
                    buf.len(),
                    FieldType::Error,
                ));
                return LogParseResult {
                    fields,
                    records,
                    error: Some(msg),
                };
            }
        };
        let ts_end = ts_start + 8;
        fields.push(Field::new(
            "timestamp",
            FieldValue::UInt(timestamp),
            ts_start,
            ts_end,
            FieldType::Timestamp,
        ));

        let seq_start = ts_end;
        let sequence = match decode_varint(buf, seq_start) {
            Ok(v) => v,
            Err(reason) => {
                let msg = format!("truncated sequence varint at offset {seq_start}: {reason}");
                fields.push(Field::new(
                    "error",
                    FieldValue::Text(msg.clone()),
                    seq_start,
                    buf.len(),
                    FieldType::Error,
                ));
                return LogParseResult {
                    fields,
                    records,
                    error: Some(msg),
                };
            }
        };
        let seq_end = seq_start + sequence.bytes_read;
        fields.push(Field::new(
            "sequence",
            FieldValue::UInt(sequence.value),
            seq_start,
            seq_end,
            FieldType::Sequence,
        ));

        // Open question (see DESIGN.md): a payloadLength too small to cover
        // the timestamp and sequence varint implies a negative data length.
        // Treated as a format error rather than guessed at.
        if seq_end > payload_end {
            let msg = format!(
                "negative data length at offset {payload_start}: payloadLength {payload_length} too small for timestamp+sequence"
            );
            fields.push(Field::new(
                "error",
                FieldValue::Text(msg.clone()),
                payload_start,
                payload_end,
                FieldType::Error,
            ));
            return LogParseResult {
                fields,
                records,
                error: Some(msg),
            };
        }

        let data_start = seq_end;
        let data = buf[data_start..payload_end].to_vec();
        fields.push(Field::new(
            "data",
            FieldValue::Bytes(data.clone()),
            data_start,
            payload_end,
            FieldType::Data,
        ));

        records.push(LogRecord {
            timestamp,
            sequence: sequence.value,
            data,
            start_offset: length_start,
            end_offset: payload_end,
        });

        offset = payload_end;
    }

    LogParseResult {
        fields,
        records,
        error: None,
    }
}

/// One vector-clock entry from a snapshot header (§3 "Vector clock
/// entry").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorClockEntry {
    pub instance_id: String,
    pub sequence: u64,
    pub offset: u64,
    pub filename: String,
}

/// Result of an offset-tracking snapshot parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotParseResult {
    pub fields: Vec<Field>,
    pub complete: bool,
    pub vector_clock: Vec<VectorClockEntry>,
    pub document_state: Vec<u8>,
    pub error: Option<String>,
}

/// Parse a snapshot file byte-for-byte, annotating every field with its
/// byte range. Same never-fails-upward contract as [`parse_log_fields`].
pub fn parse_snapshot_fields(buf: &[u8]) -> SnapshotParseResult {
    let mut fields = Vec::new();

    if buf.len() < SNAPSHOT_HEADER_SIZE {
        let msg = format!("Truncated header: expected at least {SNAPSHOT_HEADER_SIZE} bytes");
        fields.push(Field::new(
            "error",
            FieldValue::Text(msg.clone()),
            0,
            buf.len(),
            FieldType::Error,
        ));
        return SnapshotParseResult {
            fields,
            complete: false,
            vector_clock: Vec::new(),
            document_state: Vec::new(),
            error: Some(msg),
        };
    }

    let header = read_snapshot_header(buf);
    fields.push(Field::new(
        "magic",
        FieldValue::Bytes(buf[0..4].to_vec()),
        0,
        4,
        FieldType::Magic,
    ));
    fields.push(Field::new(
        "version",
        FieldValue::UInt(buf[4] as u64),
        4,
        5,
        FieldType::Version,
    ));
    fields.push(Field::new(
        "status",
        FieldValue::UInt(buf[5] as u64),
        5,
        SNAPSHOT_HEADER_SIZE,
        FieldType::Status,
    ));

    if !header.valid {
        let msg = header.error.unwrap();
        fields.push(Field::new(
            "error",
            FieldValue::Text(msg.clone()),
            0,
            SNAPSHOT_HEADER_SIZE,
            FieldType::Error,
        ));
        return SnapshotParseResult {
            fields,
            complete: header.complete,
            vector_clock: Vec::new(),
            document_state: Vec::new(),
            error: Some(msg),
        };
    }

    let mut offset = SNAPSHOT_HEADER_SIZE;
    let count_start = offset;
    let count = match decode_varint(buf, offset) {
        Ok(v) => v,
        Err(reason) => {
            let msg = format!("truncated vector clock count at offset {offset}: {reason}");
            fields.push(Field::new(
                "error",
                FieldValue::Text(msg.clone()),
                count_start,
                buf.len(),
                FieldType::Error,
            ));
            return SnapshotParseResult {
                fields,
                complete: header.complete,
                vector_clock: Vec::new(),
                document_state: Vec::new(),
                error: Some(msg),
            };
        }
    };
    fields.push(Field::new(
        "vectorClockCount",
        FieldValue::UInt(count.value),
        count_start,
        count_start + count.bytes_read,
        FieldType::VectorClock,
    ));
    offset += count.bytes_read;

    let mut vector_clock = Vec::new();
    for _ in 0..count.value {
        let entry_start = offset;
        macro_rules! fail {
            ($msg:expr) => {{
                let msg = $msg;
                fields.push(Field::new(
                    "error",
                    FieldValue::Text(msg.clone()),
                    entry_start,
                    buf.len(),
                    FieldType::Error,
                ));
                return SnapshotParseResult {
                    fields,
                    complete: header.complete,
                    vector_clock,
                    document_state: Vec::new(),
                    error: Some(msg),
                };
            }};
        }

        let id_len = match decode_varint(buf, offset) {
            Ok(v) => v,
            Err(reason) => fail!(format!("truncated instanceId length at offset {offset}: {reason}")),
        };
        offset += id_len.bytes_read;
        let id_bytes = match buf.get(offset..offset + id_len.value as usize) {
            Some(b) => b,
            None => fail!(format!("truncated instanceId bytes at offset {offset}")),
        };
        let instance_id = match String::from_utf8(id_bytes.to_vec()) {
            Ok(s) => s,
            Err(_) => fail!(format!("invalid UTF-8 instanceId at offset {offset}")),
        };
        offset += id_len.value as usize;

        let sequence = match decode_varint(buf, offset) {
            Ok(v) => v,
            Err(reason) => fail!(format!("truncated sequence at offset {offset}: {reason}")),
        };
        offset += sequence.bytes_read;

        let vc_offset = match decode_varint(buf, offset) {
            Ok(v) => v,
            Err(reason) => fail!(format!("truncated offset at offset {offset}: {reason}")),
        };
        offset += vc_offset.bytes_read;

        let name_len = match decode_varint(buf, offset) {
            Ok(v) => v,
            Err(reason) => fail!(format!("truncated filename length at offset {offset}: {reason}")),
        };
        offset += name_len.bytes_read;
        let name_bytes = match buf.get(offset..offset + name_len.value as usize) {
            Some(b) => b,
            None => fail!(format!("truncated filename bytes at offset {offset}")),
        };
        let filename = match String::from_utf8(name_bytes.to_vec()) {
            Ok(s) => s,
            Err(_) => fail!(format!("invalid UTF-8 filename at offset {offset}")),
        };
        offset += name_len.value as usize;

        fields.push(Field::new(
            "vectorClockEntry",
            FieldValue::Text(format!("{instance_id}@{sequence}", sequence = sequence.value)),
            entry_start,
            offset,
            FieldType::VectorClock,
        ));

        vector_clock.push(VectorClockEntry {
            instance_id,
            sequence: sequence.value,
            offset: vc_offset.value,
            filename,
        });
    }

    let document_state = buf[offset..].to_vec();
    fields.push(Field::new(
        "documentState",
        FieldValue::Bytes(document_state.clone()),
        offset,
        buf.len(),
        FieldType::Data,
    ));

    SnapshotParseResult {
        fields,
        complete: header.complete,
        vector_clock,
        document_state,
        error: None,
    }
}
