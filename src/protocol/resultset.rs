//! Resultset encoding: column metadata, text rows, binary rows and the
//! prepared-statement parameter block.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

use super::constants::{charset, ColumnType};
use super::response::{encode_metadata_eof, encode_terminator};
use super::wire::{WireError, WireReader, WireWrite};

/// Schema reported for columns whose source does not name one
pub const DEFAULT_SCHEMA: &str = "mindsdb_schema";

/// Marker for a NULL column value in a text row
const NULL_VALUE: u8 = 0xFB;
/// Length of the fixed-length fields block in a column definition
const FIXED_FIELDS_LEN: u8 = 0x0c;
/// Unsigned flag in the high byte of a parameter type
const PARAM_UNSIGNED: u8 = 0x80;

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual form used by text rows; `None` for NULL
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(v.to_string()),
            Value::UInt(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => {
                if dt.nanosecond() == 0 {
                    Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
                } else {
                    Some(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
                }
            }
        }
    }

    fn text_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(b) => Some(b.clone()),
            other => other.to_text().map(String::into_bytes),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => Some(*v as i64),
            Value::Double(v) => Some(*v as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => {
                let s = s.trim();
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .or_else(|| {
                        NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                    })
            }
            _ => None,
        }
    }

    fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::DateTime(dt) => Some(dt.time()),
            Value::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A value that cannot be packed into its column's binary type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("value {value:?} cannot be encoded as {column_type:?}")]
pub struct ValueError {
    pub value: Value,
    pub column_type: ColumnType,
}

/// Column metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub schema: String,
    pub table: String,
    pub table_alias: String,
    pub name: String,
    pub alias: String,
    pub column_type: ColumnType,
    pub charset: u16,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDescriptor {
    /// Column with the default schema, no table and a utf8 charset
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: String::new(),
            table_alias: String::new(),
            name: name.to_string(),
            alias: name.to_string(),
            column_type,
            charset: charset::UTF8_UNICODE_CI,
            flags: 0,
            decimals: 0,
        }
    }

    /// Computed column: only an alias, no underlying name
    pub fn computed(alias: &str, column_type: ColumnType) -> Self {
        let mut column = Self::new("", column_type);
        column.alias = alias.to_string();
        column
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// Set the table; the alias follows unless set afterwards
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self.table_alias = table.to_string();
        self
    }

    pub fn with_table_alias(mut self, alias: &str) -> Self {
        self.table_alias = alias.to_string();
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = alias.to_string();
        self
    }

    pub fn with_charset(mut self, charset: u16) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }
}

/// Columns plus rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Index of the column whose alias (or name) matches, ignoring case
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.alias.eq_ignore_ascii_case(name))
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }
}

/// Display length hint: longest textual value, at least 1
pub fn column_max_length(rows: &[Vec<Value>], index: usize) -> u32 {
    rows.iter()
        .filter_map(|row| row.get(index))
        .map(|v| v.to_text().map_or(4, |s| s.chars().count()))
        .fold(1, usize::max) as u32
}

pub fn encode_column_count(count: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_lenenc_int(count as u64);
    buf.freeze()
}

pub fn encode_column_definition(column: &ColumnDescriptor, max_length: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);

    buf.put_lenenc_str("def");
    buf.put_lenenc_str(&column.schema);
    buf.put_lenenc_str(&column.table_alias);
    buf.put_lenenc_str(&column.table);
    buf.put_lenenc_str(&column.alias);
    buf.put_lenenc_str(&column.name);
    buf.put_u8(FIXED_FIELDS_LEN);
    buf.put_u16_le(column.charset);
    buf.put_u32_le(max_length);
    buf.put_u8(column.column_type.as_u8());
    buf.put_u16_le(column.flags);
    buf.put_u8(column.decimals);
    // Filler
    buf.put_u16_le(0);

    buf.freeze()
}

/// One definition packet per column, lengths computed from `rows`
pub fn encode_column_definitions(columns: &[ColumnDescriptor], rows: &[Vec<Value>]) -> Vec<Bytes> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| encode_column_definition(column, column_max_length(rows, i)))
        .collect()
}

pub fn encode_text_row(row: &[Value]) -> Bytes {
    let mut buf = BytesMut::new();
    for value in row {
        match value.text_bytes() {
            Some(data) => buf.put_lenenc_bytes(&data),
            None => buf.put_u8(NULL_VALUE),
        }
    }
    buf.freeze()
}

pub fn encode_binary_row(columns: &[ColumnDescriptor], row: &[Value]) -> Result<Bytes, ValueError> {
    let mut buf = BytesMut::new();
    buf.put_u8(0x00);

    // Binary rows offset the null bitmap by two bits
    let mut bitmap = vec![0u8; (columns.len() + 7 + 2) / 8];
    for (i, value) in row.iter().enumerate().take(columns.len()) {
        if value.is_null() {
            let bit = i + 2;
            bitmap[bit / 8] |= 1 << (bit % 8);
        }
    }
    buf.extend_from_slice(&bitmap);

    for (column, value) in columns.iter().zip(row.iter()) {
        if !value.is_null() {
            put_binary_value(&mut buf, column.column_type, value)?;
        }
    }

    Ok(buf.freeze())
}

fn put_binary_value(buf: &mut BytesMut, column_type: ColumnType, value: &Value) -> Result<(), ValueError> {
    let mismatch = || ValueError {
        value: value.clone(),
        column_type,
    };

    let integer = || value.as_i64().ok_or_else(mismatch);

    match column_type {
        ColumnType::Tiny => buf.put_i8(i8::try_from(integer()?).map_err(|_| mismatch())?),
        ColumnType::Short | ColumnType::Year => {
            buf.put_i16_le(i16::try_from(integer()?).map_err(|_| mismatch())?)
        }
        ColumnType::Long | ColumnType::Int24 => {
            buf.put_i32_le(i32::try_from(integer()?).map_err(|_| mismatch())?)
        }
        ColumnType::LongLong => match value {
            Value::UInt(v) => buf.put_u64_le(*v),
            other => buf.put_i64_le(other.as_i64().ok_or_else(mismatch)?),
        },
        ColumnType::Float => buf.put_f32_le(value.as_f64().ok_or_else(mismatch)? as f32),
        ColumnType::Double => buf.put_f64_le(value.as_f64().ok_or_else(mismatch)?),
        ColumnType::Date | ColumnType::DateTime | ColumnType::Timestamp => {
            put_binary_datetime(buf, value.as_datetime().ok_or_else(mismatch)?, column_type)
        }
        ColumnType::Time => put_binary_time(buf, value.as_time().ok_or_else(mismatch)?),
        _ => buf.put_lenenc_bytes(&value.text_bytes().ok_or_else(mismatch)?),
    }
    Ok(())
}

fn put_binary_datetime(buf: &mut BytesMut, dt: NaiveDateTime, column_type: ColumnType) {
    let micros = dt.nanosecond() / 1_000;
    let date_only = column_type == ColumnType::Date
        || (dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 && micros == 0);

    let len: u8 = if date_only {
        4
    } else if micros == 0 {
        7
    } else {
        11
    };

    buf.put_u8(len);
    buf.put_u16_le(dt.year() as u16);
    buf.put_u8(dt.month() as u8);
    buf.put_u8(dt.day() as u8);
    if len >= 7 {
        buf.put_u8(dt.hour() as u8);
        buf.put_u8(dt.minute() as u8);
        buf.put_u8(dt.second() as u8);
    }
    if len == 11 {
        buf.put_u32_le(micros);
    }
}

fn put_binary_time(buf: &mut BytesMut, t: NaiveTime) {
    let micros = t.nanosecond() / 1_000;
    let len: u8 = if micros == 0 { 8 } else { 12 };
    buf.put_u8(len);
    // is_negative, days
    buf.put_u8(0);
    buf.put_u32_le(0);
    buf.put_u8(t.hour() as u8);
    buf.put_u8(t.minute() as u8);
    buf.put_u8(t.second() as u8);
    if len == 12 {
        buf.put_u32_le(micros);
    }
}

/// Full text resultset: count, definitions, rows and terminator
pub fn encode_text_resultset(result: &ResultSet, capabilities: u32, status_flags: u16) -> Vec<Bytes> {
    let mut packets = Vec::with_capacity(result.columns.len() + result.rows.len() + 3);
    packets.push(encode_column_count(result.columns.len()));
    packets.extend(encode_column_definitions(&result.columns, &result.rows));
    packets.extend(encode_metadata_eof(capabilities, status_flags));
    packets.extend(result.rows.iter().map(|row| encode_text_row(row)));
    packets.push(encode_terminator(capabilities, status_flags));
    packets
}

/// Column count and definitions of a binary resultset
pub fn encode_binary_metadata(columns: &[ColumnDescriptor], capabilities: u32, status_flags: u16) -> Vec<Bytes> {
    let mut packets = Vec::with_capacity(columns.len() + 2);
    packets.push(encode_column_count(columns.len()));
    packets.extend(encode_column_definitions(columns, &[]));
    packets.extend(encode_metadata_eof(capabilities, status_flags));
    packets
}

/// Header of a COM_STMT_PREPARE response
pub fn encode_prepare_ok(statement_id: u32, num_columns: u16, num_params: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u8(0x00);
    buf.put_u32_le(statement_id);
    buf.put_u16_le(num_columns);
    buf.put_u16_le(num_params);
    // Filler
    buf.put_u8(0);
    // Warning count
    buf.put_u16_le(0);
    buf.freeze()
}

/// Parameter type as sent with COM_STMT_EXECUTE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamType {
    pub column_type: ColumnType,
    pub unsigned: bool,
}

/// Decode the parameter block of COM_STMT_EXECUTE.
///
/// `types` holds the types bound by an earlier execute and is replaced
/// when the client sends new ones. Parameters without a known type are
/// read as length-encoded strings.
pub fn decode_binary_params(
    block: &[u8],
    num_params: usize,
    types: &mut Vec<ParamType>,
) -> Result<Vec<Value>, WireError> {
    if num_params == 0 {
        return Ok(Vec::new());
    }

    let mut r = WireReader::new(block);
    let null_bitmap = r.take((num_params + 7) / 8)?.to_vec();
    let new_params_bound = r.u8()?;

    if new_params_bound == 1 {
        types.clear();
        for _ in 0..num_params {
            let column_type = ColumnType::from_u8(r.u8()?);
            let flags = r.u8()?;
            types.push(ParamType {
                column_type,
                unsigned: flags & PARAM_UNSIGNED != 0,
            });
        }
    }

    let mut values = Vec::with_capacity(num_params);
    for i in 0..num_params {
        if null_bitmap[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let param_type = types.get(i).copied().unwrap_or(ParamType {
            column_type: ColumnType::VarString,
            unsigned: false,
        });
        values.push(read_binary_value(&mut r, param_type)?);
    }

    Ok(values)
}

fn read_binary_value(r: &mut WireReader<'_>, param_type: ParamType) -> Result<Value, WireError> {
    let unsigned = param_type.unsigned;
    let value = match param_type.column_type {
        ColumnType::Null => Value::Null,
        ColumnType::Tiny => {
            let v = r.u8()?;
            if unsigned {
                Value::UInt(u64::from(v))
            } else {
                Value::Int(i64::from(v as i8))
            }
        }
        ColumnType::Short | ColumnType::Year => {
            let v = r.u16_le()?;
            if unsigned {
                Value::UInt(u64::from(v))
            } else {
                Value::Int(i64::from(v as i16))
            }
        }
        ColumnType::Long | ColumnType::Int24 => {
            let v = r.u32_le()?;
            if unsigned {
                Value::UInt(u64::from(v))
            } else {
                Value::Int(i64::from(v as i32))
            }
        }
        ColumnType::LongLong => {
            let v = r.u64_le()?;
            if unsigned {
                Value::UInt(v)
            } else {
                Value::Int(v as i64)
            }
        }
        ColumnType::Float => Value::Double(f64::from(f32::from_bits(r.u32_le()?))),
        ColumnType::Double => Value::Double(f64::from_bits(r.u64_le()?)),
        ColumnType::Date | ColumnType::DateTime | ColumnType::Timestamp => read_binary_datetime(r)?,
        ColumnType::Time => read_binary_time(r)?,
        _ => {
            let data = r.lenenc_bytes()?;
            match std::str::from_utf8(data) {
                Ok(s) => Value::Text(s.to_string()),
                Err(_) => Value::Bytes(data.to_vec()),
            }
        }
    };
    Ok(value)
}

fn read_binary_datetime(r: &mut WireReader<'_>) -> Result<Value, WireError> {
    let len = r.u8()? as usize;
    if len == 0 {
        return Ok(Value::Text("0000-00-00 00:00:00".to_string()));
    }
    let mut fields = WireReader::new(r.take(len)?);
    let year = i32::from(fields.u16_le()?);
    let month = u32::from(fields.u8()?);
    let day = u32::from(fields.u8()?);
    let (hour, minute, second) = if len >= 7 {
        (
            u32::from(fields.u8()?),
            u32::from(fields.u8()?),
            u32::from(fields.u8()?),
        )
    } else {
        (0, 0, 0)
    };
    let micros = if len >= 11 { fields.u32_le()? } else { 0 };

    let value = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_micro_opt(hour, minute, second, micros))
        .map(|dt| {
            if len == 4 {
                Value::Date(dt.date())
            } else {
                Value::DateTime(dt)
            }
        })
        .unwrap_or_else(|| {
            Value::Text(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ))
        });
    Ok(value)
}

fn read_binary_time(r: &mut WireReader<'_>) -> Result<Value, WireError> {
    let len = r.u8()? as usize;
    if len == 0 {
        return Ok(Value::Text("00:00:00".to_string()));
    }
    let mut fields = WireReader::new(r.take(len)?);
    let negative = fields.u8()? == 1;
    let days = fields.u32_le()?;
    let hours = u32::from(fields.u8()?) + days * 24;
    let minutes = fields.u8()?;
    let seconds = fields.u8()?;
    let sign = if negative { "-" } else { "" };
    Ok(Value::Text(format!(
        "{}{:02}:{:02}:{:02}",
        sign, hours, minutes, seconds
    )))
}
