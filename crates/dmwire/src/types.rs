//! SQL type codes, parameter/column descriptors and value conversion.
//!
//! Column values arrive as raw little-endian bytes whose meaning depends
//! on the declared type. Integers and floats map onto the matching
//! `Value` variants, character data is transcoded with the session
//! charset, and everything without a native Rust counterpart (DECIMAL,
//! dates, intervals, LOB locators) is returned as `Value::Bytes`.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use dmwire_core::{Error, Result, TypeError, Value};

use crate::protocol::Charset;

/// Server type codes.
pub mod sql_type {
    pub const CHAR: i32 = 0;
    pub const VARCHAR2: i32 = 1;
    pub const VARCHAR: i32 = 2;
    pub const BIT: i32 = 3;
    pub const TINYINT: i32 = 5;
    pub const SMALLINT: i32 = 6;
    pub const INT: i32 = 7;
    pub const BIGINT: i32 = 8;
    pub const DECIMAL: i32 = 9;
    pub const REAL: i32 = 10;
    pub const DOUBLE: i32 = 11;
    pub const BLOB: i32 = 12;
    pub const BOOLEAN: i32 = 13;
    pub const DATE: i32 = 14;
    pub const TIME: i32 = 15;
    pub const DATETIME: i32 = 16;
    pub const BINARY: i32 = 17;
    pub const VARBINARY: i32 = 18;
    pub const CLOB: i32 = 19;
    pub const INTERVAL_YM: i32 = 20;
    pub const INTERVAL_DT: i32 = 21;
    pub const TIME_TZ: i32 = 22;
    pub const DATETIME_TZ: i32 = 23;
    pub const NULL: i32 = 25;
    pub const ANY: i32 = 31;
    pub const ARRAY: i32 = 117;
    pub const CLASS: i32 = 119;
    pub const CURSOR: i32 = 120;
    pub const PLTYPE_RECORD: i32 = 121;
    pub const SARRAY: i32 = 122;

    /// Scale marking a BLOB that actually carries an object type.
    pub const COMPLEX_SCALE: i32 = 5;

    pub fn is_character(code: i32) -> bool {
        matches!(code, CHAR | VARCHAR2 | VARCHAR)
    }

    pub fn is_lob(code: i32) -> bool {
        matches!(code, BLOB | CLOB)
    }

    pub fn name(code: i32) -> &'static str {
        match code {
            CHAR => "CHAR",
            VARCHAR2 => "VARCHAR2",
            VARCHAR => "VARCHAR",
            BIT => "BIT",
            TINYINT => "TINYINT",
            SMALLINT => "SMALLINT",
            INT => "INT",
            BIGINT => "BIGINT",
            DECIMAL => "DECIMAL",
            REAL => "REAL",
            DOUBLE => "DOUBLE",
            BLOB => "BLOB",
            BOOLEAN => "BOOLEAN",
            DATE => "DATE",
            TIME => "TIME",
            DATETIME => "DATETIME",
            BINARY => "BINARY",
            VARBINARY => "VARBINARY",
            CLOB => "CLOB",
            INTERVAL_YM => "INTERVAL YEAR TO MONTH",
            INTERVAL_DT => "INTERVAL DAY TO SECOND",
            TIME_TZ => "TIME WITH TIME ZONE",
            DATETIME_TZ => "DATETIME WITH TIME ZONE",
            NULL => "NULL",
            ANY => "ANY",
            ARRAY => "ARRAY",
            CLASS => "CLASS",
            CURSOR => "CURSOR",
            PLTYPE_RECORD => "RECORD",
            SARRAY => "SARRAY",
            _ => "UNKNOWN",
        }
    }
}

/// Object types whose descriptors follow the column list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexKind {
    Array,
    Class,
    Record,
    /// BLOB column holding an object (scale `COMPLEX_SCALE`)
    Object,
}

impl ComplexKind {
    pub fn detect(sql_type: i32, scale: i32) -> Option<Self> {
        match sql_type {
            sql_type::ARRAY | sql_type::SARRAY => Some(ComplexKind::Array),
            sql_type::CLASS => Some(ComplexKind::Class),
            sql_type::PLTYPE_RECORD => Some(ComplexKind::Record),
            sql_type::BLOB if scale == sql_type::COMPLEX_SCALE => Some(ComplexKind::Object),
            _ => None,
        }
    }
}

/// Parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamIo {
    #[default]
    In,
    Out,
    InOut,
}

impl ParamIo {
    pub fn from_wire(code: i16) -> Self {
        match code {
            1 => ParamIo::Out,
            2 => ParamIo::InOut,
            _ => ParamIo::In,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            ParamIo::In => 0,
            ParamIo::Out => 1,
            ParamIo::InOut => 2,
        }
    }

    pub fn is_input(self) -> bool {
        !matches!(self, ParamIo::Out)
    }
}

/// Result column metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
    pub table_name: String,
    pub schema_name: String,
    /// Underlying column name, when the statement asked for it
    pub base_name: Option<String>,
    pub sql_type: i32,
    pub precision: i32,
    pub scale: i32,
    pub nullable: bool,
    pub identity: bool,
    pub readonly: bool,
    pub lob: bool,
    pub lob_table_id: i32,
    pub lob_column_id: i16,
    pub complex: Option<ComplexKind>,
}

/// Statement parameter metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    pub table_name: String,
    pub schema_name: String,
    pub sql_type: i32,
    pub precision: i32,
    pub scale: i32,
    pub nullable: bool,
    /// Server suggests binding with the declared type
    pub recommended: bool,
    pub lob: bool,
    pub io: ParamIo,
    pub lob_table_id: i32,
    pub lob_column_id: i16,
    pub complex: Option<ComplexKind>,
}

impl Parameter {
    /// Whether values for this slot travel as off-row LOB data.
    pub fn is_lob(&self) -> bool {
        self.lob || sql_type::is_lob(self.sql_type)
    }

    /// Descriptor used to decode an output value.
    pub fn as_column(&self) -> Column {
        Column {
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            sql_type: self.sql_type,
            precision: self.precision,
            scale: self.scale,
            nullable: self.nullable,
            lob: self.lob,
            lob_table_id: self.lob_table_id,
            lob_column_id: self.lob_column_id,
            ..Column::default()
        }
    }
}

/// Column/parameter flag bits.
pub mod item_flag {
    pub const IDENTITY: i16 = 0x01;
    pub const LOB: i16 = 0x02;
    pub const READONLY: i16 = 0x04;
    pub const RECOMMEND: i16 = 0x08;
}

fn sign_extend(data: &[u8]) -> Option<i64> {
    let v = match data.len() {
        1 => i64::from(data[0] as i8),
        2 => i64::from(i16::from_le_bytes([data[0], data[1]])),
        4 => i64::from(i32::from_le_bytes(data.try_into().ok()?)),
        8 => i64::from_le_bytes(data.try_into().ok()?),
        _ => return None,
    };
    Some(v)
}

fn width_error(sql_type: i32, data: &[u8], column: Option<&str>) -> Error {
    Error::Type(TypeError {
        expected: sql_type::name(sql_type),
        actual: format!("{} bytes", data.len()),
        column: column.map(str::to_string),
    })
}

/// Decode a column value from its wire bytes.
///
/// Block-format results widen small integers to four bytes, so integer
/// decoding accepts any of the standard widths.
pub fn decode_value(col: &Column, data: &[u8], charset: Charset) -> Result<Value> {
    use sql_type::*;

    let int = || sign_extend(data).ok_or_else(|| width_error(col.sql_type, data, Some(&col.name)));
    let value = match col.sql_type {
        CHAR | VARCHAR2 | VARCHAR => Value::Text(charset.decode(data)?),
        BIT | BOOLEAN => Value::Bool(int()? != 0),
        TINYINT => Value::TinyInt(int()? as i8),
        SMALLINT => Value::SmallInt(int()? as i16),
        INT => Value::Int(int()? as i32),
        BIGINT => Value::BigInt(int()?),
        REAL => match data.len() {
            4 => Value::Float(f32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            _ => return Err(width_error(REAL, data, Some(&col.name))),
        },
        DOUBLE => match <[u8; 8]>::try_from(data) {
            Ok(bytes) => Value::Double(f64::from_le_bytes(bytes)),
            Err(_) => return Err(width_error(DOUBLE, data, Some(&col.name))),
        },
        NULL => Value::Null,
        _ => Value::Bytes(data.to_vec()),
    };
    Ok(value)
}

/// A value converted for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundValue {
    pub sql_type: i32,
    pub precision: i32,
    pub scale: i32,
    /// `None` for SQL NULL
    pub data: Option<Vec<u8>>,
}

impl BoundValue {
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convert a value for a parameter slot.
///
/// The bind type follows the value except for LOB parameters, which keep
/// their declared type so the server accepts off-row data.
pub fn encode_value(value: &Value, param: &Parameter, charset: Charset) -> Result<BoundValue> {
    use sql_type::*;

    if let Some(kind) = param.complex {
        return Err(Error::Type(TypeError {
            expected: "scalar parameter",
            actual: format!("{:?} object parameter", kind),
            column: Some(param.name.clone()),
        }));
    }

    let (sql_type, precision, data) = match value {
        Value::Null => (param.sql_type, param.precision, None),
        Value::Bool(b) => (BIT, 1, Some(vec![u8::from(*b)])),
        Value::TinyInt(v) => (TINYINT, 1, Some(v.to_le_bytes().to_vec())),
        Value::SmallInt(v) => (SMALLINT, 2, Some(v.to_le_bytes().to_vec())),
        Value::Int(v) => (INT, 4, Some(v.to_le_bytes().to_vec())),
        Value::BigInt(v) => (BIGINT, 8, Some(v.to_le_bytes().to_vec())),
        Value::Float(v) => (REAL, 4, Some(v.to_le_bytes().to_vec())),
        Value::Double(v) => (DOUBLE, 8, Some(v.to_le_bytes().to_vec())),
        Value::Decimal(s) | Value::Text(s) => {
            let bytes = charset.encode(s)?.into_owned();
            let ty = if param.sql_type == CLOB { CLOB } else { VARCHAR };
            (ty, bytes.len() as i32, Some(bytes))
        }
        Value::Bytes(b) => {
            let ty = if param.sql_type == BLOB { BLOB } else { VARBINARY };
            (ty, b.len() as i32, Some(b.clone()))
        }
    };

    let scale = if value.is_null() { param.scale } else { 0 };
    Ok(BoundValue {
        sql_type,
        precision,
        scale,
        data,
    })
}
