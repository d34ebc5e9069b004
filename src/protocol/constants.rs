//! Column types, character sets, field flags and error codes.

/// Column type codes (`MYSQL_TYPE_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    DateTime = 0x0c,
    Year = 0x0d,
    VarChar = 0x0f,
    Bit = 0x10,
    Json = 0xf5,
    NewDecimal = 0xf6,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
    Geometry = 0xff,
}

impl ColumnType {
    /// Map a wire type byte; unknown codes are treated as strings
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ColumnType::Decimal,
            0x01 => ColumnType::Tiny,
            0x02 => ColumnType::Short,
            0x03 => ColumnType::Long,
            0x04 => ColumnType::Float,
            0x05 => ColumnType::Double,
            0x06 => ColumnType::Null,
            0x07 => ColumnType::Timestamp,
            0x08 => ColumnType::LongLong,
            0x09 => ColumnType::Int24,
            0x0a => ColumnType::Date,
            0x0b => ColumnType::Time,
            0x0c => ColumnType::DateTime,
            0x0d => ColumnType::Year,
            0x0f => ColumnType::VarChar,
            0x10 => ColumnType::Bit,
            0xf5 => ColumnType::Json,
            0xf6 => ColumnType::NewDecimal,
            0xf7 => ColumnType::Enum,
            0xf8 => ColumnType::Set,
            0xf9 => ColumnType::TinyBlob,
            0xfa => ColumnType::MediumBlob,
            0xfb => ColumnType::LongBlob,
            0xfc => ColumnType::Blob,
            0xfd => ColumnType::VarString,
            0xff => ColumnType::Geometry,
            _ => ColumnType::String,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Character set / collation ids
#[allow(dead_code)]
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u16 = 8;
    pub const UTF8_GENERAL_CI: u16 = 33;
    pub const UTF8MB4_GENERAL_CI: u16 = 45;
    pub const BINARY: u16 = 63;
    pub const UTF8_UNICODE_CI: u16 = 192;
    pub const UTF8MB4_0900_AI_CI: u16 = 255;

    /// Collation used for text columns after `SET NAMES {name}`
    pub fn collation_for_names(name: &str) -> u16 {
        if name.eq_ignore_ascii_case("utf8mb4") {
            UTF8MB4_GENERAL_CI
        } else {
            UTF8_GENERAL_CI
        }
    }
}

/// Column definition flags
#[allow(dead_code)]
pub mod field_flag {
    pub const NOT_NULL: u16 = 1;
    pub const PRI_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY_COLLATION: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
}

/// Server error codes used by the proxy
#[allow(dead_code)]
pub mod error_code {
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    pub const ER_PASSWORD_NO_MATCH: u16 = 1133;
    pub const ER_SYNTAX_ERROR: u16 = 1149;
    pub const ER_UNKNOWN_SYSTEM_VARIABLE: u16 = 1193;
    pub const ER_WRONG_ARGUMENTS: u16 = 1210;
    pub const ER_NOT_SUPPORTED_YET: u16 = 1235;
    pub const ER_UNKNOWN_STMT_HANDLER: u16 = 1243;
    pub const ER_NO_SUCH_TABLE: u16 = 1146;
    pub const ER_BAD_FIELD_ERROR: u16 = 1054;
}

/// SQLSTATE for a given error code
pub fn sql_state(code: u16) -> &'static str {
    match code {
        error_code::ER_ACCESS_DENIED_ERROR => "28000",
        error_code::ER_SYNTAX_ERROR | error_code::ER_NOT_SUPPORTED_YET => "42000",
        error_code::ER_NO_SUCH_TABLE => "42S02",
        error_code::ER_BAD_FIELD_ERROR => "42S22",
        _ => "HY000",
    }
}

/// Authentication plugin names
pub mod auth_plugin {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
}
