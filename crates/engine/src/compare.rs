//! Column comparison by wire type.

use crate::decimal;
use crate::error::{MergeError, Result};
use std::cmp::Ordering;

/// NULL or empty temporal values compare as this instant.
const EPOCH: &str = "1970-01-01 00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    NewDate,
    VarChar,
    Bit,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
    Unknown(u8),
}

impl FieldType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0a => FieldType::Date,
            0x0b => FieldType::Time,
            0x0c => FieldType::DateTime,
            0x0d => FieldType::Year,
            0x0e => FieldType::NewDate,
            0x0f => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xf6 => FieldType::NewDecimal,
            0xf7 => FieldType::Enum,
            0xf8 => FieldType::Set,
            0xf9 => FieldType::TinyBlob,
            0xfa => FieldType::MediumBlob,
            0xfb => FieldType::LongBlob,
            0xfc => FieldType::Blob,
            0xfd => FieldType::VarString,
            0xfe => FieldType::String,
            0xff => FieldType::Geometry,
            other => FieldType::Unknown(other),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Tiny | FieldType::Short | FieldType::Long | FieldType::LongLong | FieldType::Int24
        )
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self, FieldType::Decimal | FieldType::NewDecimal)
    }

    /// Types whose MAX/MIN fold compares raw bytes.
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            FieldType::Time
                | FieldType::Timestamp
                | FieldType::DateTime
                | FieldType::Year
                | FieldType::NewDate
                | FieldType::Date
                | FieldType::VarString
                | FieldType::String
        )
    }

    pub fn family(&self) -> Result<CompareFamily> {
        Ok(match self {
            FieldType::Tiny
            | FieldType::Short
            | FieldType::Long
            | FieldType::LongLong
            | FieldType::Int24
            | FieldType::Decimal
            | FieldType::NewDecimal
            | FieldType::Float
            | FieldType::Double => CompareFamily::Numeric,
            FieldType::Date => CompareFamily::Date,
            FieldType::Time => CompareFamily::Time,
            FieldType::Year => CompareFamily::Year,
            FieldType::Timestamp
            | FieldType::DateTime
            | FieldType::VarChar
            | FieldType::VarString
            | FieldType::String => CompareFamily::Text,
            FieldType::Null
            | FieldType::Bit
            | FieldType::Enum
            | FieldType::Set
            | FieldType::TinyBlob
            | FieldType::MediumBlob
            | FieldType::LongBlob
            | FieldType::Blob
            | FieldType::Geometry
            | FieldType::NewDate => CompareFamily::Unordered,
            FieldType::Unknown(code) => return Err(MergeError::UnknownType(*code)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFamily {
    Numeric,
    Date,
    Time,
    Year,
    /// Case-insensitive bytes; empty sorts first.
    Text,
    /// Never reorders rows.
    Unordered,
}

fn text(v: Option<&[u8]>) -> &str {
    v.and_then(|b| std::str::from_utf8(b).ok()).unwrap_or("")
}

fn temporal(v: Option<&[u8]>) -> &str {
    match text(v) {
        "" => EPOCH,
        s => s,
    }
}

/// Leading integer of `s`, in the manner of `atol`.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (sign, digits) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Numeric fields of a `sep`-separated value, e.g. `2024-03-09` or `10:04:59`.
fn fields(s: &str, sep: char, count: usize) -> Vec<i64> {
    let head = s.split(' ').next().unwrap_or("");
    let mut out: Vec<i64> = head.splitn(count, sep).map(leading_int).collect();
    out.resize(count, 0);
    out
}

fn compare_time(a: &str, b: &str) -> Ordering {
    // An epoch stand-in carries a date part; its time of day is midnight.
    let time_of = |s: &str| {
        if s == EPOCH {
            vec![0, 0, 0]
        } else {
            fields(s, ':', 3)
        }
    };
    time_of(a).cmp(&time_of(b))
}

fn compare_text(a: Option<&[u8]>, b: Option<&[u8]>) -> Ordering {
    let a = a.unwrap_or(b"");
    let b = b.unwrap_or(b"");
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a
            .iter()
            .map(u8::to_ascii_lowercase)
            .cmp(b.iter().map(u8::to_ascii_lowercase)),
    }
}

/// Ascending comparison of two column values; `None` is SQL NULL.
pub fn compare_values(family: CompareFamily, a: Option<&[u8]>, b: Option<&[u8]>) -> Result<Ordering> {
    Ok(match family {
        CompareFamily::Numeric => decimal::compare(text(a), text(b))?,
        CompareFamily::Date => fields(temporal(a), '-', 3).cmp(&fields(temporal(b), '-', 3)),
        CompareFamily::Time => compare_time(temporal(a), temporal(b)),
        CompareFamily::Year => leading_int(temporal(a)).cmp(&leading_int(temporal(b))),
        CompareFamily::Text => compare_text(a, b),
        CompareFamily::Unordered => Ordering::Equal,
    })
}
