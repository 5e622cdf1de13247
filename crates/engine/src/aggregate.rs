//! Folding partial aggregates from several shards into one row.

use crate::compare::FieldType;
use crate::decimal::{self, MAX_COL_VALUE_LEN};
use crate::descriptors::{AggregateKind, AggregateSlot, CompareOp, HavingFilter, LiteralKind};
use crate::error::{MergeError, Result};
use crate::packet::{row_packet, Packet, Reader};
use std::cmp::Ordering;

/// Largest row the aggregate pass will rewrite.
pub const MAX_PACK_LEN: usize = 2048;

fn as_text(v: &[u8]) -> Result<&str> {
    std::str::from_utf8(v).map_err(|_| MergeError::NotNumeric(String::from_utf8_lossy(v).into_owned()))
}

/// Combines two partial values of one aggregate column. NULL and empty
/// values take the other side.
pub fn fold_value(
    function: AggregateKind,
    field_type: FieldType,
    acc: Option<&[u8]>,
    other: Option<&[u8]>,
) -> Result<Option<Vec<u8>>> {
    let a = acc.unwrap_or(b"");
    let b = other.unwrap_or(b"");
    if a.len() > MAX_COL_VALUE_LEN || b.len() > MAX_COL_VALUE_LEN {
        return Err(MergeError::ValueTooLong(MAX_COL_VALUE_LEN));
    }
    if b.is_empty() {
        return Ok(acc.map(<[u8]>::to_vec));
    }
    if a.is_empty() {
        return Ok(Some(b.to_vec()));
    }

    let numeric = field_type.is_integer() || field_type.is_decimal() || field_type.is_approximate();
    if field_type.is_string_like() {
        if !matches!(function, AggregateKind::Max | AggregateKind::Min) {
            return Err(MergeError::StringAggregate(function.name()));
        }
    } else if !numeric {
        return Err(MergeError::UnknownType(type_code(field_type)));
    }

    let folded = match function {
        AggregateKind::Sum | AggregateKind::Count => {
            let sum = decimal::add(as_text(a)?, as_text(b)?)?;
            if field_type.is_approximate() {
                decimal::trim_fraction(&sum).to_string()
            } else {
                sum
            }
        }
        AggregateKind::Max | AggregateKind::Min => {
            let ord = if field_type.is_string_like() {
                a.cmp(b)
            } else {
                decimal::compare(as_text(a)?, as_text(b)?)?
            };
            let keep_acc = match function {
                AggregateKind::Max => ord != Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            return Ok(Some(if keep_acc { a.to_vec() } else { b.to_vec() }));
        }
        AggregateKind::Avg => return Err(MergeError::UnsupportedAggregate("AVG")),
    };
    Ok(Some(folded.into_bytes()))
}

fn type_code(t: FieldType) -> u8 {
    match t {
        FieldType::Unknown(code) => code,
        FieldType::Null => 0x06,
        FieldType::Bit => 0x10,
        FieldType::VarChar => 0x0f,
        FieldType::Enum => 0xf7,
        FieldType::Set => 0xf8,
        FieldType::TinyBlob => 0xf9,
        FieldType::MediumBlob => 0xfa,
        FieldType::LongBlob => 0xfb,
        FieldType::Blob => 0xfc,
        FieldType::Geometry => 0xff,
        _ => 0,
    }
}

fn columns(packet: &Packet) -> Result<Vec<Option<&[u8]>>> {
    let mut r = Reader::new(packet.payload());
    let mut out = Vec::new();
    while r.remaining() > 0 {
        let column = r.column().ok_or_else(|| MergeError::Malformed {
            shard: 0,
            reason: "truncated row".to_string(),
        })?;
        out.push(column);
    }
    Ok(out)
}

/// Folds `other` into `acc`, rewriting every aggregate column.
pub fn fold_rows(acc: &Packet, other: &Packet, slots: &[AggregateSlot]) -> Result<Packet> {
    if acc.payload_len() >= MAX_PACK_LEN {
        return Err(MergeError::RecordTooLong);
    }
    let left = columns(acc)?;
    let right = columns(other)?;
    let mut folded: Vec<Option<Vec<u8>>> = left.iter().map(|c| c.map(<[u8]>::to_vec)).collect();
    for slot in slots {
        let a = left.get(slot.pos).copied().flatten();
        let b = right.get(slot.pos).copied().flatten();
        if let Some(cell) = folded.get_mut(slot.pos) {
            *cell = fold_value(slot.function, slot.field_type, a, b)?;
        }
    }
    let cells: Vec<Option<&[u8]>> = folded.iter().map(|c| c.as_deref()).collect();
    let row = row_packet(acc.seq(), &cells);
    if row.payload_len() > MAX_PACK_LEN {
        return Err(MergeError::RecordTooLong);
    }
    Ok(row)
}

/// Evaluates a detached HAVING predicate against a folded value.
pub fn having_passes(value: Option<&[u8]>, filter: &HavingFilter) -> Result<bool> {
    let value = value.unwrap_or(b"");
    let ord = match filter.literal {
        LiteralKind::Integer | LiteralKind::Float => {
            if filter.value.is_empty() {
                return Ok(true);
            }
            if value.is_empty() {
                return Ok(false);
            }
            decimal::compare(as_text(value)?, &filter.value)?
        }
        LiteralKind::Text => value.cmp(filter.value.as_bytes()),
    };
    Ok(match filter.op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
    })
}
