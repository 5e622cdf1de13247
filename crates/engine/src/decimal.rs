//! Exact arithmetic on decimal strings as they appear in text-protocol rows.
//!
//! Partial SUM and COUNT values are folded digit by digit so that results
//! never pass through a float and never overflow a machine integer.

use crate::error::{MergeError, Result};
use std::cmp::Ordering;

pub const MAX_COL_VALUE_LEN: usize = 512;

struct Number<'a> {
    negative: bool,
    int: &'a [u8],
    frac: &'a [u8],
}

impl Number<'_> {
    fn is_zero(&self) -> bool {
        self.int.iter().chain(self.frac).all(|d| *d == b'0')
    }
}

/// Optional sign, digits and at most one inner decimal point. Empty input is
/// accepted and reads as zero.
pub fn is_numeric(s: &str) -> bool {
    parse(s).is_ok()
}

fn parse(s: &str) -> Result<Number<'_>> {
    let bytes = s.as_bytes();
    let (negative, body) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    if body.is_empty() {
        return if bytes.is_empty() {
            Ok(Number {
                negative: false,
                int: b"0",
                frac: b"",
            })
        } else {
            Err(MergeError::NotNumeric(s.to_string()))
        };
    }
    let (int, frac) = match body.iter().position(|b| *b == b'.') {
        Some(dot) => (&body[..dot], &body[dot + 1..]),
        None => (body, &body[body.len()..]),
    };
    let has_dot = int.len() != body.len();
    let valid = !int.is_empty()
        && (!has_dot || !frac.is_empty())
        && int.iter().chain(frac).all(u8::is_ascii_digit);
    if !valid {
        return Err(MergeError::NotNumeric(s.to_string()));
    }
    let first_significant = int
        .iter()
        .position(|d| *d != b'0')
        .unwrap_or(int.len().saturating_sub(1));
    Ok(Number {
        negative,
        int: &int[first_significant..],
        frac,
    })
}

fn frac_digit(frac: &[u8], i: usize) -> u8 {
    frac.get(i).map(|d| d - b'0').unwrap_or(0)
}

fn cmp_magnitude(a: &Number<'_>, b: &Number<'_>) -> Ordering {
    let by_int = a
        .int
        .len()
        .cmp(&b.int.len())
        .then_with(|| a.int.cmp(b.int));
    if by_int != Ordering::Equal {
        return by_int;
    }
    let width = a.frac.len().max(b.frac.len());
    (0..width)
        .map(|i| frac_digit(a.frac, i).cmp(&frac_digit(b.frac, i)))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Numeric comparison of two decimal strings.
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    let x = parse(a)?;
    let y = parse(b)?;
    let x_neg = x.negative && !x.is_zero();
    let y_neg = y.negative && !y.is_zero();
    Ok(match (x_neg, y_neg) {
        (false, false) => cmp_magnitude(&x, &y),
        (true, true) => cmp_magnitude(&y, &x),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    })
}

/// Digits of `n` padded to `frac_width` fractional places, least significant first.
fn digits_le(n: &Number<'_>, frac_width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n.int.len() + frac_width);
    for i in (0..frac_width).rev() {
        out.push(frac_digit(n.frac, i));
    }
    out.extend(n.int.iter().rev().map(|d| d - b'0'));
    out
}

fn add_digits(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len().max(b.len()) + 1);
    let mut carry = 0;
    for i in 0..a.len().max(b.len()) {
        let sum = a.get(i).copied().unwrap_or(0) + b.get(i).copied().unwrap_or(0) + carry;
        out.push(sum % 10);
        carry = sum / 10;
    }
    if carry > 0 {
        out.push(carry);
    }
    out
}

/// `a - b` where `a >= b` in magnitude.
fn sub_digits(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len());
    let mut borrow = 0i8;
    for (i, d) in a.iter().enumerate() {
        let mut v = *d as i8 - b.get(i).copied().unwrap_or(0) as i8 - borrow;
        if v < 0 {
            v += 10;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out.push(v as u8);
    }
    out
}

fn render(negative: bool, digits_le: &[u8], frac_width: usize) -> String {
    let int_digits = &digits_le[frac_width.min(digits_le.len())..];
    let int_len = int_digits
        .iter()
        .rposition(|d| *d != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    let zero = digits_le.iter().all(|d| *d == 0);
    let mut out = String::with_capacity(digits_le.len() + 2);
    if negative && !zero {
        out.push('-');
    }
    if int_len == 0 {
        out.push('0');
    } else {
        out.extend(int_digits[..int_len].iter().rev().map(|d| char::from(b'0' + d)));
    }
    if frac_width > 0 {
        out.push('.');
        out.extend(digits_le[..frac_width].iter().rev().map(|d| char::from(b'0' + d)));
    }
    out
}

/// Exact sum of two decimal strings. The result keeps the wider fractional
/// width of the two operands.
pub fn add(a: &str, b: &str) -> Result<String> {
    let x = parse(a)?;
    let y = parse(b)?;
    let frac_width = x.frac.len().max(y.frac.len());
    let dx = digits_le(&x, frac_width);
    let dy = digits_le(&y, frac_width);
    let (negative, digits) = if x.negative == y.negative {
        (x.negative, add_digits(&dx, &dy))
    } else {
        match cmp_magnitude(&x, &y) {
            Ordering::Less => (y.negative, sub_digits(&dy, &dx)),
            _ => (x.negative, sub_digits(&dx, &dy)),
        }
    };
    let out = render(negative, &digits, frac_width);
    if out.len() > MAX_COL_VALUE_LEN {
        return Err(MergeError::ValueTooLong(MAX_COL_VALUE_LEN));
    }
    Ok(out)
}

/// Drops trailing fractional zeros, and the point when nothing is left after it.
pub fn trim_fraction(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.')
}
