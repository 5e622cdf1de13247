//! Predicate evaluation over partition sets.
//!
//! A shard-key predicate is reduced to `(operator, value)` conditions and
//! each candidate partition is kept when some key inside it could satisfy
//! the condition. Range partitions own `(low, high]`; hash partitions own a
//! set of buckets and only prune on equality.

use crate::flags::{RoutingFlags, FLIPPED, JOIN_LINK, SHARD_COND};
use shardgate_common::sharding::epoch_from_str;
use shardgate_common::{KeyType, Partition, PartitionBounds};
use shardgate_sql::ast::{BinaryOp, ExprKind, UnaryOp};
use shardgate_sql::{Expr, SourceItem};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub type PartitionSet = Vec<Arc<Partition>>;

/// Why a shard-key value could not be turned into a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// A function call, subquery, column or arithmetic: no pruning possible.
    #[error("sharding key value is not a constant")]
    Unrecognized,
    /// A literal of the wrong form for the key type.
    #[error("sharding key parse error: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub op: BinaryOp,
    pub value: KeyValue,
}

impl Condition {
    pub fn new(op: BinaryOp, value: KeyValue) -> Self {
        Self { op, value }
    }
}

pub fn supplemental_hash(value: u32) -> u32 {
    let h = value ^ ((value >> 20) ^ (value >> 12));
    h ^ ((h >> 7) ^ (h >> 4))
}

/// Hash of a string key: the first 8 bytes, xored with the last 8 when the
/// key is longer.
pub fn str_hash(key: &[u8]) -> u32 {
    let fold = |bytes: &[u8]| {
        bytes
            .iter()
            .fold(0u32, |acc, b| (acc << 4).wrapping_add(u32::from(*b)))
    };
    let head = fold(&key[..key.len().min(8)]);
    if key.len() > 8 {
        supplemental_hash(head ^ fold(&key[key.len() - 8..]))
    } else {
        supplemental_hash(head)
    }
}

/// Bucket of `value`, always in `0..count`.
pub fn modulo(value: i64, count: u32) -> i64 {
    value.rem_euclid(i64::from(count.max(1)))
}

/// Whether some key inside `partition` could satisfy `cond`.
pub fn partition_satisfies(partition: &Partition, cond: &Condition) -> bool {
    match &partition.bounds {
        PartitionBounds::Hash { .. } => {
            if cond.op != BinaryOp::Eq {
                return true;
            }
            let hash_value = match &cond.value {
                KeyValue::Str(s) => i64::from(str_hash(s.as_bytes())),
                KeyValue::Int(n) => *n,
            };
            let bucket = modulo(hash_value, partition.bucket_count);
            bucket < i64::from(partition.bucket_count) && partition.owns_bucket(bucket as i32)
        }
        PartitionBounds::StrRange { low, high } => {
            let KeyValue::Str(v) = &cond.value else {
                return true;
            };
            let v = v.as_str();
            let above_low = low.as_deref().map_or(true, |l| v > l);
            match cond.op {
                BinaryOp::Eq => above_low && high.as_deref().map_or(true, |h| v <= h),
                BinaryOp::Gt => high.as_deref().map_or(true, |h| v < h),
                BinaryOp::Ge => high.as_deref().map_or(true, |h| v <= h),
                BinaryOp::Lt | BinaryOp::Le => above_low,
                _ => true,
            }
        }
        PartitionBounds::IntRange { low, high } => {
            let KeyValue::Int(v) = cond.value else {
                return true;
            };
            let (low, high) = (*low, *high);
            match cond.op {
                BinaryOp::Eq => v > low && v <= high,
                BinaryOp::Gt => v < high,
                BinaryOp::Lt => v > low.saturating_add(1),
                BinaryOp::Ge => v <= high,
                BinaryOp::Le => v > low,
                BinaryOp::Ne => !(v == high && high == low.saturating_add(1)),
                _ => false,
            }
        }
    }
}

/// Keeps only the partitions satisfying `cond`.
pub fn partitions_filter(partitions: &mut PartitionSet, cond: &Condition) {
    partitions.retain(|p| partition_satisfies(p, cond));
}

/// Appends the partitions of `from` satisfying `cond` to `to`.
pub fn partitions_collect(from: &[Arc<Partition>], cond: &Condition, to: &mut PartitionSet) {
    to.extend(from.iter().filter(|p| partition_satisfies(p, cond)).cloned());
}

/// First partition satisfying `cond`.
pub fn partitions_get(from: &[Arc<Partition>], cond: &Condition) -> Option<Arc<Partition>> {
    from.iter().find(|p| partition_satisfies(p, cond)).cloned()
}

/// Group names of `partitions`, in order, duplicates kept.
pub fn partition_groups(partitions: &[Arc<Partition>]) -> Vec<String> {
    partitions.iter().map(|p| p.group.clone()).collect()
}

/// Converts the text of a key (a string literal or a directive value).
pub fn string_to_sharding_value(s: &str, key_type: KeyType) -> Result<KeyValue, KeyError> {
    match key_type {
        KeyType::Str => Ok(KeyValue::Str(s.to_string())),
        KeyType::Date | KeyType::DateTime => epoch_from_str(s)
            .map(KeyValue::Int)
            .ok_or_else(|| KeyError::Invalid(format!("error datetime format: {s}"))),
        KeyType::Int => s
            .parse::<i64>()
            .map(KeyValue::Int)
            .map_err(|_| KeyError::Invalid(format!("cannot get INT from string token: {s}"))),
    }
}

fn literal_int(e: &Expr) -> Option<i64> {
    match &e.kind {
        ExprKind::Integer(n) => Some(*n),
        ExprKind::Unary { op, expr } => match (op, &expr.kind) {
            (UnaryOp::Minus, ExprKind::Integer(n)) => n.checked_neg(),
            (UnaryOp::Plus, ExprKind::Integer(n)) => Some(*n),
            _ => None,
        },
        _ => None,
    }
}

fn is_compound_value(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Function { .. }
        | ExprKind::Subquery(_)
        | ExprKind::Id(_)
        | ExprKind::Dotted(_) => true,
        ExprKind::Binary { op, .. } => op.is_arithmetic(),
        _ => false,
    }
}

/// Reads the value side of a shard-key predicate.
pub fn parse_sharding_value(e: &Expr, key_type: KeyType) -> Result<KeyValue, KeyError> {
    if let Some(n) = literal_int(e) {
        if key_type == KeyType::Int {
            return Ok(KeyValue::Int(n));
        }
    }
    if let ExprKind::Str(s) = &e.kind {
        return string_to_sharding_value(s, key_type);
    }
    if is_compound_value(e) {
        debug!(value = %e, "compound sharding value, using all shards");
        return Err(KeyError::Unrecognized);
    }
    Err(KeyError::Invalid(format!("unexpected token: {e}")))
}

/// A sharded table reference and its key column, for recognising the key
/// in expressions.
#[derive(Debug, Clone, Copy)]
pub struct KeyColumn<'a> {
    /// Database written in the statement, if any.
    pub db: Option<&'a str>,
    pub table: &'a str,
    pub alias: Option<&'a str>,
    pub key: &'a str,
}

impl<'a> KeyColumn<'a> {
    pub fn new(source: &'a SourceItem, key: &'a str) -> Option<Self> {
        Some(Self {
            db: source.db.as_deref(),
            table: source.table.as_deref()?,
            alias: source.alias.as_deref(),
            key,
        })
    }

    /// `key`, `table.key`, `alias.key` or `db.table.key`.
    pub fn matches(&self, e: &Expr) -> bool {
        match e.field_parts() {
            Some((None, None, col)) => col.eq_ignore_ascii_case(self.key),
            Some((None, Some(prefix), col)) => {
                col.eq_ignore_ascii_case(self.key)
                    && (prefix.eq_ignore_ascii_case(self.table) || self.alias == Some(prefix))
            }
            Some((Some(db), Some(table), col)) => self.db.is_some_and(|d| d.eq_ignore_ascii_case(db))
                && table.eq_ignore_ascii_case(self.table)
                && col.eq_ignore_ascii_case(self.key),
            _ => false,
        }
    }
}

/// Marks every predicate restricting `key` with [`SHARD_COND`] and returns
/// how many there are. Comparisons written `CONST op key` are marked
/// [`FLIPPED`].
pub fn optimize_sharding_condition(
    where_clause: Option<&Expr>,
    key: &KeyColumn<'_>,
    flags: &mut RoutingFlags,
) -> usize {
    let Some(root) = where_clause else {
        return 0;
    };
    let mut occurrences = 0;
    let mut stack = vec![root];
    while let Some(p) = stack.pop() {
        match &p.kind {
            ExprKind::Binary { op, left, right } if op.is_logical() => {
                stack.push(right);
                stack.push(left);
            }
            ExprKind::Not(inner) => stack.push(inner),
            ExprKind::Binary { op, left, right }
                if op.is_compare() && !flags.has(p.id, JOIN_LINK) =>
            {
                let (lhs, flipped) = if left.is_field_name() {
                    (&**left, false)
                } else if right.is_field_name() {
                    (&**right, true)
                } else {
                    continue;
                };
                if key.matches(lhs) {
                    if flipped {
                        flags.set(p.id, FLIPPED);
                    } else {
                        flags.unset(p.id, FLIPPED);
                    }
                    flags.set(p.id, SHARD_COND);
                    occurrences += 1;
                }
            }
            ExprKind::Between {
                expr,
                negated: false,
                ..
            }
            | ExprKind::InList {
                expr,
                negated: false,
                ..
            } => {
                if key.matches(expr) {
                    flags.set(p.id, SHARD_COND);
                    occurrences += 1;
                }
            }
            _ => {}
        }
    }
    occurrences
}

/// `(op, value side)` of a marked comparison, with the operator flipped when
/// the key was on the right.
pub fn shard_comparison<'e>(e: &'e Expr, flags: &RoutingFlags) -> Option<(BinaryOp, &'e Expr)> {
    let (op, left, right) = e.binary()?;
    if !op.is_compare() {
        return None;
    }
    if flags.has(e.id, FLIPPED) {
        Some((op.flipped(), left))
    } else {
        Some((op, right))
    }
}

fn key_type_of(partitions: &[Arc<Partition>]) -> Option<KeyType> {
    partitions.first().map(|p| p.key_type)
}

fn filter_comparison(
    partitions: &mut PartitionSet,
    e: &Expr,
    flags: &RoutingFlags,
) -> Result<(), KeyError> {
    let Some(key_type) = key_type_of(partitions) else {
        return Ok(());
    };
    let Some((op, value)) = shard_comparison(e, flags) else {
        return Ok(());
    };
    let cond = Condition::new(op, parse_sharding_value(value, key_type)?);
    partitions_filter(partitions, &cond);
    Ok(())
}

fn filter_between(partitions: &mut PartitionSet, low: &Expr, high: &Expr) -> Result<(), KeyError> {
    let Some(key_type) = key_type_of(partitions) else {
        return Ok(());
    };
    let cond = Condition::new(BinaryOp::Ge, parse_sharding_value(low, key_type)?);
    partitions_filter(partitions, &cond);
    let cond = Condition::new(BinaryOp::Le, parse_sharding_value(high, key_type)?);
    partitions_filter(partitions, &cond);
    Ok(())
}

fn collect_in(partitions: &mut PartitionSet, list: &[Expr]) -> Result<(), KeyError> {
    let Some(key_type) = key_type_of(partitions) else {
        return Ok(());
    };
    if list.is_empty() {
        return Err(KeyError::Unrecognized);
    }
    let mut collected = Vec::new();
    for value in list {
        let cond = Condition::new(BinaryOp::Eq, parse_sharding_value(value, key_type)?);
        partitions_collect(partitions, &cond, &mut collected);
    }
    *partitions = collected;
    Ok(())
}

enum Task<'e> {
    Eval(&'e Expr, usize),
    /// Append set `from` to set `into`.
    Merge { into: usize, from: usize },
}

/// Narrows `partitions` by the marked predicates of `where_clause`.
///
/// AND filters sequentially. OR evaluates each side on its own copy of the
/// set and appends the results; duplicates are removed later at group
/// level. Predicates under NOT are not evaluated, so they never prune.
pub fn filter_expr(
    partitions: &mut PartitionSet,
    where_clause: &Expr,
    flags: &RoutingFlags,
) -> Result<(), KeyError> {
    if partitions.is_empty() {
        return Ok(());
    }
    let mut sets: Vec<PartitionSet> = vec![std::mem::take(partitions)];
    let mut tasks = vec![Task::Eval(where_clause, 0)];
    let mut outcome = Ok(());

    while let Some(task) = tasks.pop() {
        let (p, set) = match task {
            Task::Merge { into, from } => {
                let branch = std::mem::take(&mut sets[from]);
                sets[into].extend(branch);
                continue;
            }
            Task::Eval(p, set) => (p, set),
        };
        match &p.kind {
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let copy = sets[set].clone();
                sets.push(copy);
                let branch = sets.len() - 1;
                tasks.push(Task::Merge {
                    into: set,
                    from: branch,
                });
                tasks.push(Task::Eval(right, branch));
                tasks.push(Task::Eval(left, set));
                continue;
            }
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                tasks.push(Task::Eval(right, set));
                tasks.push(Task::Eval(left, set));
                continue;
            }
            _ => {}
        }
        if !flags.has(p.id, SHARD_COND) {
            continue;
        }
        let rc = match &p.kind {
            ExprKind::Binary { op, .. } if op.is_compare() && !flags.has(p.id, JOIN_LINK) => {
                filter_comparison(&mut sets[set], p, flags)
            }
            ExprKind::Between { low, high, .. } => filter_between(&mut sets[set], low, high),
            ExprKind::InList { list, .. } => collect_in(&mut sets[set], list),
            _ => Ok(()),
        };
        if rc.is_err() {
            outcome = rc;
            break;
        }
    }
    *partitions = std::mem::take(&mut sets[0]);
    outcome
}
