//! Statement rewriting before fan-out.
//!
//! A SELECT reaching several groups is reshaped so each shard returns rows
//! the merge engine can combine: LIMIT absorbs OFFSET, grouped or distinct
//! results gain a sort order, and HAVING moves from the shards into the
//! merge. In partition mode every sharded table is printed under its
//! per-group physical name.

use crate::flags::{RoutingFlags, ORDER_BY};
use crate::router::restrictions::having_column;
use crate::router::RoutingOutcome;
use shardgate_engine::{CompareOp, HavingFilter, LiteralKind};
use shardgate_sql::ast::{BinaryOp, ExprKind, OrderByItem};
use shardgate_sql::{Expr, NodeId, ParsedStatement, Select, SourceItem, SqlPrinter, Statement};
use std::collections::HashSet;
use tracing::debug;

/// The shape shards actually run, and what was taken away from it.
#[derive(Debug, Clone, Default)]
pub struct Rewritten {
    /// The SELECT as sent to the shards.
    pub select: Option<Select>,
    pub having: Option<HavingFilter>,
}

fn compare_op(op: BinaryOp) -> Option<CompareOp> {
    Some(match op {
        BinaryOp::Eq => CompareOp::Eq,
        BinaryOp::Ne => CompareOp::Ne,
        BinaryOp::Lt => CompareOp::Lt,
        BinaryOp::Le => CompareOp::Le,
        BinaryOp::Gt => CompareOp::Gt,
        BinaryOp::Ge => CompareOp::Ge,
        _ => return None,
    })
}

fn literal_of(e: &Expr) -> (String, LiteralKind) {
    match &e.kind {
        ExprKind::Integer(n) => (n.to_string(), LiteralKind::Integer),
        ExprKind::Float(f) => (f.clone(), LiteralKind::Float),
        ExprKind::Str(s) => (s.clone(), LiteralKind::Text),
        _ => (e.text.clone(), LiteralKind::Text),
    }
}

/// `HAVING agg op literal` as a filter over merged rows.
pub fn having_filter(select: &Select) -> Option<HavingFilter> {
    let (op, left, right) = select.having.as_ref()?.binary()?;
    let op = compare_op(op)?;
    let column_index = having_column(select, left)?;
    let (value, literal) = literal_of(right);
    Some(HavingFilter {
        column_index,
        op,
        value,
        literal,
    })
}

/// Appends every plain select-list column not already sorted on.
fn append_order_by(select: &mut Select, flags: &RoutingFlags) {
    let extra: Vec<OrderByItem> = select
        .columns
        .iter()
        .filter(|c| !flags.has(c.id, ORDER_BY) && !c.is_function() && !c.is_star())
        .map(|c| {
            let expr = match &c.alias {
                Some(alias) => Expr::new(c.id, ExprKind::Id(alias.clone()), alias.clone()),
                None => {
                    let mut e = c.clone();
                    e.alias = None;
                    e
                }
            };
            OrderByItem { expr, desc: false }
        })
        .collect();
    select.order_by.extend(extra);
}

/// Reshapes a fanned-out SELECT. Returns the new select and whether it
/// differs from the client's.
pub fn modify_select(
    select: &Select,
    flags: &RoutingFlags,
    group_count: usize,
) -> (Select, Option<HavingFilter>, bool) {
    let mut modified = select.clone();
    let mut changed = false;

    let having = having_filter(select);
    if modified.having.take().is_some() {
        changed = true;
    }

    if group_count > 1 {
        if let (Some(limit), Some(offset)) = (modified.limit, modified.offset) {
            if offset > 0 {
                modified.limit = Some(limit.saturating_add(offset));
                modified.offset = Some(0);
                changed = true;
            }
        }
    }

    let needs_order = flags.rewrite_order_by
        || (!modified.group_by.is_empty() && modified.order_by.is_empty());
    if needs_order {
        let before = modified.order_by.len();
        append_order_by(&mut modified, flags);
        changed |= modified.order_by.len() != before;
    }

    (modified, having, changed)
}

fn partition_name(
    partitioned: &HashSet<NodeId>,
    src: &SourceItem,
    group: &str,
) -> Option<String> {
    if !partitioned.contains(&src.id) {
        return None;
    }
    src.table.as_ref().map(|t| format!("{t}_{group}"))
}

fn with_explain(explain: bool, sql: String) -> String {
    if explain {
        format!("EXPLAIN {sql}")
    } else {
        sql
    }
}

/// Prints `statement` once per routed group with partition table names.
fn print_partitioned(parsed: &ParsedStatement, select: Option<&Select>, outcome: &mut RoutingOutcome) {
    let groups: Vec<String> = outcome.plan.groups().to_vec();
    for group in &groups {
        let partitioned = &outcome.partitioned;
        let rename = |src: &SourceItem| partition_name(partitioned, src, group);
        let printer = SqlPrinter::with_table_renamer(&rename);
        let sql = match (&parsed.statement, select) {
            (_, Some(select)) => printer.select(select),
            (Statement::Update(update), None) => printer.update(update),
            (Statement::Delete(delete), None) => printer.delete(delete),
            (Statement::Insert(insert), None) => printer.insert(insert, None),
            _ => continue,
        };
        outcome
            .plan
            .add_group_sql(group, with_explain(parsed.explain, sql));
    }
}

/// Rewrites the routed statement into the SQL each group runs.
///
/// Only statements reaching more than one group are reshaped; a single
/// shard answers the client's text unchanged unless partition names must be
/// substituted.
pub fn rewrite_statement(
    parsed: &ParsedStatement,
    outcome: &mut RoutingOutcome,
    partition_mode: bool,
) -> Rewritten {
    if outcome.is_unparsable() || outcome.plan.rewritten_completely {
        return Rewritten::default();
    }
    let group_count = outcome.plan.group_count();
    let fan_out = outcome.code.is_sharded() && group_count > 1;

    let Some(select) = parsed.select() else {
        if partition_mode && !outcome.partitioned.is_empty() {
            print_partitioned(parsed, None, outcome);
        }
        return Rewritten::default();
    };

    if !fan_out && !(partition_mode && !outcome.partitioned.is_empty()) {
        return Rewritten {
            select: Some(select.clone()),
            having: None,
        };
    }

    let (modified, having, changed) = if fan_out {
        modify_select(select, &outcome.flags, group_count)
    } else {
        (select.clone(), None, false)
    };

    if partition_mode && !outcome.partitioned.is_empty() {
        print_partitioned(parsed, Some(&modified), outcome);
    } else if changed {
        let sql = with_explain(parsed.explain, SqlPrinter::new().select(&modified));
        debug!(sql = %sql, "rewrote select for fan-out");
        outcome.plan.set_modified_sql(sql);
    }

    Rewritten {
        select: Some(modified),
        having,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::RoutingFlags;
    use shardgate_sql::StatementParser;

    fn modify(sql: &str, groups: usize) -> (String, Option<HavingFilter>, bool) {
        let parsed = StatementParser::new().parse(sql).unwrap();
        let flags = RoutingFlags::new();
        let (select, having, changed) = modify_select(parsed.select().unwrap(), &flags, groups);
        (SqlPrinter::new().select(&select), having, changed)
    }

    #[test]
    fn offset_folds_into_limit() {
        let (sql, _, changed) = modify("SELECT a FROM t ORDER BY a LIMIT 10 OFFSET 5", 2);
        assert!(changed);
        assert!(sql.ends_with("ORDER BY a LIMIT 0, 15"), "{sql}");

        let (_, _, changed) = modify("SELECT a FROM t ORDER BY a LIMIT 10 OFFSET 5", 1);
        assert!(!changed);
    }

    #[test]
    fn group_by_gains_order_by() {
        let (sql, _, changed) = modify("SELECT a, COUNT(*) FROM t GROUP BY a", 2);
        assert!(changed);
        assert!(sql.ends_with("GROUP BY a ORDER BY a"), "{sql}");

        let (sql, _, _) = modify("SELECT a AS x, COUNT(*) FROM t GROUP BY a", 2);
        assert!(sql.ends_with("ORDER BY x"), "{sql}");
    }

    #[test]
    fn having_is_detached() {
        let (sql, having, changed) = modify(
            "SELECT a, COUNT(*) FROM t GROUP BY a HAVING COUNT(*) >= 3 ORDER BY a",
            2,
        );
        assert!(changed);
        assert!(!sql.contains("HAVING"), "{sql}");
        let having = having.unwrap();
        assert_eq!(having.column_index, 1);
        assert_eq!(having.op, CompareOp::Ge);
        assert_eq!(having.value, "3");
        assert_eq!(having.literal, LiteralKind::Integer);

        let (_, having, _) = modify(
            "SELECT a, MAX(b) FROM t GROUP BY a HAVING MAX(b) = 'x' ORDER BY a",
            2,
        );
        let having = having.unwrap();
        assert_eq!(having.value, "x");
        assert_eq!(having.literal, LiteralKind::Text);
    }

    #[test]
    fn partition_names_only_for_marked_sources() {
        let parsed = StatementParser::new()
            .parse("SELECT * FROM orders o JOIN regions r ON o.r = r.id")
            .unwrap();
        let select = parsed.select().unwrap();
        let marked: HashSet<NodeId> = [select.from[0].id].into_iter().collect();
        assert_eq!(
            partition_name(&marked, &select.from[0], "p1").as_deref(),
            Some("orders_p1")
        );
        assert!(partition_name(&marked, &select.from[1], "p1").is_none());
    }
}
