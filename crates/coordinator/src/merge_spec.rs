//! Derives the merge description of a routed statement.

use crate::plan::TableType;
use crate::rewrite::Rewritten;
use crate::router::RoutingOutcome;
use shardgate_engine::{AggregateItem, AggregateKind, ColumnRef, MergeKind, MergeSpec, OrderItem};
use shardgate_sql::ast::{AggregateFn, ExprKind};
use shardgate_sql::{Expr, ParsedStatement, Select, Statement};

fn column_ref(e: &Expr) -> ColumnRef {
    match &e.kind {
        ExprKind::Integer(n) if *n > 0 => ColumnRef::Ordinal(*n as u64),
        ExprKind::Id(name) => ColumnRef::name(name.clone()),
        ExprKind::Dotted(parts) => match parts.as_slice() {
            [.., table, column] => ColumnRef::qualified(table.clone(), column.clone()),
            _ => ColumnRef::name(e.text.clone()),
        },
        _ => ColumnRef::name(e.text.clone()),
    }
}

fn aggregate_kind(f: AggregateFn) -> AggregateKind {
    match f {
        AggregateFn::Count => AggregateKind::Count,
        AggregateFn::Sum => AggregateKind::Sum,
        AggregateFn::Avg => AggregateKind::Avg,
        AggregateFn::Max => AggregateKind::Max,
        AggregateFn::Min => AggregateKind::Min,
    }
}

/// Sort, grouping and aggregates of the select shards run; paging and
/// DISTINCT of the select the client sent.
///
/// A shard select that still carries a non-zero OFFSET skips the rows itself,
/// so the merge applies no offset of its own.
fn select_spec(shard_select: &Select, client: &Select, merged_output_size: usize) -> MergeSpec {
    let offset = match shard_select.offset {
        Some(skipped) if skipped > 0 => 0,
        _ => client.offset.unwrap_or(0),
    };
    MergeSpec {
        kind: MergeKind::Select,
        order_by: shard_select
            .order_by
            .iter()
            .map(|o| OrderItem {
                column: column_ref(&o.expr),
                desc: o.desc,
            })
            .collect(),
        group_by: shard_select.group_by.iter().map(column_ref).collect(),
        aggregates: shard_select
            .columns
            .iter()
            .enumerate()
            .filter_map(|(position, c)| {
                c.aggregate().map(|(f, _)| AggregateItem {
                    position,
                    function: aggregate_kind(f),
                })
            })
            .collect(),
        distinct: client.distinct,
        limit: client.limit,
        offset,
        having: None,
        merged_output_size,
    }
}

/// Builds the [`MergeSpec`] for `parsed` once it has been routed and
/// rewritten.
pub fn build_merge_spec(
    parsed: &ParsedStatement,
    outcome: &RoutingOutcome,
    rewritten: Rewritten,
    merged_output_size: usize,
) -> MergeSpec {
    match &parsed.statement {
        Statement::ShowWarnings => MergeSpec {
            kind: MergeKind::ShowWarnings,
            merged_output_size,
            ..MergeSpec::default()
        },
        Statement::Select(client) if parsed.explain => MergeSpec {
            kind: MergeKind::Explain,
            distinct: client.distinct,
            merged_output_size,
            ..MergeSpec::default()
        },
        Statement::Select(client) => {
            let shard_select = rewritten.select.as_ref().unwrap_or(client);
            let mut spec = select_spec(shard_select, client, merged_output_size);
            spec.having = rewritten.having;
            spec
        }
        _ if parsed.explain => MergeSpec {
            kind: MergeKind::Explain,
            merged_output_size,
            ..MergeSpec::default()
        },
        _ => MergeSpec {
            merged_output_size,
            ..MergeSpec::modify(outcome.plan.table_type == TableType::Global)
        },
    }
}
