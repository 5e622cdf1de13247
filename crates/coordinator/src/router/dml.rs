use super::{unparsable, RouteContext, RoutingCode};
use crate::error::Result;
use crate::flags::{FLIPPED, SHARD_COND};
use crate::partition::{
    filter_expr, optimize_sharding_condition, parse_sharding_value, partition_groups,
    partitions_filter, partitions_get, shard_comparison, Condition, KeyColumn,
};
use crate::plan::TableType;
use shardgate_common::ShardTable;
use shardgate_sql::ast::{BinaryOp, Delete, ExprKind, Insert, Update};
use shardgate_sql::{Expr, SourceItem, SqlPrinter};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

fn write_target(table: &SourceItem) -> Result<&str> {
    table
        .table
        .as_deref()
        .ok_or_else(|| unparsable("unsupported statement format"))
}

/// Writes to a table that is not sharded: its own group when single-copy,
/// every group otherwise.
fn route_unsharded_write(ctx: &mut RouteContext<'_>, db: &str, table: &str) -> RoutingCode {
    if let Some(info) = ctx.catalog.single_table(db, table) {
        ctx.plan.add_group(&info.group);
        ctx.plan.table_type = TableType::Single;
        return RoutingCode::FixedGroup;
    }
    ctx.plan.add_groups(ctx.catalog.all_groups(db));
    ctx.plan.table_type = TableType::Global;
    if ctx.plan.group_count() > 1 {
        RoutingCode::DistributedTransaction
    } else {
        RoutingCode::FixedGroup
    }
}

/// Whether `WHERE` pins the key to exactly the value `SET` writes.
fn restates_key(
    where_clause: Option<&Expr>,
    column: &Expr,
    value: &Expr,
    ctx: &RouteContext<'_>,
) -> bool {
    let Some(root) = where_clause else {
        return false;
    };
    let mut stack = vec![root];
    while let Some(e) = stack.pop() {
        if let ExprKind::Binary { op, left, right } = &e.kind {
            if op.is_logical() {
                stack.push(right);
                stack.push(left);
                continue;
            }
        }
        if !ctx.flags.has(e.id, SHARD_COND) {
            continue;
        }
        let Some((BinaryOp::Eq, cond_value)) = shard_comparison(e, &ctx.flags) else {
            continue;
        };
        let Some((_, left, right)) = e.binary() else {
            continue;
        };
        let key_side = if ctx.flags.has(e.id, FLIPPED) {
            right
        } else {
            left
        };
        let same_column = match (key_side.field_parts(), column.field_parts()) {
            (Some((_, _, a)), Some((_, _, b))) => a.eq_ignore_ascii_case(b),
            _ => false,
        };
        if same_column && cond_value.same_value(value) {
            return true;
        }
    }
    false
}

/// Narrows a sharded UPDATE/DELETE by its key predicates.
fn route_sharded_write(
    ctx: &mut RouteContext<'_>,
    info: &ShardTable,
    where_clause: Option<&Expr>,
    key_occurrences: usize,
) -> Result<RoutingCode> {
    let mut partitions = ctx.catalog.table_partitions(info);
    if key_occurrences > 0 {
        if let Some(w) = where_clause {
            if let Err(e) = filter_expr(&mut partitions, w, &ctx.flags) {
                debug!(error = %e, "cannot narrow write");
                return Err(unparsable("sharding key parse error"));
            }
        }
    }
    ctx.plan.add_groups(partition_groups(&partitions));
    Ok(match ctx.plan.group_count() {
        1 => RoutingCode::SingleShard,
        0 => {
            ctx.plan.add_groups(ctx.catalog.table_groups(info));
            RoutingCode::DistributedTransaction
        }
        _ => RoutingCode::DistributedTransaction,
    })
}

fn sharded_info(ctx: &RouteContext<'_>, db: &str, table: &str) -> Option<Arc<ShardTable>> {
    ctx.catalog.sharded_table(db, table)
}

pub(super) fn route_update(ctx: &mut RouteContext<'_>, update: &Update) -> Result<RoutingCode> {
    let table = write_target(&update.table)?;
    let db = update.table.db_or(ctx.db);
    let Some(info) = sharded_info(ctx, db, table) else {
        return Ok(route_unsharded_write(ctx, db, table));
    };
    ctx.plan.table_type = TableType::Sharded;
    if ctx.options.partition_mode {
        ctx.partitioned.insert(update.table.id);
    }

    let key = KeyColumn::new(&update.table, &info.shard_key)
        .ok_or_else(|| unparsable("unsupported statement format"))?;
    let occurrences =
        optimize_sharding_condition(update.where_clause.as_ref(), &key, &mut ctx.flags);

    for assignment in &update.assignments {
        if !key.matches(&assignment.column) {
            continue;
        }
        let allowed = occurrences == 1
            && restates_key(
                update.where_clause.as_ref(),
                &assignment.column,
                &assignment.value,
                ctx,
            );
        if !allowed {
            return Err(unparsable("update of sharding key is not allowed"));
        }
    }

    route_sharded_write(ctx, &info, update.where_clause.as_ref(), occurrences)
}

pub(super) fn route_delete(ctx: &mut RouteContext<'_>, delete: &Delete) -> Result<RoutingCode> {
    let table = write_target(&delete.table)?;
    let db = delete.table.db_or(ctx.db);
    let Some(info) = sharded_info(ctx, db, table) else {
        return Ok(route_unsharded_write(ctx, db, table));
    };
    ctx.plan.table_type = TableType::Sharded;
    if ctx.options.partition_mode {
        ctx.partitioned.insert(delete.table.id);
    }

    if delete.where_clause.is_none() {
        ctx.plan.add_groups(ctx.catalog.table_groups(&info));
        return Ok(if ctx.plan.group_count() == 1 {
            RoutingCode::SingleShard
        } else {
            RoutingCode::DistributedTransaction
        });
    }

    let key = KeyColumn::new(&delete.table, &info.shard_key)
        .ok_or_else(|| unparsable("unsupported statement format"))?;
    let occurrences =
        optimize_sharding_condition(delete.where_clause.as_ref(), &key, &mut ctx.flags);
    route_sharded_write(ctx, &info, delete.where_clause.as_ref(), occurrences)
}

/// Splits a multi-row INSERT into one statement per target group.
fn insert_multi_value(
    ctx: &mut RouteContext<'_>,
    insert: &Insert,
    info: &ShardTable,
    key_index: usize,
) -> Result<RoutingCode> {
    let partitions = ctx.catalog.table_partitions(info);
    let Some(key_type) = partitions.first().map(|p| p.key_type) else {
        return Err(unparsable("no partition for sharding table"));
    };

    // Ordered by group name so the emitted statements are deterministic.
    let mut rows_by_group: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in insert.rows.iter().enumerate() {
        let Some(value) = row.get(key_index) else {
            return Err(unparsable("no sharding key"));
        };
        let value = parse_sharding_value(value, key_type)
            .map_err(|_| unparsable("sharding key parse error"))?;
        let Some(partition) = partitions_get(&partitions, &Condition::new(BinaryOp::Eq, value))
        else {
            return Err(unparsable("sharding key out of partition range"));
        };
        rows_by_group.entry(partition.group.clone()).or_default().push(i);
    }

    for (group, rows) in &rows_by_group {
        let sql = if ctx.options.partition_mode {
            let table_id = insert.table.id;
            let physical = format!("{}_{}", info.name, group);
            let rename = move |src: &SourceItem| (src.id == table_id).then(|| physical.clone());
            SqlPrinter::with_table_renamer(&rename).insert(insert, Some(rows.as_slice()))
        } else {
            SqlPrinter::new().insert(insert, Some(rows.as_slice()))
        };
        ctx.plan.add_group_sql(group, sql);
    }
    ctx.plan.rewritten_completely = true;
    Ok(if ctx.plan.group_count() > 1 {
        RoutingCode::DistributedTransaction
    } else {
        RoutingCode::FixedGroup
    })
}

pub(super) fn route_insert(ctx: &mut RouteContext<'_>, insert: &Insert) -> Result<RoutingCode> {
    let table = write_target(&insert.table)?;
    let db = insert.table.db_or(ctx.db);
    let Some(info) = sharded_info(ctx, db, table) else {
        if ctx.catalog.single_table(db, table).is_none() {
            if let Some(source) = insert.select.as_deref().and_then(|s| s.from.first()) {
                let source_db = source.db_or(ctx.db);
                if ctx.is_sharded(source_db, source)
                    || (!ctx.options.partition_mode && ctx.is_single(source_db, source))
                {
                    return Err(unparsable("unsupported INSERT format"));
                }
            }
        }
        return Ok(route_unsharded_write(ctx, db, table));
    };
    ctx.plan.table_type = TableType::Sharded;
    if ctx.options.partition_mode {
        ctx.partitioned.insert(insert.table.id);
    }

    if insert.columns.is_empty() {
        return Err(unparsable("INSERT must use explicit column names"));
    }
    let Some(key_index) = insert
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(&info.shard_key))
    else {
        return Err(unparsable(
            "INSERTion into sharding table must use sharding key",
        ));
    };
    if insert.rows.is_empty() {
        return Err(unparsable("no VALUES"));
    }
    if insert.rows.len() > 1 {
        return insert_multi_value(ctx, insert, &info, key_index);
    }

    let Some(value) = insert.rows[0].get(key_index) else {
        return Err(unparsable("no sharding key"));
    };
    let mut partitions = ctx.catalog.table_partitions(&info);
    let Some(key_type) = partitions.first().map(|p| p.key_type) else {
        return Err(unparsable("no partition for sharding table"));
    };
    let value =
        parse_sharding_value(value, key_type).map_err(|_| unparsable("sharding key parse error"))?;
    partitions_filter(&mut partitions, &Condition::new(BinaryOp::Eq, value));
    ctx.plan.add_groups(partition_groups(&partitions));

    match ctx.plan.group_count() {
        1 => Ok(RoutingCode::SingleShard),
        0 => Err(unparsable("sharding key out of partition range")),
        _ => Err(unparsable("sharding key matches more than one partition")),
    }
}
