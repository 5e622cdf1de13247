use super::{restrictions, unparsable, RouteContext, RoutingCode};
use crate::error::Result;
use crate::join::join_on_sharding_key;
use crate::partition::{
    filter_expr, optimize_sharding_condition, partition_groups, KeyColumn, KeyError,
};
use crate::plan::TableType;
use shardgate_common::ShardCatalog;
use shardgate_sql::ast::{BinaryOp, ExprKind};
use shardgate_sql::{Expr, Select, SourceItem};

/// Selects under `IN (...)` and `EXISTS (...)` reachable through AND/OR.
fn where_subqueries(where_clause: Option<&Expr>) -> Vec<&Select> {
    let mut out = Vec::new();
    let mut stack: Vec<&Expr> = where_clause.into_iter().collect();
    while let Some(e) = stack.pop() {
        match &e.kind {
            ExprKind::Binary {
                op: BinaryOp::And | BinaryOp::Or,
                left,
                right,
            } => {
                stack.push(right);
                stack.push(left);
            }
            ExprKind::InSubquery { subquery, .. } | ExprKind::Exists { subquery, .. } => {
                out.push(&**subquery)
            }
            _ => {}
        }
    }
    out
}

/// First sharded table named directly in the FROM lists of `select`'s UNION chain.
fn subquery_sharded_table<'s>(
    catalog: &ShardCatalog,
    select: &'s Select,
    db: &str,
) -> Option<&'s SourceItem> {
    select.chain().into_iter().find_map(|s| {
        s.from.iter().find(|src| {
            src.table
                .as_deref()
                .is_some_and(|t| catalog.sharded_table(src.db_or(db), t).is_some())
        })
    })
}

fn subquery_single_tables<'s>(
    ctx: &RouteContext<'_>,
    select: &'s Select,
    db: &str,
    out: &mut Vec<&'s SourceItem>,
) {
    for s in select.chain() {
        for src in &s.from {
            if ctx.is_single(src.db_or(db), src) {
                out.push(src);
            }
        }
    }
}

/// Routes one branch of a UNION chain, adding its groups to the plan.
fn route_select(ctx: &mut RouteContext<'_>, select: &Select, top: &Select) -> Result<RoutingCode> {
    if select.from.is_empty() {
        ctx.fixed_group();
        return Ok(RoutingCode::FixedGroup);
    }

    let partition_mode = ctx.options.partition_mode;
    let subqueries = where_subqueries(select.where_clause.as_ref());
    let mut sharding_tables: Vec<&SourceItem> = Vec::new();
    let mut single_tables: Vec<&SourceItem> = Vec::new();

    for src in &select.from {
        let db = src.db_or(ctx.db);
        if let Some(sub) = src.subquery.as_deref() {
            if let Some(inner) = subquery_sharded_table(ctx.catalog, sub, db) {
                restrictions::check_select(
                    top,
                    &mut ctx.flags,
                    ctx.options.allow_nested_subquery,
                )?;
                let inner_db = inner.db_or(db);
                if let Some(info) = inner
                    .table
                    .as_deref()
                    .and_then(|t| ctx.catalog.sharded_table(inner_db, t))
                {
                    ctx.plan.add_groups(ctx.catalog.table_groups(&info));
                }
                ctx.plan.table_type = TableType::Sharded;
                return Ok(RoutingCode::AllShards);
            }
            if !partition_mode {
                subquery_single_tables(ctx, sub, db, &mut single_tables);
            }
            continue;
        }
        if ctx.is_sharded(db, src) {
            sharding_tables.push(src);
        } else if !partition_mode && ctx.is_single(db, src) {
            single_tables.push(src);
        }
    }

    if !single_tables.is_empty() {
        if !sharding_tables.is_empty() {
            return Err(unparsable("JOIN single-table WITH sharding-table"));
        }
        let mut groups = Vec::new();
        for src in &single_tables {
            let db = src.db_or(ctx.db);
            if let Some(info) = src
                .table
                .as_deref()
                .and_then(|t| ctx.catalog.single_table(db, t))
            {
                ShardCatalog::merge_single_table_group(&mut groups, &info);
            }
        }
        if groups.len() > 1 {
            return Err(unparsable("JOIN multiple single-tables not allowed"));
        }
        ctx.plan.add_groups(groups);
        ctx.plan.table_type = TableType::Single;
        return Ok(RoutingCode::FixedGroup);
    }

    if !partition_mode {
        let mut nested_single = Vec::new();
        for sub in &subqueries {
            subquery_single_tables(ctx, sub, ctx.db, &mut nested_single);
        }
        if !nested_single.is_empty() {
            return Err(unparsable("Found single-table in subquery, not allowed"));
        }
    }

    if sharding_tables.is_empty() {
        ctx.fixed_group();
        return Ok(RoutingCode::FixedGroup);
    }
    ctx.plan.table_type = TableType::Sharded;

    if sharding_tables.len() >= 2
        && !join_on_sharding_key(
            ctx.catalog,
            ctx.db,
            &sharding_tables,
            select.where_clause.as_ref(),
            &mut ctx.flags,
        )
    {
        return Err(unparsable(
            "JOIN must inside VDB and have explicit join-on condition",
        ));
    }

    let mut infos = Vec::with_capacity(sharding_tables.len());
    for src in &sharding_tables {
        let db = src.db_or(ctx.db);
        if let Some(info) = src
            .table
            .as_deref()
            .and_then(|t| ctx.catalog.sharded_table(db, t))
        {
            infos.push((*src, info));
        }
    }

    let mut has_key = false;
    for (src, info) in &infos {
        if let Some(key) = KeyColumn::new(src, &info.shard_key) {
            if optimize_sharding_condition(select.where_clause.as_ref(), &key, &mut ctx.flags) > 0 {
                has_key = true;
            }
        }
    }

    let mut narrowed = false;
    if has_key {
        if let Some(where_clause) = &select.where_clause {
            for (_, info) in &infos {
                let mut partitions = ctx.catalog.table_partitions(info);
                match filter_expr(&mut partitions, where_clause, &ctx.flags) {
                    Ok(()) => {
                        let groups = partition_groups(&partitions);
                        narrowed |= !groups.is_empty();
                        ctx.plan.add_groups(groups);
                    }
                    Err(KeyError::Invalid(reason)) => {
                        tracing::debug!(%reason, "invalid sharding key value");
                        return Err(unparsable("sharding key parse error"));
                    }
                    Err(KeyError::Unrecognized) => {
                        ctx.plan.add_groups(ctx.catalog.table_groups(info));
                        return Ok(RoutingCode::AllShards);
                    }
                }
            }
        }
    }

    if narrowed {
        return Ok(RoutingCode::SingleShard);
    }
    for (_, info) in &infos {
        ctx.plan.add_groups(ctx.catalog.table_groups(info));
    }
    Ok(RoutingCode::AllShards)
}

/// The broader of two branch codes in a UNION chain.
fn widest(a: RoutingCode, b: RoutingCode) -> RoutingCode {
    match (a, b) {
        (RoutingCode::AllShards, _) | (_, RoutingCode::AllShards) => RoutingCode::AllShards,
        (RoutingCode::SingleShard, _) | (_, RoutingCode::SingleShard) => RoutingCode::SingleShard,
        _ => b,
    }
}

pub(super) fn route_select_statement(
    ctx: &mut RouteContext<'_>,
    select: &Select,
) -> Result<RoutingCode> {
    let mut code: Option<RoutingCode> = None;
    for branch in select.chain() {
        let rc = route_select(ctx, branch, select)?;
        code = Some(code.map_or(rc, |c| widest(c, rc)));
    }
    let code = code.unwrap_or(RoutingCode::FixedGroup);

    if code.is_sharded() {
        if ctx.plan.group_count() > 1 {
            restrictions::check_select(select, &mut ctx.flags, ctx.options.allow_nested_subquery)?;
        }
        ctx.mark_partitioned(select);
    }
    Ok(code)
}
