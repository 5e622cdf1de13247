use super::{unparsable, RouteContext, RoutingCode};
use crate::error::Result;
use crate::partition::{
    partition_groups, partitions_filter, string_to_sharding_value, Condition,
};
use crate::plan::TableType;
use shardgate_sql::ast::{BinaryOp, Statement};
use shardgate_sql::RoutingDirective;

fn is_ddl(statement: &Statement) -> bool {
    matches!(statement, Statement::Ddl | Statement::DropDatabase(_))
}

fn directive_code(ctx: &RouteContext<'_>, statement: &Statement) -> RoutingCode {
    if ctx.write && !is_ddl(statement) && ctx.plan.group_count() > 1 {
        RoutingCode::DistributedTransaction
    } else {
        RoutingCode::SingleShard
    }
}

/// Routes by an inline `table=`/`key=` or `group=` directive.
pub(super) fn route_by_directive(
    ctx: &mut RouteContext<'_>,
    directive: &RoutingDirective,
    statement: &Statement,
) -> Result<RoutingCode> {
    if let Some(target) = &directive.table {
        let (db, table) = match target.rsplit_once('.') {
            Some((db, table)) => (db, table),
            None => (ctx.db, target.as_str()),
        };
        let info = ctx.catalog.sharded_table(db, table);
        let mut partitions = info
            .as_ref()
            .map(|t| ctx.catalog.table_partitions(t))
            .unwrap_or_default();
        if let Some(key) = &directive.key {
            let Some(info) = &info else {
                return Err(unparsable(format!("no such table: {target}")));
            };
            let Some(key_type) = partitions.first().map(|p| p.key_type) else {
                return Err(unparsable(format!("no such table: {}", info.name)));
            };
            let value = string_to_sharding_value(key, key_type)
                .map_err(|_| unparsable(format!("comment error: {key}")))?;
            partitions_filter(&mut partitions, &Condition::new(BinaryOp::Eq, value));
        }
        ctx.plan.add_groups(partition_groups(&partitions));
        ctx.plan.table_type = TableType::Sharded;
        return Ok(directive_code(ctx, statement));
    }

    if let Some(pattern) = &directive.group {
        let groups = ctx.catalog.find_groups(ctx.db, pattern);
        if groups.is_empty() {
            return Err(unparsable(format!(
                "no group: {pattern} for db: {}",
                ctx.db
            )));
        }
        ctx.plan.add_groups(groups);
        return Ok(directive_code(ctx, statement));
    }

    Err(unparsable("comment error, unknown property"))
}

/// Everything except SELECT/INSERT/UPDATE/DELETE.
pub(super) fn route_other(ctx: &mut RouteContext<'_>, statement: &Statement) -> Result<RoutingCode> {
    match statement {
        Statement::ShowWarnings => Ok(RoutingCode::PreviousWarningConnection),
        Statement::ShowTable { db, table, .. } => {
            let db = db.as_deref().unwrap_or(ctx.db);
            if ctx.catalog.sharded_table(db, table).is_some() {
                if let Some(g) = ctx.catalog.any_group(db) {
                    ctx.plan.add_group(&g);
                }
                return Ok(RoutingCode::AnyShard);
            }
            if !ctx.options.partition_mode {
                if let Some(single) = ctx.catalog.single_table(db, table) {
                    ctx.plan.add_group(&single.group);
                    return Ok(RoutingCode::FixedGroup);
                }
            }
            ctx.fixed_group();
            Ok(RoutingCode::FixedGroup)
        }
        Statement::Set { autocommit } => match autocommit {
            Some(true) => Ok(RoutingCode::Same),
            Some(false) => Ok(RoutingCode::None),
            None => {
                ctx.plan.add_groups(ctx.catalog.all_groups(ctx.db));
                Ok(RoutingCode::All)
            }
        },
        Statement::StartTransaction => Ok(RoutingCode::None),
        Statement::Commit | Statement::Rollback => Ok(RoutingCode::PreviousTransactionConnections),
        Statement::Call => Err(unparsable("CALL is not supported on sharded database")),
        Statement::Ddl | Statement::DropDatabase(_) => {
            if ctx.options.partition_mode {
                return Err(unparsable("DDL is not allowed for partition until now"));
            }
            ctx.plan.add_groups(ctx.catalog.all_groups(ctx.db));
            Ok(RoutingCode::All)
        }
        Statement::Unsupported(reason) => Err(unparsable(reason.clone())),
        _ => {
            ctx.fixed_group();
            Ok(RoutingCode::FixedGroup)
        }
    }
}
