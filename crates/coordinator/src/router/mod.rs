//! Statement router: decides which shard groups run a statement.
//!
//! Each statement kind has its own entry point. They share one shape:
//! honour an inline directive if present, classify every table as sharded,
//! single-copy or global, narrow sharded tables by their key predicates and
//! return a [`RoutingCode`] telling the caller how to run the plan.

mod dml;
mod other;
pub mod restrictions;
mod select;

use crate::config::Settings;
use crate::error::{CoordinatorError, Result};
use crate::flags::RoutingFlags;
use crate::plan::ShardingPlan;
use shardgate_common::{CatalogHandle, ShardCatalog};
use shardgate_sql::ast::Statement;
use shardgate_sql::{NodeId, ParsedStatement, Select, SourceItem};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// How the caller must run a routed statement.
///
/// A closed set: numeric codes the router does not know map to
/// [`RoutingCode::Unparsable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingCode {
    /// The fixed group of the database (unsharded tables, single-copy tables).
    FixedGroup,
    SingleShard,
    /// More than one group is written: wrap in a distributed transaction.
    DistributedTransaction,
    AnyShard,
    AllShards,
    /// Session statements sent to every group.
    All,
    /// `SET autocommit=1`: keep the current connections.
    Same,
    /// `SET autocommit=0` / `START TRANSACTION`: nothing to send yet.
    None,
    PreviousTransactionConnections,
    PreviousWarningConnection,
    Unparsable,
}

impl RoutingCode {
    pub fn code(&self) -> i32 {
        match self {
            RoutingCode::FixedGroup => 0,
            RoutingCode::SingleShard => 1,
            RoutingCode::DistributedTransaction => 2,
            RoutingCode::AnyShard => 3,
            RoutingCode::AllShards => 4,
            RoutingCode::All => 5,
            RoutingCode::Same => 6,
            RoutingCode::PreviousWarningConnection => 7,
            RoutingCode::None => 8,
            RoutingCode::PreviousTransactionConnections => 9,
            RoutingCode::Unparsable => -1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => RoutingCode::FixedGroup,
            1 => RoutingCode::SingleShard,
            2 => RoutingCode::DistributedTransaction,
            3 => RoutingCode::AnyShard,
            4 => RoutingCode::AllShards,
            5 => RoutingCode::All,
            6 => RoutingCode::Same,
            7 => RoutingCode::PreviousWarningConnection,
            8 => RoutingCode::None,
            9 => RoutingCode::PreviousTransactionConnections,
            _ => RoutingCode::Unparsable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingCode::FixedGroup => "use-fixed-group",
            RoutingCode::SingleShard => "use-single-shard",
            RoutingCode::DistributedTransaction => "use-distributed-transaction",
            RoutingCode::AnyShard => "use-any-shard",
            RoutingCode::AllShards => "use-all-shards-broadcast",
            RoutingCode::All => "use-all",
            RoutingCode::Same => "use-same",
            RoutingCode::None => "use-none",
            RoutingCode::PreviousTransactionConnections => "use-previous-transaction-connections",
            RoutingCode::PreviousWarningConnection => "use-previous-warning-connection",
            RoutingCode::Unparsable => "unparsable",
        }
    }

    /// Whether the plan touches shards through the scatter path.
    pub fn is_sharded(&self) -> bool {
        matches!(self, RoutingCode::SingleShard | RoutingCode::AllShards)
    }
}

impl fmt::Display for RoutingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub default_db: String,
    pub fixture: u32,
    pub allow_nested_subquery: bool,
    pub partition_mode: bool,
}

impl From<&Settings> for RouterOptions {
    fn from(s: &Settings) -> Self {
        Self {
            default_db: s.default_db.clone(),
            fixture: s.fixture,
            allow_nested_subquery: s.allow_nested_subquery,
            partition_mode: s.partition_mode,
        }
    }
}

/// Result of one routing pass.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub code: RoutingCode,
    pub plan: ShardingPlan,
    /// Findings about the statement's nodes, consumed by the rewriter.
    pub flags: RoutingFlags,
    /// Sharded table references printed as `<table>_<group>` in partition mode.
    pub partitioned: HashSet<NodeId>,
    /// Client-visible reason when `code` is [`RoutingCode::Unparsable`].
    pub message: Option<String>,
}

impl RoutingOutcome {
    pub fn is_unparsable(&self) -> bool {
        self.code == RoutingCode::Unparsable
    }
}

/// Per-statement routing state.
pub(crate) struct RouteContext<'a> {
    pub catalog: &'a ShardCatalog,
    pub db: &'a str,
    pub options: &'a RouterOptions,
    pub flags: RoutingFlags,
    pub plan: ShardingPlan,
    pub partitioned: HashSet<NodeId>,
    pub write: bool,
}

impl<'a> RouteContext<'a> {
    pub fn fixed_group(&mut self) {
        if let Some(g) = self.catalog.fixed_group(self.db, self.options.fixture) {
            self.plan.add_group(&g);
        }
    }

    pub fn is_sharded(&self, db: &str, src: &SourceItem) -> bool {
        src.table
            .as_deref()
            .is_some_and(|t| self.catalog.sharded_table(db, t).is_some())
    }

    pub fn is_single(&self, db: &str, src: &SourceItem) -> bool {
        src.table
            .as_deref()
            .is_some_and(|t| self.catalog.single_table(db, t).is_some())
    }

    /// Records every sharded table reachable from `select` for per-group
    /// renaming.
    pub fn mark_partitioned(&mut self, select: &Select) {
        if !self.options.partition_mode {
            return;
        }
        let mut pending = vec![select];
        while let Some(s) = pending.pop() {
            for src in &s.from {
                if self.is_sharded(src.db_or(self.db), src) {
                    self.partitioned.insert(src.id);
                }
                pending.extend(src.subquery.as_deref());
            }
            pending.extend(s.where_subqueries());
            pending.extend(s.prior.as_deref());
        }
    }
}

pub(crate) fn unparsable(msg: impl Into<String>) -> CoordinatorError {
    CoordinatorError::Unparsable(msg.into())
}

/// Routes statements against the live shard catalog.
#[derive(Debug, Clone)]
pub struct Router {
    catalog: CatalogHandle,
    options: RouterOptions,
}

impl Router {
    pub fn new(catalog: CatalogHandle, options: RouterOptions) -> Self {
        Self { catalog, options }
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    /// Routes `parsed` with `session_db` (or the configured default) as the
    /// current database. Refusals come back as [`RoutingCode::Unparsable`]
    /// with a message and no target groups.
    pub fn route(&self, parsed: &ParsedStatement, session_db: Option<&str>) -> RoutingOutcome {
        let catalog = self.catalog.current();
        let db = session_db
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.options.default_db);
        let mut ctx = RouteContext {
            catalog: &catalog,
            db,
            options: &self.options,
            flags: RoutingFlags::new(),
            plan: ShardingPlan::new(parsed.sql.clone()),
            partitioned: HashSet::new(),
            write: parsed.statement.is_write(),
        };

        let result = dispatch(&mut ctx, parsed);
        let RouteContext {
            flags,
            mut plan,
            partitioned,
            ..
        } = ctx;
        match result {
            Ok(code) => {
                plan.sort_groups();
                debug!(code = %code, groups = ?plan.groups(), sql = %parsed.sql, "routed statement");
                RoutingOutcome {
                    code,
                    plan,
                    flags,
                    partitioned,
                    message: None,
                }
            }
            Err(e) => {
                warn!(error = %e, sql = %parsed.sql, "unparsable statement");
                plan.clear_groups();
                RoutingOutcome {
                    code: RoutingCode::Unparsable,
                    plan,
                    flags,
                    partitioned,
                    message: Some(e.to_string()),
                }
            }
        }
    }
}

fn dispatch(ctx: &mut RouteContext<'_>, parsed: &ParsedStatement) -> Result<RoutingCode> {
    if !ctx.options.partition_mode {
        if let Some(directive) = &parsed.directive {
            if directive.group.is_some() || directive.table.is_some() {
                return other::route_by_directive(ctx, directive, &parsed.statement);
            }
        }
    }

    match &parsed.statement {
        Statement::Select(select) => select::route_select_statement(ctx, select),
        Statement::Update(update) => dml::route_update(ctx, update),
        Statement::Insert(insert) => dml::route_insert(ctx, insert),
        Statement::Delete(delete) => dml::route_delete(ctx, delete),
        stmt => other::route_other(ctx, stmt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_are_unparsable() {
        assert_eq!(RoutingCode::from_code(4), RoutingCode::AllShards);
        assert_eq!(RoutingCode::from_code(42), RoutingCode::Unparsable);
        assert_eq!(RoutingCode::from_code(-7), RoutingCode::Unparsable);
        for code in -1..=9 {
            assert_eq!(RoutingCode::from_code(code).code(), code);
        }
        assert_eq!(RoutingCode::SingleShard.to_string(), "use-single-shard");
    }
}
