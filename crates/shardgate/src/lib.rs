//! Shardgate: a sharding core for MySQL proxies.
//!
//! Re-exports the component crates and holds the pieces of the command line
//! tool that are worth testing on their own.

pub use shardgate_common as common;
pub use shardgate_coordinator as coordinator;
pub use shardgate_engine as engine;
pub use shardgate_sql as sql;

use shardgate_common::ShardCatalog;
use shardgate_coordinator::PreparedStatement;
use std::fmt::Write;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, honouring `RUST_LOG` and defaulting to
/// `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Human-readable routing report of a prepared statement.
pub fn describe(prepared: &PreparedStatement) -> String {
    let outcome = &prepared.outcome;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "statement: {}",
        prepared.parsed.statement.kind_name()
    );
    let _ = writeln!(out, "code:      {} ({})", outcome.code, outcome.code.code());
    if let Some(message) = &outcome.message {
        let _ = writeln!(out, "error:     {message}");
        return out;
    }
    let _ = writeln!(out, "table:     {:?}", outcome.plan.table_type);
    for (group, sql) in prepared.group_sql() {
        let _ = writeln!(out, "  {group}: {sql}");
    }
    let spec = &prepared.spec;
    let _ = writeln!(out, "merge:     {:?}", spec.kind);
    if !spec.order_by.is_empty() {
        let _ = writeln!(out, "  order by:   {:?}", spec.order_by);
    }
    if !spec.group_by.is_empty() {
        let _ = writeln!(out, "  group by:   {:?}", spec.group_by);
    }
    if !spec.aggregates.is_empty() {
        let _ = writeln!(out, "  aggregates: {:?}", spec.aggregates);
    }
    if let Some(having) = &spec.having {
        let _ = writeln!(out, "  having:     {having:?}");
    }
    if spec.limit.is_some() || spec.offset > 0 {
        let _ = writeln!(out, "  limit:      {:?} offset {}", spec.limit, spec.offset);
    }
    out
}

/// One-line summary of a loaded catalog.
pub fn catalog_summary(catalog: &ShardCatalog) -> String {
    format!("{} tables configured", catalog.table_count())
}
