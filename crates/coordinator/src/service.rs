use crate::config::Settings;
use crate::distributed_executor::{DistributedExecutor, ShardConnector};
use crate::error::{CoordinatorError, Result};
use crate::merge_spec::build_merge_spec;
use crate::rewrite::rewrite_statement;
use crate::router::{Router, RouterOptions, RoutingOutcome};
use futures::stream::BoxStream;
use shardgate_common::sharding::load_catalog;
use shardgate_common::CatalogHandle;
use shardgate_engine::{MergeSpec, Packet};
use shardgate_sql::{ParsedStatement, StatementParser};
use std::sync::Arc;
use tracing::info;

/// A statement routed, rewritten and ready to run.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub parsed: ParsedStatement,
    pub outcome: RoutingOutcome,
    pub spec: MergeSpec,
}

impl PreparedStatement {
    /// The SQL each routed group receives, in group order.
    pub fn group_sql(&self) -> Vec<(&str, &str)> {
        self.outcome
            .plan
            .groups()
            .iter()
            .map(|g| (g.as_str(), self.outcome.plan.get_sql_for_group(g)))
            .collect()
    }
}

/// Routes, rewrites and describes the merge of an already parsed statement.
pub fn prepare_parsed(
    router: &Router,
    settings: &Settings,
    parsed: ParsedStatement,
    session_db: Option<&str>,
) -> PreparedStatement {
    let mut outcome = router.route(&parsed, session_db);
    let rewritten = rewrite_statement(&parsed, &mut outcome, settings.partition_mode);
    let spec = build_merge_spec(&parsed, &outcome, rewritten, settings.merged_output_size);
    PreparedStatement {
        parsed,
        outcome,
        spec,
    }
}

/// Front door of the coordinator: parse, route, rewrite and execute.
pub struct CoordinatorService<C: ShardConnector> {
    settings: Settings,
    parser: StatementParser,
    router: Router,
    executor: DistributedExecutor<C>,
}

impl<C: ShardConnector> CoordinatorService<C> {
    pub fn new(settings: Settings, catalog: CatalogHandle, connector: Arc<C>) -> Self {
        let router = Router::new(catalog, RouterOptions::from(&settings));
        let executor = DistributedExecutor::new(connector, settings.shard_timeout());
        Self {
            settings,
            parser: StatementParser::new(),
            router,
            executor,
        }
    }

    /// Builds the service with the catalog named by `settings.sharding_config`.
    pub fn from_settings(settings: Settings, connector: Arc<C>) -> Result<Self> {
        let catalog = load_catalog(&settings.sharding_config)?;
        info!(
            path = %settings.sharding_config,
            tables = catalog.table_count(),
            "loaded shard catalog"
        );
        Ok(Self::new(settings, CatalogHandle::new(catalog), connector))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Swaps in a freshly loaded catalog; statements already routed keep
    /// the one they started with.
    pub fn reload_catalog(&self) -> Result<()> {
        let catalog = load_catalog(&self.settings.sharding_config)?;
        info!(tables = catalog.table_count(), "reloaded shard catalog");
        self.router.catalog().replace(catalog);
        Ok(())
    }

    pub fn prepare(&self, sql: &str, session_db: Option<&str>) -> Result<PreparedStatement> {
        let parsed = self.parser.parse(sql)?;
        Ok(prepare_parsed(&self.router, &self.settings, parsed, session_db))
    }

    /// Runs a prepared statement on its groups and returns the merged
    /// response packets.
    pub async fn execute(
        &self,
        prepared: PreparedStatement,
    ) -> Result<BoxStream<'static, Vec<Packet>>> {
        if prepared.outcome.is_unparsable() {
            return Err(CoordinatorError::Unparsable(
                prepared.outcome.message.unwrap_or_default(),
            ));
        }
        self.executor
            .execute(&prepared.outcome.plan, prepared.spec)
            .await
    }

    pub async fn query(
        &self,
        sql: &str,
        session_db: Option<&str>,
    ) -> Result<BoxStream<'static, Vec<Packet>>> {
        let prepared = self.prepare(sql, session_db)?;
        self.execute(prepared).await
    }
}
