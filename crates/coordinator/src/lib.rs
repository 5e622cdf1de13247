//! Routing and scatter-gather coordination for Shardgate.
//!
//! A client statement goes through four steps: the [`router`] picks the
//! shard groups and a routing code, [`rewrite`] reshapes the SQL the groups
//! receive, [`merge_spec`] describes how their answers combine, and the
//! [`distributed_executor`] runs the plan and drives the merge.

pub mod config;
pub mod distributed_executor;
pub mod error;
pub mod flags;
pub mod join;
pub mod merge_spec;
pub mod partition;
pub mod plan;
pub mod rewrite;
pub mod router;
pub mod service;

pub use config::Settings;
pub use distributed_executor::{DistributedExecutor, ShardConnector};
pub use error::{CoordinatorError, Result};
pub use plan::{ShardingPlan, TableType};
pub use router::{Router, RouterOptions, RoutingCode, RoutingOutcome};
pub use service::{prepare_parsed, CoordinatorService, PreparedStatement};
