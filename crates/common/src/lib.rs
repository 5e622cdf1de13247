//! Common crate
//!
//! Shared error handling and shard metadata for Shardgate.
//!
//! # Example
//! ```rust
//! use shardgate_common::sharding::load_catalog_from_str;
//! let catalog = load_catalog_from_str(
//!     r#"{"vdb": [{"id": 1, "type": "INT", "method": "hash", "num": 1,
//!         "partitions": {"g1": [0]}}],
//!       "table": [{"vdb": 1, "db": "d", "table": "t", "pkey": "id"}]}"#,
//! )
//! .unwrap();
//! assert!(catalog.sharded_table("d", "t").is_some());
//! ```

pub mod catalog;
pub mod error;
pub mod sharding;

pub use catalog::{
    CatalogHandle, KeyType, Partition, PartitionBounds, ShardCatalog, ShardMethod, ShardTable,
    SingleTable, TableKind, Vdb,
};
pub use error::{Error, Result, Stage};
