//! Engine crate
//!
//! Merges the result streams of several shards into the single MySQL
//! response a client expects: ORDER BY through a k-way heap, GROUP BY and
//! aggregates by folding partial rows, DISTINCT, HAVING and LIMIT/OFFSET
//! applied to the merged stream.
//!
//! # Example
//! ```rust
//! use shardgate_engine::{MergeSpec, MergeState, MergeStatus, Packet, ShardBatch};
//!
//! let mut state = MergeState::new(MergeSpec::modify(false), 1);
//! let ok = Packet::from_payload(1, &[0x00, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00]);
//! let status = state.advance(ShardBatch::new(0, vec![ok], true)).unwrap();
//! assert!(matches!(status, MergeStatus::Done(_)));
//! ```

pub mod aggregate;
pub mod compare;
pub mod decimal;
pub mod descriptors;
pub mod error;
pub mod heap;
pub mod merge;
pub mod packet;
pub mod reduce;

pub use compare::{CompareFamily, FieldType};
pub use descriptors::{
    AggregateItem, AggregateKind, ColumnRef, CompareOp, HavingFilter, LiteralKind, MergeKind,
    MergeSpec, OrderItem,
};
pub use error::{MergeError, Result};
pub use merge::{MergeState, MergeStatus, ShardBatch};
pub use packet::{ErrPacket, FieldDef, OkPacket, Packet, PacketKind};
pub use reduce::{check_dist_tran_resultset, merge_for_modify};
