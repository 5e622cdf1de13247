use crate::packet::{ErrPacket, Packet};
use thiserror::Error;

/// MySQL `ER_UNKNOWN_ERROR`, reported for every merge-stage failure.
pub const ER_MERGE_FAILED: u16 = 1105;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("field count differs between shards: {0} vs {1}")]
    FieldCountMismatch(u64, u64),

    #[error("malformed packet from shard {shard}: {reason}")]
    Malformed { shard: usize, reason: String },

    #[error("{0}")]
    Resolve(String),

    #[error("unknown field type {0:#04x}")]
    UnknownType(u8),

    #[error("str num is not supported: {0}")]
    NotNumeric(String),

    #[error("column value longer than {0} bytes")]
    ValueTooLong(usize),

    #[error("record too long for group by")]
    RecordTooLong,

    #[error("string is not valid for aggregate function {0}")]
    StringAggregate(&'static str),

    #[error("{0} cannot be merged across shards")]
    UnsupportedAggregate(&'static str),

    #[error("shard {0} closed its stream before the end of the result")]
    Truncated(usize),

    #[error("no response from shard {0}")]
    MissingResponse(usize),
}

impl MergeError {
    /// Client-visible ERR packet standing in for the whole result.
    pub fn to_err_packet(&self, seq: u8) -> Packet {
        ErrPacket {
            code: ER_MERGE_FAILED,
            sqlstate: "HY000".to_string(),
            message: self.to_string(),
        }
        .to_packet(seq)
    }
}

impl From<MergeError> for shardgate_common::Error {
    fn from(e: MergeError) -> Self {
        shardgate_common::Error::Merge(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;
