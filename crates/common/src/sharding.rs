//! Loading of the sharding JSON document into a [`ShardCatalog`].

use crate::catalog::{
    KeyType, Partition, PartitionBounds, ShardCatalog, ShardMethod, ShardTable, SingleTable, Vdb,
    MAX_HASH_BUCKETS,
};
use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VdbId {
    Num(u32),
    Text(String),
}

impl VdbId {
    fn resolve(&self) -> Result<u32> {
        match self {
            VdbId::Num(n) => Ok(*n),
            VdbId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::Catalog(format!("invalid vdb id: {s}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VdbEntry {
    id: VdbId,
    #[serde(rename = "type")]
    key_type: String,
    method: String,
    num: u32,
    partitions: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    vdb: VdbId,
    db: String,
    table: String,
    pkey: String,
}

#[derive(Debug, Deserialize)]
struct SingleTableEntry {
    table: String,
    db: String,
    group: String,
}

#[derive(Debug, Deserialize)]
struct ShardingDocument {
    vdb: Vec<VdbEntry>,
    table: Vec<TableEntry>,
    #[serde(default)]
    single_tables: Vec<SingleTableEntry>,
}

/// Converts `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (UTC) to epoch seconds.
pub fn epoch_from_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// A range bound as written in the document, before lows are assigned.
enum RawBound {
    Int(i64),
    Str(Option<String>),
}

fn parse_bound(key_type: KeyType, group: &str, value: &str) -> Result<RawBound> {
    match key_type {
        KeyType::Date | KeyType::DateTime => epoch_from_str(value)
            .map(RawBound::Int)
            .ok_or_else(|| Error::Catalog(format!("wrong datetime bound for {group}: {value}"))),
        KeyType::Str => Ok(RawBound::Str(Some(value.to_string()))),
        KeyType::Int => value
            .trim()
            .parse()
            .map(RawBound::Int)
            .map_err(|_| Error::Catalog(format!("wrong int bound for {group}: {value}"))),
    }
}

fn build_vdb(entry: &VdbEntry) -> Result<Vdb> {
    let id = entry.id.resolve()?;
    let key_type = KeyType::parse(&entry.key_type)
        .ok_or_else(|| Error::Catalog(format!("wrong key type: {}", entry.key_type)))?;
    let method = ShardMethod::parse(&entry.method)
        .ok_or_else(|| Error::Catalog(format!("wrong shard method: {}", entry.method)))?;

    let partitions = match method {
        ShardMethod::Hash => hash_partitions(id, key_type, entry)?,
        ShardMethod::Range => range_partitions(id, key_type, entry)?,
    };
    Ok(Vdb {
        id,
        key_type,
        method,
        bucket_count: entry.num,
        partitions,
    })
}

fn hash_partitions(id: u32, key_type: KeyType, entry: &VdbEntry) -> Result<Vec<Arc<Partition>>> {
    let num = entry.num;
    if num == 0 || num > MAX_HASH_BUCKETS {
        return Err(Error::Catalog(format!(
            "vdb {id}: bucket count {num} outside 1..={MAX_HASH_BUCKETS}"
        )));
    }
    let mut covered = vec![false; num as usize];
    let mut partitions = Vec::with_capacity(entry.partitions.len());
    for (group, value) in &entry.partitions {
        let Value::Array(items) = value else {
            return Err(Error::Catalog(format!(
                "vdb {id}: hash partition {group} must list buckets"
            )));
        };
        let mut buckets = vec![false; num as usize];
        for item in items {
            let bucket = item
                .as_u64()
                .filter(|b| *b < num as u64)
                .ok_or_else(|| {
                    Error::Catalog(format!("vdb {id}: bucket {item} exceeds bucket count"))
                })? as usize;
            buckets[bucket] = true;
            covered[bucket] = true;
        }
        partitions.push(Arc::new(Partition {
            group: group.clone(),
            vdb_id: id,
            key_type,
            bucket_count: num,
            bounds: PartitionBounds::Hash { buckets },
        }));
    }
    if let Some(missing) = covered.iter().position(|c| !c) {
        return Err(Error::Catalog(format!(
            "vdb {id}: hash bucket {missing} has no partition"
        )));
    }
    Ok(partitions)
}

fn range_partitions(id: u32, key_type: KeyType, entry: &VdbEntry) -> Result<Vec<Arc<Partition>>> {
    let mut raw: Vec<(String, RawBound)> = Vec::new();
    for (group, value) in &entry.partitions {
        match value {
            Value::Null => {
                let bound = if key_type.is_numeric() {
                    RawBound::Int(i64::MAX)
                } else {
                    RawBound::Str(None)
                };
                raw.push((group.clone(), bound));
            }
            Value::Number(n) => {
                let n = n
                    .as_i64()
                    .ok_or_else(|| Error::Catalog(format!("vdb {id}: bad bound {n}")))?;
                let bound = if key_type.is_numeric() {
                    RawBound::Int(n)
                } else {
                    RawBound::Str(Some(n.to_string()))
                };
                raw.push((group.clone(), bound));
            }
            Value::String(s) => raw.push((group.clone(), parse_bound(key_type, group, s)?)),
            Value::Array(items) => {
                for item in items {
                    let Some(s) = item.as_str() else {
                        return Err(Error::Catalog(format!(
                            "vdb {id}: range partition {group} mixes value types"
                        )));
                    };
                    raw.push((group.clone(), parse_bound(key_type, group, s)?));
                }
            }
            other => {
                warn!(vdb = id, group = %group, value = %other, "ignoring partition value");
            }
        }
    }

    let partitions = if key_type.is_numeric() {
        let mut highs: Vec<(String, i64)> = raw
            .into_iter()
            .filter_map(|(g, b)| match b {
                RawBound::Int(v) => Some((g, v)),
                RawBound::Str(_) => None,
            })
            .collect();
        highs.sort_by_key(|(_, v)| *v);
        let mut low = i32::MIN as i64;
        highs
            .into_iter()
            .map(|(group, high)| {
                let part = Partition {
                    group,
                    vdb_id: id,
                    key_type,
                    bucket_count: entry.num,
                    bounds: PartitionBounds::IntRange { low, high },
                };
                low = high;
                Arc::new(part)
            })
            .collect()
    } else {
        let mut highs: Vec<(String, Option<String>)> = raw
            .into_iter()
            .filter_map(|(g, b)| match b {
                RawBound::Str(v) => Some((g, v)),
                RawBound::Int(_) => None,
            })
            .collect();
        // unbounded sorts last
        highs.sort_by(|(_, a), (_, b)| match (a, b) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(_), None) => std::cmp::Ordering::Less,
            (Some(a), Some(b)) => a.as_bytes().cmp(b.as_bytes()),
        });
        let mut low: Option<String> = None;
        highs
            .into_iter()
            .map(|(group, high)| {
                let next_low = high.clone();
                let part = Partition {
                    group,
                    vdb_id: id,
                    key_type,
                    bucket_count: entry.num,
                    bounds: PartitionBounds::StrRange {
                        low: low.take(),
                        high,
                    },
                };
                low = next_low;
                Arc::new(part)
            })
            .collect()
    };
    Ok(partitions)
}

/// Parses a sharding document and builds a validated catalog from it.
pub fn load_catalog_from_str(json: &str) -> Result<ShardCatalog> {
    let doc: ShardingDocument = serde_json::from_str(json)?;
    let catalog = ShardCatalog::new();
    for entry in &doc.vdb {
        catalog.add_vdb(build_vdb(entry)?)?;
    }
    for entry in doc.table {
        catalog.add_table(ShardTable {
            db: entry.db,
            name: entry.table,
            shard_key: entry.pkey,
            vdb_id: entry.vdb.resolve()?,
        })?;
    }
    for entry in doc.single_tables {
        if !catalog.has_group(&entry.group) {
            warn!(table = %entry.table, group = %entry.group, "single table group is not a partition group");
        }
        catalog.add_single_table(SingleTable {
            db: entry.db,
            name: entry.table,
            group: entry.group,
        })?;
    }
    info!(
        vdbs = doc.vdb.len(),
        tables = catalog.table_count(),
        "sharding catalog loaded"
    );
    Ok(catalog)
}

pub fn load_catalog(path: impl AsRef<Path>) -> Result<ShardCatalog> {
    let text = std::fs::read_to_string(path.as_ref())?;
    load_catalog_from_str(&text)
}
