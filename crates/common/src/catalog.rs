//! Shard metadata provider.
//!
//! A [`ShardCatalog`] answers the questions the router asks about a
//! `(database, table)` pair: is it sharded, single-copy or global, what is
//! its shard key, and which partitions (and therefore groups) back it.

use crate::error::{Error, Result};
use dashmap::DashMap;
use rand::Rng;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Largest number of hash buckets a virtual database may declare.
pub const MAX_HASH_BUCKETS: u32 = 1024;

/// Type of the shard key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    Str,
    Date,
    DateTime,
}

impl KeyType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INT" => Some(KeyType::Int),
            "STR" => Some(KeyType::Str),
            "DATE" => Some(KeyType::Date),
            "DATETIME" => Some(KeyType::DateTime),
            _ => None,
        }
    }

    /// Integer, date and datetime keys all compare as `i64`.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, KeyType::Str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardMethod {
    Hash,
    Range,
}

impl ShardMethod {
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("hash") {
            Some(ShardMethod::Hash)
        } else if name.eq_ignore_ascii_case("range") {
            Some(ShardMethod::Range)
        } else {
            None
        }
    }
}

/// Key space owned by one partition.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionBounds {
    /// Hash buckets owned, indexed by bucket number.
    Hash { buckets: Vec<bool> },
    /// `(low, high]` over integer or epoch-second keys.
    IntRange { low: i64, high: i64 },
    /// `(low, high]` over string keys, `None` meaning unbounded.
    StrRange { low: Option<String>, high: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub group: String,
    pub vdb_id: u32,
    pub key_type: KeyType,
    /// Bucket count of the owning virtual database (hash method only).
    pub bucket_count: u32,
    pub bounds: PartitionBounds,
}

impl Partition {
    pub fn method(&self) -> ShardMethod {
        match self.bounds {
            PartitionBounds::Hash { .. } => ShardMethod::Hash,
            _ => ShardMethod::Range,
        }
    }

    pub fn owns_bucket(&self, bucket: i32) -> bool {
        match &self.bounds {
            PartitionBounds::Hash { buckets } => {
                bucket >= 0 && buckets.get(bucket as usize).copied().unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// A virtual database: one key space shared by every table sharded on it.
#[derive(Debug, Clone)]
pub struct Vdb {
    pub id: u32,
    pub key_type: KeyType,
    pub method: ShardMethod,
    pub bucket_count: u32,
    pub partitions: Vec<Arc<Partition>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardTable {
    pub db: String,
    pub name: String,
    pub shard_key: String,
    pub vdb_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleTable {
    pub db: String,
    pub name: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableKind {
    Sharded(Arc<ShardTable>),
    Single(Arc<SingleTable>),
    Global,
}

fn table_key(db: &str, table: &str) -> (String, String) {
    (db.to_ascii_lowercase(), table.to_ascii_lowercase())
}

/// In-memory shard metadata.
#[derive(Debug, Default)]
pub struct ShardCatalog {
    vdbs: DashMap<u32, Arc<Vdb>>,
    db_vdb: DashMap<String, u32>,
    tables: DashMap<(String, String), Arc<ShardTable>>,
    single_tables: DashMap<(String, String), Arc<SingleTable>>,
}

impl ShardCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vdb(&self, vdb: Vdb) -> Result<()> {
        if self.vdbs.contains_key(&vdb.id) {
            return Err(Error::Catalog(format!("duplicate vdb id: {}", vdb.id)));
        }
        self.vdbs.insert(vdb.id, Arc::new(vdb));
        Ok(())
    }

    /// Registers a sharded table, binding its database to the table's vdb.
    pub fn add_table(&self, table: ShardTable) -> Result<()> {
        if !self.vdbs.contains_key(&table.vdb_id) {
            return Err(Error::Catalog(format!(
                "table {}.{} refers to unknown vdb {}",
                table.db, table.name, table.vdb_id
            )));
        }
        let db = table.db.to_ascii_lowercase();
        if let Some(bound) = self.db_vdb.get(&db) {
            if *bound != table.vdb_id {
                return Err(Error::Catalog(format!(
                    "same db inside different vdb: {}",
                    table.db
                )));
            }
        }
        let key = table_key(&table.db, &table.name);
        if self.tables.contains_key(&key) {
            return Err(Error::Catalog(format!(
                "same table name inside same db: {}",
                table.name
            )));
        }
        self.db_vdb.insert(db, table.vdb_id);
        self.tables.insert(key, Arc::new(table));
        Ok(())
    }

    pub fn add_single_table(&self, table: SingleTable) -> Result<()> {
        let key = table_key(&table.db, &table.name);
        if self.single_tables.contains_key(&key) || self.tables.contains_key(&key) {
            return Err(Error::Catalog(format!(
                "table {}.{} declared twice",
                table.db, table.name
            )));
        }
        self.single_tables.insert(key, Arc::new(table));
        Ok(())
    }

    pub fn vdb(&self, id: u32) -> Option<Arc<Vdb>> {
        self.vdbs.get(&id).map(|v| v.value().clone())
    }

    /// The vdb a database is bound to, falling back to the lowest vdb id for
    /// databases that own no sharded table.
    pub fn vdb_for_db(&self, db: &str) -> Option<Arc<Vdb>> {
        if let Some(id) = self.db_vdb.get(&db.to_ascii_lowercase()) {
            return self.vdb(*id);
        }
        self.vdbs
            .iter()
            .min_by_key(|v| *v.key())
            .map(|v| v.value().clone())
    }

    pub fn sharded_table(&self, db: &str, table: &str) -> Option<Arc<ShardTable>> {
        self.tables
            .get(&table_key(db, table))
            .map(|t| t.value().clone())
    }

    pub fn single_table(&self, db: &str, table: &str) -> Option<Arc<SingleTable>> {
        self.single_tables
            .get(&table_key(db, table))
            .map(|t| t.value().clone())
    }

    pub fn table_kind(&self, db: &str, table: &str) -> TableKind {
        if let Some(t) = self.sharded_table(db, table) {
            TableKind::Sharded(t)
        } else if let Some(t) = self.single_table(db, table) {
            TableKind::Single(t)
        } else {
            TableKind::Global
        }
    }

    /// Partitions backing a sharded table, in vdb order.
    pub fn table_partitions(&self, table: &ShardTable) -> Vec<Arc<Partition>> {
        self.vdb(table.vdb_id)
            .map(|v| v.partitions.clone())
            .unwrap_or_default()
    }

    /// Every partition's group in the database's vdb, duplicates kept.
    pub fn all_groups(&self, db: &str) -> Vec<String> {
        match self.vdb_for_db(db) {
            Some(vdb) => vdb.partitions.iter().map(|p| p.group.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Distinct groups backing a table, in partition order.
    pub fn table_groups(&self, table: &ShardTable) -> Vec<String> {
        let mut groups: Vec<String> = Vec::new();
        for part in self.table_partitions(table) {
            if !groups.contains(&part.group) {
                groups.push(part.group.clone());
            }
        }
        groups
    }

    pub fn any_group(&self, db: &str) -> Option<String> {
        let vdb = self.vdb_for_db(db)?;
        if vdb.partitions.is_empty() {
            return None;
        }
        let i = rand::thread_rng().gen_range(0..vdb.partitions.len());
        Some(vdb.partitions[i].group.clone())
    }

    pub fn fixed_group(&self, db: &str, fixture: u32) -> Option<String> {
        let vdb = self.vdb_for_db(db)?;
        if vdb.partitions.is_empty() {
            return None;
        }
        let i = fixture as usize % vdb.partitions.len();
        Some(vdb.partitions[i].group.clone())
    }

    /// Resolves a directive group pattern: `all` or one exact group name.
    pub fn find_groups(&self, db: &str, pattern: &str) -> Vec<String> {
        if pattern.eq_ignore_ascii_case("all") {
            return self.all_groups(db);
        }
        match self.vdb_for_db(db) {
            Some(vdb) => vdb
                .partitions
                .iter()
                .find(|p| p.group == pattern)
                .map(|p| vec![p.group.clone()])
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.vdbs
            .iter()
            .any(|v| v.partitions.iter().any(|p| p.group == name))
    }

    /// Adds `table`'s group to `groups` unless it is already there.
    pub fn merge_single_table_group(groups: &mut Vec<String>, table: &SingleTable) {
        if !groups.contains(&table.group) {
            groups.push(table.group.clone());
        }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len() + self.single_tables.len()
    }
}

/// Owner of the live catalog. Reloads swap the whole catalog at once so a
/// statement routed against the old one never observes a half-loaded state.
#[derive(Debug, Clone, Default)]
pub struct CatalogHandle {
    inner: Arc<RwLock<Arc<ShardCatalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: ShardCatalog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn current(&self) -> Arc<ShardCatalog> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, catalog: ShardCatalog) {
        info!(tables = catalog.table_count(), "replacing sharding catalog");
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(catalog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_vdb() -> Vdb {
        let part = |group: &str, owned: &[usize]| {
            let mut buckets = vec![false; 4];
            for b in owned {
                buckets[*b] = true;
            }
            Arc::new(Partition {
                group: group.to_string(),
                vdb_id: 1,
                key_type: KeyType::Int,
                bucket_count: 4,
                bounds: PartitionBounds::Hash { buckets },
            })
        };
        Vdb {
            id: 1,
            key_type: KeyType::Int,
            method: ShardMethod::Hash,
            bucket_count: 4,
            partitions: vec![part("g1", &[0, 1]), part("g2", &[2]), part("g1", &[3])],
        }
    }

    fn catalog() -> ShardCatalog {
        let c = ShardCatalog::new();
        c.add_vdb(hash_vdb()).unwrap();
        c.add_table(ShardTable {
            db: "shop".into(),
            name: "orders".into(),
            shard_key: "id".into(),
            vdb_id: 1,
        })
        .unwrap();
        c.add_single_table(SingleTable {
            db: "shop".into(),
            name: "region".into(),
            group: "g2".into(),
        })
        .unwrap();
        c
    }

    #[test]
    fn classifies_tables_case_insensitively() {
        let c = catalog();
        assert!(matches!(c.table_kind("SHOP", "Orders"), TableKind::Sharded(_)));
        assert!(matches!(c.table_kind("shop", "region"), TableKind::Single(_)));
        assert_eq!(c.table_kind("shop", "users"), TableKind::Global);
    }

    #[test]
    fn group_helpers() {
        let c = catalog();
        assert_eq!(c.all_groups("shop"), vec!["g1", "g2", "g1"]);
        let t = c.sharded_table("shop", "orders").unwrap();
        assert_eq!(c.table_groups(&t), vec!["g1", "g2"]);
        assert_eq!(c.fixed_group("shop", 4).as_deref(), Some("g2"));
        assert_eq!(c.find_groups("shop", "ALL").len(), 3);
        assert_eq!(c.find_groups("shop", "g2"), vec!["g2"]);
        assert!(c.find_groups("shop", "g9").is_empty());
        assert!(c.has_group("g1"));
        assert!(!c.has_group("g9"));
        let any = c.any_group("shop").unwrap();
        assert!(any == "g1" || any == "g2");
    }

    #[test]
    fn rejects_duplicate_tables_and_db_rebinding() {
        let c = catalog();
        let dup = ShardTable {
            db: "shop".into(),
            name: "ORDERS".into(),
            shard_key: "id".into(),
            vdb_id: 1,
        };
        assert!(c.add_table(dup).is_err());

        let mut other = hash_vdb();
        other.id = 2;
        c.add_vdb(other).unwrap();
        let moved = ShardTable {
            db: "shop".into(),
            name: "items".into(),
            shard_key: "id".into(),
            vdb_id: 2,
        };
        assert!(c.add_table(moved).is_err());
    }

    #[test]
    fn single_table_group_merge_is_distinct() {
        let t = SingleTable {
            db: "d".into(),
            name: "s".into(),
            group: "g1".into(),
        };
        let mut groups = vec!["g1".to_string()];
        ShardCatalog::merge_single_table_group(&mut groups, &t);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn handle_replaces_catalog() {
        let handle = CatalogHandle::new(ShardCatalog::new());
        assert_eq!(handle.current().table_count(), 0);
        handle.replace(catalog());
        assert_eq!(handle.current().table_count(), 2);
    }
}
