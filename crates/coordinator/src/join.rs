//! Co-location check for joins between sharded tables.

use crate::flags::{RoutingFlags, JOIN_LINK};
use crate::partition::KeyColumn;
use shardgate_common::ShardCatalog;
use shardgate_sql::ast::{BinaryOp, ExprKind};
use shardgate_sql::{Expr, SourceItem};
use tracing::warn;

/// Records the first pair of tables joined by `p` and tags it as a link.
fn find_linkage(
    p: &Expr,
    keys: &[KeyColumn<'_>],
    linkage: &mut [bool],
    flags: &mut RoutingFlags,
) {
    let Some((_, left, right)) = p.binary() else {
        return;
    };
    let n = keys.len();
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if keys[i].matches(left) && keys[j].matches(right) {
                flags.set(p.id, JOIN_LINK);
                let (lo, hi) = if i < j { (i, j) } else { (j, i) };
                linkage[lo * n + hi] = true;
                return;
            }
        }
    }
}

/// Whether the sharded `tables` are joined on their shard keys.
///
/// Every table must live in the first table's vdb, and the equalities
/// `a.key = b.key` found in WHERE and the ON clauses must connect them with
/// exactly `tables.len() - 1` distinct links. Matched equalities are tagged
/// [`JOIN_LINK`] so they are not read as partition restrictions.
pub fn join_on_sharding_key(
    catalog: &ShardCatalog,
    default_db: &str,
    tables: &[&SourceItem],
    where_clause: Option<&Expr>,
    flags: &mut RoutingFlags,
) -> bool {
    let mut infos = Vec::with_capacity(tables.len());
    for src in tables {
        let db = src.db_or(default_db);
        let name = src.table.as_deref().unwrap_or_default();
        let Some(info) = catalog.sharded_table(db, name) else {
            warn!(db, table = name, "not a sharding table");
            return false;
        };
        infos.push(info);
    }
    let Some(first_vdb) = infos.first().map(|t| t.vdb_id) else {
        return false;
    };
    if infos.iter().any(|t| t.vdb_id != first_vdb) {
        return false;
    }
    let mut keys = Vec::with_capacity(tables.len());
    for (src, info) in tables.iter().zip(&infos) {
        match KeyColumn::new(src, &info.shard_key) {
            Some(k) => keys.push(k),
            None => return false,
        }
    }

    let n = tables.len();
    let mut linkage = vec![false; n * n];
    let mut stack: Vec<&Expr> = Vec::new();
    stack.extend(where_clause);
    stack.extend(tables.iter().filter_map(|t| t.on.as_ref()));

    while let Some(p) = stack.pop() {
        match &p.kind {
            ExprKind::Binary { op, left, right } if op.is_logical() => {
                stack.push(right);
                stack.push(left);
            }
            ExprKind::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } if left.is_field_name() && right.is_field_name() => {
                find_linkage(p, &keys, &mut linkage, flags);
            }
            _ => {}
        }
    }

    let links = linkage.iter().filter(|l| **l).count();
    links + 1 == n
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardgate_common::sharding::load_catalog_from_str;
    use shardgate_sql::StatementParser;

    const DOC: &str = r#"{
        "vdb": [
            {"id": 1, "type": "INT", "method": "hash", "num": 2, "partitions": {"g1": [0], "g2": [1]}},
            {"id": 2, "type": "INT", "method": "range", "num": 0, "partitions": {"r1": 10, "r2": null}}
        ],
        "table": [
            {"vdb": 1, "db": "d", "table": "a", "pkey": "id"},
            {"vdb": 1, "db": "d", "table": "b", "pkey": "a_id"},
            {"vdb": 1, "db": "d", "table": "c", "pkey": "a_id"},
            {"vdb": 2, "db": "e", "table": "x", "pkey": "id"}
        ]
    }"#;

    fn check(sql: &str) -> (bool, RoutingFlags) {
        let catalog = load_catalog_from_str(DOC).unwrap();
        let parsed = StatementParser::new().parse(sql).unwrap();
        let select = parsed.select().unwrap();
        let tables: Vec<&SourceItem> = select.from.iter().collect();
        let mut flags = RoutingFlags::new();
        let ok = join_on_sharding_key(
            &catalog,
            "d",
            &tables,
            select.where_clause.as_ref(),
            &mut flags,
        );
        (ok, flags)
    }

    #[test]
    fn accepts_key_equijoin() {
        let (ok, _) = check("SELECT * FROM a JOIN b ON a.id = b.a_id WHERE a.id = 3");
        assert!(ok);
        let (ok, _) = check("SELECT * FROM a x, b y WHERE y.a_id = x.id");
        assert!(ok);
    }

    #[test]
    fn tags_the_link() {
        let parsed = StatementParser::new()
            .parse("SELECT * FROM a JOIN b ON a.id = b.a_id")
            .unwrap();
        let on = parsed.select().unwrap().from[1].on.clone().unwrap();
        let (_, flags) = check("SELECT * FROM a JOIN b ON a.id = b.a_id");
        assert!(flags.has(on.id, JOIN_LINK));
    }

    #[test]
    fn rejects_missing_or_foreign_links() {
        assert!(!check("SELECT * FROM a JOIN b ON a.v = b.v").0);
        assert!(!check("SELECT * FROM a JOIN b ON a.id = b.a_id JOIN c ON c.v = 1").0);
        assert!(!check("SELECT * FROM a JOIN e.x ON a.id = x.id").0);
    }

    #[test]
    fn three_way_chain() {
        let (ok, _) = check("SELECT * FROM a JOIN b ON a.id = b.a_id JOIN c ON b.a_id = c.a_id");
        assert!(ok);
    }
}
