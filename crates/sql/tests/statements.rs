use shardgate_sql::ast::{ExprKind, JoinKind, LockMode, Statement};
use shardgate_sql::{SqlPrinter, SourceItem, StatementParser};

fn parse(sql: &str) -> Statement {
    StatementParser::new().parse(sql).unwrap().statement
}

#[test]
fn test_select_clauses() {
    let stmt = parse(
        "SELECT a, SUM(b) AS s FROM shop.orders WHERE id = 5 GROUP BY a ORDER BY a DESC LIMIT 10 OFFSET 5",
    );
    if let Statement::Select(select) = stmt {
        assert_eq!(select.columns.len(), 2);
        assert_eq!(select.columns[1].alias.as_deref(), Some("s"));
        assert!(select.has_aggregate());
        assert_eq!(select.from[0].db.as_deref(), Some("shop"));
        assert_eq!(select.from[0].table.as_deref(), Some("orders"));
        assert_eq!(select.group_by.len(), 1);
        assert!(select.order_by[0].desc);
        assert_eq!(select.limit, Some(10));
        assert_eq!(select.offset, Some(5));
    } else {
        panic!("Expected a SELECT");
    }
}

#[test]
fn test_union_chain() {
    let stmt = parse("SELECT a FROM t1 UNION ALL SELECT a FROM t2");
    if let Statement::Select(select) = stmt {
        let chain = select.chain();
        assert_eq!(chain.len(), 2);
        assert!(select.union_all);
        assert_eq!(chain[0].from[0].table.as_deref(), Some("t2"));
        assert_eq!(chain[1].from[0].table.as_deref(), Some("t1"));
    } else {
        panic!("Expected a SELECT");
    }
}

#[test]
fn test_joins_and_locks() {
    let stmt = parse("SELECT * FROM a JOIN b ON a.id = b.id LEFT JOIN c USING (id) FOR UPDATE");
    if let Statement::Select(select) = stmt {
        assert_eq!(select.from.len(), 3);
        assert_eq!(select.from[1].join, JoinKind::Inner);
        assert!(select.from[1].on.is_some());
        assert_eq!(select.from[2].join, JoinKind::Left);
        assert_eq!(select.from[2].using, vec!["id".to_string()]);
        assert_eq!(select.lock, Some(LockMode::ForUpdate));
    } else {
        panic!("Expected a SELECT");
    }
}

#[test]
fn test_negative_literals_fold() {
    let stmt = parse("SELECT * FROM t WHERE id = -3");
    if let Statement::Select(select) = stmt {
        let w = select.where_clause.unwrap();
        let (_, _, right) = w.binary().unwrap();
        assert_eq!(right.kind, ExprKind::Integer(-3));
    } else {
        panic!("Expected a SELECT");
    }
}

#[test]
fn test_insert_rows() {
    let stmt = parse("INSERT INTO t (id, v) VALUES (1, 'a'), (2, 'b')");
    if let Statement::Insert(insert) = stmt {
        assert_eq!(insert.columns, vec!["id".to_string(), "v".to_string()]);
        assert_eq!(insert.rows.len(), 2);
        assert_eq!(insert.rows[1][1].kind, ExprKind::Str("b".into()));
    } else {
        panic!("Expected an INSERT");
    }
}

#[test]
fn test_statement_kinds() {
    assert!(matches!(parse("BEGIN"), Statement::StartTransaction));
    assert!(matches!(parse("COMMIT"), Statement::Commit));
    assert!(matches!(parse("SHOW WARNINGS"), Statement::ShowWarnings));
    assert!(matches!(
        parse("SET autocommit = 0"),
        Statement::Set {
            autocommit: Some(false)
        }
    ));
    assert!(matches!(parse("USE shop"), Statement::Use(db) if db == "shop"));
    assert!(matches!(
        parse("UPDATE a JOIN b ON a.id = b.id SET a.x = b.x"),
        Statement::Unsupported(_)
    ));
}

#[test]
fn test_explain_and_directive() {
    let parsed = StatementParser::new()
        .parse("/*# group=g2 */ EXPLAIN SELECT * FROM t")
        .unwrap();
    assert!(parsed.explain);
    assert!(parsed.select().is_some());
    assert_eq!(parsed.directive.unwrap().group.as_deref(), Some("g2"));
}

#[test]
fn test_invalid_sql() {
    assert!(StatementParser::new().parse("SELEKT nothing").is_err());
}

#[test]
fn test_print_select_keeps_grouping() {
    let sql = "SELECT a, COUNT(*) AS c FROM t WHERE (a = 1 OR b = 'x') AND c > 3 GROUP BY a ORDER BY a DESC LIMIT 5 OFFSET 2";
    let stmt = parse(sql);
    if let Statement::Select(select) = stmt {
        assert_eq!(SqlPrinter::new().select(&select), sql);
    } else {
        panic!("Expected a SELECT");
    }
}

#[test]
fn test_print_with_renamed_tables() {
    let stmt = parse("SELECT * FROM orders o JOIN items ON o.id = items.oid WHERE o.id = 1");
    let rename = |s: &SourceItem| s.table.as_ref().map(|t| format!("{t}_g1"));
    if let Statement::Select(select) = stmt {
        let printed = SqlPrinter::with_table_renamer(&rename).select(&select);
        assert_eq!(
            printed,
            "SELECT * FROM orders_g1 AS o JOIN items_g1 AS items ON o.id = items.oid WHERE o.id = 1"
        );
    } else {
        panic!("Expected a SELECT");
    }
}

#[test]
fn test_print_insert_subset() {
    let stmt = parse("INSERT INTO t (id, v) VALUES (1, 'a'), (2, 'b'), (3, 'c')");
    if let Statement::Insert(insert) = stmt {
        let printed = SqlPrinter::new().insert(&insert, Some(&[0, 2]));
        assert_eq!(printed, "INSERT INTO t (id, v) VALUES (1, 'a'),(3, 'c')");
    } else {
        panic!("Expected an INSERT");
    }
}

#[test]
fn test_print_update_and_delete() {
    let printer = SqlPrinter::new();
    if let Statement::Update(update) = parse("UPDATE t SET v = v + 1 WHERE id IN (1, 2)") {
        assert_eq!(printer.update(&update), "UPDATE t SET v = v + 1 WHERE id IN (1, 2)");
    } else {
        panic!("Expected an UPDATE");
    }
    if let Statement::Delete(delete) = parse("DELETE FROM t WHERE id BETWEEN 1 AND 9") {
        assert_eq!(printer.delete(&delete), "DELETE FROM t WHERE id BETWEEN 1 AND 9");
    } else {
        panic!("Expected a DELETE");
    }
}
