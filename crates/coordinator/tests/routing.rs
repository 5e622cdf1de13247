use shardgate_common::sharding::load_catalog;
use shardgate_common::CatalogHandle;
use shardgate_coordinator::rewrite::rewrite_statement;
use shardgate_coordinator::{Router, RouterOptions, RoutingCode, RoutingOutcome, TableType};
use shardgate_sql::{ParsedStatement, StatementParser};

const SHARDING: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/sharding.json");

fn router_with(partition_mode: bool) -> Router {
    let catalog = load_catalog(SHARDING).expect("sharding config loads");
    Router::new(
        CatalogHandle::new(catalog),
        RouterOptions {
            default_db: "shop".to_string(),
            partition_mode,
            ..RouterOptions::default()
        },
    )
}

fn parse(sql: &str) -> ParsedStatement {
    StatementParser::new().parse(sql).unwrap()
}

fn route(sql: &str) -> RoutingOutcome {
    router_with(false).route(&parse(sql), None)
}

fn groups(outcome: &RoutingOutcome) -> Vec<&str> {
    outcome.plan.groups().iter().map(String::as_str).collect()
}

fn refused(sql: &str) -> String {
    let outcome = route(sql);
    assert_eq!(outcome.code, RoutingCode::Unparsable, "{sql} was routed");
    assert!(outcome.plan.groups().is_empty());
    outcome.message.unwrap_or_default()
}

#[test]
fn select_narrows_by_key() {
    let outcome = route("SELECT * FROM orders WHERE id = 5");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1"]);

    let outcome = route("SELECT * FROM orders WHERE id = 6");
    assert_eq!(groups(&outcome), ["data2"]);

    let outcome = route("SELECT * FROM orders WHERE id IN (4, 6)");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1", "data2"]);

    let outcome = route("SELECT * FROM orders WHERE id = 5 OR id = 9");
    assert_eq!(groups(&outcome), ["data1"]);
}

#[test]
fn select_without_key_broadcasts() {
    let outcome = route("SELECT * FROM orders");
    assert_eq!(outcome.code, RoutingCode::AllShards);
    assert_eq!(groups(&outcome), ["data1", "data2"]);
    assert_eq!(outcome.plan.table_type, TableType::Sharded);

    let outcome = route("SELECT * FROM orders WHERE id = abs(3)");
    assert_eq!(outcome.code, RoutingCode::AllShards);
    assert_eq!(groups(&outcome), ["data1", "data2"]);
}

#[test]
fn constant_on_the_left_prunes_like_the_mirrored_comparison() {
    let outcome = route("SELECT * FROM orders WHERE 5 = id");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1"]);

    let outcome = route("SELECT * FROM ledger.entries WHERE 2500 < account_id");
    assert_eq!(groups(&outcome), ["data5"]);
    assert_eq!(
        groups(&outcome),
        groups(&route("SELECT * FROM ledger.entries WHERE account_id > 2500"))
    );

    let outcome = route("SELECT * FROM ledger.entries WHERE 1500 >= account_id");
    assert_eq!(groups(&outcome), ["data3", "data4"]);
}

#[test]
fn negated_key_predicates_reach_every_group() {
    let outcome = route("SELECT * FROM orders WHERE NOT (id = 1)");
    assert_eq!(outcome.code, RoutingCode::AllShards);
    assert_eq!(groups(&outcome), ["data1", "data2"]);

    let outcome = route("SELECT * FROM ledger.entries WHERE NOT (account_id > 2500)");
    assert_eq!(groups(&outcome), ["data3", "data4", "data5"]);
}

#[test]
fn or_of_ands_on_one_key_routes_like_the_key_alone() {
    let outcome = route(
        "SELECT * FROM orders WHERE (id = 5 AND status = 2) OR (id = 5 AND status = 3)",
    );
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1"]);
    assert_eq!(groups(&outcome), groups(&route("SELECT * FROM orders WHERE id = 5")));
}

#[test]
fn range_and_date_partitions() {
    let outcome = route("SELECT * FROM ledger.entries WHERE account_id BETWEEN 1500 AND 2500");
    assert_eq!(groups(&outcome), ["data4", "data5"]);

    let outcome = route("SELECT * FROM ledger.entries WHERE account_id > 2000");
    assert_eq!(groups(&outcome), ["data5"]);

    let outcome = route("SELECT * FROM audit.events WHERE day = '2023-06-01'");
    assert_eq!(groups(&outcome), ["data6"]);

    let outcome = route("SELECT * FROM audit.events WHERE day >= '2024-03-01'");
    assert_eq!(groups(&outcome), ["data7"]);
}

#[test]
fn bad_key_values_are_refused() {
    assert_eq!(
        refused("SELECT * FROM orders WHERE id = 'x'"),
        "sharding key parse error"
    );
    assert_eq!(
        refused("SELECT * FROM audit.events WHERE day = 'yesterday'"),
        "sharding key parse error"
    );
}

#[test]
fn unsharded_and_single_tables() {
    let outcome = route("SELECT 1");
    assert_eq!(outcome.code, RoutingCode::FixedGroup);
    assert_eq!(groups(&outcome), ["data1"]);

    let outcome = route("SELECT * FROM settings");
    assert_eq!(outcome.code, RoutingCode::FixedGroup);
    assert_eq!(groups(&outcome), ["data1"]);

    let outcome = route("SELECT * FROM currencies");
    assert_eq!(outcome.code, RoutingCode::FixedGroup);
    assert_eq!(groups(&outcome), ["data2"]);
    assert_eq!(outcome.plan.table_type, TableType::Single);

    assert_eq!(
        refused("SELECT * FROM regions r JOIN currencies c ON r.id = c.id"),
        "JOIN multiple single-tables not allowed"
    );
    assert_eq!(
        refused("SELECT * FROM orders o JOIN regions r ON o.region = r.id"),
        "JOIN single-table WITH sharding-table"
    );
    assert_eq!(
        refused("SELECT * FROM orders WHERE id IN (SELECT order_id FROM regions)"),
        "Found single-table in subquery, not allowed"
    );
}

#[test]
fn joins_need_the_shard_key() {
    let outcome =
        route("SELECT * FROM orders o JOIN order_items i ON o.id = i.order_id WHERE o.id = 5");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1"]);

    assert_eq!(
        refused("SELECT * FROM orders o JOIN order_items i ON o.note = i.note"),
        "JOIN must inside VDB and have explicit join-on condition"
    );
    assert_eq!(
        refused("SELECT * FROM orders o JOIN ledger.entries e ON o.id = e.account_id"),
        "JOIN must inside VDB and have explicit join-on condition"
    );
}

#[test]
fn unions_and_subqueries() {
    let outcome = route(
        "SELECT id FROM orders WHERE id = 5 UNION ALL SELECT id FROM orders WHERE id = 6",
    );
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1", "data2"]);

    let outcome = route("SELECT * FROM (SELECT id FROM orders) AS s");
    assert_eq!(outcome.code, RoutingCode::AllShards);
    assert_eq!(groups(&outcome), ["data1", "data2"]);
}

#[test]
fn fan_out_restrictions() {
    assert_eq!(
        refused("SELECT AVG(total) FROM orders"),
        "this AVG would be routed to multiple shards, not allowed"
    );
    let outcome = route("SELECT AVG(total) FROM orders WHERE id = 5");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
}

#[test]
fn updates_and_deletes() {
    let outcome = route("UPDATE orders SET status = 1 WHERE id = 6");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data2"]);

    let outcome = route("UPDATE orders SET status = 1");
    assert_eq!(outcome.code, RoutingCode::DistributedTransaction);
    assert_eq!(groups(&outcome), ["data1", "data2"]);

    let outcome = route("UPDATE orders SET id = 6, status = 2 WHERE id = 6");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(
        refused("UPDATE orders SET id = 7 WHERE id = 6"),
        "update of sharding key is not allowed"
    );

    let outcome = route("DELETE FROM orders");
    assert_eq!(outcome.code, RoutingCode::DistributedTransaction);

    let outcome = route("DELETE FROM orders WHERE id = 4");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1"]);

    let outcome = route("DELETE FROM regions WHERE id = 1");
    assert_eq!(outcome.code, RoutingCode::FixedGroup);
    assert_eq!(outcome.plan.table_type, TableType::Single);

    let outcome = route("UPDATE settings SET v = 1");
    assert_eq!(outcome.code, RoutingCode::DistributedTransaction);
    assert_eq!(outcome.plan.table_type, TableType::Global);
}

#[test]
fn inserts() {
    let outcome = route("INSERT INTO orders (id, note) VALUES (5, 'a')");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data1"]);

    let outcome = route("INSERT INTO ledger.entries (account_id, amount) VALUES (5000, 1)");
    assert_eq!(groups(&outcome), ["data5"]);

    let outcome =
        route("INSERT INTO orders (id, note) VALUES (4, 'a'), (6, 'b'), (5, 'c')");
    assert_eq!(outcome.code, RoutingCode::DistributedTransaction);
    assert!(outcome.plan.rewritten_completely);
    assert_eq!(groups(&outcome), ["data1", "data2"]);
    let data1 = outcome.plan.get_sql_for_group("data1");
    assert!(data1.contains("(4, 'a'),(5, 'c')"), "{data1}");
    let data2 = outcome.plan.get_sql_for_group("data2");
    assert!(data2.ends_with("VALUES (6, 'b')"), "{data2}");

    let outcome = route("INSERT INTO orders (id, note) VALUES (4, 'a'), (8, 'b')");
    assert_eq!(outcome.code, RoutingCode::FixedGroup);
    assert_eq!(groups(&outcome), ["data1"]);

    assert_eq!(
        refused("INSERT INTO orders VALUES (1, 'a')"),
        "INSERT must use explicit column names"
    );
    assert_eq!(
        refused("INSERT INTO orders (note) VALUES ('a')"),
        "INSERTion into sharding table must use sharding key"
    );
    assert_eq!(
        refused("INSERT INTO settings (k) SELECT id FROM orders"),
        "unsupported INSERT format"
    );
}

#[test]
fn directives() {
    let outcome = route("/*# group=data2 */ SELECT * FROM orders");
    assert_eq!(outcome.code, RoutingCode::SingleShard);
    assert_eq!(groups(&outcome), ["data2"]);

    let outcome = route("/*# table=shop.orders key=6 */ SELECT * FROM orders");
    assert_eq!(groups(&outcome), ["data2"]);

    let outcome = route("/*# group=all */ DELETE FROM orders");
    assert_eq!(outcome.code, RoutingCode::DistributedTransaction);

    assert_eq!(
        refused("/*# group=nope */ SELECT 1"),
        "no group: nope for db: shop"
    );
}

#[test]
fn session_statements() {
    assert_eq!(route("SET autocommit = 1").code, RoutingCode::Same);
    assert_eq!(route("SET autocommit = 0").code, RoutingCode::None);
    assert_eq!(route("START TRANSACTION").code, RoutingCode::None);
    assert_eq!(
        route("COMMIT").code,
        RoutingCode::PreviousTransactionConnections
    );
    assert_eq!(
        route("SHOW WARNINGS").code,
        RoutingCode::PreviousWarningConnection
    );

    let outcome = route("SET NAMES utf8mb4");
    assert_eq!(outcome.code, RoutingCode::All);
    assert_eq!(groups(&outcome), ["data1", "data2"]);

    let outcome = route("SHOW CREATE TABLE orders");
    assert_eq!(outcome.code, RoutingCode::AnyShard);
    assert_eq!(outcome.plan.group_count(), 1);

    assert_eq!(route("CREATE TABLE t (id INT)").code, RoutingCode::All);
}

#[test]
fn fan_out_rewrites_paging() {
    let parsed = parse("SELECT id FROM orders ORDER BY id LIMIT 10 OFFSET 20");
    let mut outcome = router_with(false).route(&parsed, None);
    rewrite_statement(&parsed, &mut outcome, false);
    assert_eq!(
        outcome.plan.get_sql_for_group("data1"),
        "SELECT id FROM orders ORDER BY id LIMIT 0, 30"
    );

    let parsed = parse("SELECT id FROM orders WHERE id = 5 LIMIT 10 OFFSET 20");
    let mut outcome = router_with(false).route(&parsed, None);
    rewrite_statement(&parsed, &mut outcome, false);
    assert_eq!(outcome.plan.get_sql_for_group("data1"), parsed.sql);
}

#[test]
fn partition_mode_renames_tables() {
    let router = router_with(true);
    let parsed = parse("SELECT * FROM orders WHERE id = 5");
    let mut outcome = router.route(&parsed, None);
    rewrite_statement(&parsed, &mut outcome, true);
    assert_eq!(
        outcome.plan.get_sql_for_group("data1"),
        "SELECT * FROM orders_data1 AS orders WHERE id = 5"
    );

    let parsed = parse("UPDATE orders SET note = 'x' WHERE id = 6");
    let mut outcome = router.route(&parsed, None);
    rewrite_statement(&parsed, &mut outcome, true);
    assert_eq!(
        outcome.plan.get_sql_for_group("data2"),
        "UPDATE orders_data2 AS orders SET note = 'x' WHERE id = 6"
    );

    let outcome = router.route(&parse("DROP TABLE orders"), None);
    assert_eq!(outcome.code, RoutingCode::Unparsable);
    assert_eq!(
        outcome.message.as_deref(),
        Some("DDL is not allowed for partition until now")
    );
}
