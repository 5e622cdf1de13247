//! Shapes of SELECT that cannot be merged correctly once they fan out.

use super::unparsable;
use crate::error::Result;
use crate::flags::{RoutingFlags, ORDER_BY};
use shardgate_sql::ast::AggregateFn;
use shardgate_sql::{Expr, Select};

/// Index of the aggregate column a HAVING operand refers to, by text or alias.
pub fn having_column(select: &Select, operand: &Expr) -> Option<usize> {
    select.columns.iter().position(|c| {
        c.aggregate().is_some()
            && (c.text.eq_ignore_ascii_case(&operand.text)
                || c
                    .alias
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(&operand.text)))
    })
}

/// DISTINCT merges on the sort order, so ORDER BY may only name select-list
/// columns. Sets [`RoutingFlags::rewrite_order_by`] when the remaining
/// columns must be appended to the sort.
fn distinct_order_by(select: &Select, flags: &mut RoutingFlags) -> bool {
    if select.order_by.is_empty() {
        if select.columns.first().is_some_and(Expr::is_star) {
            return false;
        }
        flags.rewrite_order_by = true;
        return true;
    }
    if select.columns.len() < select.order_by.len() {
        return false;
    }
    for item in &select.order_by {
        if !item.expr.is_field_name() {
            return false;
        }
        match select.column_matching(&item.expr.text) {
            Some(i) => flags.set(select.columns[i].id, ORDER_BY),
            None => return false,
        }
    }
    if select.columns.len() != select.order_by.len() {
        flags.rewrite_order_by = true;
    }
    true
}

fn has_avg(select: &Select) -> bool {
    let mut found = false;
    for c in &select.columns {
        c.walk(&mut |e| {
            if matches!(e.aggregate(), Some((AggregateFn::Avg, _))) {
                found = true;
            }
        });
    }
    found
}

/// First `COUNT/SUM/AVG(DISTINCT ...)` column.
fn distinct_aggregate(select: &Select) -> Option<AggregateFn> {
    select.columns.iter().find_map(|c| match c.aggregate() {
        Some((f @ (AggregateFn::Count | AggregateFn::Sum | AggregateFn::Avg), true)) => Some(f),
        _ => None,
    })
}

fn nested_aggregates(select: &Select) -> Result<()> {
    let mut current = select.from_subqueries().next();
    while let Some(sub) = current {
        let folded = sub.columns.iter().any(|c| {
            matches!(
                c.aggregate(),
                Some((AggregateFn::Count | AggregateFn::Sum | AggregateFn::Avg, _))
            )
        });
        if folded {
            return Err(unparsable("sub select aggregate functions not supported"));
        }
        current = sub.from_subqueries().next();
    }
    Ok(())
}

/// Rejects a SELECT that would be merged wrongly across shards.
///
/// Only called once the statement is known to reach more than one group.
pub fn check_select(
    select: &Select,
    flags: &mut RoutingFlags,
    allow_nested_subquery: bool,
) -> Result<()> {
    if select.distinct && !distinct_order_by(select, flags) {
        return Err(unparsable(
            "ORDER BY columns must be a subset of DISTINCT columns",
        ));
    }

    if let Some(having) = &select.having {
        let Some((_, left, _)) = having.binary().filter(|(op, _, _)| op.is_compare()) else {
            return Err(unparsable("Only support simple HAVING condition"));
        };
        if having_column(select, left).is_none() {
            return Err(unparsable("HAVING condition must show up in column"));
        }
        if select.limit.is_some() {
            return Err(unparsable("Only support HAVING condition without limit"));
        }
    }

    if select.group_by.iter().any(Expr::contains_case) {
        return Err(unparsable("group by CASE-WHEN not supported"));
    }

    if select.has_aggregate() {
        if has_avg(select) {
            return Err(unparsable(
                "this AVG would be routed to multiple shards, not allowed",
            ));
        }
        if !select.columns.iter().any(|c| c.aggregate().is_some()) {
            return Err(unparsable(
                "Complex aggregate function not allowed on sharded sql",
            ));
        }
    }

    if !select.group_by.is_empty() && !select.order_by.is_empty() {
        let same = select.group_by.len() == select.order_by.len()
            && select
                .group_by
                .iter()
                .zip(&select.order_by)
                .all(|(g, o)| g.text == o.expr.text);
        if !same {
            return Err(unparsable(
                "can't ORDER BY and GROUP BY different columns on sharded sql",
            ));
        }
    }

    let mut distinct_fn = distinct_aggregate(select);
    if distinct_fn.is_none() && select.has_subquery() {
        distinct_fn = select.from_subqueries().next().and_then(distinct_aggregate);
    }
    if let Some(f) = distinct_fn {
        return Err(unparsable(format!(
            "{}(DISTINCT ...) not supported",
            f.name().to_ascii_uppercase()
        )));
    }

    if !allow_nested_subquery && select.has_subquery() {
        nested_aggregates(select)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardgate_sql::StatementParser;

    fn check(sql: &str) -> (Result<()>, RoutingFlags) {
        let parsed = StatementParser::new().parse(sql).unwrap();
        let mut flags = RoutingFlags::new();
        let rc = check_select(parsed.select().unwrap(), &mut flags, false);
        (rc, flags)
    }

    fn message(sql: &str) -> String {
        check(sql).0.unwrap_err().to_string()
    }

    #[test]
    fn distinct_needs_ordered_subset() {
        let (rc, flags) = check("SELECT DISTINCT a, b FROM t");
        assert!(rc.is_ok());
        assert!(flags.rewrite_order_by);

        let (rc, flags) = check("SELECT DISTINCT a, b FROM t ORDER BY b");
        assert!(rc.is_ok());
        assert!(flags.rewrite_order_by);

        let (rc, flags) = check("SELECT DISTINCT a, b FROM t ORDER BY b, a");
        assert!(rc.is_ok());
        assert!(!flags.rewrite_order_by);

        assert_eq!(
            message("SELECT DISTINCT a FROM t ORDER BY c"),
            "ORDER BY columns must be a subset of DISTINCT columns"
        );
        assert_eq!(
            message("SELECT DISTINCT * FROM t"),
            "ORDER BY columns must be a subset of DISTINCT columns"
        );
    }

    #[test]
    fn having_must_be_simple() {
        assert!(check("SELECT a, COUNT(*) FROM t GROUP BY a HAVING COUNT(*) > 2 ORDER BY a")
            .0
            .is_ok());
        assert!(check("SELECT a, COUNT(*) AS n FROM t GROUP BY a HAVING n > 2 ORDER BY a")
            .0
            .is_ok());
        assert_eq!(
            message("SELECT a, COUNT(*) FROM t GROUP BY a HAVING COUNT(*) > 2 AND a > 1"),
            "Only support simple HAVING condition"
        );
        assert_eq!(
            message("SELECT a, COUNT(*) FROM t GROUP BY a HAVING SUM(b) > 2"),
            "HAVING condition must show up in column"
        );
        assert_eq!(
            message("SELECT a, COUNT(*) FROM t GROUP BY a HAVING COUNT(*) > 2 LIMIT 3"),
            "Only support HAVING condition without limit"
        );
    }

    #[test]
    fn aggregate_shapes() {
        assert_eq!(
            message("SELECT AVG(x) FROM t"),
            "this AVG would be routed to multiple shards, not allowed"
        );
        assert_eq!(
            message("SELECT SUM(x) + 1 FROM t"),
            "Complex aggregate function not allowed on sharded sql"
        );
        assert_eq!(
            message("SELECT COUNT(DISTINCT x) FROM t"),
            "COUNT(DISTINCT ...) not supported"
        );
        assert!(check("SELECT COUNT(*), MAX(x) FROM t").0.is_ok());
    }

    #[test]
    fn group_and_order_must_agree() {
        assert!(check("SELECT a, b FROM t GROUP BY a, b ORDER BY a, b").0.is_ok());
        assert_eq!(
            message("SELECT a, b FROM t GROUP BY a, b ORDER BY b"),
            "can't ORDER BY and GROUP BY different columns on sharded sql"
        );
        assert_eq!(
            message("SELECT a FROM t GROUP BY CASE WHEN a > 1 THEN 1 ELSE 0 END"),
            "group by CASE-WHEN not supported"
        );
    }

    #[test]
    fn nested_aggregate_subquery() {
        assert_eq!(
            message("SELECT * FROM (SELECT COUNT(*) AS n FROM t) AS s"),
            "sub select aggregate functions not supported"
        );
        let parsed = StatementParser::new()
            .parse("SELECT * FROM (SELECT COUNT(*) AS n FROM t) AS s")
            .unwrap();
        let mut flags = RoutingFlags::new();
        assert!(check_select(parsed.select().unwrap(), &mut flags, true).is_ok());
    }
}
