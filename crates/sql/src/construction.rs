//! SQL text construction from the routing AST.
//!
//! Used whenever a statement must be sent to a shard in a form different from
//! the client's text: rebased LIMIT, synthetic ORDER BY, detached HAVING,
//! per-group INSERT rows and partition-mode physical table names.

use crate::ast::{
    Assignment, Delete, Expr, ExprKind, Insert, JoinKind, LockMode, OrderByItem, Select,
    SourceItem, UnaryOp, Update,
};
use std::fmt::Write;

/// Maps a table reference to the physical name it should be printed as.
pub type TableRenamer<'a> = &'a dyn Fn(&SourceItem) -> Option<String>;

/// Quotes a string literal, escaping backslashes and single quotes.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn push_ident(out: &mut String, name: &str) {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if plain {
        out.push_str(name);
    } else {
        out.push('`');
        out.push_str(&name.replace('`', "``"));
        out.push('`');
    }
}

#[derive(Default, Clone, Copy)]
pub struct SqlPrinter<'a> {
    rename: Option<TableRenamer<'a>>,
}

impl<'a> SqlPrinter<'a> {
    pub fn new() -> Self {
        Self { rename: None }
    }

    pub fn with_table_renamer(rename: TableRenamer<'a>) -> Self {
        Self {
            rename: Some(rename),
        }
    }

    /// Prints a select together with its UNION predecessors.
    pub fn select(&self, select: &Select) -> String {
        let mut out = String::with_capacity(128);
        self.select_chain(&mut out, select);
        out
    }

    fn select_chain(&self, out: &mut String, select: &Select) {
        if let Some(prior) = &select.prior {
            self.select_chain(out, prior);
            out.push_str(if select.union_all {
                " UNION ALL "
            } else {
                " UNION "
            });
        }
        self.select_branch(out, select);
    }

    fn select_branch(&self, out: &mut String, select: &Select) {
        out.push_str("SELECT ");
        if select.distinct {
            out.push_str("DISTINCT ");
        }
        for (i, column) in select.columns.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr_into(out, column, 0);
            if let Some(alias) = &column.alias {
                out.push_str(" AS ");
                push_ident(out, alias);
            }
        }
        if !select.from.is_empty() {
            out.push_str(" FROM ");
            for (i, source) in select.from.iter().enumerate() {
                self.source(out, source, i == 0);
            }
        }
        if let Some(w) = &select.where_clause {
            out.push_str(" WHERE ");
            self.expr_into(out, w, 0);
        }
        if !select.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            self.expr_list(out, &select.group_by);
        }
        if let Some(h) = &select.having {
            out.push_str(" HAVING ");
            self.expr_into(out, h, 0);
        }
        self.order_by(out, &select.order_by);
        match (select.limit, select.offset) {
            // A folded OFFSET is kept as an explicit zero, MySQL's `LIMIT 0, n` form.
            (Some(limit), Some(0)) => {
                let _ = write!(out, " LIMIT 0, {limit}");
            }
            (limit, offset) => {
                if let Some(limit) = limit {
                    let _ = write!(out, " LIMIT {limit}");
                }
                if let Some(offset) = offset {
                    let _ = write!(out, " OFFSET {offset}");
                }
            }
        }
        match select.lock {
            Some(LockMode::ForUpdate) => out.push_str(" FOR UPDATE"),
            Some(LockMode::Share) => out.push_str(" LOCK IN SHARE MODE"),
            None => {}
        }
    }

    fn source(&self, out: &mut String, source: &SourceItem, first: bool) {
        if !first {
            out.push_str(match source.join {
                JoinKind::None => ", ",
                JoinKind::Inner => " JOIN ",
                JoinKind::Left => " LEFT JOIN ",
                JoinKind::Right => " RIGHT JOIN ",
                JoinKind::Cross => " CROSS JOIN ",
            });
        }
        self.table_ref(out, source);
        if let Some(on) = &source.on {
            out.push_str(" ON ");
            self.expr_into(out, on, 0);
        }
        if !source.using.is_empty() {
            out.push_str(" USING (");
            for (i, col) in source.using.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_ident(out, col);
            }
            out.push(')');
        }
    }

    fn table_ref(&self, out: &mut String, source: &SourceItem) {
        if let Some(sub) = &source.subquery {
            out.push('(');
            self.select_chain(out, sub);
            out.push(')');
        } else if let Some(table) = &source.table {
            if let Some(db) = &source.db {
                push_ident(out, db);
                out.push('.');
            }
            match self.rename.and_then(|r| r(source)) {
                Some(physical) => {
                    push_ident(out, &physical);
                    if source.alias.is_none() {
                        out.push_str(" AS ");
                        push_ident(out, table);
                    }
                }
                None => push_ident(out, table),
            }
        }
        if let Some(alias) = &source.alias {
            out.push_str(" AS ");
            push_ident(out, alias);
        }
    }

    fn order_by(&self, out: &mut String, items: &[OrderByItem]) {
        if items.is_empty() {
            return;
        }
        out.push_str(" ORDER BY ");
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr_into(out, &item.expr, 0);
            if item.desc {
                out.push_str(" DESC");
            }
        }
    }

    fn expr_list(&self, out: &mut String, exprs: &[Expr]) {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr_into(out, e, 0);
        }
    }

    pub fn expr(&self, e: &Expr) -> String {
        let mut out = String::new();
        self.expr_into(&mut out, e, 0);
        out
    }

    /// Writes `e`, parenthesised when it binds looser than its context.
    fn expr_into(&self, out: &mut String, e: &Expr, parent_prec: u8) {
        match &e.kind {
            ExprKind::Str(s) => out.push_str(&quote_string(s)),
            ExprKind::Integer(n) => {
                let _ = write!(out, "{n}");
            }
            ExprKind::Binary { op, left, right } => {
                let prec = op.precedence();
                let wrap = prec < parent_prec;
                if wrap {
                    out.push('(');
                }
                self.expr_into(out, left, prec);
                out.push(' ');
                out.push_str(op.as_str());
                out.push(' ');
                let right_prec = if op.is_logical() { prec } else { prec + 1 };
                self.expr_into(out, right, right_prec);
                if wrap {
                    out.push(')');
                }
            }
            ExprKind::Unary { op, expr } => {
                out.push_str(match op {
                    UnaryOp::Minus => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::BitNot => "~",
                });
                self.expr_into(out, expr, 9);
            }
            ExprKind::Not(inner) => {
                let wrap = parent_prec > 4;
                if wrap {
                    out.push('(');
                }
                out.push_str("NOT ");
                self.expr_into(out, inner, 4);
                if wrap {
                    out.push(')');
                }
            }
            ExprKind::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.wrapped(out, parent_prec > 5, |p, out| {
                    p.expr_into(out, expr, 6);
                    out.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                    p.expr_into(out, low, 6);
                    out.push_str(" AND ");
                    p.expr_into(out, high, 6);
                });
            }
            ExprKind::InList {
                expr,
                list,
                negated,
            } => {
                self.wrapped(out, parent_prec > 5, |p, out| {
                    p.expr_into(out, expr, 6);
                    out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                    p.expr_list(out, list);
                    out.push(')');
                });
            }
            ExprKind::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                self.wrapped(out, parent_prec > 5, |p, out| {
                    p.expr_into(out, expr, 6);
                    out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                    p.select_chain(out, subquery);
                    out.push(')');
                });
            }
            ExprKind::Exists { subquery, negated } => {
                out.push_str(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.select_chain(out, subquery);
                out.push(')');
            }
            ExprKind::Subquery(subquery) => {
                out.push('(');
                self.select_chain(out, subquery);
                out.push(')');
            }
            ExprKind::Function {
                name,
                args,
                distinct,
            } => {
                out.push_str(name);
                out.push('(');
                if *distinct {
                    out.push_str("DISTINCT ");
                }
                self.expr_list(out, args);
                out.push(')');
            }
            ExprKind::Like {
                expr,
                pattern,
                negated,
            } => {
                self.wrapped(out, parent_prec > 5, |p, out| {
                    p.expr_into(out, expr, 6);
                    out.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                    p.expr_into(out, pattern, 6);
                });
            }
            ExprKind::IsNull { expr, negated } => {
                self.wrapped(out, parent_prec > 5, |p, out| {
                    p.expr_into(out, expr, 6);
                    out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
                });
            }
            ExprKind::Case(_) | ExprKind::Other(_) if parent_prec > 0 => {
                out.push('(');
                out.push_str(&e.text);
                out.push(')');
            }
            _ => out.push_str(&e.text),
        }
    }

    fn wrapped(&self, out: &mut String, wrap: bool, body: impl FnOnce(&Self, &mut String)) {
        if wrap {
            out.push('(');
        }
        body(self, out);
        if wrap {
            out.push(')');
        }
    }

    fn assignments(&self, out: &mut String, assignments: &[Assignment]) {
        for (i, a) in assignments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr_into(out, &a.column, 0);
            out.push_str(" = ");
            self.expr_into(out, &a.value, 0);
        }
    }

    /// Prints an INSERT. `rows` restricts the VALUES list to the given row
    /// indexes, in order.
    pub fn insert(&self, insert: &Insert, rows: Option<&[usize]>) -> String {
        let mut out = String::with_capacity(128);
        out.push_str(if insert.replace { "REPLACE " } else { "INSERT " });
        if insert.ignore {
            out.push_str("IGNORE ");
        }
        out.push_str("INTO ");
        self.table_ref(&mut out, &insert.table);
        if !insert.columns.is_empty() {
            out.push_str(" (");
            for (i, col) in insert.columns.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_ident(&mut out, col);
            }
            out.push(')');
        }
        if let Some(select) = &insert.select {
            out.push(' ');
            self.select_chain(&mut out, select);
        } else {
            out.push_str(" VALUES ");
            let all: Vec<usize>;
            let picked = match rows {
                Some(r) => r,
                None => {
                    all = (0..insert.rows.len()).collect();
                    &all
                }
            };
            for (n, idx) in picked.iter().enumerate() {
                let Some(row) = insert.rows.get(*idx) else {
                    continue;
                };
                if n > 0 {
                    out.push(',');
                }
                out.push('(');
                self.expr_list(&mut out, row);
                out.push(')');
            }
        }
        if !insert.on_duplicate.is_empty() {
            out.push_str(" ON DUPLICATE KEY UPDATE ");
            self.assignments(&mut out, &insert.on_duplicate);
        }
        out
    }

    pub fn update(&self, update: &Update) -> String {
        let mut out = String::with_capacity(128);
        out.push_str("UPDATE ");
        self.table_ref(&mut out, &update.table);
        out.push_str(" SET ");
        self.assignments(&mut out, &update.assignments);
        if let Some(w) = &update.where_clause {
            out.push_str(" WHERE ");
            self.expr_into(&mut out, w, 0);
        }
        self.order_by(&mut out, &update.order_by);
        if let Some(limit) = update.limit {
            let _ = write!(out, " LIMIT {limit}");
        }
        out
    }

    pub fn delete(&self, delete: &Delete) -> String {
        let mut out = String::with_capacity(128);
        out.push_str("DELETE FROM ");
        self.table_ref(&mut out, &delete.table);
        if let Some(w) = &delete.where_clause {
            out.push_str(" WHERE ");
            self.expr_into(&mut out, w, 0);
        }
        self.order_by(&mut out, &delete.order_by);
        if let Some(limit) = delete.limit {
            let _ = write!(out, " LIMIT {limit}");
        }
        out
    }
}
