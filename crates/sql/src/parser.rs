//! MySQL front-end: parses statement text with `sqlparser` and lowers the
//! result into the routing AST.

use crate::ast::{
    Assignment, BinaryOp, Delete, Expr, ExprKind, Insert, JoinKind, LockMode, NodeId, OrderByItem,
    Select, ShowTableKind, SourceItem, Statement, UnaryOp, Update,
};
use crate::directive::{parse_directive, RoutingDirective};
use shardgate_common::error::{Error, Result};
use sqlparser::ast as sp;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// A statement ready for routing: the lowered tree plus the text it came from.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub sql: String,
    pub statement: Statement,
    /// Statement was prefixed with `EXPLAIN`.
    pub explain: bool,
    pub directive: Option<RoutingDirective>,
}

impl ParsedStatement {
    pub fn select(&self) -> Option<&Select> {
        match &self.statement {
            Statement::Select(s) => Some(&**s),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct StatementParser {}

impl StatementParser {
    pub fn new() -> Self {
        Self {}
    }

    pub fn parse(&self, sql: &str) -> Result<ParsedStatement> {
        let directive = parse_directive(sql)?;
        let dialect = MySqlDialect {};
        if let Some(Statement::ShowWarnings) = classify_by_keyword(sql) {
            return Ok(ParsedStatement {
                sql: sql.to_string(),
                statement: Statement::ShowWarnings,
                explain: false,
                directive,
            });
        }
        let (statement, explain) = match Parser::parse_sql(&dialect, sql) {
            Ok(mut statements) => {
                if statements.len() != 1 {
                    return Err(Error::NotSupported(
                        "Exactly one statement is required".to_string(),
                    ));
                }
                let statement = statements.remove(0);
                Lowering::default().statement(&statement)?
            }
            Err(e) => match classify_by_keyword(sql) {
                Some(statement) => {
                    debug!(error = %e, kind = statement.kind_name(), "classified statement by keyword");
                    (statement, false)
                }
                None => return Err(e.into()),
            },
        };
        Ok(ParsedStatement {
            sql: sql.to_string(),
            statement,
            explain,
            directive,
        })
    }
}

/// First words of the statement once leading comments are skipped.
fn leading_words(sql: &str) -> Vec<String> {
    let mut rest = sql.trim_start();
    while let Some(stripped) = rest.strip_prefix("/*") {
        match stripped.find("*/") {
            Some(end) => rest = stripped[end + 2..].trim_start(),
            None => return Vec::new(),
        }
    }
    rest.split(|c: char| c.is_whitespace() || c == ';' || c == '=')
        .filter(|w| !w.is_empty())
        .take(3)
        .map(|w| w.to_string())
        .collect()
}

/// Classifies statements `sqlparser` does not understand but which route by
/// kind alone.
fn classify_by_keyword(sql: &str) -> Option<Statement> {
    let words = leading_words(sql);
    let first = words.first()?.to_ascii_uppercase();
    let second = words.get(1).map(|w| w.to_ascii_uppercase());
    match first.as_str() {
        "SHOW" if second.as_deref() == Some("WARNINGS") => Some(Statement::ShowWarnings),
        "SHOW" => Some(Statement::Show),
        "SET" => {
            let autocommit = match (second.as_deref(), words.get(2)) {
                (Some(var), Some(value)) if var.trim_start_matches('@') == "AUTOCOMMIT" => {
                    parse_switch(value)
                }
                _ => None,
            };
            Some(Statement::Set { autocommit })
        }
        "BEGIN" | "START" => Some(Statement::StartTransaction),
        "COMMIT" => Some(Statement::Commit),
        "ROLLBACK" => Some(Statement::Rollback),
        "CALL" => Some(Statement::Call),
        "USE" => words.get(1).map(|db| Statement::Use(db.trim_matches('`').to_string())),
        "DESC" | "DESCRIBE" => {
            let name = words.get(1)?;
            let (db, table) = split_qualified(name);
            Some(Statement::ShowTable {
                kind: ShowTableKind::Describe,
                db,
                table,
            })
        }
        _ => None,
    }
}

fn split_qualified(name: &str) -> (Option<String>, String) {
    let name = name.replace('`', "");
    match name.split_once('.') {
        Some((db, table)) => (Some(db.to_string()), table.to_string()),
        None => (None, name),
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim_matches(|c| c == '\'' || c == '"').to_ascii_uppercase().as_str() {
        "1" | "ON" | "TRUE" => Some(true),
        "0" | "OFF" | "FALSE" => Some(false),
        _ => None,
    }
}

fn object_parts(name: &sp::ObjectName) -> Vec<String> {
    name.0.iter().map(|i| i.value.clone()).collect()
}

fn literal_u64(e: &sp::Expr) -> Result<u64> {
    match e {
        sp::Expr::Value(sp::Value::Number(n, _)) => n
            .parse()
            .map_err(|_| Error::NotSupported(format!("LIMIT/OFFSET value {n}"))),
        other => Err(Error::NotSupported(format!(
            "LIMIT/OFFSET must be an integer literal, got {other}"
        ))),
    }
}

fn append_prior(select: &mut Select, prior: Select) {
    match select.prior {
        Some(ref mut earlier) => append_prior(earlier, prior),
        None => select.prior = Some(Box::new(prior)),
    }
}

fn binary_op(op: &sp::BinaryOperator) -> BinaryOp {
    match op {
        sp::BinaryOperator::Eq => BinaryOp::Eq,
        sp::BinaryOperator::NotEq => BinaryOp::Ne,
        sp::BinaryOperator::Lt => BinaryOp::Lt,
        sp::BinaryOperator::LtEq => BinaryOp::Le,
        sp::BinaryOperator::Gt => BinaryOp::Gt,
        sp::BinaryOperator::GtEq => BinaryOp::Ge,
        sp::BinaryOperator::And => BinaryOp::And,
        sp::BinaryOperator::Or => BinaryOp::Or,
        sp::BinaryOperator::Xor => BinaryOp::Xor,
        sp::BinaryOperator::Plus => BinaryOp::Plus,
        sp::BinaryOperator::Minus => BinaryOp::Minus,
        sp::BinaryOperator::Multiply => BinaryOp::Multiply,
        sp::BinaryOperator::Divide => BinaryOp::Divide,
        sp::BinaryOperator::Modulo => BinaryOp::Modulo,
        _ => BinaryOp::Other,
    }
}

#[derive(Default)]
struct Lowering {
    next_id: NodeId,
}

impl Lowering {
    fn next(&mut self) -> NodeId {
        self.next_id += 1;
        self.next_id
    }

    fn statement(&mut self, stmt: &sp::Statement) -> Result<(Statement, bool)> {
        let lowered = match stmt {
            sp::Statement::Query(q) => Statement::Select(Box::new(self.query(q)?)),
            sp::Statement::Insert(insert) => self.insert(insert)?,
            sp::Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => {
                if !table.joins.is_empty() || from.is_some() {
                    Statement::Unsupported("multi-table UPDATE".to_string())
                } else {
                    let table = self.source(&table.relation, JoinKind::None, None)?;
                    let assignments = self.assignments(assignments)?;
                    let where_clause = selection.as_ref().map(|e| self.expr(e)).transpose()?;
                    Statement::Update(Box::new(Update {
                        table,
                        assignments,
                        where_clause,
                        order_by: Vec::new(),
                        limit: None,
                    }))
                }
            }
            sp::Statement::Delete(delete) => self.delete(delete)?,
            sp::Statement::SetVariable {
                variables, value, ..
            } => {
                let autocommit = match (variables, value.as_slice()) {
                    (sp::OneOrManyWithParens::One(name), [v]) => {
                        let is_autocommit = name
                            .0
                            .last()
                            .is_some_and(|i| i.value.trim_start_matches('@').eq_ignore_ascii_case("autocommit"));
                        if is_autocommit {
                            parse_switch(&v.to_string())
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                Statement::Set { autocommit }
            }
            sp::Statement::SetNames { .. }
            | sp::Statement::SetNamesDefault { .. }
            | sp::Statement::SetTransaction { .. } => Statement::Set { autocommit: None },
            sp::Statement::StartTransaction { .. } => Statement::StartTransaction,
            sp::Statement::Commit { .. } => Statement::Commit,
            sp::Statement::Rollback { .. } => Statement::Rollback,
            sp::Statement::ShowColumns { show_options, .. } => {
                match show_options
                    .show_in
                    .as_ref()
                    .and_then(|i| i.parent_name.as_ref())
                {
                    Some(name) => self.show_table(ShowTableKind::Columns, name),
                    None => Statement::Show,
                }
            }
            sp::Statement::ShowCreate {
                obj_type: sp::ShowCreateObject::Table,
                obj_name,
            } => self.show_table(ShowTableKind::Create, obj_name),
            sp::Statement::ExplainTable { table_name, .. } => {
                self.show_table(ShowTableKind::Describe, table_name)
            }
            sp::Statement::Explain { statement, .. } => {
                let (inner, _) = self.statement(statement)?;
                return Ok((inner, true));
            }
            sp::Statement::Call(_) => Statement::Call,
            sp::Statement::Use(sp::Use::Object(name) | sp::Use::Database(name) | sp::Use::Schema(name)) => {
                Statement::Use(object_parts(name).join("."))
            }
            sp::Statement::Drop {
                object_type: sp::ObjectType::Database | sp::ObjectType::Schema,
                names,
                ..
            } => Statement::DropDatabase(names.first().map(|n| n.to_string()).unwrap_or_default()),
            sp::Statement::Drop { .. }
            | sp::Statement::CreateTable(_)
            | sp::Statement::AlterTable { .. }
            | sp::Statement::CreateIndex(_)
            | sp::Statement::CreateView { .. }
            | sp::Statement::CreateDatabase { .. }
            | sp::Statement::CreateSchema { .. }
            | sp::Statement::Truncate { .. } => Statement::Ddl,
            sp::Statement::ShowCreate { .. }
            | sp::Statement::ShowTables { .. }
            | sp::Statement::ShowVariables { .. }
            | sp::Statement::ShowVariable { .. }
            | sp::Statement::ShowStatus { .. }
            | sp::Statement::ShowDatabases { .. }
            | sp::Statement::ShowFunctions { .. }
            | sp::Statement::ShowCollation { .. } => Statement::Show,
            _ => Statement::Other,
        };
        Ok((lowered, false))
    }

    fn show_table(&mut self, kind: ShowTableKind, name: &sp::ObjectName) -> Statement {
        let mut parts = object_parts(name);
        let table = parts.pop().unwrap_or_default();
        Statement::ShowTable {
            kind,
            db: parts.pop(),
            table,
        }
    }

    fn table_name(&mut self, name: &sp::ObjectName) -> Result<SourceItem> {
        let mut parts = object_parts(name);
        let table = parts
            .pop()
            .ok_or_else(|| Error::NotSupported("empty table name".to_string()))?;
        Ok(SourceItem {
            id: self.next(),
            db: parts.pop(),
            table: Some(table),
            alias: None,
            subquery: None,
            join: JoinKind::None,
            on: None,
            using: Vec::new(),
        })
    }

    fn insert(&mut self, insert: &sp::Insert) -> Result<Statement> {
        let table = self.table_name(&insert.table_name)?;
        let columns = insert.columns.iter().map(|c| c.value.clone()).collect();
        let mut rows = Vec::new();
        let mut select = None;
        if let Some(source) = &insert.source {
            match source.body.as_ref() {
                sp::SetExpr::Values(values) => {
                    for row in &values.rows {
                        let mut lowered = Vec::with_capacity(row.len());
                        for e in row {
                            lowered.push(self.expr(e)?);
                        }
                        rows.push(lowered);
                    }
                }
                _ => select = Some(Box::new(self.query(source)?)),
            }
        }
        let on_duplicate = match &insert.on {
            Some(sp::OnInsert::DuplicateKeyUpdate(assignments)) => self.assignments(assignments)?,
            _ => Vec::new(),
        };
        Ok(Statement::Insert(Box::new(Insert {
            table,
            columns,
            rows,
            select,
            on_duplicate,
            ignore: insert.ignore,
            replace: insert.replace_into,
        })))
    }

    fn delete(&mut self, delete: &sp::Delete) -> Result<Statement> {
        let sources = match &delete.from {
            sp::FromTable::WithFromKeyword(v) | sp::FromTable::WithoutKeyword(v) => v,
        };
        if sources.len() != 1
            || !sources[0].joins.is_empty()
            || !delete.tables.is_empty()
            || delete.using.is_some()
        {
            return Ok(Statement::Unsupported("multi-table DELETE".to_string()));
        }
        let table = self.source(&sources[0].relation, JoinKind::None, None)?;
        let where_clause = delete
            .selection
            .as_ref()
            .map(|e| self.expr(e))
            .transpose()?;
        let order_by = self.order_by(&delete.order_by)?;
        let limit = delete.limit.as_ref().map(literal_u64).transpose()?;
        Ok(Statement::Delete(Box::new(Delete {
            table,
            where_clause,
            order_by,
            limit,
        })))
    }

    fn assignments(&mut self, assignments: &[sp::Assignment]) -> Result<Vec<Assignment>> {
        let mut out = Vec::with_capacity(assignments.len());
        for a in assignments {
            let sp::AssignmentTarget::ColumnName(name) = &a.target else {
                return Err(Error::NotSupported("tuple assignment".to_string()));
            };
            let parts = object_parts(name);
            let kind = if parts.len() == 1 {
                ExprKind::Id(parts[0].clone())
            } else {
                ExprKind::Dotted(parts)
            };
            let column = Expr::new(self.next(), kind, name.to_string());
            let value = self.expr(&a.value)?;
            out.push(Assignment { column, value });
        }
        Ok(out)
    }

    fn query(&mut self, q: &sp::Query) -> Result<Select> {
        if q.with.is_some() {
            return Err(Error::NotSupported("WITH clause".to_string()));
        }
        let mut head = self.set_expr(&q.body)?;
        if let Some(order_by) = &q.order_by {
            head.order_by = self.order_by(&order_by.exprs)?;
        }
        head.limit = q.limit.as_ref().map(literal_u64).transpose()?;
        head.offset = q
            .offset
            .as_ref()
            .map(|o| literal_u64(&o.value))
            .transpose()?;
        head.lock = q.locks.first().map(|l| match l.lock_type {
            sp::LockType::Update => LockMode::ForUpdate,
            sp::LockType::Share => LockMode::Share,
        });
        Ok(head)
    }

    fn set_expr(&mut self, body: &sp::SetExpr) -> Result<Select> {
        match body {
            sp::SetExpr::Select(s) => self.select(s),
            sp::SetExpr::Query(q) => self.query(q),
            sp::SetExpr::SetOperation {
                op: sp::SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => {
                let prior = self.set_expr(left)?;
                let mut current = self.set_expr(right)?;
                current.union_all = matches!(set_quantifier, sp::SetQuantifier::All);
                append_prior(&mut current, prior);
                Ok(current)
            }
            sp::SetExpr::SetOperation { op, .. } => {
                Err(Error::NotSupported(format!("{op} is not supported")))
            }
            other => Err(Error::NotSupported(format!("query body {other}"))),
        }
    }

    fn select(&mut self, s: &sp::Select) -> Result<Select> {
        let distinct = match &s.distinct {
            None => false,
            Some(sp::Distinct::Distinct) => true,
            Some(sp::Distinct::On(_)) => {
                return Err(Error::NotSupported("DISTINCT ON".to_string()))
            }
        };
        let mut columns = Vec::with_capacity(s.projection.len());
        for item in &s.projection {
            let column = match item {
                sp::SelectItem::UnnamedExpr(e) => self.expr(e)?,
                sp::SelectItem::ExprWithAlias { expr, alias } => {
                    let mut e = self.expr(expr)?;
                    e.alias = Some(alias.value.clone());
                    e
                }
                sp::SelectItem::Wildcard(_) => Expr::new(self.next(), ExprKind::Star, "*"),
                sp::SelectItem::QualifiedWildcard(name, _) => Expr::new(
                    self.next(),
                    ExprKind::QualifiedStar(object_parts(name)),
                    format!("{name}.*"),
                ),
            };
            columns.push(column);
        }

        let mut from = Vec::new();
        for twj in &s.from {
            from.push(self.source(&twj.relation, JoinKind::None, None)?);
            for j in &twj.joins {
                let (kind, constraint) = match &j.join_operator {
                    sp::JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
                    sp::JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
                    sp::JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
                    sp::JoinOperator::CrossJoin => (JoinKind::Cross, None),
                    other => {
                        return Err(Error::NotSupported(format!("join type {other:?}")))
                    }
                };
                from.push(self.source(&j.relation, kind, constraint)?);
            }
        }

        let where_clause = s.selection.as_ref().map(|e| self.expr(e)).transpose()?;
        let group_by = match &s.group_by {
            sp::GroupByExpr::Expressions(exprs, _) => {
                let mut out = Vec::with_capacity(exprs.len());
                for e in exprs {
                    out.push(self.expr(e)?);
                }
                out
            }
            sp::GroupByExpr::All(_) => {
                return Err(Error::NotSupported("GROUP BY ALL".to_string()))
            }
        };
        let having = s.having.as_ref().map(|e| self.expr(e)).transpose()?;
        Ok(Select {
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            ..Select::default()
        })
    }

    fn source(
        &mut self,
        factor: &sp::TableFactor,
        join: JoinKind,
        constraint: Option<&sp::JoinConstraint>,
    ) -> Result<SourceItem> {
        let mut item = match factor {
            sp::TableFactor::Table { name, alias, .. } => {
                let mut item = self.table_name(name)?;
                item.alias = alias.as_ref().map(|a| a.name.value.clone());
                item
            }
            sp::TableFactor::Derived {
                subquery, alias, ..
            } => {
                let select = self.query(subquery)?;
                SourceItem {
                    id: self.next(),
                    db: None,
                    table: None,
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                    subquery: Some(Box::new(select)),
                    join: JoinKind::None,
                    on: None,
                    using: Vec::new(),
                }
            }
            other => return Err(Error::NotSupported(format!("table factor {other}"))),
        };
        item.join = join;
        match constraint {
            Some(sp::JoinConstraint::On(e)) => item.on = Some(self.expr(e)?),
            Some(sp::JoinConstraint::Using(cols)) => {
                item.using = cols.iter().map(|c| c.to_string()).collect()
            }
            Some(sp::JoinConstraint::Natural) => {
                return Err(Error::NotSupported("NATURAL JOIN".to_string()))
            }
            Some(sp::JoinConstraint::None) | None => {}
        }
        Ok(item)
    }

    fn order_by(&mut self, items: &[sp::OrderByExpr]) -> Result<Vec<OrderByItem>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(OrderByItem {
                expr: self.expr(&item.expr)?,
                desc: item.asc == Some(false),
            });
        }
        Ok(out)
    }

    fn exprs(&mut self, list: &[sp::Expr]) -> Result<Vec<Expr>> {
        let mut out = Vec::with_capacity(list.len());
        for e in list {
            out.push(self.expr(e)?);
        }
        Ok(out)
    }

    fn expr(&mut self, e: &sp::Expr) -> Result<Expr> {
        let kind = match e {
            sp::Expr::Nested(inner) => return self.expr(inner),
            sp::Expr::Identifier(ident) => ExprKind::Id(ident.value.clone()),
            sp::Expr::CompoundIdentifier(idents) if idents.len() <= 3 => {
                ExprKind::Dotted(idents.iter().map(|i| i.value.clone()).collect())
            }
            sp::Expr::Value(v) => match v {
                sp::Value::Number(n, _) => match n.parse::<i64>() {
                    Ok(i) => ExprKind::Integer(i),
                    Err(_) => ExprKind::Float(n.clone()),
                },
                sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => {
                    ExprKind::Str(s.clone())
                }
                sp::Value::Boolean(b) => ExprKind::Bool(*b),
                sp::Value::Null => ExprKind::Null,
                _ => ExprKind::Other(Vec::new()),
            },
            sp::Expr::UnaryOp { op, expr } => {
                let inner = self.expr(expr)?;
                let folded = match (op, &inner.kind) {
                    (sp::UnaryOperator::Minus, ExprKind::Integer(n)) => Some(ExprKind::Integer(-n)),
                    (sp::UnaryOperator::Minus, ExprKind::Float(f)) => {
                        Some(ExprKind::Float(format!("-{f}")))
                    }
                    (sp::UnaryOperator::Plus, ExprKind::Integer(_) | ExprKind::Float(_)) => {
                        Some(inner.kind.clone())
                    }
                    _ => None,
                };
                match (folded, op) {
                    (Some(kind), _) => kind,
                    (None, sp::UnaryOperator::Not) => ExprKind::Not(Box::new(inner)),
                    (None, sp::UnaryOperator::Minus) => ExprKind::Unary {
                        op: UnaryOp::Minus,
                        expr: Box::new(inner),
                    },
                    (None, sp::UnaryOperator::Plus) => ExprKind::Unary {
                        op: UnaryOp::Plus,
                        expr: Box::new(inner),
                    },
                    (None, _) => ExprKind::Unary {
                        op: UnaryOp::BitNot,
                        expr: Box::new(inner),
                    },
                }
            }
            sp::Expr::BinaryOp { left, op, right } => ExprKind::Binary {
                op: binary_op(op),
                left: Box::new(self.expr(left)?),
                right: Box::new(self.expr(right)?),
            },
            sp::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => ExprKind::Between {
                expr: Box::new(self.expr(expr)?),
                low: Box::new(self.expr(low)?),
                high: Box::new(self.expr(high)?),
                negated: *negated,
            },
            sp::Expr::InList {
                expr,
                list,
                negated,
            } => ExprKind::InList {
                expr: Box::new(self.expr(expr)?),
                list: self.exprs(list)?,
                negated: *negated,
            },
            sp::Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => ExprKind::InSubquery {
                expr: Box::new(self.expr(expr)?),
                subquery: Box::new(self.query(subquery)?),
                negated: *negated,
            },
            sp::Expr::Exists { subquery, negated } => ExprKind::Exists {
                subquery: Box::new(self.query(subquery)?),
                negated: *negated,
            },
            sp::Expr::Subquery(q) => ExprKind::Subquery(Box::new(self.query(q)?)),
            sp::Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => ExprKind::Like {
                expr: Box::new(self.expr(expr)?),
                pattern: Box::new(self.expr(pattern)?),
                negated: *negated,
            },
            sp::Expr::IsNull(inner) => ExprKind::IsNull {
                expr: Box::new(self.expr(inner)?),
                negated: false,
            },
            sp::Expr::IsNotNull(inner) => ExprKind::IsNull {
                expr: Box::new(self.expr(inner)?),
                negated: true,
            },
            sp::Expr::Function(f) => self.function(f)?,
            sp::Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let mut parts = Vec::new();
                if let Some(op) = operand {
                    parts.push(self.expr(op)?);
                }
                parts.extend(self.exprs(conditions)?);
                parts.extend(self.exprs(results)?);
                if let Some(e) = else_result {
                    parts.push(self.expr(e)?);
                }
                ExprKind::Case(parts)
            }
            _ => ExprKind::Other(Vec::new()),
        };
        Ok(Expr::new(self.next(), kind, e.to_string()))
    }

    fn function(&mut self, f: &sp::Function) -> Result<ExprKind> {
        let mut args = Vec::new();
        let mut distinct = false;
        if let sp::FunctionArguments::List(list) = &f.args {
            distinct = matches!(list.duplicate_treatment, Some(sp::DuplicateTreatment::Distinct));
            for arg in &list.args {
                let arg_expr = match arg {
                    sp::FunctionArg::Unnamed(a) => a,
                    sp::FunctionArg::Named { arg, .. } | sp::FunctionArg::ExprNamed { arg, .. } => {
                        arg
                    }
                };
                let lowered = match arg_expr {
                    sp::FunctionArgExpr::Expr(e) => self.expr(e)?,
                    sp::FunctionArgExpr::Wildcard => Expr::new(self.next(), ExprKind::Star, "*"),
                    sp::FunctionArgExpr::QualifiedWildcard(name) => Expr::new(
                        self.next(),
                        ExprKind::QualifiedStar(object_parts(name)),
                        format!("{name}.*"),
                    ),
                };
                args.push(lowered);
            }
        }
        Ok(ExprKind::Function {
            name: f.name.to_string(),
            args,
            distinct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_fallback_classifies_show_warnings() {
        assert_eq!(classify_by_keyword("SHOW WARNINGS"), Some(Statement::ShowWarnings));
        assert_eq!(
            classify_by_keyword("/* x */ set autocommit=0"),
            Some(Statement::Set {
                autocommit: Some(false)
            })
        );
        assert_eq!(classify_by_keyword("FLUSH TABLES"), None);
    }

    #[test]
    fn switch_values() {
        assert_eq!(parse_switch("ON"), Some(true));
        assert_eq!(parse_switch("'0'"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }
}
