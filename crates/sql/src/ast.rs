//! Statement tree consumed by the router, rewriter and merge-spec builder.
//!
//! Every expression and source item carries a [`NodeId`] that is unique
//! within one parsed statement. Routing attaches its findings to those ids in
//! a side table instead of mutating the tree, so the same statement can be
//! routed more than once.

use std::fmt;

pub type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Other,
}

impl BinaryOp {
    pub fn is_compare(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo
        )
    }

    /// The operator to use once both sides of a comparison are swapped.
    pub fn flipped(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Ge => BinaryOp::Le,
            other => *other,
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::Xor => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Other => 5,
            BinaryOp::Plus | BinaryOp::Minus => 6,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Other => "?",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    BitNot,
}

/// Aggregate functions the merge engine knows how to fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFn {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFn::Count),
            "sum" => Some(AggregateFn::Sum),
            "avg" => Some(AggregateFn::Avg),
            "max" => Some(AggregateFn::Max),
            "min" => Some(AggregateFn::Min),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Sum => "sum",
            AggregateFn::Avg => "avg",
            AggregateFn::Max => "max",
            AggregateFn::Min => "min",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Id(String),
    /// `table.column` or `db.table.column`.
    Dotted(Vec<String>),
    Integer(i64),
    Float(String),
    Str(String),
    Bool(bool),
    Null,
    Star,
    /// `t.*`
    QualifiedStar(Vec<String>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Not(Box<Expr>),
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Select>,
        negated: bool,
    },
    Exists {
        subquery: Box<Select>,
        negated: bool,
    },
    Subquery(Box<Select>),
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// `CASE ...`; operands kept for tree walks, printed from source text.
    Case(Vec<Expr>),
    /// Anything else, printed verbatim from `text`.
    Other(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    /// Source rendering of the expression, used for verbatim extraction.
    pub text: String,
    pub alias: Option<String>,
}

impl Expr {
    pub fn new(id: NodeId, kind: ExprKind, text: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            text: text.into(),
            alias: None,
        }
    }

    /// Bare or dotted column reference.
    pub fn is_field_name(&self) -> bool {
        matches!(self.kind, ExprKind::Id(_) | ExprKind::Dotted(_))
    }

    /// `(db, table, column)` of a column reference.
    pub fn field_parts(&self) -> Option<(Option<&str>, Option<&str>, &str)> {
        match &self.kind {
            ExprKind::Id(name) => Some((None, None, name.as_str())),
            ExprKind::Dotted(parts) => match parts.as_slice() {
                [table, column] => Some((None, Some(table.as_str()), column.as_str())),
                [db, table, column] => {
                    Some((Some(db.as_str()), Some(table.as_str()), column.as_str()))
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_star(&self) -> bool {
        matches!(self.kind, ExprKind::Star | ExprKind::QualifiedStar(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ExprKind::Function { .. })
    }

    pub fn binary(&self) -> Option<(BinaryOp, &Expr, &Expr)> {
        match &self.kind {
            ExprKind::Binary { op, left, right } => Some((*op, &**left, &**right)),
            _ => None,
        }
    }

    /// `(function, DISTINCT)` when this node is an aggregate call.
    pub fn aggregate(&self) -> Option<(AggregateFn, bool)> {
        match &self.kind {
            ExprKind::Function { name, distinct, .. } => {
                AggregateFn::from_name(name).map(|f| (f, *distinct))
            }
            _ => None,
        }
    }

    /// Direct children inside this statement (not inside nested selects).
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Binary { left, right, .. } => vec![&**left, &**right],
            ExprKind::Unary { expr, .. } | ExprKind::Not(expr) => vec![&**expr],
            ExprKind::Between {
                expr, low, high, ..
            } => vec![&**expr, &**low, &**high],
            ExprKind::InList { expr, list, .. } => {
                let mut v: Vec<&Expr> = vec![&**expr];
                v.extend(list.iter());
                v
            }
            ExprKind::InSubquery { expr, .. } => vec![&**expr],
            ExprKind::Like { expr, pattern, .. } => vec![&**expr, &**pattern],
            ExprKind::IsNull { expr, .. } => vec![&**expr],
            ExprKind::Function { args, .. } | ExprKind::Case(args) | ExprKind::Other(args) => {
                args.iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Nested selects reachable directly from this node.
    pub fn subquery(&self) -> Option<&Select> {
        match &self.kind {
            ExprKind::InSubquery { subquery, .. }
            | ExprKind::Exists { subquery, .. }
            | ExprKind::Subquery(subquery) => Some(&**subquery),
            _ => None,
        }
    }

    /// Pre-order walk over this node and its descendants, nested selects excluded.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        let mut stack = vec![self];
        while let Some(e) = stack.pop() {
            f(e);
            for child in e.children().into_iter().rev() {
                stack.push(child);
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if e.aggregate().is_some() {
                found = true;
            }
        });
        found
    }

    pub fn contains_case(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e.kind, ExprKind::Case(_)) {
                found = true;
            }
        });
        found
    }

    /// Shallow literal/identifier equality used to recognise `SET k = v`
    /// assignments that restate a `WHERE k = v` predicate.
    pub fn same_value(&self, other: &Expr) -> bool {
        match (&self.kind, &other.kind) {
            (ExprKind::Id(a), ExprKind::Id(b)) => a.eq_ignore_ascii_case(b),
            (ExprKind::Str(a), ExprKind::Str(b)) => a == b,
            (ExprKind::Integer(a), ExprKind::Integer(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// First source, or a comma-separated source.
    None,
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    pub id: NodeId,
    pub db: Option<String>,
    pub table: Option<String>,
    pub alias: Option<String>,
    pub subquery: Option<Box<Select>>,
    pub join: JoinKind,
    pub on: Option<Expr>,
    pub using: Vec<String>,
}

impl SourceItem {
    pub fn db_or<'a>(&'a self, default_db: &'a str) -> &'a str {
        self.db.as_deref().unwrap_or(default_db)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    ForUpdate,
    Share,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<Expr>,
    pub from: Vec<SourceItem>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub lock: Option<LockMode>,
    /// Earlier branch of a UNION chain.
    pub prior: Option<Box<Select>>,
    /// Whether this branch is joined to `prior` with `UNION ALL`.
    pub union_all: bool,
}

impl Select {
    /// This select and its UNION predecessors, head first.
    pub fn chain(&self) -> Vec<&Select> {
        let mut out = vec![self];
        let mut cur = self.prior.as_deref();
        while let Some(s) = cur {
            out.push(s);
            cur = s.prior.as_deref();
        }
        out
    }

    pub fn has_aggregate(&self) -> bool {
        self.columns.iter().any(|c| c.contains_aggregate())
    }

    /// Selects nested in FROM.
    pub fn from_subqueries(&self) -> impl Iterator<Item = &Select> {
        self.from.iter().filter_map(|s| s.subquery.as_deref())
    }

    /// Selects nested in WHERE as `IN (...)`/`EXISTS (...)`/scalar subqueries.
    pub fn where_subqueries(&self) -> Vec<&Select> {
        let mut out = Vec::new();
        if let Some(w) = &self.where_clause {
            w.walk(&mut |e| {
                if let Some(s) = e.subquery() {
                    out.push(s);
                }
            });
        }
        out
    }

    pub fn has_subquery(&self) -> bool {
        self.from.iter().any(|s| s.subquery.is_some()) || !self.where_subqueries().is_empty()
    }

    /// Index of the select-list column whose text or alias matches `text`.
    pub fn column_matching(&self, text: &str) -> Option<usize> {
        self.columns.iter().position(|c| {
            c.text.eq_ignore_ascii_case(text)
                || c.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(text))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: SourceItem,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
    pub select: Option<Box<Select>>,
    pub on_duplicate: Vec<Assignment>,
    pub ignore: bool,
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: SourceItem,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: SourceItem,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTableKind {
    Columns,
    Create,
    Describe,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Box<Select>),
    Insert(Box<Insert>),
    Update(Box<Update>),
    Delete(Box<Delete>),
    /// `SET ...`; `autocommit` carries the value when the statement toggles it.
    Set {
        autocommit: Option<bool>,
    },
    StartTransaction,
    Commit,
    Rollback,
    ShowTable {
        kind: ShowTableKind,
        db: Option<String>,
        table: String,
    },
    ShowWarnings,
    Show,
    Use(String),
    Ddl,
    DropDatabase(String),
    Call,
    /// A statement shape with no routing support, e.g. multi-table UPDATE.
    Unsupported(String),
    Other,
}

impl Statement {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Insert(_) => "INSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
            Statement::Set { .. } => "SET",
            Statement::StartTransaction => "START",
            Statement::Commit => "COMMIT",
            Statement::Rollback => "ROLLBACK",
            Statement::ShowTable { .. } => "SHOW TABLE",
            Statement::ShowWarnings => "SHOW WARNINGS",
            Statement::Show => "SHOW",
            Statement::Use(_) => "USE",
            Statement::Ddl => "DDL",
            Statement::DropDatabase(_) => "DROP DATABASE",
            Statement::Call => "CALL",
            Statement::Unsupported(_) => "UNSUPPORTED",
            Statement::Other => "OTHER",
        }
    }

    /// INSERT/UPDATE/DELETE.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: NodeId, name: &str) -> Expr {
        Expr::new(n, ExprKind::Id(name.into()), name)
    }

    #[test]
    fn flips_comparisons() {
        assert_eq!(BinaryOp::Lt.flipped(), BinaryOp::Gt);
        assert_eq!(BinaryOp::Ge.flipped(), BinaryOp::Le);
        assert_eq!(BinaryOp::Eq.flipped(), BinaryOp::Eq);
    }

    #[test]
    fn field_parts_of_dotted_names() {
        let e = Expr::new(1, ExprKind::Dotted(vec!["d".into(), "t".into(), "c".into()]), "d.t.c");
        assert_eq!(e.field_parts(), Some((Some("d"), Some("t"), "c")));
        assert_eq!(id(2, "c").field_parts(), Some((None, None, "c")));
    }

    #[test]
    fn finds_nested_aggregates() {
        let sum = Expr::new(
            3,
            ExprKind::Function {
                name: "SUM".into(),
                args: vec![id(1, "x")],
                distinct: false,
            },
            "SUM(x)",
        );
        let plus = Expr::new(
            4,
            ExprKind::Binary {
                op: BinaryOp::Plus,
                left: Box::new(sum),
                right: Box::new(Expr::new(5, ExprKind::Integer(1), "1")),
            },
            "SUM(x) + 1",
        );
        assert!(plus.contains_aggregate());
        assert!(plus.aggregate().is_none());
    }

    #[test]
    fn same_value_is_shallow() {
        let a = Expr::new(1, ExprKind::Integer(5), "5");
        let b = Expr::new(2, ExprKind::Integer(5), "5");
        let c = Expr::new(3, ExprKind::Float("5.0".into()), "5.0");
        assert!(a.same_value(&b));
        assert!(!a.same_value(&c));
    }
}
