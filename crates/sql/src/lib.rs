//! SQL front-end for Shardgate: statement parsing, routing directives and
//! printing of rewritten statements.

pub mod ast;
pub mod construction;
pub mod directive;
pub mod parser;

pub use ast::{Expr, ExprKind, NodeId, Select, SourceItem, Statement};
pub use construction::{quote_string, SqlPrinter};
pub use directive::{parse_directive, RoutingDirective};
pub use parser::{ParsedStatement, StatementParser};
