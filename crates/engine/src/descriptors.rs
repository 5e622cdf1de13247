//! What a merge needs to know about the statement, and how that is bound to
//! the columns a shard actually returned.

use crate::compare::{CompareFamily, FieldType};
use crate::error::{MergeError, Result};
use crate::packet::FieldDef;

pub const MAX_ORDER_COLS: usize = 16;
pub const MAX_GROUP_COLS: usize = 16;

/// A column named by ORDER BY or GROUP BY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// 1-based select-list position.
    Ordinal(u64),
    Name {
        table: Option<String>,
        name: String,
    },
}

impl ColumnRef {
    pub fn name(name: impl Into<String>) -> Self {
        ColumnRef::Name {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        ColumnRef::Name {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    fn label(&self) -> String {
        match self {
            ColumnRef::Ordinal(n) => n.to_string(),
            ColumnRef::Name { name, .. } => name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub column: ColumnRef,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Max => "MAX",
            AggregateKind::Min => "MIN",
        }
    }
}

/// An aggregate in the select list, by 0-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateItem {
    pub position: usize,
    pub function: AggregateKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Integer,
    Float,
    Text,
}

/// A HAVING predicate detached from the statement, evaluated on folded rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HavingFilter {
    pub column_index: usize,
    pub op: CompareOp,
    pub value: String,
    pub literal: LiteralKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Select,
    ShowWarnings,
    /// EXPLAIN: the first shard's answer stands for all.
    Explain,
    /// INSERT/UPDATE/DELETE/SET and transaction control.
    Modify { global_table: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSpec {
    pub kind: MergeKind,
    pub order_by: Vec<OrderItem>,
    pub group_by: Vec<ColumnRef>,
    pub aggregates: Vec<AggregateItem>,
    pub distinct: bool,
    pub limit: Option<u64>,
    pub offset: u64,
    pub having: Option<HavingFilter>,
    /// Buffered output size that triggers a flush.
    pub merged_output_size: usize,
}

impl Default for MergeSpec {
    fn default() -> Self {
        Self {
            kind: MergeKind::Select,
            order_by: Vec::new(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            distinct: false,
            limit: None,
            offset: 0,
            having: None,
            merged_output_size: 8192,
        }
    }
}

impl MergeSpec {
    pub fn select() -> Self {
        Self::default()
    }

    pub fn modify(global_table: bool) -> Self {
        Self {
            kind: MergeKind::Modify { global_table },
            ..Self::default()
        }
    }

    /// Field definitions must be parsed to resolve columns.
    pub fn needs_field_defs(&self) -> bool {
        !self.order_by.is_empty() || !self.group_by.is_empty() || !self.aggregates.is_empty()
    }
}

/// A resolved sort or group column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub pos: usize,
    pub field_type: FieldType,
    pub family: CompareFamily,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSlot {
    pub pos: usize,
    pub function: AggregateKind,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    pub order: Vec<SortKey>,
    pub group: Vec<SortKey>,
    pub aggregates: Vec<AggregateSlot>,
    /// Rows equal on every sort key collapse into one.
    pub distinct: bool,
}

fn find_field(fields: &[FieldDef], column: &ColumnRef) -> Option<usize> {
    match column {
        ColumnRef::Ordinal(n) => {
            let n = usize::try_from(*n).ok()?;
            (1..=fields.len()).contains(&n).then(|| n - 1)
        }
        ColumnRef::Name { table, name } => fields.iter().position(|f| {
            let table_ok = match table.as_deref() {
                Some(t) if !t.is_empty() => f.table == t || f.org_table == t,
                _ => true,
            };
            table_ok && (f.name == *name || f.org_name == *name)
        }),
    }
}

fn sort_key(fields: &[FieldDef], pos: usize, desc: bool) -> Result<SortKey> {
    let field_type = FieldType::from_code(fields[pos].column_type);
    Ok(SortKey {
        pos,
        field_type,
        family: field_type.family()?,
        desc,
    })
}

fn resolve_order(fields: &[FieldDef], items: &[OrderItem]) -> Result<Vec<SortKey>> {
    items
        .iter()
        .take(MAX_ORDER_COLS)
        .map(|item| {
            let pos = find_field(fields, &item.column).ok_or_else(|| {
                MergeError::Resolve(format!("order by:no {} in field list", item.column.label()))
            })?;
            sort_key(fields, pos, item.desc)
        })
        .collect()
}

/// Binds the statement's ORDER BY, GROUP BY and aggregates to field positions.
pub fn resolve(spec: &MergeSpec, fields: &[FieldDef]) -> Result<Resolved> {
    let mut order = resolve_order(fields, &spec.order_by)?;

    let mut group = spec
        .group_by
        .iter()
        .take(MAX_GROUP_COLS)
        .map(|column| {
            let pos = find_field(fields, column).ok_or_else(|| {
                MergeError::Resolve(format!("group by: no {} in field list", column.label()))
            })?;
            sort_key(fields, pos, false)
        })
        .collect::<Result<Vec<_>>>()?;

    let groups_every_column = !group.is_empty() && group.len() == fields.len();
    if let Some(first_order_desc) = order.first().map(|k| k.desc) {
        if let Some(first_group) = group.first_mut() {
            first_group.desc = first_order_desc;
        }
    } else if groups_every_column {
        let derived: Vec<OrderItem> = spec
            .group_by
            .iter()
            .take(MAX_ORDER_COLS)
            .map(|column| OrderItem {
                column: column.clone(),
                desc: false,
            })
            .collect();
        order = resolve_order(fields, &derived)?;
    }

    let aggregates = spec
        .aggregates
        .iter()
        .map(|a| {
            let field = fields.get(a.position).ok_or_else(|| {
                MergeError::Resolve(format!(
                    "aggregate {} at column {} beyond field list",
                    a.function.name(),
                    a.position + 1
                ))
            })?;
            Ok(AggregateSlot {
                pos: a.position,
                function: a.function,
                field_type: FieldType::from_code(field.column_type),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Resolved {
        order,
        group,
        aggregates,
        distinct: spec.distinct || groups_every_column,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(table: &str, name: &str, org: &str, ty: u8) -> FieldDef {
        FieldDef {
            table: table.into(),
            org_table: table.into(),
            name: name.into(),
            org_name: org.into(),
            column_type: ty,
            ..FieldDef::default()
        }
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            field("o", "id", "id", 0x08),
            field("o", "total", "amount", 0xf6),
            field("c", "name", "name", 0xfd),
        ]
    }

    #[test]
    fn resolves_names_aliases_and_ordinals() {
        let spec = MergeSpec {
            order_by: vec![
                OrderItem {
                    column: ColumnRef::name("amount"),
                    desc: true,
                },
                OrderItem {
                    column: ColumnRef::Ordinal(3),
                    desc: false,
                },
                OrderItem {
                    column: ColumnRef::qualified("o", "id"),
                    desc: false,
                },
            ],
            ..MergeSpec::select()
        };
        let resolved = resolve(&spec, &fields()).unwrap();
        let positions: Vec<usize> = resolved.order.iter().map(|k| k.pos).collect();
        assert_eq!(positions, vec![1, 2, 0]);
        assert_eq!(resolved.order[0].family, CompareFamily::Numeric);
        assert!(resolved.order[0].desc);
    }

    #[test]
    fn reports_missing_columns() {
        let spec = MergeSpec {
            group_by: vec![ColumnRef::qualified("c", "id")],
            ..MergeSpec::select()
        };
        let err = resolve(&spec, &fields()).unwrap_err();
        assert_eq!(err.to_string(), "group by: no id in field list");

        let spec = MergeSpec {
            order_by: vec![OrderItem {
                column: ColumnRef::Ordinal(9),
                desc: false,
            }],
            ..MergeSpec::select()
        };
        assert!(resolve(&spec, &fields()).is_err());
    }

    #[test]
    fn group_by_every_column_orders_and_dedups() {
        let spec = MergeSpec {
            group_by: vec![
                ColumnRef::name("id"),
                ColumnRef::name("total"),
                ColumnRef::name("name"),
            ],
            ..MergeSpec::select()
        };
        let resolved = resolve(&spec, &fields()).unwrap();
        assert_eq!(resolved.order.len(), 3);
        assert!(resolved.distinct);
    }

    #[test]
    fn first_group_follows_first_order_direction() {
        let spec = MergeSpec {
            group_by: vec![ColumnRef::name("name")],
            order_by: vec![OrderItem {
                column: ColumnRef::name("name"),
                desc: true,
            }],
            aggregates: vec![AggregateItem {
                position: 1,
                function: AggregateKind::Sum,
            }],
            ..MergeSpec::select()
        };
        let resolved = resolve(&spec, &fields()).unwrap();
        assert!(resolved.group[0].desc);
        assert_eq!(resolved.aggregates[0].field_type, FieldType::NewDecimal);
    }
}
