use std::collections::HashMap;

/// How the routed table is stored, which decides how write results merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableType {
    #[default]
    Unknown,
    Sharded,
    Single,
    /// Copied to every group; write counts are averaged.
    Global,
}

/// Accumulator of one routing pass: the target groups and the SQL each one
/// receives.
#[derive(Debug, Clone, Default)]
pub struct ShardingPlan {
    groups: Vec<String>,
    group_sql: HashMap<String, String>,
    original_sql: String,
    modified_sql: Option<String>,
    pub table_type: TableType,
    /// Every group got its own statement; never rebuild from the AST.
    pub rewritten_completely: bool,
}

impl ShardingPlan {
    pub fn new(original_sql: impl Into<String>) -> Self {
        Self {
            original_sql: original_sql.into(),
            ..Self::default()
        }
    }

    /// Adds `group` unless it is already targeted.
    pub fn add_group(&mut self, group: &str) {
        if !self.groups.iter().any(|g| g == group) {
            self.groups.push(group.to_string());
        }
    }

    pub fn add_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for g in groups {
            self.add_group(g.as_ref());
        }
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn clear_groups(&mut self) {
        self.groups.clear();
        self.group_sql.clear();
    }

    pub fn sort_groups(&mut self) {
        self.groups.sort();
    }

    /// Statement text for one group, targeting it if needed.
    pub fn add_group_sql(&mut self, group: &str, sql: impl Into<String>) {
        self.add_group(group);
        self.group_sql.insert(group.to_string(), sql.into());
    }

    /// Text shared by every group without a statement of its own.
    pub fn set_modified_sql(&mut self, sql: impl Into<String>) {
        self.modified_sql = Some(sql.into());
    }

    pub fn modified_sql(&self) -> Option<&str> {
        self.modified_sql.as_deref()
    }

    pub fn original_sql(&self) -> &str {
        &self.original_sql
    }

    /// The SQL to send to `group`: its own statement, else the shared
    /// rewrite, else the client's text.
    pub fn get_sql_for_group(&self, group: &str) -> &str {
        self.group_sql
            .get(group)
            .map(String::as_str)
            .or(self.modified_sql.as_deref())
            .unwrap_or(&self.original_sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_deduplicated_in_order() {
        let mut plan = ShardingPlan::new("SELECT 1");
        plan.add_groups(["g2", "g1", "g2"]);
        assert_eq!(plan.groups(), ["g2", "g1"]);
        plan.sort_groups();
        assert_eq!(plan.groups(), ["g1", "g2"]);
    }

    #[test]
    fn sql_lookup_falls_back() {
        let mut plan = ShardingPlan::new("INSERT INTO t VALUES (1)");
        assert_eq!(plan.get_sql_for_group("g1"), "INSERT INTO t VALUES (1)");
        plan.set_modified_sql("modified");
        assert_eq!(plan.get_sql_for_group("g1"), "modified");
        plan.add_group_sql("g2", "own");
        assert_eq!(plan.get_sql_for_group("g2"), "own");
        assert_eq!(plan.get_sql_for_group("g1"), "modified");
        assert!(plan.has_group("g2"));
    }
}
