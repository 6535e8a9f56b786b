use std::collections::HashMap;

/// Logical table layout as the application sees it.
pub trait SchemaMetaData {
    /// Column names of `table` in declaration order, `None` if unknown.
    fn columns(&self, table: &str) -> Option<Vec<String>>;

    fn contains_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|columns| columns.iter().any(|c| c.eq_ignore_ascii_case(column)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySchema {
    tables: HashMap<String, Vec<String>>,
}

impl InMemorySchema {
    pub fn with_table<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_table(table, columns);
        self
    }

    pub fn add_table<I, S>(&mut self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.insert(
            table.to_ascii_lowercase(),
            columns.into_iter().map(Into::into).collect(),
        );
    }
}

impl SchemaMetaData for InMemorySchema {
    fn columns(&self, table: &str) -> Option<Vec<String>> {
        self.tables.get(&table.to_ascii_lowercase()).cloned()
    }
}
