//! Tabular catalog model
//!
//! A [`DataSet`] is an ordered list of named [`DataTable`]s. Table and column names
//! resolve case-insensitively. Row and table order is preserved everywhere so that
//! filtering and serialization stay deterministic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{DataType, MetadataError, Result, Value};

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    name: String,
    data_type: DataType,
    index: usize,
}

impl DataColumn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// One row, holding a value per column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataRow {
    values: Vec<Value>,
}

impl DataRow {
    pub fn value(&self, column: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(column).unwrap_or(&NULL)
    }

    pub fn set_value(&mut self, column: usize, value: impl Into<Value>) {
        if column >= self.values.len() {
            self.values.resize(column + 1, Value::Null);
        }
        self.values[column] = value.into();
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value_as_string(&self, column: usize) -> Option<&str> {
        self.value(column).as_str()
    }

    pub fn value_as_i32(&self, column: usize) -> Option<i32> {
        self.value(column).as_i32()
    }

    pub fn value_as_bool(&self, column: usize) -> Option<bool> {
        self.value(column).as_bool()
    }

    pub fn value_as_guid(&self, column: usize) -> Option<Uuid> {
        self.value(column).as_guid()
    }

    pub fn value_as_f64(&self, column: usize) -> Option<f64> {
        self.value(column).as_f64()
    }

    pub fn value_as_date_time(&self, column: usize) -> Option<DateTime<Utc>> {
        self.value(column).as_date_time()
    }
}

/// A named table
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    name: String,
    columns: Vec<DataColumn>,
    rows: Vec<DataRow>,
}

impl DataTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a column and return its index
    pub fn add_column(&mut self, name: impl Into<String>, data_type: DataType) -> usize {
        let index = self.columns.len();
        self.columns.push(DataColumn {
            name: name.into(),
            data_type,
            index,
        });
        index
    }

    /// Builder form of [`DataTable::add_column`]
    pub fn with_column(mut self, name: &str, data_type: DataType) -> Self {
        self.add_column(name, data_type);
        self
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&DataColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Resolve a column index, failing with a descriptive error
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column(name)
            .map(DataColumn::index)
            .ok_or_else(|| MetadataError::ColumnNotFound {
                table: self.name.clone(),
                column: name.to_string(),
            })
    }

    /// A row sized to this table's columns, all null
    pub fn create_row(&self) -> DataRow {
        DataRow {
            values: vec![Value::Null; self.columns.len()],
        }
    }

    pub fn add_row(&mut self, mut row: DataRow) {
        row.values.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn row(&self, index: usize) -> Option<&DataRow> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Same name and columns, no rows
    pub fn clone_structure(&self) -> DataTable {
        DataTable {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: Vec::new(),
        }
    }
}

/// Ordered collection of tables
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSet {
    tables: Vec<DataTable>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&DataTable> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut DataTable> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Look up a table, failing with a descriptive error
    pub fn require_table(&self, name: &str) -> Result<&DataTable> {
        self.table(name)
            .ok_or_else(|| MetadataError::TableNotFound(name.to_string()))
    }

    /// Insert a table, replacing any existing table of the same name in place
    pub fn add_or_update_table(&mut self, table: DataTable) {
        match self
            .tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(&table.name))
        {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }

    pub fn tables(&self) -> &[DataTable] {
        &self.tables
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Row count across all tables
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(DataTable::row_count).sum()
    }
}
