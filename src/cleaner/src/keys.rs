use std::fmt;

use crate::store::{ColumnValue, Row};

/// Values of all partition key columns of one partition, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    values: Vec<ColumnValue>,
}

impl PartitionKey {
    pub fn new(values: Vec<ColumnValue>) -> Self {
        Self { values }
    }

    /// Read `columns` out of `row`. Returns `None` if any of them is null.
    pub fn from_row(row: &Row, columns: &[String]) -> Option<Self> {
        columns
            .iter()
            .map(|c| row.get(c).cloned())
            .collect::<Option<Vec<_>>>()
            .map(Self::new)
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}
