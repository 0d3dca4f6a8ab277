/// Builders for row mutations
use crate::error::{ClientError, Result};
use bytes::Bytes;
use widerow_proto::{self as proto, mutate_rows_request, mutation};

/// Timestamp that asks the server to stamp the cell with its own clock.
pub const SERVER_TIMESTAMP: i64 = -1;

/// All changes to one row. Applied atomically by the server.
///
/// # Example
/// ```
/// # use widerow_client::MutationEntry;
/// let entry = MutationEntry::new("user#123")
///     .set_cell("profile", "name", "Alice")
///     .delete_cells("profile", "nickname");
/// assert_eq!(entry.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEntry {
    pub row_key: Bytes,
    pub mutations: Vec<proto::Mutation>,
}

impl MutationEntry {
    pub fn new(row_key: impl Into<Bytes>) -> Self {
        Self {
            row_key: row_key.into(),
            mutations: Vec::new(),
        }
    }

    /// Write a cell stamped with server time
    pub fn set_cell(
        self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.set_cell_at(family, qualifier, SERVER_TIMESTAMP, value)
    }

    /// Write a cell at an explicit timestamp (microseconds)
    pub fn set_cell_at(
        self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        self.push(mutation::Mutation::SetCell(mutation::SetCell {
            family_name: family.into(),
            column_qualifier: qualifier.into(),
            timestamp_micros,
            value: value.into(),
        }))
    }

    /// Delete every version of `family:qualifier`
    pub fn delete_cells(self, family: impl Into<String>, qualifier: impl Into<Bytes>) -> Self {
        self.push(mutation::Mutation::DeleteFromColumn(
            mutation::DeleteFromColumn {
                family_name: family.into(),
                column_qualifier: qualifier.into(),
                time_range: None,
            },
        ))
    }

    /// Delete versions of `family:qualifier` with timestamps in `[start, end)`.
    /// An `end` of zero means no upper bound.
    pub fn delete_cells_in_range(
        self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        start_micros: i64,
        end_micros: i64,
    ) -> Self {
        self.push(mutation::Mutation::DeleteFromColumn(
            mutation::DeleteFromColumn {
                family_name: family.into(),
                column_qualifier: qualifier.into(),
                time_range: Some(proto::TimestampRange {
                    start_timestamp_micros: start_micros,
                    end_timestamp_micros: end_micros,
                }),
            },
        ))
    }

    /// Delete all cells of a family
    pub fn delete_family(self, family: impl Into<String>) -> Self {
        self.push(mutation::Mutation::DeleteFromFamily(
            mutation::DeleteFromFamily {
                family_name: family.into(),
            },
        ))
    }

    /// Delete the whole row
    pub fn delete_row(self) -> Self {
        self.push(mutation::Mutation::DeleteFromRow(mutation::DeleteFromRow {}))
    }

    fn push(mut self, mutation: mutation::Mutation) -> Self {
        self.mutations.push(proto::Mutation {
            mutation: Some(mutation),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Reject entries the server would refuse outright.
    pub fn validate(&self) -> Result<()> {
        if self.row_key.is_empty() {
            return Err(ClientError::InvalidArgument(
                "mutation entry has an empty row key".to_string(),
            ));
        }
        if self.mutations.is_empty() {
            return Err(ClientError::InvalidArgument(format!(
                "mutation entry for row {:?} has no mutations",
                String::from_utf8_lossy(&self.row_key)
            )));
        }
        Ok(())
    }

    pub fn to_proto(&self) -> mutate_rows_request::Entry {
        mutate_rows_request::Entry {
            row_key: self.row_key.clone(),
            mutations: self.mutations.clone(),
        }
    }
}

/// One cell to write with [`Table::insert`](crate::Table::insert).
#[derive(Debug, Clone, PartialEq)]
pub struct CellData {
    pub family: String,
    pub qualifier: Bytes,
    pub value: Bytes,
    /// `None` stamps the cell with server time.
    pub timestamp_micros: Option<i64>,
}

/// A row of plain cell values, converted to set-cell mutations on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct RowData {
    pub key: Bytes,
    pub cells: Vec<CellData>,
}

impl RowData {
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            cells: Vec::new(),
        }
    }

    pub fn cell(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.cells.push(CellData {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            timestamp_micros: None,
        });
        self
    }

    pub fn cell_at(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        self.cells.push(CellData {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            timestamp_micros: Some(timestamp_micros),
        });
        self
    }
}

impl From<RowData> for MutationEntry {
    fn from(row: RowData) -> Self {
        row.cells
            .into_iter()
            .fold(MutationEntry::new(row.key), |entry, cell| {
                entry.set_cell_at(
                    cell.family,
                    cell.qualifier,
                    cell.timestamp_micros.unwrap_or(SERVER_TIMESTAMP),
                    cell.value,
                )
            })
    }
}
