/// Reassembled rows as handed to callers
use bytes::Bytes;

/// One version of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub value: Bytes,
    pub timestamp_micros: i64,
    pub labels: Vec<String>,
}

/// All cells of one qualifier, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub qualifier: Bytes,
    pub cells: Vec<Cell>,
}

/// All columns of one family, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Family {
    pub fn column(&self, qualifier: &[u8]) -> Option<&Column> {
        self.columns.iter().find(|c| c.qualifier.as_ref() == qualifier)
    }
}

/// A committed row.
///
/// Families and qualifiers keep the order in which the server first sent
/// them; they are not re-sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Bytes,
    pub families: Vec<Family>,
}

impl Row {
    pub fn new(key: Bytes) -> Self {
        Self {
            key,
            families: Vec::new(),
        }
    }

    pub fn family(&self, name: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.name == name)
    }

    /// Cells of `family:qualifier`, or an empty slice.
    pub fn cells(&self, family: &str, qualifier: &[u8]) -> &[Cell] {
        self.family(family)
            .and_then(|f| f.column(qualifier))
            .map(|c| c.cells.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of cells in the row.
    pub fn cell_count(&self) -> usize {
        self.families
            .iter()
            .flat_map(|f| f.columns.iter())
            .map(|c| c.cells.len())
            .sum()
    }

    /// Index of `name`, appending an empty family if it is new.
    pub(crate) fn family_index(&mut self, name: &str) -> usize {
        match self.families.iter().position(|f| f.name == name) {
            Some(idx) => idx,
            None => {
                self.families.push(Family {
                    name: name.to_string(),
                    columns: Vec::new(),
                });
                self.families.len() - 1
            }
        }
    }

    /// Index of `qualifier` inside family `family`, appending it if it is new.
    pub(crate) fn column_index(&mut self, family: usize, qualifier: &[u8]) -> usize {
        let columns = &mut self.families[family].columns;
        match columns.iter().position(|c| c.qualifier.as_ref() == qualifier) {
            Some(idx) => idx,
            None => {
                columns.push(Column {
                    qualifier: Bytes::copy_from_slice(qualifier),
                    cells: Vec::new(),
                });
                columns.len() - 1
            }
        }
    }

    pub(crate) fn push_cell(&mut self, family: usize, column: usize, cell: Cell) {
        self.families[family].columns[column].cells.push(cell);
    }
}
