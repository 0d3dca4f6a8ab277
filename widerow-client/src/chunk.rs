//! Reassembly of streamed cell chunks into committed rows.
//!
//! A `ReadRows` response carries a list of [`CellChunk`]s. A row is spread
//! over one or more chunks, a single cell may itself be split across chunks,
//! and a row only becomes visible once a chunk commits it. The server may
//! also tell the client to throw away the row it is building (reset).
//!
//! The logic is a small state machine. [`step`] is the pure transition
//! function; [`ChunkReassembler`] wraps it with the key of the last committed
//! row and latches the first violation.

use crate::row::{Cell, Row};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use widerow_proto::CellChunk;

/// A chunk sequence that breaks the row-assembly contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("a row key must be set")]
    MissingRowKey,

    #[error("a new row cannot be reset")]
    ResetOnNewRow,

    #[error("a commit happened but the same key followed")]
    RepeatedRowKey,

    #[error("row keys must be strictly increasing")]
    RowKeyNotIncreasing,

    #[error("a family must be set")]
    MissingFamily,

    #[error("a column qualifier must be set")]
    MissingQualifier,

    #[error("a qualifier must be specified with a family")]
    FamilyWithoutQualifier,

    #[error("a commit is required between row keys")]
    CommitRequiredBetweenRows,

    #[error("a reset must carry no data")]
    ResetWithData,

    #[error("a row cannot have a value size and be a commit row")]
    CommitWithValueSize,

    #[error("stream ended with an uncommitted row")]
    UncommittedRow,
}

/// The row being accumulated, with the family and qualifier that chunks
/// omitting them inherit.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBuilder {
    row: Row,
    family: usize,
    column: usize,
}

impl RowBuilder {
    pub fn key(&self) -> &Bytes {
        &self.row.key
    }

    fn push_cell(&mut self, cell: Cell) {
        self.row.push_cell(self.family, self.column, cell);
    }
}

/// A cell whose value is still arriving.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCell {
    timestamp_micros: i64,
    labels: Vec<String>,
    value: BytesMut,
    expected_len: usize,
}

impl PartialCell {
    fn into_cell(self) -> Cell {
        Cell {
            value: self.value.freeze(),
            timestamp_micros: self.timestamp_micros,
            labels: self.labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum State {
    /// No row is open. Initial state, and the state after a commit or reset.
    #[default]
    NewRow,
    /// A row is open and every cell so far is complete.
    RowInProgress(RowBuilder),
    /// A row is open and its last cell is still receiving value bytes.
    CellInProgress(RowBuilder, PartialCell),
}

impl State {
    pub fn is_row_open(&self) -> bool {
        !matches!(self, State::NewRow)
    }
}

/// Result of feeding one chunk.
#[derive(Debug)]
pub struct Step {
    pub state: State,
    /// The row committed by this chunk, if any.
    pub row: Option<Row>,
}

/// Applies one chunk to `state`.
///
/// `last_key` is the key of the last committed row; new rows must sort
/// strictly after it.
pub fn step(state: State, last_key: Option<&Bytes>, chunk: CellChunk) -> Result<Step, Violation> {
    let commit = chunk.commit_row;

    let state = match state {
        State::NewRow => {
            let builder = open_row(&chunk, last_key)?;
            append_cell(builder, chunk)
        }
        State::RowInProgress(builder) => continue_row(builder, chunk)?,
        State::CellInProgress(builder, partial) => continue_cell(builder, partial, chunk)?,
    };

    // A committing chunk never leaves a cell open: value_size > 0 with a
    // commit was rejected above, and value_size == 0 closes the cell.
    Ok(match (state, commit) {
        (State::RowInProgress(builder), true) => Step {
            state: State::NewRow,
            row: Some(builder.row),
        },
        (state, _) => Step { state, row: None },
    })
}

fn open_row(chunk: &CellChunk, last_key: Option<&Bytes>) -> Result<RowBuilder, Violation> {
    if chunk.row_key.is_empty() {
        return Err(Violation::MissingRowKey);
    }
    if chunk.reset_row {
        return Err(Violation::ResetOnNewRow);
    }
    if let Some(last) = last_key {
        if &chunk.row_key == last {
            return Err(Violation::RepeatedRowKey);
        }
        if &chunk.row_key < last {
            return Err(Violation::RowKeyNotIncreasing);
        }
    }
    let family = chunk.family_name.as_deref().ok_or(Violation::MissingFamily)?;
    let qualifier = chunk.qualifier.as_deref().ok_or(Violation::MissingQualifier)?;
    check_commit(chunk)?;

    let mut row = Row::new(chunk.row_key.clone());
    let family = row.family_index(family);
    let column = row.column_index(family, qualifier);
    Ok(RowBuilder { row, family, column })
}

fn continue_row(mut builder: RowBuilder, chunk: CellChunk) -> Result<State, Violation> {
    if !chunk.row_key.is_empty() && chunk.row_key != builder.row.key {
        return Err(Violation::CommitRequiredBetweenRows);
    }
    if chunk.family_name.is_some() && chunk.qualifier.is_none() {
        return Err(Violation::FamilyWithoutQualifier);
    }
    if chunk.reset_row {
        check_reset(&chunk)?;
        return Ok(State::NewRow);
    }
    check_commit(&chunk)?;

    if let Some(family) = chunk.family_name.as_deref() {
        builder.family = builder.row.family_index(family);
    }
    if let Some(qualifier) = chunk.qualifier.as_deref() {
        builder.column = builder.row.column_index(builder.family, qualifier);
    }
    Ok(append_cell(builder, chunk))
}

fn continue_cell(
    mut builder: RowBuilder,
    mut partial: PartialCell,
    chunk: CellChunk,
) -> Result<State, Violation> {
    if chunk.reset_row {
        check_reset(&chunk)?;
        return Ok(State::NewRow);
    }
    check_commit(&chunk)?;

    partial.value.extend_from_slice(&chunk.value);
    if chunk.value_size <= 0 || partial.value.len() >= partial.expected_len {
        builder.push_cell(partial.into_cell());
        Ok(State::RowInProgress(builder))
    } else {
        Ok(State::CellInProgress(builder, partial))
    }
}

/// Starts the chunk's cell under the builder's current family and qualifier.
fn append_cell(mut builder: RowBuilder, chunk: CellChunk) -> State {
    if chunk.value_size > 0 {
        let expected_len = chunk.value_size as usize;
        let mut value = BytesMut::with_capacity(expected_len);
        value.extend_from_slice(&chunk.value);
        let partial = PartialCell {
            timestamp_micros: chunk.timestamp_micros,
            labels: chunk.labels,
            value,
            expected_len,
        };
        State::CellInProgress(builder, partial)
    } else {
        builder.push_cell(Cell {
            value: chunk.value,
            timestamp_micros: chunk.timestamp_micros,
            labels: chunk.labels,
        });
        State::RowInProgress(builder)
    }
}

fn check_commit(chunk: &CellChunk) -> Result<(), Violation> {
    if chunk.value_size > 0 && chunk.commit_row {
        return Err(Violation::CommitWithValueSize);
    }
    Ok(())
}

fn check_reset(chunk: &CellChunk) -> Result<(), Violation> {
    let has_data = !chunk.row_key.is_empty()
        || chunk.family_name.is_some()
        || chunk.qualifier.is_some()
        || !chunk.value.is_empty()
        || chunk.timestamp_micros != 0
        || !chunk.labels.is_empty()
        || chunk.value_size != 0
        || chunk.commit_row;
    if has_data {
        return Err(Violation::ResetWithData);
    }
    Ok(())
}

/// Turns the chunks of one streaming attempt into committed rows.
///
/// Create a new reassembler for every attempt. After the first violation the
/// reassembler is dead: every further call returns that violation.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    state: State,
    last_key: Option<Bytes>,
    failure: Option<Violation>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk, returning the row it commits, if any.
    pub fn push(&mut self, chunk: CellChunk) -> Result<Option<Row>, Violation> {
        if let Some(violation) = &self.failure {
            return Err(violation.clone());
        }

        let state = std::mem::take(&mut self.state);
        match step(state, self.last_key.as_ref(), chunk) {
            Ok(Step { state, row }) => {
                self.state = state;
                if let Some(row) = &row {
                    self.last_key = Some(row.key.clone());
                }
                Ok(row)
            }
            Err(violation) => {
                self.failure = Some(violation.clone());
                Err(violation)
            }
        }
    }

    /// Feeds a batch of chunks, collecting every committed row.
    pub fn push_all<I>(&mut self, chunks: I) -> Result<Vec<Row>, Violation>
    where
        I: IntoIterator<Item = CellChunk>,
    {
        let mut rows = Vec::new();
        for chunk in chunks {
            if let Some(row) = self.push(chunk)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Records the server's `last_scanned_row_key` progress marker.
    ///
    /// Only applied between rows; later rows must sort after it. Returns
    /// true if it raised the ordering floor.
    pub fn observe_scanned_key(&mut self, key: &Bytes) -> bool {
        if key.is_empty() || self.failure.is_some() || self.state.is_row_open() {
            return false;
        }
        match &self.last_key {
            Some(last) if key <= last => false,
            _ => {
                self.last_key = Some(key.clone());
                true
            }
        }
    }

    /// Checks that the stream did not stop in the middle of a row.
    pub fn finish(&mut self) -> Result<(), Violation> {
        if let Some(violation) = &self.failure {
            return Err(violation.clone());
        }
        if self.state.is_row_open() {
            self.failure = Some(Violation::UncommittedRow);
            return Err(Violation::UncommittedRow);
        }
        Ok(())
    }

    pub fn is_row_open(&self) -> bool {
        self.state.is_row_open()
    }

    pub fn last_key(&self) -> Option<&Bytes> {
        self.last_key.as_ref()
    }

    pub fn failure(&self) -> Option<&Violation> {
        self.failure.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Chunk builder for readable test tables.
    #[derive(Default)]
    struct C(CellChunk);

    impl C {
        fn new() -> Self {
            Self::default()
        }
        fn key(mut self, key: &str) -> Self {
            self.0.row_key = Bytes::copy_from_slice(key.as_bytes());
            self
        }
        fn fam(mut self, family: &str) -> Self {
            self.0.family_name = Some(family.to_string());
            self
        }
        fn qual(mut self, qualifier: &str) -> Self {
            self.0.qualifier = Some(qualifier.as_bytes().to_vec().into());
            self
        }
        fn ts(mut self, ts: i64) -> Self {
            self.0.timestamp_micros = ts;
            self
        }
        fn label(mut self, label: &str) -> Self {
            self.0.labels.push(label.to_string());
            self
        }
        fn value(mut self, value: &str) -> Self {
            self.0.value = Bytes::copy_from_slice(value.as_bytes());
            self
        }
        fn size(mut self, size: i32) -> Self {
            self.0.value_size = size;
            self
        }
        fn commit(mut self) -> Self {
            self.0.commit_row = true;
            self
        }
        fn reset(mut self) -> Self {
            self.0.reset_row = true;
            self
        }
        fn done(self) -> CellChunk {
            self.0
        }
    }

    fn run(chunks: Vec<CellChunk>) -> Result<Vec<Row>, Violation> {
        let mut reassembler = ChunkReassembler::new();
        let rows = reassembler.push_all(chunks)?;
        reassembler.finish()?;
        Ok(rows)
    }

    fn values(row: &Row, family: &str, qualifier: &str) -> Vec<Vec<u8>> {
        row.cells(family, qualifier.as_bytes())
            .iter()
            .map(|c| c.value.to_vec())
            .collect()
    }

    #[test]
    fn test_single_cell_row() {
        let rows = run(vec![C::new()
            .key("rk")
            .fam("cf")
            .qual("q")
            .ts(42)
            .value("v")
            .commit()
            .done()])
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.as_ref(), b"rk");
        let cell = &rows[0].cells("cf", b"q")[0];
        assert_eq!(cell.value.as_ref(), b"v");
        assert_eq!(cell.timestamp_micros, 42);
    }

    #[test]
    fn test_multi_chunk_cell() {
        let rows = run(vec![
            C::new().key("rk").fam("cf").qual("q").ts(7).label("L").value("ab").size(6).done(),
            C::new().value("cd").size(6).done(),
            C::new().value("ef").commit().done(),
        ])
        .unwrap();

        let cell = &rows[0].cells("cf", b"q")[0];
        assert_eq!(cell.value.as_ref(), b"abcdef");
        assert_eq!(cell.timestamp_micros, 7);
        assert_eq!(cell.labels, vec!["L".to_string()]);
    }

    #[test]
    fn test_cell_completes_when_announced_size_is_reached() {
        let mut reassembler = ChunkReassembler::new();
        reassembler
            .push(C::new().key("rk").fam("cf").qual("q").value("ab").size(4).done())
            .unwrap();
        // Still announces a size, but the buffer is now full.
        reassembler.push(C::new().value("cd").size(4).done()).unwrap();
        let row = reassembler
            .push(C::new().qual("q2").value("x").commit().done())
            .unwrap()
            .unwrap();

        assert_eq!(values(&row, "cf", "q"), vec![b"abcd".to_vec()]);
        assert_eq!(values(&row, "cf", "q2"), vec![b"x".to_vec()]);
    }

    #[test]
    fn test_family_and_qualifier_inheritance() {
        let rows = run(vec![
            C::new().key("rk").fam("A").qual("x").ts(1).value("1").done(),
            C::new().ts(2).value("2").done(),
            C::new().qual("y").value("3").done(),
            C::new().fam("B").qual("x").value("4").done(),
            C::new().value("5").commit().done(),
        ])
        .unwrap();

        let row = &rows[0];
        assert_eq!(values(row, "A", "x"), vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(values(row, "A", "y"), vec![b"3".to_vec()]);
        assert_eq!(values(row, "B", "x"), vec![b"4".to_vec(), b"5".to_vec()]);
        assert_eq!(row.cell_count(), 5);
    }

    #[test]
    fn test_revisited_family_keeps_first_seen_order() {
        let rows = run(vec![
            C::new().key("rk").fam("B").qual("q").value("1").done(),
            C::new().fam("A").qual("q").value("2").done(),
            C::new().fam("B").qual("q").value("3").commit().done(),
        ])
        .unwrap();

        let names: Vec<_> = rows[0].families.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(values(&rows[0], "B", "q"), vec![b"1".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_empty_qualifier_and_value_are_valid() {
        let rows = run(vec![C::new().key("rk").fam("cf").qual("").commit().done()]).unwrap();
        let cells = rows[0].cells("cf", b"");
        assert_eq!(cells.len(), 1);
        assert!(cells[0].value.is_empty());
    }

    #[test]
    fn test_multiple_rows_in_commit_order() {
        let rows = run(vec![
            C::new().key("a").fam("cf").qual("q").value("1").commit().done(),
            C::new().key("b").fam("cf").qual("q").value("2").done(),
            C::new().value("3").commit().done(),
            C::new().key("c").fam("cf").qual("q").value("4").commit().done(),
        ])
        .unwrap();

        let keys: Vec<_> = rows.iter().map(|r| r.key.to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(values(&rows[1], "cf", "q"), vec![b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_inheritance_cleared_after_commit() {
        let result = run(vec![
            C::new().key("a").fam("cf").qual("q").value("1").commit().done(),
            C::new().key("b").value("2").commit().done(),
        ]);
        assert_eq!(result, Err(Violation::MissingFamily));
    }

    #[test]
    fn test_reset_discards_row() {
        let rows = run(vec![
            C::new().key("a").fam("cf").qual("q").value("stale").done(),
            C::new().reset().done(),
            C::new().key("a").fam("cf").qual("q").value("fresh").commit().done(),
        ])
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(values(&rows[0], "cf", "q"), vec![b"fresh".to_vec()]);
    }

    #[test]
    fn test_reset_discards_partial_cell() {
        let rows = run(vec![
            C::new().key("a").fam("cf").qual("q").value("par").size(10).done(),
            C::new().reset().done(),
            C::new().key("a").fam("cf").qual("q").value("whole").commit().done(),
        ])
        .unwrap();

        assert_eq!(values(&rows[0], "cf", "q"), vec![b"whole".to_vec()]);
    }

    #[test]
    fn test_reset_clears_inheritance() {
        let mut reassembler = ChunkReassembler::new();
        reassembler
            .push(C::new().key("a").fam("cf").qual("q").value("1").done())
            .unwrap();
        reassembler.push(C::new().reset().done()).unwrap();
        let err = reassembler.push(C::new().key("a").value("2").commit().done());
        assert_eq!(err, Err(Violation::MissingFamily));
    }

    #[test]
    fn test_rejects_non_increasing_keys() {
        let repeated = run(vec![
            C::new().key("b").fam("cf").qual("q").commit().done(),
            C::new().key("b").fam("cf").qual("q").commit().done(),
        ]);
        assert_eq!(repeated, Err(Violation::RepeatedRowKey));

        let decreasing = run(vec![
            C::new().key("b").fam("cf").qual("q").commit().done(),
            C::new().key("a").fam("cf").qual("q").commit().done(),
        ]);
        assert_eq!(decreasing, Err(Violation::RowKeyNotIncreasing));
    }

    #[test]
    fn test_rejects_commit_with_value_size() {
        let on_new_row = run(vec![C::new()
            .key("a")
            .fam("cf")
            .qual("q")
            .value("v")
            .size(10)
            .commit()
            .done()]);
        assert_eq!(on_new_row, Err(Violation::CommitWithValueSize));

        let mid_cell = run(vec![
            C::new().key("a").fam("cf").qual("q").value("v").size(10).done(),
            C::new().value("w").size(10).commit().done(),
        ]);
        assert_eq!(mid_cell, Err(Violation::CommitWithValueSize));
    }

    #[test]
    fn test_rejects_reset_with_data() {
        let cases = vec![
            C::new().reset().value("x").done(),
            C::new().reset().fam("cf").qual("q").done(),
            C::new().reset().qual("q").done(),
            C::new().reset().ts(10).done(),
            C::new().reset().label("L").done(),
            C::new().reset().key("a").done(),
        ];
        for reset in cases {
            let result = run(vec![
                C::new().key("a").fam("cf").qual("q").value("v").done(),
                reset,
            ]);
            assert_eq!(result, Err(Violation::ResetWithData));
        }

        let mid_cell = run(vec![
            C::new().key("a").fam("cf").qual("q").value("v").size(3).done(),
            C::new().reset().value("x").done(),
        ]);
        assert_eq!(mid_cell, Err(Violation::ResetWithData));
    }

    #[test]
    fn test_rejects_bad_new_row() {
        assert_eq!(
            run(vec![C::new().fam("cf").qual("q").commit().done()]),
            Err(Violation::MissingRowKey)
        );
        assert_eq!(run(vec![C::new().reset().done()]), Err(Violation::MissingRowKey));
        assert_eq!(
            run(vec![C::new().key("a").reset().done()]),
            Err(Violation::ResetOnNewRow)
        );
        assert_eq!(
            run(vec![C::new().key("a").qual("q").commit().done()]),
            Err(Violation::MissingFamily)
        );
        assert_eq!(
            run(vec![C::new().key("a").fam("cf").commit().done()]),
            Err(Violation::MissingQualifier)
        );
    }

    #[test]
    fn test_rejects_key_change_without_commit() {
        let result = run(vec![
            C::new().key("a").fam("cf").qual("q").value("1").done(),
            C::new().key("b").fam("cf").qual("q").value("2").commit().done(),
        ]);
        assert_eq!(result, Err(Violation::CommitRequiredBetweenRows));

        // Repeating the open row's own key is fine.
        let same = run(vec![
            C::new().key("a").fam("cf").qual("q").value("1").done(),
            C::new().key("a").value("2").commit().done(),
        ])
        .unwrap();
        assert_eq!(values(&same[0], "cf", "q").len(), 2);
    }

    #[test]
    fn test_rejects_family_without_qualifier() {
        let result = run(vec![
            C::new().key("a").fam("cf").qual("q").value("1").done(),
            C::new().fam("other").value("2").commit().done(),
        ]);
        assert_eq!(result, Err(Violation::FamilyWithoutQualifier));
    }

    #[test]
    fn test_violation_is_permanent() {
        let mut reassembler = ChunkReassembler::new();
        let err = reassembler.push(C::new().reset().done()).unwrap_err();
        assert_eq!(err, Violation::MissingRowKey);

        let valid = C::new().key("a").fam("cf").qual("q").commit().done();
        assert_eq!(reassembler.push(valid), Err(Violation::MissingRowKey));
        assert_eq!(reassembler.finish(), Err(Violation::MissingRowKey));
        assert_eq!(reassembler.failure(), Some(&Violation::MissingRowKey));
    }

    #[test]
    fn test_uncommitted_row_at_end_of_stream() {
        let result = run(vec![C::new().key("a").fam("cf").qual("q").value("1").done()]);
        assert_eq!(result, Err(Violation::UncommittedRow));

        let mut reassembler = ChunkReassembler::new();
        reassembler
            .push(C::new().key("a").fam("cf").qual("q").value("1").done())
            .unwrap();
        reassembler.push(C::new().reset().done()).unwrap();
        assert!(reassembler.finish().is_ok());
    }

    #[test]
    fn test_nothing_visible_before_commit() {
        let mut reassembler = ChunkReassembler::new();
        let first = reassembler
            .push(C::new().key("a").fam("cf").qual("q").value("1").done())
            .unwrap();
        assert!(first.is_none());
        assert!(reassembler.is_row_open());
        assert!(reassembler.last_key().is_none());
    }

    #[test]
    fn test_scanned_key_raises_floor_between_rows() {
        let mut reassembler = ChunkReassembler::new();
        reassembler
            .push(C::new().key("a").fam("cf").qual("q").commit().done())
            .unwrap();

        assert!(reassembler.observe_scanned_key(&Bytes::from_static(b"m")));
        assert!(!reassembler.observe_scanned_key(&Bytes::from_static(b"c")));
        assert_eq!(reassembler.last_key().map(|k| k.as_ref()), Some(&b"m"[..]));

        let err = reassembler.push(C::new().key("k").fam("cf").qual("q").commit().done());
        assert_eq!(err, Err(Violation::RowKeyNotIncreasing));
    }

    #[test]
    fn test_scanned_key_ignored_mid_row() {
        let mut reassembler = ChunkReassembler::new();
        reassembler
            .push(C::new().key("a").fam("cf").qual("q").value("1").done())
            .unwrap();
        assert!(!reassembler.observe_scanned_key(&Bytes::from_static(b"z")));
        assert!(reassembler.last_key().is_none());
    }

    #[test]
    fn test_step_is_pure() {
        let chunk = C::new().key("a").fam("cf").qual("q").value("1").done();
        let Step { state, row } = step(State::NewRow, None, chunk.clone()).unwrap();
        assert!(row.is_none());
        assert!(matches!(state, State::RowInProgress(ref b) if b.key().as_ref() == b"a"));

        // Same input, same output.
        let again = step(State::NewRow, None, chunk).unwrap();
        assert_eq!(again.state, state);
    }

    type CellPlan = (usize, u8, i64, Vec<u8>, usize);

    fn cell_plan() -> impl Strategy<Value = CellPlan> {
        (
            0usize..3,
            0u8..3,
            0i64..1_000,
            prop::collection::vec(any::<u8>(), 0..24),
            1usize..8,
        )
    }

    /// Encodes rows as chunks, fragmenting values and omitting inherited
    /// family/qualifier fields wherever the protocol allows.
    fn encode(rows: &std::collections::BTreeMap<String, Vec<CellPlan>>) -> (Vec<CellChunk>, Vec<Row>) {
        let mut chunks = Vec::new();
        let mut expected = Vec::new();

        for (key, cells) in rows {
            let key = Bytes::copy_from_slice(key.as_bytes());
            let mut row = Row::new(key.clone());
            let mut previous: Option<(usize, u8)> = None;

            for (i, (family, qualifier, ts, value, fragment)) in cells.iter().enumerate() {
                let family_name = format!("f{}", family);
                let qualifier_bytes = Bytes::from(vec![b'a' + qualifier]);
                let f = row.family_index(&family_name);
                let c = row.column_index(f, &qualifier_bytes);
                row.push_cell(
                    f,
                    c,
                    Cell {
                        value: Bytes::from(value.clone()),
                        timestamp_micros: *ts,
                        labels: vec![],
                    },
                );

                let pieces: Vec<&[u8]> = if value.is_empty() {
                    vec![&[][..]]
                } else {
                    value.chunks(*fragment).collect()
                };
                let last_cell = i + 1 == cells.len();

                for (p, piece) in pieces.iter().enumerate() {
                    let mut chunk = CellChunk::default();
                    if p == 0 {
                        if i == 0 {
                            chunk.row_key = key.clone();
                        }
                        match previous {
                            Some((pf, pq)) if pf == *family && pq == *qualifier => {}
                            Some((pf, _)) if pf == *family => {
                                chunk.qualifier = Some(qualifier_bytes.to_vec().into());
                            }
                            _ => {
                                chunk.family_name = Some(family_name.clone());
                                chunk.qualifier = Some(qualifier_bytes.to_vec().into());
                            }
                        }
                        chunk.timestamp_micros = *ts;
                    }
                    let last_piece = p + 1 == pieces.len();
                    chunk.value = Bytes::copy_from_slice(piece);
                    chunk.value_size = if last_piece { 0 } else { value.len() as i32 };
                    chunk.commit_row = last_cell && last_piece;
                    chunks.push(chunk);
                }
                previous = Some((*family, *qualifier));
            }
            expected.push(row);
        }
        (chunks, expected)
    }

    proptest! {
        #[test]
        fn prop_fragmented_rows_reassemble(
            rows in prop::collection::btree_map("[a-z]{1,6}", prop::collection::vec(cell_plan(), 1..6), 1..6)
        ) {
            let (chunks, expected) = encode(&rows);
            let mut reassembler = ChunkReassembler::new();
            let actual = reassembler.push_all(chunks).unwrap();
            prop_assert_eq!(actual, expected);
            prop_assert!(reassembler.finish().is_ok());
        }
    }
}
