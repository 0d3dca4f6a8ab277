/// Wide-column database client
///
/// Streams rows out of a table with transparent resumption after transient
/// failures, and applies batched row mutations retrying only the entries
/// that failed transiently.

pub mod batch;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod mutation;
pub mod retry;
pub mod row;
pub mod rowset;
pub mod scan;
pub mod transport;

// Re-export key types
pub use batch::MutationBatcher;
pub use chunk::{ChunkReassembler, Violation};
pub use client::{Client, Table};
pub use config::ClientConfig;
pub use error::{ClientError, EntryFailure, PartialFailure, Result};
pub use mutation::{CellData, MutationEntry, RowData, SERVER_TIMESTAMP};
pub use retry::RetryPolicy;
pub use row::{Cell, Column, Family, Row};
pub use rowset::{KeyRange, ScanWorkSet};
pub use scan::{CancelHandle, ReadRowsOptions, ScanController};
pub use transport::{GrpcTransport, MutateRowsOutcome, ReadRowsStream, Transport};
pub use widerow_proto as proto;
