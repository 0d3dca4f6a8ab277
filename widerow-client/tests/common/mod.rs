#![allow(dead_code)]
//! Scripted in-memory transport shared by the integration tests

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tonic::{Code, Status};
use widerow_client::proto::{
    mutate_rows_response, rpc, CellChunk, MutateRowsRequest, ReadRowsRequest, ReadRowsResponse,
};
use widerow_client::{
    Client, ClientConfig, MutateRowsOutcome, ReadRowsStream, RetryPolicy, Transport,
};

/// What one `read_rows` call does.
pub enum ReadScript {
    /// The call itself fails.
    Fail(Status),
    /// The stream yields these items, then ends cleanly.
    Stream(Vec<Result<ReadRowsResponse, Status>>),
    /// The stream yields these items, then never yields again.
    StreamThenHang(Vec<Result<ReadRowsResponse, Status>>),
}

#[derive(Default)]
pub struct MockTransport {
    reads: Mutex<VecDeque<ReadScript>>,
    mutates: Mutex<VecDeque<Result<MutateRowsOutcome, Status>>>,
    read_requests: Mutex<Vec<(ReadRowsRequest, u32)>>,
    mutate_requests: Mutex<Vec<(MutateRowsRequest, u32)>>,
    aborts: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_reads(reads: Vec<ReadScript>) -> Arc<Self> {
        let mock = Self::default();
        *mock.reads.lock().unwrap() = reads.into();
        Arc::new(mock)
    }

    pub fn with_mutates(mutates: Vec<Result<MutateRowsOutcome, Status>>) -> Arc<Self> {
        let mock = Self::default();
        *mock.mutates.lock().unwrap() = mutates.into();
        Arc::new(mock)
    }

    pub fn read_requests(&self) -> Vec<(ReadRowsRequest, u32)> {
        self.read_requests.lock().unwrap().clone()
    }

    pub fn mutate_requests(&self) -> Vec<(MutateRowsRequest, u32)> {
        self.mutate_requests.lock().unwrap().clone()
    }

    /// Streams aborted by the client while still open.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read_rows(
        &self,
        request: ReadRowsRequest,
        attempt: u32,
    ) -> Result<Box<dyn ReadRowsStream>, Status> {
        self.read_requests.lock().unwrap().push((request, attempt));
        let script = self.reads.lock().unwrap().pop_front();

        let (items, hang) = match script {
            None => return Err(Status::internal("no scripted read left")),
            Some(ReadScript::Fail(status)) => return Err(status),
            Some(ReadScript::Stream(items)) => (items, false),
            Some(ReadScript::StreamThenHang(items)) => (items, true),
        };

        Ok(Box::new(MockStream {
            items: items.into(),
            hang,
            finished: false,
            aborts: Arc::clone(&self.aborts),
        }))
    }

    async fn mutate_rows(
        &self,
        request: MutateRowsRequest,
        attempt: u32,
    ) -> Result<MutateRowsOutcome, Status> {
        self.mutate_requests.lock().unwrap().push((request, attempt));
        let next = self.mutates.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(Status::internal("no scripted mutate left")))
    }
}

struct MockStream {
    items: VecDeque<Result<ReadRowsResponse, Status>>,
    hang: bool,
    finished: bool,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl ReadRowsStream for MockStream {
    async fn message(&mut self) -> Result<Option<ReadRowsResponse>, Status> {
        if self.finished {
            return Ok(None);
        }
        match self.items.pop_front() {
            Some(Ok(response)) => Ok(Some(response)),
            Some(Err(status)) => {
                self.finished = true;
                Err(status)
            }
            None if self.hang => futures::future::pending().await,
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn abort(&mut self) {
        if !self.finished {
            self.finished = true;
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Client over `mock` with fast retries.
pub fn client(mock: &Arc<MockTransport>) -> Client {
    let config = ClientConfig::new("p", "i")
        .with_read_retry(RetryPolicy::fast())
        .with_mutate_retry(RetryPolicy::fast());
    Client::with_transport(mock.clone(), config)
}

pub const TABLE: &str = "projects/p/instances/i/tables/t";

/// Chunks for a committed row holding one cell `cf:q = value`.
pub fn row_chunks(key: &str, value: &str) -> Vec<CellChunk> {
    vec![CellChunk {
        row_key: Bytes::from(key.to_string()),
        family_name: Some("cf".to_string()),
        qualifier: Some(b"q".to_vec().into()),
        timestamp_micros: 1_000,
        value: Bytes::from(value.to_string()),
        commit_row: true,
        ..Default::default()
    }]
}

/// One response carrying a committed single-cell row per key.
pub fn rows(keys: &[&str]) -> Result<ReadRowsResponse, Status> {
    Ok(ReadRowsResponse {
        chunks: keys
            .iter()
            .flat_map(|k| row_chunks(k, &format!("v-{}", k)))
            .collect(),
        last_scanned_row_key: Bytes::new(),
    })
}

pub fn chunks(chunks: Vec<CellChunk>) -> Result<ReadRowsResponse, Status> {
    Ok(ReadRowsResponse {
        chunks,
        last_scanned_row_key: Bytes::new(),
    })
}

/// A response with no chunks, only a progress marker.
pub fn scanned(key: &str) -> Result<ReadRowsResponse, Status> {
    Ok(ReadRowsResponse {
        chunks: vec![],
        last_scanned_row_key: Bytes::from(key.to_string()),
    })
}

fn entry_results(results: &[(i64, Code)]) -> Vec<mutate_rows_response::Entry> {
    results
        .iter()
        .map(|&(index, code)| mutate_rows_response::Entry {
            index,
            status: Some(rpc::Status {
                code: code as i32,
                message: format!("{:?}", code),
            }),
        })
        .collect()
}

/// A mutate call reporting `(index, code)` per entry.
pub fn statuses(results: &[(i64, Code)]) -> Result<MutateRowsOutcome, Status> {
    Ok(MutateRowsOutcome {
        entries: entry_results(results),
        trailing_error: None,
    })
}

/// A mutate call whose stream reported `results` and then failed with `status`.
pub fn statuses_then(results: &[(i64, Code)], status: Status) -> Result<MutateRowsOutcome, Status> {
    Ok(MutateRowsOutcome {
        entries: entry_results(results),
        trailing_error: Some(status),
    })
}

pub fn keys_of(rows: &[widerow_client::Row]) -> Vec<String> {
    rows.iter()
        .map(|r| String::from_utf8_lossy(&r.key).into_owned())
        .collect()
}

pub fn b(s: &'static str) -> Bytes {
    Bytes::from_static(s.as_bytes())
}
