/// Resumable, cancelable row scans
use crate::chunk::ChunkReassembler;
use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;
use crate::row::Row;
use crate::rowset::{KeyRange, ScanWorkSet};
use crate::transport::{ReadRowsStream, Transport};
use bytes::Bytes;
use futures::Stream;
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tonic::{Code, Status};
use tracing::{debug, warn};
use widerow_proto::{CellChunk, ReadRowsRequest, RowFilter};

/// What to read.
///
/// Explicit keys may be combined with any one of: key ranges, a start/end
/// pair, or one or more prefixes. With nothing set the whole table is read.
///
/// # Example
/// ```
/// # use widerow_client::ReadRowsOptions;
/// let options = ReadRowsOptions::new()
///     .prefix("user#")
///     .limit(100);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReadRowsOptions {
    keys: Vec<Bytes>,
    ranges: Vec<KeyRange>,
    start: Option<Bound<Bytes>>,
    end: Option<Bound<Bytes>>,
    prefixes: Vec<Bytes>,
    limit: Option<u64>,
    filter: Option<RowFilter>,
}

impl ReadRowsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one specific row
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Read specific rows
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn ranges(mut self, ranges: impl IntoIterator<Item = KeyRange>) -> Self {
        self.ranges.extend(ranges);
        self
    }

    /// Start at `key`, inclusive
    pub fn start(mut self, key: impl Into<Bytes>) -> Self {
        self.start = Some(Bound::Included(key.into()));
        self
    }

    /// Start just after `key`
    pub fn start_after(mut self, key: impl Into<Bytes>) -> Self {
        self.start = Some(Bound::Excluded(key.into()));
        self
    }

    /// Stop at `key`, inclusive
    pub fn end(mut self, key: impl Into<Bytes>) -> Self {
        self.end = Some(Bound::Included(key.into()));
        self
    }

    /// Stop just before `key`
    pub fn end_before(mut self, key: impl Into<Bytes>) -> Self {
        self.end = Some(Bound::Excluded(key.into()));
        self
    }

    /// Read rows whose key begins with `prefix`
    pub fn prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn prefixes<I, K>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Stop after `limit` rows. Zero means no limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Server-side filter, forwarded unchanged with every attempt
    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Resolve into the keys and ranges a scan starts from
    pub fn into_work_set(self) -> Result<(ScanWorkSet, Option<RowFilter>)> {
        let bounded = self.start.is_some() || self.end.is_some();
        let groups = [bounded, !self.prefixes.is_empty(), !self.ranges.is_empty()]
            .iter()
            .filter(|set| **set)
            .count();
        if groups > 1 {
            return Err(ClientError::InvalidArgument(
                "start/end, prefixes and ranges are mutually exclusive".to_string(),
            ));
        }

        let mut ranges = self.ranges;
        if bounded {
            ranges.push(KeyRange::new(
                self.start.unwrap_or(Bound::Unbounded),
                self.end.unwrap_or(Bound::Unbounded),
            ));
        }
        ranges.extend(self.prefixes.into_iter().map(KeyRange::prefix));

        Ok((ScanWorkSet::new(self.keys, ranges, self.limit), self.filter))
    }
}

/// Cancels a scan from any task.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Drives one logical scan across as many RPC attempts as needed.
///
/// Rows come out in strictly increasing key order with no duplicates or
/// gaps across retries. The scan ends at clean end-of-stream, when the row
/// limit is reached, on cancellation, or with exactly one error.
///
/// # Example
/// ```no_run
/// # use widerow_client::{Client, ClientConfig, ReadRowsOptions};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::connect(ClientConfig::new("my-project", "my-instance")).await?;
/// let table = client.table("events");
///
/// let mut scan = table.read_rows(ReadRowsOptions::new().prefix("2024-"))?;
/// while let Some(row) = scan.next_row().await? {
///     println!("{:?}: {} cells", row.key, row.cell_count());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ScanController {
    transport: Arc<dyn Transport>,
    table_name: String,
    app_profile_id: String,
    filter: Option<RowFilter>,
    policy: RetryPolicy,
    work: ScanWorkSet,
    attempts: u32,
    consecutive_errors: u32,
    started: Option<Instant>,
    stream: Option<Box<dyn ReadRowsStream>>,
    reassembler: ChunkReassembler,
    pending: VecDeque<CellChunk>,
    pending_scanned: Option<Bytes>,
    cancel: CancelHandle,
    done: bool,
}

enum Event {
    Cancelled,
    Message(std::result::Result<Option<widerow_proto::ReadRowsResponse>, Status>),
}

impl ScanController {
    pub fn new(
        transport: Arc<dyn Transport>,
        table_name: impl Into<String>,
        app_profile_id: impl Into<String>,
        options: ReadRowsOptions,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let (work, filter) = options.into_work_set()?;
        Ok(Self {
            transport,
            table_name: table_name.into(),
            app_profile_id: app_profile_id.into(),
            filter,
            policy,
            work,
            attempts: 0,
            consecutive_errors: 0,
            started: None,
            stream: None,
            reassembler: ChunkReassembler::new(),
            pending: VecDeque::new(),
            pending_scanned: None,
            cancel: CancelHandle::new(),
            done: false,
        })
    }

    /// Handle that cancels this scan when triggered
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stop the scan. Nothing is delivered after this returns.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.shutdown();
    }

    /// Rows handed out so far
    pub fn rows_emitted(&self) -> u64 {
        self.work.rows_emitted()
    }

    /// Number of RPC attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Next row, `Ok(None)` once the scan has finished.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                debug!(rows = self.work.rows_emitted(), "scan cancelled");
                self.shutdown();
                return Ok(None);
            }

            if let Some(chunk) = self.pending.pop_front() {
                match self.reassembler.push(chunk) {
                    Ok(Some(row)) => return Ok(Some(self.emit(row))),
                    Ok(None) => continue,
                    Err(violation) => return Err(self.fail(violation.into())),
                }
            }

            if let Some(key) = self.pending_scanned.take() {
                if self.reassembler.observe_scanned_key(&key) {
                    self.work.record_scanned(key);
                }
                continue;
            }

            if self.stream.is_none() {
                self.start_attempt().await?;
                continue;
            }

            let cancel = self.cancel.clone();
            let event = match self.stream.as_mut() {
                Some(stream) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Event::Cancelled,
                    message = stream.message() => Event::Message(message),
                },
                None => continue,
            };

            match event {
                Event::Cancelled => continue,
                Event::Message(Ok(Some(response))) => {
                    self.pending.extend(response.chunks);
                    if !response.last_scanned_row_key.is_empty() {
                        self.pending_scanned = Some(response.last_scanned_row_key);
                    }
                }
                Event::Message(Ok(None)) => {
                    self.stream = None;
                    if let Err(violation) = self.reassembler.finish() {
                        return Err(self.fail(violation.into()));
                    }
                    debug!(
                        rows = self.work.rows_emitted(),
                        attempts = self.attempts,
                        "scan complete"
                    );
                    self.done = true;
                    return Ok(None);
                }
                Event::Message(Err(status)) => self.handle_status(status).await?,
            }
        }
    }

    /// Read every remaining row.
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Adapt into a [`Stream`] of rows. The stream ends after an error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> + Send {
        futures::stream::unfold(self, |mut scan| async move {
            match scan.next_row().await {
                Ok(Some(row)) => Some((Ok(row), scan)),
                Ok(None) => None,
                Err(e) => Some((Err(e), scan)),
            }
        })
    }

    async fn start_attempt(&mut self) -> Result<()> {
        let request = ReadRowsRequest {
            table_name: self.table_name.clone(),
            app_profile_id: self.app_profile_id.clone(),
            rows: Some(self.work.to_row_set()),
            filter: self.filter.clone(),
            rows_limit: self
                .work
                .remaining_limit()
                .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
                .unwrap_or(0),
        };
        let attempt = self.attempts;
        self.attempts += 1;
        self.started.get_or_insert_with(Instant::now);
        debug!(
            attempt,
            keys = self.work.row_keys().len(),
            ranges = self.work.ranges().len(),
            rows_limit = request.rows_limit,
            "starting read attempt"
        );

        let cancel = self.cancel.clone();
        let call = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.transport.read_rows(request, attempt) => Some(result),
        };

        match call {
            None => Ok(()),
            Some(Ok(stream)) => {
                // Each attempt gets a fresh reassembler floored at the resume point.
                self.reassembler = ChunkReassembler::new();
                if let Some(last) = self.work.last_key() {
                    self.reassembler.observe_scanned_key(last);
                }
                self.stream = Some(stream);
                Ok(())
            }
            Some(Err(status)) => self.handle_status(status).await,
        }
    }

    /// Decide between retrying, finishing and failing after an RPC error.
    async fn handle_status(&mut self, status: Status) -> Result<()> {
        self.abandon_attempt();

        if status.code() == Code::Cancelled {
            debug!(rows = self.work.rows_emitted(), "read stream cancelled by server");
            self.done = true;
            return Ok(());
        }

        let error = ClientError::from(status);
        if !error.is_retryable() {
            return Err(self.fail(error));
        }

        self.consecutive_errors += 1;
        if !self.policy.allows_retry(self.consecutive_errors) {
            warn!(
                code = error.code(),
                attempts = self.attempts,
                retries = self.policy.max_retries,
                "read retries exhausted"
            );
            return Err(self.fail(error));
        }
        if self
            .started
            .is_some_and(|started| self.policy.deadline_passed(started))
        {
            warn!(
                code = error.code(),
                attempts = self.attempts,
                "read deadline exceeded"
            );
            return Err(self.fail(error));
        }

        self.work.resume();
        if self.work.is_exhausted() || self.work.limit_reached() {
            debug!(rows = self.work.rows_emitted(), "nothing left to read after error");
            self.done = true;
            return Ok(());
        }

        let delay = self.policy.backoff_duration(self.consecutive_errors);
        warn!(
            code = error.code(),
            attempts = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "retrying read stream"
        );

        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.shutdown();
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }

        Ok(())
    }

    fn emit(&mut self, row: Row) -> Row {
        self.work.record_emitted(row.key.clone());
        self.consecutive_errors = 0;
        if self.work.limit_reached() {
            debug!(rows = self.work.rows_emitted(), "row limit reached");
            self.shutdown();
        }
        row
    }

    fn fail(&mut self, error: ClientError) -> ClientError {
        self.shutdown();
        error
    }

    /// Drop the current call and everything it buffered.
    fn abandon_attempt(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.abort();
        }
        self.pending.clear();
        self.pending_scanned = None;
    }

    fn shutdown(&mut self) {
        self.abandon_attempt();
        self.done = true;
    }
}
