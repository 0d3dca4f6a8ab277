/// The RPC seam between the scan/batch engines and the network
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tonic::codec::Streaming;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, warn};
use widerow_proto::bigtable_client::BigtableClient;
use widerow_proto::{
    mutate_rows_response, MutateRowsRequest, MutateRowsResponse, ReadRowsRequest,
    ReadRowsResponse,
};

/// Metadata header carrying the zero-based attempt number of an RPC.
pub const ATTEMPT_HEADER: &str = "bigtable-attempt";

/// Metadata header carrying the routing parameters (table, app profile).
pub const ROUTING_HEADER: &str = "x-goog-request-params";

/// One in-flight streaming read.
#[async_trait]
pub trait ReadRowsStream: Send {
    /// Next response, `Ok(None)` at clean end-of-stream.
    async fn message(&mut self) -> std::result::Result<Option<ReadRowsResponse>, Status>;

    /// Cancels the RPC. Later calls to `message` return `Ok(None)`.
    fn abort(&mut self);
}

/// Everything one `MutateRows` call reported before its stream ended.
#[derive(Debug, Clone, Default)]
pub struct MutateRowsOutcome {
    /// Per-entry results gathered from every response message
    pub entries: Vec<mutate_rows_response::Entry>,

    /// Status that cut the stream short after some entries were reported
    pub trailing_error: Option<Status>,
}

/// Issues the two data-plane RPCs.
///
/// `attempt` is zero for the first try of an operation and increases with
/// every retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read_rows(
        &self,
        request: ReadRowsRequest,
        attempt: u32,
    ) -> std::result::Result<Box<dyn ReadRowsStream>, Status>;

    /// Fails with the call's status only if the call failed before any entry
    /// was reported.
    async fn mutate_rows(
        &self,
        request: MutateRowsRequest,
        attempt: u32,
    ) -> std::result::Result<MutateRowsOutcome, Status>;
}

/// [`Transport`] over the generated `Bigtable` service client.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: BigtableClient<Channel>,
    attempt_timeout: Option<Duration>,
}

impl GrpcTransport {
    /// Connect to the configured endpoint
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| ClientError::ConnectionError(format!("Invalid address: {}", e)))?
            .connect_timeout(config.connect_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ClientError::ConnectionError(format!("Failed to connect: {}", e)))?;

        debug!(endpoint = %config.endpoint, "channel connected");
        Ok(Self::new(channel, config.attempt_timeout))
    }

    /// Wrap an existing channel
    pub fn new(channel: Channel, attempt_timeout: Option<Duration>) -> Self {
        Self {
            client: BigtableClient::new(channel),
            attempt_timeout,
        }
    }

    fn prepare<T>(
        &self,
        message: T,
        table_name: &str,
        app_profile_id: &str,
        attempt: u32,
    ) -> std::result::Result<Request<T>, Status> {
        let mut request = Request::new(message);

        let attempt: MetadataValue<Ascii> = attempt
            .to_string()
            .parse()
            .map_err(|_| Status::internal("invalid attempt header"))?;
        request.metadata_mut().insert(ATTEMPT_HEADER, attempt);

        let routing: MetadataValue<Ascii> = routing_params(table_name, app_profile_id)
            .parse()
            .map_err(|_| Status::invalid_argument("table name is not valid header text"))?;
        request.metadata_mut().insert(ROUTING_HEADER, routing);

        if let Some(timeout) = self.attempt_timeout {
            request.set_timeout(timeout);
        }
        Ok(request)
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn read_rows(
        &self,
        request: ReadRowsRequest,
        attempt: u32,
    ) -> std::result::Result<Box<dyn ReadRowsStream>, Status> {
        let table_name = request.table_name.clone();
        let app_profile_id = request.app_profile_id.clone();
        let request = self.prepare(request, &table_name, &app_profile_id, attempt)?;

        let mut client = self.client.clone();
        let response = client.read_rows(request).await?;

        Ok(Box::new(GrpcReadRowsStream {
            inner: Some(response.into_inner()),
        }))
    }

    async fn mutate_rows(
        &self,
        request: MutateRowsRequest,
        attempt: u32,
    ) -> std::result::Result<MutateRowsOutcome, Status> {
        let table_name = request.table_name.clone();
        let app_profile_id = request.app_profile_id.clone();
        let request = self.prepare(request, &table_name, &app_profile_id, attempt)?;

        let mut client = self.client.clone();
        let stream = client.mutate_rows(request).await?.into_inner();
        collect_mutate_rows(stream).await
    }
}

/// Concatenates the entries of a `MutateRows` response stream.
///
/// An error before any entry arrives fails the call. An error after that is
/// kept in [`MutateRowsOutcome::trailing_error`] next to the entries already
/// reported.
pub async fn collect_mutate_rows<S>(stream: S) -> std::result::Result<MutateRowsOutcome, Status>
where
    S: Stream<Item = std::result::Result<MutateRowsResponse, Status>>,
{
    futures::pin_mut!(stream);

    let mut outcome = MutateRowsOutcome::default();
    while let Some(item) = stream.next().await {
        match item {
            Ok(part) => outcome.entries.extend(part.entries),
            Err(status) if outcome.entries.is_empty() => return Err(status),
            Err(status) => {
                warn!(
                    code = ?status.code(),
                    reported = outcome.entries.len(),
                    "mutate stream ended early"
                );
                outcome.trailing_error = Some(status);
                break;
            }
        }
    }
    Ok(outcome)
}

struct GrpcReadRowsStream {
    inner: Option<Streaming<ReadRowsResponse>>,
}

#[async_trait]
impl ReadRowsStream for GrpcReadRowsStream {
    async fn message(&mut self) -> std::result::Result<Option<ReadRowsResponse>, Status> {
        match self.inner.as_mut() {
            Some(stream) => stream.message().await,
            None => Ok(None),
        }
    }

    fn abort(&mut self) {
        // Dropping the body resets the HTTP/2 stream.
        self.inner = None;
    }
}

/// `table_name=...&app_profile_id=...`, percent-encoded.
pub fn routing_params(table_name: &str, app_profile_id: &str) -> String {
    let mut params = format!("table_name={}", percent_encode(table_name));
    if !app_profile_id.is_empty() {
        params.push_str("&app_profile_id=");
        params.push_str(&percent_encode(app_profile_id));
    }
    params
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
