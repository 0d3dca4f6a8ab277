/// Client entry point and per-table facade
use crate::batch::MutationBatcher;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::mutation::{MutationEntry, RowData};
use crate::retry::RetryPolicy;
use crate::row::Row;
use crate::scan::{ReadRowsOptions, ScanController};
use crate::transport::{GrpcTransport, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Wide-column data client
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Connect to the configured server
    ///
    /// # Example
    /// ```no_run
    /// # use widerow_client::{Client, ClientConfig};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ClientConfig::new("my-project", "my-instance")
    ///     .with_endpoint("http://localhost:8086");
    /// let client = Client::connect(config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate().map_err(ClientError::InvalidConfig)?;
        let transport = GrpcTransport::connect(&config).await?;
        debug!(
            endpoint = %config.endpoint,
            project = %config.project,
            instance = %config.instance,
            "client connected"
        );
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Build a client over any [`Transport`]
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Handle to one table of the configured instance
    pub fn table(&self, table: &str) -> Table {
        Table {
            transport: Arc::clone(&self.transport),
            name: self.config.table_name(table),
            app_profile_id: self.config.app_profile.clone().unwrap_or_default(),
            read_retry: self.config.read_retry.clone(),
            mutate_retry: self.config.mutate_retry.clone(),
        }
    }
}

/// Reads and writes against one table
#[derive(Clone)]
pub struct Table {
    transport: Arc<dyn Transport>,
    name: String,
    app_profile_id: String,
    read_retry: RetryPolicy,
    mutate_retry: RetryPolicy,
}

impl Table {
    /// Fully qualified table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Override the read retry policy for this handle
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Override the mutation retry policy for this handle
    pub fn with_mutate_retry(mut self, policy: RetryPolicy) -> Self {
        self.mutate_retry = policy;
        self
    }

    /// Start a scan. Rows are pulled lazily from the returned controller.
    pub fn read_rows(&self, options: ReadRowsOptions) -> Result<ScanController> {
        ScanController::new(
            Arc::clone(&self.transport),
            self.name.clone(),
            self.app_profile_id.clone(),
            options,
            self.read_retry.clone(),
        )
    }

    /// Run a scan to completion and collect its rows
    pub async fn get_rows(&self, options: ReadRowsOptions) -> Result<Vec<Row>> {
        self.read_rows(options)?.collect().await
    }

    /// Read a single row by key
    ///
    /// # Example
    /// ```no_run
    /// # use widerow_client::{Client, ClientConfig};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::connect(ClientConfig::new("my-project", "my-instance")).await?;
    /// if let Some(row) = client.table("users").read_row("user#123").await? {
    ///     for cell in row.cells("profile", b"name") {
    ///         println!("{:?} @ {}", cell.value, cell.timestamp_micros);
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn read_row(&self, key: impl Into<Bytes>) -> Result<Option<Row>> {
        let key = key.into();
        let mut scan = self.read_rows(ReadRowsOptions::new().key(key).limit(1))?;
        scan.next_row().await
    }

    /// Apply a batch of row mutations
    ///
    /// # Example
    /// ```no_run
    /// # use widerow_client::{Client, ClientConfig, ClientError, MutationEntry};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::connect(ClientConfig::new("my-project", "my-instance")).await?;
    /// let entries = vec![
    ///     MutationEntry::new("user#1").set_cell("profile", "name", "Alice"),
    ///     MutationEntry::new("user#2").delete_row(),
    /// ];
    ///
    /// match client.table("users").mutate(&entries).await {
    ///     Ok(()) => {}
    ///     Err(ClientError::PartialFailure(partial)) => {
    ///         for failure in &partial.failures {
    ///             eprintln!("{}", failure);
    ///         }
    ///     }
    ///     Err(e) => return Err(e.into()),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn mutate(&self, entries: &[MutationEntry]) -> Result<()> {
        MutationBatcher::new(
            Arc::clone(&self.transport),
            self.name.clone(),
            self.app_profile_id.clone(),
            self.mutate_retry.clone(),
        )
        .apply(entries)
        .await
    }

    /// Apply mutations to a single row
    pub async fn mutate_row(&self, entry: MutationEntry) -> Result<()> {
        self.mutate(std::slice::from_ref(&entry)).await
    }

    /// Write plain cell values. Cells without a timestamp get server time.
    pub async fn insert<I>(&self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = RowData>,
    {
        let entries: Vec<MutationEntry> = rows.into_iter().map(MutationEntry::from).collect();
        self.mutate(&entries).await
    }
}
