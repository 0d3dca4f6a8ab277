/// Batched mutations with per-entry retry
use crate::error::{ClientError, EntryFailure, PartialFailure, Result};
use crate::mutation::MutationEntry;
use crate::retry::{self, RetryPolicy};
use crate::transport::Transport;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tonic::Code;
use tracing::{debug, warn};
use widerow_proto::MutateRowsRequest;

/// Sends a list of row mutations and retries only the entries that failed
/// transiently.
pub struct MutationBatcher {
    transport: Arc<dyn Transport>,
    table_name: String,
    app_profile_id: String,
    policy: RetryPolicy,
}

/// Latest failure seen for one entry.
#[derive(Debug, Clone)]
struct EntryError {
    code: Code,
    message: String,
}

impl MutationBatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        table_name: impl Into<String>,
        app_profile_id: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            table_name: table_name.into(),
            app_profile_id: app_profile_id.into(),
            policy,
        }
    }

    /// Apply `entries`.
    ///
    /// Returns `Ok(())` when every entry succeeded,
    /// [`ClientError::PartialFailure`] naming each entry that did not, or
    /// the call's own error if the first batched call failed as a whole.
    ///
    /// Entries the server did not report on take the status that ended the
    /// call's stream, if any. A non-retryable one stops all retries.
    pub async fn apply(&self, entries: &[MutationEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in entries {
            entry.validate()?;
        }

        let mut pending: BTreeSet<usize> = (0..entries.len()).collect();
        let mut errors: BTreeMap<usize, EntryError> = BTreeMap::new();
        let mut attempts = 0u32;
        let started = Instant::now();

        while !pending.is_empty() {
            // Position in this request -> position in the caller's list.
            let batch: Vec<usize> = pending.iter().copied().collect();
            let request = MutateRowsRequest {
                table_name: self.table_name.clone(),
                app_profile_id: self.app_profile_id.clone(),
                entries: batch.iter().map(|&i| entries[i].to_proto()).collect(),
            };

            debug!(attempt = attempts, entries = batch.len(), "sending mutation batch");
            let response = self.transport.mutate_rows(request, attempts).await;
            attempts += 1;

            let outcome = match response {
                Ok(outcome) => outcome,
                Err(status) if attempts == 1 => return Err(ClientError::from(status)),
                Err(status) => {
                    // Earlier attempts already applied some entries; report the rest.
                    warn!(
                        code = ?status.code(),
                        pending = batch.len(),
                        "mutation batch failed as a whole"
                    );
                    for &index in &batch {
                        errors.insert(
                            index,
                            EntryError {
                                code: status.code(),
                                message: status.message().to_string(),
                            },
                        );
                    }
                    break;
                }
            };

            let mut reported = vec![false; batch.len()];
            for result in outcome.entries {
                let position = usize::try_from(result.index)
                    .ok()
                    .filter(|&p| p < batch.len());
                let Some(position) = position else {
                    warn!(index = result.index, "ignoring status for unknown entry");
                    continue;
                };
                reported[position] = true;
                let index = batch[position];

                let (code, message) = match result.status {
                    Some(status) => (Code::from(status.code), status.message),
                    None => (Code::Ok, String::new()),
                };

                if code == Code::Ok {
                    pending.remove(&index);
                    errors.remove(&index);
                } else if retry::is_retryable_code(code) {
                    errors.insert(index, EntryError { code, message });
                } else {
                    pending.remove(&index);
                    errors.insert(index, EntryError { code, message });
                }
            }

            let unreported = match &outcome.trailing_error {
                Some(status) => EntryError {
                    code: status.code(),
                    message: status.message().to_string(),
                },
                None => EntryError {
                    code: Code::Unknown,
                    message: "no status returned for entry".to_string(),
                },
            };
            for (position, &index) in batch.iter().enumerate() {
                if !reported[position] {
                    errors.insert(index, unreported.clone());
                }
            }

            if pending.is_empty() || !self.policy.allows_retry(attempts) {
                break;
            }
            if let Some(status) = &outcome.trailing_error {
                if !retry::is_retryable_code(status.code()) {
                    warn!(
                        code = ?status.code(),
                        pending = pending.len(),
                        "mutation stream failed permanently"
                    );
                    break;
                }
            }
            if self.policy.deadline_passed(started) {
                warn!(
                    attempts,
                    pending = pending.len(),
                    "mutation deadline exceeded"
                );
                break;
            }

            let delay = self.policy.backoff_duration(attempts);
            warn!(
                attempt = attempts,
                pending = pending.len(),
                delay_ms = delay.as_millis() as u64,
                "retrying failed mutation entries"
            );
            tokio::time::sleep(delay).await;
        }

        if errors.is_empty() {
            debug!(entries = entries.len(), attempts, "mutation batch applied");
            return Ok(());
        }

        let failures = errors
            .into_iter()
            .map(|(index, error)| EntryFailure {
                index,
                row_key: entries[index].row_key.clone(),
                code: error.code,
                message: error.message,
            })
            .collect();
        Err(ClientError::PartialFailure(PartialFailure { failures }))
    }
}
