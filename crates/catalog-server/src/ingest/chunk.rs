//! Chunk processing
//!
//! Streams one chunk file (`name;price;expiration`, header first), validates
//! every data line and bulk-inserts the valid products in batches.

use csv_async::{AsyncReaderBuilder, StringRecord, Trim};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;

use super::jobs::{ChunkResult, ValidationError};
use super::row::{sanitize, NewProduct, RawRow};
use super::IngestError;
use crate::db::ProductRepository;
use crate::rates::ExchangeRates;

pub struct ChunkProcessor {
    repo: Arc<dyn ProductRepository>,
    batch_size: usize,
}

/// Valid rows waiting for the next bulk insert, keyed by line number
type PendingBatch = Vec<(u64, NewProduct)>;

fn field(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).filter(|v| !v.is_empty())
}

impl ChunkProcessor {
    pub fn new(repo: Arc<dyn ProductRepository>, batch_size: usize) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
        }
    }

    /// Validate and persist every data line of `path`.
    ///
    /// Row and stream problems are reported in the returned result. A file
    /// that cannot be opened or a failed bulk insert is an error, so the
    /// attempt is retried. Rows are stored under `chunk_id` and their line
    /// number, so a retry only writes the lines an earlier attempt missed.
    pub async fn process_chunk(
        &self,
        chunk_id: &str,
        path: &Path,
        exchange_rates: &ExchangeRates,
    ) -> Result<ChunkResult, IngestError> {
        let file = File::open(path).await.map_err(|e| IngestError::io(path, e))?;
        let mut reader = AsyncReaderBuilder::new()
            .delimiter(b';')
            .quote(b'"')
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .create_reader(file);

        let mut result = ChunkResult::default();
        let mut batch = PendingBatch::default();
        let mut record = StringRecord::new();
        let mut line: u64 = 0;

        loop {
            match reader.read_record(&mut record).await {
                Ok(true) => {},
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(path = %path.display(), line = line + 1, error = %e, "Chunk stream failed");
                    result.errors.push(ValidationError {
                        line: line + 1,
                        error: format!("Stream processing failed: {}", e),
                    });
                    break;
                },
            }
            line += 1;

            let row = RawRow::new(
                record.get(0).unwrap_or_default(),
                field(&record, 1),
                field(&record, 2),
            );
            match row.to_product(exchange_rates, sanitize) {
                Ok(product) => {
                    batch.push((line, product));
                    if batch.len() >= self.batch_size {
                        self.flush(chunk_id, &mut batch, &mut result).await?;
                    }
                },
                Err(error) => result.errors.push(ValidationError { line, error }),
            }
        }

        self.flush(chunk_id, &mut batch, &mut result).await?;
        result.errors.sort_by_key(|e| e.line);

        tracing::info!(
            path = %path.display(),
            rows = line,
            processed = result.processed,
            errors = result.errors.len(),
            "Chunk processed"
        );

        Ok(result)
    }

    async fn flush(
        &self,
        chunk_id: &str,
        batch: &mut PendingBatch,
        result: &mut ChunkResult,
    ) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }

        if let Err(source) = self.repo.insert_batch(chunk_id, batch).await {
            let first = batch.first().map(|(line, _)| *line).unwrap_or_default();
            let last = batch.last().map(|(line, _)| *line).unwrap_or_default();
            tracing::error!(
                chunk_id = %chunk_id,
                rows = batch.len(),
                first_line = first,
                last_line = last,
                error = %source,
                "Bulk insert failed"
            );
            return Err(IngestError::Storage {
                rows: batch.len(),
                source,
            });
        }

        // Lines stored by an earlier attempt count as processed too
        result.processed += batch.len() as u64;
        batch.clear();
        Ok(())
    }
}
