//! Batch Processor
//!
//! Per-provider pipeline: pulls verbatim chunks, fans each chunk out over
//! a bounded pool of blocking workers running the transformer, and writes
//! the results into the target (inactive) generation.
//!
//! Per-record problems become invalid observations and never abort the
//! run. Source, store and worker failures end the run as `Failed`;
//! cancellation ends it as `Canceled`. Either way the active generation is
//! untouched.

pub mod statistics;

use std::ops::Range;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sos_common::config::ProcessingConfig;
use sos_common::events::{EventBus, ProcessingEvent};
use sos_common::models::{
    Instance, InvalidObservation, ProcessedObservation, RunInfo, RunStatus, VerbatimObservation,
};

use crate::error::{ProcessingError, ProcessingResult};
use crate::services::observation_transformer::TransformContext;
use crate::store::{BulkWriter, RunInfoStore, VerbatimSource};

pub use statistics::{RunStatistics, StatisticsSnapshot};

/// Output of one worker slice
#[derive(Debug, Default)]
struct SliceOutput {
    processed: Vec<ProcessedObservation>,
    invalid: Vec<InvalidObservation>,
}

/// How a provider run ended before its RunInfo is finalized
enum RunEnd {
    Completed,
    Canceled,
}

pub struct BatchProcessor {
    context: TransformContext,
    processed_writer: Arc<dyn BulkWriter<ProcessedObservation>>,
    invalid_writer: Arc<dyn BulkWriter<InvalidObservation>>,
    run_info_store: Arc<dyn RunInfoStore>,
    config: ProcessingConfig,
    event_bus: EventBus,
}

impl BatchProcessor {
    pub fn new(
        context: TransformContext,
        processed_writer: Arc<dyn BulkWriter<ProcessedObservation>>,
        invalid_writer: Arc<dyn BulkWriter<InvalidObservation>>,
        run_info_store: Arc<dyn RunInfoStore>,
        config: ProcessingConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            context,
            processed_writer,
            invalid_writer,
            run_info_store,
            config,
            event_bus,
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Process every verbatim record of one provider into `target`
    ///
    /// Always returns a terminal RunInfo; failures are reported through its
    /// status and message. The RunInfo is persisted before returning.
    pub async fn run_provider(
        &self,
        run_id: Uuid,
        source: &dyn VerbatimSource,
        target: Instance,
        cancel_token: &CancellationToken,
    ) -> RunInfo {
        let data_provider_id = source.data_provider_id();
        let mut info = RunInfo::start(run_id, data_provider_id, target);
        let stats = Arc::new(RunStatistics::new());

        tracing::info!(
            run_id = %run_id,
            provider_id = data_provider_id,
            generation = %target,
            "Provider run started"
        );
        self.event_bus.emit_lossy(ProcessingEvent::ProviderRunStarted {
            run_id,
            data_provider_id,
            instance: target,
            timestamp: Utc::now(),
        });
        if let Err(e) = self.run_info_store.save_run_info(&info).await {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to record run start");
        }

        let outcome = self
            .process_provider(&info, source, &stats, cancel_token)
            .await;

        let snapshot = stats.snapshot();
        match outcome {
            Ok(RunEnd::Completed) => {
                info.finish(RunStatus::Success, snapshot.processed, snapshot.invalid);
                tracing::info!(
                    run_id = %run_id,
                    provider_id = data_provider_id,
                    generation = %target,
                    summary = %snapshot.display_string(),
                    "Provider run completed"
                );
            }
            Ok(RunEnd::Canceled) => {
                info.finish(RunStatus::Canceled, snapshot.processed, snapshot.invalid);
                tracing::info!(
                    run_id = %run_id,
                    provider_id = data_provider_id,
                    summary = %snapshot.display_string(),
                    "Provider run cancelled"
                );
            }
            Err(e) => {
                info.fail(e.to_string(), snapshot.processed, snapshot.invalid);
                tracing::error!(
                    run_id = %run_id,
                    provider_id = data_provider_id,
                    error = %e,
                    "Provider run failed"
                );
            }
        }

        if let Err(e) = self.run_info_store.save_run_info(&info).await {
            // An unrecorded success cannot be trusted for activation later
            tracing::error!(run_id = %run_id, error = %e, "Failed to persist run info");
            if info.is_success() {
                info.fail(
                    format!("run info not persisted: {}", e),
                    info.count,
                    info.invalid_count,
                );
            }
        }

        self.event_bus.emit_lossy(ProcessingEvent::ProviderRunCompleted {
            run_id,
            data_provider_id,
            status: info.status,
            count: info.count,
            timestamp: Utc::now(),
        });

        info
    }

    async fn process_provider(
        &self,
        info: &RunInfo,
        source: &dyn VerbatimSource,
        stats: &Arc<RunStatistics>,
        cancel_token: &CancellationToken,
    ) -> ProcessingResult<RunEnd> {
        let data_provider_id = info.data_provider_id;
        let target = info.instance;

        match source.harvest_info().await {
            Ok(Some(harvest)) if harvest.status != RunStatus::Success => {
                return Err(ProcessingError::Source(format!(
                    "last harvest of provider {} ended {}",
                    data_provider_id,
                    harvest.status.as_str()
                )));
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(
                    provider_id = data_provider_id,
                    "No harvest info for provider, processing verbatim data as is"
                );
            }
            Err(e) => return Err(ProcessingError::Source(e.to_string())),
        }

        // Remove leftovers of an earlier attempt against this generation
        let removed_processed = self
            .processed_writer
            .clear_provider(target, data_provider_id)
            .await?;
        let removed_invalid = self
            .invalid_writer
            .clear_provider(target, data_provider_id)
            .await?;
        tracing::debug!(
            provider_id = data_provider_id,
            generation = %target,
            removed_processed,
            removed_invalid,
            "Cleared previous provider data from target generation"
        );

        let chunk_size = self.config.chunk_size;
        let mut offset = 0u64;

        loop {
            if cancel_token.is_cancelled() {
                return Ok(RunEnd::Canceled);
            }

            let chunk = source
                .get_chunk(offset, chunk_size)
                .await
                .map_err(|e| ProcessingError::Source(e.to_string()))?;
            if chunk.is_empty() {
                break;
            }

            let chunk_len = chunk.len();
            stats.record_chunk(chunk_len);

            let output = match self.process_chunk(offset, chunk, stats, cancel_token).await? {
                Some(output) => output,
                None => return Ok(RunEnd::Canceled),
            };

            self.write_output(target, output).await?;

            let snapshot = stats.snapshot();
            tracing::debug!(
                run_id = %info.run_id,
                provider_id = data_provider_id,
                offset,
                summary = %snapshot.display_string(),
                "Chunk processed"
            );
            self.event_bus.emit_lossy(ProcessingEvent::ChunkProcessed {
                run_id: info.run_id,
                data_provider_id,
                read: snapshot.read,
                processed: snapshot.processed,
                invalid: snapshot.invalid,
                timestamp: Utc::now(),
            });

            offset += chunk_len as u64;
            if chunk_len < chunk_size {
                break;
            }
        }

        Ok(RunEnd::Completed)
    }

    /// Transform one chunk on the worker pool
    ///
    /// Returns `None` if cancellation was observed; slices already running
    /// finish, but their output is discarded.
    async fn process_chunk(
        &self,
        chunk_offset: u64,
        chunk: Vec<VerbatimObservation>,
        stats: &Arc<RunStatistics>,
        cancel_token: &CancellationToken,
    ) -> ProcessingResult<Option<SliceOutput>> {
        let records = Arc::new(chunk);
        let slices = slice_ranges(records.len(), self.config.worker_slice_size);

        let mut results: Vec<(usize, ProcessingResult<Option<SliceOutput>>)> =
            stream::iter(slices.into_iter().enumerate())
                .map(|(index, range)| {
                    let records = records.clone();
                    let context = self.context.clone();
                    let stats = stats.clone();
                    let cancel_token = cancel_token.clone();

                    async move {
                        if cancel_token.is_cancelled() {
                            return (index, Ok(None));
                        }

                        let slice_offset = chunk_offset + range.start as u64;
                        let result = tokio::task::spawn_blocking(move || {
                            transform_slice(&context, slice_offset, &records[range], &stats)
                        })
                        .await
                        .map(Some)
                        .map_err(|e| ProcessingError::Worker(e.to_string()));

                        (index, result)
                    }
                })
                .buffer_unordered(self.config.worker_count)
                .collect()
                .await;

        if cancel_token.is_cancelled() {
            return Ok(None);
        }

        // Reassemble in input order so duplicate keys resolve the same way every run
        results.sort_by_key(|(index, _)| *index);
        let mut output = SliceOutput::default();
        for (_, result) in results {
            if let Some(slice) = result? {
                output.processed.extend(slice.processed);
                output.invalid.extend(slice.invalid);
            }
        }
        Ok(Some(output))
    }

    async fn write_output(&self, target: Instance, output: SliceOutput) -> ProcessingResult<()> {
        let batch_size = self.config.worker_slice_size.max(1);

        for batch in output.processed.chunks(batch_size) {
            self.processed_writer.bulk_upsert(target, batch).await?;
        }
        for batch in output.invalid.chunks(batch_size) {
            self.invalid_writer.bulk_upsert(target, batch).await?;
        }
        Ok(())
    }
}

/// `slice_offset` is the source offset of `records[0]`
fn transform_slice(
    context: &TransformContext,
    slice_offset: u64,
    records: &[VerbatimObservation],
    stats: &RunStatistics,
) -> SliceOutput {
    let mut output = SliceOutput::default();
    for (position, verbatim) in records.iter().enumerate() {
        let (result, diagnostics) = context.transform_with_diagnostics(verbatim);
        stats.record(result.is_ok(), &diagnostics);
        match result {
            Ok(processed) => output.processed.push(processed),
            Err(mut invalid) => {
                if invalid.record_key.is_empty() {
                    invalid.record_key = offset_key(slice_offset + position as u64);
                }
                output.invalid.push(invalid);
            }
        }
    }
    output
}

/// Key of an invalid record without an occurrence id
pub fn offset_key(source_offset: u64) -> String {
    format!("offset:{}", source_offset)
}

/// Split `len` records into consecutive ranges of at most `slice_size`
fn slice_ranges(len: usize, slice_size: usize) -> Vec<Range<usize>> {
    let slice_size = slice_size.max(1);
    (0..len)
        .step_by(slice_size)
        .map(|start| start..(start + slice_size).min(len))
        .collect()
}
