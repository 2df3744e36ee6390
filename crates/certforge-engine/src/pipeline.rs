use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use certforge_core::{CertificateRecord, GenerationParams, ResourceBudget};
use certforge_generate::{plan_shards, CertificateSynthesizer};
use certforge_store::StreamingStore;

use crate::errors::JobError;

/// What the pipeline did before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { produced: u64 },
    Cancelled { produced: u64 },
}

/// Run one generation job end to end: reset the dataset, seed the clients,
/// fan `worker_count` synthesizer tasks out over a bounded queue, and funnel
/// every record through the single writer into transactional batches.
///
/// Backpressure is the queue capacity: producers suspend on a full queue, the
/// writer suspends on an empty one. The cancellation flag is observed by
/// every producer and by the writer at batch boundaries; a cancelled run
/// drops its partial batch, so only whole committed batches are ever visible.
pub async fn run_pipeline(
    params: GenerationParams,
    budget: ResourceBudget,
    store: &StreamingStore,
    produced: &Arc<AtomicU64>,
    cancel: &Arc<AtomicBool>,
) -> Result<PipelineOutcome, JobError> {
    let started = Instant::now();
    let shards = plan_shards(
        params.num_clients,
        params.num_certificates,
        budget.worker_count,
    );
    info!(
        clients = params.num_clients,
        certificates = params.num_certificates,
        workers = shards.len(),
        batch_size = budget.batch_size,
        buffer_size = budget.buffer_size,
        seed = params.seed,
        "generation pipeline starting"
    );

    store.reset_schema().await?;
    store.insert_clients(params.num_clients).await?;

    let batch_size = budget.batch_size.max(1);
    let (sender, mut receiver) = mpsc::channel::<CertificateRecord>(budget.buffer_size.max(1));
    let synthesizer = CertificateSynthesizer::new(params.seed, params.reference_time);

    let mut workers = Vec::with_capacity(shards.len());
    for spec in shards {
        let sender = sender.clone();
        let cancel = Arc::clone(cancel);
        workers.push(tokio::task::spawn_blocking(move || {
            let mut since_check = 0usize;
            let result = synthesizer.generate_shard_with(&spec, |record| {
                since_check += 1;
                if since_check >= batch_size {
                    since_check = 0;
                    if cancel.load(Ordering::Relaxed) {
                        return false;
                    }
                }
                sender.blocking_send(record).is_ok()
            });
            if result.is_err() {
                // bring the siblings and the writer down promptly
                cancel.store(true, Ordering::Relaxed);
            }
            result
        }));
    }
    drop(sender);

    // the single writer: every store write in the process goes through here
    let mut batch: Vec<CertificateRecord> = Vec::with_capacity(batch_size);
    let mut write_error: Option<JobError> = None;

    while let Some(record) = receiver.recv().await {
        batch.push(record);
        if batch.len() >= batch_size {
            if cancel.load(Ordering::Relaxed) {
                batch.clear();
                break;
            }
            match store.write_batch(&batch).await {
                Ok(written) => {
                    produced.fetch_add(written, Ordering::Relaxed);
                    debug!(
                        written,
                        total = produced.load(Ordering::Relaxed),
                        "batch committed"
                    );
                    batch.clear();
                }
                Err(err) => {
                    cancel.store(true, Ordering::Relaxed);
                    write_error = Some(err.into());
                    batch.clear();
                    break;
                }
            }
        }
    }
    // unblock any producer still waiting on a full queue
    receiver.close();
    drop(receiver);

    let mut synthesis_error: Option<JobError> = None;
    for worker in workers {
        match worker.await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                if synthesis_error.is_none() {
                    synthesis_error = Some(err.into());
                }
            }
            Err(join_error) => {
                if synthesis_error.is_none() {
                    synthesis_error = Some(JobError::WorkerPanic(join_error.to_string()));
                }
            }
        }
    }

    if let Some(err) = write_error.or(synthesis_error) {
        return Err(err);
    }

    if cancel.load(Ordering::Relaxed) {
        let total = produced.load(Ordering::Relaxed);
        info!(produced = total, "generation pipeline cancelled");
        return Ok(PipelineOutcome::Cancelled { produced: total });
    }

    if !batch.is_empty() {
        let written = store.write_batch(&batch).await?;
        produced.fetch_add(written, Ordering::Relaxed);
    }
    store.optimize().await?;

    let total = produced.load(Ordering::Relaxed);
    info!(
        produced = total,
        duration_ms = started.elapsed().as_millis() as u64,
        "generation pipeline completed"
    );
    Ok(PipelineOutcome::Completed { produced: total })
}
