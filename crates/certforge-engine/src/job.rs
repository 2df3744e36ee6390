use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use certforge_core::{
    ActiveCertificate, BudgetOverrides, GenerationParams, JobSnapshot, JobStatus, Page,
    ResourceProfiler,
};
use certforge_generate::max_feasible_records;
use certforge_store::StreamingStore;

use crate::errors::JobError;
use crate::pipeline::{run_pipeline, PipelineOutcome};

/// Seed used when the caller does not pin one.
pub const DEFAULT_SEED: u64 = 42;

/// Request to start a generation job.
#[derive(Debug, Clone, Copy)]
pub struct JobRequest {
    pub num_clients: u64,
    pub num_certificates: u64,
    /// Pin for reproducible runs; defaults to [`DEFAULT_SEED`].
    pub seed: Option<u64>,
    /// The synthetic "now" for the run; defaults to the wall clock.
    pub reference_time: Option<NaiveDateTime>,
    pub overrides: BudgetOverrides,
}

struct JobHandle {
    id: Uuid,
    params: GenerationParams,
    status: Mutex<JobStatus>,
    produced: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
    error: Mutex<Option<String>>,
}

impl JobHandle {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            status: *self.status.lock().expect("job status lock poisoned"),
            requested_clients: self.params.num_clients,
            requested_certificates: self.params.num_certificates,
            produced_count: self.produced.load(Ordering::Relaxed),
            error: self.error.lock().expect("job error lock poisoned").clone(),
        }
    }

    fn set_status(&self, status: JobStatus) {
        *self.status.lock().expect("job status lock poisoned") = status;
    }
}

struct JobEntry {
    handle: Arc<JobHandle>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Explicit registry of generation jobs, keyed by job id.
///
/// Exactly one job may be live (pending or running) at a time; terminal jobs
/// stay queryable until the process exits. Starting a new job destroys the
/// previous dataset.
pub struct JobRegistry {
    store: Arc<StreamingStore>,
    profiler: ResourceProfiler,
    jobs: Mutex<HashMap<Uuid, Arc<JobEntry>>>,
    dataset_ready: Arc<AtomicBool>,
}

impl JobRegistry {
    pub fn new(store: Arc<StreamingStore>) -> Self {
        Self {
            store,
            profiler: ResourceProfiler::new(),
            jobs: Mutex::new(HashMap::new()),
            dataset_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<StreamingStore> {
        &self.store
    }

    /// Validate the request, compute the budget once, and launch the
    /// pipeline in the background. Rejected while another job is live.
    pub fn start_job(&self, request: JobRequest) -> Result<Uuid, JobError> {
        if request.num_clients == 0 {
            return Err(JobError::InvalidParameters(
                "num_clients must be positive".to_string(),
            ));
        }
        let ceiling = max_feasible_records(request.num_clients);
        if request.num_certificates > ceiling {
            return Err(JobError::InvalidParameters(format!(
                "num_certificates {} exceeds the reuse-feasible ceiling of {} for {} clients",
                request.num_certificates, ceiling, request.num_clients
            )));
        }

        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        let live = jobs
            .values()
            .any(|entry| !entry.handle.snapshot().status.is_terminal());
        if live {
            return Err(JobError::AlreadyRunning);
        }

        let budget = self.profiler.profile(&request.overrides);
        let params = GenerationParams {
            num_clients: request.num_clients,
            num_certificates: request.num_certificates,
            seed: request.seed.unwrap_or(DEFAULT_SEED),
            reference_time: request
                .reference_time
                .unwrap_or_else(|| Utc::now().naive_utc()),
        };
        let handle = Arc::new(JobHandle {
            id: Uuid::new_v4(),
            params,
            status: Mutex::new(JobStatus::Pending),
            produced: Arc::new(AtomicU64::new(0)),
            cancel: Arc::new(AtomicBool::new(false)),
            error: Mutex::new(None),
        });
        let job_id = handle.id;
        info!(
            job_id = %job_id,
            clients = params.num_clients,
            certificates = params.num_certificates,
            workers = budget.worker_count,
            batch_size = budget.batch_size,
            buffer_size = budget.buffer_size,
            "job accepted"
        );

        // the new job's pipeline resets the store, so the previous dataset
        // stops being queryable now
        self.dataset_ready.store(false, Ordering::Relaxed);

        let store = Arc::clone(&self.store);
        let task_handle = Arc::clone(&handle);
        let dataset_ready = Arc::clone(&self.dataset_ready);
        let join = tokio::spawn(async move {
            task_handle.set_status(JobStatus::Running);
            let produced = Arc::clone(&task_handle.produced);
            let cancel = Arc::clone(&task_handle.cancel);
            match run_pipeline(task_handle.params, budget, &store, &produced, &cancel).await {
                Ok(PipelineOutcome::Completed { produced }) => {
                    task_handle.set_status(JobStatus::Completed);
                    dataset_ready.store(true, Ordering::Relaxed);
                    info!(job_id = %task_handle.id, produced, "job completed");
                }
                Ok(PipelineOutcome::Cancelled { produced }) => {
                    task_handle.set_status(JobStatus::Cancelled);
                    info!(job_id = %task_handle.id, produced, "job cancelled");
                }
                Err(err) => {
                    *task_handle
                        .error
                        .lock()
                        .expect("job error lock poisoned") = Some(err.to_string());
                    task_handle.set_status(JobStatus::Failed);
                    error!(job_id = %task_handle.id, error = %err, "job failed");
                }
            }
        });

        jobs.insert(
            job_id,
            Arc::new(JobEntry {
                handle,
                join: Mutex::new(Some(join)),
            }),
        );
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: Uuid) -> Result<JobSnapshot, JobError> {
        Ok(self.entry(job_id)?.handle.snapshot())
    }

    /// Request cooperative cancellation. Producers and the writer observe the
    /// flag at batch boundaries; in-flight transactions commit or roll back
    /// whole. A no-op for jobs already in a terminal state.
    pub fn cancel_job(&self, job_id: Uuid) -> Result<(), JobError> {
        let entry = self.entry(job_id)?;
        entry.handle.cancel.store(true, Ordering::Relaxed);
        info!(job_id = %job_id, "cancellation requested");
        Ok(())
    }

    /// Block until the job reaches a terminal state and return its snapshot.
    pub async fn wait(&self, job_id: Uuid) -> Result<JobSnapshot, JobError> {
        let entry = self.entry(job_id)?;
        let join = entry.join.lock().expect("job join lock poisoned").take();
        match join {
            Some(join) => {
                if let Err(join_error) = join.await {
                    // a panicked job task must not wedge the registry slot
                    *entry.handle.error.lock().expect("job error lock poisoned") =
                        Some(join_error.to_string());
                    entry.handle.set_status(JobStatus::Failed);
                    return Err(JobError::WorkerPanic(join_error.to_string()));
                }
            }
            None => {
                // someone else holds the join handle; poll instead
                while !self.get_status(job_id)?.status.is_terminal() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        self.get_status(job_id)
    }

    /// Page through the active subset of the last completed dataset.
    pub async fn query_active(
        &self,
        client_id: Option<i64>,
        page: u64,
        page_size: u64,
    ) -> Result<Page<ActiveCertificate>, JobError> {
        if page == 0 || page_size == 0 {
            return Err(JobError::InvalidParameters(
                "page and page_size must be positive".to_string(),
            ));
        }
        if !self.dataset_ready.load(Ordering::Relaxed) {
            return Err(JobError::NotFound(
                "no completed dataset is available yet; run a generation job first".to_string(),
            ));
        }
        let now = Utc::now().naive_utc();
        Ok(self.store.query_active(client_id, page, page_size, now).await?)
    }

    fn entry(&self, job_id: Uuid) -> Result<Arc<JobEntry>, JobError> {
        self.jobs
            .lock()
            .expect("job registry lock poisoned")
            .get(&job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))
    }
}
