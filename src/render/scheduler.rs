//! Background render scheduler - worker pool, job registry and shared cache

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, error, info, trace, warn};

use super::DEFAULT_WORKERS;
use super::backend::{PageId, PageProvider, RasterizerFactory};
use super::cache::RenderCache;
use super::error::RenderError;
use super::job::{JobEvent, JobId, JobStatus, RenderJob};
use super::renderer::Renderer;
use super::request::RenderOptions;

/// Worker pool sizing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of render threads; `0` picks one per available core.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }

    /// Thread count actually spawned
    #[must_use]
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism().map_or(1, usize::from)
    }
}

/// Jobs queued or running. Workers remove a job once they are done with
/// it, so finished jobs (and their images) live only as long as the
/// caller's handles.
#[derive(Default)]
struct JobRegistry(Mutex<HashMap<JobId, RenderJob>>);

impl JobRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, RenderJob>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, job: &RenderJob) {
        self.lock().insert(job.id(), job.clone());
    }

    fn remove(&self, id: JobId) {
        self.lock().remove(&id);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Jobs that have not reached a terminal state
    fn live(&self) -> Vec<RenderJob> {
        self.lock()
            .values()
            .filter(|job| !job.is_finished())
            .cloned()
            .collect()
    }

    fn count_with_status(&self, status: JobStatus) -> usize {
        self.lock()
            .values()
            .filter(|job| job.status() == status)
            .count()
    }
}

enum WorkRequest {
    Render {
        job: RenderJob,
        options: RenderOptions,
    },
    Shutdown,
}

/// Runs render jobs on a pool of worker threads.
///
/// Every worker owns its own rasterizer context and a [`Renderer`] over the
/// shared document and cache. Jobs are taken from one FIFO queue, so
/// single-worker pools complete jobs in submission order.
pub struct AsyncRenderer {
    provider: Arc<dyn PageProvider>,
    cache: Arc<RenderCache>,
    request_tx: Sender<WorkRequest>,
    done_rx: Receiver<JobEvent>,
    jobs: Arc<JobRegistry>,
    next_job_id: AtomicU64,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for AsyncRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRenderer")
            .field("workers", &self.workers.len())
            .field("jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

impl AsyncRenderer {
    /// Scheduler with its own default-sized cache and one worker per core
    pub fn new<F>(provider: Arc<dyn PageProvider>, factory: F) -> io::Result<Self>
    where
        F: RasterizerFactory + 'static,
    {
        Self::with_config(
            provider,
            factory,
            Arc::new(RenderCache::default()),
            SchedulerConfig::default(),
        )
    }

    /// Spawn the worker pool. `cache` may be shared with other renderers.
    pub fn with_config<F>(
        provider: Arc<dyn PageProvider>,
        factory: F,
        cache: Arc<RenderCache>,
        config: SchedulerConfig,
    ) -> io::Result<Self>
    where
        F: RasterizerFactory + 'static,
    {
        let factory: Arc<dyn RasterizerFactory> = Arc::new(factory);

        // flume gives us MPMC: all workers pull from one shared queue.
        let (request_tx, request_rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::unbounded();
        let jobs = Arc::new(JobRegistry::default());

        let count = config.resolved_workers();
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let provider = Arc::clone(&provider);
            let factory = Arc::clone(&factory);
            let cache = Arc::clone(&cache);
            let requests = request_rx.clone();
            let done = done_tx.clone();
            let registry = Arc::clone(&jobs);

            let spawned = thread::Builder::new()
                .name(format!("render-worker-{index}"))
                .spawn(move || {
                    let worker = WorkerContext {
                        index,
                        registry,
                        done,
                    };
                    render_worker(&worker, provider, factory.as_ref(), cache, requests);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!("Failed to spawn render worker {index}: {e}");
                    for _ in 0..workers.len() {
                        let _ = request_tx.send(WorkRequest::Shutdown);
                    }
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }
        info!("Render scheduler started with {count} workers");

        Ok(Self {
            provider,
            cache,
            request_tx,
            done_rx,
            jobs,
            next_job_id: AtomicU64::new(1),
            workers,
        })
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn PageProvider> {
        &self.provider
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    /// Queue one page. The returned handle is `Pending` until a worker
    /// picks it up. Invalid pages fail when rendered, not here.
    pub fn queue_render(&self, page: PageId, options: &RenderOptions) -> RenderJob {
        let id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let job = RenderJob::new(id, page);

        self.jobs.insert(&job);

        let request = WorkRequest::Render {
            job: job.clone(),
            options: options.clone(),
        };
        if self.request_tx.send(request).is_err() {
            warn!("Render queue closed; failing job {id:?} for {page}");
            job.finish(Err(RenderError::render("render workers have shut down")));
            self.jobs.remove(id);
        } else {
            trace!("Queued job {id:?} for {page} [{}]", options.fingerprint());
        }
        job
    }

    /// One job per page, in input order
    pub fn queue_batch(&self, pages: &[PageId], options: &RenderOptions) -> Vec<RenderJob> {
        pages.iter().map(|&page| self.queue_render(page, options)).collect()
    }

    /// One job per page of the document, in page order
    pub fn queue_all(&self, options: &RenderOptions) -> Vec<RenderJob> {
        self.queue_batch(&self.provider.page_ids(), options)
    }

    /// Jobs queued but not yet started
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.jobs.count_with_status(JobStatus::Pending)
    }

    /// Jobs currently being rendered
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.jobs.count_with_status(JobStatus::Running)
    }

    /// Cancel every job that has not finished yet
    pub fn cancel_all(&self) {
        let live = self.jobs.live();
        if !live.is_empty() {
            debug!("Cancelling {} render jobs", live.len());
        }
        for job in live {
            job.cancel();
        }
    }

    /// Block until every job queued so far is terminal. Returns `false` if
    /// `timeout` ran out first; nothing is cancelled in that case.
    pub fn wait_all(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        for job in self.jobs.live() {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if !job.wait(remaining) {
                return false;
            }
        }
        true
    }

    /// Notices for jobs whose worker has finished with them since the last
    /// poll, in completion order. Jobs cancelled while pending show up once
    /// a worker dequeues them. Results are read through the job handles.
    pub fn poll_completed(&self) -> Vec<JobEvent> {
        self.done_rx.try_iter().collect()
    }

    /// Receiver of completion notices, for callers that block or select on it
    #[must_use]
    pub fn completed_receiver(&self) -> &Receiver<JobEvent> {
        &self.done_rx
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache.set_enabled(enabled);
    }

    #[must_use]
    pub fn is_cache_enabled(&self) -> bool {
        self.cache.is_enabled()
    }

    /// Cache size limit in megabytes
    pub fn set_cache_size(&self, megabytes: usize) {
        self.cache.set_size_limit_mb(megabytes);
    }

    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache.size_limit_mb()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn invalidate_page(&self, page: PageId) {
        self.cache.invalidate(page);
    }

    /// Cancel outstanding jobs and stop the workers. A render already
    /// inside the rasterizer is allowed to return first.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.cancel_all();
        for _ in 0..self.workers.len() {
            let _ = self.request_tx.send(WorkRequest::Shutdown);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Render worker panicked during shutdown");
            }
        }
        info!("Render scheduler stopped");
    }
}

impl Drop for AsyncRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerContext {
    index: usize,
    registry: Arc<JobRegistry>,
    done: Sender<JobEvent>,
}

impl WorkerContext {
    /// Hand the job back: drop it from the registry and from this worker
    /// before announcing it, so the caller's handles are the last owners.
    fn release(&self, job: RenderJob) {
        self.registry.remove(job.id());
        let event = job.event();
        drop(job);
        let _ = self.done.send(event);
    }
}

fn render_worker(
    worker: &WorkerContext,
    provider: Arc<dyn PageProvider>,
    factory: &dyn RasterizerFactory,
    cache: Arc<RenderCache>,
    requests: Receiver<WorkRequest>,
) {
    let index = worker.index;
    // A worker without a context still drains its share of the queue so
    // no job is left pending forever.
    let mut renderer = Renderer::from_factory(provider, factory, cache).inspect_err(|e| {
        error!("Render worker {index} has no rasterizer: {e}");
    });

    for request in requests {
        let (job, options) = match request {
            WorkRequest::Render { job, options } => (job, options),
            WorkRequest::Shutdown => break,
        };

        if !job.start() {
            trace!("Worker {index} skipping {:?}: {:?}", job.id(), job.status());
            worker.release(job);
            continue;
        }

        let outcome = match renderer.as_mut() {
            Ok(renderer) => panic::catch_unwind(AssertUnwindSafe(|| {
                renderer.render_observed(job.page(), &options, job.cancel_flag(), &mut |p| {
                    job.set_progress(p);
                })
            }))
            .unwrap_or_else(|_| {
                error!("Render worker {index} panicked rendering {}", job.page());
                Err(RenderError::render("rasterizer panicked"))
            }),
            Err(e) => Err(e.clone()),
        };

        if let Err(e) = &outcome {
            if !e.is_cancelled() {
                debug!("Job {:?} for {} failed: {e}", job.id(), job.page());
            }
        }
        job.finish(outcome);
        worker.release(job);
    }

    trace!("Render worker {index} exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Gate, SyntheticBackend, SyntheticDocument};

    fn wait_for_status(job: &RenderJob, status: JobStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while job.status() != status {
            assert!(Instant::now() < deadline, "job never reached {status:?}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn small() -> RenderOptions {
        RenderOptions::builder().dpi(18.0).build().expect("valid")
    }

    fn scheduler(backend: SyntheticBackend, pages: usize, workers: usize) -> AsyncRenderer {
        AsyncRenderer::with_config(
            Arc::new(SyntheticDocument::letter(pages)),
            backend,
            Arc::new(RenderCache::with_size_mb(8)),
            SchedulerConfig::with_workers(workers),
        )
        .expect("spawn workers")
    }

    #[test]
    fn zero_workers_means_one_per_core() {
        assert!(SchedulerConfig::with_workers(0).resolved_workers() >= 1);
        assert_eq!(SchedulerConfig::with_workers(3).resolved_workers(), 3);
    }

    #[test]
    fn queued_job_completes() {
        let renderer = scheduler(SyntheticBackend::new(), 2, 2);
        let job = renderer.queue_render(PageId(1), &small());
        assert!(job.wait(Some(Duration::from_secs(5))));
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 1.0);
        let image = job.result().expect("renders");
        assert_eq!((image.width(), image.height()), (153, 198));
        assert!(renderer.cache().len() >= 1);
    }

    #[test]
    fn invalid_page_fails_job() {
        let renderer = scheduler(SyntheticBackend::new(), 1, 1);
        let job = renderer.queue_render(PageId(5), &small());
        assert!(matches!(job.result(), Err(RenderError::InvalidArgument(_))));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn pending_job_cancelled_before_it_runs() {
        let gate = Gate::new();
        let backend = SyntheticBackend::new().gated(gate.clone());
        let renderer = scheduler(backend.clone(), 2, 1);

        let blocker = renderer.queue_render(PageId(0), &small());
        wait_for_status(&blocker, JobStatus::Running);
        let queued = renderer.queue_render(PageId(1), &small());
        assert_eq!(renderer.pending_count(), 1);
        assert_eq!(renderer.active_count(), 1);

        queued.cancel();
        assert_eq!(queued.status(), JobStatus::Cancelled);
        gate.open();

        assert!(renderer.wait_all(Some(Duration::from_secs(5))));
        assert_eq!(blocker.status(), JobStatus::Completed);
        assert_eq!(queued.result(), Err(RenderError::Cancelled));
        assert_eq!(backend.calls(), 1, "cancelled job never reached the rasterizer");
    }

    #[test]
    fn running_job_cancel_discards_output() {
        let gate = Gate::new();
        let renderer = scheduler(SyntheticBackend::new().gated(gate.clone()), 1, 1);
        let job = renderer.queue_render(PageId(0), &small());
        wait_for_status(&job, JobStatus::Running);

        job.cancel();
        assert_eq!(job.status(), JobStatus::Running);
        gate.open();

        let done = renderer.completed_receiver().recv_timeout(Duration::from_secs(5));
        assert_eq!(
            done,
            Ok(JobEvent {
                id: job.id(),
                page: PageId(0),
                status: JobStatus::Cancelled,
            })
        );
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.result(), Err(RenderError::Cancelled));
        assert!(renderer.cache().is_empty());
    }

    #[test]
    fn finished_jobs_leave_the_registry() {
        let renderer = scheduler(SyntheticBackend::new(), 1, 1);
        let jobs = renderer.queue_batch(&[PageId(0), PageId(0)], &small());
        for _ in &jobs {
            renderer
                .completed_receiver()
                .recv_timeout(Duration::from_secs(5))
                .expect("job reported");
        }
        assert_eq!(renderer.jobs.len(), 0);
        assert!(jobs.iter().all(RenderJob::is_finished));
    }

    #[test]
    fn broken_context_fails_jobs_instead_of_hanging() {
        let renderer = scheduler(SyntheticBackend::new().refusing_contexts(), 1, 2);
        let jobs = renderer.queue_batch(&[PageId(0), PageId(0)], &small());
        for job in jobs {
            assert!(matches!(job.result(), Err(RenderError::Render(_))));
        }
    }

    #[test]
    fn drop_cancels_outstanding_work() {
        let gate = Gate::new();
        let renderer = scheduler(SyntheticBackend::new().gated(gate.clone()), 3, 1);
        let jobs = renderer.queue_all(&small());
        wait_for_status(&jobs[0], JobStatus::Running);

        let opener = {
            let gate = gate.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                gate.open();
            })
        };
        drop(renderer);
        opener.join().expect("opener thread");

        for job in &jobs {
            assert_eq!(job.status(), JobStatus::Cancelled);
        }
    }
}
