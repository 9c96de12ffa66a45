//! Cancellable, observable units of render work

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::backend::PageId;
use super::buffer::ImageBuffer;
use super::error::RenderError;

/// Cooperative cancellation flag, shared between whoever may cancel and
/// the code doing the work.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set
    pub fn check(&self) -> Result<(), RenderError> {
        if self.is_cancelled() {
            Err(RenderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Unique identifier for render jobs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

pub type RenderResult = Result<Arc<ImageBuffer>, RenderError>;

/// Notice that a worker is done with a job. Carries no image, so holding
/// notices never keeps rendered pages alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobEvent {
    pub id: JobId,
    pub page: PageId,
    pub status: JobStatus,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: f32,
    outcome: Option<RenderResult>,
}

#[derive(Debug)]
struct JobShared {
    id: JobId,
    page: PageId,
    cancel: CancelFlag,
    state: Mutex<JobState>,
    finished: Condvar,
}

/// Handle to a queued render. Cloning yields another handle to the same
/// job; the job lives until the scheduler and every handle let go of it.
#[derive(Clone, Debug)]
pub struct RenderJob {
    shared: Arc<JobShared>,
}

impl RenderJob {
    pub(crate) fn new(id: JobId, page: PageId) -> Self {
        Self {
            shared: Arc::new(JobShared {
                id,
                page,
                cancel: CancelFlag::new(),
                state: Mutex::new(JobState {
                    status: JobStatus::Pending,
                    progress: 0.0,
                    outcome: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.shared.id
    }

    #[must_use]
    pub fn page(&self) -> PageId {
        self.shared.page
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Progress in `[0, 1]`; never decreases
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.lock().progress
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block until the job reaches a terminal state. `None` waits
    /// indefinitely. Returns whether the job finished; a timeout does not
    /// cancel the job.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let state = self.lock();
        match timeout {
            None => {
                let state = self
                    .shared
                    .finished
                    .wait_while(state, |s| !s.status.is_terminal())
                    .unwrap_or_else(PoisonError::into_inner);
                state.status.is_terminal()
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                let mut state = state;
                while !state.status.is_terminal() {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    state = self
                        .shared
                        .finished
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                true
            }
        }
    }

    /// Request cancellation. A pending job is cancelled on the spot. A
    /// running job stays `Running` until its worker next checks the flag;
    /// if the render already got past its last check it completes
    /// normally. No-op once the job is terminal.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return;
        }
        self.shared.cancel.cancel();
        if state.status == JobStatus::Pending {
            state.status = JobStatus::Cancelled;
            state.outcome = Some(Err(RenderError::Cancelled));
            self.shared.finished.notify_all();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait for the job and take its outcome. Only a `Completed` job yields
    /// an image.
    pub fn result(&self) -> RenderResult {
        self.wait(None);
        let state = self.lock();
        match (state.status, &state.outcome) {
            (JobStatus::Completed, Some(Ok(image))) => Ok(Arc::clone(image)),
            (JobStatus::Failed, Some(Err(err))) => Err(err.clone()),
            (JobStatus::Cancelled, _) => Err(RenderError::Cancelled),
            (status, _) => Err(RenderError::render(format!(
                "render job ended in inconsistent state {status:?}"
            ))),
        }
    }

    pub(crate) fn cancel_flag(&self) -> &CancelFlag {
        &self.shared.cancel
    }

    /// `Pending -> Running`. False if the job was cancelled first.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.lock();
        if state.status != JobStatus::Pending {
            return false;
        }
        state.status = JobStatus::Running;
        true
    }

    pub(crate) fn set_progress(&self, progress: f32) {
        let mut state = self.lock();
        if state.status == JobStatus::Running {
            state.progress = state.progress.max(progress.clamp(0.0, 1.0));
        }
    }

    /// Completion notice for this job's current state
    #[must_use]
    pub fn event(&self) -> JobEvent {
        JobEvent {
            id: self.id(),
            page: self.page(),
            status: self.status(),
        }
    }

    /// Record the worker's outcome. Ignored once the job is terminal.
    pub(crate) fn finish(&self, outcome: RenderResult) {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return;
        }
        let status = match &outcome {
            Ok(_) => JobStatus::Completed,
            Err(RenderError::Cancelled) => JobStatus::Cancelled,
            Err(_) => JobStatus::Failed,
        };
        if status == JobStatus::Completed {
            state.progress = 1.0;
        }
        state.status = status;
        state.outcome = Some(outcome);
        self.shared.finished.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::super::buffer::PixelFormat;
    use super::*;

    fn job() -> RenderJob {
        RenderJob::new(JobId(1), PageId(0))
    }

    fn image() -> Arc<ImageBuffer> {
        Arc::new(ImageBuffer::new(2, 2, PixelFormat::Gray8))
    }

    #[test]
    fn completes_with_image() {
        let job = job();
        assert!(job.start());
        job.set_progress(0.5);
        job.finish(Ok(image()));
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 1.0);
        assert!(job.result().is_ok());
        assert!(job.result().is_ok(), "result can be taken repeatedly");
    }

    #[test]
    fn cancel_before_start_never_runs() {
        let job = job();
        job.cancel();
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(!job.start());
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.result(), Err(RenderError::Cancelled));
    }

    #[test]
    fn cancel_while_running_waits_for_worker() {
        let job = job();
        assert!(job.start());
        job.cancel();
        assert!(job.is_cancel_requested());
        assert_eq!(job.status(), JobStatus::Running);
        assert!(!job.wait(Some(Duration::from_millis(5))));

        job.finish(Err(RenderError::Cancelled));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.result(), Err(RenderError::Cancelled));
    }

    #[test]
    fn cancel_after_last_check_keeps_finished_render() {
        let job = job();
        assert!(job.start());
        job.cancel();
        job.finish(Ok(image()));
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.result().is_ok());
    }

    #[test]
    fn event_reflects_state() {
        let job = job();
        job.cancel();
        assert_eq!(
            job.event(),
            JobEvent {
                id: JobId(1),
                page: PageId(0),
                status: JobStatus::Cancelled,
            }
        );
    }

    #[test]
    fn cancel_is_idempotent_and_ignored_when_terminal() {
        let job = job();
        job.start();
        job.finish(Err(RenderError::render("boom")));
        job.cancel();
        job.cancel();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.result(), Err(RenderError::render("boom")));
    }

    #[test]
    fn progress_never_regresses() {
        let job = job();
        job.start();
        job.set_progress(0.6);
        job.set_progress(0.2);
        assert_eq!(job.progress(), 0.6);
        job.set_progress(7.0);
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn wait_times_out_without_cancelling() {
        let job = job();
        assert!(!job.wait(Some(Duration::from_millis(20))));
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn wait_wakes_on_completion_from_another_thread() {
        let job = job();
        let worker = job.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            worker.start();
            worker.finish(Ok(image()));
        });
        assert!(job.wait(None));
        assert_eq!(job.status(), JobStatus::Completed);
        handle.join().expect("worker thread");
    }

    #[test]
    fn cancel_flag_check() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());
        flag.clone().cancel();
        assert_eq!(flag.check(), Err(RenderError::Cancelled));
    }
}
