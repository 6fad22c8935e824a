//! Background job runner.
//!
//! Regeneration jobs are blocking closures (agent calls go over the network,
//! artifacts go to disk). Each job runs on tokio's blocking pool inside a
//! detached task; nobody awaits it. Its outcome is sent as a [`JobReport`]
//! over a channel that is drained for logging, so failures are visible even
//! though no client ever sees them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Notify};

use crate::session::SessionId;

/// Kind of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Template,
    Title,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Template => f.write_str("template"),
            JobKind::Title => f.write_str("title"),
        }
    }
}

/// Outcome of one finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub kind: JobKind,
    pub session_id: SessionId,
    pub outcome: Result<(), String>,
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Decrements the in-flight count even if the job panics.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Spawns detached jobs and reports their outcomes.
#[derive(Clone)]
pub struct TaskRunner {
    reports: mpsc::UnboundedSender<JobReport>,
    in_flight: Arc<InFlight>,
}

impl TaskRunner {
    /// Runner whose reports are logged by a drain task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (runner, mut reports) = Self::with_reports();
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                log_report(&report);
            }
        });
        runner
    }

    /// Runner whose reports go to the returned receiver instead.
    pub fn with_reports() -> (Self, mpsc::UnboundedReceiver<JobReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Self {
            reports: tx,
            in_flight: Arc::new(InFlight::default()),
        };
        (runner, rx)
    }

    /// Run `job` off the calling task. Returns immediately.
    pub fn spawn<F, E>(&self, kind: JobKind, session_id: SessionId, job: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let outcome = match tokio::task::spawn_blocking(job).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("job panicked: {e}")),
            };
            // Report before releasing the guard so wait_idle sees it
            let _ = reports.send(JobReport {
                kind,
                session_id,
                outcome,
            });
            drop(guard);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Resolve once no job is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Like [`wait_idle`](Self::wait_idle), giving up after `timeout`.
    ///
    /// Returns `true` if every job finished in time.
    pub async fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn log_report(report: &JobReport) {
    match &report.outcome {
        Ok(()) => log::info!(
            "{} job finished for session {}",
            report.kind,
            report.session_id
        ),
        Err(e) => log::error!(
            "{} job failed for session {}: {}",
            report.kind,
            report.session_id,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn sid() -> SessionId {
        SessionId::parse("s1").unwrap()
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_without_jobs() {
        let (runner, _rx) = TaskRunner::with_reports();
        runner.wait_idle().await;
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn reports_success() {
        let (runner, mut rx) = TaskRunner::with_reports();
        runner.spawn(JobKind::Title, sid(), || Ok::<(), String>(()));
        runner.wait_idle().await;

        let report = rx.recv().await.unwrap();
        assert_eq!(report.kind, JobKind::Title);
        assert_eq!(report.session_id, sid());
        assert!(report.outcome.is_ok());
    }

    #[tokio::test]
    async fn reports_failure_message() {
        let (runner, mut rx) = TaskRunner::with_reports();
        runner.spawn(JobKind::Template, sid(), || Err::<(), _>("disk full"));
        runner.wait_idle().await;

        let report = rx.recv().await.unwrap();
        assert_eq!(report.outcome, Err("disk full".to_string()));
    }

    #[tokio::test]
    async fn reports_panics() {
        let (runner, mut rx) = TaskRunner::with_reports();
        runner.spawn(JobKind::Template, sid(), || -> Result<(), String> {
            panic!("kaboom")
        });
        runner.wait_idle().await;

        let report = rx.recv().await.unwrap();
        assert!(report.outcome.unwrap_err().contains("panicked"));
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_does_not_block_caller() {
        let (runner, _rx) = TaskRunner::with_reports();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);

        runner.spawn(JobKind::Template, sid(), move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
            Ok::<(), String>(())
        });

        assert!(!done.load(Ordering::SeqCst));
        runner.wait_idle().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wait_idle_timeout_success() {
        let (runner, _rx) = TaskRunner::with_reports();
        runner.spawn(JobKind::Title, sid(), || Ok::<(), String>(()));
        assert!(runner.wait_idle_timeout(Duration::from_secs(5)).await);
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn wait_idle_timeout_expired() {
        let (runner, _rx) = TaskRunner::with_reports();
        runner.spawn(JobKind::Template, sid(), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok::<(), String>(())
        });

        assert!(!runner.wait_idle_timeout(Duration::from_millis(10)).await);
        assert_eq!(runner.in_flight(), 1);
        runner.wait_idle().await;
    }

    #[test]
    fn debug_shows_in_flight_count() {
        let (runner, _rx) = TaskRunner::with_reports();
        assert_eq!(format!("{runner:?}"), "TaskRunner { in_flight: 0 }");
    }

    #[tokio::test]
    async fn drain_runner_accepts_jobs() {
        let runner = TaskRunner::new();
        runner.spawn(JobKind::Title, sid(), || Err::<(), _>("logged, not surfaced"));
        runner.wait_idle().await;
        assert_eq!(runner.in_flight(), 0);
    }
}
