//! Single designated thread on which task owners are called.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use bts_core::SchedulerConfig;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::DispatchError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle used to post work to the main loop.
#[derive(Clone)]
pub struct MainThread {
    tx: mpsc::UnboundedSender<Job>,
    thread: Arc<OnceLock<ThreadId>>,
}

/// Receiving half; whichever thread drives it becomes the main thread.
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Job>,
    thread: Arc<OnceLock<ThreadId>>,
}

impl MainThread {
    /// Create a handle and the loop the host will drive on its own thread.
    pub fn new() -> (MainThread, MainLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = Arc::new(OnceLock::new());
        (
            MainThread {
                tx,
                thread: Arc::clone(&thread),
            },
            MainLoop { rx, thread },
        )
    }

    /// Start a dedicated named thread running the loop. The thread exits once
    /// every handle has been dropped.
    pub fn spawn(name: &str) -> std::io::Result<(MainThread, JoinHandle<()>)> {
        let (handle, main_loop) = Self::new();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || main_loop.run())?;
        Ok((handle, join))
    }

    /// [`spawn`](Self::spawn) a thread named after `dispatch.main_thread_name`.
    pub fn from_config(config: &SchedulerConfig) -> std::io::Result<(MainThread, JoinHandle<()>)> {
        Self::spawn(&config.dispatch.main_thread_name)
    }

    pub fn is_current(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// Run `f` on the main thread and block until it returns.
    ///
    /// Runs inline when called from the main thread. Must not be called from
    /// inside an async runtime context.
    pub fn run_blocking<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = reply_tx.send(f());
            }))
            .map_err(|_| DispatchError::MainThreadGone)?;
        reply_rx.blocking_recv().map_err(|_| DispatchError::NoReply)
    }
}

impl MainLoop {
    /// Run posted work until every [`MainThread`] handle is dropped.
    pub fn run(mut self) {
        self.claim_current_thread();
        debug!("main loop started");
        while let Some(job) = self.rx.blocking_recv() {
            run_job(job);
        }
        debug!("main loop finished");
    }

    /// Run whatever is queued right now and return how many jobs ran. For
    /// hosts that pump their own event loop.
    pub fn run_until_idle(&mut self) -> usize {
        self.claim_current_thread();
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            run_job(job);
            ran += 1;
        }
        ran
    }

    fn claim_current_thread(&self) {
        let current = thread::current().id();
        if self.thread.get_or_init(|| current) != &current {
            error!("main loop moved to a different thread");
        }
    }
}

fn run_job(job: Job) {
    // A panicking owner must not take the loop down with it; the caller
    // sees the dropped reply as DispatchError::NoReply.
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("job panicked on main thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_on_the_spawned_thread() {
        let (main, join) = MainThread::spawn("test-main").expect("spawn");
        let name = main
            .run_blocking(|| thread::current().name().map(str::to_string))
            .expect("run");
        assert_eq!(name.as_deref(), Some("test-main"));
        drop(main);
        join.join().expect("join");
    }

    #[test]
    fn config_names_the_thread() {
        let mut config = SchedulerConfig::default();
        config.dispatch.main_thread_name = "host-ui".to_string();
        let (main, _join) = MainThread::from_config(&config).expect("spawn");
        let name = main
            .run_blocking(|| thread::current().name().map(str::to_string))
            .expect("run");
        assert_eq!(name.as_deref(), Some("host-ui"));
    }

    #[test]
    fn nested_call_runs_inline() {
        let (main, _join) = MainThread::spawn("test-main").expect("spawn");
        let inner = main.clone();
        let value = main
            .run_blocking(move || inner.run_blocking(|| 7).expect("inline"))
            .expect("run");
        assert_eq!(value, 7);
    }

    #[test]
    fn panicking_job_reports_no_reply_and_loop_survives() {
        let (main, _join) = MainThread::spawn("test-main").expect("spawn");
        let err = main.run_blocking::<_, ()>(|| panic!("boom")).unwrap_err();
        assert!(matches!(err, DispatchError::NoReply));
        assert_eq!(main.run_blocking(|| 1).expect("still alive"), 1);
    }

    #[test]
    fn host_driven_loop_runs_pending_jobs() {
        let (main, mut main_loop) = MainThread::new();
        let poster = thread::spawn(move || main.run_blocking(|| 5));
        // Pump until the posted job arrives.
        let mut ran = 0;
        while ran == 0 {
            ran = main_loop.run_until_idle();
            thread::yield_now();
        }
        assert_eq!(poster.join().expect("join").expect("run"), 5);
    }

    #[test]
    fn dropped_loop_means_main_thread_gone() {
        let (main, main_loop) = MainThread::new();
        drop(main_loop);
        assert!(matches!(main.run_blocking(|| ()), Err(DispatchError::MainThreadGone)));
    }
}
