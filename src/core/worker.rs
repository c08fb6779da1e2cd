// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A long-lived worker thread running one borrowed task at a time.

use super::util::{Status, TaskView};
use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_utils::CachePadded;
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), spawning a worker thread will panic.
    Always,
}

/// Status of a worker thread, as seen by both the owning thread and the worker
/// thread itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerStatus {
    /// The thread is being set up.
    Starting,
    /// No task was ever started.
    Idle,
    /// A task was handed over, but the worker hasn't picked it up yet.
    Dispatched,
    /// The worker is running the task.
    Running,
    /// The last task returned.
    Done,
    /// The last task panicked. The worker thread has exited.
    Panicked,
    /// The worker has been asked to exit.
    Finished,
}

impl WorkerStatus {
    /// Whether a new task can be started in this status.
    fn accepts_task(self) -> bool {
        matches!(self, WorkerStatus::Idle | WorkerStatus::Done)
    }

    /// Whether a task is in flight.
    fn is_busy(self) -> bool {
        matches!(self, WorkerStatus::Dispatched | WorkerStatus::Running)
    }
}

/// State shared between a [`WorkerThread`] handle and its OS thread.
struct WorkerState {
    status: WorkerStatus,
    /// Task lent by the owning thread, set while the status is
    /// [`Dispatched`](WorkerStatus::Dispatched) or
    /// [`Running`](WorkerStatus::Running).
    task: TaskView,
}

/// How the last task of a worker ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Panicked,
}

/// A worker thread that waits for tasks and runs them one at a time.
///
/// The thread is spawned upon creation and stays blocked until a task is
/// started with [`start_task()`](Self::start_task). The owning thread then
/// observes the task's completion with
/// [`wait_until_done()`](Self::wait_until_done).
///
/// ```
/// # use frameworkers::{CpuPinningPolicy, WorkerThread};
/// # use std::sync::atomic::{AtomicUsize, Ordering};
/// let worker = WorkerThread::new(0, CpuPinningPolicy::No);
///
/// let counter = AtomicUsize::new(0);
/// let task = || {
///     counter.fetch_add(1, Ordering::Relaxed);
/// };
/// // SAFETY: `task` outlives the call to `wait_until_done()`.
/// unsafe { worker.start_task(&task) };
/// worker.wait_until_done();
/// assert_eq!(counter.load(Ordering::Relaxed), 1);
///
/// worker.join_and_destroy();
/// ```
pub struct WorkerThread {
    /// Index of this worker, used for logging and CPU pinning.
    id: usize,
    /// State shared with the OS thread. Padded so that workers of the same
    /// pool don't contend on a cache line.
    state: Arc<CachePadded<Status<WorkerState>>>,
    /// Handle to the OS thread, until it's joined.
    handle: Option<JoinHandle<Result<(), String>>>,
}

impl WorkerThread {
    /// Spawns a new worker thread with the given index. The thread blocks
    /// until a task is started.
    pub fn new(id: usize, cpu_pinning: CpuPinningPolicy) -> Self {
        let state = Arc::new(CachePadded::new(Status::new(WorkerState {
            status: WorkerStatus::Starting,
            task: TaskView::empty(),
        })));

        let context = WorkerContext {
            id,
            state: state.clone(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("frameworkers-worker-{id}"))
            .spawn(move || -> Result<(), String> {
                let pinned = pin_current_thread(id, cpu_pinning);
                let ready = pinned.is_ok();
                context.state.update(|state| {
                    state.status = if ready {
                        WorkerStatus::Idle
                    } else {
                        WorkerStatus::Finished
                    }
                });
                pinned?;
                context.run();
                Ok(())
            })
            .unwrap_or_else(|e| panic!("Failed to spawn worker thread #{id}: {e}"));

        // Wait for the thread to be ready, so that CPU pinning failures are reported
        // on the calling thread.
        let status = state.wait_while(|state| state.status == WorkerStatus::Starting).status;
        if status == WorkerStatus::Finished {
            match handle.join() {
                Ok(Err(e)) => panic!("{e}"),
                _ => panic!("Worker thread #{id} exited during startup"),
            }
        }
        log_debug!("[main thread] Spawned worker #{id}");

        Self {
            id,
            state,
            handle: Some(handle),
        }
    }

    /// Returns the index of this worker.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Hands the given task over to this worker and returns immediately,
    /// without waiting for the task to start.
    ///
    /// # Panics
    ///
    /// Panics if the previous task hasn't completed yet, or if the worker is no
    /// longer able to run tasks because a previous task panicked.
    ///
    /// # Safety
    ///
    /// The task must stay alive until the matching call to
    /// [`wait_until_done()`](Self::wait_until_done) returns, or until this
    /// worker is destroyed, whichever comes first.
    pub unsafe fn start_task(&self, task: &(dyn Fn() + Sync + '_)) {
        // The status is checked and replaced under the same lock, so concurrent
        // callers can't both hand over a task.
        let accepted = self.state.update(|state| {
            if !state.status.accepts_task() {
                return Err(state.status);
            }
            // The task is cleared by the worker thread before it marks the task as
            // done, so the view never outlives the task.
            state.task.set(task);
            state.status = WorkerStatus::Dispatched;
            Ok(())
        });
        if let Err(status) = accepted {
            log_error!(
                "[main thread] Tried to start a task on worker #{} in status {status:?}",
                self.id
            );
            panic!(
                "worker thread #{} cannot start a task in status {status:?}",
                self.id
            );
        }
        log_debug!("[main thread] Started a task on worker #{}", self.id);
    }

    /// Blocks until the most recently started task has completed. Returns
    /// immediately if it already has.
    ///
    /// # Panics
    ///
    /// Panics if no task was started on this worker, or if the task panicked.
    pub fn wait_until_done(&self) {
        if self.wait_for_outcome() == TaskOutcome::Panicked {
            panic!("worker thread #{} panicked!", self.id);
        }
    }

    /// Blocks until the most recently started task has completed, and returns
    /// how it ended.
    pub(crate) fn wait_for_outcome(&self) -> TaskOutcome {
        let guard = self.state.wait_while(|state| state.status.is_busy());
        let status = guard.status;
        drop(guard);
        match status {
            WorkerStatus::Done => TaskOutcome::Completed,
            WorkerStatus::Panicked => TaskOutcome::Panicked,
            WorkerStatus::Starting | WorkerStatus::Idle | WorkerStatus::Finished => {
                panic!(
                    "no task was started on worker thread #{} (status {status:?})",
                    self.id
                )
            }
            WorkerStatus::Dispatched | WorkerStatus::Running => unreachable!(),
        }
    }

    /// Asks the worker thread to exit once its current task (if any) is done.
    /// This doesn't wait for the thread to exit.
    pub(crate) fn request_stop(&self) {
        drop(self.state.wait_while(|state| state.status.is_busy()));
        self.state
            .update(|state| state.status = WorkerStatus::Finished);
    }

    /// Stops the worker thread and waits for it to exit.
    pub fn join_and_destroy(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.request_stop();
            log_debug!("[main thread] Joining worker #{}...", self.id);
            let result = handle.join();
            match result {
                Ok(_) => log_debug!(
                    "[main thread] Worker #{} joined with result: {result:?}",
                    self.id
                ),
                Err(_) => log_error!(
                    "[main thread] Worker #{} joined with result: {result:?}",
                    self.id
                ),
            }
        }
    }
}

impl Drop for WorkerThread {
    /// Joins the worker thread, if it wasn't already.
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Pins the current thread to the CPU with the given index, according to the
/// policy. Fails only with [`CpuPinningPolicy::Always`].
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) -> Result<(), String> {
    let pin = || -> Result<(), nix::Error> {
        let mut cpu_set = CpuSet::new();
        cpu_set.set(id)?;
        sched_setaffinity(Pid::from_raw(0), &cpu_set)
    };
    match cpu_pinning {
        CpuPinningPolicy::No => (),
        CpuPinningPolicy::IfSupported => match pin() {
            Ok(()) => log_debug!("Pinned worker #{id} to CPU #{id}"),
            Err(_e) => log_warn!("Failed to set CPU affinity for worker #{id}: {_e}"),
        },
        CpuPinningPolicy::Always => match pin() {
            Ok(()) => log_debug!("Pinned worker #{id} to CPU #{id}"),
            Err(e) => {
                log_error!("Failed to set CPU affinity for worker #{id}: {e}");
                return Err(format!("Failed to set CPU affinity for worker #{id}: {e}"));
            }
        },
    }
    Ok(())
}

#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(_id: usize, cpu_pinning: CpuPinningPolicy) -> Result<(), String> {
    match cpu_pinning {
        CpuPinningPolicy::No => Ok(()),
        CpuPinningPolicy::IfSupported => {
            log_warn!("Pinning threads to CPUs is not implemented on this platform.");
            Ok(())
        }
        CpuPinningPolicy::Always => {
            Err("Pinning threads to CPUs is not implemented on this platform.".to_owned())
        }
    }
}

/// Context object owned by a worker thread.
struct WorkerContext {
    /// Index of this worker.
    id: usize,
    /// State shared with the owning thread.
    state: Arc<CachePadded<Status<WorkerState>>>,
}

impl WorkerContext {
    /// Main function run by the worker thread.
    fn run(&self) {
        loop {
            log_debug!("[worker #{}] Waiting for a task", self.id);
            let task = {
                // Start and stop share this wake-up channel, so the status decides which
                // one it was.
                let mut guard = self.state.wait_while(|state| {
                    !matches!(
                        state.status,
                        WorkerStatus::Dispatched | WorkerStatus::Finished
                    )
                });
                if guard.status == WorkerStatus::Finished {
                    log_debug!("[worker #{}] Received finish signal", self.id);
                    break;
                }
                guard.status = WorkerStatus::Running;
                // SAFETY: The owning thread keeps the task alive until it observes the
                // `Done` (or `Panicked`) status, which the `Notifier` only sets after
                // the task has returned and the view was cleared.
                unsafe { guard.task.get() }
            };

            let Some(task) = task else {
                log_error!("[worker #{}] Dispatched without a task", self.id);
                self.state.update(|state| state.status = WorkerStatus::Done);
                continue;
            };

            log_debug!("[worker #{}] Running task", self.id);
            // Whether the task returns or panics, the owning thread is notified when
            // the notifier is dropped.
            let notifier = Notifier {
                id: self.id,
                state: &self.state,
            };
            task();
            drop(notifier);
        }
    }
}

/// Object whose destructor notifies the owning thread that a task has
/// completed (or panicked).
struct Notifier<'a> {
    /// Index of this worker.
    id: usize,
    /// State shared with the owning thread.
    state: &'a Status<WorkerState>,
}

impl Drop for Notifier<'_> {
    fn drop(&mut self) {
        let panicking = std::thread::panicking();
        if panicking {
            log_error!(
                "[worker #{}] Detected panic in this thread, notifying the main thread",
                self.id
            );
        } else {
            log_debug!("[worker #{}] Task done, notifying the main thread", self.id);
        }
        self.state.update(|state| {
            state.task.clear();
            state.status = if panicking {
                WorkerStatus::Panicked
            } else {
                WorkerStatus::Done
            };
        });
    }
}
