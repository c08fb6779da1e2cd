// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A background thread running one long task, with pollable progress.

use crate::macros::{log_debug, log_error};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Coarse progress of a loading task, written by the loader thread and polled
/// by its owner.
///
/// Values are self-reported by the task and may be observed with some delay;
/// they are not a synchronization mechanism.
#[derive(Debug, Default)]
pub struct LoaderProgress {
    /// Percentage of the work done, in `0..=100`.
    percentage_done: AtomicU8,
    /// Step counter, whose meaning is up to the task and its owner.
    step: AtomicUsize,
}

impl LoaderProgress {
    /// Creates a progress at 0%, step 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last reported percentage, in `0..=100`.
    pub fn percentage_done(&self) -> u8 {
        self.percentage_done.load(Ordering::Relaxed)
    }

    /// Reports a percentage of work done. Values above 100 are clamped.
    pub fn set_percentage_done(&self, percentage: u8) {
        self.percentage_done
            .store(percentage.min(100), Ordering::Relaxed);
    }

    /// Returns the last reported step.
    pub fn step(&self) -> usize {
        self.step.load(Ordering::Relaxed)
    }

    /// Reports the current step.
    pub fn set_step(&self, step: usize) {
        self.step.store(step, Ordering::Relaxed);
    }

    /// Increments the step counter and returns the new step.
    pub fn advance_step(&self) -> usize {
        self.step.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn reset(&self) {
        self.percentage_done.store(0, Ordering::Relaxed);
        self.step.store(0, Ordering::Relaxed);
    }
}

type LoaderTask = Box<dyn FnOnce(&LoaderProgress) + Send + 'static>;

/// A thread that runs a single loading task in the background.
///
/// The usual lifecycle is [`set_task()`](Self::set_task), then
/// [`start()`](Self::start), then polling [`progress()`](Self::progress)
/// (e.g. to draw a loading screen), and finally [`wait()`](Self::wait).
///
/// ```
/// # use frameworkers::LoaderThread;
/// let mut loader = LoaderThread::new();
/// loader.set_task(|progress| {
///     progress.set_step(1);
///     progress.set_percentage_done(50);
///     progress.set_step(2);
///     progress.set_percentage_done(100);
/// });
/// loader.start();
/// while loader.is_running() {
///     let _percentage = loader.progress().percentage_done();
///     std::thread::yield_now();
/// }
/// loader.wait();
/// assert_eq!(loader.progress().percentage_done(), 100);
/// assert_eq!(loader.progress().step(), 2);
/// ```
pub struct LoaderThread {
    /// Progress shared with the loading task.
    progress: Arc<LoaderProgress>,
    /// Task to run, until the thread is started.
    task: Option<LoaderTask>,
    /// Handle to the thread, until it's joined.
    handle: Option<JoinHandle<()>>,
}

impl Default for LoaderThread {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderThread {
    /// Creates a loader without any task.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(LoaderProgress::new()),
            task: None,
            handle: None,
        }
    }

    /// Sets the task to run, without starting it. This resets the progress.
    ///
    /// # Panics
    ///
    /// Panics if a previous task is still running.
    pub fn set_task(&mut self, task: impl FnOnce(&LoaderProgress) + Send + 'static) {
        if self.is_running() {
            log_error!("[main thread] Tried to set a loading task while another one is running");
            panic!("cannot set a loading task while another one is running");
        }
        // A previous task may have finished without being waited for.
        self.wait();

        self.task = Some(Box::new(task));
        self.progress.reset();
    }

    /// Starts running the task in a new thread. This returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if no task was set since the last call to `start()`.
    pub fn start(&mut self) {
        let Some(task) = self.task.take() else {
            log_error!("[main thread] Tried to start a loader thread without a task");
            panic!("no loading task to start");
        };

        let progress = self.progress.clone();
        let handle = std::thread::Builder::new()
            .name("frameworkers-loader".to_owned())
            .spawn(move || {
                log_debug!("[loader thread] Running loading task");
                task(&progress);
                log_debug!(
                    "[loader thread] Loading task done at {}%, step {}",
                    progress.percentage_done(),
                    progress.step()
                );
            })
            .unwrap_or_else(|e| panic!("Failed to spawn loader thread: {e}"));
        self.handle = Some(handle);
        log_debug!("[main thread] Started loader thread");
    }

    /// Returns the progress reported by the task.
    pub fn progress(&self) -> &LoaderProgress {
        &self.progress
    }

    /// Whether the task was started and hasn't returned yet.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Blocks until the task has returned. This does nothing if no task was
    /// started.
    ///
    /// A panic in the task isn't propagated, it's only logged.
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            log_debug!("[main thread] Joining loader thread...");
            let result = handle.join();
            match result {
                Ok(_) => log_debug!("[main thread] Loader thread joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Loader thread joined with result: {result:?}"),
            }
        }
    }

    /// Releases the loader, waiting for its task to return if it was started.
    /// This is equivalent to dropping it.
    pub fn destroy(mut self) {
        self.wait();
    }
}

impl Drop for LoaderThread {
    /// Joins the loader thread, so that it's never detached.
    fn drop(&mut self) {
        self.wait();
    }
}
