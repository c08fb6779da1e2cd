// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A fixed-size pool of worker threads, running groups of tasks and parallel
//! for loops.

use super::range::{ChunkedPartition, TaskDescriptor};
use super::worker::{CpuPinningPolicy, TaskOutcome, WorkerThread};
use crate::macros::{log_debug, log_error, log_parallelism, log_warn};
use std::ops::Range;

/// Number of threads to spawn in a thread pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads. Zero is allowed, see
    /// [`EmptyPoolPolicy`].
    Count(usize),
}

impl ThreadCount {
    /// Resolves the number of threads to spawn.
    pub fn count(self) -> usize {
        match self {
            ThreadCount::AvailableParallelism => match std::thread::available_parallelism() {
                Ok(count) => count.get(),
                Err(_e) => {
                    log_warn!("Getting the available parallelism failed, using 1 thread: {_e}");
                    1
                }
            },
            ThreadCount::Count(count) => count,
        }
    }
}

impl From<usize> for ThreadCount {
    fn from(thread_count: usize) -> Self {
        ThreadCount::Count(thread_count)
    }
}

/// What to do with submitted work when a pool has no worker threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmptyPoolPolicy {
    /// Run the work synchronously on the calling thread.
    RunInline,
    /// Silently skip the work. Tasks and loop bodies are never invoked.
    Skip,
}

/// A builder for [`TaskPool`].
#[derive(Clone, Copy, Debug)]
pub struct TaskPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
    /// What to do with submitted work if the pool has no worker threads.
    pub empty_pool: EmptyPoolPolicy,
}

impl TaskPoolBuilder {
    /// Spawns a task pool.
    ///
    /// ```
    /// # use frameworkers::{CpuPinningPolicy, EmptyPoolPolicy, TaskPoolBuilder, ThreadCount};
    /// # use std::sync::atomic::{AtomicU64, Ordering};
    /// let mut task_pool = TaskPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     cpu_pinning: CpuPinningPolicy::No,
    ///     empty_pool: EmptyPoolPolicy::RunInline,
    /// }
    /// .build();
    ///
    /// let sum = AtomicU64::new(0);
    /// task_pool.parallel_for(1..11, |i| {
    ///     sum.fetch_add(i as u64, Ordering::Relaxed);
    /// });
    /// assert_eq!(sum.into_inner(), 5 * 11);
    /// ```
    pub fn build(&self) -> TaskPool {
        TaskPool::with_builder(self)
    }
}

/// A pool of worker threads, created once and reused to run batches of work.
///
/// Every dispatch method blocks until all the work it started has completed,
/// so tasks can borrow data from the caller's stack.
pub struct TaskPool {
    /// Worker threads, never resized until the pool is destroyed.
    workers: Vec<WorkerThread>,
    /// What to do with submitted work if there are no workers.
    empty_pool: EmptyPoolPolicy,
    /// Dispatch statistics, printed when the pool is dropped.
    #[cfg(feature = "log_parallelism")]
    stats: DispatchStatistics,
}

impl TaskPool {
    /// Spawns a pool with the given number of worker threads, without CPU
    /// pinning. A pool with zero threads runs all work on the calling thread.
    pub fn new(num_threads: usize) -> Self {
        TaskPoolBuilder {
            num_threads: ThreadCount::Count(num_threads),
            cpu_pinning: CpuPinningPolicy::No,
            empty_pool: EmptyPoolPolicy::RunInline,
        }
        .build()
    }

    fn with_builder(builder: &TaskPoolBuilder) -> Self {
        let num_threads = builder.num_threads.count();
        if num_threads == 0 {
            log_debug!(
                "[main thread] Creating a pool without worker threads ({:?})",
                builder.empty_pool
            );
        }
        let workers = (0..num_threads)
            .map(|id| WorkerThread::new(id, builder.cpu_pinning))
            .collect();
        log_debug!("[main thread] Spawned {num_threads} worker threads");

        Self {
            workers,
            empty_pool: builder.empty_pool,
            #[cfg(feature = "log_parallelism")]
            stats: DispatchStatistics::new(num_threads),
        }
    }

    /// Returns the number of worker threads in this pool.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Runs the given tasks on the worker threads and returns once they have
    /// all completed.
    ///
    /// Tasks are dispatched in waves of at most [`num_threads()`](Self::num_threads)
    /// tasks: task `i` runs on worker `i % num_threads`, and a wave is only
    /// started once all the tasks of the previous wave have completed. There is
    /// no ordering between the tasks of a single wave.
    ///
    /// ```
    /// # use frameworkers::TaskPool;
    /// # use std::sync::Mutex;
    /// let mut task_pool = TaskPool::new(2);
    /// let log = Mutex::new(Vec::new());
    /// let a = || log.lock().unwrap().push('A');
    /// let b = || log.lock().unwrap().push('B');
    /// let c = || log.lock().unwrap().push('C');
    /// task_pool.run_task_group(&[&a, &b, &c]);
    ///
    /// let log = log.into_inner().unwrap();
    /// assert_eq!(log.len(), 3);
    /// // C ran in a second wave.
    /// assert_eq!(log[2], 'C');
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if any task panicked. All the tasks of the wave are still waited
    /// for before panicking.
    pub fn run_task_group(&mut self, tasks: &[&(dyn Fn() + Sync)]) {
        if tasks.is_empty() {
            return;
        }

        let num_threads = self.workers.len();
        if num_threads == 0 {
            match self.empty_pool {
                EmptyPoolPolicy::RunInline => {
                    log_debug!(
                        "[main thread] No worker threads, running {} tasks inline",
                        tasks.len()
                    );
                    for task in tasks {
                        task();
                    }
                }
                EmptyPoolPolicy::Skip => {
                    log_debug!(
                        "[main thread] No worker threads, skipping {} tasks",
                        tasks.len()
                    );
                }
            }
            return;
        }

        for (_wave, wave) in tasks.chunks(num_threads).enumerate() {
            log_parallelism!(
                trace,
                "[main thread] Dispatching wave #{_wave} with {} tasks",
                wave.len()
            );
            let mut in_flight = InFlight::new(&self.workers);
            for &task in wave {
                in_flight.start(task);
            }
            in_flight.wait_all();

            #[cfg(feature = "log_parallelism")]
            self.stats.record_wave(wave.len());
        }
    }

    /// Runs the tasks of the given slots, up to the first empty slot, as with
    /// [`run_task_group()`](Self::run_task_group). Slots after the first empty
    /// one are ignored.
    ///
    /// ```
    /// # use frameworkers::TaskPool;
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// let mut task_pool = TaskPool::new(4);
    /// let counter = AtomicUsize::new(0);
    /// let increment = || {
    ///     counter.fetch_add(1, Ordering::Relaxed);
    /// };
    /// task_pool.run_task_slots(&[Some(&increment), Some(&increment), None, Some(&increment)]);
    /// assert_eq!(counter.into_inner(), 2);
    /// ```
    pub fn run_task_slots(&mut self, slots: &[Option<&(dyn Fn() + Sync)>]) {
        let tasks: Vec<&(dyn Fn() + Sync)> = slots.iter().map_while(|slot| *slot).collect();
        if tasks.len() < slots.len() {
            log_debug!(
                "[main thread] Running {} of {} task slots",
                tasks.len(),
                slots.len()
            );
        }
        self.run_task_group(&tasks);
    }

    /// Calls the given function on each index of the range, in parallel, and
    /// returns once every index has been processed exactly once.
    ///
    /// The range is split into at most [`num_threads()`](Self::num_threads)
    /// contiguous chunks of `ceil(len / num_chunks)` indices, each processed
    /// in increasing order by one worker thread. There is no ordering between
    /// indices of different chunks.
    ///
    /// ```
    /// # use frameworkers::TaskPool;
    /// # use std::sync::atomic::{AtomicU64, Ordering};
    /// let mut task_pool = TaskPool::new(4);
    /// let positions = (0..1000).map(AtomicU64::new).collect::<Vec<_>>();
    /// task_pool.parallel_for(0..positions.len(), |i| {
    ///     positions[i].fetch_add(1, Ordering::Relaxed);
    /// });
    /// assert!(positions
    ///     .iter()
    ///     .enumerate()
    ///     .all(|(i, x)| x.load(Ordering::Relaxed) == i as u64 + 1));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the range is backward (`range.start > range.end`), or if the
    /// function panicked on any index. All the chunks are still waited for
    /// before panicking.
    pub fn parallel_for(&mut self, range: Range<usize>, f: impl Fn(usize) + Sync) {
        assert!(
            range.start <= range.end,
            "cannot iterate over a backward range"
        );

        let num_threads = self.workers.len();
        if num_threads == 0 {
            match self.empty_pool {
                EmptyPoolPolicy::RunInline => {
                    log_debug!("[main thread] No worker threads, iterating {range:?} inline");
                    range.for_each(f);
                }
                EmptyPoolPolicy::Skip => {
                    log_debug!("[main thread] No worker threads, skipping {range:?}");
                }
            }
            return;
        }

        let partition = ChunkedPartition::new(range, num_threads);
        if partition.num_chunks() == 0 {
            return;
        }
        log_parallelism!(
            trace,
            "[main thread] Parallel for: {} chunks of {} items",
            partition.num_chunks(),
            partition.chunk_size()
        );

        // All the chunks are materialized before dispatching anything, and stay
        // untouched until every worker has been waited for.
        let descriptors = partition
            .chunks()
            .map(|chunk| TaskDescriptor::new(chunk, &f))
            .collect::<Vec<_>>();
        let drivers = descriptors
            .iter()
            .map(|descriptor| move || descriptor.run())
            .collect::<Vec<_>>();

        let mut in_flight = InFlight::new(&self.workers);
        for driver in &drivers {
            in_flight.start(driver);
        }
        in_flight.wait_all();

        #[cfg(feature = "log_parallelism")]
        self.stats.record_partition(partition.num_chunks());
    }

    /// Stops and joins all the worker threads. This is equivalent to dropping
    /// the pool.
    pub fn destroy(mut self) {
        self.join_workers();
    }

    fn join_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        log_debug!("[main thread] Notifying workers to finish...");
        for worker in &self.workers {
            worker.request_stop();
        }
        log_debug!("[main thread] Joining workers in the pool...");
        for worker in self.workers.drain(..) {
            worker.join_and_destroy();
        }
        log_debug!("[main thread] Joined workers.");
    }
}

impl Drop for TaskPool {
    /// Joins all the threads in the pool.
    fn drop(&mut self) {
        self.join_workers();

        #[cfg(feature = "log_parallelism")]
        self.stats.print();
    }
}

/// Tasks started on a prefix of the workers, that must all be waited for
/// before the tasks can be released.
///
/// The workers are waited for in [`wait_all()`](Self::wait_all), or upon
/// drop if a panic unwinds before that.
struct InFlight<'a> {
    workers: &'a [WorkerThread],
    /// Number of workers with a task in flight.
    started: usize,
}

impl<'a> InFlight<'a> {
    fn new(workers: &'a [WorkerThread]) -> Self {
        Self {
            workers,
            started: 0,
        }
    }

    /// Starts the given task on the next worker.
    fn start(&mut self, task: &'a (dyn Fn() + Sync + 'a)) {
        let worker = &self.workers[self.started];
        // SAFETY: The task outlives `self`, which waits for this worker to complete
        // the task either in `wait_all()` or in `drop()`. An `InFlight` is never
        // leaked, as it only lives on the stack of the dispatch functions.
        unsafe { worker.start_task(task) };
        self.started += 1;
    }

    /// Waits for all the started tasks, in order of the workers.
    ///
    /// # Panics
    ///
    /// Panics if any task panicked, after all of them have been waited for.
    fn wait_all(mut self) {
        let num_panicking_threads = self.workers[..self.started]
            .iter()
            .filter(|worker| worker.wait_for_outcome() == TaskOutcome::Panicked)
            .count();
        self.started = 0;
        if num_panicking_threads != 0 {
            log_error!("[main thread] {num_panicking_threads} worker thread(s) panicked!");
            panic!("{num_panicking_threads} worker thread(s) panicked!");
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        for worker in &self.workers[..self.started] {
            worker.wait_for_outcome();
        }
    }
}

/// Counters of dispatched work, for debugging purposes.
#[cfg(feature = "log_parallelism")]
struct DispatchStatistics {
    /// Number of tasks run by each worker.
    tasks_per_worker: Vec<u64>,
    /// Number of task group waves.
    waves: u64,
    /// Number of parallel for loops.
    partitions: u64,
}

#[cfg(feature = "log_parallelism")]
impl DispatchStatistics {
    fn new(num_threads: usize) -> Self {
        Self {
            tasks_per_worker: vec![0; num_threads],
            waves: 0,
            partitions: 0,
        }
    }

    fn record_wave(&mut self, num_tasks: usize) {
        self.waves += 1;
        for count in &mut self.tasks_per_worker[..num_tasks] {
            *count += 1;
        }
    }

    fn record_partition(&mut self, num_chunks: usize) {
        self.partitions += 1;
        for count in &mut self.tasks_per_worker[..num_chunks] {
            *count += 1;
        }
    }

    fn print(&self) {
        log_parallelism!(
            info,
            "[main thread] Dispatched {} task group waves and {} parallel for loops",
            self.waves,
            self.partitions
        );
        for (id, count) in self.tasks_per_worker.iter().enumerate() {
            log_parallelism!(info, "[main thread] Worker #{id} ran {count} tasks");
        }
    }
}
