// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn main() {
    divan::main();
}

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000];
const NUM_TASKS: &[usize] = &[2, 5, 10];

/// Number of items summed by each task of a task group.
const TASK_LEN: usize = 100_000;

/// Baseline benchmarks using serial loops (without any multi-threading
/// involved).
mod serial {
    use super::{LENGTHS, NUM_TASKS, TASK_LEN};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[divan::bench(args = LENGTHS)]
    fn add(bencher: Bencher, len: usize) {
        let left = (0..len as u64).collect::<Vec<u64>>();
        let right = (0..len as u64).collect::<Vec<u64>>();
        let output = (0..len).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();

        bencher
            .counter(BytesCount::of_many::<u64>(len * 2))
            .bench_local(|| {
                let (left, right) = (black_box(&left), black_box(&right));
                for i in 0..output.len() {
                    output[i].store(left[i] + right[i], Ordering::Relaxed);
                }
            })
    }

    #[divan::bench(args = NUM_TASKS)]
    fn task_group(bencher: Bencher, num_tasks: usize) {
        let input = (0..TASK_LEN as u64).collect::<Vec<u64>>();
        let sums = (0..num_tasks).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();

        bencher
            .counter(BytesCount::of_many::<u64>(TASK_LEN * num_tasks))
            .bench_local(|| {
                for sum in &sums {
                    sum.store(black_box(&input).iter().sum::<u64>(), Ordering::Relaxed);
                }
            })
    }
}

/// Benchmarks using Rayon.
mod rayon {
    use super::{LENGTHS, NUM_TASKS, NUM_THREADS, TASK_LEN};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn add_rayon<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let left = (0..len as u64).collect::<Vec<u64>>();
        let right = (0..len as u64).collect::<Vec<u64>>();
        let output = (0..len).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        // divan::Bencher isn't Send, so each iteration enters the Rayon pool
        // separately.
        bencher
            .counter(BytesCount::of_many::<u64>(len * 2))
            .bench_local(|| {
                let (left, right) = (black_box(&left), black_box(&right));
                thread_pool.install(|| {
                    output
                        .par_iter()
                        .enumerate()
                        .for_each(|(i, out)| out.store(left[i] + right[i], Ordering::Relaxed))
                })
            });
    }

    #[divan::bench(consts = NUM_THREADS, args = NUM_TASKS)]
    fn task_group_rayon<const NUM_THREADS: usize>(bencher: Bencher, num_tasks: usize) {
        let input = (0..TASK_LEN as u64).collect::<Vec<u64>>();
        let sums = (0..num_tasks).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        bencher
            .counter(BytesCount::of_many::<u64>(TASK_LEN * num_tasks))
            .bench_local(|| {
                thread_pool.scope(|scope| {
                    for sum in &sums {
                        let input = &input;
                        scope.spawn(move |_| {
                            sum.store(black_box(input).iter().sum::<u64>(), Ordering::Relaxed)
                        });
                    }
                })
            });
    }
}

/// Benchmarks using Frameworkers.
mod frameworkers {
    use super::{LENGTHS, NUM_TASKS, NUM_THREADS, TASK_LEN};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use frameworkers::{CpuPinningPolicy, EmptyPoolPolicy, TaskPool, TaskPoolBuilder, ThreadCount};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn build_pool(num_threads: usize, cpu_pinning: CpuPinningPolicy) -> TaskPool {
        TaskPoolBuilder {
            num_threads: ThreadCount::Count(num_threads),
            cpu_pinning,
            empty_pool: EmptyPoolPolicy::RunInline,
        }
        .build()
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn add_unpinned<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        add_impl::<NUM_THREADS>(bencher, len, CpuPinningPolicy::No)
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn add_pinned<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        add_impl::<NUM_THREADS>(bencher, len, CpuPinningPolicy::IfSupported)
    }

    fn add_impl<const NUM_THREADS: usize>(
        bencher: Bencher,
        len: usize,
        cpu_pinning: CpuPinningPolicy,
    ) {
        let left = (0..len as u64).collect::<Vec<u64>>();
        let right = (0..len as u64).collect::<Vec<u64>>();
        let output = (0..len).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();

        let mut task_pool = build_pool(NUM_THREADS, cpu_pinning);
        bencher
            .counter(BytesCount::of_many::<u64>(len * 2))
            .bench_local(|| {
                let (left, right) = (black_box(&left), black_box(&right));
                task_pool.parallel_for(0..output.len(), |i| {
                    output[i].store(left[i] + right[i], Ordering::Relaxed)
                })
            });
    }

    #[divan::bench(consts = NUM_THREADS, args = NUM_TASKS)]
    fn task_group<const NUM_THREADS: usize>(bencher: Bencher, num_tasks: usize) {
        let input = (0..TASK_LEN as u64).collect::<Vec<u64>>();
        let sums = (0..num_tasks).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        let closures = sums
            .iter()
            .map(|sum| {
                let input = &input;
                move || sum.store(black_box(input).iter().sum::<u64>(), Ordering::Relaxed)
            })
            .collect::<Vec<_>>();
        let tasks = closures
            .iter()
            .map(|task| task as &(dyn Fn() + Sync))
            .collect::<Vec<_>>();

        let mut task_pool = build_pool(NUM_THREADS, CpuPinningPolicy::IfSupported);
        bencher
            .counter(BytesCount::of_many::<u64>(TASK_LEN * num_tasks))
            .bench_local(|| task_pool.run_task_group(&tasks));
    }
}
