// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to simulate the frame loop of a game engine.

use clap::builder::TypedValueParser;
use clap::{Parser, ValueEnum};
use frameworkers::{
    CpuPinningPolicy, EmptyPoolPolicy, LoaderProgress, LoaderThread, TaskPool, TaskPoolBuilder,
    ThreadCount,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut task_pool = TaskPoolBuilder {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        cpu_pinning: match cli.cpu_pinning {
            CpuPinningCli::No => CpuPinningPolicy::No,
            CpuPinningCli::IfSupported => CpuPinningPolicy::IfSupported,
            CpuPinningCli::Always => CpuPinningPolicy::Always,
        },
        empty_pool: match cli.empty_pool {
            EmptyPoolCli::RunInline => EmptyPoolPolicy::RunInline,
            EmptyPoolCli::Skip => EmptyPoolPolicy::Skip,
        },
    }
    .build();
    println!("running with {} worker thread(s)", task_pool.num_threads());

    let world = World::new(cli.num_entities);

    match cli.scenario {
        Scenario::Frames => {
            let start = Instant::now();
            for _ in 0..cli.num_frames {
                world.run_frame(&mut task_pool);
            }
            println!(
                "simulated {} frames in {:?}, checksum = {}",
                cli.num_frames,
                start.elapsed(),
                world.checksum()
            );
        }
        Scenario::Loading => {
            let mut loader = LoaderThread::new();
            let num_steps = cli.loading_steps;
            loader.set_task(move |progress: &LoaderProgress| load_area(progress, num_steps));
            loader.start();

            let mut frames = 0;
            let mut last_step = 0;
            while loader.is_running() {
                world.run_frame(&mut task_pool);
                frames += 1;

                let step = loader.progress().step();
                if step != last_step {
                    println!(
                        "loading: step {step}/{num_steps}, {}% done",
                        loader.progress().percentage_done()
                    );
                    last_step = step;
                }
            }
            loader.wait();
            println!(
                "loading done at {}% after {frames} frames, checksum = {}",
                loader.progress().percentage_done(),
                world.checksum()
            );
            loader.destroy();
        }
    }

    task_pool.destroy();
}

/// Simulated area loading, reporting one step per chunk of work.
fn load_area(progress: &LoaderProgress, num_steps: usize) {
    let mut checksum = 0u64;
    for step in 1..=num_steps {
        for i in 0..1_000_000u64 {
            checksum = checksum.wrapping_add(black_box(i * step as u64));
        }
        std::thread::sleep(Duration::from_millis(10));
        progress.set_step(step);
        progress.set_percentage_done((step * 100 / num_steps) as u8);
    }
    black_box(checksum);
}

/// Set of entities updated every frame.
struct World {
    positions: Vec<AtomicU64>,
    speeds: Vec<u64>,
    physics: AtomicU64,
    particles: AtomicU64,
    audio: AtomicU64,
}

impl World {
    /// Creates entities with random speeds. The speeds are fixed by a
    /// constant seed for reproducibility.
    fn new(num_entities: usize) -> Self {
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        Self {
            positions: (0..num_entities).map(|_| AtomicU64::new(0)).collect(),
            speeds: (0..num_entities).map(|_| rng.random_range(0..16)).collect(),
            physics: AtomicU64::new(0),
            particles: AtomicU64::new(0),
            audio: AtomicU64::new(0),
        }
    }

    fn run_frame(&self, task_pool: &mut TaskPool) {
        task_pool.parallel_for(0..self.positions.len(), |i| {
            self.positions[i].fetch_add(self.speeds[i], Ordering::Relaxed);
        });

        let physics = || {
            self.physics.fetch_add(1, Ordering::Relaxed);
        };
        let particles = || {
            self.particles.fetch_add(2, Ordering::Relaxed);
        };
        let audio = || {
            self.audio.fetch_add(3, Ordering::Relaxed);
        };
        task_pool.run_task_group(&[&physics, &particles, &audio]);
    }

    fn checksum(&self) -> u64 {
        self.positions
            .iter()
            .map(|x| x.load(Ordering::Relaxed))
            .fold(0u64, u64::wrapping_add)
            .wrapping_add(self.physics.load(Ordering::Relaxed))
            .wrapping_add(self.particles.load(Ordering::Relaxed))
            .wrapping_add(self.audio.load(Ordering::Relaxed))
    }
}

/// CLI tool to simulate the frame loop of a game engine.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<usize>,

    /// Whether to pin worker threads to CPUs.
    #[arg(long, value_enum, default_value_t = CpuPinningCli::IfSupported)]
    cpu_pinning: CpuPinningCli,

    /// What to do with the work when there are zero worker threads.
    #[arg(long, value_enum, default_value_t = EmptyPoolCli::RunInline)]
    empty_pool: EmptyPoolCli,

    /// Scenario to run.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Number of entities updated every frame.
    #[arg(long, default_value_t = 100_000)]
    num_entities: usize,

    /// Number of frames to simulate. Used only for the frames scenario.
    #[arg(long, default_value_t = 1000)]
    num_frames: usize,

    /// Number of steps of the loading task. Used only for the loading
    /// scenario.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..).map(usize::from))]
    loading_steps: usize,
}

/// Whether to pin worker threads to CPUs.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CpuPinningCli {
    /// Don't pin worker threads.
    No,
    /// Pin worker threads if the platform supports it.
    IfSupported,
    /// Pin worker threads, and fail if that's not possible.
    Always,
}

/// What to do with the work when there are zero worker threads.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum EmptyPoolCli {
    /// Run the work on the main thread.
    RunInline,
    /// Skip the work.
    Skip,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum Scenario {
    /// Simulate a fixed number of frames.
    Frames,
    /// Simulate frames while an area loads in the background.
    Loading,
}
