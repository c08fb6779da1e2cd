// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: worker threads, task pool, loader thread and synchronization
//! primitives.

mod loader;
mod range;
mod task_pool;
mod util;
mod worker;

pub use loader::{LoaderProgress, LoaderThread};
pub use task_pool::{EmptyPoolPolicy, TaskPool, TaskPoolBuilder, ThreadCount};
pub use worker::{CpuPinningPolicy, WorkerThread};
