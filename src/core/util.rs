// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::ptr::NonNull;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
///
/// All changes go through [`update()`](Self::update), which modifies the state
/// under the lock before notifying, and all waits go through
/// [`wait_while()`](Self::wait_while), which checks the state under the lock
/// before blocking. A notification can therefore never be missed.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Locks the status without notifying anyone.
    ///
    /// The protected state is a plain value that is never left half-updated,
    /// so a poisoned lock is recovered rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies the given function to the status and notifies all waiting
    /// threads.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        let result = f(&mut guard);
        self.condvar.notify_all();
        result
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status. Modifications made through the guard don't notify other
    /// threads.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.lock(), predicate)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A lifetime-erased `&'a (dyn Fn() + Sync + 'a)`, used to lend a borrowed
/// task to a worker thread that outlives the borrow.
pub struct TaskView {
    ptr: Option<NonNull<dyn Fn() + Sync + 'static>>,
}

impl TaskView {
    /// Creates a new empty view.
    pub fn empty() -> Self {
        Self { ptr: None }
    }

    /// Points this view to the given task. Subsequent calls to
    /// [`get()`](Self::get) must ensure that the obtained reference doesn't
    /// outlive the task that was set here.
    pub fn set(&mut self, task: &(dyn Fn() + Sync + '_)) {
        // SAFETY: This only erases the lifetime of the reference, both types have
        // the same layout. The erased reference is only dereferenced in `get()`,
        // whose caller guarantees that the task is still alive.
        let task: &'static (dyn Fn() + Sync + 'static) = unsafe { std::mem::transmute(task) };
        self.ptr = Some(NonNull::from(task));
    }

    /// Clears the view. Subsequent calls to [`get()`](Self::get) will obtain
    /// [`None`].
    pub fn clear(&mut self) {
        self.ptr = None;
    }

    /// Returns the task that was previously set with [`set()`](Self::set), or
    /// [`None`] if no task was set or if it was cleared since.
    ///
    /// # Safety
    ///
    /// The underlying task must be alive during the whole output lifetime.
    pub unsafe fn get<'a>(&self) -> Option<&'a (dyn Fn() + Sync + 'a)> {
        self.ptr.map(|ptr| {
            // SAFETY:
            // - This pointer was derived from a valid reference in `set()`.
            // - The task outlives the output lifetime, as ensured by the caller.
            // - Only shared references to the task ever exist.
            unsafe { &*ptr.as_ptr() }
        })
    }
}

/// SAFETY:
///
/// A [`TaskView`] acts as a `&(dyn Fn() + Sync)`, which is [`Send`] because the
/// task is [`Sync`].
unsafe impl Send for TaskView {}
/// SAFETY:
///
/// A [`TaskView`] acts as a `&(dyn Fn() + Sync)`, which is [`Sync`] because the
/// task is [`Sync`].
unsafe impl Sync for TaskView {}
