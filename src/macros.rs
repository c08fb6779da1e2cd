// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Internal logging macros. Events are forwarded to the [`log`] facade when
//! the `log` feature is enabled, and compiled out otherwise.
//!
//! Dispatch-level details (partitions, waves, per-worker statistics) are only
//! emitted with the `log_parallelism` feature, as they are produced on every
//! call of the hot path.

#[cfg(feature = "log")]
macro_rules! log_event {
    ( $level:ident, $($args:tt)* ) => {
        log::$level!( $($args)* )
    };
}

// Formatting is type-checked but never evaluated, so that variables only used
// in log messages don't trigger unused warnings.
#[cfg(not(feature = "log"))]
macro_rules! log_event {
    ( $level:ident, $($args:tt)* ) => {
        if false {
            let _ = ::std::format!( $($args)* );
        }
    };
}

macro_rules! log_debug {
    ( $($args:tt)* ) => {
        $crate::macros::log_event!(debug, $($args)*)
    };
}

macro_rules! log_warn {
    ( $($args:tt)* ) => {
        $crate::macros::log_event!(warn, $($args)*)
    };
}

macro_rules! log_error {
    ( $($args:tt)* ) => {
        $crate::macros::log_event!(error, $($args)*)
    };
}

#[cfg(feature = "log_parallelism")]
macro_rules! log_parallelism {
    ( $level:ident, $($args:tt)* ) => {
        log::$level!( $($args)* )
    };
}

#[cfg(not(feature = "log_parallelism"))]
macro_rules! log_parallelism {
    ( $level:ident, $($args:tt)* ) => {
        if false {
            let _ = ::std::format!( $($args)* );
        }
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_event;
pub(crate) use log_parallelism;
pub(crate) use log_warn;
