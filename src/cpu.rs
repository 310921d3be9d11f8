//! Core identity. Each OS thread stands in for one execution context;
//! binding gives it a core id so per-core structures know which core is
//! running. A thread's binding never changes out from under a call, the
//! same stability an interrupts-off window gives a hart's cpuid read.
//! Threads that never bind run as core 0.

use crate::param::NCPU;
use std::cell::Cell;

thread_local! {
    static CORE: Cell<usize> = const { Cell::new(0) };
}

/// Bind the calling thread to `core`. Rebinding is allowed; tests bind
/// worker threads before exercising per-core state.
pub fn bind(core: usize) {
    if core >= NCPU {
        panic!("cpu: bad core id");
    }
    CORE.with(|c| c.set(core));
}

/// The calling thread's core id.
pub fn id() -> usize {
    CORE.with(|c| c.get())
}
