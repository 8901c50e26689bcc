//! Optional metrics emitted through the `metrics` facade.
//!
//! Without the `metrics` feature every recorder here compiles to nothing.

#[cfg(feature = "metrics")]
mod enabled {
    pub(crate) fn process_dispatched() {
        ::metrics::counter!("pipewright_processes_dispatched_total").increment(1);
    }

    pub(crate) fn process_failed() {
        ::metrics::counter!("pipewright_process_failures_total").increment(1);
    }

    pub(crate) fn worker_retired() {
        ::metrics::counter!("pipewright_workers_retired_total").increment(1);
    }

    pub(crate) fn workers(count: usize) {
        ::metrics::gauge!("pipewright_workers").set(count as f64);
    }

    pub(crate) fn executions_in_flight(count: usize) {
        ::metrics::gauge!("pipewright_executions_in_flight").set(count as f64);
    }
}

#[cfg(not(feature = "metrics"))]
mod enabled {
    pub(crate) fn process_dispatched() {}

    pub(crate) fn process_failed() {}

    pub(crate) fn worker_retired() {}

    pub(crate) fn workers(_count: usize) {}

    pub(crate) fn executions_in_flight(_count: usize) {}
}

pub(crate) use enabled::*;
