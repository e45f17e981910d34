//! Parallel execution of partition units.

use std::collections::BTreeMap;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::error::{RemapError, Result};
use crate::remap::{RemapUnit, TwoPhaseRemapper, UnitOutcome};

/// Runs units on a bounded pool of worker threads.
///
/// Units are executed in no particular order. Every unit writes a disjoint
/// output region, so no coordination between workers is needed.
pub struct ParallelDispatcher {
    pool: ThreadPool,
    workers: usize,
}

impl std::fmt::Debug for ParallelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelDispatcher")
            .field("workers", &self.workers)
            .finish()
    }
}

impl ParallelDispatcher {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("remap-worker-{i}"))
            .build()
            .map_err(|e| RemapError::ThreadPool(e.to_string()))?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute all units and collect their outcomes.
    pub fn run(&self, units: Vec<RemapUnit>, remapper: &TwoPhaseRemapper) -> DispatchReport {
        self.run_for(std::iter::empty::<String>(), units, remapper)
    }

    /// Like [`run`](Self::run), but every name in `variables` appears in the
    /// report even if it produced no units.
    pub fn run_for<I, S>(
        &self,
        variables: I,
        units: Vec<RemapUnit>,
        remapper: &TwoPhaseRemapper,
    ) -> DispatchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        info!(units = units.len(), workers = self.workers, "Dispatching remap units");
        let outcomes: Vec<UnitOutcome> = self
            .pool
            .install(|| units.par_iter().map(|unit| remapper.execute(unit)).collect());

        let mut report = DispatchReport::default();
        for name in variables {
            report.variables.entry(name.into()).or_default();
        }
        for outcome in outcomes {
            report.record(outcome);
        }
        report.log_summary();
        report
    }
}

/// Per-variable count of finished and failed units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableSummary {
    pub done: usize,
    pub failed: usize,
}

impl VariableSummary {
    pub fn total(&self) -> usize {
        self.done + self.failed
    }
}

/// Aggregate result of a dispatch run.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    outcomes: Vec<UnitOutcome>,
    variables: BTreeMap<String, VariableSummary>,
}

impl DispatchReport {
    fn record(&mut self, outcome: UnitOutcome) {
        let summary = self
            .variables
            .entry(outcome.output_name().to_string())
            .or_default();
        if outcome.is_done() {
            summary.done += 1;
        } else {
            summary.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// All unit outcomes, in the order the units were submitted.
    pub fn outcomes(&self) -> &[UnitOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.is_done())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(UnitOutcome::is_done)
    }

    pub fn total_units(&self) -> usize {
        self.outcomes.len()
    }

    pub fn variables(&self) -> &BTreeMap<String, VariableSummary> {
        &self.variables
    }

    pub fn summary(&self, variable: &str) -> Option<VariableSummary> {
        self.variables.get(variable).copied()
    }

    fn log_summary(&self) {
        for (name, summary) in &self.variables {
            if summary.failed == 0 {
                info!(variable = %name, units = summary.done, "Variable complete");
            } else {
                warn!(
                    variable = %name,
                    done = summary.done,
                    failed = summary.failed,
                    "Variable incomplete"
                );
            }
        }
    }
}
