//! Mock QP backends for exercising the orchestrator's failure and
//! warm-start paths.

use nalgebra::DVector;
use wbc_qp::backend::{ActiveSet, ClarabelBackend, QpBackend, QpOutcome, QpProblem, QpSettings};

// ---------------------------------------------------------------------------
// NonConvergingBackend
// ---------------------------------------------------------------------------

/// Solves with Clarabel but always reports non-convergence, so the
/// best-effort path runs with a usable solution.
#[derive(Debug, Default)]
pub struct NonConvergingBackend {
    inner: ClarabelBackend,
    pub calls: usize,
}

impl NonConvergingBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QpBackend for NonConvergingBackend {
    fn solve(
        &mut self,
        problem: &QpProblem<'_>,
        settings: &QpSettings,
        warm_start: Option<&ActiveSet>,
        solution: &mut DVector<f64>,
        active_set: &mut ActiveSet,
    ) -> QpOutcome {
        self.calls += 1;
        let outcome = self
            .inner
            .solve(problem, settings, warm_start, solution, active_set);
        QpOutcome {
            converged: false,
            iterations: settings.max_iterations,
            ..outcome
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingBackend
// ---------------------------------------------------------------------------

/// Shape and warm-start hint of one solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRecord {
    pub num_variables: usize,
    pub num_equalities: usize,
    pub num_inequalities: usize,
    pub warm_start_offered: bool,
}

/// Delegates to Clarabel and records every call.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    inner: ClarabelBackend,
    pub records: Vec<SolveRecord>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&SolveRecord> {
        self.records.last()
    }
}

impl QpBackend for RecordingBackend {
    fn solve(
        &mut self,
        problem: &QpProblem<'_>,
        settings: &QpSettings,
        warm_start: Option<&ActiveSet>,
        solution: &mut DVector<f64>,
        active_set: &mut ActiveSet,
    ) -> QpOutcome {
        self.records.push(SolveRecord {
            num_variables: problem.num_variables(),
            num_equalities: problem.a_eq.nrows(),
            num_inequalities: problem.a_in.nrows(),
            warm_start_offered: warm_start.is_some(),
        });
        self.inner
            .solve(problem, settings, warm_start, solution, active_set)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
