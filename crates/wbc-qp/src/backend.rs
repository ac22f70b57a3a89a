//! Seam between the orchestrator and the numerical QP primitive.
//!
//! The primitive solves
//!
//! ```text
//! minimize    ½ xᵀ H x + fᵀ x
//! subject to  A_eq x  = b_eq
//!             A_in x <= b_in
//!             lower <= x <= upper
//! ```
//!
//! and never fails: setup errors and iteration exhaustion are reported as
//! `converged = false` together with whatever iterate the solver reached.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector, DVectorView, DMatrixView};
use tracing::warn;

/// Entries below this magnitude are dropped when building sparse matrices.
const SPARSITY_THRESHOLD: f64 = 1e-15;

/// Slack below which an inequality is considered active.
const ACTIVE_SLACK: f64 = 1e-6;

/// Borrowed problem data. Inequalities read `A_in x <= b_in`.
#[derive(Debug, Clone, Copy)]
pub struct QpProblem<'a> {
    pub hessian: &'a DMatrix<f64>,
    pub gradient: &'a DVector<f64>,
    pub a_eq: DMatrixView<'a, f64>,
    pub b_eq: DVectorView<'a, f64>,
    pub a_in: DMatrixView<'a, f64>,
    pub b_in: DVectorView<'a, f64>,
    pub lower: &'a DVector<f64>,
    pub upper: &'a DVector<f64>,
}

impl QpProblem<'_> {
    pub fn num_variables(&self) -> usize {
        self.gradient.len()
    }

    fn has_finite_bounds(&self) -> bool {
        self.lower.iter().any(|v| v.is_finite()) || self.upper.iter().any(|v| v.is_finite())
    }

    /// Only a cost, no constraint of any kind.
    pub fn is_unconstrained(&self) -> bool {
        self.a_eq.nrows() == 0 && self.a_in.nrows() == 0 && !self.has_finite_bounds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QpSettings {
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl Default for QpSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

/// Active inequality rows of a previous solve, used as a warm-start hint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSet {
    /// Indices into the inequality rows of the problem (`A_in`).
    pub inequalities: Vec<usize>,
    /// Variables sitting on one of their bounds.
    pub bounds: Vec<usize>,
}

impl ActiveSet {
    pub fn clear(&mut self) {
        self.inequalities.clear();
        self.bounds.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inequalities.is_empty() && self.bounds.is_empty()
    }
}

/// Result flags of one solve. The solution itself is written in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QpOutcome {
    pub converged: bool,
    pub iterations: u32,
    /// Whether the backend actually used the warm-start hint.
    pub warm_started: bool,
}

/// A numerical QP primitive.
pub trait QpBackend {
    /// Solve `problem`, writing the (possibly best-effort) solution into
    /// `solution` and the active constraints into `active_set`.
    fn solve(
        &mut self,
        problem: &QpProblem<'_>,
        settings: &QpSettings,
        warm_start: Option<&ActiveSet>,
        solution: &mut DVector<f64>,
        active_set: &mut ActiveSet,
    ) -> QpOutcome;
}

// ---------------------------------------------------------------------------
// ClarabelBackend
// ---------------------------------------------------------------------------

/// Interior-point backend built on Clarabel.
///
/// Interior-point methods have no active-set basis to reuse, so the
/// warm-start hint is accepted and ignored (`warm_started` is always false).
/// Problems without constraints skip the solver and use a Cholesky solve.
#[derive(Debug, Clone, Default)]
pub struct ClarabelBackend {
    stacked: DMatrix<f64>,
    rhs: Vec<f64>,
    /// For each nonnegative-cone row, what it came from.
    inequality_origin: Vec<RowOrigin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOrigin {
    Inequality(usize),
    Bound(usize),
}

impl ClarabelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn solve_unconstrained(problem: &QpProblem<'_>, solution: &mut DVector<f64>) -> bool {
        match problem.hessian.clone().cholesky() {
            Some(chol) => {
                solution.copy_from(&chol.solve(&(-problem.gradient)));
                true
            }
            None => {
                solution.fill(0.0);
                false
            }
        }
    }

    /// Stack equality rows, fixed variables, inequality rows and finite bounds
    /// into one `A x + s = b` system. Returns `(n_eq, n_ineq)`.
    fn stack_constraints(&mut self, problem: &QpProblem<'_>) -> (usize, usize) {
        let n = problem.num_variables();
        let fixed = |i: usize| problem.lower[i] == problem.upper[i];

        let eq_rows = (0..problem.a_eq.nrows())
            .filter(|&r| !is_trivial_equality(&problem.a_eq, r, problem.b_eq[r]))
            .count();
        let fixed_rows = (0..n).filter(|&i| fixed(i)).count();
        let in_rows = (0..problem.a_in.nrows())
            .filter(|&r| !is_zero_row(&problem.a_in, r))
            .count();
        let bound_rows = (0..n)
            .filter(|&i| !fixed(i))
            .map(|i| {
                usize::from(problem.upper[i].is_finite()) + usize::from(problem.lower[i].is_finite())
            })
            .sum::<usize>();

        let total = eq_rows + fixed_rows + in_rows + bound_rows;
        if self.stacked.shape() == (total, n) {
            self.stacked.fill(0.0);
        } else {
            self.stacked = DMatrix::zeros(total, n);
        }
        self.rhs.clear();
        self.inequality_origin.clear();

        let mut row = 0;
        for r in 0..problem.a_eq.nrows() {
            if is_trivial_equality(&problem.a_eq, r, problem.b_eq[r]) {
                continue;
            }
            self.stacked.row_mut(row).copy_from(&problem.a_eq.row(r));
            self.rhs.push(problem.b_eq[r]);
            row += 1;
        }
        for i in (0..n).filter(|&i| fixed(i)) {
            self.stacked[(row, i)] = 1.0;
            self.rhs.push(problem.upper[i]);
            row += 1;
        }
        let n_eq = row;

        for r in 0..problem.a_in.nrows() {
            if is_zero_row(&problem.a_in, r) {
                if problem.b_in[r] < -SPARSITY_THRESHOLD {
                    warn!(
                        row = r,
                        rhs = problem.b_in[r],
                        "Dropping unsatisfiable all-zero inequality row"
                    );
                }
                continue;
            }
            self.stacked.row_mut(row).copy_from(&problem.a_in.row(r));
            self.rhs.push(problem.b_in[r]);
            self.inequality_origin.push(RowOrigin::Inequality(r));
            row += 1;
        }
        for i in (0..n).filter(|&i| !fixed(i)) {
            if problem.upper[i].is_finite() {
                self.stacked[(row, i)] = 1.0;
                self.rhs.push(problem.upper[i]);
                self.inequality_origin.push(RowOrigin::Bound(i));
                row += 1;
            }
            if problem.lower[i].is_finite() {
                self.stacked[(row, i)] = -1.0;
                self.rhs.push(-problem.lower[i]);
                self.inequality_origin.push(RowOrigin::Bound(i));
                row += 1;
            }
        }
        (n_eq, row - n_eq)
    }
}

fn is_zero_row(a: &DMatrixView<'_, f64>, row: usize) -> bool {
    a.row(row).iter().all(|v| v.abs() <= SPARSITY_THRESHOLD)
}

/// `0 = rhs` with `rhs` at zero. A zero row with a nonzero rhs is kept so
/// the solver reports the infeasibility.
fn is_trivial_equality(a: &DMatrixView<'_, f64>, row: usize, rhs: f64) -> bool {
    rhs.abs() <= SPARSITY_THRESHOLD && is_zero_row(a, row)
}

impl QpBackend for ClarabelBackend {
    fn solve(
        &mut self,
        problem: &QpProblem<'_>,
        settings: &QpSettings,
        _warm_start: Option<&ActiveSet>,
        solution: &mut DVector<f64>,
        active_set: &mut ActiveSet,
    ) -> QpOutcome {
        active_set.clear();
        if problem.is_unconstrained() {
            let converged = Self::solve_unconstrained(problem, solution);
            return QpOutcome {
                converged,
                iterations: 1,
                warm_started: false,
            };
        }

        let (n_eq, n_ineq) = self.stack_constraints(problem);
        let p_csc = to_csc(problem.hessian, true);
        let a_csc = to_csc(&self.stacked, false);

        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if n_eq > 0 {
            cones.push(ZeroConeT(n_eq));
        }
        if n_ineq > 0 {
            cones.push(NonnegativeConeT(n_ineq));
        }

        let Ok(solver_settings) = DefaultSettingsBuilder::default()
            .max_iter(settings.max_iterations)
            .verbose(false)
            .tol_gap_abs(settings.tolerance)
            .tol_gap_rel(settings.tolerance)
            .tol_feas(settings.tolerance)
            .build()
        else {
            solution.fill(0.0);
            return QpOutcome::default();
        };

        let q: Vec<f64> = problem.gradient.iter().copied().collect();
        let Ok(mut solver) =
            DefaultSolver::new(&p_csc, &q, &a_csc, &self.rhs, &cones, solver_settings)
        else {
            solution.fill(0.0);
            return QpOutcome::default();
        };
        solver.solve();
        let sol = &solver.solution;

        let converged = matches!(sol.status, SolverStatus::Solved | SolverStatus::AlmostSolved);
        if sol.x.len() == solution.len() && sol.x.iter().all(|v| v.is_finite()) {
            solution.copy_from_slice(&sol.x);
        } else {
            solution.fill(0.0);
        }

        for (k, origin) in self.inequality_origin.iter().enumerate() {
            if sol.s.get(n_eq + k).is_some_and(|s| s.abs() < ACTIVE_SLACK) {
                match *origin {
                    RowOrigin::Inequality(r) => active_set.inequalities.push(r),
                    RowOrigin::Bound(i) => active_set.bounds.push(i),
                }
            }
        }

        QpOutcome {
            converged,
            iterations: sol.iterations,
            warm_started: false,
        }
    }
}

/// Compressed-column copy of `m`, skipping near-zero entries. With
/// `upper_only` the strict lower triangle is skipped too, which is how
/// Clarabel reads the symmetric cost matrix.
fn to_csc(m: &DMatrix<f64>, upper_only: bool) -> CscMatrix<f64> {
    let mut colptr = Vec::with_capacity(m.ncols() + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for (j, column) in m.column_iter().enumerate() {
        let rows = if upper_only { j + 1 } else { m.nrows() };
        for (i, &v) in column.iter().enumerate().take(rows) {
            if v.abs() > SPARSITY_THRESHOLD {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(rowval.len());
    }
    CscMatrix::new(m.nrows(), m.ncols(), colptr, rowval, nzval)
}
