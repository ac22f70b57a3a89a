//! Accumulates the per-tick quadratic program over `z = [q̈; ρ]` and hands
//! it to a [`QpBackend`].
//!
//! All buffers are sized at construction. Row buffers for equalities and
//! inequalities grow geometrically when a tick needs more rows than any tick
//! before it and are reused afterwards.

use nalgebra::{DMatrix, DMatrixView, DVector, DVectorView};
use wbc_core::{CommandError, ConstraintType};

use crate::backend::{ActiveSet, QpBackend, QpOutcome, QpProblem, QpSettings};
use crate::kinematic_loop::{KinematicLoopFunction, LoopSubstitution};
use crate::qp_input::{QpInput, QpInputDomain};

const INITIAL_ROW_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// RowBuffer
// ---------------------------------------------------------------------------

/// Rows `A x (op) b` stacked into reusable storage.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    matrix: DMatrix<f64>,
    rhs: DVector<f64>,
    rows: usize,
}

impl RowBuffer {
    pub fn new(capacity: usize, cols: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(capacity, cols),
            rhs: DVector::zeros(capacity),
            rows: 0,
        }
    }

    pub fn clear(&mut self) {
        self.rows = 0;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Append `count` zeroed rows and return the index of the first one.
    pub fn push(&mut self, count: usize) -> usize {
        let start = self.rows;
        let needed = start + count;
        if needed > self.matrix.nrows() {
            let capacity = needed.max(2 * self.matrix.nrows()).max(INITIAL_ROW_CAPACITY);
            self.matrix.resize_vertically_mut(capacity, 0.0);
            self.rhs.resize_vertically_mut(capacity, 0.0);
        }
        self.matrix.rows_mut(start, count).fill(0.0);
        self.rhs.rows_mut(start, count).fill(0.0);
        self.rows = needed;
        start
    }

    pub fn matrix(&self) -> DMatrixView<'_, f64> {
        self.matrix.rows(0, self.rows)
    }

    pub fn rhs(&self) -> DVectorView<'_, f64> {
        self.rhs.rows(0, self.rows)
    }

    fn zero_column(&mut self, col: usize) {
        self.matrix.column_mut(col).rows_mut(0, self.rows).fill(0.0);
    }
}

// ---------------------------------------------------------------------------
// Reduced problem (kinematic loops)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ReducedProblem {
    hessian: DMatrix<f64>,
    gradient: DVector<f64>,
    equalities: RowBuffer,
    inequalities: RowBuffer,
    lower: DVector<f64>,
    upper: DVector<f64>,
    solution: DVector<f64>,
    /// `H T` scratch.
    ht: DMatrix<f64>,
    /// `f + H b` scratch.
    shifted_gradient: DVector<f64>,
}

impl ReducedProblem {
    fn new(full: usize, reduced: usize) -> Self {
        Self {
            hessian: DMatrix::zeros(reduced, reduced),
            gradient: DVector::zeros(reduced),
            equalities: RowBuffer::new(INITIAL_ROW_CAPACITY, reduced),
            inequalities: RowBuffer::new(INITIAL_ROW_CAPACITY, reduced),
            lower: DVector::zeros(reduced),
            upper: DVector::zeros(reduced),
            solution: DVector::zeros(reduced),
            ht: DMatrix::zeros(full, reduced),
            shifted_gradient: DVector::zeros(full),
        }
    }
}

// ---------------------------------------------------------------------------
// InverseDynamicsQpSolver
// ---------------------------------------------------------------------------

/// Cost `½ zᵀ H z + fᵀ z` with equality, inequality and bound constraints
/// over joint accelerations and rho.
#[derive(Debug)]
pub struct InverseDynamicsQpSolver {
    num_dofs: usize,
    num_rhos: usize,
    hessian: DMatrix<f64>,
    gradient: DVector<f64>,
    equalities: RowBuffer,
    inequalities: RowBuffer,
    lower: DVector<f64>,
    upper: DVector<f64>,

    /// Stacked Jacobian of every motion task and motion equality this tick.
    tasks: RowBuffer,
    nullspace: DMatrix<f64>,
    nullspace_valid: bool,

    active_dofs: Vec<bool>,
    previous_accelerations: DVector<f64>,
    solution: DVector<f64>,

    substitution: LoopSubstitution,
    reduced: ReducedProblem,

    active_set: ActiveSet,
    warm_start: ActiveSet,
    has_warm_start: bool,
}

impl InverseDynamicsQpSolver {
    /// `joint_offset` is the DoF index of the first one-DoF joint.
    pub fn new(num_dofs: usize, num_rhos: usize, joint_offset: usize) -> Self {
        let size = num_dofs + num_rhos;
        let num_joints = num_dofs - joint_offset;
        let mut solver = Self {
            num_dofs,
            num_rhos,
            hessian: DMatrix::zeros(size, size),
            gradient: DVector::zeros(size),
            equalities: RowBuffer::new(INITIAL_ROW_CAPACITY, size),
            inequalities: RowBuffer::new(INITIAL_ROW_CAPACITY, size),
            lower: DVector::zeros(size),
            upper: DVector::zeros(size),
            tasks: RowBuffer::new(INITIAL_ROW_CAPACITY, num_dofs),
            nullspace: DMatrix::identity(num_dofs, num_dofs),
            nullspace_valid: false,
            active_dofs: vec![true; num_dofs],
            previous_accelerations: DVector::zeros(num_dofs),
            solution: DVector::zeros(size),
            substitution: LoopSubstitution::new(size, joint_offset, num_joints),
            reduced: ReducedProblem::new(size, size),
            active_set: ActiveSet::default(),
            warm_start: ActiveSet::default(),
            has_warm_start: false,
        };
        solver.reset();
        solver
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_rhos(&self) -> usize {
        self.num_rhos
    }

    pub fn problem_size(&self) -> usize {
        self.num_dofs + self.num_rhos
    }

    pub fn register_loop(
        &mut self,
        function: Box<dyn KinematicLoopFunction>,
    ) -> Result<(), CommandError> {
        self.substitution.register(function)?;
        self.reduced = ReducedProblem::new(self.problem_size(), self.substitution.reduced_size());
        self.discard_warm_start();
        Ok(())
    }

    /// Drop every row and bound of the previous tick.
    pub fn reset(&mut self) {
        self.hessian.fill(0.0);
        self.gradient.fill(0.0);
        self.equalities.clear();
        self.inequalities.clear();
        self.lower.fill(f64::NEG_INFINITY);
        self.upper.fill(f64::INFINITY);
        self.tasks.clear();
        self.nullspace_valid = false;
        self.active_dofs.fill(true);
    }

    fn columns(&self, domain: QpInputDomain) -> (usize, usize) {
        match domain {
            QpInputDomain::Motion => (0, self.num_dofs),
            QpInputDomain::Rho => (self.num_dofs, self.num_rhos),
            QpInputDomain::MotionAndRho => (0, self.problem_size()),
        }
    }

    /// Add the rows of `input` as cost, equality or inequality.
    ///
    /// Objective rows add `JᵀWJ` to the Hessian and `-JᵀW b` to the gradient.
    /// Motion objectives and equalities also join the task Jacobian that
    /// defines the nullspace for privileged and projected objectives.
    pub fn add_input(&mut self, input: &QpInput) {
        self.add_rows(input, true);
    }

    /// Like [`Self::add_input`] but never joins the task Jacobian, for rows
    /// already projected into its nullspace.
    pub fn add_secondary_input(&mut self, input: &QpInput) {
        self.add_rows(input, false);
    }

    fn add_rows(&mut self, input: &QpInput, primary: bool) {
        if input.is_empty() {
            return;
        }
        let (offset, width) = self.columns(input.domain);
        debug_assert_eq!(input.jacobian.ncols(), width, "input width mismatch");
        let rows = input.rows();

        match input.constraint {
            ConstraintType::Objective => {
                for r in 0..rows {
                    let w = input.weights[r];
                    if w == 0.0 {
                        continue;
                    }
                    for a in 0..width {
                        let wja = w * input.jacobian[(r, a)];
                        if wja == 0.0 {
                            continue;
                        }
                        for b in 0..width {
                            self.hessian[(offset + a, offset + b)] += wja * input.jacobian[(r, b)];
                        }
                        self.gradient[offset + a] -= wja * input.objective[r];
                    }
                }
            }
            ConstraintType::Equality => {
                let start = self.equalities.push(rows);
                self.equalities
                    .matrix
                    .view_mut((start, offset), (rows, width))
                    .copy_from(&input.jacobian);
                self.equalities.rhs.rows_mut(start, rows).copy_from(&input.objective);
            }
            ConstraintType::GeqInequality | ConstraintType::LeqInequality => {
                let sign = if input.constraint == ConstraintType::LeqInequality {
                    1.0
                } else {
                    -1.0
                };
                let start = self.inequalities.push(rows);
                let mut block = self.inequalities.matrix.view_mut((start, offset), (rows, width));
                block.copy_from(&input.jacobian);
                block *= sign;
                let mut rhs = self.inequalities.rhs.rows_mut(start, rows);
                rhs.copy_from(&input.objective);
                rhs *= sign;
            }
        }

        let is_task = matches!(
            input.constraint,
            ConstraintType::Objective | ConstraintType::Equality
        );
        if primary && is_task && input.domain == QpInputDomain::Motion {
            let start = self.tasks.push(rows);
            self.tasks.matrix.rows_mut(start, rows).copy_from(&input.jacobian);
            self.nullspace_valid = false;
        }
    }

    /// `w ‖q̈‖²`.
    pub fn add_acceleration_regularization(&mut self, weight: f64) {
        for i in 0..self.num_dofs {
            self.hessian[(i, i)] += weight;
        }
    }

    /// `w / dt² ‖q̈ - q̈_prev‖²`.
    pub fn add_jerk_regularization(&mut self, weight: f64, dt: f64) {
        if weight == 0.0 {
            return;
        }
        let w = weight / (dt * dt);
        for i in 0..self.num_dofs {
            self.hessian[(i, i)] += w;
            self.gradient[i] -= w * self.previous_accelerations[i];
        }
    }

    /// `w ‖ρ‖²`.
    pub fn add_rho_regularization(&mut self, weight: f64) {
        for k in 0..self.num_rhos {
            let i = self.num_dofs + k;
            self.hessian[(i, i)] += weight;
        }
    }

    pub fn set_acceleration_bounds(&mut self, dof: usize, lower: f64, upper: f64) {
        self.lower[dof] = lower;
        self.upper[dof] = upper;
    }

    pub fn set_rho_bounds(&mut self, lower: &DVector<f64>, upper: &DVector<f64>) {
        self.lower.rows_mut(self.num_dofs, self.num_rhos).copy_from(lower);
        self.upper.rows_mut(self.num_dofs, self.num_rhos).copy_from(upper);
    }

    /// Hold a DoF at zero acceleration and remove it from every row.
    pub fn deactivate_dof(&mut self, dof: usize) {
        self.active_dofs[dof] = false;
    }

    pub fn is_dof_active(&self, dof: usize) -> bool {
        self.active_dofs[dof]
    }

    /// `N = I - J⁺J` over the task Jacobian accumulated so far, with `J⁺`
    /// computed by damped least squares.
    pub fn nullspace_projector(&mut self, damping: f64) -> &DMatrix<f64> {
        if !self.nullspace_valid {
            self.nullspace.fill_with_identity();
            if self.tasks.rows() > 0 {
                let j = self.tasks.matrix();
                let mut jjt = j * j.transpose();
                for i in 0..jjt.nrows() {
                    jjt[(i, i)] += damping * damping;
                }
                if let Some(chol) = jjt.cholesky() {
                    let x = chol.solve(&j.into_owned());
                    self.nullspace.gemm_tr(-1.0, &j, &x, 1.0);
                }
            }
            self.nullspace_valid = true;
        }
        &self.nullspace
    }

    /// Replace the motion Jacobian of `input` by `J N`.
    pub fn project_into_nullspace(&mut self, input: &mut QpInput, damping: f64) {
        if input.domain != QpInputDomain::Motion || input.is_empty() {
            return;
        }
        let projected = &input.jacobian * self.nullspace_projector(damping);
        input.jacobian.copy_from(&projected);
    }

    fn apply_dof_mask(&mut self) {
        for dof in 0..self.num_dofs {
            if self.active_dofs[dof] {
                continue;
            }
            self.hessian.row_mut(dof).fill(0.0);
            self.hessian.column_mut(dof).fill(0.0);
            self.hessian[(dof, dof)] = 1.0;
            self.gradient[dof] = 0.0;
            self.equalities.zero_column(dof);
            self.inequalities.zero_column(dof);
            self.lower[dof] = 0.0;
            self.upper[dof] = 0.0;
        }
    }

    pub fn discard_warm_start(&mut self) {
        self.has_warm_start = false;
        self.warm_start.clear();
    }

    /// Solve the accumulated problem. The solution is kept even when the
    /// backend did not converge.
    pub fn solve(
        &mut self,
        backend: &mut dyn QpBackend,
        settings: &QpSettings,
        use_warm_start: bool,
    ) -> QpOutcome {
        self.apply_dof_mask();
        let substituted = !self.substitution.is_empty();
        if substituted {
            self.reduce();
        }
        let hint = (use_warm_start && self.has_warm_start).then_some(&self.warm_start);

        let outcome = if !substituted {
            let problem = QpProblem {
                hessian: &self.hessian,
                gradient: &self.gradient,
                a_eq: self.equalities.matrix(),
                b_eq: self.equalities.rhs(),
                a_in: self.inequalities.matrix(),
                b_in: self.inequalities.rhs(),
                lower: &self.lower,
                upper: &self.upper,
            };
            backend.solve(&problem, settings, hint, &mut self.solution, &mut self.active_set)
        } else {
            let reduced = &mut self.reduced;
            let problem = QpProblem {
                hessian: &reduced.hessian,
                gradient: &reduced.gradient,
                a_eq: reduced.equalities.matrix(),
                b_eq: reduced.equalities.rhs(),
                a_in: reduced.inequalities.matrix(),
                b_in: reduced.inequalities.rhs(),
                lower: &reduced.lower,
                upper: &reduced.upper,
            };
            let outcome = backend.solve(
                &problem,
                settings,
                hint,
                &mut reduced.solution,
                &mut self.active_set,
            );
            self.substitution.expand(&self.reduced.solution, &mut self.solution);
            outcome
        };

        if self.solution.iter().any(|v| !v.is_finite()) {
            self.solution.fill(0.0);
        }
        self.previous_accelerations
            .copy_from(&self.solution.rows(0, self.num_dofs));
        std::mem::swap(&mut self.warm_start, &mut self.active_set);
        self.has_warm_start = true;
        outcome
    }

    /// Refresh the loop substitution for the current joint state.
    pub fn update_loops(&mut self, positions: &DVector<f64>, velocities: &DVector<f64>) {
        if !self.substitution.is_empty() {
            self.substitution.update(positions, velocities);
        }
    }

    /// Apply `z = T y + b` to cost, constraints and bounds.
    fn reduce(&mut self) {
        let size = self.num_dofs + self.num_rhos;
        let t = self.substitution.transform();
        let b = self.substitution.offset();
        let r = &mut self.reduced;

        r.ht.gemm(1.0, &self.hessian, t, 0.0);
        r.hessian.gemm_tr(1.0, t, &r.ht, 0.0);
        r.shifted_gradient.copy_from(&self.gradient);
        r.shifted_gradient.gemv(1.0, &self.hessian, b, 1.0);
        r.gradient.gemv_tr(1.0, t, &r.shifted_gradient, 0.0);

        r.equalities.clear();
        let rows = self.equalities.rows();
        if rows > 0 {
            let start = r.equalities.push(rows);
            let a = self.equalities.matrix();
            r.equalities.matrix.rows_mut(start, rows).gemm(1.0, &a, t, 0.0);
            let mut rhs = r.equalities.rhs.rows_mut(start, rows);
            rhs.copy_from(&self.equalities.rhs());
            rhs.gemv(-1.0, &a, b, 1.0);
        }

        r.inequalities.clear();
        let rows = self.inequalities.rows();
        if rows > 0 {
            let start = r.inequalities.push(rows);
            let a = self.inequalities.matrix();
            r.inequalities.matrix.rows_mut(start, rows).gemm(1.0, &a, t, 0.0);
            let mut rhs = r.inequalities.rhs.rows_mut(start, rows);
            rhs.copy_from(&self.inequalities.rhs());
            rhs.gemv(-1.0, &a, b, 1.0);
        }

        let mut column = 0;
        for var in 0..size {
            if self.substitution.dependent_variables().any(|d| d == var) {
                // Bounds on dependent variables become rows over y.
                for (sign, bound) in [(1.0, self.upper[var]), (-1.0, self.lower[var])] {
                    if bound.is_finite() {
                        let row = r.inequalities.push(1);
                        let mut target = r.inequalities.matrix.row_mut(row);
                        target.copy_from(&t.row(var));
                        target *= sign;
                        r.inequalities.rhs[row] = sign * (bound - b[var]);
                    }
                }
            } else {
                r.lower[column] = self.lower[var];
                r.upper[column] = self.upper[var];
                column += 1;
            }
        }
    }

    pub fn solution(&self) -> &DVector<f64> {
        &self.solution
    }

    pub fn joint_accelerations(&self) -> DVectorView<'_, f64> {
        self.solution.rows(0, self.num_dofs)
    }

    pub fn rhos(&self) -> DVectorView<'_, f64> {
        self.solution.rows(self.num_dofs, self.num_rhos)
    }

    pub fn hessian(&self) -> &DMatrix<f64> {
        &self.hessian
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    pub fn equalities(&self) -> &RowBuffer {
        &self.equalities
    }

    pub fn inequalities(&self) -> &RowBuffer {
        &self.inequalities
    }

    pub fn lower_bounds(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper_bounds(&self) -> &DVector<f64> {
        &self.upper
    }

    /// Forget the previous solution used by jerk regularization.
    pub fn clear_history(&mut self) {
        self.previous_accelerations.fill(0.0);
        self.discard_warm_start();
    }
}
