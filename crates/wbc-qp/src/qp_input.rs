//! QP-ready rows and the conversions from motion commands into them.

use nalgebra::{DMatrix, DVector};
use wbc_core::ConstraintType;

use crate::command::{
    JointspaceAccelerationCommand, JointspaceVelocityCommand, MomentumRateCommand,
    PointAccelerationCommand, QpObjectiveCommand, SpatialAccelerationCommand,
    SpatialVelocityCommand,
};
use crate::model::MultibodyModel;

/// Which part of the decision vector `[q̈; ρ]` the columns of a [`QpInput`] span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QpInputDomain {
    /// Columns are the n generalized accelerations (or velocities for IK).
    #[default]
    Motion,
    /// Columns are the ρ coefficients.
    Rho,
    /// Columns span the full decision vector.
    MotionAndRho,
}

/// Rows `J x (op) b` with per-row weights.
#[derive(Debug, Clone, PartialEq)]
pub struct QpInput {
    pub jacobian: DMatrix<f64>,
    pub objective: DVector<f64>,
    pub weights: DVector<f64>,
    pub constraint: ConstraintType,
    pub domain: QpInputDomain,
}

impl QpInput {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            jacobian: DMatrix::zeros(rows, cols),
            objective: DVector::zeros(rows),
            weights: DVector::zeros(rows),
            constraint: ConstraintType::Objective,
            domain: QpInputDomain::Motion,
        }
    }

    /// Zero the input and give it the requested shape. Reallocates only when
    /// the shape changes.
    pub fn reshape(&mut self, rows: usize, cols: usize) {
        if self.jacobian.shape() == (rows, cols) {
            self.jacobian.fill(0.0);
            self.objective.fill(0.0);
            self.weights.fill(0.0);
        } else {
            self.jacobian = DMatrix::zeros(rows, cols);
            self.objective = DVector::zeros(rows);
            self.weights = DVector::zeros(rows);
        }
    }

    pub fn rows(&self) -> usize {
        self.jacobian.nrows()
    }

    pub fn set_uniform_weight(&mut self, weight: f64) {
        self.weights.fill(weight);
    }

    pub fn is_empty(&self) -> bool {
        self.jacobian.nrows() == 0
    }
}

/// Converts motion commands into [`QpInput`]s over the generalized accelerations.
#[derive(Debug, Clone)]
pub struct MotionQpInputCalculator {
    body_jacobian: DMatrix<f64>,
    point_jacobian: DMatrix<f64>,
    momentum_matrix: DMatrix<f64>,
}

fn selected_count(selection: &[bool]) -> usize {
    selection.iter().filter(|&&s| s).count()
}

impl MotionQpInputCalculator {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            body_jacobian: DMatrix::zeros(6, num_dofs),
            point_jacobian: DMatrix::zeros(3, num_dofs),
            momentum_matrix: DMatrix::zeros(6, num_dofs),
        }
    }

    /// `J q̈ = a_desired - J̇ q̇` on the selected axes. Returns false if no axis is selected.
    pub fn spatial_acceleration(
        &mut self,
        model: &impl MultibodyModel,
        command: &SpatialAccelerationCommand,
        out: &mut QpInput,
    ) -> bool {
        model.body_jacobian(command.body, &mut self.body_jacobian);
        let bias = model.body_convective_term(command.body);
        let target = command.desired - bias;
        Self::select_rows(
            &self.body_jacobian,
            &command.selection,
            |i| (target[i], command.weights[i]),
            out,
        );
        out.constraint = command.constraint;
        !out.is_empty()
    }

    /// `J_p q̈ = p̈_desired - J̇_p q̇` on the selected axes.
    pub fn point_acceleration(
        &mut self,
        model: &impl MultibodyModel,
        command: &PointAccelerationCommand,
        out: &mut QpInput,
    ) -> bool {
        model.point_jacobian(
            command.body,
            &command.point,
            &mut self.body_jacobian,
            &mut self.point_jacobian,
        );
        let target = command.desired - model.point_convective_term(command.body, &command.point);
        Self::select_rows(
            &self.point_jacobian,
            &command.selection,
            |i| (target[i], command.weights[i]),
            out,
        );
        out.constraint = command.constraint;
        !out.is_empty()
    }

    /// One unit row per joint entry.
    pub fn jointspace_acceleration(
        model: &impl MultibodyModel,
        command: &JointspaceAccelerationCommand,
        out: &mut QpInput,
    ) -> bool {
        out.reshape(command.entries.len(), model.num_dofs());
        for (row, entry) in command.entries.iter().enumerate() {
            out.jacobian[(row, model.joint_dof_index(entry.joint))] = 1.0;
            out.objective[row] = entry.value;
            out.weights[row] = entry.weight;
        }
        out.constraint = command.constraint;
        out.domain = QpInputDomain::Motion;
        !out.is_empty()
    }

    /// `A q̈ = ḣ_desired - Ȧ q̇` on the selected axes.
    pub fn momentum_rate(
        &mut self,
        model: &impl MultibodyModel,
        command: &MomentumRateCommand,
        out: &mut QpInput,
    ) -> bool {
        model.centroidal_momentum_matrix(&mut self.momentum_matrix);
        let target = command.desired - model.centroidal_convective_term();
        Self::select_rows(
            &self.momentum_matrix,
            &command.selection,
            |i| (target[i], command.weights[i]),
            out,
        );
        out.constraint = ConstraintType::Objective;
        !out.is_empty()
    }

    pub fn qp_objective(command: &QpObjectiveCommand, out: &mut QpInput) -> bool {
        out.reshape(command.jacobian.nrows(), command.jacobian.ncols());
        out.jacobian.copy_from(&command.jacobian);
        out.objective.copy_from(&command.objective);
        out.weights.copy_from(&command.weights);
        out.constraint = command.constraint;
        out.domain = QpInputDomain::Motion;
        !out.is_empty()
    }

    /// `J q̇ = v_desired` on the selected axes.
    pub fn spatial_velocity(
        &mut self,
        model: &impl MultibodyModel,
        command: &SpatialVelocityCommand,
        out: &mut QpInput,
    ) -> bool {
        model.body_jacobian(command.body, &mut self.body_jacobian);
        Self::select_rows(
            &self.body_jacobian,
            &command.selection,
            |i| (command.desired[i], command.weights[i]),
            out,
        );
        out.constraint = ConstraintType::Objective;
        !out.is_empty()
    }

    pub fn jointspace_velocity(
        model: &impl MultibodyModel,
        command: &JointspaceVelocityCommand,
        out: &mut QpInput,
    ) -> bool {
        out.reshape(command.entries.len(), model.num_dofs());
        for (row, entry) in command.entries.iter().enumerate() {
            out.jacobian[(row, model.joint_dof_index(entry.joint))] = 1.0;
            out.objective[row] = entry.value;
            out.weights[row] = entry.weight;
        }
        out.constraint = ConstraintType::Objective;
        out.domain = QpInputDomain::Motion;
        !out.is_empty()
    }

    fn select_rows(
        full: &DMatrix<f64>,
        selection: &[bool],
        target_and_weight: impl Fn(usize) -> (f64, f64),
        out: &mut QpInput,
    ) {
        out.reshape(selected_count(selection), full.ncols());
        out.domain = QpInputDomain::Motion;
        let mut row = 0;
        for (i, _) in selection.iter().enumerate().filter(|(_, s)| **s) {
            out.jacobian.row_mut(row).copy_from(&full.row(i));
            let (target, weight) = target_and_weight(i);
            out.objective[row] = target;
            out.weights[row] = weight;
            row += 1;
        }
    }
}
