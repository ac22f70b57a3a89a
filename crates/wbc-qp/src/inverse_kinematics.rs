//! Inverse-kinematics strategy: a QP over generalized velocities.
//!
//! Shares the row assembly and solver of the dynamics strategy with the
//! decision vector reinterpreted as `q̇` and no contact coefficients.

use std::time::Instant;

use nalgebra::{DVector, Isometry3, Translation3, UnitQuaternion, Vector3, Vector6};
use tracing::warn;
use wbc_core::{
    ConstraintType, ControllerConfig, JointDesiredData, LowLevelJointControlMode, LowLevelOutput,
    OptimizationSettings, RootJointDesiredConfiguration,
};

use crate::backend::{QpBackend, QpSettings};
use crate::bounds::nominal_velocity_bounds;
use crate::command::InverseKinematicsCommand;
use crate::model::MultibodyModel;
use crate::optimization::QpDiagnostics;
use crate::privileged::PrivilegedConfigurationHandler;
use crate::qp_input::{MotionQpInputCalculator, QpInput, QpInputDomain};
use crate::qp_solver::InverseDynamicsQpSolver;

#[derive(Debug, Clone, PartialEq)]
pub struct InverseKinematicsSolution {
    /// One per DoF, base first.
    pub joint_velocities: DVector<f64>,
    pub diagnostics: QpDiagnostics,
}

/// Builds and solves the velocity QP, then integrates it into desired
/// positions.
#[derive(Debug)]
pub struct InverseKinematicsOptimization {
    control_dt: f64,
    settings: OptimizationSettings,
    base_dofs: usize,
    qp: InverseDynamicsQpSolver,
    motion: MotionQpInputCalculator,
    input: QpInput,
    privileged: PrivilegedConfigurationHandler,
    solution: InverseKinematicsSolution,
    non_convergence_count: u64,
}

impl InverseKinematicsOptimization {
    pub fn new(model: &impl MultibodyModel, config: &ControllerConfig) -> Self {
        let n = model.num_dofs();
        Self {
            control_dt: config.control_dt,
            settings: config.optimization.clone(),
            base_dofs: model.base_dofs(),
            qp: InverseDynamicsQpSolver::new(n, 0, model.base_dofs()),
            motion: MotionQpInputCalculator::new(n),
            input: QpInput::new(0, n),
            privileged: PrivilegedConfigurationHandler::new(
                model.num_joints(),
                config.privileged.clone(),
            ),
            solution: InverseKinematicsSolution {
                joint_velocities: DVector::zeros(n),
                diagnostics: QpDiagnostics::default(),
            },
            non_convergence_count: 0,
        }
    }

    pub fn solution(&self) -> &InverseKinematicsSolution {
        &self.solution
    }

    pub fn clear_history(&mut self) {
        self.qp.clear_history();
    }

    pub fn compute(
        &mut self,
        model: &impl MultibodyModel,
        commands: &[InverseKinematicsCommand],
        backend: &mut dyn QpBackend,
    ) -> &InverseKinematicsSolution {
        self.qp.reset();
        self.privileged.reset();
        // Damps the velocity solution the way acceleration regularization
        // damps the dynamics one.
        self.qp
            .add_acceleration_regularization(self.settings.joint_acceleration_weight);

        for command in commands {
            let added = match command {
                InverseKinematicsCommand::SpatialVelocity(c) => {
                    self.motion.spatial_velocity(model, c, &mut self.input)
                }
                InverseKinematicsCommand::JointspaceVelocity(c) => {
                    MotionQpInputCalculator::jointspace_velocity(model, c, &mut self.input)
                }
                InverseKinematicsCommand::PrivilegedConfiguration(c) => {
                    self.privileged.submit_configuration(c);
                    false
                }
            };
            if added {
                self.qp.add_input(&self.input);
            }
        }
        self.add_privileged_objective(model);
        self.add_velocity_bounds(model);
        self.solve(backend);
        &self.solution
    }

    /// Rows `S N q̇ = q̇_priv` for every joint.
    fn add_privileged_objective(&mut self, model: &impl MultibodyModel) {
        if !self.privileged.is_enabled() {
            return;
        }
        self.privileged.compute_velocities(model);
        let num_joints = model.num_joints();
        let nullspace = self.qp.nullspace_projector(self.settings.nullspace_damping);
        self.input.reshape(num_joints, model.num_dofs());
        self.input.domain = QpInputDomain::Motion;
        self.input.constraint = ConstraintType::Objective;
        for j in 0..num_joints {
            self.input
                .jacobian
                .row_mut(j)
                .copy_from(&nullspace.row(self.base_dofs + j));
        }
        self.input.objective.copy_from(self.privileged.velocities());
        self.input.weights.copy_from(self.privileged.weights());
        self.qp.add_secondary_input(&self.input);
    }

    fn add_velocity_bounds(&mut self, model: &impl MultibodyModel) {
        let q = model.joint_positions();
        for (j, info) in model.joints().iter().enumerate() {
            let (lower, upper) = nominal_velocity_bounds(info, q[j], self.control_dt);
            self.qp.set_acceleration_bounds(self.base_dofs + j, lower, upper);
        }
    }

    fn solve(&mut self, backend: &mut dyn QpBackend) {
        let settings = QpSettings {
            max_iterations: self.settings.max_iterations,
            tolerance: self.settings.tolerance,
        };
        let start = Instant::now();
        let outcome = self.qp.solve(backend, &settings, self.settings.warm_start);
        let solve_time_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);

        if !outcome.converged {
            self.non_convergence_count += 1;
            if self.non_convergence_count == 1 {
                warn!(
                    iterations = outcome.iterations,
                    "IK QP did not converge, continuing with best-effort solution"
                );
            }
        }
        self.solution
            .joint_velocities
            .copy_from(&self.qp.joint_accelerations());
        self.solution.diagnostics = QpDiagnostics {
            converged: outcome.converged,
            iterations: outcome.iterations,
            non_convergence_count: self.non_convergence_count,
            warm_start_reset: false,
            solve_time_us,
            equilibrium_error: 0.0,
        };
    }

    /// Position-controlled joints at `q + q̇ dt`, and the root pose advanced
    /// by the solved base twist.
    pub fn write_output(
        &self,
        model: &impl MultibodyModel,
        output: &mut LowLevelOutput,
        root: &mut RootJointDesiredConfiguration,
    ) {
        let dt = self.control_dt;
        let qd = &self.solution.joint_velocities;
        let q = model.joint_positions();
        for (j, data) in output.joints_mut().iter_mut().enumerate() {
            let velocity = qd[self.base_dofs + j];
            *data = JointDesiredData {
                torque: 0.0,
                position: Some(q[j] + velocity * dt),
                velocity: Some(velocity),
                acceleration: None,
                mode: LowLevelJointControlMode::Position,
            };
        }

        *root = RootJointDesiredConfiguration::default();
        if self.base_dofs > 0 {
            let twist = Vector6::from_iterator(qd.rows(0, 6).iter().copied());
            let angular = Vector3::new(twist[0], twist[1], twist[2]);
            let linear = Vector3::new(twist[3], twist[4], twist[5]);
            let pose = model.root_pose();
            root.pose = Isometry3::from_parts(
                Translation3::from(pose.translation.vector + linear * dt),
                UnitQuaternion::from_scaled_axis(angular * dt) * pose.rotation,
            );
            root.velocity = twist;
            root.acceleration = (twist - model.root_twist()) / dt;
        }
    }
}
