//! Inverse-dynamics QP assembly and solve, one tick at a time.
//!
//! Decision vector `z = [q̈; ρ]`. Every tick starts from a clean problem:
//! contact state, custom bounds, setting overrides, deferred objectives and
//! external wrenches only live for the tick they were submitted in. The
//! previous rho, the previous joint accelerations and the solver's warm start
//! are the only things carried over.

use std::time::Instant;

use nalgebra::{DMatrix, DVector, Vector3, Vector6};
use tracing::{debug, warn};
use wbc_core::{CommandError, ConstraintType, ControllerConfig, OptimizationSettings, Wrench};

use crate::backend::{QpBackend, QpSettings};
use crate::bounds::{JointBounds, nominal_acceleration_bounds, nominal_torque_bounds};
use crate::command::{InverseDynamicsCommand, OptimizationSettingsCommand};
use crate::contact::{ContactWrenchCalculator, ContactablePlaneBody};
use crate::external_wrench::{ExternalWrenchHandler, gravity_wrench};
use crate::kinematic_loop::KinematicLoopFunction;
use crate::model::{BodyId, MultibodyModel};
use crate::privileged::PrivilegedConfigurationHandler;
use crate::qp_input::{MotionQpInputCalculator, QpInput, QpInputDomain};
use crate::qp_solver::InverseDynamicsQpSolver;

// ---------------------------------------------------------------------------
// Solution and diagnostics
// ---------------------------------------------------------------------------

/// Per-tick solver health, returned next to the solution.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QpDiagnostics {
    pub converged: bool,
    pub iterations: u32,
    /// Ticks that did not converge since construction.
    pub non_convergence_count: u64,
    /// The warm start was discarded because the contact set changed.
    pub warm_start_reset: bool,
    pub solve_time_us: u64,
    /// `‖A q̈ + Ȧ q̇ - (Q ρ + W_ext + W_g)‖`, zero for a floating base in
    /// perfect balance and always zero for a fixed base.
    pub equilibrium_error: f64,
}

/// What the orchestrator solved for this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseDynamicsSolution {
    /// One per DoF, base first.
    pub joint_accelerations: DVector<f64>,
    pub rhos: DVector<f64>,
    /// Solved contact wrench of every contactable body, at the body origin.
    pub contact_wrenches: Vec<(BodyId, Wrench)>,
    /// Compensated external wrenches, at the body origin.
    pub external_wrenches: Vec<(BodyId, Wrench)>,
    pub centers_of_pressure: Vec<Option<Vector3<f64>>>,
    /// `A q̈ + Ȧ q̇`.
    pub achieved_momentum_rate: Vector6<f64>,
    pub diagnostics: QpDiagnostics,
}

impl InverseDynamicsSolution {
    fn new(num_dofs: usize, num_rhos: usize, bodies: &[ContactablePlaneBody]) -> Self {
        Self {
            joint_accelerations: DVector::zeros(num_dofs),
            rhos: DVector::zeros(num_rhos),
            contact_wrenches: bodies.iter().map(|b| (b.body, Wrench::zero())).collect(),
            external_wrenches: Vec::new(),
            centers_of_pressure: vec![None; bodies.len()],
            achieved_momentum_rate: Vector6::zeros(),
            diagnostics: QpDiagnostics::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// InverseDynamicsOptimization
// ---------------------------------------------------------------------------

/// Builds and solves the inverse-dynamics QP.
#[derive(Debug)]
pub struct InverseDynamicsOptimization {
    control_dt: f64,
    configured: OptimizationSettings,
    /// `configured` plus this tick's overrides.
    settings: OptimizationSettings,
    num_dofs: usize,
    base_dofs: usize,

    qp: InverseDynamicsQpSolver,
    contacts: ContactWrenchCalculator,
    motion: MotionQpInputCalculator,
    input: QpInput,
    privileged: PrivilegedConfigurationHandler,
    external: ExternalWrenchHandler,

    acceleration_bounds: JointBounds,
    torque_bounds: JointBounds,
    inactive_joints: Vec<bool>,
    /// Indices of this tick's nullspace-projected objectives.
    deferred: Vec<usize>,
    torque_limited: Vec<usize>,

    mass_matrix: DMatrix<f64>,
    bias: DVector<f64>,
    momentum_matrix: DMatrix<f64>,
    momentum_convective: Vector6<f64>,
    equilibrium_rhs: Vector6<f64>,

    solution: InverseDynamicsSolution,
    non_convergence_count: u64,
}

impl InverseDynamicsOptimization {
    pub fn new(
        model: &impl MultibodyModel,
        contactable_bodies: Vec<ContactablePlaneBody>,
        config: &ControllerConfig,
    ) -> Self {
        let n = model.num_dofs();
        let num_joints = model.num_joints();
        let settings = config.optimization.clone();
        let contacts =
            ContactWrenchCalculator::new(contactable_bodies, settings.basis_vectors_per_point, n);
        let num_rhos = contacts.num_rhos();
        let solution = InverseDynamicsSolution::new(n, num_rhos, contacts.bodies());
        Self {
            control_dt: config.control_dt,
            configured: settings.clone(),
            settings,
            num_dofs: n,
            base_dofs: model.base_dofs(),
            qp: InverseDynamicsQpSolver::new(n, num_rhos, model.base_dofs()),
            contacts,
            motion: MotionQpInputCalculator::new(n),
            input: QpInput::new(0, n),
            privileged: PrivilegedConfigurationHandler::new(num_joints, config.privileged.clone()),
            external: ExternalWrenchHandler::new(n),
            acceleration_bounds: JointBounds::new(num_joints),
            torque_bounds: JointBounds::new(num_joints),
            inactive_joints: vec![false; num_joints],
            deferred: Vec::new(),
            torque_limited: Vec::with_capacity(num_joints),
            mass_matrix: DMatrix::zeros(n, n),
            bias: DVector::zeros(n),
            momentum_matrix: DMatrix::zeros(6, n),
            momentum_convective: Vector6::zeros(),
            equilibrium_rhs: Vector6::zeros(),
            solution,
            non_convergence_count: 0,
        }
    }

    /// Register a closed kinematic loop for the lifetime of the controller.
    pub fn register_loop(
        &mut self,
        function: Box<dyn KinematicLoopFunction>,
    ) -> Result<(), CommandError> {
        self.qp.register_loop(function)
    }

    /// Checks that need the contact layout on top of each command's own
    /// validation.
    pub fn check_commands(&self, commands: &[InverseDynamicsCommand]) -> Result<(), CommandError> {
        for command in commands {
            let body = match command {
                InverseDynamicsCommand::PlaneContactState(c) => {
                    let index = self
                        .contacts
                        .contactable_index(c.body)
                        .ok_or(CommandError::UnknownContactableBody(c.body.0))?;
                    let expected = self.contacts.bodies()[index].points.len();
                    if c.points.len() != expected {
                        return Err(CommandError::DimensionMismatch {
                            what: "contact points",
                            expected,
                            got: c.points.len(),
                        });
                    }
                    continue;
                }
                InverseDynamicsCommand::CenterOfPressure(c) => c.body,
                InverseDynamicsCommand::ContactWrench(c) => c.body,
                _ => continue,
            };
            if self.contacts.contactable_index(body).is_none() {
                return Err(CommandError::UnknownContactableBody(body.0));
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> &OptimizationSettings {
        &self.settings
    }

    pub fn contacts(&self) -> &ContactWrenchCalculator {
        &self.contacts
    }

    pub fn solution(&self) -> &InverseDynamicsSolution {
        &self.solution
    }

    pub fn non_convergence_count(&self) -> u64 {
        self.non_convergence_count
    }

    /// Forget rho, acceleration and warm-start history, e.g. after the
    /// controller ran another strategy.
    pub fn clear_history(&mut self) {
        self.contacts.clear_history();
        self.qp.clear_history();
    }

    /// Assemble and solve this tick's problem.
    pub fn compute(
        &mut self,
        model: &impl MultibodyModel,
        commands: &[InverseDynamicsCommand],
        backend: &mut dyn QpBackend,
    ) -> &InverseDynamicsSolution {
        self.reset();
        self.collect_tick_state(model, commands);

        self.contacts.compute(model, self.settings.rho_min);
        self.add_contact_regularization();
        self.apply_dof_activation();
        self.qp
            .set_rho_bounds(self.contacts.rho_min(), self.contacts.rho_max());

        self.update_dynamics(model);
        if model.has_floating_base() {
            self.add_equilibrium_constraint();
        }
        self.qp
            .add_acceleration_regularization(self.settings.joint_acceleration_weight);
        self.qp
            .add_jerk_regularization(self.settings.joint_jerk_weight, self.control_dt);
        self.qp.add_rho_regularization(self.settings.rho_weight);

        self.add_motion_commands(model, commands);
        self.add_nullspace_objectives(commands);
        self.add_privileged_objective(model);
        self.add_acceleration_bounds(model);
        self.add_torque_bounds(model);
        self.add_torque_regularization(model);

        self.qp
            .update_loops(model.joint_positions(), model.joint_velocities());
        self.solve(backend);
        self.extract(model);
        &self.solution
    }

    // ---- tick phases ----

    fn reset(&mut self) {
        self.settings.clone_from(&self.configured);
        self.qp.reset();
        self.contacts.reset();
        self.privileged.reset();
        self.external.reset();
        self.acceleration_bounds.clear_custom();
        self.torque_bounds.clear_custom();
        self.inactive_joints.fill(false);
        self.deferred.clear();
    }

    /// Everything that has to be known before any row is built.
    fn collect_tick_state(
        &mut self,
        model: &impl MultibodyModel,
        commands: &[InverseDynamicsCommand],
    ) {
        for command in commands {
            match command {
                InverseDynamicsCommand::OptimizationSettings(c) => self.apply_settings(c),
                InverseDynamicsCommand::PlaneContactState(c) => {
                    if let Err(error) = self.contacts.submit_plane_contact_state(c) {
                        warn!(%error, "Contact state ignored");
                    }
                }
                InverseDynamicsCommand::ExternalWrench(c) => self.external.submit(model, c),
                InverseDynamicsCommand::PrivilegedConfiguration(c) => {
                    self.privileged.submit_configuration(c);
                }
                InverseDynamicsCommand::PrivilegedAcceleration(c) => {
                    self.privileged.submit_acceleration(c);
                }
                _ => {}
            }
        }
    }

    fn apply_settings(&mut self, command: &OptimizationSettingsCommand) {
        let s = &mut self.settings;
        let overrides = [
            (&mut s.rho_min, command.rho_min),
            (&mut s.max_joint_acceleration, command.joint_acceleration_max),
            (&mut s.max_joint_torque, command.joint_torque_max),
            (&mut s.rho_weight, command.rho_weight),
            (&mut s.rho_rate_weight, command.rho_rate_weight),
            (&mut s.cop_weight, command.cop_weight),
            (&mut s.cop_rate_weight, command.cop_rate_weight),
            (&mut s.joint_acceleration_weight, command.acceleration_weight),
            (&mut s.joint_jerk_weight, command.jerk_weight),
            (&mut s.joint_torque_weight, command.torque_weight),
        ];
        for (field, value) in overrides {
            if let Some(v) = value {
                *field = v;
            }
        }
        for &j in &command.joints_to_deactivate {
            self.inactive_joints[j] = true;
        }
        for &j in &command.joints_to_activate {
            self.inactive_joints[j] = false;
        }
    }

    fn add_contact_regularization(&mut self) {
        let cop_weight = self.settings.cop_weight;
        let cop_rate_weight = self.settings.cop_rate_weight;
        for index in 0..self.contacts.bodies().len() {
            if cop_weight > 0.0
                && self
                    .contacts
                    .cop_regularization(index, cop_weight, &mut self.input)
            {
                self.qp.add_input(&self.input);
            }
            if cop_rate_weight > 0.0
                && self
                    .contacts
                    .cop_rate_regularization(index, cop_rate_weight, &mut self.input)
            {
                self.qp.add_input(&self.input);
            }
        }
        let rho_rate_weight = self.settings.rho_rate_weight;
        if rho_rate_weight > 0.0
            && self
                .contacts
                .rho_rate_regularization(rho_rate_weight, &mut self.input)
        {
            self.qp.add_input(&self.input);
        }
    }

    fn apply_dof_activation(&mut self) {
        for (j, inactive) in self.inactive_joints.iter().enumerate() {
            if *inactive {
                self.qp.deactivate_dof(self.base_dofs + j);
            }
        }
    }

    fn update_dynamics(&mut self, model: &impl MultibodyModel) {
        model.mass_matrix(&mut self.mass_matrix);
        model.bias_forces(&mut self.bias);
        model.centroidal_momentum_matrix(&mut self.momentum_matrix);
        self.momentum_convective = model.centroidal_convective_term();
        self.equilibrium_rhs = self.external.total_about_com().to_vector() + gravity_wrench(model)
            - self.momentum_convective;
    }

    /// `A q̈ - Q ρ = W_ext + W_g - Ȧ q̇`.
    fn add_equilibrium_constraint(&mut self) {
        let n = self.num_dofs;
        let r = self.contacts.num_rhos();
        self.input.reshape(6, n + r);
        self.input.domain = QpInputDomain::MotionAndRho;
        self.input.constraint = ConstraintType::Equality;
        self.input
            .jacobian
            .view_mut((0, 0), (6, n))
            .copy_from(&self.momentum_matrix);
        let mut rho_block = self.input.jacobian.view_mut((0, n), (6, r));
        rho_block.copy_from(self.contacts.rho_jacobian());
        rho_block *= -1.0;
        self.input.objective.copy_from(&self.equilibrium_rhs);
        self.qp.add_input(&self.input);
    }

    fn add_motion_commands(
        &mut self,
        model: &impl MultibodyModel,
        commands: &[InverseDynamicsCommand],
    ) {
        for (i, command) in commands.iter().enumerate() {
            let added = match command {
                InverseDynamicsCommand::SpatialAcceleration(c) => {
                    self.motion.spatial_acceleration(model, c, &mut self.input)
                }
                InverseDynamicsCommand::PointAcceleration(c) => {
                    self.motion.point_acceleration(model, c, &mut self.input)
                }
                InverseDynamicsCommand::MomentumRate(c) => {
                    self.motion.momentum_rate(model, c, &mut self.input)
                }
                InverseDynamicsCommand::JointspaceAcceleration(c) => {
                    if c.constraint.is_inequality() {
                        for e in &c.entries {
                            self.acceleration_bounds.submit(c.constraint, e.joint, e.value);
                        }
                        false
                    } else {
                        MotionQpInputCalculator::jointspace_acceleration(model, c, &mut self.input)
                    }
                }
                InverseDynamicsCommand::JointTorque(c) => {
                    if c.constraint.is_inequality() {
                        for e in &c.entries {
                            self.torque_bounds.submit(c.constraint, e.joint, e.value);
                        }
                        false
                    } else {
                        self.begin_torque_rows(c.entries.len(), c.constraint);
                        for (row, e) in c.entries.iter().enumerate() {
                            self.set_torque_row(row, model.joint_dof_index(e.joint), e.value, e.weight);
                        }
                        true
                    }
                }
                InverseDynamicsCommand::CenterOfPressure(c) => {
                    match self.contacts.center_of_pressure_input(c, &mut self.input) {
                        Ok(added) => added,
                        Err(e) => {
                            warn!(error = %e, "Dropping center of pressure command");
                            false
                        }
                    }
                }
                InverseDynamicsCommand::ContactWrench(c) => {
                    match self.contacts.contact_wrench_input(model, c, &mut self.input) {
                        Ok(added) => added,
                        Err(e) => {
                            warn!(error = %e, "Dropping contact wrench command");
                            false
                        }
                    }
                }
                InverseDynamicsCommand::QpObjective(c) => {
                    if c.nullspace_projected {
                        self.deferred.push(i);
                        false
                    } else {
                        MotionQpInputCalculator::qp_objective(c, &mut self.input)
                    }
                }
                _ => false,
            };
            if added {
                self.qp.add_input(&self.input);
            }
        }
    }

    /// Deferred objectives only act in the nullspace of the primary tasks.
    fn add_nullspace_objectives(&mut self, commands: &[InverseDynamicsCommand]) {
        let damping = self.settings.nullspace_damping;
        for &i in &self.deferred {
            let InverseDynamicsCommand::QpObjective(command) = &commands[i] else {
                continue;
            };
            if MotionQpInputCalculator::qp_objective(command, &mut self.input) {
                self.qp.project_into_nullspace(&mut self.input, damping);
                self.qp.add_secondary_input(&self.input);
            }
        }
    }

    /// Rows `S N q̈ = q̈_priv` for every joint, weighted per joint.
    fn add_privileged_objective(&mut self, model: &impl MultibodyModel) {
        if !self.privileged.is_enabled() {
            return;
        }
        self.privileged.compute_accelerations(model);
        let num_joints = model.num_joints();
        let n = self.num_dofs;
        let nullspace = self.qp.nullspace_projector(self.settings.nullspace_damping);
        self.input.reshape(num_joints, n);
        self.input.domain = QpInputDomain::Motion;
        self.input.constraint = ConstraintType::Objective;
        for j in 0..num_joints {
            self.input
                .jacobian
                .row_mut(j)
                .copy_from(&nullspace.row(self.base_dofs + j));
        }
        self.input.objective.copy_from(self.privileged.accelerations());
        self.input.weights.copy_from(self.privileged.weights());
        self.qp.add_secondary_input(&self.input);
    }

    fn add_acceleration_bounds(&mut self, model: &impl MultibodyModel) {
        let abs_max = self.settings.max_joint_acceleration;
        let margin = self.settings.one_sided_bound_margin;
        let q = model.joint_positions();
        let qd = model.joint_velocities();
        for (j, info) in model.joints().iter().enumerate() {
            let nominal = nominal_acceleration_bounds(info, q[j], qd[j], self.control_dt, abs_max);
            self.acceleration_bounds.set(j, nominal, abs_max, margin);
            self.qp.set_acceleration_bounds(
                self.base_dofs + j,
                self.acceleration_bounds.lower()[j],
                self.acceleration_bounds.upper()[j],
            );
        }
    }

    /// Torque bounds are rows over `(q̈, ρ)` since torque is not a variable.
    fn add_torque_bounds(&mut self, model: &impl MultibodyModel) {
        let abs_max = self.settings.max_joint_torque;
        let margin = self.settings.one_sided_bound_margin;
        self.torque_limited.clear();
        for (j, info) in model.joints().iter().enumerate() {
            let nominal_enabled = self.settings.torque_limits.limits(j);
            if !nominal_enabled && !self.torque_bounds.has_custom(j) {
                continue;
            }
            let nominal = if nominal_enabled {
                nominal_torque_bounds(info, abs_max)
            } else {
                (-abs_max, abs_max)
            };
            self.torque_bounds.set(j, nominal, abs_max, margin);
            self.torque_limited.push(j);
        }
        if self.torque_limited.is_empty() {
            return;
        }

        let count = self.torque_limited.len();
        for constraint in [ConstraintType::LeqInequality, ConstraintType::GeqInequality] {
            self.begin_torque_rows(count, constraint);
            for row in 0..count {
                let j = self.torque_limited[row];
                let bound = if constraint == ConstraintType::LeqInequality {
                    self.torque_bounds.upper()[j]
                } else {
                    self.torque_bounds.lower()[j]
                };
                self.set_torque_row(row, self.base_dofs + j, bound, 0.0);
            }
            self.qp.add_input(&self.input);
        }
    }

    /// `w_τ ‖τ‖²` over the actuated joints.
    fn add_torque_regularization(&mut self, model: &impl MultibodyModel) {
        let weight = self.settings.joint_torque_weight;
        let num_joints = model.num_joints();
        if weight <= 0.0 || num_joints == 0 {
            return;
        }
        self.begin_torque_rows(num_joints, ConstraintType::Objective);
        for j in 0..num_joints {
            self.set_torque_row(j, self.base_dofs + j, 0.0, weight);
        }
        self.qp.add_input(&self.input);
    }

    fn begin_torque_rows(&mut self, rows: usize, constraint: ConstraintType) {
        self.input.reshape(rows, self.num_dofs + self.contacts.num_rhos());
        self.input.domain = QpInputDomain::MotionAndRho;
        self.input.constraint = constraint;
    }

    /// `τ_d = [M_d, -Q_d] z + h_d - ext_d`, written as the row
    /// `[M_d, -Q_d] z (op) target - h_d + ext_d`.
    fn set_torque_row(&mut self, row: usize, dof: usize, target: f64, weight: f64) {
        let n = self.num_dofs;
        let contact_jt = self.contacts.contact_force_jacobian_t();
        for c in 0..n {
            self.input.jacobian[(row, c)] = self.mass_matrix[(dof, c)];
        }
        for k in 0..contact_jt.ncols() {
            self.input.jacobian[(row, n + k)] = -contact_jt[(dof, k)];
        }
        self.input.objective[row] =
            target - self.bias[dof] + self.external.generalized_forces()[dof];
        self.input.weights[row] = weight;
    }

    fn solve(&mut self, backend: &mut dyn QpBackend) {
        let warm_start_reset = self.contacts.has_contact_set_changed();
        if warm_start_reset {
            debug!("Discarding warm start after contact change");
            self.qp.discard_warm_start();
        }
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
                    "QP did not converge, continuing with best-effort solution"
                );
            }
        }
        self.solution.diagnostics = QpDiagnostics {
            converged: outcome.converged,
            iterations: outcome.iterations,
            non_convergence_count: self.non_convergence_count,
            warm_start_reset,
            solve_time_us,
            equilibrium_error: 0.0,
        };
    }

    fn extract(&mut self, model: &impl MultibodyModel) {
        let solution = &mut self.solution;
        solution
            .joint_accelerations
            .copy_from(&self.qp.joint_accelerations());
        solution.rhos.copy_from(&self.qp.rhos());

        self.contacts.update_from_rho(model, &solution.rhos);
        for (slot, wrench) in solution
            .contact_wrenches
            .iter_mut()
            .zip(self.contacts.wrenches())
        {
            slot.1 = *wrench;
        }
        solution
            .centers_of_pressure
            .clone_from_slice(self.contacts.centers_of_pressure());
        solution.external_wrenches.clear();
        solution
            .external_wrenches
            .extend_from_slice(self.external.wrenches());

        let momentum_rate = &self.momentum_matrix * &solution.joint_accelerations;
        solution.achieved_momentum_rate =
            Vector6::from_iterator(momentum_rate.iter().copied()) + self.momentum_convective;
        if model.has_floating_base() {
            let contact = self.contacts.rho_jacobian() * &solution.rhos;
            let residual = Vector6::from_iterator(momentum_rate.iter().zip(contact.iter()).map(
                |(a, q)| a - q,
            )) - self.equilibrium_rhs;
            solution.diagnostics.equilibrium_error = residual.norm();
        }

        self.contacts.finish_tick();
    }
}
