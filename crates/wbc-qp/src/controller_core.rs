//! Per-tick mode dispatch over the four control strategies.
//!
//! `submit()` validates and takes ownership of the tick's command bundle,
//! `compute()` runs exactly the requested strategy once and packages its
//! result into a [`ControllerCoreOutput`].

use nalgebra::{Vector3, Vector6};
use tracing::debug;
use wbc_core::{
    CommandError, ControlMode, ControllerConfig, CoreError, LowLevelOutput,
    RootJointDesiredConfiguration, Wrench,
};

use crate::backend::{ClarabelBackend, QpBackend};
use crate::command::ControllerCoreCommand;
use crate::contact::ContactablePlaneBody;
use crate::dynamics_realization::DynamicsRealization;
use crate::inverse_kinematics::InverseKinematicsOptimization;
use crate::kinematic_loop::KinematicLoopFunction;
use crate::model::{BodyId, MultibodyModel};
use crate::optimization::{InverseDynamicsOptimization, QpDiagnostics};
use crate::virtual_model::VirtualModelController;

/// Unified result of one tick, whatever the mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerCoreOutput {
    pub mode: ControlMode,
    pub low_level: LowLevelOutput,
    pub root: RootJointDesiredConfiguration,
    /// `A q̈ + Ȧ q̇`; zero outside inverse dynamics.
    pub achieved_momentum_rate: Vector6<f64>,
    /// Ground-reaction wrench of every contactable body, at the body origin.
    pub contact_wrenches: Vec<(BodyId, Wrench)>,
    pub centers_of_pressure: Vec<Option<Vector3<f64>>>,
    /// Should be close to zero for a dynamically consistent solve.
    pub residual_root_wrench: Wrench,
    /// Present for the QP-based modes.
    pub diagnostics: Option<QpDiagnostics>,
}

impl ControllerCoreOutput {
    fn new(num_joints: usize, bodies: &[ContactablePlaneBody]) -> Self {
        Self {
            mode: ControlMode::Off,
            low_level: LowLevelOutput::new(num_joints),
            root: RootJointDesiredConfiguration::default(),
            achieved_momentum_rate: Vector6::zeros(),
            contact_wrenches: bodies.iter().map(|b| (b.body, Wrench::zero())).collect(),
            centers_of_pressure: vec![None; bodies.len()],
            residual_root_wrench: Wrench::zero(),
            diagnostics: None,
        }
    }

    fn clear_contact_data(&mut self) {
        for (_, wrench) in &mut self.contact_wrenches {
            *wrench = Wrench::zero();
        }
        self.centers_of_pressure.fill(None);
        self.achieved_momentum_rate = Vector6::zeros();
        self.residual_root_wrench = Wrench::zero();
    }
}

/// The whole-body controller core.
pub struct WholeBodyControllerCore<B: QpBackend = ClarabelBackend> {
    backend: B,
    inverse_dynamics: InverseDynamicsOptimization,
    realization: DynamicsRealization,
    inverse_kinematics: InverseKinematicsOptimization,
    virtual_model: VirtualModelController,

    command: ControllerCoreCommand,
    submitted: bool,
    previous_mode: Option<ControlMode>,
    /// What OFF keeps sending.
    held: LowLevelOutput,
    output: ControllerCoreOutput,
}

impl WholeBodyControllerCore<ClarabelBackend> {
    pub fn new(
        model: &impl MultibodyModel,
        contactable_bodies: Vec<ContactablePlaneBody>,
        config: &ControllerConfig,
    ) -> Self {
        Self::with_backend(model, contactable_bodies, config, ClarabelBackend::new())
    }
}

impl<B: QpBackend> WholeBodyControllerCore<B> {
    pub fn with_backend(
        model: &impl MultibodyModel,
        contactable_bodies: Vec<ContactablePlaneBody>,
        config: &ControllerConfig,
        backend: B,
    ) -> Self {
        let num_joints = model.num_joints();
        let output = ControllerCoreOutput::new(num_joints, &contactable_bodies);
        Self {
            backend,
            inverse_dynamics: InverseDynamicsOptimization::new(model, contactable_bodies, config),
            realization: DynamicsRealization::new(model, config.control_dt, config.integration),
            inverse_kinematics: InverseKinematicsOptimization::new(model, config),
            virtual_model: VirtualModelController::new(model),
            command: ControllerCoreCommand::default(),
            submitted: false,
            previous_mode: None,
            held: LowLevelOutput::new(num_joints),
            output,
        }
    }

    /// Register a closed kinematic loop for the lifetime of the controller.
    pub fn register_loop(
        &mut self,
        function: Box<dyn KinematicLoopFunction>,
    ) -> Result<(), CommandError> {
        self.inverse_dynamics.register_loop(function)
    }

    /// Validate and take this tick's bundle, leaving `command` empty.
    ///
    /// A rejected bundle is left untouched and nothing is submitted.
    pub fn submit(
        &mut self,
        model: &impl MultibodyModel,
        command: &mut ControllerCoreCommand,
    ) -> Result<(), CommandError> {
        command.validate(model)?;
        if command.mode == ControlMode::InverseDynamics {
            self.inverse_dynamics.check_commands(&command.inverse_dynamics)?;
        }
        std::mem::swap(&mut self.command, command);
        command.clear();
        command.mode = self.command.mode;
        self.submitted = true;
        Ok(())
    }

    /// Run the submitted mode once.
    pub fn compute(
        &mut self,
        model: &impl MultibodyModel,
    ) -> Result<&ControllerCoreOutput, CoreError> {
        if !self.submitted {
            return Err(CoreError::NotSubmitted);
        }
        self.submitted = false;

        let mode = self.command.mode;
        if self.previous_mode != Some(mode) {
            debug!(from = ?self.previous_mode, to = %mode, "Control mode switched");
            self.clear_history();
            self.previous_mode = Some(mode);
        }

        self.output.mode = mode;
        match mode {
            ControlMode::Off => self.compute_off(),
            ControlMode::InverseDynamics => self.compute_inverse_dynamics(model),
            ControlMode::InverseKinematics => self.compute_inverse_kinematics(model),
            ControlMode::VirtualModel => self.compute_virtual_model(model),
        }
        if mode != ControlMode::Off {
            self.held.set(&self.output.low_level);
        }
        Ok(&self.output)
    }

    fn compute_off(&mut self) {
        if let Some(held) = self.command.low_level_override.take() {
            self.held = held;
        }
        self.output.low_level.set(&self.held);
        self.output.root = RootJointDesiredConfiguration::default();
        self.output.clear_contact_data();
        self.output.diagnostics = None;
    }

    fn compute_inverse_dynamics(&mut self, model: &impl MultibodyModel) {
        let commands = &self.command.inverse_dynamics;
        let solution = self
            .inverse_dynamics
            .compute(model, commands, &mut self.backend);
        self.realization.compute(
            model,
            solution,
            commands,
            &mut self.output.low_level,
            &mut self.output.root,
        );

        let output = &mut self.output;
        output
            .contact_wrenches
            .clone_from_slice(&solution.contact_wrenches);
        output
            .centers_of_pressure
            .clone_from_slice(&solution.centers_of_pressure);
        output.achieved_momentum_rate = solution.achieved_momentum_rate;
        output.residual_root_wrench = *self.realization.residual_root_wrench();
        output.diagnostics = Some(solution.diagnostics);
    }

    fn compute_inverse_kinematics(&mut self, model: &impl MultibodyModel) {
        let solution = self.inverse_kinematics.compute(
            model,
            &self.command.inverse_kinematics,
            &mut self.backend,
        );
        let diagnostics = solution.diagnostics;
        self.inverse_kinematics
            .write_output(model, &mut self.output.low_level, &mut self.output.root);
        self.output.clear_contact_data();
        self.output.diagnostics = Some(diagnostics);
    }

    fn compute_virtual_model(&mut self, model: &impl MultibodyModel) {
        self.virtual_model
            .compute(model, &self.command.virtual_model);
        self.virtual_model
            .write_output(model, &mut self.output.low_level);
        self.output.root = RootJointDesiredConfiguration::default();
        self.output.clear_contact_data();
        self.output.diagnostics = None;
    }

    fn clear_history(&mut self) {
        self.inverse_dynamics.clear_history();
        self.realization.clear_history();
        self.inverse_kinematics.clear_history();
    }

    pub fn mode(&self) -> Option<ControlMode> {
        self.previous_mode
    }

    pub fn output(&self) -> &ControllerCoreOutput {
        &self.output
    }

    pub fn inverse_dynamics(&self) -> &InverseDynamicsOptimization {
        &self.inverse_dynamics
    }

    pub fn inverse_kinematics(&self) -> &InverseKinematicsOptimization {
        &self.inverse_kinematics
    }

    pub fn realization(&self) -> &DynamicsRealization {
        &self.realization
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Ticks the inverse-dynamics QP did not converge since construction.
    pub fn non_convergence_count(&self) -> u64 {
        self.inverse_dynamics.non_convergence_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{JointTorqueCommand, JointspaceAccelerationCommand, JointspaceVelocityCommand, JointValue};
    use crate::model::{CentroidalModel, Limb, LimbJoint};
    use approx::assert_relative_eq;
    use wbc_core::{ConstraintType, JointDesiredData, LowLevelJointControlMode};

    fn arm() -> CentroidalModel {
        CentroidalModel::fixed(9.81).with_limb(
            Limb::new("hand")
                .joint(LimbJoint::revolute("shoulder", Vector3::zeros(), Vector3::y()).with_armature(1.0))
                .end_offset(Vector3::x()),
        )
    }

    fn core(model: &CentroidalModel) -> WholeBodyControllerCore {
        WholeBodyControllerCore::new(model, Vec::new(), &ControllerConfig::default())
    }

    #[test]
    fn compute_without_submit_is_an_error() {
        let model = arm();
        let mut core = core(&model);
        assert!(matches!(core.compute(&model), Err(CoreError::NotSubmitted)));

        let mut bundle = ControllerCoreCommand::new(ControlMode::Off);
        core.submit(&model, &mut bundle).unwrap();
        assert!(core.compute(&model).is_ok());
        assert!(matches!(core.compute(&model), Err(CoreError::NotSubmitted)));
    }

    #[test]
    fn submit_consumes_the_bundle() {
        let model = arm();
        let mut core = core(&model);
        let mut bundle = ControllerCoreCommand::new(ControlMode::InverseDynamics);
        bundle.add_inverse_dynamics(
            JointspaceAccelerationCommand::new(ConstraintType::Objective).joint(0, 1.0, 1.0),
        );
        core.submit(&model, &mut bundle).unwrap();
        assert!(bundle.inverse_dynamics.is_empty());
    }

    #[test]
    fn malformed_bundle_is_rejected() {
        let model = arm();
        let mut core = core(&model);
        let mut bundle = ControllerCoreCommand::new(ControlMode::InverseDynamics);
        bundle.add_inverse_dynamics(
            JointspaceAccelerationCommand::new(ConstraintType::Objective).joint(3, 1.0, 1.0),
        );
        let err = core.submit(&model, &mut bundle).unwrap_err();
        assert!(matches!(err, CommandError::UnknownJoint { index: 3, .. }));
        assert_eq!(bundle.inverse_dynamics.len(), 1);
        assert!(core.compute(&model).is_err());
    }

    #[test]
    fn off_holds_the_last_output() {
        let model = arm();
        let mut core = core(&model);
        let mut bundle = ControllerCoreCommand::new(ControlMode::VirtualModel);
        bundle.add_virtual_model(JointTorqueCommand::new(ConstraintType::Objective).joint(0, 3.0, 1.0));
        core.submit(&model, &mut bundle).unwrap();
        assert_relative_eq!(core.compute(&model).unwrap().low_level.joints()[0].torque, 3.0);

        bundle.mode = ControlMode::Off;
        core.submit(&model, &mut bundle).unwrap();
        let output = core.compute(&model).unwrap();
        assert_eq!(output.mode, ControlMode::Off);
        assert_relative_eq!(output.low_level.joints()[0].torque, 3.0);
    }

    #[test]
    fn off_override_replaces_the_held_output() {
        let model = arm();
        let mut core = core(&model);
        let mut held = LowLevelOutput::new(1);
        *held.joint_mut(0).unwrap() = JointDesiredData::torque_only(-1.5);
        let mut bundle = ControllerCoreCommand::new(ControlMode::Off);
        bundle.low_level_override = Some(held);
        core.submit(&model, &mut bundle).unwrap();
        assert_relative_eq!(core.compute(&model).unwrap().low_level.joints()[0].torque, -1.5);

        // Without an override the same output keeps coming.
        bundle.mode = ControlMode::Off;
        core.submit(&model, &mut bundle).unwrap();
        assert_relative_eq!(core.compute(&model).unwrap().low_level.joints()[0].torque, -1.5);
    }

    #[test]
    fn virtual_model_does_not_fall_through_to_off() {
        let model = arm();
        let mut core = core(&model);
        let mut held = LowLevelOutput::new(1);
        *held.joint_mut(0).unwrap() = JointDesiredData::torque_only(9.0);
        let mut bundle = ControllerCoreCommand::new(ControlMode::Off);
        bundle.low_level_override = Some(held);
        core.submit(&model, &mut bundle).unwrap();
        core.compute(&model).unwrap();

        bundle.mode = ControlMode::VirtualModel;
        core.submit(&model, &mut bundle).unwrap();
        let output = core.compute(&model).unwrap();
        assert_relative_eq!(output.low_level.joints()[0].torque, 0.0);
        assert!(output.diagnostics.is_none());
    }

    #[test]
    fn inverse_dynamics_realizes_torque() {
        let model = arm();
        let mut core = core(&model);
        let mut bundle = ControllerCoreCommand::new(ControlMode::InverseDynamics);
        bundle.add_inverse_dynamics(
            JointspaceAccelerationCommand::new(ConstraintType::Objective).joint(0, 2.0, 1e3),
        );
        core.submit(&model, &mut bundle).unwrap();
        let output = core.compute(&model).unwrap();
        let joint = output.low_level.joints()[0];
        assert!(output.diagnostics.unwrap().converged);
        assert_relative_eq!(joint.acceleration.unwrap(), 2.0, epsilon = 1e-3);
        // Armature of 1 and no gravity load on a massless limb.
        assert_relative_eq!(joint.torque, joint.acceleration.unwrap(), epsilon = 1e-9);
        assert_eq!(core.mode(), Some(ControlMode::InverseDynamics));
    }

    #[test]
    fn inverse_kinematics_outputs_position_mode() {
        let model = arm();
        let mut core = core(&model);
        let mut bundle = ControllerCoreCommand::new(ControlMode::InverseKinematics);
        bundle.add_inverse_kinematics(JointspaceVelocityCommand {
            entries: vec![JointValue::new(0, 0.5, 10.0)],
        });
        core.submit(&model, &mut bundle).unwrap();
        let output = core.compute(&model).unwrap();
        let joint = output.low_level.joints()[0];
        assert_eq!(joint.mode, LowLevelJointControlMode::Position);
        assert_relative_eq!(joint.velocity.unwrap(), 0.5, epsilon = 1e-3);
    }
}
