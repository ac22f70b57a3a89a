//! Realizes a solved `[q̈; ρ]` as joint torques through inverse dynamics and,
//! where requested, as integrated desired positions and velocities.

use nalgebra::{DVector, Vector6};
use wbc_core::{
    IntegrationSettings, JointDesiredData, LowLevelJointControlMode, LowLevelOutput,
    RootJointDesiredConfiguration, Wrench,
};

use crate::command::{InverseDynamicsCommand, JointAccelerationIntegrationCommand};
use crate::model::{DynamicsWorkspace, MultibodyModel};
use crate::optimization::InverseDynamicsSolution;

// ---------------------------------------------------------------------------
// JointAccelerationIntegrator
// ---------------------------------------------------------------------------

/// Leaky double integration of joint accelerations.
///
/// ```text
/// q̇_d = clamp(αv q̇_prev + (1 - αv) q̇ + q̈ dt, ±max_velocity)
/// q_d = clamp(αp q_prev + (1 - αp) q + q̇_d dt, q ± max_position_error)
/// ```
///
/// `q_prev`/`q̇_prev` are last tick's desired values while the joint stays
/// integrated, and the measured state on the first integrated tick.
#[derive(Debug, Clone)]
pub struct JointAccelerationIntegrator {
    defaults: IntegrationSettings,
    parameters: Vec<IntegrationSettings>,
    integrated: Vec<bool>,
    was_integrated: Vec<bool>,
    positions: DVector<f64>,
    velocities: DVector<f64>,
}

impl JointAccelerationIntegrator {
    pub fn new(num_joints: usize, defaults: IntegrationSettings) -> Self {
        Self {
            defaults,
            parameters: vec![defaults; num_joints],
            integrated: vec![false; num_joints],
            was_integrated: vec![false; num_joints],
            positions: DVector::zeros(num_joints),
            velocities: DVector::zeros(num_joints),
        }
    }

    pub fn reset(&mut self) {
        self.integrated.fill(false);
        self.parameters.fill(self.defaults);
    }

    pub fn submit(&mut self, command: &JointAccelerationIntegrationCommand) {
        for p in &command.joints {
            let d = self.defaults;
            self.integrated[p.joint] = true;
            self.parameters[p.joint] = IntegrationSettings {
                alpha_position: p.alpha_position.unwrap_or(d.alpha_position),
                alpha_velocity: p.alpha_velocity.unwrap_or(d.alpha_velocity),
                max_position_error: p.max_position_error.unwrap_or(d.max_position_error),
                max_velocity: p.max_velocity.unwrap_or(d.max_velocity),
            };
        }
    }

    pub fn is_integrated(&self, joint: usize) -> bool {
        self.integrated[joint]
    }

    /// `accelerations` holds one entry per joint.
    pub fn integrate(&mut self, model: &impl MultibodyModel, accelerations: &[f64], dt: f64) {
        let q = model.joint_positions();
        let qd = model.joint_velocities();
        for j in 0..self.integrated.len() {
            if !self.integrated[j] {
                continue;
            }
            let p = self.parameters[j];
            let (q_prev, qd_prev) = if self.was_integrated[j] {
                (self.positions[j], self.velocities[j])
            } else {
                (q[j], qd[j])
            };
            let velocity = (p.alpha_velocity * qd_prev
                + (1.0 - p.alpha_velocity) * qd[j]
                + accelerations[j] * dt)
                .clamp(-p.max_velocity, p.max_velocity);
            let position = (p.alpha_position * q_prev
                + (1.0 - p.alpha_position) * q[j]
                + velocity * dt)
                .clamp(q[j] - p.max_position_error, q[j] + p.max_position_error);
            self.velocities[j] = velocity;
            self.positions[j] = position;
        }
        self.was_integrated.copy_from_slice(&self.integrated);
    }

    pub fn desired_position(&self, joint: usize) -> f64 {
        self.positions[joint]
    }

    pub fn desired_velocity(&self, joint: usize) -> f64 {
        self.velocities[joint]
    }

    /// Forget last tick's desired state.
    pub fn clear_history(&mut self) {
        self.was_integrated.fill(false);
    }
}

// ---------------------------------------------------------------------------
// DynamicsRealization
// ---------------------------------------------------------------------------

/// Inverse dynamics plus acceleration integration for the ID strategy.
#[derive(Debug, Clone)]
pub struct DynamicsRealization {
    control_dt: f64,
    workspace: DynamicsWorkspace,
    tau: DVector<f64>,
    joint_accelerations: Vec<f64>,
    integrator: JointAccelerationIntegrator,
    residual: Wrench,
}

impl DynamicsRealization {
    pub fn new(model: &impl MultibodyModel, control_dt: f64, integration: IntegrationSettings) -> Self {
        let n = model.num_dofs();
        Self {
            control_dt,
            workspace: DynamicsWorkspace::new(n),
            tau: DVector::zeros(n),
            joint_accelerations: vec![0.0; model.num_joints()],
            integrator: JointAccelerationIntegrator::new(model.num_joints(), integration),
            residual: Wrench::zero(),
        }
    }

    /// Fill `output` and `root` from `solution`.
    pub fn compute(
        &mut self,
        model: &impl MultibodyModel,
        solution: &InverseDynamicsSolution,
        commands: &[InverseDynamicsCommand],
        output: &mut LowLevelOutput,
        root: &mut RootJointDesiredConfiguration,
    ) {
        let qdd = &solution.joint_accelerations;
        let wrenches = solution
            .contact_wrenches
            .iter()
            .chain(&solution.external_wrenches)
            .map(|(body, wrench)| (*body, wrench));
        model.inverse_dynamics(qdd, wrenches, &mut self.workspace, &mut self.tau);

        let base = model.base_dofs();
        self.residual = if base > 0 {
            Wrench::from_vector(&Vector6::from_iterator(self.tau.rows(0, 6).iter().copied()))
        } else {
            Wrench::zero()
        };

        self.integrator.reset();
        for command in commands {
            if let InverseDynamicsCommand::JointAccelerationIntegration(c) = command {
                self.integrator.submit(c);
            }
        }
        for (j, a) in self.joint_accelerations.iter_mut().enumerate() {
            *a = qdd[base + j];
        }
        self.integrator
            .integrate(model, &self.joint_accelerations, self.control_dt);

        for (j, data) in output.joints_mut().iter_mut().enumerate() {
            let integrated = self.integrator.is_integrated(j);
            *data = JointDesiredData {
                torque: self.tau[base + j],
                position: integrated.then(|| self.integrator.desired_position(j)),
                velocity: integrated.then(|| self.integrator.desired_velocity(j)),
                acceleration: Some(self.joint_accelerations[j]),
                mode: LowLevelJointControlMode::Force,
            };
        }

        *root = RootJointDesiredConfiguration::default();
        if base > 0 {
            root.acceleration = Vector6::from_iterator(qdd.rows(0, 6).iter().copied());
            root.velocity = model.root_twist() + root.acceleration * self.control_dt;
            root.pose = model.root_pose();
        }
    }

    /// Wrench the floating base would need on top of the solved contact and
    /// external wrenches. Zero for a dynamically consistent solution.
    pub fn residual_root_wrench(&self) -> &Wrench {
        &self.residual
    }

    /// Generalized forces of the last [`Self::compute`], base first.
    pub fn generalized_forces(&self) -> &DVector<f64> {
        &self.tau
    }

    pub fn clear_history(&mut self) {
        self.integrator.clear_history();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::JointIntegrationParameters;
    use crate::model::{CentroidalModel, Limb, LimbJoint};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn arm() -> CentroidalModel {
        CentroidalModel::fixed(9.81).with_limb(
            Limb::new("hand")
                .joint(LimbJoint::revolute("shoulder", Vector3::zeros(), Vector3::y()).with_armature(0.5))
                .end_offset(Vector3::new(0.5, 0.0, 0.0)),
        )
    }

    #[test]
    fn first_integrated_tick_starts_from_measured_state() {
        let mut model = arm();
        model.set_joint_positions(&[0.3]);
        model.set_joint_velocities(&[0.1]);
        let mut integrator = JointAccelerationIntegrator::new(1, IntegrationSettings::default());
        integrator.submit(&JointAccelerationIntegrationCommand::for_joints([0]));
        integrator.integrate(&model, &[2.0], 0.01);

        let qd = 0.1 + 2.0 * 0.01;
        assert_relative_eq!(integrator.desired_velocity(0), qd, epsilon = 1e-12);
        assert_relative_eq!(integrator.desired_position(0), 0.3 + qd * 0.01, epsilon = 1e-12);
    }

    #[test]
    fn desired_state_persists_while_integrated() {
        let model = arm();
        let mut integrator = JointAccelerationIntegrator::new(1, IntegrationSettings::default());
        let command = JointAccelerationIntegrationCommand::for_joints([0]);
        for _ in 0..10 {
            integrator.reset();
            integrator.submit(&command);
            integrator.integrate(&model, &[1.0], 0.01);
        }
        // Measured velocity stays zero; the leak pulls back by (1 - αv) each tick.
        assert!(integrator.desired_velocity(0) > 0.01);

        integrator.reset();
        integrator.integrate(&model, &[1.0], 0.01);
        integrator.reset();
        integrator.submit(&command);
        integrator.integrate(&model, &[0.0], 0.01);
        assert_relative_eq!(integrator.desired_velocity(0), 0.0);
    }

    #[test]
    fn integration_is_clamped() {
        let model = arm();
        let mut integrator = JointAccelerationIntegrator::new(1, IntegrationSettings::default());
        integrator.submit(&JointAccelerationIntegrationCommand {
            joints: vec![JointIntegrationParameters {
                joint: 0,
                max_velocity: Some(0.5),
                max_position_error: Some(0.001),
                ..JointIntegrationParameters::default()
            }],
        });
        integrator.integrate(&model, &[1000.0], 0.01);
        assert_relative_eq!(integrator.desired_velocity(0), 0.5);
        assert_relative_eq!(integrator.desired_position(0), 0.001);
    }

    #[test]
    fn torque_follows_armature_and_integration_is_reported() {
        let model = arm();
        let mut realization = DynamicsRealization::new(&model, 0.004, IntegrationSettings::default());
        let mut solution = InverseDynamicsSolution {
            joint_accelerations: DVector::from_element(1, 4.0),
            rhos: DVector::zeros(0),
            contact_wrenches: Vec::new(),
            external_wrenches: Vec::new(),
            centers_of_pressure: Vec::new(),
            achieved_momentum_rate: Vector6::zeros(),
            diagnostics: crate::optimization::QpDiagnostics::default(),
        };
        let mut output = LowLevelOutput::new(1);
        let mut root = RootJointDesiredConfiguration::default();
        let commands = [InverseDynamicsCommand::JointAccelerationIntegration(
            JointAccelerationIntegrationCommand::for_joints([0]),
        )];
        realization.compute(&model, &solution, &commands, &mut output, &mut root);
        let joint = output.joint(0).unwrap();
        assert_relative_eq!(joint.torque, 2.0);
        assert_eq!(joint.acceleration, Some(4.0));
        assert!(joint.position.is_some());
        assert_eq!(joint.mode, LowLevelJointControlMode::Force);

        // A 10 N pull down at the hand, 0.5 m out, is carried by the limb: Jᵀw = 5.
        solution.external_wrenches.push((
            model.body_id("hand").unwrap(),
            Wrench::from_force(Vector3::new(0.0, 0.0, -10.0)),
        ));
        realization.compute(&model, &solution, &[], &mut output, &mut root);
        let joint = output.joint(0).unwrap();
        assert_relative_eq!(joint.torque, 2.0 - 5.0, epsilon = 1e-12);
        assert!(joint.position.is_none());
        assert_relative_eq!(realization.residual_root_wrench().force.norm(), 0.0);
    }
}
