//! Virtual-model control: desired wrenches mapped to joint torques through
//! the transposed body Jacobians, without a QP.

use nalgebra::{DMatrix, DVector};
use wbc_core::{JointDesiredData, LowLevelOutput};

use crate::command::VirtualModelCommand;
use crate::kinematics::jacobian_transpose_torques;
use crate::model::MultibodyModel;

/// `τ = Σ J_bᵀ S w_b + τ_ff`.
#[derive(Debug, Clone)]
pub struct VirtualModelController {
    jacobian: DMatrix<f64>,
    wrench: DVector<f64>,
    tau: DVector<f64>,
}

impl VirtualModelController {
    pub fn new(model: &impl MultibodyModel) -> Self {
        let n = model.num_dofs();
        Self {
            jacobian: DMatrix::zeros(6, n),
            wrench: DVector::zeros(6),
            tau: DVector::zeros(n),
        }
    }

    pub fn compute(&mut self, model: &impl MultibodyModel, commands: &[VirtualModelCommand]) {
        self.tau.fill(0.0);
        for command in commands {
            match command {
                VirtualModelCommand::VirtualWrench(c) => {
                    model.body_jacobian(c.body, &mut self.jacobian);
                    let w = c.wrench.to_vector();
                    for (i, selected) in c.selection.iter().enumerate() {
                        self.wrench[i] = if *selected { w[i] } else { 0.0 };
                    }
                    jacobian_transpose_torques(&self.jacobian, &self.wrench, &mut self.tau);
                }
                VirtualModelCommand::JointTorque(c) => {
                    for entry in &c.entries {
                        self.tau[model.joint_dof_index(entry.joint)] += entry.value;
                    }
                }
            }
        }
    }

    /// Generalized forces of the last [`Self::compute`]; base entries are
    /// what the floating base would have to supply.
    pub fn generalized_forces(&self) -> &DVector<f64> {
        &self.tau
    }

    pub fn write_output(&self, model: &impl MultibodyModel, output: &mut LowLevelOutput) {
        let base = model.base_dofs();
        for (j, data) in output.joints_mut().iter_mut().enumerate() {
            *data = JointDesiredData::torque_only(self.tau[base + j]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{JointTorqueCommand, VirtualWrenchCommand};
    use crate::model::{CentroidalModel, Limb, LimbJoint};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use wbc_core::{ConstraintType, LowLevelJointControlMode, Wrench};

    fn arm() -> CentroidalModel {
        CentroidalModel::fixed(9.81).with_limb(
            Limb::new("hand")
                .joint(LimbJoint::revolute("shoulder", Vector3::zeros(), Vector3::z()))
                .joint(LimbJoint::revolute("elbow", Vector3::x(), Vector3::z()))
                .end_offset(Vector3::x()),
        )
    }

    #[test]
    fn wrench_maps_through_jacobian_transpose() {
        let model = arm();
        let hand = model.body_id("hand").unwrap();
        let mut vmc = VirtualModelController::new(&model);
        let push = Wrench::from_force(Vector3::new(0.0, 1.0, 0.0));
        let commands: Vec<VirtualModelCommand> = vec![VirtualWrenchCommand::new(hand, push).into()];
        vmc.compute(&model, &commands);

        // Lever arms of 2 m and 1 m about z.
        let tau = vmc.generalized_forces();
        assert_relative_eq!(tau[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(tau[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn unselected_axes_are_ignored() {
        let model = arm();
        let hand = model.body_id("hand").unwrap();
        let mut vmc = VirtualModelController::new(&model);
        let mut command = VirtualWrenchCommand::new(hand, Wrench::from_force(Vector3::new(0.0, 1.0, 0.0)));
        command.selection[4] = false;
        vmc.compute(&model, &[command.into()]);
        assert_relative_eq!(vmc.generalized_forces().norm(), 0.0);
    }

    #[test]
    fn feedforward_adds_and_output_is_force_mode() {
        let model = arm();
        let mut vmc = VirtualModelController::new(&model);
        let commands: Vec<VirtualModelCommand> = vec![
            JointTorqueCommand::new(ConstraintType::Objective).joint(1, 0.5, 1.0).into(),
            JointTorqueCommand::new(ConstraintType::Objective).joint(1, 0.25, 1.0).into(),
        ];
        vmc.compute(&model, &commands);
        let mut output = LowLevelOutput::new(2);
        vmc.write_output(&model, &mut output);
        assert_relative_eq!(output.joint(1).unwrap().torque, 0.75);
        assert_eq!(output.joint(0).unwrap().mode, LowLevelJointControlMode::Force);
    }
}
