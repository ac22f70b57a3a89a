//! Known external wrenches (e.g. a carried payload) to compensate for.

use nalgebra::{DMatrix, DVector, Vector6};
use wbc_core::Wrench;

use crate::command::ExternalWrenchCommand;
use crate::kinematics::jacobian_transpose_torques;
use crate::model::{BodyId, MultibodyModel};

/// `[0, 0, 0, 0, 0, -m g]`: the weight of the robot about its CoM.
pub fn gravity_wrench(model: &impl MultibodyModel) -> Vector6<f64> {
    Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, -model.total_mass() * model.gravity())
}

/// Tick-local accumulator of external wrenches.
#[derive(Debug, Clone)]
pub struct ExternalWrenchHandler {
    /// Wrenches at their body origin, in submission order.
    wrenches: Vec<(BodyId, Wrench)>,
    /// Sum of all wrenches about the center of mass.
    total: Wrench,
    /// `Σ J_bᵀ w_b`.
    generalized: DVector<f64>,
    jacobian: DMatrix<f64>,
    wrench_vector: DVector<f64>,
}

impl ExternalWrenchHandler {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            wrenches: Vec::new(),
            total: Wrench::zero(),
            generalized: DVector::zeros(num_dofs),
            jacobian: DMatrix::zeros(6, num_dofs),
            wrench_vector: DVector::zeros(6),
        }
    }

    pub fn reset(&mut self) {
        self.wrenches.clear();
        self.total = Wrench::zero();
        self.generalized.fill(0.0);
    }

    /// Wrenches on the same body add up.
    pub fn submit(&mut self, model: &impl MultibodyModel, command: &ExternalWrenchCommand) {
        let origin = model.body_position(command.body);
        self.total += command.wrench.shift(&(model.center_of_mass() - origin));

        model.body_jacobian(command.body, &mut self.jacobian);
        self.wrench_vector.copy_from(&command.wrench.to_vector());
        jacobian_transpose_torques(&self.jacobian, &self.wrench_vector, &mut self.generalized);

        match self.wrenches.iter_mut().find(|(b, _)| *b == command.body) {
            Some((_, w)) => *w += command.wrench,
            None => self.wrenches.push((command.body, command.wrench)),
        }
    }

    pub fn total_about_com(&self) -> &Wrench {
        &self.total
    }

    pub fn generalized_forces(&self) -> &DVector<f64> {
        &self.generalized
    }

    pub fn wrenches(&self) -> &[(BodyId, Wrench)] {
        &self.wrenches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CentroidalModel, Limb, LimbJoint};
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn robot() -> CentroidalModel {
        CentroidalModel::floating(5.0, Matrix3::identity(), 9.81).with_limb(
            Limb::new("hand")
                .joint(LimbJoint::revolute("shoulder", Vector3::new(0.0, 0.0, 0.0), Vector3::y()))
                .end_offset(Vector3::new(1.0, 0.0, 0.0)),
        )
    }

    #[test]
    fn gravity_wrench_points_down() {
        let w = gravity_wrench(&robot());
        assert_relative_eq!(w[5], -5.0 * 9.81);
        assert_relative_eq!(w.fixed_rows::<5>(0).norm(), 0.0);
    }

    #[test]
    fn payload_moment_about_com() {
        let model = robot();
        let mut handler = ExternalWrenchHandler::new(model.num_dofs());
        let payload = ExternalWrenchCommand {
            body: BodyId(1),
            wrench: Wrench::from_force(Vector3::new(0.0, 0.0, -10.0)),
        };
        handler.submit(&model, &payload);
        handler.submit(&model, &payload);

        let total = handler.total_about_com();
        assert_relative_eq!(total.force.z, -20.0);
        // Hand 1 m along x: r × f = (1,0,0) × (0,0,-20) = (0, 20, 0)
        assert_relative_eq!(total.torque.y, 20.0, epsilon = 1e-12);
        assert_eq!(handler.wrenches().len(), 1);

        // Shoulder torque from a downward pull at the hand, about +y.
        let tau = handler.generalized_forces();
        assert_relative_eq!(tau[6], 20.0, epsilon = 1e-12);

        handler.reset();
        assert!(handler.wrenches().is_empty());
        assert_relative_eq!(handler.generalized_forces().norm(), 0.0);
    }
}
