//! Reference robots built on [`CentroidalModel`].

use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3};
use wbc_core::ControllerConfig;
use wbc_qp::command::PlaneContactStateCommand;
use wbc_qp::contact::ContactablePlaneBody;
use wbc_qp::model::{BodyId, CentroidalModel, Limb, LimbJoint};

pub const ROBOT_MASS: f64 = 30.0;
pub const GRAVITY: f64 = 9.81;
pub const LEG_LENGTH: f64 = 0.8;
pub const SOLE_HALF_LENGTH: f64 = 0.1;
pub const SOLE_HALF_WIDTH: f64 = 0.05;

fn leg(name: &str, lateral: f64) -> Limb {
    Limb::new(name)
        .joint(
            LimbJoint::revolute(format!("{name}_hip"), Vector3::new(0.0, lateral, 0.0), Vector3::y())
                .with_limits(-1.5, 1.5)
                .with_velocity_limit(12.0)
                .with_effort_limit(150.0)
                .with_armature(0.05),
        )
        .joint(
            LimbJoint::revolute(format!("{name}_knee"), Vector3::new(0.0, 0.0, -0.5 * LEG_LENGTH), Vector3::y())
                .with_limits(-2.5, 2.5)
                .with_velocity_limit(12.0)
                .with_effort_limit(150.0)
                .with_armature(0.05),
        )
        .end_offset(Vector3::new(0.0, 0.0, -0.5 * LEG_LENGTH))
}

fn standing_pose() -> Isometry3<f64> {
    Isometry3::from_parts(Translation3::new(0.0, 0.0, LEG_LENGTH), UnitQuaternion::identity())
}

fn sole(model: &CentroidalModel, name: &str) -> Option<ContactablePlaneBody> {
    let body = model.body_id(name)?;
    Some(ContactablePlaneBody::rectangular_sole(
        name,
        body,
        SOLE_HALF_LENGTH,
        SOLE_HALF_WIDTH,
    ))
}

/// Two-legged robot standing with straight legs, feet 0.2 m apart.
pub fn biped() -> (CentroidalModel, Vec<ContactablePlaneBody>) {
    let mut model = CentroidalModel::floating(
        ROBOT_MASS,
        Matrix3::from_diagonal(&Vector3::new(1.2, 1.0, 0.4)),
        GRAVITY,
    )
    .with_limb(leg("left_foot", 0.1))
    .with_limb(leg("right_foot", -0.1));
    model.set_root_pose(standing_pose());
    let bodies = ["left_foot", "right_foot"]
        .iter()
        .filter_map(|name| sole(&model, name))
        .collect();
    (model, bodies)
}

/// One leg directly under the center of mass.
pub fn single_foot_robot() -> (CentroidalModel, Vec<ContactablePlaneBody>) {
    let mut model = CentroidalModel::floating(ROBOT_MASS, Matrix3::identity(), GRAVITY)
        .with_limb(leg("foot", 0.0));
    model.set_root_pose(standing_pose());
    let bodies = sole(&model, "foot").into_iter().collect();
    (model, bodies)
}

/// Fixed-base planar arm of `num_joints` pitch joints with unit armature,
/// 0.3 m links.
pub fn fixed_arm(num_joints: usize) -> CentroidalModel {
    let mut limb = Limb::new("hand");
    for j in 0..num_joints {
        let offset = if j == 0 { Vector3::zeros() } else { Vector3::new(0.3, 0.0, 0.0) };
        limb = limb.joint(LimbJoint::revolute(format!("joint_{j}"), offset, Vector3::y()).with_armature(1.0));
    }
    CentroidalModel::fixed(GRAVITY).with_limb(limb.end_offset(Vector3::new(0.3, 0.0, 0.0)))
}

/// Settings that let balance tests compare support forces tightly: rho
/// regularization small enough not to bias them.
pub fn standing_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.optimization.rho_weight = 1e-10;
    config.optimization.tolerance = 1e-10;
    config
}

/// Full four-corner contact on flat ground.
pub fn stance(body: BodyId) -> PlaneContactStateCommand {
    PlaneContactStateCommand::in_contact(body, 4, 0.8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wbc_qp::model::MultibodyModel;

    #[test]
    fn biped_feet_touch_the_ground() {
        let (model, bodies) = biped();
        assert_eq!(model.num_dofs(), 10);
        assert_eq!(bodies.len(), 2);
        for body in &bodies {
            assert!(model.body_position(body.body).z.abs() < 1e-12);
        }
    }

    #[test]
    fn fixed_arm_has_requested_joints() {
        let model = fixed_arm(3);
        assert_eq!(model.num_dofs(), 3);
        assert!(!model.has_floating_base());
    }
}
