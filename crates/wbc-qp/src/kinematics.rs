//! Jacobian helpers shared by the reference model and the command calculators.
//!
//! All Jacobians are 6×n with angular rows first, mapping generalized
//! velocity to the twist of a body origin in world-aligned axes.

use nalgebra::{DMatrix, DVector, Isometry3, Matrix3, Translation3, Unit, UnitQuaternion, Vector3};

/// Skew-symmetric cross-product matrix: `skew(a) * b == a.cross(&b)`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Motion produced by a single joint at `position`.
pub fn joint_transform(
    axis: &Unit<Vector3<f64>>,
    is_prismatic: bool,
    position: f64,
) -> Isometry3<f64> {
    if is_prismatic {
        Isometry3::from_parts(
            Translation3::from(axis.into_inner() * position),
            UnitQuaternion::identity(),
        )
    } else {
        Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(axis, position),
        )
    }
}

/// Write the columns of a serial chain into a 6×n Jacobian.
///
/// Given joint origins, axes and the end-effector position (all in world
/// frame), joint `i` fills column `first_column + i`:
///
/// - revolute: angular = axis, linear = axis × (ee_pos - origin)
/// - prismatic: angular = 0, linear = axis
pub fn chain_jacobian(
    origins: &[Vector3<f64>],
    axes: &[Vector3<f64>],
    is_prismatic: &[bool],
    ee_pos: &Vector3<f64>,
    first_column: usize,
    out: &mut DMatrix<f64>,
) {
    for (i, ((origin, axis), &prismatic)) in
        origins.iter().zip(axes).zip(is_prismatic).enumerate()
    {
        let col = first_column + i;
        if prismatic {
            out.fixed_view_mut::<3, 1>(0, col).fill(0.0);
            out.fixed_view_mut::<3, 1>(3, col).copy_from(axis);
        } else {
            let r = ee_pos - origin;
            out.fixed_view_mut::<3, 1>(0, col).copy_from(axis);
            out.fixed_view_mut::<3, 1>(3, col).copy_from(&axis.cross(&r));
        }
    }
}

/// Linear Jacobian (3×n) of a point rigidly attached to a body.
///
/// `v_point = v_origin + ω × r = J_lin q̇ - [r]× J_ang q̇` with
/// `r = point - body_origin`.
pub fn point_jacobian_from_body(
    body_jacobian: &DMatrix<f64>,
    body_origin: &Vector3<f64>,
    point: &Vector3<f64>,
    out: &mut DMatrix<f64>,
) {
    let r_skew = skew(&(point - body_origin));
    let angular = body_jacobian.rows(0, 3);
    let linear = body_jacobian.rows(3, 3);
    out.copy_from(&linear);
    out.gemm(-1.0, &r_skew, &angular, 1.0);
}

/// Accumulate `τ += Jᵀ w` for a task Jacobian and a generalized force on that task.
pub fn jacobian_transpose_torques(jacobian: &DMatrix<f64>, wrench: &DVector<f64>, tau: &mut DVector<f64>) {
    tau.gemv_tr(1.0, jacobian, wrench, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn planar_leg() -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>, Vector3<f64>) {
        // Hip at origin, knee at (0,0,-0.15), foot at (0,0,-0.3); both pitch about Y.
        (
            vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, -0.15)],
            vec![Vector3::y(), Vector3::y()],
            Vector3::new(0.0, 0.0, -0.3),
        )
    }

    #[test]
    fn skew_matches_cross() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 4.0, -1.0);
        assert_relative_eq!(skew(&a) * b, a.cross(&b), epsilon = 1e-12);
    }

    #[test]
    fn chain_jacobian_straight_leg() {
        let (origins, axes, ee) = planar_leg();
        let mut j = DMatrix::zeros(6, 2);
        chain_jacobian(&origins, &axes, &[false, false], &ee, 0, &mut j);

        // y × (0,0,-0.3) = (-0.3, 0, 0)
        assert_relative_eq!(j[(3, 0)], -0.3, epsilon = 1e-10);
        assert_relative_eq!(j[(5, 0)], 0.0, epsilon = 1e-10);
        assert_relative_eq!(j[(3, 1)], -0.15, epsilon = 1e-10);
        // angular rows carry the axis
        assert_relative_eq!(j[(1, 0)], 1.0, epsilon = 1e-10);
        assert_relative_eq!(j[(1, 1)], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn chain_jacobian_prismatic_column() {
        let origins = [Vector3::zeros()];
        let axes = [Vector3::z()];
        let mut j = DMatrix::from_element(6, 3, 9.0);
        chain_jacobian(&origins, &axes, &[true], &Vector3::new(1.0, 0.0, 0.0), 2, &mut j);
        assert_relative_eq!(j[(5, 2)], 1.0);
        assert_relative_eq!(j[(0, 2)], 0.0);
        // untouched columns keep their content
        assert_relative_eq!(j[(0, 0)], 9.0);
    }

    #[test]
    fn vertical_force_on_straight_leg_needs_no_torque() {
        let (origins, axes, ee) = planar_leg();
        let mut j = DMatrix::zeros(6, 2);
        chain_jacobian(&origins, &axes, &[false, false], &ee, 0, &mut j);

        let mut tau = DVector::zeros(2);
        let w = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 50.0]);
        jacobian_transpose_torques(&j, &w, &mut tau);
        assert_relative_eq!(tau[0], 0.0, epsilon = 1e-10);
        assert_relative_eq!(tau[1], 0.0, epsilon = 1e-10);

        // Push forward: τ = -0.3 * 10, -0.15 * 10
        let w = DVector::from_vec(vec![0.0, 0.0, 0.0, 10.0, 0.0, 0.0]);
        tau.fill(0.0);
        jacobian_transpose_torques(&j, &w, &mut tau);
        assert_relative_eq!(tau[0], -3.0, epsilon = 1e-10);
        assert_relative_eq!(tau[1], -1.5, epsilon = 1e-10);
    }

    #[test]
    fn point_jacobian_offsets_by_lever_arm() {
        // Single revolute about z at the origin, body origin at (1,0,0).
        let mut j = DMatrix::zeros(6, 1);
        chain_jacobian(
            &[Vector3::zeros()],
            &[Vector3::z()],
            &[false],
            &Vector3::new(1.0, 0.0, 0.0),
            0,
            &mut j,
        );
        let mut jp = DMatrix::zeros(3, 1);
        point_jacobian_from_body(
            &j,
            &Vector3::new(1.0, 0.0, 0.0),
            &Vector3::new(2.0, 0.0, 0.0),
            &mut jp,
        );
        // Point at radius 2 moves at 2 m/s along +y per rad/s.
        assert_relative_eq!(jp[(1, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(jp[(0, 0)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn prismatic_joint_transform_translates() {
        let t = joint_transform(&Vector3::x_axis(), true, 0.25);
        assert_relative_eq!(t.translation.vector.x, 0.25);
        let r = joint_transform(&Vector3::z_axis(), false, std::f64::consts::PI);
        assert_relative_eq!(r * Vector3::x(), -Vector3::x(), epsilon = 1e-12);
    }
}
