//! Multibody model interface consumed by the controller core, plus a
//! single-rigid-body reference implementation.
//!
//! DoF ordering: when the model has a floating base, the first six DoFs are
//! the base twist `[ω(3), v(3)]` (world-aligned axes, linear velocity of the
//! base origin), followed by one DoF per joint in [`MultibodyModel::joints`]
//! order.

use nalgebra::{
    DMatrix, DVector, Isometry3, Matrix3, Translation3, Unit, UnitQuaternion, Vector3, Vector6,
};
use wbc_core::Wrench;

use crate::kinematics::{chain_jacobian, joint_transform, point_jacobian_from_body, skew};

/// Number of floating-base DoFs.
pub const FLOATING_BASE_DOFS: usize = 6;

// ---------------------------------------------------------------------------
// Identifiers and joint descriptors
// ---------------------------------------------------------------------------

/// Index of a rigid body in the model. `BodyId::ROOT` is the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub usize);

impl BodyId {
    pub const ROOT: Self = Self(0);
}

/// Static description of a one-DoF joint.
#[derive(Debug, Clone, PartialEq)]
pub struct JointInfo {
    pub name: String,
    /// `(lower, upper)` position limits, `None` for continuous joints.
    pub position_limits: Option<(f64, f64)>,
    /// Velocity limit (rad/s or m/s), infinite if unlimited.
    pub velocity_limit: f64,
    /// Effort limit (Nm or N), infinite if unlimited.
    pub effort_limit: f64,
}

impl JointInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position_limits: None,
            velocity_limit: f64::INFINITY,
            effort_limit: f64::INFINITY,
        }
    }

    #[must_use]
    pub const fn with_position_limits(mut self, lower: f64, upper: f64) -> Self {
        self.position_limits = Some((lower, upper));
        self
    }

    #[must_use]
    pub const fn with_velocity_limit(mut self, limit: f64) -> Self {
        self.velocity_limit = limit;
        self
    }

    #[must_use]
    pub const fn with_effort_limit(mut self, limit: f64) -> Self {
        self.effort_limit = limit;
        self
    }
}

// ---------------------------------------------------------------------------
// MultibodyModel
// ---------------------------------------------------------------------------

/// Rigid-body kinematics and dynamics the controller core reads every tick.
///
/// Matrix-valued queries write into caller-owned buffers so the core can
/// reuse its preallocated storage.
pub trait MultibodyModel {
    /// Total DoFs, base included.
    fn num_dofs(&self) -> usize;

    fn has_floating_base(&self) -> bool;

    /// One-DoF joints, in DoF order.
    fn joints(&self) -> &[JointInfo];

    /// Joint positions, one per entry of [`Self::joints`].
    fn joint_positions(&self) -> &DVector<f64>;

    fn joint_velocities(&self) -> &DVector<f64>;

    /// Pose of the base.
    fn root_pose(&self) -> Isometry3<f64>;

    /// Base twist `[ω, v]`, zero for a fixed base.
    fn root_twist(&self) -> Vector6<f64>;

    fn total_mass(&self) -> f64;

    /// Gravity magnitude, acting along -z.
    fn gravity(&self) -> f64;

    fn center_of_mass(&self) -> Vector3<f64>;

    /// Joint-space inertia matrix (n×n).
    fn mass_matrix(&self, out: &mut DMatrix<f64>);

    /// Coriolis, centrifugal and gravity forces (n).
    fn bias_forces(&self, out: &mut DVector<f64>);

    /// Centroidal momentum matrix (6×n, angular rows first).
    fn centroidal_momentum_matrix(&self, out: &mut DMatrix<f64>);

    /// `Ȧ q̇`.
    fn centroidal_convective_term(&self) -> Vector6<f64>;

    fn num_bodies(&self) -> usize;

    fn body_name(&self, body: BodyId) -> &str;

    fn body_pose(&self, body: BodyId) -> Isometry3<f64>;

    /// Body Jacobian (6×n): twist of the body origin, world-aligned axes.
    fn body_jacobian(&self, body: BodyId, out: &mut DMatrix<f64>);

    /// Current twist of the body origin `[ω, v]`.
    fn body_twist(&self, body: BodyId) -> Vector6<f64>;

    /// `J̇ q̇` for the body origin.
    fn body_convective_term(&self, body: BodyId) -> Vector6<f64>;

    // ---- provided ----

    fn base_dofs(&self) -> usize {
        if self.has_floating_base() {
            FLOATING_BASE_DOFS
        } else {
            0
        }
    }

    fn num_joints(&self) -> usize {
        self.joints().len()
    }

    /// Column of joint `joint` in every n-wide matrix.
    fn joint_dof_index(&self, joint: usize) -> usize {
        self.base_dofs() + joint
    }

    fn body_position(&self, body: BodyId) -> Vector3<f64> {
        self.body_pose(body).translation.vector
    }

    /// Full generalized velocity `[root twist; q̇]`.
    fn generalized_velocity(&self, out: &mut DVector<f64>) {
        let base = self.base_dofs();
        if base > 0 {
            out.fixed_rows_mut::<6>(0).copy_from(&self.root_twist());
        }
        out.rows_mut(base, self.num_joints())
            .copy_from(self.joint_velocities());
    }

    /// Linear Jacobian (3×n) of a world point rigidly attached to `body`.
    ///
    /// `body_jacobian` is scratch space (6×n).
    fn point_jacobian(
        &self,
        body: BodyId,
        point: &Vector3<f64>,
        body_jacobian: &mut DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) {
        self.body_jacobian(body, body_jacobian);
        point_jacobian_from_body(body_jacobian, &self.body_position(body), point, out);
    }

    /// `J̇ q̇` for a world point rigidly attached to `body`.
    fn point_convective_term(&self, body: BodyId, point: &Vector3<f64>) -> Vector3<f64> {
        let r = point - self.body_position(body);
        let twist = self.body_twist(body);
        let bias = self.body_convective_term(body);
        let w = twist.fixed_rows::<3>(0).into_owned();
        let wdot = bias.fixed_rows::<3>(0).into_owned();
        bias.fixed_rows::<3>(3) + wdot.cross(&r) + w.cross(&w.cross(&r))
    }

    /// Recursive-Newton-Euler equivalent: `τ = M q̈ + h - Σ J_bᵀ w_b`.
    ///
    /// Wrenches are expressed at the origin of their body. For a floating
    /// base the first six entries of `tau` are the residual wrench the base
    /// would need, which is zero for a dynamically consistent solution.
    fn inverse_dynamics<'a>(
        &self,
        qdd: &DVector<f64>,
        wrenches: impl IntoIterator<Item = (BodyId, &'a Wrench)>,
        workspace: &mut DynamicsWorkspace,
        tau: &mut DVector<f64>,
    ) {
        self.mass_matrix(&mut workspace.mass_matrix);
        self.bias_forces(&mut workspace.bias);
        tau.copy_from(&workspace.bias);
        tau.gemv(1.0, &workspace.mass_matrix, qdd, 1.0);
        for (body, wrench) in wrenches {
            self.body_jacobian(body, &mut workspace.jacobian);
            let w = wrench.to_vector();
            tau.gemv_tr(-1.0, &workspace.jacobian, &w, 1.0);
        }
    }
}

/// Scratch storage for [`MultibodyModel::inverse_dynamics`].
#[derive(Debug, Clone)]
pub struct DynamicsWorkspace {
    pub mass_matrix: DMatrix<f64>,
    pub bias: DVector<f64>,
    pub jacobian: DMatrix<f64>,
}

impl DynamicsWorkspace {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            mass_matrix: DMatrix::zeros(num_dofs, num_dofs),
            bias: DVector::zeros(num_dofs),
            jacobian: DMatrix::zeros(6, num_dofs),
        }
    }
}

// ---------------------------------------------------------------------------
// Limb description
// ---------------------------------------------------------------------------

/// A joint of a [`Limb`], with its static transform from the parent frame.
#[derive(Debug, Clone)]
pub struct LimbJoint {
    pub info: JointInfo,
    /// Parent frame to joint frame at zero position.
    pub origin: Isometry3<f64>,
    /// Axis in the joint frame.
    pub axis: Unit<Vector3<f64>>,
    pub is_prismatic: bool,
    /// Reflected rotor inertia.
    pub armature: f64,
}

impl LimbJoint {
    pub fn revolute(name: impl Into<String>, offset: Vector3<f64>, axis: Vector3<f64>) -> Self {
        Self {
            info: JointInfo::new(name),
            origin: Isometry3::from_parts(Translation3::from(offset), UnitQuaternion::identity()),
            axis: Unit::new_normalize(axis),
            is_prismatic: false,
            armature: 0.0,
        }
    }

    pub fn prismatic(name: impl Into<String>, offset: Vector3<f64>, axis: Vector3<f64>) -> Self {
        Self {
            is_prismatic: true,
            ..Self::revolute(name, offset, axis)
        }
    }

    #[must_use]
    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.info = self.info.with_position_limits(lower, upper);
        self
    }

    #[must_use]
    pub fn with_velocity_limit(mut self, limit: f64) -> Self {
        self.info = self.info.with_velocity_limit(limit);
        self
    }

    #[must_use]
    pub fn with_effort_limit(mut self, limit: f64) -> Self {
        self.info = self.info.with_effort_limit(limit);
        self
    }

    #[must_use]
    pub const fn with_armature(mut self, armature: f64) -> Self {
        self.armature = armature;
        self
    }
}

/// A massless serial chain from the base to an end body (e.g. a foot).
#[derive(Debug, Clone)]
pub struct Limb {
    pub body_name: String,
    pub joints: Vec<LimbJoint>,
    /// Last joint frame to end body origin.
    pub end_offset: Isometry3<f64>,
}

impl Limb {
    pub fn new(body_name: impl Into<String>) -> Self {
        Self {
            body_name: body_name.into(),
            joints: Vec::new(),
            end_offset: Isometry3::identity(),
        }
    }

    #[must_use]
    pub fn joint(mut self, joint: LimbJoint) -> Self {
        self.joints.push(joint);
        self
    }

    #[must_use]
    pub fn end_offset(mut self, offset: Vector3<f64>) -> Self {
        self.end_offset = Isometry3::from_parts(Translation3::from(offset), UnitQuaternion::identity());
        self
    }
}

// ---------------------------------------------------------------------------
// CentroidalModel
// ---------------------------------------------------------------------------

/// Single rigid body at the center of mass with massless limbs.
///
/// The base origin coincides with the CoM. Limb joints carry only rotor
/// inertia (armature), so the joint-space inertia is block diagonal:
/// `M = diag(R I Rᵀ, m I₃, armature)`.
#[derive(Debug, Clone)]
pub struct CentroidalModel {
    floating: bool,
    mass: f64,
    inertia_body: Matrix3<f64>,
    gravity: f64,
    root_pose: Isometry3<f64>,
    root_twist: Vector6<f64>,

    limbs: Vec<Limb>,
    /// First joint index of each limb.
    limb_offsets: Vec<usize>,
    joint_infos: Vec<JointInfo>,
    armature: Vec<f64>,
    is_prismatic: Vec<bool>,
    q: DVector<f64>,
    qd: DVector<f64>,

    // Cached world-frame kinematics, refreshed on every state change.
    origins: Vec<Vector3<f64>>,
    axes: Vec<Vector3<f64>>,
    body_poses: Vec<Isometry3<f64>>,
}

impl CentroidalModel {
    /// Floating base with the given mass and body-frame inertia about the CoM.
    pub fn floating(mass: f64, inertia_body: Matrix3<f64>, gravity: f64) -> Self {
        Self {
            floating: true,
            mass,
            inertia_body,
            gravity,
            root_pose: Isometry3::identity(),
            root_twist: Vector6::zeros(),
            limbs: Vec::new(),
            limb_offsets: Vec::new(),
            joint_infos: Vec::new(),
            armature: Vec::new(),
            is_prismatic: Vec::new(),
            q: DVector::zeros(0),
            qd: DVector::zeros(0),
            origins: Vec::new(),
            axes: Vec::new(),
            body_poses: vec![Isometry3::identity()],
        }
    }

    /// Base welded to the world at the identity pose.
    pub fn fixed(gravity: f64) -> Self {
        Self {
            floating: false,
            ..Self::floating(0.0, Matrix3::zeros(), gravity)
        }
    }

    /// Attach a limb to the base. Returns the id of its end body.
    pub fn add_limb(&mut self, limb: Limb) -> BodyId {
        self.limb_offsets.push(self.joint_infos.len());
        for joint in &limb.joints {
            self.joint_infos.push(joint.info.clone());
            self.armature.push(joint.armature);
            self.is_prismatic.push(joint.is_prismatic);
            self.origins.push(Vector3::zeros());
            self.axes.push(Vector3::zeros());
        }
        self.limbs.push(limb);
        self.body_poses.push(Isometry3::identity());

        let n = self.joint_infos.len();
        self.q = DVector::zeros(n);
        self.qd = DVector::zeros(n);
        self.update_kinematics();
        BodyId(self.limbs.len())
    }

    #[must_use]
    pub fn with_limb(mut self, limb: Limb) -> Self {
        self.add_limb(limb);
        self
    }

    /// Body id of a named limb end body.
    pub fn body_id(&self, name: &str) -> Option<BodyId> {
        self.limbs
            .iter()
            .position(|l| l.body_name == name)
            .map(|i| BodyId(i + 1))
    }

    /// Joint index of a named joint.
    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.joint_infos.iter().position(|j| j.name == name)
    }

    pub fn inertia_world(&self) -> Matrix3<f64> {
        let r = self.root_pose.rotation.to_rotation_matrix();
        r.matrix() * self.inertia_body * r.matrix().transpose()
    }

    /// # Panics
    ///
    /// Panics if `q.len()` differs from the number of joints.
    pub fn set_joint_positions(&mut self, q: &[f64]) {
        self.q.copy_from_slice(q);
        self.update_kinematics();
    }

    /// # Panics
    ///
    /// Panics if `qd.len()` differs from the number of joints.
    pub fn set_joint_velocities(&mut self, qd: &[f64]) {
        self.qd.copy_from_slice(qd);
    }

    /// Ignored for a fixed base.
    pub fn set_root_pose(&mut self, pose: Isometry3<f64>) {
        if self.floating {
            self.root_pose = pose;
            self.update_kinematics();
        }
    }

    /// Ignored for a fixed base.
    pub fn set_root_twist(&mut self, twist: Vector6<f64>) {
        if self.floating {
            self.root_twist = twist;
        }
    }

    /// Semi-implicit Euler step of the full state.
    pub fn integrate(&mut self, qdd: &DVector<f64>, dt: f64) {
        let base = self.base_dofs();
        if self.floating {
            self.root_twist += qdd.fixed_rows::<6>(0) * dt;
            let w = self.root_twist.fixed_rows::<3>(0).into_owned();
            let v = self.root_twist.fixed_rows::<3>(3).into_owned();
            self.root_pose.translation.vector += v * dt;
            self.root_pose.rotation = UnitQuaternion::from_scaled_axis(w * dt) * self.root_pose.rotation;
        }
        for i in 0..self.q.len() {
            self.qd[i] += qdd[base + i] * dt;
            self.q[i] += self.qd[i] * dt;
        }
        self.update_kinematics();
    }

    fn update_kinematics(&mut self) {
        self.body_poses[0] = self.root_pose;
        for (k, limb) in self.limbs.iter().enumerate() {
            let offset = self.limb_offsets[k];
            let mut transform = self.root_pose;
            for (i, joint) in limb.joints.iter().enumerate() {
                transform *= joint.origin;
                self.origins[offset + i] = transform.translation.vector;
                self.axes[offset + i] = transform.rotation * joint.axis.into_inner();
                transform *= joint_transform(&joint.axis, joint.is_prismatic, self.q[offset + i]);
            }
            self.body_poses[k + 1] = transform * limb.end_offset;
        }
    }

    fn limb_range(&self, body: BodyId) -> Option<std::ops::Range<usize>> {
        let k = body.0.checked_sub(1)?;
        let limb = self.limbs.get(k)?;
        let start = self.limb_offsets[k];
        Some(start..start + limb.joints.len())
    }

    fn base_velocity(&self) -> (Vector3<f64>, Vector3<f64>) {
        (
            self.root_twist.fixed_rows::<3>(0).into_owned(),
            self.root_twist.fixed_rows::<3>(3).into_owned(),
        )
    }

    /// World velocity of a point carried by the frame just before joint `upto`
    /// of the chain `range`.
    fn chain_point_velocity(
        &self,
        range: &std::ops::Range<usize>,
        upto: usize,
        point: &Vector3<f64>,
    ) -> Vector3<f64> {
        let (w, v) = self.base_velocity();
        let c = self.root_pose.translation.vector;
        let mut vel = v + w.cross(&(point - c));
        for k in range.start..upto {
            if self.is_prismatic[k] {
                vel += self.axes[k] * self.qd[k];
            } else {
                vel += self.axes[k].cross(&(point - self.origins[k])) * self.qd[k];
            }
        }
        vel
    }
}

impl MultibodyModel for CentroidalModel {
    fn num_dofs(&self) -> usize {
        self.base_dofs() + self.joint_infos.len()
    }

    fn has_floating_base(&self) -> bool {
        self.floating
    }

    fn joints(&self) -> &[JointInfo] {
        &self.joint_infos
    }

    fn joint_positions(&self) -> &DVector<f64> {
        &self.q
    }

    fn joint_velocities(&self) -> &DVector<f64> {
        &self.qd
    }

    fn root_pose(&self) -> Isometry3<f64> {
        self.root_pose
    }

    fn root_twist(&self) -> Vector6<f64> {
        self.root_twist
    }

    fn total_mass(&self) -> f64 {
        self.mass
    }

    fn gravity(&self) -> f64 {
        self.gravity
    }

    fn center_of_mass(&self) -> Vector3<f64> {
        self.root_pose.translation.vector
    }

    fn mass_matrix(&self, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        let base = self.base_dofs();
        if self.floating {
            out.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.inertia_world());
            out.fixed_view_mut::<3, 3>(3, 3)
                .copy_from(&(Matrix3::identity() * self.mass));
        }
        for (i, &a) in self.armature.iter().enumerate() {
            out[(base + i, base + i)] = a;
        }
    }

    fn bias_forces(&self, out: &mut DVector<f64>) {
        out.fill(0.0);
        if self.floating {
            let (w, _) = self.base_velocity();
            let gyroscopic = w.cross(&(self.inertia_world() * w));
            out.fixed_rows_mut::<3>(0).copy_from(&gyroscopic);
            out[5] = self.mass * self.gravity;
        }
    }

    fn centroidal_momentum_matrix(&self, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        if self.floating {
            out.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.inertia_world());
            out.fixed_view_mut::<3, 3>(3, 3)
                .copy_from(&(Matrix3::identity() * self.mass));
        }
    }

    fn centroidal_convective_term(&self) -> Vector6<f64> {
        let mut out = Vector6::zeros();
        if self.floating {
            let (w, _) = self.base_velocity();
            out.fixed_rows_mut::<3>(0)
                .copy_from(&w.cross(&(self.inertia_world() * w)));
        }
        out
    }

    fn num_bodies(&self) -> usize {
        self.body_poses.len()
    }

    fn body_name(&self, body: BodyId) -> &str {
        match body.0 {
            0 => "base",
            k => self.limbs.get(k - 1).map_or("", |l| l.body_name.as_str()),
        }
    }

    fn body_pose(&self, body: BodyId) -> Isometry3<f64> {
        self.body_poses
            .get(body.0)
            .copied()
            .unwrap_or_else(Isometry3::identity)
    }

    fn body_jacobian(&self, body: BodyId, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        let p = self.body_position(body);
        if self.floating {
            let c = self.root_pose.translation.vector;
            out.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
            out.fixed_view_mut::<3, 3>(3, 0).copy_from(&(-skew(&(p - c))));
            out.fixed_view_mut::<3, 3>(3, 3).fill_with_identity();
        }
        if let Some(range) = self.limb_range(body) {
            chain_jacobian(
                &self.origins[range.clone()],
                &self.axes[range.clone()],
                &self.is_prismatic[range.clone()],
                &p,
                self.base_dofs() + range.start,
                out,
            );
        }
    }

    fn body_twist(&self, body: BodyId) -> Vector6<f64> {
        let (mut w, _) = self.base_velocity();
        let p = self.body_position(body);
        let range = self.limb_range(body).unwrap_or(0..0);
        for k in range.clone() {
            if !self.is_prismatic[k] {
                w += self.axes[k] * self.qd[k];
            }
        }
        let v = self.chain_point_velocity(&range, range.end, &p);
        let mut out = Vector6::zeros();
        out.fixed_rows_mut::<3>(0).copy_from(&w);
        out.fixed_rows_mut::<3>(3).copy_from(&v);
        out
    }

    fn body_convective_term(&self, body: BodyId) -> Vector6<f64> {
        let Some(range) = self.limb_range(body) else {
            // The base origin is the CoM: no velocity-product terms.
            return Vector6::zeros();
        };
        let (w_base, v_base) = self.base_velocity();
        let p = self.body_position(body);
        let p_dot = self.chain_point_velocity(&range, range.end, &p);

        let mut angular = Vector3::zeros();
        let mut linear = w_base.cross(&(p_dot - v_base));
        // Angular velocity of the frame each axis is fixed in.
        let mut w_frame = w_base;
        for k in range.clone() {
            let axis_dot = w_frame.cross(&self.axes[k]);
            if self.is_prismatic[k] {
                linear += axis_dot * self.qd[k];
            } else {
                let o_dot = self.chain_point_velocity(&range, k, &self.origins[k]);
                angular += axis_dot * self.qd[k];
                linear += (axis_dot.cross(&(p - self.origins[k]))
                    + self.axes[k].cross(&(p_dot - o_dot)))
                    * self.qd[k];
                w_frame += self.axes[k] * self.qd[k];
            }
        }
        let mut out = Vector6::zeros();
        out.fixed_rows_mut::<3>(0).copy_from(&angular);
        out.fixed_rows_mut::<3>(3).copy_from(&linear);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_link_robot() -> CentroidalModel {
        let leg = Limb::new("foot")
            .joint(
                LimbJoint::revolute("hip", Vector3::new(0.1, 0.0, -0.1), Vector3::y())
                    .with_limits(-1.0, 1.0)
                    .with_armature(0.01),
            )
            .joint(
                LimbJoint::revolute("knee", Vector3::new(0.0, 0.0, -0.3), Vector3::y())
                    .with_limits(-2.0, 0.0)
                    .with_armature(0.01),
            )
            .end_offset(Vector3::new(0.0, 0.0, -0.3));
        CentroidalModel::floating(10.0, Matrix3::from_diagonal(&Vector3::new(0.1, 0.2, 0.3)), 9.81)
            .with_limb(leg)
    }

    fn moving(model: &mut CentroidalModel) {
        model.set_joint_positions(&[0.3, -0.7]);
        model.set_joint_velocities(&[0.8, -1.3]);
        model.set_root_pose(Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.6),
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
        ));
        model.set_root_twist(Vector6::new(0.4, -0.2, 0.6, 0.3, 0.1, -0.2));
    }

    #[test]
    fn dimensions() {
        let model = two_link_robot();
        assert_eq!(model.num_dofs(), 8);
        assert_eq!(model.base_dofs(), 6);
        assert_eq!(model.num_joints(), 2);
        assert_eq!(model.num_bodies(), 2);
        assert_eq!(model.body_id("foot"), Some(BodyId(1)));
        assert_eq!(model.joint_index("knee"), Some(1));
        assert_eq!(model.joint_dof_index(1), 7);
        assert_eq!(model.body_name(BodyId::ROOT), "base");
    }

    #[test]
    fn forward_kinematics_at_zero() {
        let model = two_link_robot();
        // base at origin, foot straight below the hip
        assert_relative_eq!(
            model.body_position(BodyId(1)),
            Vector3::new(0.1, 0.0, -0.7),
            epsilon = 1e-12
        );
    }

    #[test]
    fn jacobian_matches_twist() {
        let mut model = two_link_robot();
        moving(&mut model);
        let n = model.num_dofs();
        let mut j = DMatrix::zeros(6, n);
        let mut qd = DVector::zeros(n);
        model.body_jacobian(BodyId(1), &mut j);
        model.generalized_velocity(&mut qd);
        let twist = &j * &qd;
        let expected = model.body_twist(BodyId(1));
        for i in 0..6 {
            assert_relative_eq!(twist[i], expected[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn jacobian_matches_finite_difference_of_position() {
        let mut model = two_link_robot();
        moving(&mut model);
        let n = model.num_dofs();
        let mut j = DMatrix::zeros(6, n);
        model.body_jacobian(BodyId(1), &mut j);

        // perturb the knee only
        let h = 1e-7;
        let p0 = model.body_position(BodyId(1));
        let q = model.joint_positions().clone();
        model.set_joint_positions(&[q[0], q[1] + h]);
        let p1 = model.body_position(BodyId(1));
        let fd = (p1 - p0) / h;
        for r in 0..3 {
            assert_relative_eq!(j[(3 + r, 7)], fd[r], epsilon = 1e-5);
        }
    }

    #[test]
    fn convective_term_matches_finite_difference() {
        let mut model = two_link_robot();
        moving(&mut model);
        let body = BodyId(1);
        let bias = model.body_convective_term(body);

        // Zero generalized acceleration: the twist changes by J̇q̇ only.
        let h = 1e-6;
        let mut forward = model.clone();
        forward.integrate_exact_velocity(h);
        let mut backward = model.clone();
        backward.integrate_exact_velocity(-h);
        let fd = (forward.body_twist(body) - backward.body_twist(body)) / (2.0 * h);
        for i in 0..6 {
            assert_relative_eq!(bias[i], fd[i], epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn point_convective_term_on_spinning_base() {
        // Pure spin about z: a point at radius r has centripetal acceleration -w² r.
        let mut model = CentroidalModel::floating(1.0, Matrix3::identity(), 0.0);
        model.set_root_twist(Vector6::new(0.0, 0.0, 2.0, 0.0, 0.0, 0.0));
        let a = model.point_convective_term(BodyId::ROOT, &Vector3::new(0.5, 0.0, 0.0));
        assert_relative_eq!(a, Vector3::new(-2.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn inverse_dynamics_static_support_has_zero_residual() {
        let model = two_link_robot();
        let n = model.num_dofs();
        let mut ws = DynamicsWorkspace::new(n);
        let mut tau = DVector::zeros(n);
        let qdd = DVector::zeros(n);

        // Foot is 0.1 m in front of the CoM: support the weight there and
        // cancel the resulting pitch moment with a couple at the foot.
        let weight = 10.0 * 9.81;
        let foot = Wrench::new(
            Vector3::new(0.0, 0.1 * weight, 0.0),
            Vector3::new(0.0, 0.0, weight),
        );
        model.inverse_dynamics(&qdd, [(BodyId(1), &foot)], &mut ws, &mut tau);
        for i in 0..6 {
            assert_relative_eq!(tau[i], 0.0, epsilon = 1e-9);
        }
        // The couple about y goes straight through both pitch joints.
        assert_relative_eq!(tau[6], -0.1 * weight, epsilon = 1e-9);
        assert_relative_eq!(tau[7], -0.1 * weight, epsilon = 1e-9);
    }

    #[test]
    fn fixed_base_has_no_base_dofs() {
        let model = CentroidalModel::fixed(9.81).with_limb(
            Limb::new("tool").joint(LimbJoint::revolute("j0", Vector3::zeros(), Vector3::z())),
        );
        assert_eq!(model.num_dofs(), 1);
        let mut a = DMatrix::from_element(6, 1, 1.0);
        model.centroidal_momentum_matrix(&mut a);
        assert_relative_eq!(a.norm(), 0.0);
        let mut h = DVector::from_element(1, 1.0);
        model.bias_forces(&mut h);
        assert_relative_eq!(h[0], 0.0);
    }

    #[test]
    fn integrate_moves_base_and_joints() {
        let mut model = two_link_robot();
        let mut qdd = DVector::zeros(8);
        qdd[5] = 1.0;
        qdd[6] = 2.0;
        model.integrate(&qdd, 0.1);
        assert_relative_eq!(model.root_twist()[5], 0.1, epsilon = 1e-12);
        assert_relative_eq!(model.root_pose().translation.vector.z, 0.01, epsilon = 1e-12);
        assert_relative_eq!(model.joint_velocities()[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(model.joint_positions()[0], 0.02, epsilon = 1e-12);
    }

    impl CentroidalModel {
        /// Advance positions along the current velocity without changing it.
        fn integrate_exact_velocity(&mut self, dt: f64) {
            let (w, v) = self.base_velocity();
            self.root_pose.translation.vector += v * dt;
            self.root_pose.rotation = UnitQuaternion::from_scaled_axis(w * dt) * self.root_pose.rotation;
            for i in 0..self.q.len() {
                self.q[i] += self.qd[i] * dt;
            }
            self.update_kinematics();
        }
    }
}
