//! Contact wrench calculator.
//!
//! Every registered contactable body owns a fixed set of contact points,
//! each approximating its friction cone with `K` non-negative basis vectors.
//! The coefficients of those vectors ("rho") are the contact part of the QP
//! decision vector. The rho layout is fixed at construction; points that are
//! not in contact keep their slots but are bounded to zero.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector, Point3, UnitQuaternion, Vector3};
use tracing::debug;
use wbc_core::{CommandError, ConstraintType, Wrench};

use crate::command::{CenterOfPressureCommand, ContactWrenchCommand, PlaneContactStateCommand};
use crate::kinematics::skew;
use crate::model::{BodyId, MultibodyModel};
use crate::qp_input::{QpInput, QpInputDomain};

/// Normal force below which a body reports no center of pressure.
pub const MIN_NORMAL_FORCE_FOR_COP: f64 = 1e-3;

/// A body that can touch the environment through a set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactablePlaneBody {
    pub name: String,
    pub body: BodyId,
    /// Contact point positions in the body frame.
    pub points: Vec<Vector3<f64>>,
}

impl ContactablePlaneBody {
    pub fn new(name: impl Into<String>, body: BodyId, points: Vec<Vector3<f64>>) -> Self {
        Self {
            name: name.into(),
            body,
            points,
        }
    }

    /// Four corners of a rectangular sole centered under the body origin.
    pub fn rectangular_sole(
        name: impl Into<String>,
        body: BodyId,
        half_length: f64,
        half_width: f64,
    ) -> Self {
        Self::new(
            name,
            body,
            vec![
                Vector3::new(half_length, half_width, 0.0),
                Vector3::new(half_length, -half_width, 0.0),
                Vector3::new(-half_length, -half_width, 0.0),
                Vector3::new(-half_length, half_width, 0.0),
            ],
        )
    }
}

/// Rotation taking +z onto `normal`.
pub fn rotation_to_normal(normal: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::rotation_between(&Vector3::z(), normal).unwrap_or_else(|| {
        // antiparallel: any half turn about a horizontal axis
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI)
    })
}

/// Friction cone basis vector `k` of `count`, for a contact with normal
/// frame `rotation` and friction coefficient `mu`.
pub fn basis_vector(rotation: &UnitQuaternion<f64>, mu: f64, k: usize, count: usize) -> Vector3<f64> {
    #[allow(clippy::cast_precision_loss)]
    let angle = 2.0 * PI * k as f64 / count as f64;
    let local = Vector3::new(mu * angle.cos(), mu * angle.sin(), 1.0).normalize();
    rotation * local
}

/// Center of pressure of a wrench on a plane through `plane_point`.
///
/// `wrench` is expressed at `wrench_point`. Returns `None` when the normal
/// force is too small for the CoP to be meaningful.
pub fn center_of_pressure(
    wrench: &Wrench,
    wrench_point: &Vector3<f64>,
    plane_point: &Vector3<f64>,
    normal: &Vector3<f64>,
) -> Option<Vector3<f64>> {
    let normal_force = normal.dot(&wrench.force);
    if normal_force < MIN_NORMAL_FORCE_FOR_COP {
        return None;
    }
    let at_plane = wrench.shift(&(plane_point - wrench_point));
    Some(plane_point + normal.cross(&at_plane.torque) / normal_force)
}

#[derive(Debug, Clone)]
struct BodyContactState {
    friction: f64,
    normal: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
    in_contact: bool,
}

impl Default for BodyContactState {
    fn default() -> Self {
        Self {
            friction: 0.0,
            normal: Vector3::z(),
            rotation: UnitQuaternion::identity(),
            in_contact: false,
        }
    }
}

/// Turns per-tick contact states into the rho part of the QP.
#[derive(Debug, Clone)]
pub struct ContactWrenchCalculator {
    bodies: Vec<ContactablePlaneBody>,
    basis_per_point: usize,
    /// First global point index of each body.
    point_offsets: Vec<usize>,
    num_points: usize,

    body_state: Vec<BodyContactState>,
    point_active: Vec<bool>,
    previous_point_active: Vec<bool>,
    point_max_force: Vec<f64>,

    // Per-rho geometry, world frame.
    rho_points: Vec<Vector3<f64>>,
    basis_vectors: Vec<Vector3<f64>>,

    rho_jacobian: DMatrix<f64>,
    contact_force_jacobian_t: DMatrix<f64>,
    rho_min: DVector<f64>,
    rho_max: DVector<f64>,
    previous_rho: DVector<f64>,

    wrenches: Vec<Wrench>,
    centers_of_pressure: Vec<Option<Vector3<f64>>>,
    previous_cop: Vec<Option<Vector3<f64>>>,

    body_jacobian: DMatrix<f64>,
    point_jacobian: DMatrix<f64>,
}

impl ContactWrenchCalculator {
    pub fn new(bodies: Vec<ContactablePlaneBody>, basis_per_point: usize, num_dofs: usize) -> Self {
        let mut point_offsets = Vec::with_capacity(bodies.len());
        let mut num_points = 0;
        for body in &bodies {
            point_offsets.push(num_points);
            num_points += body.points.len();
        }
        let num_rhos = num_points * basis_per_point;
        let num_bodies = bodies.len();
        Self {
            bodies,
            basis_per_point,
            point_offsets,
            num_points,
            body_state: vec![BodyContactState::default(); num_bodies],
            point_active: vec![false; num_points],
            previous_point_active: vec![false; num_points],
            point_max_force: vec![f64::INFINITY; num_points],
            rho_points: vec![Vector3::zeros(); num_rhos],
            basis_vectors: vec![Vector3::z(); num_rhos],
            rho_jacobian: DMatrix::zeros(6, num_rhos),
            contact_force_jacobian_t: DMatrix::zeros(num_dofs, num_rhos),
            rho_min: DVector::zeros(num_rhos),
            rho_max: DVector::zeros(num_rhos),
            previous_rho: DVector::zeros(num_rhos),
            wrenches: vec![Wrench::zero(); num_bodies],
            centers_of_pressure: vec![None; num_bodies],
            previous_cop: vec![None; num_bodies],
            body_jacobian: DMatrix::zeros(6, num_dofs),
            point_jacobian: DMatrix::zeros(3, num_dofs),
        }
    }

    pub fn num_rhos(&self) -> usize {
        self.num_points * self.basis_per_point
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn basis_per_point(&self) -> usize {
        self.basis_per_point
    }

    pub fn bodies(&self) -> &[ContactablePlaneBody] {
        &self.bodies
    }

    /// Index of the contactable body attached to `body`.
    pub fn contactable_index(&self, body: BodyId) -> Option<usize> {
        self.bodies.iter().position(|b| b.body == body)
    }

    fn rho_range(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.point_offsets[index] * self.basis_per_point;
        start..start + self.bodies[index].points.len() * self.basis_per_point
    }

    /// Start of a tick: every point lifted until a contact state says otherwise.
    pub fn reset(&mut self) {
        self.point_active.fill(false);
        self.point_max_force.fill(f64::INFINITY);
        for state in &mut self.body_state {
            *state = BodyContactState::default();
        }
    }

    /// Record a contact state. The command must list every point of the body.
    pub fn submit_plane_contact_state(
        &mut self,
        command: &PlaneContactStateCommand,
    ) -> Result<(), CommandError> {
        let index = self
            .contactable_index(command.body)
            .ok_or(CommandError::UnknownContactableBody(command.body.0))?;
        let expected = self.bodies[index].points.len();
        if command.points.len() != expected {
            return Err(CommandError::DimensionMismatch {
                what: "contact points",
                expected,
                got: command.points.len(),
            });
        }
        let normal = command
            .contact_normal
            .try_normalize(1e-9)
            .unwrap_or_else(Vector3::z);
        let offset = self.point_offsets[index];
        for (i, point) in command.points.iter().enumerate() {
            self.point_active[offset + i] = point.in_contact;
            self.point_max_force[offset + i] = point.max_normal_force;
        }
        self.body_state[index] = BodyContactState {
            friction: command.coefficient_of_friction.max(0.0),
            normal,
            rotation: rotation_to_normal(&normal),
            in_contact: command.is_in_contact(),
        };
        Ok(())
    }

    /// Whether the set of active points differs from the previous tick.
    pub fn has_contact_set_changed(&self) -> bool {
        self.point_active != self.previous_point_active
    }

    pub fn is_body_in_contact(&self, index: usize) -> bool {
        self.body_state[index].in_contact
    }

    /// Recompute basis vectors, Jacobians and rho bounds for the current state.
    ///
    /// The rho Jacobian maps to the wrench about the model's center of mass.
    pub fn compute(&mut self, model: &impl MultibodyModel, rho_min: f64) {
        let com = model.center_of_mass();
        let k_count = self.basis_per_point;
        self.rho_jacobian.fill(0.0);
        self.contact_force_jacobian_t.fill(0.0);

        for index in 0..self.bodies.len() {
            let pose = model.body_pose(self.bodies[index].body);
            let state = &self.body_state[index];
            for (i, local) in self.bodies[index].points.iter().enumerate() {
                let point_index = self.point_offsets[index] + i;
                let world = pose * Point3::from(*local);
                let active = self.point_active[point_index];

                if active {
                    model.point_jacobian(
                        self.bodies[index].body,
                        &world.coords,
                        &mut self.body_jacobian,
                        &mut self.point_jacobian,
                    );
                }

                for k in 0..k_count {
                    let rho = point_index * k_count + k;
                    let b = basis_vector(&state.rotation, state.friction, k, k_count);
                    self.rho_points[rho] = world.coords;
                    self.basis_vectors[rho] = b;

                    if !active {
                        self.rho_min[rho] = 0.0;
                        self.rho_max[rho] = 0.0;
                        continue;
                    }
                    let moment = (world.coords - com).cross(&b);
                    let mut col = self.rho_jacobian.column_mut(rho);
                    col.fixed_rows_mut::<3>(0).copy_from(&moment);
                    col.fixed_rows_mut::<3>(3).copy_from(&b);

                    self.contact_force_jacobian_t
                        .column_mut(rho)
                        .gemv_tr(1.0, &self.point_jacobian, &b, 0.0);

                    #[allow(clippy::cast_precision_loss)]
                    let per_vector = self.point_max_force[point_index]
                        / (k_count as f64 * state.normal.dot(&b));
                    self.rho_max[rho] = per_vector.max(0.0);
                    self.rho_min[rho] = rho_min.max(0.0).min(self.rho_max[rho]);
                }
            }
        }
    }

    /// 6×ρ map from rho to the total contact wrench about the center of mass.
    pub fn rho_jacobian(&self) -> &DMatrix<f64> {
        &self.rho_jacobian
    }

    /// n×ρ map from rho to generalized contact forces.
    pub fn contact_force_jacobian_t(&self) -> &DMatrix<f64> {
        &self.contact_force_jacobian_t
    }

    pub fn rho_min(&self) -> &DVector<f64> {
        &self.rho_min
    }

    pub fn rho_max(&self) -> &DVector<f64> {
        &self.rho_max
    }

    pub fn previous_rho(&self) -> &DVector<f64> {
        &self.previous_rho
    }

    /// Moment rows about `reference` on the two plane tangents of body `index`.
    fn moment_rows(&self, index: usize, reference: &Vector3<f64>, out: &mut QpInput) {
        out.reshape(2, self.num_rhos());
        out.domain = QpInputDomain::Rho;
        out.constraint = ConstraintType::Objective;
        let rotation = self.body_state[index].rotation;
        let tangents = [rotation * Vector3::x(), rotation * Vector3::y()];
        for rho in self.rho_range(index) {
            let moment = (self.rho_points[rho] - reference).cross(&self.basis_vectors[rho]);
            for (row, t) in tangents.iter().enumerate() {
                out.jacobian[(row, rho)] = moment.dot(t);
            }
        }
    }

    fn active_centroid(&self, index: usize) -> Option<Vector3<f64>> {
        let offset = self.point_offsets[index];
        let mut sum = Vector3::zeros();
        let mut count = 0_u32;
        for i in 0..self.bodies[index].points.len() {
            if self.point_active[offset + i] {
                sum += self.rho_points[(offset + i) * self.basis_per_point];
                count += 1;
            }
        }
        (count > 0).then(|| sum / f64::from(count))
    }

    /// Pull the CoP of body `index` toward the centroid of its active points.
    pub fn cop_regularization(&self, index: usize, weight: f64, out: &mut QpInput) -> bool {
        let Some(centroid) = self.active_centroid(index) else {
            return false;
        };
        self.moment_rows(index, &centroid, out);
        out.set_uniform_weight(weight);
        true
    }

    /// Keep the CoP of body `index` close to where it was last tick.
    pub fn cop_rate_regularization(&self, index: usize, weight: f64, out: &mut QpInput) -> bool {
        if !self.body_state[index].in_contact {
            return false;
        }
        let Some(previous) = self.previous_cop[index] else {
            return false;
        };
        self.moment_rows(index, &previous, out);
        out.set_uniform_weight(weight);
        true
    }

    /// `ρ ≈ ρ_prev`.
    pub fn rho_rate_regularization(&self, weight: f64, out: &mut QpInput) -> bool {
        let r = self.num_rhos();
        if r == 0 {
            return false;
        }
        out.reshape(r, r);
        out.domain = QpInputDomain::Rho;
        out.constraint = ConstraintType::Objective;
        out.jacobian.fill_with_identity();
        out.objective.copy_from(&self.previous_rho);
        out.set_uniform_weight(weight);
        true
    }

    pub fn center_of_pressure_input(
        &self,
        command: &CenterOfPressureCommand,
        out: &mut QpInput,
    ) -> Result<bool, CommandError> {
        let index = self
            .contactable_index(command.body)
            .ok_or(CommandError::UnknownContactableBody(command.body.0))?;
        if !self.body_state[index].in_contact {
            return Ok(false);
        }
        self.moment_rows(index, &command.desired, out);
        out.set_uniform_weight(command.weight);
        Ok(true)
    }

    /// Rows mapping rho to the wrench of one body about its origin.
    pub fn contact_wrench_input(
        &self,
        model: &impl MultibodyModel,
        command: &ContactWrenchCommand,
        out: &mut QpInput,
    ) -> Result<bool, CommandError> {
        let index = self
            .contactable_index(command.body)
            .ok_or(CommandError::UnknownContactableBody(command.body.0))?;
        let rows = command.selection.iter().filter(|&&s| s).count();
        if rows == 0 {
            return Ok(false);
        }
        out.reshape(rows, self.num_rhos());
        out.domain = QpInputDomain::Rho;
        out.constraint = command.constraint;
        let origin = model.body_position(command.body);
        let target = command.wrench.to_vector();
        for rho in self.rho_range(index) {
            let b = self.basis_vectors[rho];
            let moment = (self.rho_points[rho] - origin).cross(&b);
            let full = [moment.x, moment.y, moment.z, b.x, b.y, b.z];
            let mut row = 0;
            for (axis, value) in full.iter().enumerate() {
                if command.selection[axis] {
                    out.jacobian[(row, rho)] = *value;
                    row += 1;
                }
            }
        }
        let mut row = 0;
        for axis in 0..6 {
            if command.selection[axis] {
                out.objective[row] = target[axis];
                out.weights[row] = command.weights[axis];
                row += 1;
            }
        }
        Ok(true)
    }

    /// Forward-map a solved rho into per-body wrenches at the body origins and
    /// their centers of pressure, and remember it for rate regularization.
    pub fn update_from_rho(&mut self, model: &impl MultibodyModel, rho: &DVector<f64>) {
        for index in 0..self.bodies.len() {
            let origin = model.body_position(self.bodies[index].body);
            let mut wrench = Wrench::zero();
            for r in self.rho_range(index) {
                let force = self.basis_vectors[r] * rho[r];
                wrench.force += force;
                wrench.torque += skew(&(self.rho_points[r] - origin)) * force;
            }
            self.wrenches[index] = wrench;

            let plane_point = self.active_centroid(index);
            self.centers_of_pressure[index] = plane_point.and_then(|p| {
                center_of_pressure(&wrench, &origin, &p, &self.body_state[index].normal)
            });
        }
        self.previous_rho.copy_from(rho);
    }

    /// End of a tick: the current contact set and CoPs become the reference
    /// for change detection and rate regularization.
    pub fn finish_tick(&mut self) {
        if self.has_contact_set_changed() {
            debug!("Contact set changed");
        }
        self.previous_point_active.copy_from_slice(&self.point_active);
        self.previous_cop.clone_from(&self.centers_of_pressure);
    }

    pub fn wrench(&self, index: usize) -> &Wrench {
        &self.wrenches[index]
    }

    pub fn wrenches(&self) -> &[Wrench] {
        &self.wrenches
    }

    pub fn centers_of_pressure(&self) -> &[Option<Vector3<f64>>] {
        &self.centers_of_pressure
    }

    /// Drop the rho history, e.g. after the controller was idle.
    pub fn clear_history(&mut self) {
        self.previous_rho.fill(0.0);
        self.previous_cop.fill(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ContactPointState;
    use crate::model::{CentroidalModel, Limb, LimbJoint};
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Matrix3, Translation3, Vector6};

    fn standing() -> (CentroidalModel, ContactWrenchCalculator) {
        let mut model = CentroidalModel::floating(10.0, Matrix3::identity() * 0.1, 9.81)
            .with_limb(
                Limb::new("foot")
                    .joint(LimbJoint::revolute("hip", Vector3::zeros(), Vector3::y()))
                    .end_offset(Vector3::new(0.0, 0.0, -0.5)),
            );
        model.set_root_pose(Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.5),
            UnitQuaternion::identity(),
        ));
        let n = model.num_dofs();
        let calc = ContactWrenchCalculator::new(
            vec![ContactablePlaneBody::rectangular_sole("foot", BodyId(1), 0.1, 0.05)],
            4,
            n,
        );
        (model, calc)
    }

    #[test]
    fn basis_vectors_lie_on_friction_cone() {
        let rot = rotation_to_normal(&Vector3::z());
        for k in 0..4 {
            let b = basis_vector(&rot, 0.5, k, 4);
            assert_relative_eq!(b.norm(), 1.0, epsilon = 1e-12);
            let tangential = (b.x * b.x + b.y * b.y).sqrt();
            assert_relative_eq!(tangential / b.z, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn rotation_to_downward_normal_is_valid() {
        let rot = rotation_to_normal(&(-Vector3::z()));
        assert_relative_eq!(rot * Vector3::z(), -Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn layout_is_fixed_and_inactive_points_are_masked() {
        let (model, mut calc) = standing();
        assert_eq!(calc.num_rhos(), 16);
        calc.reset();
        calc.compute(&model, 0.0);
        assert_relative_eq!(calc.rho_max().norm(), 0.0);
        assert_relative_eq!(calc.rho_jacobian().norm(), 0.0);
    }

    #[test]
    fn rho_max_follows_max_normal_force() {
        let (model, mut calc) = standing();
        calc.reset();
        let mut cmd = PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.5);
        cmd.points[0].max_normal_force = 100.0;
        calc.submit_plane_contact_state(&cmd).unwrap();
        calc.compute(&model, 0.0);
        // normal component of each basis vector is 1/sqrt(1 + mu^2)
        let expected = 100.0 / (4.0 / (1.0_f64 + 0.25).sqrt());
        assert_relative_eq!(calc.rho_max()[0], expected, epsilon = 1e-9);
        assert!(calc.rho_max()[4].is_infinite());
    }

    #[test]
    fn rho_min_is_never_negative() {
        let (model, mut calc) = standing();
        calc.reset();
        let mut cmd = PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.5);
        cmd.points[0].max_normal_force = 100.0;
        calc.submit_plane_contact_state(&cmd).unwrap();

        calc.compute(&model, -50.0);
        assert_relative_eq!(calc.rho_min().norm(), 0.0);

        calc.compute(&model, 2.0);
        assert_relative_eq!(calc.rho_min()[4], 2.0);
    }

    #[test]
    fn unknown_contactable_body_is_rejected() {
        let (_, mut calc) = standing();
        let cmd = PlaneContactStateCommand::in_contact(BodyId::ROOT, 4, 0.5);
        assert_eq!(
            calc.submit_plane_contact_state(&cmd),
            Err(CommandError::UnknownContactableBody(0))
        );
        let cmd = PlaneContactStateCommand::in_contact(BodyId(1), 3, 0.5);
        assert!(matches!(
            calc.submit_plane_contact_state(&cmd),
            Err(CommandError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn uniform_rho_maps_to_vertical_force_under_the_foot() {
        let (model, mut calc) = standing();
        calc.reset();
        calc.submit_plane_contact_state(&PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.5))
            .unwrap();
        calc.compute(&model, 0.0);

        let rho = DVector::from_element(16, 2.0);
        let wrench_com = calc.rho_jacobian() * &rho;
        // horizontal components cancel, symmetric sole gives no moment
        let vertical = 16.0 * 2.0 / 1.25_f64.sqrt();
        assert_relative_eq!(wrench_com[5], vertical, epsilon = 1e-9);
        assert_relative_eq!(wrench_com[3], 0.0, epsilon = 1e-9);
        assert_relative_eq!(wrench_com[0], 0.0, epsilon = 1e-9);

        calc.update_from_rho(&model, &rho);
        assert_relative_eq!(calc.wrench(0).force.z, vertical, epsilon = 1e-9);
        let cop = calc.centers_of_pressure()[0].unwrap();
        assert_relative_eq!(cop, Vector3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn contact_change_detection() {
        let (model, mut calc) = standing();
        calc.reset();
        calc.submit_plane_contact_state(&PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.5))
            .unwrap();
        calc.compute(&model, 0.0);
        assert!(calc.has_contact_set_changed());
        calc.finish_tick();

        calc.reset();
        calc.submit_plane_contact_state(&PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.5))
            .unwrap();
        assert!(!calc.has_contact_set_changed());
        calc.finish_tick();

        calc.reset();
        let mut cmd = PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.5);
        cmd.points[2] = ContactPointState {
            in_contact: false,
            max_normal_force: 0.0,
        };
        calc.submit_plane_contact_state(&cmd).unwrap();
        assert!(calc.has_contact_set_changed());
        assert!(calc.is_body_in_contact(0));

        calc.reset();
        assert!(!calc.is_body_in_contact(0));
    }

    #[test]
    fn cop_regularization_rows_vanish_for_centered_force() {
        let (model, mut calc) = standing();
        calc.reset();
        calc.submit_plane_contact_state(&PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.5))
            .unwrap();
        calc.compute(&model, 0.0);
        let mut input = QpInput::new(0, 0);
        assert!(calc.cop_regularization(0, 2.0, &mut input));
        assert_eq!(input.jacobian.shape(), (2, 16));
        let rho = DVector::from_element(16, 1.0);
        let moments = &input.jacobian * rho;
        assert_relative_eq!(moments.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(input.weights[1], 2.0);
    }

    #[test]
    fn contact_wrench_rows_match_forward_map() {
        let (model, mut calc) = standing();
        calc.reset();
        calc.submit_plane_contact_state(&PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.8))
            .unwrap();
        calc.compute(&model, 0.0);
        let cmd = ContactWrenchCommand {
            body: BodyId(1),
            wrench: Wrench::zero(),
            weights: Vector6::repeat(1.0),
            selection: [true; 6],
            constraint: ConstraintType::Objective,
        };
        let mut input = QpInput::new(0, 0);
        assert!(calc.contact_wrench_input(&model, &cmd, &mut input).unwrap());
        let rho = DVector::from_fn(16, |i, _| 0.1 * (i + 1) as f64);
        let rows = &input.jacobian * &rho;
        calc.update_from_rho(&model, &rho);
        let w = calc.wrench(0).to_vector();
        for i in 0..6 {
            assert_relative_eq!(rows[i], w[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn center_of_pressure_formula() {
        // 10 N down-pressing force applied at (0.05, 0, 0), reported at the origin.
        let at_point = Wrench::from_force(Vector3::new(0.0, 0.0, 10.0));
        let at_origin = at_point.shift(&(Vector3::zeros() - Vector3::new(0.05, 0.0, 0.0)));
        let cop = center_of_pressure(&at_origin, &Vector3::zeros(), &Vector3::zeros(), &Vector3::z())
            .unwrap();
        assert_relative_eq!(cop, Vector3::new(0.05, 0.0, 0.0), epsilon = 1e-12);

        let tiny = Wrench::from_force(Vector3::new(0.0, 0.0, 1e-6));
        assert!(center_of_pressure(&tiny, &Vector3::zeros(), &Vector3::zeros(), &Vector3::z()).is_none());
    }
}
