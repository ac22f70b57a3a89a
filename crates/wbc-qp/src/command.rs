//! Typed commands submitted to the controller core once per tick.
//!
//! Every command kind is a variant of a closed sum type per strategy, so
//! routing is an exhaustive `match`. Commands validate their own payload
//! against the model before the core accepts them.

use nalgebra::{DMatrix, DVector, Vector3, Vector6};
use wbc_core::{CommandError, ConstraintType, ControlMode, LowLevelOutput, PrivilegedOption, Wrench};

use crate::model::{BodyId, MultibodyModel};

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn check_joint(model: &impl MultibodyModel, joint: usize) -> Result<(), CommandError> {
    let count = model.num_joints();
    if joint < count {
        Ok(())
    } else {
        Err(CommandError::UnknownJoint {
            index: joint,
            count,
        })
    }
}

fn check_body(model: &impl MultibodyModel, body: BodyId) -> Result<(), CommandError> {
    if body.0 < model.num_bodies() {
        Ok(())
    } else {
        Err(CommandError::UnknownBody(body.0))
    }
}

fn check_finite<'a>(
    values: impl IntoIterator<Item = &'a f64>,
    what: &'static str,
) -> Result<(), CommandError> {
    if values.into_iter().any(|v| v.is_nan()) {
        Err(CommandError::ContainsNan(what))
    } else {
        Ok(())
    }
}

const ALL_AXES: [bool; 6] = [true; 6];

// ---------------------------------------------------------------------------
// Motion commands
// ---------------------------------------------------------------------------

/// Desired spatial acceleration `[ω̇, a]` of a body origin, world-aligned axes.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialAccelerationCommand {
    pub body: BodyId,
    pub desired: Vector6<f64>,
    pub weights: Vector6<f64>,
    /// Axes that produce rows, angular first.
    pub selection: [bool; 6],
    pub constraint: ConstraintType,
}

impl SpatialAccelerationCommand {
    pub fn objective(body: BodyId, desired: Vector6<f64>, weight: f64) -> Self {
        Self {
            body,
            desired,
            weights: Vector6::repeat(weight),
            selection: ALL_AXES,
            constraint: ConstraintType::Objective,
        }
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        check_finite(self.desired.iter().chain(self.weights.iter()), "spatial acceleration")
    }
}

/// Desired linear acceleration of a world point rigidly attached to a body.
#[derive(Debug, Clone, PartialEq)]
pub struct PointAccelerationCommand {
    pub body: BodyId,
    pub point: Vector3<f64>,
    pub desired: Vector3<f64>,
    pub weights: Vector3<f64>,
    pub selection: [bool; 3],
    pub constraint: ConstraintType,
}

impl PointAccelerationCommand {
    pub fn objective(body: BodyId, point: Vector3<f64>, desired: Vector3<f64>, weight: f64) -> Self {
        Self {
            body,
            point,
            desired,
            weights: Vector3::repeat(weight),
            selection: [true; 3],
            constraint: ConstraintType::Objective,
        }
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        check_finite(
            self.point
                .iter()
                .chain(self.desired.iter())
                .chain(self.weights.iter()),
            "point acceleration",
        )
    }
}

/// One joint entry of a jointspace command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointValue {
    pub joint: usize,
    pub value: f64,
    pub weight: f64,
}

impl JointValue {
    pub const fn new(joint: usize, value: f64, weight: f64) -> Self {
        Self {
            joint,
            value,
            weight,
        }
    }
}

fn validate_joint_values(
    model: &impl MultibodyModel,
    entries: &[JointValue],
    what: &'static str,
) -> Result<(), CommandError> {
    for e in entries {
        check_joint(model, e.joint)?;
        check_finite([&e.value, &e.weight], what)?;
    }
    Ok(())
}

/// Desired joint accelerations.
///
/// Objective and equality entries become QP rows; inequality entries tighten
/// the joint acceleration bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct JointspaceAccelerationCommand {
    pub entries: Vec<JointValue>,
    pub constraint: ConstraintType,
}

impl JointspaceAccelerationCommand {
    pub fn new(constraint: ConstraintType) -> Self {
        Self {
            entries: Vec::new(),
            constraint,
        }
    }

    #[must_use]
    pub fn joint(mut self, joint: usize, acceleration: f64, weight: f64) -> Self {
        self.entries.push(JointValue::new(joint, acceleration, weight));
        self
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        validate_joint_values(model, &self.entries, "jointspace acceleration")
    }
}

/// Desired rate of change of centroidal momentum `[k̇, l̇]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumRateCommand {
    pub desired: Vector6<f64>,
    pub weights: Vector6<f64>,
    pub selection: [bool; 6],
}

impl MomentumRateCommand {
    pub fn objective(desired: Vector6<f64>, weight: f64) -> Self {
        Self {
            desired,
            weights: Vector6::repeat(weight),
            selection: ALL_AXES,
        }
    }

    pub fn validate(&self) -> Result<(), CommandError> {
        check_finite(self.desired.iter().chain(self.weights.iter()), "momentum rate")
    }
}

/// A known external wrench acting on a body that the solution must compensate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalWrenchCommand {
    pub body: BodyId,
    /// Expressed at the body origin.
    pub wrench: Wrench,
}

impl ExternalWrenchCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        if self.wrench.torque.iter().chain(self.wrench.force.iter()).any(|v| v.is_nan()) {
            return Err(CommandError::ContainsNan("external wrench"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Contact commands
// ---------------------------------------------------------------------------

/// State of one contact point of a contactable body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPointState {
    pub in_contact: bool,
    /// Maximum normal force this point may carry.
    pub max_normal_force: f64,
}

/// Declares which points of a contactable body touch the environment this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneContactStateCommand {
    pub body: BodyId,
    pub coefficient_of_friction: f64,
    /// Contact plane normal, world frame.
    pub contact_normal: Vector3<f64>,
    /// One entry per point registered on the contactable body.
    pub points: Vec<ContactPointState>,
}

impl PlaneContactStateCommand {
    /// All `num_points` points in contact on a horizontal plane.
    pub fn in_contact(body: BodyId, num_points: usize, coefficient_of_friction: f64) -> Self {
        Self {
            body,
            coefficient_of_friction,
            contact_normal: Vector3::z(),
            points: vec![
                ContactPointState {
                    in_contact: true,
                    max_normal_force: f64::INFINITY,
                };
                num_points
            ],
        }
    }

    /// Every point lifted.
    pub fn no_contact(body: BodyId, num_points: usize) -> Self {
        let mut cmd = Self::in_contact(body, num_points, 0.0);
        cmd.points.iter_mut().for_each(|p| p.in_contact = false);
        cmd
    }

    pub fn is_in_contact(&self) -> bool {
        self.points.iter().any(|p| p.in_contact)
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        check_finite(
            self.contact_normal
                .iter()
                .chain(std::iter::once(&self.coefficient_of_friction))
                .chain(self.points.iter().map(|p| &p.max_normal_force)),
            "plane contact state",
        )
    }
}

/// Desired center of pressure of a contactable body.
#[derive(Debug, Clone, PartialEq)]
pub struct CenterOfPressureCommand {
    pub body: BodyId,
    /// World point on the contact plane.
    pub desired: Vector3<f64>,
    pub weight: f64,
}

impl CenterOfPressureCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        check_finite(self.desired.iter().chain(std::iter::once(&self.weight)), "center of pressure")
    }
}

/// Desired total contact wrench of a contactable body.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactWrenchCommand {
    pub body: BodyId,
    /// Expressed at the body origin.
    pub wrench: Wrench,
    pub weights: Vector6<f64>,
    pub selection: [bool; 6],
    pub constraint: ConstraintType,
}

impl ContactWrenchCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        check_finite(
            self.wrench
                .torque
                .iter()
                .chain(self.wrench.force.iter())
                .chain(self.weights.iter()),
            "contact wrench",
        )
    }
}

// ---------------------------------------------------------------------------
// Posture, integration and torque commands
// ---------------------------------------------------------------------------

/// Where a single joint's privileged configuration comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrivilegedTarget {
    Position(f64),
    Option(PrivilegedOption),
}

/// Per-joint privileged configuration override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrivilegedJoint {
    pub joint: usize,
    pub target: PrivilegedTarget,
    pub weight: Option<f64>,
    pub kp: Option<f64>,
    pub kd: Option<f64>,
}

impl PrivilegedJoint {
    pub const fn position(joint: usize, position: f64) -> Self {
        Self {
            joint,
            target: PrivilegedTarget::Position(position),
            weight: None,
            kp: None,
            kd: None,
        }
    }
}

/// Preferred posture pursued in the nullspace of every other task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrivilegedConfigurationCommand {
    /// Applies to every joint without an explicit entry.
    pub default_option: Option<PrivilegedOption>,
    pub joints: Vec<PrivilegedJoint>,
    /// Disable the privileged objective for this tick.
    pub disable: bool,
}

impl PrivilegedConfigurationCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        for j in &self.joints {
            check_joint(model, j.joint)?;
            let position = match j.target {
                PrivilegedTarget::Position(p) => Some(p),
                PrivilegedTarget::Option(_) => None,
            };
            check_finite(
                position.iter().chain(j.weight.iter()).chain(j.kp.iter()).chain(j.kd.iter()),
                "privileged configuration",
            )?;
        }
        Ok(())
    }
}

/// Privileged accelerations given directly instead of computed from a posture.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrivilegedAccelerationCommand {
    pub entries: Vec<JointValue>,
}

impl PrivilegedAccelerationCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        validate_joint_values(model, &self.entries, "privileged acceleration")
    }
}

/// Integration parameter overrides for one joint. `None` keeps the default.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointIntegrationParameters {
    pub joint: usize,
    pub alpha_position: Option<f64>,
    pub alpha_velocity: Option<f64>,
    pub max_position_error: Option<f64>,
    pub max_velocity: Option<f64>,
}

/// Joints whose solved acceleration is also integrated into desired
/// position and velocity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointAccelerationIntegrationCommand {
    pub joints: Vec<JointIntegrationParameters>,
}

impl JointAccelerationIntegrationCommand {
    pub fn for_joints(joints: impl IntoIterator<Item = usize>) -> Self {
        Self {
            joints: joints
                .into_iter()
                .map(|joint| JointIntegrationParameters {
                    joint,
                    ..JointIntegrationParameters::default()
                })
                .collect(),
        }
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        for p in &self.joints {
            check_joint(model, p.joint)?;
            check_finite(
                p.alpha_position
                    .iter()
                    .chain(p.alpha_velocity.iter())
                    .chain(p.max_position_error.iter())
                    .chain(p.max_velocity.iter()),
                "joint acceleration integration",
            )?;
        }
        Ok(())
    }
}

/// Desired joint torques, or torque bounds for inequality kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct JointTorqueCommand {
    pub entries: Vec<JointValue>,
    pub constraint: ConstraintType,
}

impl JointTorqueCommand {
    pub fn new(constraint: ConstraintType) -> Self {
        Self {
            entries: Vec::new(),
            constraint,
        }
    }

    #[must_use]
    pub fn joint(mut self, joint: usize, torque: f64, weight: f64) -> Self {
        self.entries.push(JointValue::new(joint, torque, weight));
        self
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        validate_joint_values(model, &self.entries, "joint torque")
    }
}

// ---------------------------------------------------------------------------
// Settings and generic objectives
// ---------------------------------------------------------------------------

/// Tick-local overrides of the optimization settings. `None` keeps the
/// configured value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptimizationSettingsCommand {
    pub rho_min: Option<f64>,
    pub joint_acceleration_max: Option<f64>,
    pub joint_torque_max: Option<f64>,
    pub rho_weight: Option<f64>,
    pub rho_rate_weight: Option<f64>,
    pub cop_weight: Option<f64>,
    pub cop_rate_weight: Option<f64>,
    pub acceleration_weight: Option<f64>,
    pub jerk_weight: Option<f64>,
    pub torque_weight: Option<f64>,
    pub joints_to_activate: Vec<usize>,
    pub joints_to_deactivate: Vec<usize>,
}

impl OptimizationSettingsCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        for &j in self.joints_to_activate.iter().chain(&self.joints_to_deactivate) {
            check_joint(model, j)?;
        }
        check_finite(
            [
                &self.rho_min,
                &self.joint_acceleration_max,
                &self.joint_torque_max,
                &self.rho_weight,
                &self.rho_rate_weight,
                &self.cop_weight,
                &self.cop_rate_weight,
                &self.acceleration_weight,
                &self.jerk_weight,
                &self.torque_weight,
            ]
            .into_iter()
            .flatten(),
            "optimization settings",
        )?;

        let non_negative = [
            ("rho_min", self.rho_min),
            ("rho_weight", self.rho_weight),
            ("rho_rate_weight", self.rho_rate_weight),
            ("cop_weight", self.cop_weight),
            ("cop_rate_weight", self.cop_rate_weight),
            ("joint_acceleration_weight", self.acceleration_weight),
            ("joint_jerk_weight", self.jerk_weight),
            ("joint_torque_weight", self.torque_weight),
        ];
        for (field, value) in non_negative {
            if value.is_some_and(|v| !(v >= 0.0 && v.is_finite())) {
                return Err(CommandError::InvalidValue {
                    field,
                    message: "must be finite and non-negative",
                });
            }
        }
        let positive = [
            ("max_joint_acceleration", self.joint_acceleration_max),
            ("max_joint_torque", self.joint_torque_max),
        ];
        for (field, value) in positive {
            if value.is_some_and(|v| !(v > 0.0)) {
                return Err(CommandError::InvalidValue {
                    field,
                    message: "must be > 0",
                });
            }
        }
        Ok(())
    }
}

/// Raw motion rows `J q̈ (op) b` over the full DoF vector.
#[derive(Debug, Clone, PartialEq)]
pub struct QpObjectiveCommand {
    pub jacobian: DMatrix<f64>,
    pub objective: DVector<f64>,
    pub weights: DVector<f64>,
    pub constraint: ConstraintType,
    /// Defer and project into the nullspace of every non-projected task.
    pub nullspace_projected: bool,
}

impl QpObjectiveCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        let n = model.num_dofs();
        if self.jacobian.ncols() != n {
            return Err(CommandError::DimensionMismatch {
                what: "objective jacobian columns",
                expected: n,
                got: self.jacobian.ncols(),
            });
        }
        let rows = self.jacobian.nrows();
        for (what, got) in [
            ("objective rows", self.objective.len()),
            ("objective weights", self.weights.len()),
        ] {
            if got != rows {
                return Err(CommandError::DimensionMismatch {
                    what,
                    expected: rows,
                    got,
                });
            }
        }
        check_finite(
            self.jacobian
                .iter()
                .chain(self.objective.iter())
                .chain(self.weights.iter()),
            "qp objective",
        )
    }
}

// ---------------------------------------------------------------------------
// Strategy command sets
// ---------------------------------------------------------------------------

/// Commands understood by the inverse-dynamics strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum InverseDynamicsCommand {
    SpatialAcceleration(SpatialAccelerationCommand),
    PointAcceleration(PointAccelerationCommand),
    JointspaceAcceleration(JointspaceAccelerationCommand),
    MomentumRate(MomentumRateCommand),
    ExternalWrench(ExternalWrenchCommand),
    PlaneContactState(PlaneContactStateCommand),
    PrivilegedConfiguration(PrivilegedConfigurationCommand),
    PrivilegedAcceleration(PrivilegedAccelerationCommand),
    JointAccelerationIntegration(JointAccelerationIntegrationCommand),
    JointTorque(JointTorqueCommand),
    CenterOfPressure(CenterOfPressureCommand),
    ContactWrench(ContactWrenchCommand),
    OptimizationSettings(OptimizationSettingsCommand),
    QpObjective(QpObjectiveCommand),
}

impl InverseDynamicsCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        match self {
            Self::SpatialAcceleration(c) => c.validate(model),
            Self::PointAcceleration(c) => c.validate(model),
            Self::JointspaceAcceleration(c) => c.validate(model),
            Self::MomentumRate(c) => c.validate(),
            Self::ExternalWrench(c) => c.validate(model),
            Self::PlaneContactState(c) => c.validate(model),
            Self::PrivilegedConfiguration(c) => c.validate(model),
            Self::PrivilegedAcceleration(c) => c.validate(model),
            Self::JointAccelerationIntegration(c) => c.validate(model),
            Self::JointTorque(c) => c.validate(model),
            Self::CenterOfPressure(c) => c.validate(model),
            Self::ContactWrench(c) => c.validate(model),
            Self::OptimizationSettings(c) => c.validate(model),
            Self::QpObjective(c) => c.validate(model),
        }
    }
}

/// Desired twist `[ω, v]` of a body origin.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialVelocityCommand {
    pub body: BodyId,
    pub desired: Vector6<f64>,
    pub weights: Vector6<f64>,
    pub selection: [bool; 6],
}

impl SpatialVelocityCommand {
    pub fn objective(body: BodyId, desired: Vector6<f64>, weight: f64) -> Self {
        Self {
            body,
            desired,
            weights: Vector6::repeat(weight),
            selection: ALL_AXES,
        }
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        check_finite(self.desired.iter().chain(self.weights.iter()), "spatial velocity")
    }
}

/// Desired joint velocities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointspaceVelocityCommand {
    pub entries: Vec<JointValue>,
}

impl JointspaceVelocityCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        validate_joint_values(model, &self.entries, "jointspace velocity")
    }
}

/// Commands understood by the inverse-kinematics strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum InverseKinematicsCommand {
    SpatialVelocity(SpatialVelocityCommand),
    JointspaceVelocity(JointspaceVelocityCommand),
    PrivilegedConfiguration(PrivilegedConfigurationCommand),
}

impl InverseKinematicsCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        match self {
            Self::SpatialVelocity(c) => c.validate(model),
            Self::JointspaceVelocity(c) => c.validate(model),
            Self::PrivilegedConfiguration(c) => c.validate(model),
        }
    }
}

/// Wrench a body should exert on its environment, realized through `Jᵀ`.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualWrenchCommand {
    pub body: BodyId,
    /// Expressed at the body origin.
    pub wrench: Wrench,
    pub selection: [bool; 6],
}

impl VirtualWrenchCommand {
    pub const fn new(body: BodyId, wrench: Wrench) -> Self {
        Self {
            body,
            wrench,
            selection: ALL_AXES,
        }
    }

    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        check_body(model, self.body)?;
        if !self.wrench.is_finite() {
            return Err(CommandError::ContainsNan("virtual wrench"));
        }
        Ok(())
    }
}

/// Commands understood by the virtual-model strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualModelCommand {
    VirtualWrench(VirtualWrenchCommand),
    /// Feedforward torques, added on top of the mapped wrenches.
    JointTorque(JointTorqueCommand),
}

impl VirtualModelCommand {
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        match self {
            Self::VirtualWrench(c) => c.validate(model),
            Self::JointTorque(c) => c.validate(model),
        }
    }
}

// ---------------------------------------------------------------------------
// ControllerCoreCommand
// ---------------------------------------------------------------------------

/// Everything the core needs for one tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerCoreCommand {
    pub mode: ControlMode,
    pub inverse_dynamics: Vec<InverseDynamicsCommand>,
    pub inverse_kinematics: Vec<InverseKinematicsCommand>,
    pub virtual_model: Vec<VirtualModelCommand>,
    /// Output to hold while the mode is OFF.
    pub low_level_override: Option<LowLevelOutput>,
}

impl ControllerCoreCommand {
    pub fn new(mode: ControlMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn add_inverse_dynamics(&mut self, command: impl Into<InverseDynamicsCommand>) {
        self.inverse_dynamics.push(command.into());
    }

    pub fn add_inverse_kinematics(&mut self, command: impl Into<InverseKinematicsCommand>) {
        self.inverse_kinematics.push(command.into());
    }

    pub fn add_virtual_model(&mut self, command: impl Into<VirtualModelCommand>) {
        self.virtual_model.push(command.into());
    }

    /// Validate the commands of the selected strategy.
    pub fn validate(&self, model: &impl MultibodyModel) -> Result<(), CommandError> {
        match self.mode {
            ControlMode::Off => {
                if let Some(out) = &self.low_level_override {
                    if out.len() != model.num_joints() {
                        return Err(CommandError::DimensionMismatch {
                            what: "low-level override joints",
                            expected: model.num_joints(),
                            got: out.len(),
                        });
                    }
                }
                Ok(())
            }
            ControlMode::InverseDynamics => self
                .inverse_dynamics
                .iter()
                .try_for_each(|c| c.validate(model)),
            ControlMode::InverseKinematics => self
                .inverse_kinematics
                .iter()
                .try_for_each(|c| c.validate(model)),
            ControlMode::VirtualModel => self
                .virtual_model
                .iter()
                .try_for_each(|c| c.validate(model)),
        }
    }

    /// Drop every command, keeping the allocations.
    pub fn clear(&mut self) {
        self.inverse_dynamics.clear();
        self.inverse_kinematics.clear();
        self.virtual_model.clear();
        self.low_level_override = None;
    }
}

macro_rules! impl_into_command {
    ($target:ident: $($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for $target {
                fn from(command: $ty) -> Self {
                    Self::$variant(command)
                }
            }
        )*
    };
}

impl_into_command!(InverseDynamicsCommand:
    SpatialAcceleration(SpatialAccelerationCommand),
    PointAcceleration(PointAccelerationCommand),
    JointspaceAcceleration(JointspaceAccelerationCommand),
    MomentumRate(MomentumRateCommand),
    ExternalWrench(ExternalWrenchCommand),
    PlaneContactState(PlaneContactStateCommand),
    PrivilegedConfiguration(PrivilegedConfigurationCommand),
    PrivilegedAcceleration(PrivilegedAccelerationCommand),
    JointAccelerationIntegration(JointAccelerationIntegrationCommand),
    JointTorque(JointTorqueCommand),
    CenterOfPressure(CenterOfPressureCommand),
    ContactWrench(ContactWrenchCommand),
    OptimizationSettings(OptimizationSettingsCommand),
    QpObjective(QpObjectiveCommand),
);

impl_into_command!(InverseKinematicsCommand:
    SpatialVelocity(SpatialVelocityCommand),
    JointspaceVelocity(JointspaceVelocityCommand),
    PrivilegedConfiguration(PrivilegedConfigurationCommand),
);

impl_into_command!(VirtualModelCommand:
    VirtualWrench(VirtualWrenchCommand),
    JointTorque(JointTorqueCommand),
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CentroidalModel, Limb, LimbJoint};
    use nalgebra::Matrix3;

    fn model() -> CentroidalModel {
        CentroidalModel::floating(5.0, Matrix3::identity(), 9.81).with_limb(
            Limb::new("foot")
                .joint(LimbJoint::revolute("hip", Vector3::zeros(), Vector3::y()))
                .end_offset(Vector3::new(0.0, 0.0, -0.5)),
        )
    }

    #[test]
    fn unknown_joint_is_rejected() {
        let cmd = JointspaceAccelerationCommand::new(ConstraintType::Objective).joint(3, 1.0, 1.0);
        assert_eq!(
            cmd.validate(&model()),
            Err(CommandError::UnknownJoint { index: 3, count: 1 })
        );
    }

    #[test]
    fn unknown_body_is_rejected() {
        let cmd = SpatialAccelerationCommand::objective(BodyId(7), Vector6::zeros(), 1.0);
        assert_eq!(cmd.validate(&model()), Err(CommandError::UnknownBody(7)));
    }

    #[test]
    fn nan_payload_is_rejected() {
        let mut cmd = MomentumRateCommand::objective(Vector6::zeros(), 1.0);
        cmd.desired[2] = f64::NAN;
        assert_eq!(cmd.validate(), Err(CommandError::ContainsNan("momentum rate")));
    }

    #[test]
    fn infinite_bounds_are_accepted() {
        let cmd = PlaneContactStateCommand::in_contact(BodyId(1), 4, 0.7);
        assert!(cmd.validate(&model()).is_ok());
        assert!(cmd.is_in_contact());
        assert!(!PlaneContactStateCommand::no_contact(BodyId(1), 4).is_in_contact());
    }

    #[test]
    fn qp_objective_dimension_mismatch() {
        let cmd = QpObjectiveCommand {
            jacobian: DMatrix::zeros(2, 3),
            objective: DVector::zeros(2),
            weights: DVector::zeros(2),
            constraint: ConstraintType::Objective,
            nullspace_projected: false,
        };
        assert_eq!(
            cmd.validate(&model()),
            Err(CommandError::DimensionMismatch {
                what: "objective jacobian columns",
                expected: 7,
                got: 3
            })
        );
    }

    #[test]
    fn bundle_validates_only_selected_mode() {
        let mut bundle = ControllerCoreCommand::new(ControlMode::InverseKinematics);
        // Broken ID command is ignored while the IK strategy is selected.
        bundle.add_inverse_dynamics(SpatialAccelerationCommand::objective(
            BodyId(9),
            Vector6::zeros(),
            1.0,
        ));
        assert!(bundle.validate(&model()).is_ok());
        bundle.mode = ControlMode::InverseDynamics;
        assert!(bundle.validate(&model()).is_err());
        bundle.clear();
        assert!(bundle.inverse_dynamics.is_empty());
        assert!(bundle.validate(&model()).is_ok());
    }

    #[test]
    fn off_override_must_match_joint_count() {
        let mut bundle = ControllerCoreCommand::new(ControlMode::Off);
        bundle.low_level_override = Some(LowLevelOutput::new(2));
        assert!(matches!(
            bundle.validate(&model()),
            Err(CommandError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn optimization_settings_joint_lists_are_checked() {
        let cmd = OptimizationSettingsCommand {
            joints_to_deactivate: vec![5],
            ..OptimizationSettingsCommand::default()
        };
        assert!(cmd.validate(&model()).is_err());
    }

    #[test]
    fn optimization_settings_reject_loosened_invariants() {
        let negative_rho_min = OptimizationSettingsCommand {
            rho_min: Some(-1.0),
            ..OptimizationSettingsCommand::default()
        };
        assert_eq!(
            negative_rho_min.validate(&model()),
            Err(CommandError::InvalidValue {
                field: "rho_min",
                message: "must be finite and non-negative",
            })
        );

        let negative_jerk = OptimizationSettingsCommand {
            jerk_weight: Some(-1e-3),
            ..OptimizationSettingsCommand::default()
        };
        assert!(matches!(
            negative_jerk.validate(&model()),
            Err(CommandError::InvalidValue { field: "joint_jerk_weight", .. })
        ));

        let zero_torque_max = OptimizationSettingsCommand {
            joint_torque_max: Some(0.0),
            ..OptimizationSettingsCommand::default()
        };
        assert!(matches!(
            zero_torque_max.validate(&model()),
            Err(CommandError::InvalidValue { field: "max_joint_torque", .. })
        ));

        let infinite_weight = OptimizationSettingsCommand {
            rho_weight: Some(f64::INFINITY),
            ..OptimizationSettingsCommand::default()
        };
        assert!(infinite_weight.validate(&model()).is_err());

        let legal = OptimizationSettingsCommand {
            rho_min: Some(0.0),
            rho_weight: Some(0.0),
            joint_acceleration_max: Some(10.0),
            ..OptimizationSettingsCommand::default()
        };
        assert_eq!(legal.validate(&model()), Ok(()));
    }
}
