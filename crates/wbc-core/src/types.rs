use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use nalgebra::{Isometry3, Vector3, Vector6};

use crate::error::ModeError;

// ---------------------------------------------------------------------------
// Wrench
// ---------------------------------------------------------------------------

/// A 6D generalized force expressed at a reference point, world-aligned axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wrench {
    pub torque: Vector3<f64>,
    pub force: Vector3<f64>,
}

impl Default for Wrench {
    fn default() -> Self {
        Self::zero()
    }
}

impl Wrench {
    pub const fn new(torque: Vector3<f64>, force: Vector3<f64>) -> Self {
        Self { torque, force }
    }

    pub fn zero() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Pure force, no torque about the reference point.
    pub fn from_force(force: Vector3<f64>) -> Self {
        Self::new(Vector3::zeros(), force)
    }

    /// Angular part first, then linear.
    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.torque.x,
            self.torque.y,
            self.torque.z,
            self.force.x,
            self.force.y,
            self.force.z,
        )
    }

    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self::new(
            Vector3::new(v[0], v[1], v[2]),
            Vector3::new(v[3], v[4], v[5]),
        )
    }

    /// Re-express the same wrench about another reference point.
    ///
    /// `offset` goes from the current reference point to the new one.
    #[must_use]
    pub fn shift(&self, offset: &Vector3<f64>) -> Self {
        Self::new(self.torque - offset.cross(&self.force), self.force)
    }

    pub fn is_finite(&self) -> bool {
        self.torque.iter().chain(self.force.iter()).all(|x| x.is_finite())
    }
}

impl Add for Wrench {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.torque + rhs.torque, self.force + rhs.force)
    }
}

impl AddAssign for Wrench {
    fn add_assign(&mut self, rhs: Self) {
        self.torque += rhs.torque;
        self.force += rhs.force;
    }
}

// ---------------------------------------------------------------------------
// ConstraintType
// ---------------------------------------------------------------------------

/// How a command's rows enter the QP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConstraintType {
    /// Weighted least-squares cost.
    #[default]
    Objective,
    /// `J x = b`.
    Equality,
    /// `J x >= b`.
    GeqInequality,
    /// `J x <= b`.
    LeqInequality,
}

impl ConstraintType {
    pub const fn is_inequality(self) -> bool {
        matches!(self, Self::GeqInequality | Self::LeqInequality)
    }
}

// ---------------------------------------------------------------------------
// ControlMode
// ---------------------------------------------------------------------------

/// The strategy the controller core runs on a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlMode {
    #[default]
    Off,
    InverseDynamics,
    InverseKinematics,
    VirtualModel,
}

impl ControlMode {
    pub const ALL: [Self; 4] = [
        Self::Off,
        Self::InverseDynamics,
        Self::InverseKinematics,
        Self::VirtualModel,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::InverseDynamics => "inverse_dynamics",
            Self::InverseKinematics => "inverse_kinematics",
            Self::VirtualModel => "virtual_model",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "off" => Ok(Self::Off),
            "inverse_dynamics" | "id" => Ok(Self::InverseDynamics),
            "inverse_kinematics" | "ik" => Ok(Self::InverseKinematics),
            "virtual_model" | "virtual_model_control" | "vmc" => Ok(Self::VirtualModel),
            _ => Err(ModeError::UnknownName(s.to_owned())),
        }
    }
}

impl TryFrom<u8> for ControlMode {
    type Error = ModeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(ModeError::UnknownDiscriminant(value))
    }
}

impl From<ControlMode> for u8 {
    fn from(mode: ControlMode) -> Self {
        match mode {
            ControlMode::Off => 0,
            ControlMode::InverseDynamics => 1,
            ControlMode::InverseKinematics => 2,
            ControlMode::VirtualModel => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Low-level joint output
// ---------------------------------------------------------------------------

/// Whether the joint servo should track torque or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowLevelJointControlMode {
    #[default]
    Force,
    Position,
}

/// Desired values for one one-DoF joint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointDesiredData {
    pub torque: f64,
    pub position: Option<f64>,
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
    pub mode: LowLevelJointControlMode,
}

impl JointDesiredData {
    pub const fn torque_only(torque: f64) -> Self {
        Self {
            torque,
            position: None,
            velocity: None,
            acceleration: None,
            mode: LowLevelJointControlMode::Force,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Per-joint desired data, indexed by one-DoF joint index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LowLevelOutput {
    joints: Vec<JointDesiredData>,
}

impl LowLevelOutput {
    pub fn new(num_joints: usize) -> Self {
        Self {
            joints: vec![JointDesiredData::default(); num_joints],
        }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn joint(&self, index: usize) -> Option<&JointDesiredData> {
        self.joints.get(index)
    }

    pub fn joint_mut(&mut self, index: usize) -> Option<&mut JointDesiredData> {
        self.joints.get_mut(index)
    }

    pub fn joints(&self) -> &[JointDesiredData] {
        &self.joints
    }

    pub fn joints_mut(&mut self) -> &mut [JointDesiredData] {
        &mut self.joints
    }

    pub fn torques(&self) -> impl Iterator<Item = f64> + '_ {
        self.joints.iter().map(|j| j.torque)
    }

    pub fn clear(&mut self) {
        self.joints.iter_mut().for_each(JointDesiredData::clear);
    }

    /// Copy another output into this one without reallocating when sizes match.
    pub fn set(&mut self, other: &Self) {
        self.joints.clone_from(&other.joints);
    }
}

// ---------------------------------------------------------------------------
// RootJointDesiredConfiguration
// ---------------------------------------------------------------------------

/// Desired state of the floating base (angular parts first).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootJointDesiredConfiguration {
    pub acceleration: Vector6<f64>,
    pub velocity: Vector6<f64>,
    pub pose: Isometry3<f64>,
}

impl Default for RootJointDesiredConfiguration {
    fn default() -> Self {
        Self {
            acceleration: Vector6::zeros(),
            velocity: Vector6::zeros(),
            pose: Isometry3::identity(),
        }
    }
}
