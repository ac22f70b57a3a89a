use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Margin applied to the opposite side of a joint bound when only one side
/// is customized.
pub const DEFAULT_ONE_SIDED_BOUND_MARGIN: f64 = 5.0;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_control_dt() -> f64 {
    0.004
}
const fn default_gravity() -> f64 {
    9.81
}
const fn default_acceleration_weight() -> f64 {
    0.005
}
const fn default_rho_weight() -> f64 {
    1e-5
}
const fn default_max_joint_acceleration() -> f64 {
    200.0
}
const fn default_max_joint_torque() -> f64 {
    1000.0
}
const fn default_margin() -> f64 {
    DEFAULT_ONE_SIDED_BOUND_MARGIN
}
const fn default_max_iterations() -> u32 {
    100
}
const fn default_true() -> bool {
    true
}
const fn default_basis_vectors() -> usize {
    4
}
const fn default_nullspace_damping() -> f64 {
    1e-3
}
const fn default_tolerance() -> f64 {
    1e-8
}
const fn default_privileged_kp() -> f64 {
    20.0
}
const fn default_privileged_kd() -> f64 {
    6.0
}
const fn default_privileged_weight() -> f64 {
    5.0
}
const fn default_infinity() -> f64 {
    f64::INFINITY
}
const fn default_privileged_max_velocity() -> f64 {
    2.0
}
const fn default_alpha_position() -> f64 {
    0.9996
}
const fn default_alpha_velocity() -> f64 {
    0.95
}
const fn default_max_position_error() -> f64 {
    0.2
}
const fn default_integration_max_velocity() -> f64 {
    2.0
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which joints receive nominal torque bounds in the QP.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorqueLimitMode {
    /// No torque rows at all.
    #[default]
    None,
    /// Every one-DoF joint.
    AllJoints,
    /// Only the listed joint indices.
    Specific(Vec<usize>),
}

impl TorqueLimitMode {
    /// Whether joint `index` is torque limited under this mode.
    pub fn limits(&self, index: usize) -> bool {
        match self {
            Self::None => false,
            Self::AllJoints => true,
            Self::Specific(joints) => joints.contains(&index),
        }
    }

    /// Whether any joint can be torque limited.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::None => false,
            Self::AllJoints => true,
            Self::Specific(joints) => !joints.is_empty(),
        }
    }
}

/// Default posture the privileged objective pulls toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegedOption {
    /// Hold the posture measured when the option was applied.
    AtCurrent,
    /// Pull every joint toward zero.
    AtZero,
    /// Pull every joint toward the middle of its range of motion.
    #[default]
    AtMidRange,
}

// ---------------------------------------------------------------------------
// OptimizationSettings
// ---------------------------------------------------------------------------

/// Regularization weights, limits and solver parameters of the QP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSettings {
    /// Weight on `||qdd||^2`.
    #[serde(default = "default_acceleration_weight")]
    pub joint_acceleration_weight: f64,
    /// Weight on `||qdd - qdd_prev||^2 / dt^2`.
    #[serde(default)]
    pub joint_jerk_weight: f64,
    /// Weight on the squared actuated joint torques.
    #[serde(default)]
    pub joint_torque_weight: f64,
    /// Weight on `||rho||^2`.
    #[serde(default = "default_rho_weight")]
    pub rho_weight: f64,
    /// Weight on `||rho - rho_prev||^2`.
    #[serde(default)]
    pub rho_rate_weight: f64,
    /// Weight pulling each contact's center of pressure toward its desired point.
    #[serde(default)]
    pub cop_weight: f64,
    /// Weight penalizing motion of each contact's center of pressure.
    #[serde(default)]
    pub cop_rate_weight: f64,
    /// Lower bound on every active rho.
    #[serde(default)]
    pub rho_min: f64,
    /// Absolute joint acceleration limit (rad/s^2).
    #[serde(default = "default_max_joint_acceleration")]
    pub max_joint_acceleration: f64,
    /// Absolute joint torque limit (Nm).
    #[serde(default = "default_max_joint_torque")]
    pub max_joint_torque: f64,
    /// Margin used to widen the opposite side of a one-sided custom bound.
    #[serde(default = "default_margin")]
    pub one_sided_bound_margin: f64,
    /// Iteration cap handed to the QP primitive.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Solver tolerance (gap and feasibility).
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Reuse the previous active set when the contact state is unchanged.
    #[serde(default = "default_true")]
    pub warm_start: bool,
    /// Friction cone basis vectors per contact point.
    #[serde(default = "default_basis_vectors")]
    pub basis_vectors_per_point: usize,
    /// Damping of the pseudo-inverse used for nullspace projection.
    #[serde(default = "default_nullspace_damping")]
    pub nullspace_damping: f64,
    /// Which joints get nominal torque bounds.
    #[serde(default)]
    pub torque_limits: TorqueLimitMode,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            joint_acceleration_weight: default_acceleration_weight(),
            joint_jerk_weight: 0.0,
            joint_torque_weight: 0.0,
            rho_weight: default_rho_weight(),
            rho_rate_weight: 0.0,
            cop_weight: 0.0,
            cop_rate_weight: 0.0,
            rho_min: 0.0,
            max_joint_acceleration: default_max_joint_acceleration(),
            max_joint_torque: default_max_joint_torque(),
            one_sided_bound_margin: default_margin(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            warm_start: true,
            basis_vectors_per_point: default_basis_vectors(),
            nullspace_damping: default_nullspace_damping(),
            torque_limits: TorqueLimitMode::None,
        }
    }
}

impl OptimizationSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("joint_acceleration_weight", self.joint_acceleration_weight),
            ("joint_jerk_weight", self.joint_jerk_weight),
            ("joint_torque_weight", self.joint_torque_weight),
            ("rho_weight", self.rho_weight),
            ("rho_rate_weight", self.rho_rate_weight),
            ("cop_weight", self.cop_weight),
            ("cop_rate_weight", self.cop_rate_weight),
            ("rho_min", self.rho_min),
            ("one_sided_bound_margin", self.one_sided_bound_margin),
            ("nullspace_damping", self.nullspace_damping),
        ];
        for (field, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(invalid(field, "must be finite and non-negative"));
            }
        }
        if self.max_joint_acceleration <= 0.0 {
            return Err(invalid("max_joint_acceleration", "must be > 0"));
        }
        if self.max_joint_torque <= 0.0 {
            return Err(invalid("max_joint_torque", "must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", "must be > 0"));
        }
        if !(self.tolerance > 0.0) {
            return Err(invalid("tolerance", "must be > 0"));
        }
        if self.basis_vectors_per_point < 3 {
            return Err(invalid(
                "basis_vectors_per_point",
                "at least 3 vectors are needed to span a friction cone",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PrivilegedSettings
// ---------------------------------------------------------------------------

/// Gains of the privileged (posture) objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivilegedSettings {
    #[serde(default = "default_privileged_kp")]
    pub kp: f64,
    #[serde(default = "default_privileged_kd")]
    pub kd: f64,
    #[serde(default = "default_privileged_weight")]
    pub weight: f64,
    /// Clamp on the privileged acceleration (rad/s^2).
    #[serde(default = "default_infinity")]
    pub max_acceleration: f64,
    /// Clamp on the privileged velocity used by inverse kinematics (rad/s).
    #[serde(default = "default_privileged_max_velocity")]
    pub max_velocity: f64,
    #[serde(default)]
    pub default_option: PrivilegedOption,
}

impl Default for PrivilegedSettings {
    fn default() -> Self {
        Self {
            kp: default_privileged_kp(),
            kd: default_privileged_kd(),
            weight: default_privileged_weight(),
            max_acceleration: default_infinity(),
            max_velocity: default_privileged_max_velocity(),
            default_option: PrivilegedOption::AtMidRange,
        }
    }
}

// ---------------------------------------------------------------------------
// IntegrationSettings
// ---------------------------------------------------------------------------

/// Leaky integration parameters for joints whose acceleration is integrated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSettings {
    /// Leak toward the measured position, in [0, 1].
    #[serde(default = "default_alpha_position")]
    pub alpha_position: f64,
    /// Leak toward the measured velocity, in [0, 1].
    #[serde(default = "default_alpha_velocity")]
    pub alpha_velocity: f64,
    /// Maximum distance between desired and measured position (rad).
    #[serde(default = "default_max_position_error")]
    pub max_position_error: f64,
    /// Clamp on the integrated velocity (rad/s).
    #[serde(default = "default_integration_max_velocity")]
    pub max_velocity: f64,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            alpha_position: default_alpha_position(),
            alpha_velocity: default_alpha_velocity(),
            max_position_error: default_max_position_error(),
            max_velocity: default_integration_max_velocity(),
        }
    }
}

impl IntegrationSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.alpha_position) {
            return Err(invalid("integration.alpha_position", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.alpha_velocity) {
            return Err(invalid("integration.alpha_velocity", "must be in [0, 1]"));
        }
        if self.max_position_error < 0.0 {
            return Err(invalid("integration.max_position_error", "must be >= 0"));
        }
        if self.max_velocity < 0.0 {
            return Err(invalid("integration.max_velocity", "must be >= 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

/// Top-level controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Control period in seconds (default: 0.004 = 250 Hz).
    #[serde(default = "default_control_dt")]
    pub control_dt: f64,

    /// Gravity magnitude in m/s^2, acting along -z.
    #[serde(default = "default_gravity")]
    pub gravity: f64,

    #[serde(default)]
    pub optimization: OptimizationSettings,

    #[serde(default)]
    pub privileged: PrivilegedSettings,

    #[serde(default)]
    pub integration: IntegrationSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_dt: default_control_dt(),
            gravity: default_gravity(),
            optimization: OptimizationSettings::default(),
            privileged: PrivilegedSettings::default(),
            integration: IntegrationSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Default configuration for a given control period.
    pub fn with_control_dt(control_dt: f64) -> Self {
        Self {
            control_dt,
            ..Self::default()
        }
    }

    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.control_dt > 0.0 && self.control_dt.is_finite()) {
            return Err(ConfigError::InvalidControlDt(self.control_dt));
        }
        if !(self.gravity >= 0.0 && self.gravity.is_finite()) {
            return Err(invalid("gravity", "must be finite and non-negative"));
        }
        self.optimization.validate()?;
        if self.privileged.kp < 0.0 || self.privileged.kd < 0.0 || self.privileged.weight < 0.0 {
            return Err(invalid("privileged", "gains and weight must be non-negative"));
        }
        if !(self.privileged.max_acceleration > 0.0) || !(self.privileged.max_velocity > 0.0) {
            return Err(invalid("privileged", "maxima must be > 0"));
        }
        self.integration.validate()
    }

    /// Control rate in Hz.
    pub fn control_hz(&self) -> f64 {
        1.0 / self.control_dt
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        message: message.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- defaults ----

    #[test]
    fn controller_config_default_values() {
        let cfg = ControllerConfig::default();
        assert!((cfg.control_dt - 0.004).abs() < f64::EPSILON);
        assert!((cfg.gravity - 9.81).abs() < f64::EPSILON);
        assert!((cfg.optimization.joint_acceleration_weight - 0.005).abs() < f64::EPSILON);
        assert!((cfg.optimization.rho_weight - 1e-5).abs() < f64::EPSILON);
        assert!((cfg.optimization.one_sided_bound_margin - 5.0).abs() < f64::EPSILON);
        assert_eq!(cfg.optimization.basis_vectors_per_point, 4);
        assert_eq!(cfg.optimization.max_iterations, 100);
        assert!(cfg.optimization.warm_start);
        assert_eq!(cfg.optimization.torque_limits, TorqueLimitMode::None);
        assert!((cfg.privileged.kp - 20.0).abs() < f64::EPSILON);
        assert!((cfg.privileged.kd - 6.0).abs() < f64::EPSILON);
        assert!(cfg.privileged.max_acceleration.is_infinite());
        assert_eq!(cfg.privileged.default_option, PrivilegedOption::AtMidRange);
        assert!((cfg.integration.alpha_position - 0.9996).abs() < f64::EPSILON);
        assert!((cfg.integration.alpha_velocity - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_toml_matches_default() {
        let cfg = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ControllerConfig::default());
    }

    #[test]
    fn with_control_dt_is_valid() {
        let cfg = ControllerConfig::with_control_dt(0.002);
        assert!(cfg.validate().is_ok());
        assert!((cfg.control_hz() - 500.0).abs() < 1e-9);
    }

    // ---- validate ----

    #[test]
    fn validate_rejects_zero_dt() {
        let cfg = ControllerConfig::with_control_dt(0.0);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidControlDt(_))
        ));
    }

    #[test]
    fn validate_rejects_negative_weight() {
        let mut cfg = ControllerConfig::with_control_dt(0.004);
        cfg.optimization.rho_weight = -1.0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("rho_weight"));
    }

    #[test]
    fn validate_rejects_too_few_basis_vectors() {
        let mut cfg = ControllerConfig::with_control_dt(0.004);
        cfg.optimization.basis_vectors_per_point = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_alpha_out_of_range() {
        let mut cfg = ControllerConfig::with_control_dt(0.004);
        cfg.integration.alpha_velocity = 1.5;
        assert!(cfg.validate().is_err());
    }

    // ---- TOML ----

    #[test]
    fn from_toml_str_partial() {
        let cfg = ControllerConfig::from_toml_str(
            r#"
            control_dt = 0.002

            [optimization]
            rho_weight = 1e-6
            torque_limits = "all_joints"

            [privileged]
            default_option = "at_zero"
            "#,
        )
        .unwrap();
        assert!((cfg.control_dt - 0.002).abs() < f64::EPSILON);
        assert!((cfg.optimization.rho_weight - 1e-6).abs() < f64::EPSILON);
        assert_eq!(cfg.optimization.torque_limits, TorqueLimitMode::AllJoints);
        assert_eq!(cfg.privileged.default_option, PrivilegedOption::AtZero);
        // untouched fields keep their defaults
        assert!((cfg.optimization.joint_acceleration_weight - 0.005).abs() < f64::EPSILON);
    }

    #[test]
    fn from_toml_str_specific_torque_limits() {
        let cfg = ControllerConfig::from_toml_str(
            r"
            [optimization]
            torque_limits = { specific = [0, 2] }
            ",
        )
        .unwrap();
        assert!(cfg.optimization.torque_limits.limits(2));
        assert!(!cfg.optimization.torque_limits.limits(1));
        assert!(cfg.optimization.torque_limits.is_enabled());
    }

    #[test]
    fn from_toml_str_invalid_is_error() {
        assert!(matches!(
            ControllerConfig::from_toml_str("control_dt = -1.0"),
            Err(ConfigError::InvalidControlDt(_))
        ));
        assert!(matches!(
            ControllerConfig::from_toml_str("control_dt = \"fast\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let mut cfg = ControllerConfig::with_control_dt(0.001);
        cfg.optimization.torque_limits = TorqueLimitMode::Specific(vec![1]);
        cfg.privileged.max_acceleration = 50.0;
        let text = toml::to_string(&cfg).unwrap();
        let back = ControllerConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let result = ControllerConfig::from_file("/nonexistent/controller.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn torque_limit_mode_none_limits_nothing() {
        let mode = TorqueLimitMode::None;
        assert!(!mode.limits(0));
        assert!(!mode.is_enabled());
        assert!(!TorqueLimitMode::Specific(vec![]).is_enabled());
    }
}
