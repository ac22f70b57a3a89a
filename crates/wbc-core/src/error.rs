use thiserror::Error;

/// Top-level error type for the whole-body controller.
#[derive(Debug, Error)]
pub enum WbcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Mode error: {0}")]
    Mode(#[from] ModeError),

    #[error("Controller core error: {0}")]
    Core(#[from] CoreError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid control_dt: {0} (must be > 0)")]
    InvalidControlDt(f64),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Malformed command payloads.
///
/// Copy + static messages so that rejection on the control thread never
/// allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown joint index {index} (model has {count} one-DoF joints)")]
    UnknownJoint { index: usize, count: usize },

    #[error("Unknown body {0}")]
    UnknownBody(usize),

    #[error("Unknown contactable body {0}")]
    UnknownContactableBody(usize),

    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Command payload contains NaN ({0})")]
    ContainsNan(&'static str),

    #[error("Joint {0} is already constrained by another kinematic loop")]
    ConflictingLoopJoint(usize),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: &'static str,
    },
}

/// Control mode parsing errors.
///
/// An unrecognized mode is a static wiring defect, so callers are expected
/// to propagate this all the way out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("Unhandled control mode: {0}")]
    UnknownName(String),

    #[error("Unhandled control mode discriminant: {0}")]
    UnknownDiscriminant(u8),
}

/// Misuse of the per-tick submit/compute protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("compute() called without a command bundle submitted for this tick")]
    NotSubmitted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wbc_error_from_config_error() {
        let err = ConfigError::InvalidControlDt(-1.0);
        let wbc_err: WbcError = err.into();
        assert!(matches!(wbc_err, WbcError::Config(_)));
        assert!(wbc_err.to_string().contains("-1"));
    }

    #[test]
    fn wbc_error_from_command_error() {
        let err = CommandError::UnknownJoint { index: 7, count: 3 };
        let wbc_err: WbcError = err.into();
        assert!(matches!(wbc_err, WbcError::Command(_)));
        assert!(wbc_err.to_string().contains("index 7"));
    }

    #[test]
    fn wbc_error_from_mode_error() {
        let err = ModeError::UnknownName("jumping".into());
        let wbc_err: WbcError = err.into();
        assert!(matches!(wbc_err, WbcError::Mode(_)));
        assert!(wbc_err.to_string().contains("jumping"));
    }

    #[test]
    fn wbc_error_from_core_error() {
        let wbc_err: WbcError = CoreError::NotSubmitted.into();
        assert!(matches!(wbc_err, WbcError::Core(CoreError::NotSubmitted)));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::Io(_)));
    }

    #[test]
    fn command_error_is_copy() {
        let err = CommandError::ContainsNan("torques");
        let err2 = err;
        assert_eq!(err, err2);
    }

    #[test]
    fn command_error_display_messages() {
        assert_eq!(
            CommandError::UnknownJoint { index: 4, count: 2 }.to_string(),
            "Unknown joint index 4 (model has 2 one-DoF joints)"
        );
        assert_eq!(CommandError::UnknownBody(9).to_string(), "Unknown body 9");
        assert_eq!(
            CommandError::UnknownContactableBody(1).to_string(),
            "Unknown contactable body 1"
        );
        assert_eq!(
            CommandError::DimensionMismatch {
                what: "weights",
                expected: 6,
                got: 3
            }
            .to_string(),
            "Dimension mismatch in weights: expected 6, got 3"
        );
        assert_eq!(
            CommandError::ContainsNan("accelerations").to_string(),
            "Command payload contains NaN (accelerations)"
        );
        assert_eq!(
            CommandError::ConflictingLoopJoint(3).to_string(),
            "Joint 3 is already constrained by another kinematic loop"
        );
    }

    #[test]
    fn config_error_display_messages() {
        assert_eq!(
            ConfigError::InvalidControlDt(0.0).to_string(),
            "Invalid control_dt: 0 (must be > 0)"
        );
        assert_eq!(
            ConfigError::InvalidValue {
                field: "rho_weight".into(),
                message: "must be non-negative".into()
            }
            .to_string(),
            "Invalid value for rho_weight: must be non-negative"
        );
    }

    #[test]
    fn mode_error_display_messages() {
        assert_eq!(
            ModeError::UnknownDiscriminant(9).to_string(),
            "Unhandled control mode discriminant: 9"
        );
        assert_eq!(
            CoreError::NotSubmitted.to_string(),
            "compute() called without a command bundle submitted for this tick"
        );
    }
}
