// wbc-core: Types, config, errors and thread exchange for the whole-body controller.

pub mod buffer;
pub mod config;
pub mod error;
pub mod types;

pub use buffer::{DoubleBuffer, Publisher, Subscriber};
pub use config::{
    ControllerConfig, DEFAULT_ONE_SIDED_BOUND_MARGIN, IntegrationSettings, OptimizationSettings,
    PrivilegedOption, PrivilegedSettings, TorqueLimitMode,
};
pub use error::{CommandError, ConfigError, CoreError, ModeError, WbcError};
pub use types::{
    ConstraintType, ControlMode, JointDesiredData, LowLevelJointControlMode, LowLevelOutput,
    RootJointDesiredConfiguration, Wrench,
};
