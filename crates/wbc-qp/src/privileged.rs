//! Privileged (posture) configuration pursued in the nullspace of all
//! other tasks.

use nalgebra::DVector;
use tracing::warn;
use wbc_core::{PrivilegedOption, PrivilegedSettings};

use crate::bounds::range_of_motion;
use crate::command::{
    PrivilegedAccelerationCommand, PrivilegedConfigurationCommand, PrivilegedTarget,
};
use crate::model::MultibodyModel;

/// Tick-local privileged targets and the joint accelerations/velocities
/// that pull toward them.
#[derive(Debug, Clone)]
pub struct PrivilegedConfigurationHandler {
    settings: PrivilegedSettings,
    enabled: bool,
    default_option: PrivilegedOption,
    /// Target of each joint set explicitly this tick.
    explicit: Vec<Option<PrivilegedTarget>>,
    direct: Vec<Option<f64>>,
    kp: DVector<f64>,
    kd: DVector<f64>,
    weights: DVector<f64>,
    positions: DVector<f64>,
    accelerations: DVector<f64>,
    velocities: DVector<f64>,
}

impl PrivilegedConfigurationHandler {
    pub fn new(num_joints: usize, settings: PrivilegedSettings) -> Self {
        let mut handler = Self {
            default_option: settings.default_option,
            settings,
            enabled: true,
            explicit: vec![None; num_joints],
            direct: vec![None; num_joints],
            kp: DVector::zeros(num_joints),
            kd: DVector::zeros(num_joints),
            weights: DVector::zeros(num_joints),
            positions: DVector::zeros(num_joints),
            accelerations: DVector::zeros(num_joints),
            velocities: DVector::zeros(num_joints),
        };
        handler.reset();
        handler
    }

    pub fn settings(&self) -> &PrivilegedSettings {
        &self.settings
    }

    /// Back to the configured defaults; nothing carries over between ticks.
    pub fn reset(&mut self) {
        self.enabled = true;
        self.default_option = self.settings.default_option;
        self.explicit.fill(None);
        self.direct.fill(None);
        self.kp.fill(self.settings.kp);
        self.kd.fill(self.settings.kd);
        self.weights.fill(self.settings.weight);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.settings.weight.is_finite()
    }

    pub fn submit_configuration(&mut self, command: &PrivilegedConfigurationCommand) {
        if command.disable {
            self.enabled = false;
        }
        if let Some(option) = command.default_option {
            self.default_option = option;
        }
        for entry in &command.joints {
            let j = entry.joint;
            if self.explicit[j].is_some() {
                warn!(joint = j, "Duplicate privileged target ignored");
                continue;
            }
            self.explicit[j] = Some(entry.target);
            if let Some(kp) = entry.kp {
                self.kp[j] = kp;
            }
            if let Some(kd) = entry.kd {
                self.kd[j] = kd;
            }
            if let Some(weight) = entry.weight {
                self.weights[j] = weight;
            }
        }
    }

    pub fn submit_acceleration(&mut self, command: &PrivilegedAccelerationCommand) {
        for entry in &command.entries {
            if self.direct[entry.joint].is_none() {
                self.direct[entry.joint] = Some(entry.value);
                self.weights[entry.joint] = entry.weight;
            }
        }
    }

    fn resolve_targets(&mut self, model: &impl MultibodyModel) {
        let q = model.joint_positions();
        for (j, info) in model.joints().iter().enumerate() {
            let option = match self.explicit[j] {
                Some(PrivilegedTarget::Position(p)) => {
                    self.positions[j] = p;
                    continue;
                }
                Some(PrivilegedTarget::Option(o)) => o,
                None => self.default_option,
            };
            self.positions[j] = match option {
                PrivilegedOption::AtCurrent => q[j],
                PrivilegedOption::AtZero => 0.0,
                PrivilegedOption::AtMidRange => {
                    info.position_limits.map_or(0.0, |(lo, hi)| 0.5 * (lo + hi))
                }
            };
        }
    }

    /// `q̈ = clamp(2 kp (q_priv - q) / ROM² - kd q̇, ±max_acc)`.
    pub fn compute_accelerations(&mut self, model: &impl MultibodyModel) -> &DVector<f64> {
        self.resolve_targets(model);
        let q = model.joint_positions();
        let qd = model.joint_velocities();
        let max = self.settings.max_acceleration;
        for (j, info) in model.joints().iter().enumerate() {
            if let Some(direct) = self.direct[j] {
                self.accelerations[j] = direct;
                continue;
            }
            let rom = range_of_motion(info);
            let qdd = 2.0 * self.kp[j] * (self.positions[j] - q[j]) / (rom * rom)
                - self.kd[j] * qd[j];
            self.accelerations[j] = qdd.clamp(-max, max);
        }
        &self.accelerations
    }

    /// `q̇ = clamp(2 kp (q_priv - q) / ROM², ±max_vel)`.
    pub fn compute_velocities(&mut self, model: &impl MultibodyModel) -> &DVector<f64> {
        self.resolve_targets(model);
        let q = model.joint_positions();
        let max = self.settings.max_velocity;
        for (j, info) in model.joints().iter().enumerate() {
            let rom = range_of_motion(info);
            let qd = 2.0 * self.kp[j] * (self.positions[j] - q[j]) / (rom * rom);
            self.velocities[j] = qd.clamp(-max, max);
        }
        &self.velocities
    }

    /// Result of the last [`Self::compute_accelerations`].
    pub fn accelerations(&self) -> &DVector<f64> {
        &self.accelerations
    }

    /// Result of the last [`Self::compute_velocities`].
    pub fn velocities(&self) -> &DVector<f64> {
        &self.velocities
    }

    pub fn privileged_positions(&self) -> &DVector<f64> {
        &self.positions
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }
}
