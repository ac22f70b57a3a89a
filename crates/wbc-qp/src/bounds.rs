//! Nominal joint acceleration/torque bounds and their merge with
//! per-tick custom bounds.

use nalgebra::DVector;
use wbc_core::ConstraintType;

use crate::model::JointInfo;

/// Range of motion assumed for joints without position limits.
pub const UNLIMITED_RANGE_OF_MOTION: f64 = 2.0 * std::f64::consts::PI;

/// Merge a nominal `[lower, upper]` with custom bounds.
///
/// Custom values are first clamped to `±(abs_max - margin)`. A customized
/// side may only tighten its nominal value. When a single side is
/// customized the opposite side is widened, if needed, to stay at least
/// `margin` away from it, so the interval never collapses. When both sides
/// are customized they are intersected and an empty intersection collapses
/// to its midpoint.
#[must_use]
pub fn merge_bounds(
    nominal: (f64, f64),
    custom_lower: Option<f64>,
    custom_upper: Option<f64>,
    abs_max: f64,
    margin: f64,
) -> (f64, f64) {
    let (mut lower, mut upper) = nominal;
    let limit = (abs_max - margin).max(0.0);
    let clamp = |v: f64| v.clamp(-limit, limit);

    match (custom_lower.map(clamp), custom_upper.map(clamp)) {
        (None, None) => {}
        (Some(cmin), None) => {
            lower = lower.max(cmin);
            upper = upper.max(cmin + margin);
        }
        (None, Some(cmax)) => {
            lower = lower.min(cmax - margin);
            upper = upper.min(cmax);
        }
        (Some(cmin), Some(cmax)) => {
            lower = lower.max(cmin);
            upper = upper.min(cmax);
            if lower > upper {
                let mid = 0.5 * (lower + upper);
                lower = mid;
                upper = mid;
            }
        }
    }
    (lower, upper)
}

/// Acceleration bounds keeping a joint inside its position range and
/// velocity limit over one control period, capped at `±abs_max`.
#[must_use]
pub fn nominal_acceleration_bounds(
    info: &JointInfo,
    q: f64,
    qd: f64,
    dt: f64,
    abs_max: f64,
) -> (f64, f64) {
    let mut lower = -abs_max;
    let mut upper = abs_max;

    if let Some((q_min, q_max)) = info.position_limits {
        let predicted = q + qd * dt;
        let scale = 2.0 / (dt * dt);
        upper = upper.min(scale * (q_max - predicted));
        lower = lower.max(scale * (q_min - predicted));
    }
    if info.velocity_limit.is_finite() {
        upper = upper.min((info.velocity_limit - qd) / dt);
        lower = lower.max((-info.velocity_limit - qd) / dt);
    }
    if lower > upper {
        // Already past a limit: brake as hard as allowed.
        let mid = (0.5 * (lower + upper)).clamp(-abs_max, abs_max);
        return (mid, mid);
    }
    (lower, upper)
}

/// Velocity bounds keeping a joint inside its position range over one
/// control period and within its velocity limit.
#[must_use]
pub fn nominal_velocity_bounds(info: &JointInfo, q: f64, dt: f64) -> (f64, f64) {
    let mut lower = -info.velocity_limit;
    let mut upper = info.velocity_limit;
    if let Some((q_min, q_max)) = info.position_limits {
        upper = upper.min((q_max - q) / dt);
        lower = lower.max((q_min - q) / dt);
    }
    if lower > upper {
        let mid = 0.5 * (lower + upper);
        return (mid, mid);
    }
    (lower, upper)
}

/// Symmetric torque bounds from the effort limit, capped at `±abs_max`.
#[must_use]
pub fn nominal_torque_bounds(info: &JointInfo, abs_max: f64) -> (f64, f64) {
    let limit = info.effort_limit.min(abs_max);
    (-limit, limit)
}

/// Range of motion used to normalize posture errors.
pub fn range_of_motion(info: &JointInfo) -> f64 {
    info.position_limits
        .map(|(lo, hi)| hi - lo)
        .filter(|rom| *rom > 0.0 && rom.is_finite())
        .unwrap_or(UNLIMITED_RANGE_OF_MOTION)
}

// ---------------------------------------------------------------------------
// JointBounds
// ---------------------------------------------------------------------------

/// Per-joint effective bounds with a tick-local custom-bound buffer.
#[derive(Debug, Clone)]
pub struct JointBounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
    custom_lower: Vec<Option<f64>>,
    custom_upper: Vec<Option<f64>>,
}

impl JointBounds {
    pub fn new(num_joints: usize) -> Self {
        Self {
            lower: DVector::from_element(num_joints, f64::NEG_INFINITY),
            upper: DVector::from_element(num_joints, f64::INFINITY),
            custom_lower: vec![None; num_joints],
            custom_upper: vec![None; num_joints],
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn clear_custom(&mut self) {
        self.custom_lower.fill(None);
        self.custom_upper.fill(None);
    }

    /// Record a custom bound for an inequality kind. Repeated submissions
    /// keep the tightest value. Returns false for non-inequality kinds.
    pub fn submit(&mut self, constraint: ConstraintType, joint: usize, value: f64) -> bool {
        match constraint {
            ConstraintType::GeqInequality => {
                let slot = &mut self.custom_lower[joint];
                *slot = Some(slot.map_or(value, |v| v.max(value)));
                true
            }
            ConstraintType::LeqInequality => {
                let slot = &mut self.custom_upper[joint];
                *slot = Some(slot.map_or(value, |v| v.min(value)));
                true
            }
            ConstraintType::Objective | ConstraintType::Equality => false,
        }
    }

    pub fn has_custom(&self, joint: usize) -> bool {
        self.custom_lower[joint].is_some() || self.custom_upper[joint].is_some()
    }

    pub fn custom(&self, joint: usize) -> (Option<f64>, Option<f64>) {
        (self.custom_lower[joint], self.custom_upper[joint])
    }

    /// Set the nominal bound of `joint` merged with its custom bound.
    pub fn set(&mut self, joint: usize, nominal: (f64, f64), abs_max: f64, margin: f64) {
        let (lower, upper) = merge_bounds(
            nominal,
            self.custom_lower[joint],
            self.custom_upper[joint],
            abs_max,
            margin,
        );
        self.lower[joint] = lower;
        self.upper[joint] = upper;
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }
}
