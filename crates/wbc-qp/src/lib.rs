//! Whole-body quadratic-program control core.
//!
//! Each control tick turns a bundle of motion, contact and posture commands
//! into joint torques (or desired positions) for a floating-base robot:
//!
//! ```text
//! submit(bundle) → assemble QP rows → solve [q̈; ρ] → inverse dynamics → LowLevelOutput
//!                  (tasks, contacts,    (Clarabel,    (torques, leaky
//!                   bounds, posture)     warm start)   integration, CoP)
//! ```
//!
//! The rigid-body model is consumed through [`MultibodyModel`]; the QP
//! primitive through [`QpBackend`]. [`CentroidalModel`] and
//! [`ClarabelBackend`] are the bundled implementations.
//!
//! # Quick Start
//!
//! ```
//! use nalgebra::{Matrix3, Vector3};
//! use wbc_core::{ControlMode, ControllerConfig};
//! use wbc_qp::prelude::*;
//!
//! let model = CentroidalModel::floating(30.0, Matrix3::identity(), 9.81).with_limb(
//!     Limb::new("foot")
//!         .joint(LimbJoint::revolute("knee", Vector3::zeros(), Vector3::y()))
//!         .end_offset(Vector3::new(0.0, 0.0, -0.8)),
//! );
//! let foot = model.body_id("foot").unwrap();
//! let sole = ContactablePlaneBody::rectangular_sole("foot", foot, 0.1, 0.05);
//! let mut core = WholeBodyControllerCore::new(&model, vec![sole], &ControllerConfig::default());
//!
//! let mut bundle = ControllerCoreCommand::new(ControlMode::InverseDynamics);
//! bundle.add_inverse_dynamics(PlaneContactStateCommand::in_contact(foot, 4, 0.8));
//! core.submit(&model, &mut bundle).unwrap();
//! let output = core.compute(&model).unwrap();
//! assert!(output.contact_wrenches[0].1.force.z > 0.0);
//! ```

pub mod backend;
pub mod bounds;
pub mod command;
pub mod contact;
pub mod controller_core;
pub mod dynamics_realization;
pub mod external_wrench;
pub mod inverse_kinematics;
pub mod kinematic_loop;
pub mod kinematics;
pub mod model;
pub mod optimization;
pub mod privileged;
pub mod qp_input;
pub mod qp_solver;
pub mod virtual_model;

pub use backend::{ActiveSet, ClarabelBackend, QpBackend, QpOutcome, QpProblem, QpSettings};
pub use command::{
    ControllerCoreCommand, InverseDynamicsCommand, InverseKinematicsCommand, VirtualModelCommand,
};
pub use contact::{ContactWrenchCalculator, ContactablePlaneBody};
pub use controller_core::{ControllerCoreOutput, WholeBodyControllerCore};
pub use dynamics_realization::{DynamicsRealization, JointAccelerationIntegrator};
pub use inverse_kinematics::{InverseKinematicsOptimization, InverseKinematicsSolution};
pub use kinematic_loop::{KinematicLoopFunction, LinearCouplingLoop};
pub use model::{BodyId, CentroidalModel, JointInfo, Limb, LimbJoint, MultibodyModel};
pub use optimization::{InverseDynamicsOptimization, InverseDynamicsSolution, QpDiagnostics};
pub use qp_input::{MotionQpInputCalculator, QpInput, QpInputDomain};
pub use qp_solver::InverseDynamicsQpSolver;
pub use virtual_model::VirtualModelController;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::backend::{ClarabelBackend, QpBackend};
    pub use crate::command::{
        ControllerCoreCommand, ExternalWrenchCommand, JointAccelerationIntegrationCommand,
        JointTorqueCommand, JointValue, JointspaceAccelerationCommand, JointspaceVelocityCommand,
        MomentumRateCommand, OptimizationSettingsCommand, PlaneContactStateCommand,
        PointAccelerationCommand, PrivilegedConfigurationCommand, QpObjectiveCommand,
        SpatialAccelerationCommand, SpatialVelocityCommand, VirtualWrenchCommand,
    };
    pub use crate::contact::ContactablePlaneBody;
    pub use crate::controller_core::{ControllerCoreOutput, WholeBodyControllerCore};
    pub use crate::kinematic_loop::{KinematicLoopFunction, LinearCouplingLoop};
    pub use crate::model::{BodyId, CentroidalModel, Limb, LimbJoint, MultibodyModel};
    pub use crate::optimization::QpDiagnostics;
}
