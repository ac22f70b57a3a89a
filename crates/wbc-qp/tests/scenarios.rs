//! Integration test: reference control scenarios through the full core.
//!
//! Verifies:
//! 1. A single foot under the center of mass carries the full weight with
//!    no horizontal force and no motion.
//! 2. A heavily weighted jointspace objective on a pinned joint is met.
//! 3. Torque inequalities clamp a demand beyond them.
//! 4. Lifting a foot resets the warm start and still yields a feasible
//!    solution.
//! 5. A geared joint pair keeps its coupling for arbitrary objectives.

use approx::assert_relative_eq;
use wbc_core::{ConstraintType, ControlMode, ControllerConfig};
use wbc_qp::prelude::*;
use wbc_test_utils::models::{GRAVITY, ROBOT_MASS};
use wbc_test_utils::{
    RecordingBackend, biped, fixed_arm, random_jointspace_objective, seeded_rng,
    single_foot_robot, stance, standing_config,
};

fn run_inverse_dynamics<B: QpBackend>(
    core: &mut WholeBodyControllerCore<B>,
    model: &CentroidalModel,
    commands: Vec<wbc_qp::InverseDynamicsCommand>,
) -> ControllerCoreOutput {
    let mut bundle = ControllerCoreCommand::new(ControlMode::InverseDynamics);
    for command in commands {
        bundle.add_inverse_dynamics(command);
    }
    core.submit(model, &mut bundle).unwrap();
    core.compute(model).unwrap().clone()
}

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

#[test]
fn single_foot_carries_the_weight() {
    let (model, bodies) = single_foot_robot();
    let foot = bodies[0].body;
    let mut core = WholeBodyControllerCore::new(&model, bodies, &standing_config());

    let output = run_inverse_dynamics(&mut core, &model, vec![stance(foot).into()]);
    let diagnostics = output.diagnostics.unwrap();
    assert!(diagnostics.converged);

    let (body, wrench) = output.contact_wrenches[0];
    assert_eq!(body, foot);
    assert_relative_eq!(wrench.force.z, ROBOT_MASS * GRAVITY, epsilon = 1e-3);
    assert_relative_eq!(wrench.force.x, 0.0, epsilon = 1e-3);
    assert_relative_eq!(wrench.force.y, 0.0, epsilon = 1e-3);

    let accelerations = &core.inverse_dynamics().solution().joint_accelerations;
    assert_relative_eq!(accelerations.norm(), 0.0, epsilon = 1e-3);
}

#[test]
fn center_of_pressure_lies_under_the_foot() {
    let (model, bodies) = single_foot_robot();
    let foot = bodies[0].body;
    let mut core = WholeBodyControllerCore::new(&model, bodies, &standing_config());

    let output = run_inverse_dynamics(&mut core, &model, vec![stance(foot).into()]);
    let cop = output.centers_of_pressure[0].unwrap();
    assert_relative_eq!(cop.x, 0.0, epsilon = 1e-3);
    assert_relative_eq!(cop.y, 0.0, epsilon = 1e-3);
}

// ---------------------------------------------------------------------------
// Jointspace objectives and torque limits
// ---------------------------------------------------------------------------

#[test]
fn pinned_joint_tracks_its_objective() {
    let model = fixed_arm(1);
    let mut core = WholeBodyControllerCore::new(&model, Vec::new(), &ControllerConfig::default());

    let output = run_inverse_dynamics(
        &mut core,
        &model,
        vec![
            JointspaceAccelerationCommand::new(ConstraintType::Objective)
                .joint(0, 2.0, 1e6)
                .into(),
        ],
    );
    assert!(output.diagnostics.unwrap().converged);
    let qdd = core.inverse_dynamics().solution().joint_accelerations[0];
    assert_relative_eq!(qdd, 2.0, epsilon = 1e-3);
    // Unit armature and no gravity load on a pitch joint at rest.
    assert_relative_eq!(output.low_level.joints()[0].torque, qdd, epsilon = 1e-6);
}

#[test]
fn torque_inequalities_clamp_the_demand() {
    let model = fixed_arm(1);
    let mut core = WholeBodyControllerCore::new(&model, Vec::new(), &ControllerConfig::default());

    let output = run_inverse_dynamics(
        &mut core,
        &model,
        vec![
            JointspaceAccelerationCommand::new(ConstraintType::Objective)
                .joint(0, 80.0, 1e3)
                .into(),
            JointTorqueCommand::new(ConstraintType::GeqInequality)
                .joint(0, -50.0, 1.0)
                .into(),
            JointTorqueCommand::new(ConstraintType::LeqInequality)
                .joint(0, 50.0, 1.0)
                .into(),
        ],
    );
    let torque = output.low_level.joints()[0].torque;
    assert!(torque <= 50.0 + 1e-4, "torque {torque} above its upper bound");
    assert!(torque >= -50.0 - 1e-4, "torque {torque} below its lower bound");
    assert_relative_eq!(torque, 50.0, epsilon = 1e-3);
}

// ---------------------------------------------------------------------------
// Contact changes
// ---------------------------------------------------------------------------

#[test]
fn lifting_a_foot_resets_the_warm_start() {
    let (model, bodies) = biped();
    let left = bodies[0].body;
    let right = bodies[1].body;
    let mut core = WholeBodyControllerCore::with_backend(
        &model,
        bodies,
        &standing_config(),
        RecordingBackend::new(),
    );

    let both = run_inverse_dynamics(&mut core, &model, vec![stance(left).into(), stance(right).into()]);
    assert!(both.diagnostics.unwrap().converged);
    let total: f64 = both.contact_wrenches.iter().map(|(_, w)| w.force.z).sum();
    assert_relative_eq!(total, ROBOT_MASS * GRAVITY, epsilon = 1e-2);

    // Same contact set: the previous active set is offered.
    let steady = run_inverse_dynamics(&mut core, &model, vec![stance(left).into(), stance(right).into()]);
    assert!(!steady.diagnostics.unwrap().warm_start_reset);
    assert!(core.backend().last().unwrap().warm_start_offered);

    let lifted = run_inverse_dynamics(
        &mut core,
        &model,
        vec![
            PlaneContactStateCommand::no_contact(left, 4).into(),
            stance(right).into(),
        ],
    );
    let diagnostics = lifted.diagnostics.unwrap();
    assert!(diagnostics.warm_start_reset);
    assert!(diagnostics.converged);
    assert!(!core.backend().last().unwrap().warm_start_offered);

    let (_, left_wrench) = lifted.contact_wrenches[0];
    assert_relative_eq!(left_wrench.force.norm(), 0.0, epsilon = 1e-6);
    assert!(lifted.centers_of_pressure[0].is_none());
    assert!(lifted.low_level.torques().all(f64::is_finite));

    let contacts = core.inverse_dynamics().contacts();
    let rhos = &core.inverse_dynamics().solution().rhos;
    for (rho, max) in rhos.iter().zip(contacts.rho_max().iter()) {
        assert!(*rho >= -1e-7 && *rho <= max + 1e-6);
    }
}

// ---------------------------------------------------------------------------
// Kinematic loops
// ---------------------------------------------------------------------------

#[test]
fn geared_pair_keeps_its_coupling() {
    let model = fixed_arm(3);
    let mut core = WholeBodyControllerCore::new(&model, Vec::new(), &ControllerConfig::default());
    core.register_loop(Box::new(LinearCouplingLoop::gear(0, 2, -0.5)))
        .unwrap();

    let mut rng = seeded_rng(11);
    for _ in 0..10 {
        let objective = random_jointspace_objective(&mut rng, 3, 20.0);
        run_inverse_dynamics(&mut core, &model, vec![objective.into()]);
        let qdd = &core.inverse_dynamics().solution().joint_accelerations;
        assert_relative_eq!(qdd[2], -0.5 * qdd[0], epsilon = 1e-9);
    }
}
