//! Whole-body controller CLI.
//!
//! Provides three modes of operation:
//! - `stand`: Balance a biped on both feet in closed loop and print statistics
//! - `config`: Print the effective controller configuration as TOML
//! - `info`: Print workspace crate versions

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use clap::{Parser, Subcommand};
use nalgebra::{DVector, Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3, Vector6};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use wbc_core::{ControlMode, ControllerConfig, DoubleBuffer, Publisher, Subscriber, WbcError};
use wbc_qp::prelude::*;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Whole-body QP controller.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance a biped on both feet and print statistics.
    Stand {
        /// Controller configuration (TOML). Defaults are used when absent.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of control ticks to run.
        #[arg(short, long, default_value_t = 500)]
        ticks: u64,

        /// Initial base height error in meters.
        #[arg(short, long, default_value_t = 0.02)]
        drop: f64,

        /// Log every N ticks.
        #[arg(long, default_value_t = 50)]
        log_every: u64,
    },

    /// Print the effective configuration.
    Config {
        /// Configuration file to load and validate.
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Robot
// ---------------------------------------------------------------------------

const MASS: f64 = 35.0;
const LEG_LENGTH: f64 = 0.9;
const HIP_WIDTH: f64 = 0.12;
const BASE_KP: f64 = 100.0;
const BASE_KD: f64 = 20.0;
const FOOT_KP: f64 = 400.0;
const FOOT_KD: f64 = 40.0;

fn leg(name: &str, lateral: f64) -> Limb {
    let half = 0.5 * LEG_LENGTH;
    Limb::new(name)
        .joint(
            LimbJoint::revolute(format!("{name}_hip_roll"), Vector3::new(0.0, lateral, 0.0), Vector3::x())
                .with_limits(-0.5, 0.5)
                .with_velocity_limit(8.0)
                .with_effort_limit(120.0)
                .with_armature(0.04),
        )
        .joint(
            LimbJoint::revolute(format!("{name}_hip_pitch"), Vector3::zeros(), Vector3::y())
                .with_limits(-1.6, 1.6)
                .with_velocity_limit(10.0)
                .with_effort_limit(150.0)
                .with_armature(0.05),
        )
        .joint(
            LimbJoint::revolute(format!("{name}_knee"), Vector3::new(0.0, 0.0, -half), Vector3::y())
                .with_limits(-2.4, 2.4)
                .with_velocity_limit(10.0)
                .with_effort_limit(150.0)
                .with_armature(0.05),
        )
        .end_offset(Vector3::new(0.0, 0.0, -half))
}

fn build_robot(gravity: f64) -> Result<(CentroidalModel, Vec<ContactablePlaneBody>), String> {
    let mut model = CentroidalModel::floating(
        MASS,
        Matrix3::from_diagonal(&Vector3::new(1.4, 1.2, 0.5)),
        gravity,
    )
    .with_limb(leg("left_foot", HIP_WIDTH))
    .with_limb(leg("right_foot", -HIP_WIDTH));
    model.set_root_pose(Isometry3::from_parts(
        Translation3::new(0.0, 0.0, LEG_LENGTH),
        UnitQuaternion::identity(),
    ));

    let mut soles = Vec::new();
    for name in ["left_foot", "right_foot"] {
        let body = model
            .body_id(name)
            .ok_or_else(|| format!("robot has no body named {name}"))?;
        soles.push(ContactablePlaneBody::rectangular_sole(name, body, 0.11, 0.05));
    }
    Ok((model, soles))
}

// ---------------------------------------------------------------------------
// Estimator / plant exchange
// ---------------------------------------------------------------------------

/// What the estimator publishes each tick.
#[derive(Debug, Clone)]
struct EstimatedState {
    tick: u64,
    q: DVector<f64>,
    qd: DVector<f64>,
    root_pose: Isometry3<f64>,
    root_twist: Vector6<f64>,
}

impl EstimatedState {
    fn capture(model: &CentroidalModel, tick: u64) -> Self {
        Self {
            tick,
            q: model.joint_positions().clone(),
            qd: model.joint_velocities().clone(),
            root_pose: model.root_pose(),
            root_twist: model.root_twist(),
        }
    }

    fn apply(&self, model: &mut CentroidalModel) {
        model.set_root_pose(self.root_pose);
        model.set_root_twist(self.root_twist);
        model.set_joint_positions(self.q.as_slice());
        model.set_joint_velocities(self.qd.as_slice());
    }
}

/// What the controller sends back to the plant.
#[derive(Debug, Clone)]
struct PlantCommand {
    tick: u64,
    accelerations: DVector<f64>,
    stop: bool,
}

fn wait_for<T>(subscriber: &Subscriber<T>) {
    while !subscriber.has_update() {
        std::hint::spin_loop();
        thread::yield_now();
    }
}

/// Integrates the realized accelerations and publishes the resulting state.
fn run_plant(
    mut model: CentroidalModel,
    dt: f64,
    mut commands: Subscriber<PlantCommand>,
    mut state: Publisher<EstimatedState>,
) {
    state.publish(EstimatedState::capture(&model, 0));
    loop {
        wait_for(&commands);
        let command = commands.latest();
        if command.stop {
            debug!(tick = command.tick, "Plant stopping");
            return;
        }
        model.integrate(&command.accelerations, dt);
        state.publish_with(|slot| {
            slot.tick = command.tick + 1;
            slot.q.copy_from(model.joint_positions());
            slot.qd.copy_from(model.joint_velocities());
            slot.root_pose = model.root_pose();
            slot.root_twist = model.root_twist();
        });
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// PD spatial acceleration driving a body toward `target`, angular first.
fn pd_acceleration(
    pose: &Isometry3<f64>,
    twist: &Vector6<f64>,
    target: &Isometry3<f64>,
    kp: f64,
    kd: f64,
) -> Vector6<f64> {
    let rotation_error = (target.rotation * pose.rotation.inverse()).scaled_axis();
    let position_error = target.translation.vector - pose.translation.vector;
    let mut desired = Vector6::zeros();
    desired
        .fixed_rows_mut::<3>(0)
        .copy_from(&(rotation_error * kp - twist.fixed_rows::<3>(0) * kd));
    desired
        .fixed_rows_mut::<3>(3)
        .copy_from(&(position_error * kp - twist.fixed_rows::<3>(3) * kd));
    desired
}

#[derive(Debug, Default)]
struct StandStats {
    ticks: u64,
    total_solve_us: u64,
    max_height_error: f64,
    final_height_error: f64,
}

fn run_stand(
    config_path: Option<&Path>,
    ticks: u64,
    drop: f64,
    log_every: u64,
) -> Result<(), WbcError> {
    let config = load_config(config_path)?;
    let (mut model, soles) = build_robot(config.gravity).map_err(|message| {
        WbcError::Config(wbc_core::ConfigError::InvalidValue {
            field: "robot".into(),
            message,
        })
    })?;
    let feet: Vec<BodyId> = soles.iter().map(|s| s.body).collect();
    let foot_targets: Vec<Isometry3<f64>> = feet.iter().map(|&f| model.body_pose(f)).collect();
    let base_target = model.root_pose();

    let mut plant_model = model.clone();
    let mut start = plant_model.root_pose();
    start.translation.vector.z -= drop;
    plant_model.set_root_pose(start);

    let mut core = WholeBodyControllerCore::new(&model, soles, &config);
    let (state_publisher, mut state) = DoubleBuffer::new(EstimatedState::capture(&plant_model, 0));
    let (mut command_publisher, command_subscriber) = DoubleBuffer::new(PlantCommand {
        tick: 0,
        accelerations: DVector::zeros(model.num_dofs()),
        stop: false,
    });

    info!(
        control_hz = config.control_hz(),
        dofs = model.num_dofs(),
        ticks,
        "Standing"
    );

    let mut bundle = ControllerCoreCommand::new(ControlMode::InverseDynamics);
    let mut stats = StandStats::default();
    let dt = config.control_dt;

    let result = thread::scope(|scope| {
        scope.spawn(move || run_plant(plant_model, dt, command_subscriber, state_publisher));

        let outcome = (|| -> Result<(), WbcError> {
            for tick in 0..ticks {
                wait_for(&state);
                let estimate = state.latest();
                estimate.apply(&mut model);

                bundle.mode = ControlMode::InverseDynamics;
                for (&foot, target) in feet.iter().zip(&foot_targets) {
                    bundle.add_inverse_dynamics(PlaneContactStateCommand::in_contact(foot, 4, 0.8));
                    let desired = pd_acceleration(
                        &model.body_pose(foot),
                        &model.body_twist(foot),
                        target,
                        FOOT_KP,
                        FOOT_KD,
                    );
                    bundle.add_inverse_dynamics(SpatialAccelerationCommand::objective(foot, desired, 100.0));
                }
                let desired = pd_acceleration(
                    &estimate.root_pose,
                    &estimate.root_twist,
                    &base_target,
                    BASE_KP,
                    BASE_KD,
                );
                bundle.add_inverse_dynamics(SpatialAccelerationCommand::objective(BodyId::ROOT, desired, 10.0));
                bundle.add_inverse_dynamics(JointAccelerationIntegrationCommand::for_joints(
                    0..model.num_joints(),
                ));

                core.submit(&model, &mut bundle)?;
                let output = core.compute(&model)?;
                let diagnostics = output.diagnostics.unwrap_or_default();

                let height_error = base_target.translation.vector.z - estimate.root_pose.translation.z;
                stats.ticks += 1;
                stats.total_solve_us += diagnostics.solve_time_us;
                stats.max_height_error = stats.max_height_error.max(height_error.abs());
                stats.final_height_error = height_error;

                if log_every > 0 && tick % log_every == 0 {
                    let support: f64 = output.contact_wrenches.iter().map(|(_, w)| w.force.z).sum();
                    info!(
                        tick,
                        height_error,
                        support,
                        iterations = diagnostics.iterations,
                        solve_us = diagnostics.solve_time_us,
                        "Control tick"
                    );
                }
                if !diagnostics.converged {
                    warn!(tick, "Acting on a best-effort solution");
                }

                let accelerations = &core.inverse_dynamics().solution().joint_accelerations;
                command_publisher.publish_with(|slot| {
                    slot.tick = estimate.tick;
                    slot.accelerations.copy_from(accelerations);
                    slot.stop = false;
                });
            }
            Ok(())
        })();

        command_publisher.publish_with(|slot| slot.stop = true);
        outcome
    });
    result?;

    let mean_solve_us = stats.total_solve_us.checked_div(stats.ticks).unwrap_or(0);
    println!(
        "stand: ticks={}, final height error={:.5} m, max height error={:.5} m",
        stats.ticks, stats.final_height_error, stats.max_height_error
    );
    println!(
        "solver: mean solve={mean_solve_us} us, non-converged ticks={}",
        core.non_convergence_count()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Other modes
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<ControllerConfig, WbcError> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            ControllerConfig::from_file(path)?
        }
        None => {
            let config = ControllerConfig::default();
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn run_config(path: Option<&Path>) -> Result<(), WbcError> {
    let config = load_config(path)?;
    match toml::to_string_pretty(&config) {
        Ok(text) => print!("{text}"),
        Err(e) => error!(error = %e, "Failed to serialize configuration"),
    }
    Ok(())
}

fn run_info() {
    println!("wbc v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  wbc-core {}", env!("CARGO_PKG_VERSION"));
    println!("  wbc-qp   {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("modes:");
    for mode in ControlMode::ALL {
        println!("  {mode}");
    }
    println!();
    println!("edition: 2024");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Stand {
            config,
            ticks,
            drop,
            log_every,
        }) => run_stand(config.as_deref(), ticks, drop, log_every),
        Some(Commands::Config { path }) => run_config(path.as_deref()),
        Some(Commands::Info) => {
            run_info();
            Ok(())
        }
        // Default: stand with defaults
        None => run_stand(None, 500, 0.02, 50),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "wbc failed");
            ExitCode::FAILURE
        }
    }
}
