//! Robot modes and the periodic control loop.
//!
//! - `characterization`: the telemetry loop run during characterization
//! - `drivetrain`: capability traits the loop is wired against
//! - `pwm`: PCA9685-backed PWM motor controller output
//! - `trajectory`: command glue around an external trajectory tracker

pub mod characterization;
pub mod drivetrain;
pub mod pwm;
pub mod trajectory;

use alloc::string::String;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::Ticker;
use serde::{Deserialize, Serialize};

use crate::utils::{
    config::RobotConfig,
    connection::table::{NetworkTable, TableValue},
    math::drive::arcade_drive,
};
use characterization::{CharacterizationRun, CycleError, DrivetrainError, TelemetrySample};
use drivetrain::{ActuatorPair, Clock, DriverStick, Drivetrain, EncoderPair, PowerSource, Side};

/// Channel used to receive mode change requests.
pub static MODE_CHANNEL: Channel<CriticalSectionRawMutex, RobotMode, 4> = Channel::new();

pub const DASHBOARD_KEYS: [(Side, &str, &str); 2] = [
    (Side::Left, "/SmartDashboard/l_encoder_pos", "/SmartDashboard/l_encoder_rate"),
    (Side::Right, "/SmartDashboard/r_encoder_pos", "/SmartDashboard/r_encoder_rate"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotMode {
    Disabled,
    Teleop,
    Characterization,
}

/// Commands accepted from remote clients.
///
/// Serialized as JSON with tag `"ct"`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "ct", rename_all = "snake_case")] // ct = command type
pub enum SystemCommand {
    /// Write a table entry.
    Set { k: String, v: TableValue },
    /// Read a table entry.
    Get { k: String },
    /// Switch robot mode.
    Mode { m: RobotMode },
}

/// Owns the drivetrain wiring and sequences the robot modes.
pub struct RobotController<'t, P, Enc, A, C, S> {
    drivetrain: Drivetrain<P, Enc, A, C>,
    stick: S,
    table: &'t NetworkTable,
    config: RobotConfig,
    mode: RobotMode,
    run: Option<CharacterizationRun>,
}

impl<'t, P, Enc, A, C, S> RobotController<'t, P, Enc, A, C, S>
where
    P: PowerSource,
    Enc: EncoderPair,
    A: ActuatorPair,
    C: Clock,
    S: DriverStick,
{
    /// Starts disabled; no output is commanded until a mode is entered.
    ///
    /// Reserves the telemetry and dashboard keys so remote clients cannot
    /// overwrite what the robot publishes.
    pub fn new(
        drivetrain: Drivetrain<P, Enc, A, C>,
        stick: S,
        table: &'t NetworkTable,
        config: RobotConfig,
    ) -> Self {
        table.reserve(&config.telemetry_key);
        for (_, pos_key, rate_key) in DASHBOARD_KEYS {
            table.reserve(pos_key);
            table.reserve(rate_key);
        }
        RobotController {
            drivetrain,
            stick,
            table,
            config,
            mode: RobotMode::Disabled,
            run: None,
        }
    }

    pub fn mode(&self) -> RobotMode {
        self.mode
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    /// The active characterization run, if any.
    pub fn run_state(&self) -> Option<&CharacterizationRun> {
        self.run.as_ref()
    }

    pub fn drivetrain(&self) -> &Drivetrain<P, Enc, A, C> {
        &self.drivetrain
    }

    pub fn drivetrain_mut(&mut self) -> &mut Drivetrain<P, Enc, A, C> {
        &mut self.drivetrain
    }

    /// Enter `mode`, zeroing output first.
    ///
    /// On failure the robot is left disabled with no run active.
    pub fn set_mode(
        &mut self,
        mode: RobotMode,
    ) -> Result<(), DrivetrainError<P, Enc, A>> {
        if mode == self.mode {
            return Ok(());
        }

        self.run = None;
        self.mode = RobotMode::Disabled;
        self.drivetrain.stop().map_err(CycleError::Actuator)?;

        match mode {
            RobotMode::Disabled => tracing::info!("Robot disabled"),
            RobotMode::Teleop => tracing::info!("Robot in operator control mode"),
            RobotMode::Characterization => {
                self.run = Some(CharacterizationRun::start(&mut self.drivetrain, &self.config)?);
                tracing::info!("Robot in characterization mode");
            }
        }
        self.mode = mode;
        Ok(())
    }

    /// Drop any run and command zero output, whatever the current mode.
    pub fn abort(&mut self) -> Result<(), DrivetrainError<P, Enc, A>> {
        self.run = None;
        self.mode = RobotMode::Disabled;
        self.drivetrain.stop().map_err(CycleError::Actuator)
    }

    /// One control cycle for the current mode.
    ///
    /// Returns the published sample in characterization mode. Dashboard
    /// feedback is best effort: its failures are logged, never returned.
    pub fn periodic(&mut self) -> Result<Option<TelemetrySample>, DrivetrainError<P, Enc, A>> {
        let sample = match self.mode {
            RobotMode::Disabled => None,
            RobotMode::Teleop => {
                let (left, right) = arcade_drive(
                    -self.stick.y(),
                    self.stick.x(),
                    true,
                    self.config.deadband,
                );
                self.drivetrain
                    .actuators
                    .apply_command(left, right)
                    .map_err(CycleError::Actuator)?;
                None
            }
            RobotMode::Characterization => match self.run.as_mut() {
                Some(run) => Some(run.cycle(&mut self.drivetrain, self.table)?),
                None => None,
            },
        };

        if self.config.dashboard_feedback {
            if let Err(error) = self.publish_dashboard() {
                tracing::warn!(?error, "dashboard feedback not published");
            }
        }
        Ok(sample)
    }

    fn publish_dashboard(&mut self) -> Result<(), DrivetrainError<P, Enc, A>> {
        let enc = &mut self.drivetrain.encoders;
        for (side, pos_key, rate_key) in DASHBOARD_KEYS {
            let position = enc.position(side).map_err(CycleError::Encoder)?;
            let rate = enc.rate(side).map_err(CycleError::Encoder)?;
            self.table
                .set_double(pos_key, position)
                .map_err(CycleError::Table)?;
            self.table
                .set_double(rate_key, rate)
                .map_err(CycleError::Table)?;
        }
        Ok(())
    }

    /// One loop iteration: drain pending mode requests, then run a cycle.
    ///
    /// A failed cycle aborts the current run and disables the robot.
    pub fn service(&mut self) -> Option<TelemetrySample> {
        while let Ok(mode) = MODE_CHANNEL.try_receive() {
            if let Err(error) = self.set_mode(mode) {
                tracing::error!(?error, ?mode, "mode change failed");
            }
        }

        match self.periodic() {
            Ok(sample) => sample,
            Err(error) => {
                tracing::error!(?error, mode = ?self.mode, "cycle aborted, disabling");
                if let Err(error) = self.abort() {
                    tracing::error!(?error, "failed to stop drivetrain");
                }
                None
            }
        }
    }

    /// Fixed-period loop around [`Self::service`].
    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(self.config.loop_period());
        loop {
            self.service();
            ticker.next().await;
        }
    }
}
