//! Drivetrain characterization telemetry loop.
//!
//! Each cycle samples the drivetrain, reads one externally written speed
//! command, applies it to both sides and publishes the sample as a single
//! nine-element array for an offline system-identification logger.
//!
//! Every field except `commanded_speed` is read before the new command is
//! applied, so voltages, positions and rates describe the result of the
//! previous cycle's command.

use alloc::string::String;

use crate::utils::{
    config::RobotConfig,
    connection::table::{NetworkTable, TableError},
    controllers::drivetrain::{
        ActuatorPair, Clock, Drivetrain, EncoderPair, PowerSource, Side,
    },
    math::drive::clamp_unit,
};

/// Number of values in a published sample.
pub const TELEMETRY_FIELDS: usize = 9;

/// One control cycle's worth of drivetrain state, in publish order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySample {
    /// Monotonic seconds.
    pub timestamp: f64,
    pub battery_voltage: f64,
    /// Command applied this cycle, in `[-1, 1]`.
    pub commanded_speed: f64,
    pub left_motor_volts: f64,
    pub right_motor_volts: f64,
    /// Feet since run start.
    pub left_position: f64,
    pub right_position: f64,
    /// Feet per second.
    pub left_rate: f64,
    pub right_rate: f64,
}

impl TelemetrySample {
    pub fn to_array(&self) -> [f64; TELEMETRY_FIELDS] {
        [
            self.timestamp,
            self.battery_voltage,
            self.commanded_speed,
            self.left_motor_volts,
            self.right_motor_volts,
            self.left_position,
            self.right_position,
            self.left_rate,
            self.right_rate,
        ]
    }

    /// Parse a published array; `None` unless it has exactly nine values.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let v: &[f64; TELEMETRY_FIELDS] = values.try_into().ok()?;
        Some(TelemetrySample {
            timestamp: v[0],
            battery_voltage: v[1],
            commanded_speed: v[2],
            left_motor_volts: v[3],
            right_motor_volts: v[4],
            left_position: v[5],
            right_position: v[6],
            left_rate: v[7],
            right_rate: v[8],
        })
    }
}

/// A failed cycle. Nothing was published.
#[derive(Debug)]
pub enum CycleError<PE, EE, AE> {
    Power(PE),
    Encoder(EE),
    Actuator(AE),
    Table(TableError),
}

/// `CycleError` specialised to a drivetrain's capability errors.
pub type DrivetrainError<P, Enc, A> = CycleError<
    <P as PowerSource>::Error,
    <Enc as EncoderPair>::Error,
    <A as ActuatorPair>::Error,
>;

/// State scoped to one characterization run.
pub struct CharacterizationRun {
    autospeed_key: String,
    telemetry_key: String,
    prior_autospeed: f64,
    cycles: u32,
}

impl CharacterizationRun {
    /// Begin a run: zero the encoders so positions start from 0.
    pub fn start<P, Enc, A, C>(
        drivetrain: &mut Drivetrain<P, Enc, A, C>,
        config: &RobotConfig,
    ) -> Result<Self, DrivetrainError<P, Enc, A>>
    where
        P: PowerSource,
        Enc: EncoderPair,
        A: ActuatorPair,
        C: Clock,
    {
        drivetrain.encoders.reset().map_err(CycleError::Encoder)?;
        tracing::info!(
            autospeed = %config.autospeed_key,
            telemetry = %config.telemetry_key,
            "characterization run started"
        );
        Ok(CharacterizationRun {
            autospeed_key: config.autospeed_key.clone(),
            telemetry_key: config.telemetry_key.clone(),
            prior_autospeed: 0.0,
            cycles: 0,
        })
    }

    /// Command read on the most recent cycle.
    pub fn prior_command(&self) -> f64 {
        self.prior_autospeed
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Run one control cycle.
    pub fn cycle<P, Enc, A, C>(
        &mut self,
        drivetrain: &mut Drivetrain<P, Enc, A, C>,
        table: &NetworkTable,
    ) -> Result<TelemetrySample, DrivetrainError<P, Enc, A>>
    where
        P: PowerSource,
        Enc: EncoderPair,
        A: ActuatorPair,
        C: Clock,
    {
        // Sample before commanding the motors.
        let now = drivetrain.clock.now();

        let enc = &mut drivetrain.encoders;
        let left_position = enc.position(Side::Left).map_err(CycleError::Encoder)?;
        let left_rate = enc.rate(Side::Left).map_err(CycleError::Encoder)?;
        let right_position = enc.position(Side::Right).map_err(CycleError::Encoder)?;
        let right_rate = enc.rate(Side::Right).map_err(CycleError::Encoder)?;

        let battery = drivetrain.power.voltage().map_err(CycleError::Power)?;

        let act = &mut drivetrain.actuators;
        let left_motor_volts = act.output_voltage(Side::Left).map_err(CycleError::Actuator)?;
        let right_motor_volts = act.output_voltage(Side::Right).map_err(CycleError::Actuator)?;

        let autospeed = clamp_unit(table.get_double(&self.autospeed_key, 0.0));
        self.prior_autospeed = autospeed;

        act.apply_command(autospeed, autospeed)
            .map_err(CycleError::Actuator)?;

        let sample = TelemetrySample {
            timestamp: now,
            battery_voltage: battery,
            commanded_speed: autospeed,
            left_motor_volts,
            right_motor_volts,
            left_position,
            right_position,
            left_rate,
            right_rate,
        };
        table
            .set_double_array(&self.telemetry_key, &sample.to_array())
            .map_err(CycleError::Table)?;

        self.cycles = self.cycles.wrapping_add(1);
        tracing::trace!(cycle = self.cycles, ?sample, "telemetry published");
        Ok(sample)
    }
}
