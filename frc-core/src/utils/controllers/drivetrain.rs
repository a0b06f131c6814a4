//! Drivetrain capability seams.
//!
//! The robot loop never talks to motor controllers or sensors directly. It is
//! handed a [`Drivetrain`] bundling four capabilities at the start of a run:
//! actuators, encoders, a power source and a clock. Hardware adapters (CAN
//! controllers, the PCA9685 PWM board, the simulator) implement these traits.

use core::fmt::Debug;

use crate::utils::connection::table::NetworkTable;

/// Drivetrain side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Left/right motor output.
pub trait ActuatorPair {
    type Error: Debug;

    /// Command normalized output in `[-1, 1]` for each side.
    fn apply_command(
        &mut self,
        left: f64,
        right: f64,
    ) -> Result<(), Self::Error>;

    /// Voltage currently applied to one side's motors.
    fn output_voltage(
        &mut self,
        side: Side,
    ) -> Result<f64, Self::Error>;
}

/// Wheel odometry in feet and feet per second.
pub trait EncoderPair {
    type Error: Debug;

    fn position(
        &mut self,
        side: Side,
    ) -> Result<f64, Self::Error>;

    fn rate(
        &mut self,
        side: Side,
    ) -> Result<f64, Self::Error>;

    /// Zero both positions.
    fn reset(&mut self) -> Result<(), Self::Error>;
}

pub trait PowerSource {
    type Error: Debug;

    /// Instantaneous supply voltage.
    fn voltage(&mut self) -> Result<f64, Self::Error>;
}

/// Monotonic time source in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Encoder counts as reported by a motor controller.
pub trait RawEncoder {
    type Error: Debug;

    fn ticks(
        &mut self,
        side: Side,
    ) -> Result<i32, Self::Error>;

    /// Velocity in ticks per 100 ms.
    fn ticks_per_100ms(
        &mut self,
        side: Side,
    ) -> Result<i32, Self::Error>;

    fn zero(&mut self) -> Result<(), Self::Error>;
}

/// Converts raw encoder counts to feet with a fixed linear scale.
pub struct ScaledEncoders<R> {
    raw: R,
    ticks_per_foot: f64,
    rate_periods_per_second: f64,
}

impl<R: RawEncoder> ScaledEncoders<R> {
    pub fn new(
        raw: R,
        ticks_per_foot: f64,
        rate_periods_per_second: f64,
    ) -> Self {
        Self {
            raw,
            ticks_per_foot,
            rate_periods_per_second,
        }
    }
}

impl<R: RawEncoder> EncoderPair for ScaledEncoders<R> {
    type Error = R::Error;

    fn position(
        &mut self,
        side: Side,
    ) -> Result<f64, Self::Error> {
        Ok(self.raw.ticks(side)? as f64 / self.ticks_per_foot)
    }

    fn rate(
        &mut self,
        side: Side,
    ) -> Result<f64, Self::Error> {
        Ok(self.raw.ticks_per_100ms(side)? as f64 / self.ticks_per_foot
            * self.rate_periods_per_second)
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.raw.zero()
    }
}

/// Clock backed by the embassy time driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        embassy_time::Instant::now().as_micros() as f64 / 1_000_000.0
    }
}

/// Explicit wiring for one robot: everything the periodic loop touches.
pub struct Drivetrain<P, Enc, A, C> {
    pub power: P,
    pub encoders: Enc,
    pub actuators: A,
    pub clock: C,
}

impl<P, Enc, A, C> Drivetrain<P, Enc, A, C>
where
    P: PowerSource,
    Enc: EncoderPair,
    A: ActuatorPair,
    C: Clock,
{
    pub fn new(
        power: P,
        encoders: Enc,
        actuators: A,
        clock: C,
    ) -> Self {
        Drivetrain {
            power,
            encoders,
            actuators,
            clock,
        }
    }

    pub fn stop(&mut self) -> Result<(), A::Error> {
        self.actuators.apply_command(0.0, 0.0)
    }
}

/// Operator joystick axes in `[-1, 1]`, +y pointing back as on a gamepad.
pub trait DriverStick {
    fn x(&self) -> f64;
    fn y(&self) -> f64;
}

pub const STICK_X_KEY: &str = "/driver/x";
pub const STICK_Y_KEY: &str = "/driver/y";

/// Joystick whose axes are written into the table by a remote client.
pub struct TableStick<'t> {
    table: &'t NetworkTable,
}

impl<'t> TableStick<'t> {
    pub fn new(table: &'t NetworkTable) -> Self {
        TableStick { table }
    }
}

impl DriverStick for TableStick<'_> {
    fn x(&self) -> f64 {
        self.table.get_double(STICK_X_KEY, 0.0)
    }

    fn y(&self) -> f64 {
        self.table.get_double(STICK_Y_KEY, 0.0)
    }
}
