//! First-order simulated drivetrain.
//!
//! Each side is a DC motor model: `V = kS·sgn(v) + kV·v + kA·a`, with applied
//! voltage `command × battery`. The battery sags linearly with total command.
//! Encoders report integer ticks at the calibrated ticks-per-foot scale,
//! velocity in ticks per 100 ms, the same way a CAN motor controller would.
//!
//! The plant is shared by its capability handles through a `&RefCell`, the
//! same way bus devices share one I2C peripheral.

use core::{cell::RefCell, convert::Infallible};

use crate::utils::{
    config::{CALIBRATED_TICKS_PER_FOOT, RATE_PERIODS_PER_SECOND},
    controllers::drivetrain::{ActuatorPair, Clock, DriverStick, PowerSource, RawEncoder, Side},
    math::drive::clamp_unit,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantParams {
    /// Static friction, volts.
    pub ks: f64,
    /// Volts per ft/s.
    pub kv: f64,
    /// Volts per ft/s².
    pub ka: f64,
    /// Open-circuit battery voltage.
    pub battery_open_circuit: f64,
    /// Sag in volts at full command on both sides.
    pub battery_sag: f64,
    pub ticks_per_foot: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        PlantParams {
            ks: 1.0,
            kv: 1.0,
            ka: 0.2,
            battery_open_circuit: 12.6,
            battery_sag: 1.2,
            ticks_per_foot: CALIBRATED_TICKS_PER_FOOT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Wheel {
    command: f64,
    velocity: f64,
    position: f64,
    zero_offset: f64,
}

pub struct SimPlant {
    params: PlantParams,
    wheels: [Wheel; 2],
    time: f64,
}

impl SimPlant {
    pub fn new(params: PlantParams) -> Self {
        SimPlant {
            params,
            wheels: [Wheel::default(); 2],
            time: 0.0,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn battery_voltage(&self) -> f64 {
        let load = (libm::fabs(self.wheels[0].command) + libm::fabs(self.wheels[1].command)) / 2.0;
        self.params.battery_open_circuit - self.params.battery_sag * load
    }

    pub fn command(
        &self,
        side: Side,
    ) -> f64 {
        self.wheels[side.index()].command
    }

    pub fn applied_voltage(
        &self,
        side: Side,
    ) -> f64 {
        self.wheels[side.index()].command * self.battery_voltage()
    }

    /// Velocity in ft/s, before encoder quantization.
    pub fn velocity(
        &self,
        side: Side,
    ) -> f64 {
        self.wheels[side.index()].velocity
    }

    /// Advance the model by `dt` seconds.
    pub fn step(
        &mut self,
        dt: f64,
    ) {
        let battery = self.battery_voltage();
        let p = self.params;
        for wheel in self.wheels.iter_mut() {
            let applied = wheel.command * battery;
            let friction = if wheel.velocity != 0.0 {
                libm::copysign(p.ks, wheel.velocity)
            } else if libm::fabs(applied) > p.ks {
                libm::copysign(p.ks, applied)
            } else {
                applied
            };
            let accel = (applied - friction - p.kv * wheel.velocity) / p.ka;
            let next = wheel.velocity + accel * dt;
            // Friction can stop the wheel but never reverse it.
            wheel.velocity = if wheel.velocity != 0.0 && next * wheel.velocity < 0.0 {
                0.0
            } else {
                next
            };
            wheel.position += wheel.velocity * dt;
        }
        self.time += dt;
    }

    fn set_command(
        &mut self,
        left: f64,
        right: f64,
    ) {
        self.wheels[0].command = clamp_unit(left);
        self.wheels[1].command = clamp_unit(right);
    }

    fn ticks(
        &self,
        side: Side,
    ) -> i32 {
        let w = &self.wheels[side.index()];
        ((w.position - w.zero_offset) * self.params.ticks_per_foot) as i32
    }

    fn ticks_per_100ms(
        &self,
        side: Side,
    ) -> i32 {
        (self.wheels[side.index()].velocity * self.params.ticks_per_foot / RATE_PERIODS_PER_SECOND)
            as i32
    }

    fn zero_encoders(&mut self) {
        for wheel in self.wheels.iter_mut() {
            wheel.zero_offset = wheel.position;
        }
    }
}

/// Battery voltage of the simulated plant.
pub struct SimPower<'a> {
    plant: &'a RefCell<SimPlant>,
}

impl<'a> SimPower<'a> {
    pub fn new(plant: &'a RefCell<SimPlant>) -> Self {
        SimPower { plant }
    }
}

impl PowerSource for SimPower<'_> {
    type Error = Infallible;

    fn voltage(&mut self) -> Result<f64, Self::Error> {
        Ok(self.plant.borrow().battery_voltage())
    }
}

/// Raw encoder counts of the simulated plant.
pub struct SimEncoders<'a> {
    plant: &'a RefCell<SimPlant>,
}

impl<'a> SimEncoders<'a> {
    pub fn new(plant: &'a RefCell<SimPlant>) -> Self {
        SimEncoders { plant }
    }
}

impl RawEncoder for SimEncoders<'_> {
    type Error = Infallible;

    fn ticks(
        &mut self,
        side: Side,
    ) -> Result<i32, Self::Error> {
        Ok(self.plant.borrow().ticks(side))
    }

    fn ticks_per_100ms(
        &mut self,
        side: Side,
    ) -> Result<i32, Self::Error> {
        Ok(self.plant.borrow().ticks_per_100ms(side))
    }

    fn zero(&mut self) -> Result<(), Self::Error> {
        self.plant.borrow_mut().zero_encoders();
        Ok(())
    }
}

/// Motor outputs of the simulated plant.
pub struct SimActuators<'a> {
    plant: &'a RefCell<SimPlant>,
}

impl<'a> SimActuators<'a> {
    pub fn new(plant: &'a RefCell<SimPlant>) -> Self {
        SimActuators { plant }
    }
}

impl ActuatorPair for SimActuators<'_> {
    type Error = Infallible;

    fn apply_command(
        &mut self,
        left: f64,
        right: f64,
    ) -> Result<(), Self::Error> {
        self.plant.borrow_mut().set_command(left, right);
        Ok(())
    }

    fn output_voltage(
        &mut self,
        side: Side,
    ) -> Result<f64, Self::Error> {
        Ok(self.plant.borrow().applied_voltage(side))
    }
}

/// Simulation time.
pub struct SimClock<'a> {
    plant: &'a RefCell<SimPlant>,
}

impl<'a> SimClock<'a> {
    pub fn new(plant: &'a RefCell<SimPlant>) -> Self {
        SimClock { plant }
    }
}

impl Clock for SimClock<'_> {
    fn now(&self) -> f64 {
        self.plant.borrow().time()
    }
}

/// Stick parked at center.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleStick;

impl DriverStick for IdleStick {
    fn x(&self) -> f64 {
        0.0
    }

    fn y(&self) -> f64 {
        0.0
    }
}
