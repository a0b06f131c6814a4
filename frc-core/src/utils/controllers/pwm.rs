//! PWM motor controllers driven through a PCA9685 on a shared I2C bus.
//!
//! Hobby-style PWM motor controllers expect a 50 Hz servo pulse: 1.0 ms is
//! full reverse, 1.5 ms neutral and 2.0 ms full forward. They report nothing
//! back, so applied voltage is estimated from the last command.

use core::cell::RefCell;

use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use pwm_pca9685::{Address as PwmAddress, Channel, Error as PwmError, Pca9685};

use crate::utils::{
    controllers::drivetrain::{ActuatorPair, Side},
    math::drive::clamp_unit,
};

/// Prescale for a 50 Hz output from the 25 MHz internal oscillator.
pub const PRESCALE_50HZ: u8 = 121;
const PERIOD_US: f64 = 20_000.0;
const NEUTRAL_PULSE_US: f64 = 1_500.0;
const PULSE_SPAN_US: f64 = 500.0;
const COUNTS_PER_PERIOD: f64 = 4096.0;

/// Errors that can occur when driving the PWM board.
#[derive(Debug)]
pub enum DriveError<E: core::fmt::Debug> {
    PwmError(PwmError<E>),
    PwmNotInitialized,
}

/// Off-count for a normalized command.
pub fn pulse_counts(command: f64) -> u16 {
    let pulse_us = NEUTRAL_PULSE_US + clamp_unit(command) * PULSE_SPAN_US;
    libm::round(pulse_us * COUNTS_PER_PERIOD / PERIOD_US) as u16
}

/// Two-sided drivetrain output through a PCA9685.
pub struct PwmDrive<'a, I2C: 'static> {
    i2c: &'a RefCell<I2C>,
    address: u8,
    pub pwm: Option<Pca9685<RefCellDevice<'a, I2C>>>,
    channels: [Channel; 2],
    last_command: [f64; 2],
    nominal_voltage: f64,
}

impl<'a, I2C, E> PwmDrive<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    /// Left output on `C0`, right on `C1`.
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        address: u8,
        nominal_voltage: f64,
    ) -> Self {
        PwmDrive {
            i2c: i2c_bus,
            address,
            pwm: None,
            channels: [Channel::C0, Channel::C1],
            last_command: [0.0; 2],
            nominal_voltage,
        }
    }

    /// Create the driver, wake it and set the 50 Hz prescale.
    pub fn init(&mut self) -> Result<(), DriveError<E>> {
        let mut pca = Pca9685::new(RefCellDevice::new(self.i2c), PwmAddress::from(self.address))
            .map_err(DriveError::PwmError)?;
        pca.enable().map_err(DriveError::PwmError)?;
        pca.set_prescale(PRESCALE_50HZ)
            .map_err(DriveError::PwmError)?;
        tracing::info!(address = self.address, "PWM drive enabled at 50Hz");
        self.pwm = Some(pca);
        Ok(())
    }

    /// Put the board to sleep; controllers see no pulse and go neutral.
    pub fn disable(&mut self) -> Result<(), DriveError<E>> {
        let pca = self.pwm.as_mut().ok_or(DriveError::PwmNotInitialized)?;
        pca.disable().map_err(DriveError::PwmError)?;
        self.last_command = [0.0; 2];
        Ok(())
    }

    fn write_side(
        &mut self,
        side: Side,
        command: f64,
    ) -> Result<(), DriveError<E>> {
        let channel = self.channels[side.index()];
        let pca = self.pwm.as_mut().ok_or(DriveError::PwmNotInitialized)?;
        pca.set_channel_on_off(channel, 0, pulse_counts(command))
            .map_err(DriveError::PwmError)?;
        self.last_command[side.index()] = clamp_unit(command);
        Ok(())
    }
}

impl<I2C, E> ActuatorPair for PwmDrive<'_, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    type Error = DriveError<E>;

    fn apply_command(
        &mut self,
        left: f64,
        right: f64,
    ) -> Result<(), Self::Error> {
        self.write_side(Side::Left, left)?;
        if let Err(error) = self.write_side(Side::Right, right) {
            // Never leave the left side driving on its own.
            if let Err(stop_error) = self.write_side(Side::Left, 0.0) {
                tracing::error!(?stop_error, "failed to neutralize left output");
            }
            return Err(error);
        }
        Ok(())
    }

    fn output_voltage(
        &mut self,
        side: Side,
    ) -> Result<f64, Self::Error> {
        if self.pwm.is_none() {
            return Err(DriveError::PwmNotInitialized);
        }
        Ok(self.last_command[side.index()] * self.nominal_voltage)
    }
}
