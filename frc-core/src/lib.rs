//! Drivetrain characterization core for an FRC-style differential robot on
//! no-std platforms.
//!
//! The host simulator lives in `frc-app/sim-robot`.
#![no_std]

extern crate alloc;

pub mod utils;
