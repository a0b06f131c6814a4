//! Utility re-exports and helper macros for the characterization robot.
//!
//! - `config`: robot configuration and validation
//! - `connection`: key-value table and the WebSocket bridge serving it
//! - `controllers`: robot modes, the telemetry loop and drivetrain seams
//! - `math`: differential-drive mixing helpers
//! - `sim`: first-order drivetrain plant for host runs and tests
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod connection;
pub mod controllers;
pub mod math;
pub mod sim;

pub use config::RobotConfig;
pub use connection::{server::run as wss, table::NetworkTable};
pub use controllers::{RobotController, RobotMode};
pub use embassy_time::*;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
