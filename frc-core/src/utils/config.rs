//! Robot configuration.
//!
//! Every field has a default matching the stock characterization setup, so a
//! config file only needs to name what it overrides:
//!
//! ```rust
//! use frc_core::utils::config::RobotConfig;
//! let cfg: RobotConfig = serde_json::from_str(r#"{ "loop_period_ms": 10 }"#).unwrap();
//! assert_eq!(cfg.table_update_rate_ms, 10);
//! assert!(cfg.validate().is_ok());
//! ```

use alloc::string::{String, ToString};

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Encoder ticks per foot of wheel travel, measured on the robot.
///
/// The nominal `(1 / 4096) * 0.1524 * PI` constant does not match the
/// drivetrain's gearing; keep this calibrated value until it is re-measured.
pub const CALIBRATED_TICKS_PER_FOOT: f64 = 1935.0;

/// Encoder velocity is reported in ticks per 100 ms.
pub const RATE_PERIODS_PER_SECOND: f64 = 10.0;

pub const AUTOSPEED_KEY: &str = "/robot/autospeed";
pub const TELEMETRY_KEY: &str = "/robot/telemetry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroLoopPeriod,
    /// The table would batch several samples into one flush.
    UpdateRateTooSlow { update_rate_ms: u64, loop_period_ms: u64 },
    InvalidScale,
    EmptyKey(&'static str),
    InvalidDeadband,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Control cycle period.
    pub loop_period_ms: u64,
    /// Table flush interval, must not exceed the loop period.
    pub table_update_rate_ms: u64,
    pub ticks_per_foot: f64,
    pub rate_periods_per_second: f64,
    pub autospeed_key: String,
    pub telemetry_key: String,
    pub deadband: f64,
    /// Publish encoder readings under `/SmartDashboard/` every cycle.
    pub dashboard_feedback: bool,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: 20,
            table_update_rate_ms: 10,
            ticks_per_foot: CALIBRATED_TICKS_PER_FOOT,
            rate_periods_per_second: RATE_PERIODS_PER_SECOND,
            autospeed_key: AUTOSPEED_KEY.to_string(),
            telemetry_key: TELEMETRY_KEY.to_string(),
            deadband: 0.0,
            dashboard_feedback: true,
        }
    }
}

impl RobotConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(self.loop_period_ms)
    }

    pub fn table_update_rate(&self) -> Duration {
        Duration::from_millis(self.table_update_rate_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_period_ms == 0 {
            return Err(ConfigError::ZeroLoopPeriod);
        }
        if self.table_update_rate_ms == 0 || self.table_update_rate_ms > self.loop_period_ms {
            return Err(ConfigError::UpdateRateTooSlow {
                update_rate_ms: self.table_update_rate_ms,
                loop_period_ms: self.loop_period_ms,
            });
        }
        if !(self.ticks_per_foot > 0.0) || !(self.rate_periods_per_second > 0.0) {
            return Err(ConfigError::InvalidScale);
        }
        if self.autospeed_key.is_empty() {
            return Err(ConfigError::EmptyKey("autospeed_key"));
        }
        if self.telemetry_key.is_empty() {
            return Err(ConfigError::EmptyKey("telemetry_key"));
        }
        if !(0.0..1.0).contains(&self.deadband) {
            return Err(ConfigError::InvalidDeadband);
        }
        Ok(())
    }
}
