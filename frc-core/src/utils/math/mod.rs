//! Math utilities for the characterization robot.
//!
//! This module provides differential-drive mixing and motion-profile helpers.

pub mod drive;
