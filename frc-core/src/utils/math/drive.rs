//! Differential-drive mixing helpers.
//!
//! # Example
//! ```rust
//! use frc_core::utils::math::drive::arcade_drive;
//! let (left, right) = arcade_drive(0.5, 0.0, false, 0.0);
//! assert_eq!((left, right), (0.5, 0.5));
//! ```

/// Clamp to `[-1, 1]`, mapping NaN to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Zero inputs inside `deadband`, rescaling the rest so output stays
/// continuous at the band edge.
pub fn apply_deadband(
    value: f64,
    deadband: f64,
) -> f64 {
    let magnitude = libm::fabs(value);
    if magnitude <= deadband {
        0.0
    } else {
        libm::copysign((magnitude - deadband) / (1.0 - deadband), value)
    }
}

/// Mix forward speed and rotation into `(left, right)` outputs.
///
/// `x_speed` is forward positive, `z_rotation` clockwise positive. With
/// `square_inputs` both are squared (sign kept) for finer low-speed control.
pub fn arcade_drive(
    x_speed: f64,
    z_rotation: f64,
    square_inputs: bool,
    deadband: f64,
) -> (f64, f64) {
    let mut x = apply_deadband(clamp_unit(x_speed), deadband);
    let mut z = apply_deadband(clamp_unit(z_rotation), deadband);

    if square_inputs {
        x = libm::copysign(x * x, x);
        z = libm::copysign(z * z, z);
    }

    let max_input = libm::copysign(libm::fmax(libm::fabs(x), libm::fabs(z)), x);

    let (left, right) = if x >= 0.0 {
        if z >= 0.0 {
            (max_input, x - z)
        } else {
            (x + z, max_input)
        }
    } else if z >= 0.0 {
        (x + z, max_input)
    } else {
        (max_input, x - z)
    };

    (clamp_unit(left), clamp_unit(right))
}

/// Speed reachable after covering `target_pos - start_pos` at constant
/// `acceleration`, starting from `target_speed`.
pub fn velocity_by_distance(
    target_speed: f64,
    acceleration: f64,
    start_pos: f64,
    target_pos: f64,
) -> f64 {
    libm::sqrt(
        target_speed * target_speed
            + 2.0 * libm::fabs(acceleration) * libm::fabs(target_pos - start_pos),
    )
}
