//! Small validators shared by configuration loading and the engines.

use crate::error::{CtrlError, CtrlResult};
use std::ops::RangeInclusive;

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty (ignoring surrounding whitespace).
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates a strictly positive, finite time in seconds.
pub fn is_positive_time(value: f64) -> Result<(), &'static str> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err("Time must be a positive number of seconds")
    }
}

/// Validates a duty cycle percentage in `(0, 100]`.
///
/// # Returns
///
/// * `Ok(())` if the percentage is valid.
/// * `Err(CtrlError::Configuration)` otherwise.
pub fn check_duty_cycle(value: f64) -> CtrlResult<()> {
    if value > 0.0 && value <= 100.0 {
        Ok(())
    } else {
        Err(CtrlError::Configuration(format!(
            "Value {value} must be a percentage between 0 (not included) and 100 (included): (0,100]"
        )))
    }
}
