//! Threshold rules
//!
//! Only the condition belonging to the field that was just updated is
//! evaluated:
//!
//! ```text
//! water/milk/beans level < threshold   → Breached (WARNING)     level ≥ threshold → Recovered
//! temperature outside [min, max]       → Breached (WARNING, CRITICAL beyond the margin)
//! status == ERROR                      → Breached (CRITICAL)
//! ```
//!
//! Malfunctions never recover on their own; the evaluator only honours
//! `Recovered` for alert types that auto-resolve.

use crate::config::Thresholds;
use crate::telemetry::Field;
use crate::{AlertType, MachineStatus, MachineTelemetryState, Severity};

/// A condition that calls for an open alert
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub threshold_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Condition holds, nothing to do
    Ok,

    /// Condition is breached
    Breached(Breach),

    /// Condition holds again; open alerts of this type may auto-resolve
    Recovered(AlertType),
}

/// Evaluate the condition watched by `field` against the post-update snapshot
///
/// `previous_status` is the status before the update and only shows up in
/// the message of a status malfunction.
pub fn evaluate(
    field: Field,
    current: &MachineTelemetryState,
    previous_status: MachineStatus,
    thresholds: &Thresholds,
) -> Evaluation {
    match field {
        Field::WaterLevel => evaluate_level(
            AlertType::LowWater,
            "Water",
            current.water_level_pct,
            thresholds.low_water,
        ),
        Field::MilkLevel => evaluate_level(
            AlertType::LowMilk,
            "Milk",
            current.milk_level_pct,
            thresholds.low_milk,
        ),
        Field::BeansLevel => evaluate_level(
            AlertType::LowBeans,
            "Beans",
            current.beans_level_pct,
            thresholds.low_beans,
        ),
        Field::Temperature => evaluate_temperature(current.temperature_c, thresholds),
        Field::Status => evaluate_status(current.status, previous_status),
    }
}

fn evaluate_level(
    alert_type: AlertType,
    supply: &str,
    level: Option<u8>,
    threshold: u8,
) -> Evaluation {
    let Some(level) = level else {
        return Evaluation::Ok;
    };

    if level < threshold {
        return Evaluation::Breached(Breach {
            alert_type,
            severity: Severity::Warning,
            message: format!("{supply} level is low: {level}% (threshold: {threshold}%)"),
            threshold_value: f64::from(threshold),
        });
    }

    Evaluation::Recovered(alert_type)
}

fn evaluate_temperature(temperature: Option<f64>, thresholds: &Thresholds) -> Evaluation {
    let Some(temp) = temperature else {
        return Evaluation::Ok;
    };

    let Thresholds {
        min_temperature: min,
        max_temperature: max,
        critical_margin: margin,
        ..
    } = *thresholds;

    let message = if temp < min {
        format!("Temperature too low: {temp:.1}°C (min: {min:.1}°C)")
    } else if temp > max {
        format!("Temperature too high: {temp:.1}°C (max: {max:.1}°C)")
    } else {
        // back in band does not resolve a malfunction
        return Evaluation::Ok;
    };

    let severity = if temp < min - margin || temp > max + margin {
        Severity::Critical
    } else {
        Severity::Warning
    };

    Evaluation::Breached(Breach {
        alert_type: AlertType::Malfunction,
        severity,
        message,
        threshold_value: temp,
    })
}

fn evaluate_status(status: MachineStatus, previous: MachineStatus) -> Evaluation {
    if status != MachineStatus::Error {
        return Evaluation::Ok;
    }

    Evaluation::Breached(Breach {
        alert_type: AlertType::Malfunction,
        severity: Severity::Critical,
        message: format!("Machine is in ERROR state (was: {previous})"),
        threshold_value: 0.0,
    })
}
