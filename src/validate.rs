//! Pre-dispatch checks on a [`RestaurantInput`].
//!
//! Everything here is pure: the same input always yields the same report,
//! and nothing touches the filesystem or spawns a process.

use std::fmt;

use serde::Serialize;

use crate::model::{EquipmentGrade, RestaurantInput};

pub const FORBIDDEN_NAME_CHARS: [char; 9] = ['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Success => "ok",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// One checked rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub severity: Severity,
    /// Field key or ratio rule the outcome refers to.
    pub subject: &'static str,
    pub message: String,
}

impl ValidationOutcome {
    fn new(severity: Severity, subject: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            subject,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.subject, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub outcomes: Vec<ValidationOutcome>,
}

impl ValidationReport {
    /// Submission is allowed iff no outcome has Error severity.
    pub fn is_submittable(&self) -> bool {
        !self.outcomes.iter().any(ValidationOutcome::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationOutcome> {
        self.outcomes.iter().filter(|o| o.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationOutcome> {
        self.outcomes.iter().filter(|o| o.severity == Severity::Warning)
    }

    pub fn mentions(&self, subject: &str, severity: Severity) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.subject == subject && o.severity == severity)
    }

    /// Error messages joined one per line.
    pub fn error_summary(&self) -> String {
        self.errors()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Thresholds of a ratio rule. All comparisons are strict: a value sitting
/// exactly on a bound is not flagged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioBand {
    pub error_above: f64,
    pub warn_above: f64,
    pub warn_below: f64,
}

pub const WORKSTATION_DENSITY: RatioBand = RatioBand {
    error_above: 0.3,
    warn_above: 0.2,
    warn_below: 0.05,
};

pub const STAFF_DENSITY: RatioBand = RatioBand {
    error_above: 0.5,
    warn_above: 0.3,
    warn_below: 0.05,
};

pub const CAPACITY_PER_STAFF: RatioBand = RatioBand {
    error_above: 100.0,
    warn_above: 50.0,
    warn_below: 5.0,
};

pub const EQUIPMENT_VALUE_PER_SQM: RatioBand = RatioBand {
    error_above: 10_000.0,
    warn_above: 5_000.0,
    warn_below: 500.0,
};

pub const RENT_PER_SQM: RatioBand = RatioBand {
    error_above: 150.0,
    warn_above: 100.0,
    warn_below: 10.0,
};

impl RatioBand {
    pub fn classify(&self, ratio: f64) -> Severity {
        if ratio > self.error_above {
            Severity::Error
        } else if ratio > self.warn_above || ratio < self.warn_below {
            Severity::Warning
        } else {
            Severity::Success
        }
    }
}

/// Runs every rule in order: session name, condition grade, numeric
/// ranges, then cross-field ratios.
pub fn validate(input: &RestaurantInput) -> ValidationReport {
    let mut outcomes = vec![check_session_name(&input.session_name)];

    outcomes.push(check_equipment_condition(input.equipment_condition));

    outcomes.extend(range_checks(input));

    let area_known = input.kitchen_size_sqm.is_finite() && input.kitchen_size_sqm > 0.0;
    if area_known {
        outcomes.push(check_workstation_density(
            input.kitchen_size_sqm,
            input.kitchen_workstations(),
        ));
        outcomes.push(check_staff_density(input.kitchen_size_sqm, input.staff_count));
    }
    if input.staff_count > 0 {
        outcomes.push(check_capacity_per_staff(input.daily_capacity, input.staff_count));
    }
    if area_known && input.equipment_value.is_finite() {
        outcomes.push(check_equipment_value_per_sqm(
            input.kitchen_size_sqm,
            input.equipment_value,
        ));
    }
    if area_known && input.rent_monthly.is_finite() {
        outcomes.push(check_rent_per_sqm(input.location_rent_sqm()));
    }
    if (0.0..=1.0).contains(&input.equipment_condition) {
        outcomes.push(check_equipment_age_condition(
            input.equipment_age_years,
            input.equipment_grade(),
        ));
    }

    ValidationReport { outcomes }
}

pub fn check_session_name(name: &str) -> ValidationOutcome {
    const SUBJECT: &str = "session_name";
    let trimmed = name.trim();
    let len = name.chars().count();

    if trimmed.is_empty() {
        return ValidationOutcome::new(Severity::Error, SUBJECT, "session name is required");
    }
    if len < 3 {
        return ValidationOutcome::new(
            Severity::Error,
            SUBJECT,
            "session name must be at least 3 characters",
        );
    }
    if len > 50 {
        return ValidationOutcome::new(
            Severity::Error,
            SUBJECT,
            "session name cannot exceed 50 characters",
        );
    }
    if let Some(bad) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return ValidationOutcome::new(
            Severity::Error,
            SUBJECT,
            format!("session name contains forbidden character {bad:?}"),
        );
    }
    ValidationOutcome::new(Severity::Success, SUBJECT, "session name is valid")
}

pub fn check_equipment_condition(condition: f64) -> ValidationOutcome {
    const SUBJECT: &str = "equipment_condition";
    if condition.is_finite() && (0.0..=1.0).contains(&condition) {
        ValidationOutcome::new(
            Severity::Success,
            SUBJECT,
            format!(
                "equipment condition {condition:.2} maps to {}",
                EquipmentGrade::from_condition(condition).as_str()
            ),
        )
    } else {
        ValidationOutcome::new(
            Severity::Error,
            SUBJECT,
            format!("equipment_condition must be between 0 and 1 (got {condition})"),
        )
    }
}

fn range_checks(input: &RestaurantInput) -> Vec<ValidationOutcome> {
    vec![
        check_range("staff_count", f64::from(input.staff_count), 1.0, 500.0),
        check_range(
            "training_hours_needed",
            f64::from(input.training_hours_needed),
            0.0,
            200.0,
        ),
        check_range("kitchen_size_sqm", input.kitchen_size_sqm, 10.0, 1000.0),
        check_range("rent_monthly", input.rent_monthly, 0.0, f64::MAX),
        check_range("utility_cost_monthly", input.utility_cost_monthly, 0.0, 10_000.0),
        check_range("equipment_value", input.equipment_value, 0.0, 5_000_000.0),
        check_range(
            "equipment_age_years",
            f64::from(input.equipment_age_years),
            0.0,
            20.0,
        ),
        check_range("daily_capacity", f64::from(input.daily_capacity), 10.0, 500.0),
    ]
}

fn check_range(subject: &'static str, value: f64, min: f64, max: f64) -> ValidationOutcome {
    if !value.is_finite() {
        return ValidationOutcome::new(
            Severity::Error,
            subject,
            format!("{subject} must be a finite number"),
        );
    }
    if value < min || value > max {
        let message = if max == f64::MAX {
            format!("{subject} must be at least {min} (got {value})")
        } else {
            format!("{subject} must be between {min} and {max} (got {value})")
        };
        return ValidationOutcome::new(Severity::Error, subject, message);
    }
    ValidationOutcome::new(Severity::Success, subject, format!("{subject} in range"))
}

fn ratio_outcome(
    band: &RatioBand,
    subject: &'static str,
    ratio: f64,
    high_error: String,
    high_warning: String,
    low_warning: String,
    ok: &str,
) -> ValidationOutcome {
    match band.classify(ratio) {
        Severity::Error => ValidationOutcome::new(Severity::Error, subject, high_error),
        Severity::Warning if ratio > band.warn_above => {
            ValidationOutcome::new(Severity::Warning, subject, high_warning)
        }
        Severity::Warning => ValidationOutcome::new(Severity::Warning, subject, low_warning),
        Severity::Success => ValidationOutcome::new(Severity::Success, subject, ok),
    }
}

pub fn check_workstation_density(kitchen_sqm: f64, workstations: u32) -> ValidationOutcome {
    let ratio = f64::from(workstations) / kitchen_sqm;
    ratio_outcome(
        &WORKSTATION_DENSITY,
        "workstation_density",
        ratio,
        format!(
            "too many workstations ({workstations}) for a {kitchen_sqm} m² kitchen (ratio {ratio:.2})"
        ),
        format!("many workstations for the kitchen size (ratio {ratio:.2})"),
        format!("few workstations for the kitchen size (ratio {ratio:.2})"),
        "workstation/kitchen ratio is appropriate",
    )
}

pub fn check_staff_density(kitchen_sqm: f64, staff_count: u32) -> ValidationOutcome {
    let density = f64::from(staff_count) / kitchen_sqm;
    ratio_outcome(
        &STAFF_DENSITY,
        "staff_density",
        density,
        format!(
            "too many staff ({staff_count}) for a {kitchen_sqm} m² kitchen (density {density:.2})"
        ),
        format!("crowded kitchen (density {density:.2} staff/m²)"),
        format!("sparse kitchen staffing (density {density:.2} staff/m²)"),
        "staff density is appropriate",
    )
}

pub fn check_capacity_per_staff(daily_capacity: u32, staff_count: u32) -> ValidationOutcome {
    const SUBJECT: &str = "capacity_per_staff";
    if staff_count == 0 {
        return ValidationOutcome::new(Severity::Error, SUBJECT, "staff count cannot be zero");
    }
    let ratio = f64::from(daily_capacity) / f64::from(staff_count);
    ratio_outcome(
        &CAPACITY_PER_STAFF,
        SUBJECT,
        ratio,
        format!(
            "capacity/staff ratio too high: {daily_capacity} covers for {staff_count} staff (ratio {ratio:.1})"
        ),
        format!("high capacity per employee ({ratio:.1} covers/staff)"),
        format!("low capacity per employee ({ratio:.1} covers/staff)"),
        "capacity/staff ratio is appropriate",
    )
}

pub fn check_equipment_value_per_sqm(kitchen_sqm: f64, equipment_value: f64) -> ValidationOutcome {
    let per_sqm = equipment_value / kitchen_sqm;
    ratio_outcome(
        &EQUIPMENT_VALUE_PER_SQM,
        "equipment_value_per_sqm",
        per_sqm,
        format!("excessive equipment value ({equipment_value:.2}) for {kitchen_sqm} m² ({per_sqm:.2}/m²)"),
        format!("very expensive equipment ({per_sqm:.2}/m²)"),
        format!("inexpensive equipment ({per_sqm:.2}/m²)"),
        "equipment value is appropriate",
    )
}

pub fn check_rent_per_sqm(rent_per_sqm: f64) -> ValidationOutcome {
    ratio_outcome(
        &RENT_PER_SQM,
        "rent_per_sqm",
        rent_per_sqm,
        format!("excessive rent ({rent_per_sqm:.2}/m²)"),
        format!("very high rent ({rent_per_sqm:.2}/m²)"),
        format!("very low rent ({rent_per_sqm:.2}/m²)"),
        "rent is within market norms",
    )
}

/// Age and grade that rarely occur together are flagged for review only.
pub fn check_equipment_age_condition(age_years: u32, grade: EquipmentGrade) -> ValidationOutcome {
    const SUBJECT: &str = "equipment_age_condition";
    let warning = match grade {
        EquipmentGrade::Excellent if age_years > 2 => {
            Some("old equipment in excellent condition, double-check the inputs")
        }
        EquipmentGrade::Good if age_years > 8 => {
            Some("old equipment in good condition, expect heavy maintenance")
        }
        EquipmentGrade::Fair if age_years < 3 => {
            Some("recent equipment in fair condition, possible defect")
        }
        EquipmentGrade::Poor if age_years < 5 => {
            Some("recent equipment in poor condition, inputs look inconsistent")
        }
        _ => None,
    };
    match warning {
        Some(message) => ValidationOutcome::new(Severity::Warning, SUBJECT, message),
        None => ValidationOutcome::new(Severity::Success, SUBJECT, "age/condition coherent"),
    }
}
