use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::schema::{FieldDef, TypeDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestaurantTheme {
    FastFood,
    CasualDining,
    FineDining,
    CloudKitchen,
    FoodTruck,
}

impl RestaurantTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestaurantTheme::FastFood => "fast_food",
            RestaurantTheme::CasualDining => "casual_dining",
            RestaurantTheme::FineDining => "fine_dining",
            RestaurantTheme::CloudKitchen => "cloud_kitchen",
            RestaurantTheme::FoodTruck => "food_truck",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueSize {
    Small,
    Medium,
    Large,
    Enterprise,
}

impl RevenueSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevenueSize::Small => "small",
            RevenueSize::Medium => "medium",
            RevenueSize::Large => "large",
            RevenueSize::Enterprise => "enterprise",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Urban,
    Suburban,
    Rural,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Urban => "urban",
            LocationType::Suburban => "suburban",
            LocationType::Rural => "rural",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl EquipmentGrade {
    /// Thresholds: 0.9 excellent, 0.7 good, 0.5 fair, below is poor.
    pub fn from_condition(condition: f64) -> Self {
        if condition >= 0.9 {
            EquipmentGrade::Excellent
        } else if condition >= 0.7 {
            EquipmentGrade::Good
        } else if condition >= 0.5 {
            EquipmentGrade::Fair
        } else {
            EquipmentGrade::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentGrade::Excellent => "excellent",
            EquipmentGrade::Good => "good",
            EquipmentGrade::Fair => "fair",
            EquipmentGrade::Poor => "poor",
        }
    }
}

pub const STAFF_EXPERIENCE_LEVEL: &str = "intermediate";

/// User-entered inputs for one estimate. Derived quantities are methods so
/// they always follow the stored fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantInput {
    pub session_name: String,
    pub restaurant_theme: RestaurantTheme,
    pub revenue_size: RevenueSize,
    pub staff_count: u32,
    pub training_hours_needed: u32,
    pub kitchen_size_sqm: f64,
    pub rent_monthly: f64,
    pub location_type: LocationType,
    pub utility_cost_monthly: f64,
    pub equipment_value: f64,
    /// 0.0 (worn out) to 1.0 (new).
    pub equipment_condition: f64,
    pub equipment_age_years: u32,
    pub daily_capacity: u32,
}

impl Default for RestaurantInput {
    fn default() -> Self {
        Self {
            session_name: String::new(),
            restaurant_theme: RestaurantTheme::CasualDining,
            revenue_size: RevenueSize::Medium,
            staff_count: 10,
            training_hours_needed: 40,
            kitchen_size_sqm: 100.0,
            rent_monthly: 5000.0,
            location_type: LocationType::Urban,
            utility_cost_monthly: 1200.0,
            equipment_value: 50000.0,
            equipment_condition: 0.8,
            equipment_age_years: 2,
            daily_capacity: 150,
        }
    }
}

impl RestaurantInput {
    /// Known-good input used to check the engine end to end.
    pub fn connection_test() -> Self {
        Self {
            session_name: "Test Connection".to_string(),
            staff_count: 15,
            kitchen_size_sqm: 100.0,
            rent_monthly: 4000.0,
            equipment_value: 150_000.0,
            daily_capacity: 200,
            ..Self::default()
        }
    }

    pub fn kitchen_workstations(&self) -> u32 {
        // `as` saturates: NaN and negatives land on 0, then the floor of 2 applies
        let stations = (self.kitchen_size_sqm / 12.5) as u32;
        stations.max(2)
    }

    pub fn location_rent_sqm(&self) -> f64 {
        if self.kitchen_size_sqm > 0.0 {
            self.rent_monthly / self.kitchen_size_sqm
        } else {
            0.0
        }
    }

    pub fn equipment_grade(&self) -> EquipmentGrade {
        EquipmentGrade::from_condition(self.equipment_condition)
    }

    /// Snapshot in the engine's request layout.
    pub fn to_request(&self) -> EngineRequest {
        EngineRequest {
            session_name: self.session_name.clone(),
            restaurant_theme: self.restaurant_theme,
            revenue_size: self.revenue_size,
            kitchen_size_sqm: self.kitchen_size_sqm,
            kitchen_workstations: self.kitchen_workstations(),
            daily_capacity: self.daily_capacity,
            staff_count: self.staff_count,
            staff_experience_level: STAFF_EXPERIENCE_LEVEL.to_string(),
            training_hours_needed: self.training_hours_needed,
            equipment_age_years: self.equipment_age_years,
            equipment_condition: self.equipment_grade(),
            equipment_value: self.equipment_value,
            location_rent_sqm: self.location_rent_sqm(),
        }
    }
}

impl fmt::Display for RestaurantInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session: {} | Theme: {} | Revenue: {} | Staff: {}",
            self.session_name,
            self.restaurant_theme.as_str(),
            self.revenue_size.as_str(),
            self.staff_count
        )
    }
}

/// Request document handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub session_name: String,
    pub restaurant_theme: RestaurantTheme,
    pub revenue_size: RevenueSize,
    pub kitchen_size_sqm: f64,
    pub kitchen_workstations: u32,
    pub daily_capacity: u32,
    pub staff_count: u32,
    pub staff_experience_level: String,
    pub training_hours_needed: u32,
    pub equipment_age_years: u32,
    pub equipment_condition: EquipmentGrade,
    pub equipment_value: f64,
    pub location_rent_sqm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostCategory {
    Staff,
    Equipment,
    Location,
    Operational,
}

impl CostCategory {
    pub const ALL: [CostCategory; 4] = [
        CostCategory::Staff,
        CostCategory::Equipment,
        CostCategory::Location,
        CostCategory::Operational,
    ];

    /// Label the engine uses in `cost_breakdowns[].category`.
    pub fn label(&self) -> &'static str {
        match self {
            CostCategory::Staff => "Staff",
            CostCategory::Equipment => "Equipment",
            CostCategory::Location => "Location",
            CostCategory::Operational => "Operational",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdownItem {
    pub category: String,
    pub subcategory: String,
    pub amount: f64,
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub details: Value,
}

impl CostBreakdownItem {
    /// Details as display text: strings verbatim, anything else as compact JSON.
    pub fn details_text(&self) -> String {
        match &self.details {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    #[serde(deserialize_with = "string_or_number")]
    pub session_id: String,
    pub session_name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub calculation_timestamp: String,
    pub validation_passed: bool,
    pub staff_costs: f64,
    pub equipment_costs: f64,
    pub location_costs: f64,
    pub operational_costs: f64,
    pub total_cost: f64,
    #[serde(default)]
    pub cost_breakdowns: Vec<CostBreakdownItem>,
}

impl CalculationResult {
    pub fn category_cost(&self, category: CostCategory) -> f64 {
        match category {
            CostCategory::Staff => self.staff_costs,
            CostCategory::Equipment => self.equipment_costs,
            CostCategory::Location => self.location_costs,
            CostCategory::Operational => self.operational_costs,
        }
    }

    pub fn category_total(&self) -> f64 {
        CostCategory::ALL.iter().map(|c| self.category_cost(*c)).sum()
    }

    /// Advisory check that the four categories add up to the total, within
    /// 1% of the sum (never less than one currency unit).
    pub fn is_consistent(&self) -> bool {
        let sum = self.category_total();
        let tolerance = (sum.abs() * 0.01).max(1.0);
        (self.total_cost - sum).abs() <= tolerance
    }

    /// Share of the total in percent, 0 when the total is not positive.
    pub fn share_of_total(&self, category: CostCategory) -> f64 {
        if self.total_cost > 0.0 {
            self.category_cost(category) / self.total_cost * 100.0
        } else {
            0.0
        }
    }

    /// First negative monetary amount, by field name.
    pub fn first_negative_amount(&self) -> Option<(String, f64)> {
        let totals = [
            ("staff_costs", self.staff_costs),
            ("equipment_costs", self.equipment_costs),
            ("location_costs", self.location_costs),
            ("operational_costs", self.operational_costs),
            ("total_cost", self.total_cost),
        ];
        if let Some((name, amount)) = totals.iter().find(|(_, v)| *v < 0.0) {
            return Some((name.to_string(), *amount));
        }
        self.cost_breakdowns
            .iter()
            .enumerate()
            .find(|(_, item)| item.amount < 0.0)
            .map(|(idx, item)| (format!("cost_breakdowns[{idx}].amount"), item.amount))
    }

    /// Breakdown lines of one category (case-insensitive). When the engine
    /// sent no operational lines but a positive operational cost, a single
    /// aggregate line stands in for them.
    pub fn breakdowns_for(&self, category: CostCategory) -> Vec<CostBreakdownItem> {
        let items: Vec<CostBreakdownItem> = self
            .cost_breakdowns
            .iter()
            .filter(|b| b.category.eq_ignore_ascii_case(category.label()))
            .cloned()
            .collect();

        if items.is_empty() && category == CostCategory::Operational && self.operational_costs > 0.0
        {
            return vec![CostBreakdownItem {
                category: category.label().to_string(),
                subcategory: "total_operational_costs".to_string(),
                amount: self.operational_costs,
                formula: format!("{:.2}", self.operational_costs),
                details: Value::String("Operational costs reported by the engine".to_string()),
            }];
        }

        items
    }
}

impl fmt::Display for CalculationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session: {}", self.session_name)?;
        writeln!(f, "Total cost: {:.2}", self.total_cost)?;
        for category in CostCategory::ALL {
            writeln!(
                f,
                "  {:<12} {:>14.2} ({:.1}%)",
                category.label(),
                self.category_cost(category),
                self.share_of_total(category)
            )?;
        }
        if !self.cost_breakdowns.is_empty() {
            writeln!(f)?;
            writeln!(f, "Breakdown:")?;
            for item in &self.cost_breakdowns {
                writeln!(
                    f,
                    "  {} > {}: {:.2}  [{}]",
                    item.category, item.subcategory, item.amount, item.formula
                )?;
            }
        }
        write!(
            f,
            "Validation: {}",
            if self.validation_passed { "passed" } else { "failed" }
        )
    }
}

/// Error document the engine emits instead of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineErrorDocument {
    pub error: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl EngineErrorDocument {
    /// Recognizes the error shape: an object with a string `error` key.
    pub fn detect(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        obj.get("error")?.as_str()?;
        serde_json::from_value(value.clone()).ok()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

// TypeDef for CalculationResult (checked before typed deserialization)
pub fn calculation_result_typedef() -> TypeDef {
    TypeDef::Object(vec![
        FieldDef::required("session_id", TypeDef::TextOrNumber),
        FieldDef::required("session_name", TypeDef::Text),
        FieldDef::optional("calculation_timestamp", TypeDef::TextOrNumber),
        FieldDef::required("validation_passed", TypeDef::Bool),
        FieldDef::required("staff_costs", TypeDef::Number),
        FieldDef::required("equipment_costs", TypeDef::Number),
        FieldDef::required("location_costs", TypeDef::Number),
        FieldDef::required("operational_costs", TypeDef::Number),
        FieldDef::required("total_cost", TypeDef::Number),
        FieldDef::optional(
            "cost_breakdowns",
            TypeDef::List(Box::new(TypeDef::Object(vec![
                FieldDef::required("category", TypeDef::Text),
                FieldDef::required("subcategory", TypeDef::Text),
                FieldDef::required("amount", TypeDef::Number),
                FieldDef::optional("formula", TypeDef::Text),
                FieldDef::optional("details", TypeDef::Any),
            ]))),
        ),
    ])
}
