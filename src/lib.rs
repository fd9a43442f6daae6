//! Restaurant cost estimation front end.
//!
//! Inputs are checked by [`validate`](validate::validate), handed to an
//! external calculation engine by [`CalculationBridge`], and can be kept
//! between runs with [`SessionStore`].

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod session;
pub mod validate;

pub use bridge::{CalculationBridge, Diagnostic};
pub use config::{AppConfig, EngineConfig};
pub use error::{CalculationError, CalculationOutcome, EngineFault, ErrorKind};
pub use model::{CalculationResult, CostBreakdownItem, RestaurantInput};
pub use session::SessionStore;
pub use validate::{validate, Severity, ValidationReport};
