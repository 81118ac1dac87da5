//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FailoverConfig (validated, immutable)
//!     → candidates, breaker settings and deadline handed to the engine
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::BackendConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::ExecutionConfig;
pub use schema::FailoverConfig;
pub use schema::ObservabilityConfig;
pub use schema::Pricing;
pub use schema::TrackingConfig;
pub use validation::ValidationError;
