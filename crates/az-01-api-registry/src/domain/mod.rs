//! Domain types for the API registry.

pub mod context;
pub mod error;
pub mod history;
pub mod registration;
pub mod schema;

// Re-exports for convenience
pub use context::{Authentication, CallContext, CallMetadata, AUTHORIZATION_HEADER};
pub use error::{ApiError, ApiResult};
pub use history::{AttemptRecord, CallHistory, CallRecord};
pub use registration::{full_name, ApiInfo, ApiRegistration, ApiStats, RegisterOptions};
pub use schema::{ParamSpec, ParamType, ParameterSchema, Parameters};
