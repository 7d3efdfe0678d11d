//! Token validation.

pub mod pipeline;
pub mod result;

pub use pipeline::TokenValidator;
pub use result::{TokenResponseCode, ValidationResult};
