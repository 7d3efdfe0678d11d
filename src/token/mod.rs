//! SAS token parameters, wire forms and issuance.

pub mod factory;
pub mod parameters;

pub use factory::{TokenFactory, generate_nonce};
pub use parameters::{InvalidToken, InvalidTokenReason, ParsedToken, TokenParameters};
