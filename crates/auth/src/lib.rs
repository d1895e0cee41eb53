//! `inflow-auth`: token validation and role gates.
//!
//! Decoupled from HTTP and storage. Tokens are minted elsewhere; this crate
//! only verifies them and turns their claims into an [`inflow_core::Actor`].

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod roles;

pub use authorize::{AuthzError, Gate, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use roles::Role;
