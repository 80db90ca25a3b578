//! Core type definitions for Aegis.
//!
//! Data structures shared by the security guard, the policy engine, the
//! budget tracker, the router and the governance pipeline.

pub mod audit;
pub mod budget;
pub mod message;
pub mod policy;
pub mod provider;
pub mod request;
pub mod security;

pub use audit::*;
pub use budget::*;
pub use message::*;
pub use policy::*;
pub use provider::*;
pub use request::*;
pub use security::*;
