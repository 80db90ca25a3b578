//! Collaborator contracts for Aegis.
//!
//! - `security`: detection plugins (sync and async capability)
//! - `policy`: rule source and request rate counter
//! - `budget`: persistent budget records
//! - `provider`: upstream provider adapters
//! - `audit`: audit/observability sink
//! - `clock`: injectable wall clock

pub mod audit;
pub mod budget;
pub mod clock;
pub mod policy;
pub mod provider;
pub mod security;

pub use audit::*;
pub use budget::*;
pub use clock::*;
pub use policy::*;
pub use provider::*;
pub use security::*;
