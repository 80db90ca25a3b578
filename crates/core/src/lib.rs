#![deny(unused)]
//! Core types, traits, and error definitions for Aegis.
//!
//! This crate provides the building blocks shared by every stage of the
//! request governance pipeline: security screening, policy evaluation,
//! budget enforcement and provider routing.

pub mod config;
pub mod error;
pub mod pattern;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
