#![deny(unused)]
//! Request governance pipeline for Aegis.
//!
//! This crate provides:
//! - The per-request state machine sequencing security, policy, budget and routing
//! - Dry-run and debug decision trails
//! - Fire-and-forget audit emission
//! - Caller cancellation and per-request provider timeouts
//! - Composition of every component from configuration

pub mod builder;
pub mod pipeline;

pub use builder::PipelineBuilder;
pub use pipeline::{DecisionTrail, GovernancePipeline, PipelineOutcome, Stage};
