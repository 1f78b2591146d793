//! # DriftSync Protocol
//!
//! Data types shared by the DriftSync engine, its remote service and its
//! tools.
//!
//! This crate provides:
//! - Entity records (`Profile`, `Course`, `Question`, `Progress`, `Wallet`)
//! - The queueable [`Mutation`] sum type and its payloads
//! - [`ActionId`], the idempotency key of a mutation
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod error;
mod mutation;
mod records;

pub use action::{ActionId, IDEMPOTENCY_HEADER};
pub use error::{ProtocolError, ProtocolResult};
pub use mutation::{CreditRequest, Mutation, ProfilePatch, ProgressUpdate};
pub use records::{progress_id, Course, HealthStatus, Profile, Progress, Question, Wallet};
