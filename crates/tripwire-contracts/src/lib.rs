//! # tripwire-contracts
//!
//! Shared types, halt reports, and the error taxonomy for the tripwire
//! agent guard.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod action;
pub mod circuit;
pub mod error;
pub mod execution;
pub mod health;
pub mod identity;
pub mod signal;
