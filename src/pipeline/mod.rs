//! Staged self-change pipeline for Gantry.
//!
//! This module implements the change pipeline: validated trigger intake,
//! risk-gated planning and approval, budgeted development and CI loops,
//! review, staged deployment with bounded observation windows, and
//! compensating rollback. Every unit of stage work is recorded in an
//! append-only attempt ledger so an interrupted pipeline can be resumed
//! from its last durable state. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
