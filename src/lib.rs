//! Gantry: staged self-change pipeline orchestration.
//!
//! This crate drives a proposed code change through a durable, resumable
//! pipeline: research, planning, risk-gated approval, development, testing,
//! CI remediation, review, staged deployment, and post-deploy observation
//! with automatic rollback.
//!
//! # Architecture
//!
//! Gantry follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (database, timing, etc.)
//!
//! The crate is an embeddable engine: host processes wire concrete
//! collaborators (code generation, version control, deployment, metrics,
//! approvals) into the ports and drive tasks through the
//! [`pipeline::services::PipelineOrchestrator`].
//!
//! # Modules
//!
//! - [`pipeline`]: Task lifecycle, stage ledger, and deployment control

pub mod pipeline;
