//! Tracking use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into ingestion, query and review APIs.
//! - Own transaction boundaries; repositories never open transactions.
//!
//! # Invariants
//! - The ingestor is the only component that writes assessments, features,
//!   baselines and alerts.
//! - Every multi-statement read runs inside one snapshot transaction.

pub mod alert;
pub mod baseline;
pub mod clock;
pub mod deviation;
pub mod error;
pub mod history;
pub mod ingest;
pub mod user;
