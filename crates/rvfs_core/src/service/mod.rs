//! Core use-case services.
//!
//! # Responsibility
//! - Turn path-addressed requests into repository calls.
//! - Keep the CLI decoupled from SQL and schema details.

pub mod fs_service;
