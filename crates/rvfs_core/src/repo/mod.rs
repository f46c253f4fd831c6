//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the path-addressed store contract used by services.
//! - Isolate SQLite query details from filesystem semantics.
//!
//! # Invariants
//! - Repository APIs report semantic errors (`EntryNotFound`) in addition to
//!   DB transport errors.

pub mod store_repo;
