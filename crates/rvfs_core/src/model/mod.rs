//! Domain records for the relational virtual filesystem.
//!
//! # Responsibility
//! - Define the read models returned by repository and service layers.
//! - Keep storage column names out of public field names.
//!
//! # Invariants
//! - A project exclusively owns its entries; an entry owns its lines/tags.

pub mod entry;
