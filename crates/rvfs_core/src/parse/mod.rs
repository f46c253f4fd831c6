//! Path normalization and trailing-metadata parsing.
//!
//! # Responsibility
//! - Turn raw slash-delimited input into canonical virtual paths.
//! - Extract note/tag/control-channel metadata from free-form arguments.
//!
//! # Invariants
//! - Everything in this module is pure: no I/O, no logging.
//! - A normalized path never starts or ends with `/` and never contains
//!   `.`, `..`, or empty segments.

pub mod annotation;
pub mod path;
