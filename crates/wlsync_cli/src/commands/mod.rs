//! CLI command implementations.

pub mod accounts;
pub mod dump;
pub mod sync;
