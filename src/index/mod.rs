//! Local roster index
//!
//! The roster is read once at startup and never mutated afterwards, so the
//! index is shared between requests without locking.

mod local;

pub use local::{LoadReport, LocalIndex};
