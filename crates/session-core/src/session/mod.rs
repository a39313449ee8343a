//! Session core
//!
//! [`Session`] is the root component: participant membership, pipeline
//! lifecycle, publisher fan-out and filter-state replay.

pub mod session;
mod publishers;

pub use session::{Session, SessionCollaborators};
