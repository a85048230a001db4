//! Narrow CRDT-engine interface consumed by the synchronizer (spec §6).
//!
//! The synchronizer depends only on [`CrdtDocument`] and [`VersionVectorOps`]; [`LoroCrdtDoc`]
//! is the one concrete implementation shipped here, backed by the `loro` CRDT library.

mod engine;
mod error;
mod loro_engine;
mod version;

pub use engine::CrdtDocument;
pub use error::CrdtError;
pub use loro_engine::{LoroCrdtDoc, LoroVersionVector};
pub use version::{Comparison, VersionVectorOps};
