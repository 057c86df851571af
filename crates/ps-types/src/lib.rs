//! # ps-types
//!
//! Core types for PipeSweep: the validated experiment configuration, resolved
//! pipeline configurations and the generator seam, trial units and results,
//! dataset splits, and the error taxonomy shared by every crate.

pub mod config;
pub mod dataset;
pub mod errors;
pub mod pipeline;
pub mod trial;

pub use config::*;
pub use dataset::*;
pub use errors::*;
pub use pipeline::*;
pub use trial::*;
