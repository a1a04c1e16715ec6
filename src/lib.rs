//! Cross-taxon protein motif comparison pipeline.
//!
//! The library covers the pipeline core: parsing loosely-delimited
//! retrieval text into a validated record set (`sequence`), parsing
//! fixed-layout motif scan reports (`motif`), filtering and ranking
//! tabular comparison output (`hits`), and the stage-gated state machine
//! coordinating them (`pipeline`). External collaborators sit behind the
//! `tools::Toolchain` trait; the binary in `cli` owns all interactive
//! prompting.

pub mod cli;
pub mod config;
pub mod error;
pub mod hits;
pub mod motif;
pub mod pipeline;
pub mod sequence;
pub mod tools;
pub mod workspace;

pub use error::PipelineError;
