//
// lib.rs
// seg2dcm
//
// Exposes the crate's modules and re-exports the CLI entry point for both
// binary and library consumers.
//

// Public surface of the library: one module per concern of the conversion
// pipeline.
pub mod batch;
pub mod cli;
pub mod coding;
pub mod colors;
pub mod config;
pub mod encoder;
pub mod mask;
pub mod metadata;
pub mod patch;
pub mod props;
pub mod segment;

pub use cli::{run as run_cli, Cli};
