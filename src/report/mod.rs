//! Report renderers for scan results.
//!
//! - [`terminal`]: colored dependency tree, redirect and issue tables, summary box;
//!   respects `--verbose` / `--quiet`.
//! - [`json`]: the tree and both registries as one JSON document.

pub mod json;
pub mod terminal;
