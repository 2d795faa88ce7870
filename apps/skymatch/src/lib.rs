//! # skymatch
//!
//! Command-line front end of `skymatch-core`: run configuration files,
//! report output and logging setup.

pub mod cli;
