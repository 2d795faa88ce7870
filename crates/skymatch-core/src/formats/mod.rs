//! # Formats Module
//!
//! Byte layouts of everything the engine writes or reads besides catalogs:
//! memoized cache payloads and localization maps.

mod persistence;
mod skymap;

pub use persistence::*;
pub use skymap::*;
