//! # skymatch-core
//!
//! Bayesian cross-matching of astrophysical source catalogs.
//!
//! A primary catalog is matched against one or more secondary catalogs.
//! For every primary source the engine selects nearby candidates through a
//! HEALPix pixel index, scores each candidate with a Bayes factor, looks up a
//! prior for each secondary catalog and combines both into a posterior
//! association probability.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Deterministic: every result container is a `BTreeMap`; the only source of
//!   randomness is the RA-scramble prior, which takes a seed
//! - Catalogs and pixel indexes are read-only once loaded
//! - Expensive derived products (contours, density maps) are memoized by
//!   content hash

// =============================================================================
// MODULES
// =============================================================================

pub mod bayes_factor;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod formats;
pub mod healpix;
pub mod primitives;
pub mod prior;
pub mod selection;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CandidateScores, ConsistencyWarning, MatchError, RowId, SkyPosition, SourceId,
};

// =============================================================================
// RE-EXPORTS: Matching
// =============================================================================

pub use bayes_factor::{BayesFactor, BayesFactorModel, BayesFactorTable, gaussian_bayes_factor};
pub use catalog::{Catalog, CatalogSource, Detection, Localization, SourceSummary};
pub use config::{BayesFactorConfig, MatchConfig, PriorConfig};
pub use engine::{
    CatalogDiagnostics, MatchReport, MatchStage, MatchTable, PosteriorTable, StreamMatch,
    posterior,
};
pub use healpix::Healpix;
pub use prior::{Prior, PriorModel, ScrambleRealization};
pub use selection::{CandidateSelector, IndexedCatalog, PixelIndex, SelectionStrategy};

// =============================================================================
// RE-EXPORTS: Formats and Storage
// =============================================================================

pub use formats::{CacheHeader, ContourRegion, LocalizationMap, PixelOrdering};
pub use storage::{CacheStore, Memoizer, MemoryStore, RedbStore};
