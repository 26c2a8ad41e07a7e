//! Comment text parsing: build parameters, job markers and phrase lists.
//!
//! Everything here is pure and operates on plain strings so that the
//! resolver can be exercised without a server.

mod marker;
mod params;
mod phrases;

pub use marker::{Marker, MarkerMatcher};
pub use params::extract_parameters;
pub use phrases::{BranchFilter, PhraseList};
