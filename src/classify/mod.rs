//! Output classification: error-line rules and rsync flavour detection.

mod patterns;
mod variant;

pub use patterns::*;
pub use variant::*;
