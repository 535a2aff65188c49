// Pipeline processing: normalization and fact derivation

pub mod facts;
pub mod normalize;

pub use facts::{FactDerivation, FactKind, FactSet};
pub use normalize::{NormalizeStats, Normalizer};
