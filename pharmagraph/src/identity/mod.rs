//! Entity identity: fingerprints, canonical IDs and cross-source merging.

pub mod fingerprint;
pub mod priority;
pub mod resolver;

pub use fingerprint::{key_values, CanonicalId, Fingerprint, InvalidCanonicalId};
pub use priority::{InvalidPriorityEntry, SourcePriorities, DEFAULT_SOURCE_PRIORITY};
pub use resolver::{IdCollision, IdentityResolver, MergeRecord, Resolution, UnresolvedReference};
