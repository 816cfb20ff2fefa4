//! Relationship model for the pharmaceutical graph.
//!
//! - [`RelationshipType`]: closed set of relationship types with endpoint rules
//! - [`StagedRelationship`]: transformer output, endpoints may be unresolved
//! - [`ResolvedRelationship`]: both endpoints canonical, ready to load

pub mod relationship;
pub mod relationship_type;

pub use relationship::{NodeRef, ResolvedRelationship, StagedRelationship};
pub use relationship_type::{RelationshipType, UnknownRelationshipType};
