//! Node model for the pharmaceutical graph.
//!
//! - [`Label`]: closed set of node labels with their identity rules
//! - [`PropertyValue`] / [`Properties`]: store-compatible property values
//! - [`StagedNode`]: a transformed node awaiting resolution and loading

pub mod label;
pub mod property;
pub mod staged;

pub use label::{Label, UnknownLabel};
pub use property::{Properties, PropertyValue};
pub use staged::{Provenance, StagedNode};
