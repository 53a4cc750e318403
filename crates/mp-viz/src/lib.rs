//! Path-diagram artifacts for medpath results, plus a minimal SVG
//! renderer. The artifact is numbers-first: build the serializable
//! [`PathDiagram`] and render it separately.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diagram;
pub mod render;

pub use diagram::{
    format_p, mediation_diagram, moderation_diagram, multilevel_diagram, Edge, Node,
    PathDiagram, SCHEMA_VERSION,
};
pub use render::{save_svg, to_svg};
