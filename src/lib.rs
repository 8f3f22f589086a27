//! Prepares electromagnetic eigenmode problems for waveguide cross-sections.
//!
//! Named polygonal regions are meshed with gmsh, and every element of the
//! loaded mesh gets the permittivity of the region it belongs to. The mesh
//! and the field are then handed to an external mode solver.

pub mod datatypes;
pub mod error;
pub mod field;
pub mod geometry;
pub mod input;
pub mod mesher;
pub mod pipeline;
pub mod post_processor;
pub mod resolution;
pub mod solver;
pub mod svg;

pub use error::{GuidemeshError, Result};
