//! Collaborator traits
//!
//! The relay reaches storage and embedding backends only through these seams.

mod embedding;
mod settings;
mod vector_store;

pub use embedding::*;
pub use settings::*;
pub use vector_store::*;
