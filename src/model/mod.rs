//! Network definition and persisted model artifacts

pub mod artifact;
pub mod backbone;
pub mod classifier;

pub use artifact::{ArtifactPaths, ModelArtifact, ModelManifest};
pub use backbone::{Backbone, BackboneConfig};
pub use classifier::{LeafNet, LeafNetConfig};
