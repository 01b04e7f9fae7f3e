//! strata-ngin
//!
//! A real-time rendering scaffold built around the model import pipeline:
//! external model files are turned into GPU-ready meshes with LOD chains,
//! deduplicated materials and a flat scene graph, which render objects are
//! then culled against the camera frustum and batched for drawing.
//!
//! High-level modules
//! - `camera`: camera and projection producing the projection-view matrix
//! - `culling`: frustum plane extraction and bounding-sphere tests
//! - `data_structures`: meshes, materials, scene graph, textures, instances and GPU buffers
//! - `geometry`: bounding volumes, LOD simplification and vertex cache ordering
//! - `pool`: worker threads for offloading work such as texture decoding
//! - `resources`: parsing model files and importing them
//! - `render`: render objects, batching and draw submission
//!

pub mod camera;
pub mod culling;
pub mod data_structures;
pub mod geometry;
pub mod pool;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use resources::{
    ImportSettings, import,
    importer::{ImportError, ImportedScene, Importer},
};

/// Install `env_logger` as the `log` backend, filtered by `RUST_LOG`.
///
/// Calling it more than once (or after another logger was installed) only
/// prints a warning.
pub fn init_logging() {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
}
