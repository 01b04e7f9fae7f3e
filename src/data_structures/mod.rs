//! Engine data structures: meshes, materials, scene graphs, textures, and instances.
//!
//! This module contains the core data types for scene representation:
//!
//! - `mesh` contains the normalized mesh record, its vertex layouts and GPU buffer cache
//! - `material` contains materials, material layouts and the material registry
//! - `scene_graph` is the flat node hierarchy produced by imports
//! - `texture` contains decoded textures, the texture cache and GPU texture handles
//! - `instance` holds the per-draw GPU transform layout
//! - `buffer` wraps GPU buffers with checked partial writes

pub mod buffer;
pub mod instance;
pub mod material;
pub mod mesh;
pub mod scene_graph;
pub mod texture;
