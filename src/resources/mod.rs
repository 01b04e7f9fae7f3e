//! Loading external model files into engine data.
//!
//! - `parsed` is the format-independent scene a parser hands to the importer
//! - `gltf_loader` / `obj_loader` parse files with the `gltf` and `tobj` crates
//! - `postprocess` triangulates, merges materials and generates normals/tangents
//! - `texture` decodes referenced images
//! - `importer` turns a parsed scene into a scene graph, meshes and materials

pub mod gltf_loader;
pub mod importer;
pub mod obj_loader;
pub mod parsed;
pub mod postprocess;
pub mod texture;

use std::path::Path;

use crate::{
    data_structures::{
        material::{MaterialLayout, MaterialRegistry},
        mesh::MeshLayout,
        texture::TextureCache,
    },
    geometry::simplify::SimplifyConfig,
    pool::WorkerPool,
};
use importer::{ImportError, ImportedScene, Importer};
use parsed::SceneParser;

/// What an import extracts and how.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportSettings {
    /// Vertex attributes to keep; also decides whether normals and tangents get generated.
    pub mesh_layout: MeshLayout,
    /// Material parameters and texture channels to fill.
    pub material_layout: MaterialLayout,
    /// Translate the root so the scene's bounds are centred on the origin.
    pub center_scene: bool,
    pub simplify: SimplifyConfig,
    /// Decode referenced textures into the texture cache.
    pub decode_textures: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            mesh_layout: MeshLayout::STANDARD,
            material_layout: MaterialLayout::phong(),
            center_scene: false,
            simplify: SimplifyConfig::default(),
            decode_textures: true,
        }
    }
}

impl ImportSettings {
    pub fn with_mesh_layout(mut self, mesh_layout: MeshLayout) -> Self {
        self.mesh_layout = mesh_layout;
        self
    }

    pub fn with_material_layout(mut self, material_layout: MaterialLayout) -> Self {
        self.material_layout = material_layout;
        self
    }

    pub fn with_center_scene(mut self, center_scene: bool) -> Self {
        self.center_scene = center_scene;
        self
    }

    pub fn with_simplify(mut self, simplify: SimplifyConfig) -> Self {
        self.simplify = simplify;
        self
    }

    pub fn with_decode_textures(mut self, decode_textures: bool) -> Self {
        self.decode_textures = decode_textures;
        self
    }
}

/// The parser for a file, chosen by extension.
pub fn parser_for(path: &Path) -> Option<Box<dyn SceneParser>> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "gltf" | "glb" => Some(Box::new(gltf_loader::GltfParser)),
        "obj" => Some(Box::new(obj_loader::ObjParser)),
        _ => None,
    }
}

/**
 * Load a model file.
 *
 * Materials are registered in (or reused from) `registry`, decoded textures
 * land in `textures`. With a `pool`, texture decoding runs on its workers.
 */
pub fn import(
    path: impl AsRef<Path>,
    settings: &ImportSettings,
    registry: &mut MaterialRegistry,
    textures: &mut TextureCache,
    pool: Option<&WorkerPool>,
) -> Result<ImportedScene, ImportError> {
    let path = path.as_ref();
    let parser = parser_for(path).ok_or_else(|| ImportError::ParseFailed {
        path: path.to_path_buf(),
        reason: "unsupported file extension".to_string(),
    })?;
    let mut importer = Importer::new(registry, textures);
    if let Some(pool) = pool {
        importer = importer.with_pool(pool);
    }
    importer.import_with(parser.as_ref(), path, settings)
}
