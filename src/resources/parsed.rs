//! The parsed-scene boundary between file-format parsers and the importer.
//!
//! Parsers produce a [`ParsedScene`]; the importer never touches `gltf` or
//! `tobj` types directly.

use std::path::Path;

use crate::data_structures::material::TextureChannel;

#[derive(Clone, Debug, Default)]
pub struct ParsedScene {
    pub meshes: Vec<ParsedMesh>,
    pub materials: Vec<ParsedMaterial>,
    pub root: ParsedNode,
}

/// Identity in the 3x4 row-major affine form parsers hand out.
pub const IDENTITY_3X4: [[f32; 4]; 3] = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]];

#[derive(Clone, Debug)]
pub struct ParsedNode {
    pub name: String,
    /// Row-major affine transform; the implicit fourth row is `[0, 0, 0, 1]`.
    pub transform: [[f32; 4]; 3],
    /// Indices into [`ParsedScene::meshes`].
    pub meshes: Vec<usize>,
    pub children: Vec<ParsedNode>,
}

impl Default for ParsedNode {
    fn default() -> Self {
        Self {
            name: String::new(),
            transform: IDENTITY_3X4,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl ParsedNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ParsedNode::node_count).sum::<usize>()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParsedMesh {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub tangents: Option<Vec<[f32; 3]>>,
    pub bitangents: Option<Vec<[f32; 3]>>,
    /// The primary UV channel.
    pub uv0: Option<Vec<[f32; 2]>>,
    /// Variable-arity index lists. After triangulation every face has three.
    pub faces: Vec<Vec<u32>>,
    /// `None` (or an index past the material list) means "no usable material".
    pub material_index: Option<usize>,
}

impl ParsedMesh {
    /// Flat triangle index list; faces that are not triangles are skipped.
    pub fn triangle_indices(&self) -> Vec<u32> {
        self.faces.iter().filter(|f| f.len() == 3).flatten().copied().collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedMaterial {
    pub name: Option<String>,
    pub ambient: Option<[f32; 3]>,
    pub diffuse: Option<[f32; 3]>,
    pub specular: Option<[f32; 3]>,
    pub emissive: Option<[f32; 3]>,
    pub shininess: Option<f32>,
    pub opacity: Option<f32>,
    pub textures: Vec<ParsedTexture>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedTexture {
    pub semantic: TextureSemantic,
    /// Position among textures of the same semantic; only index 0 is imported.
    pub index: u32,
    pub source: TextureSource,
}

#[derive(Clone, PartialEq)]
pub enum TextureSource {
    Path(std::path::PathBuf),
    Embedded { key: String, bytes: Vec<u8>, mime: Option<String> },
}

impl std::fmt::Debug for TextureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextureSource::Path(p) => write!(f, "Path({})", p.display()),
            TextureSource::Embedded { key, bytes, .. } => write!(f, "Embedded({}, {} bytes)", key, bytes.len()),
        }
    }
}

impl TextureSource {
    /// The texture cache key of this source.
    pub fn key(&self) -> String {
        match self {
            TextureSource::Path(p) => p.to_string_lossy().into_owned(),
            TextureSource::Embedded { key, .. } => key.clone(),
        }
    }
}

/// Texture slot semantics as file formats declare them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureSemantic {
    Diffuse,
    BaseColor,
    Specular,
    Ambient,
    Emissive,
    Height,
    Normals,
    Shininess,
    Opacity,
    Lightmap,
    AmbientOcclusion,
    MetalRoughness,
    Unknown,
}

impl TextureSemantic {
    /// Fixed mapping to the engine's texture channels.
    pub const fn channel(self) -> Option<TextureChannel> {
        match self {
            TextureSemantic::Diffuse | TextureSemantic::BaseColor => Some(TextureChannel::Albedo),
            TextureSemantic::Normals | TextureSemantic::Height => Some(TextureChannel::Normal),
            TextureSemantic::AmbientOcclusion | TextureSemantic::Lightmap => Some(TextureChannel::Occlusion),
            TextureSemantic::Emissive => Some(TextureChannel::Emissive),
            TextureSemantic::MetalRoughness => Some(TextureChannel::MetalRoughness),
            TextureSemantic::Specular
            | TextureSemantic::Ambient
            | TextureSemantic::Shininess
            | TextureSemantic::Opacity
            | TextureSemantic::Unknown => None,
        }
    }
}

/// Post-processing a parser applies before handing out its scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseFlags {
    pub triangulate: bool,
    pub remove_redundant_materials: bool,
    pub generate_normals: bool,
    pub calc_tangent_space: bool,
}

/// A model file parser. `Ok(None)` means the file parsed but held no scene.
pub trait SceneParser {
    fn parse(&self, path: &Path, flags: ParseFlags) -> anyhow::Result<Option<ParsedScene>>;
}
