use std::path::Path;

use anyhow::{Context, Result};
use log::warn;

use crate::resources::{
    parsed::{
        ParseFlags, ParsedMaterial, ParsedMesh, ParsedNode, ParsedScene, ParsedTexture, SceneParser, TextureSemantic,
        TextureSource,
    },
    postprocess,
};

/// Wavefront `.obj` files (and their `.mtl` libraries) through `tobj`.
///
/// OBJ has no hierarchy: the root is named after the file and every object or
/// group becomes one child node holding one mesh.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjParser;

impl SceneParser for ObjParser {
    fn parse(&self, path: &Path, flags: ParseFlags) -> Result<Option<ParsedScene>> {
        // Faces keep their arity; triangulation is a post-processing step
        let (models, obj_materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: false,
                single_index: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("reading OBJ {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let materials = match obj_materials {
            Ok(materials) => materials.iter().map(|m| load_material(m, base)).collect(),
            Err(e) => {
                warn!("{}: material library not loaded ({})", path.display(), e);
                Vec::new()
            }
        };

        let mut root = ParsedNode::new(path.file_name().map_or_else(String::new, |f| f.to_string_lossy().into_owned()));
        let mut meshes = Vec::with_capacity(models.len());
        for model in models.iter() {
            let name = if model.name.is_empty() {
                format!("object_{}", meshes.len())
            } else {
                model.name.clone()
            };
            let mut node = ParsedNode::new(name.clone());
            node.meshes.push(meshes.len());
            root.children.push(node);
            meshes.push(load_mesh(name, &model.mesh));
        }

        let mut parsed = ParsedScene { meshes, materials, root };
        postprocess::apply(&mut parsed, flags);
        Ok(Some(parsed))
    }
}

fn load_mesh(name: String, mesh: &tobj::Mesh) -> ParsedMesh {
    let vertex_count = mesh.positions.len() / 3;
    let positions = mesh.positions.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect();
    let normals = (mesh.normals.len() == vertex_count * 3 && vertex_count > 0)
        .then(|| mesh.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]).collect());
    // OBJ puts the UV origin bottom-left, wgpu samples from the top-left
    let uv0 = (mesh.texcoords.len() == vertex_count * 2 && vertex_count > 0)
        .then(|| mesh.texcoords.chunks_exact(2).map(|t| [t[0], 1.0 - t[1]]).collect());

    let faces = if mesh.face_arities.is_empty() {
        mesh.indices.chunks(3).map(<[u32]>::to_vec).collect()
    } else {
        let mut faces = Vec::with_capacity(mesh.face_arities.len());
        let mut start = 0usize;
        for &arity in &mesh.face_arities {
            let end = (start + arity as usize).min(mesh.indices.len());
            faces.push(mesh.indices[start..end].to_vec());
            start = end;
        }
        faces
    };

    ParsedMesh {
        name,
        positions,
        normals,
        tangents: None,
        bitangents: None,
        uv0,
        faces,
        material_index: mesh.material_id,
    }
}

fn load_material(material: &tobj::Material, base: &Path) -> ParsedMaterial {
    let texture = |semantic: TextureSemantic, file: Option<&String>| {
        file.filter(|f| !f.is_empty()).map(|f| ParsedTexture {
            semantic,
            index: 0,
            source: TextureSource::Path(base.join(f)),
        })
    };
    let textures = [
        texture(TextureSemantic::Diffuse, material.diffuse_texture.as_ref()),
        texture(TextureSemantic::Normals, material.normal_texture.as_ref()),
        texture(TextureSemantic::Ambient, material.ambient_texture.as_ref()),
        texture(TextureSemantic::Specular, material.specular_texture.as_ref()),
        texture(TextureSemantic::Shininess, material.shininess_texture.as_ref()),
        texture(TextureSemantic::Opacity, material.dissolve_texture.as_ref()),
        texture(TextureSemantic::Emissive, material.unknown_param.get("map_Ke")),
    ]
    .into_iter()
    .flatten()
    .collect();

    let emissive = material.unknown_param.get("Ke").and_then(|ke| parse_color(ke));

    ParsedMaterial {
        name: (!material.name.is_empty()).then(|| material.name.clone()),
        ambient: material.ambient,
        diffuse: material.diffuse,
        specular: material.specular,
        emissive,
        shininess: material.shininess,
        opacity: material.dissolve,
        textures,
    }
}

fn parse_color(value: &str) -> Option<[f32; 3]> {
    let mut parts = value.split_whitespace().map(str::parse::<f32>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(r)), Some(Ok(g)), Some(Ok(b))) => Some([r, g, b]),
        _ => None,
    }
}
