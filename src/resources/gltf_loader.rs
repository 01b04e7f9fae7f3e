use std::path::Path;

use anyhow::*;
use log::warn;

use crate::resources::{
    parsed::{
        ParseFlags, ParsedMaterial, ParsedMesh, ParsedNode, ParsedScene, ParsedTexture, SceneParser, TextureSemantic,
        TextureSource,
    },
    postprocess,
};

/// `.gltf` / `.glb` files through the `gltf` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct GltfParser;

impl SceneParser for GltfParser {
    fn parse(&self, path: &Path, flags: ParseFlags) -> Result<Option<ParsedScene>> {
        let gltf::Gltf { document, blob } =
            gltf::Gltf::open(path).with_context(|| format!("reading glTF {}", path.display()))?;
        let buffers = gltf::import_buffers(&document, path.parent(), blob)
            .with_context(|| format!("loading buffers of {}", path.display()))?;
        let buffers: Vec<Vec<u8>> = buffers.into_iter().map(|b| b.0).collect();

        let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) else {
            return Ok(None);
        };

        let file_name = path.file_name().map_or_else(String::new, |f| f.to_string_lossy().into_owned());
        let materials = document
            .materials()
            .map(|m| load_material(&m, &buffers, path, &file_name))
            .collect();

        // One parsed mesh per primitive; remember which belong to which glTF mesh
        let mut meshes = Vec::new();
        let mut mesh_map: Vec<Vec<usize>> = Vec::new();
        for mesh in document.meshes() {
            let mut ids = Vec::new();
            for primitive in mesh.primitives() {
                let name = mesh.name().map_or_else(|| format!("mesh_{}", mesh.index()), str::to_string);
                ids.push(meshes.len());
                meshes.push(load_primitive(name, &primitive, &buffers));
            }
            mesh_map.push(ids);
        }

        let root = ParsedNode {
            name: scene.name().unwrap_or("Scene").to_string(),
            children: scene.nodes().map(|n| load_node(&n, &mesh_map)).collect(),
            ..Default::default()
        };

        let mut parsed = ParsedScene { meshes, materials, root };
        postprocess::apply(&mut parsed, flags);
        Ok(Some(parsed))
    }
}

fn load_node(node: &gltf::Node, mesh_map: &[Vec<usize>]) -> ParsedNode {
    // glTF matrices are column-major
    let m = node.transform().matrix();
    let transform = [
        [m[0][0], m[1][0], m[2][0], m[3][0]],
        [m[0][1], m[1][1], m[2][1], m[3][1]],
        [m[0][2], m[1][2], m[2][2], m[3][2]],
    ];
    ParsedNode {
        name: node.name().map_or_else(|| format!("node_{}", node.index()), str::to_string),
        transform,
        meshes: node
            .mesh()
            .and_then(|mesh| mesh_map.get(mesh.index()))
            .cloned()
            .unwrap_or_default(),
        children: node.children().map(|c| load_node(&c, mesh_map)).collect(),
    }
}

fn load_primitive(name: String, primitive: &gltf::Primitive, buffers: &[Vec<u8>]) -> ParsedMesh {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

    let positions: Vec<[f32; 3]> = reader.read_positions().map(|p| p.collect()).unwrap_or_default();
    let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(|n| n.collect());
    let uv0 = reader.read_tex_coords(0).map(|uv| uv.into_f32().collect());

    let (mut tangents, mut bitangents) = (None, None);
    if let (Some(tangent_attribute), Some(normals)) = (reader.read_tangents(), normals.as_ref()) {
        // GLTF represents tangents as vec4 where the 4th elem can be used to calculate the bitangent
        let (t, b): (Vec<[f32; 3]>, Vec<[f32; 3]>) = tangent_attribute
            .zip(normals.iter())
            .map(|(tangent, normal)| -> ([f32; 3], [f32; 3]) {
                let tangent: cgmath::Vector4<f32> = tangent.into();
                let normal: cgmath::Vector3<f32> = (*normal).into();
                let bitangent = normal.cross(tangent.truncate()) * tangent.w;
                (tangent.truncate().into(), bitangent.into())
            })
            .unzip();
        tangents = Some(t);
        bitangents = Some(b);
    }

    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };
    let faces = faces_for_mode(primitive.mode(), &indices);

    ParsedMesh {
        name,
        positions,
        normals,
        tangents,
        bitangents,
        uv0,
        faces,
        material_index: primitive.material().index(),
    }
}

fn faces_for_mode(mode: gltf::mesh::Mode, indices: &[u32]) -> Vec<Vec<u32>> {
    use gltf::mesh::Mode;
    match mode {
        Mode::Triangles => indices.chunks(3).map(<[u32]>::to_vec).collect(),
        Mode::TriangleStrip => (2..indices.len())
            .map(|i| {
                if i % 2 == 0 {
                    vec![indices[i - 2], indices[i - 1], indices[i]]
                } else {
                    vec![indices[i - 1], indices[i - 2], indices[i]]
                }
            })
            .collect(),
        Mode::TriangleFan => (2..indices.len())
            .map(|i| vec![indices[0], indices[i - 1], indices[i]])
            .collect(),
        Mode::Lines | Mode::LineLoop | Mode::LineStrip => indices.chunks(2).map(<[u32]>::to_vec).collect(),
        Mode::Points => indices.iter().map(|&i| vec![i]).collect(),
    }
}

fn load_material(material: &gltf::Material, buffers: &[Vec<u8>], path: &Path, file_name: &str) -> ParsedMaterial {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();

    let mut textures = Vec::new();
    let mut push = |semantic: TextureSemantic, texture: Option<gltf::Texture>| {
        if let Some(source) = texture.and_then(|t| texture_source(&t, buffers, path, file_name)) {
            textures.push(ParsedTexture {
                semantic,
                index: 0,
                source,
            });
        }
    };
    push(TextureSemantic::BaseColor, pbr.base_color_texture().map(|i| i.texture()));
    push(TextureSemantic::Normals, material.normal_texture().map(|n| n.texture()));
    push(TextureSemantic::AmbientOcclusion, material.occlusion_texture().map(|o| o.texture()));
    push(TextureSemantic::Emissive, material.emissive_texture().map(|e| e.texture()));
    push(TextureSemantic::MetalRoughness, pbr.metallic_roughness_texture().map(|m| m.texture()));

    ParsedMaterial {
        name: material.name().map(str::to_string),
        ambient: None,
        diffuse: Some([r, g, b]),
        specular: None,
        emissive: Some(material.emissive_factor()),
        shininess: None,
        opacity: Some(a),
        textures,
    }
}

fn texture_source(texture: &gltf::Texture, buffers: &[Vec<u8>], path: &Path, file_name: &str) -> Option<TextureSource> {
    let image = texture.source();
    match image.source() {
        gltf::image::Source::View { view, mime_type } => {
            let start = view.offset();
            let end = start + view.length();
            let Some(bytes) = buffers.get(view.buffer().index()).and_then(|b| b.get(start..end)) else {
                warn!("{}: image {} points outside its buffer", file_name, image.index());
                return None;
            };
            Some(TextureSource::Embedded {
                key: format!("embedded:{}#{}", file_name, image.index()),
                bytes: bytes.to_vec(),
                mime: Some(mime_type.to_string()),
            })
        }
        gltf::image::Source::Uri { uri, .. } if uri.starts_with("data:") => {
            warn!("{}: data URI images are not supported (image {})", file_name, image.index());
            None
        }
        gltf::image::Source::Uri { uri, .. } => {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            Some(TextureSource::Path(base.join(uri)))
        }
    }
}
