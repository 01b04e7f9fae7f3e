//! Converts a parsed external scene into engine data: a [`SceneGraph`], mesh
//! records with LOD chains and registered materials.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use cgmath::{Matrix4, Vector3};
use instant::Instant;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    data_structures::{
        material::{
            Material, MaterialLayout, MaterialParam, MaterialRegistry, ParamValue, TextureChannel, UNNAMED_MATERIAL,
            dedup_name,
        },
        mesh::{Mesh, MeshData, MeshLayout},
        scene_graph::{NodeHandle, SceneGraph},
        texture::TextureCache,
    },
    geometry::{BoundingVolume, simplify::build_lod_chain},
    pool::WorkerPool,
    resources::{
        ImportSettings,
        parsed::{ParseFlags, ParsedMaterial, ParsedMesh, ParsedNode, ParsedScene, SceneParser, TextureSource},
        postprocess,
        texture::{TextureError, decode},
    },
};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to import {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },
}

impl ImportError {
    fn parse_failed(path: &Path, reason: impl std::fmt::Display) -> Self {
        ImportError::ParseFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Everything an import produced.
///
/// Mesh references in `graph` index into `meshes` and `materials`; the latter
/// holds names registered in the [`MaterialRegistry`] used for the import.
#[derive(Debug)]
pub struct ImportedScene {
    pub graph: SceneGraph,
    pub meshes: Vec<Arc<Mesh>>,
    pub materials: Vec<String>,
}

impl ImportedScene {
    /// Union of all mesh bounds in world space.
    pub fn world_bounds(&self) -> BoundingVolume {
        self.graph
            .drawables()
            .filter_map(|(_, mesh_ref, global)| self.meshes.get(mesh_ref.mesh).map(|m| m.bounds().transformed(&global)))
            .fold(BoundingVolume::empty(), |acc, b| acc.union(&b))
    }
}

/// The post-processing every import asks parsers for.
pub fn parse_flags(layout: &MeshLayout) -> ParseFlags {
    ParseFlags {
        triangulate: true,
        remove_redundant_materials: true,
        generate_normals: layout.normals,
        calc_tangent_space: layout.tangents || layout.bitangents,
    }
}

/**
 * Imports scenes into a caller-owned material registry and texture cache.
 *
 * Not reentrant: the registry is borrowed mutably for the importer's
 * lifetime. Texture decoding goes to the worker pool when one is attached.
 */
pub struct Importer<'a> {
    registry: &'a mut MaterialRegistry,
    textures: &'a mut TextureCache,
    pool: Option<&'a WorkerPool>,
}

impl<'a> Importer<'a> {
    pub fn new(registry: &'a mut MaterialRegistry, textures: &'a mut TextureCache) -> Self {
        Self {
            registry,
            textures,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: &'a WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Parse `path` with `parser` and import the result.
    pub fn import_with(
        &mut self,
        parser: &dyn SceneParser,
        path: &Path,
        settings: &ImportSettings,
    ) -> Result<ImportedScene, ImportError> {
        let started = Instant::now();
        let scene = parser
            .parse(path, parse_flags(&settings.mesh_layout))
            .map_err(|e| ImportError::parse_failed(path, format!("{:#}", e)))?
            .ok_or_else(|| ImportError::parse_failed(path, "the file contains no scene"))?;
        debug!("Parsed {} in {:?}", path.display(), started.elapsed());
        self.import_processed(scene, path, settings)
    }

    /**
     * Import an in-memory scene. It is post-processed the way a parser would
     * be asked to, so faces may have any arity. `source` names the scene in
     * errors and logs.
     */
    pub fn import_parsed(
        &mut self,
        mut scene: ParsedScene,
        source: &Path,
        settings: &ImportSettings,
    ) -> Result<ImportedScene, ImportError> {
        postprocess::apply(&mut scene, parse_flags(&settings.mesh_layout));
        self.import_processed(scene, source, settings)
    }

    fn import_processed(
        &mut self,
        scene: ParsedScene,
        source: &Path,
        settings: &ImportSettings,
    ) -> Result<ImportedScene, ImportError> {
        let started = Instant::now();
        if scene.meshes.is_empty() {
            return Err(ImportError::parse_failed(source, "the scene contains no meshes"));
        }

        let mut materials = self.resolve_materials(&scene.materials, settings);
        let material_count = materials.len();
        let mut fallback: Option<usize> = None;

        let mut graph = SceneGraph::new();
        let mut meshes: Vec<Arc<Mesh>> = Vec::new();
        // Parsed mesh index -> index in `meshes`, for meshes shared by several nodes
        let mut converted: HashMap<usize, usize> = HashMap::new();

        let mut worklist: Vec<(&ParsedNode, Option<NodeHandle>)> = vec![(&scene.root, None)];
        while let Some((node, parent)) = worklist.pop() {
            let handle = graph
                .add_node(parent, node.name.clone())
                .map_err(|e| ImportError::parse_failed(source, e))?;
            graph
                .set_local_transform(handle, affine_to_matrix(&node.transform))
                .map_err(|e| ImportError::parse_failed(source, e))?;

            for &mesh_index in &node.meshes {
                let Some(parsed) = scene.meshes.get(mesh_index) else {
                    warn!("Node {:?} references missing mesh {}, skipped", node.name, mesh_index);
                    continue;
                };
                let mesh = *converted.entry(mesh_index).or_insert_with(|| {
                    meshes.push(Arc::new(convert_mesh(parsed, mesh_index, settings)));
                    meshes.len() - 1
                });
                let material = match parsed.material_index {
                    Some(i) if i < material_count => i,
                    invalid => {
                        let index = *fallback.get_or_insert_with(|| {
                            let material = self.registry.create_fallback(&settings.material_layout);
                            materials.push(material.name().to_string());
                            materials.len() - 1
                        });
                        warn!(
                            "Mesh {:?} references material {:?} of {}, using {}",
                            parsed.name, invalid, material_count, materials[index]
                        );
                        index
                    }
                };
                graph
                    .add_mesh_reference(handle, mesh, material)
                    .map_err(|e| ImportError::parse_failed(source, e))?;
            }

            // Reversed so the first child is processed next (pre-order)
            for child in node.children.iter().rev() {
                worklist.push((child, Some(handle)));
            }
        }

        graph.recalculate_global_transforms();
        graph.recalculate_bounds(&meshes);

        let mut imported = ImportedScene {
            graph,
            meshes,
            materials,
        };
        if settings.center_scene {
            center(&mut imported);
        }

        info!(
            "Imported {} in {:?}: {} nodes, {} meshes, {} materials",
            source.display(),
            started.elapsed(),
            imported.graph.len(),
            imported.meshes.len(),
            imported.materials.len()
        );
        Ok(imported)
    }

    /**
     * Map every source material to a registered name, in source order.
     *
     * Names are made unique within the import first (`_1`, `_2`, …); a name
     * the registry already knows is reused as is, so importing the same file
     * twice registers nothing new. Unnamed materials carry no identity and
     * always get a name that is free in the registry too.
     */
    fn resolve_materials(&mut self, parsed: &[ParsedMaterial], settings: &ImportSettings) -> Vec<String> {
        let mut claimed = HashSet::new();
        let mut names = Vec::with_capacity(parsed.len());
        let mut to_create = Vec::new();
        for (i, material) in parsed.iter().enumerate() {
            let name = match material.name.as_deref().filter(|n| !n.is_empty()) {
                Some(base) => dedup_name(base, |n| claimed.contains(n)),
                None => dedup_name(UNNAMED_MATERIAL, |n| claimed.contains(n) || self.registry.contains(n)),
            };
            claimed.insert(name.clone());
            if self.registry.contains(&name) {
                debug!("Reusing registered material {}", name);
            } else {
                to_create.push(i);
            }
            names.push(name);
        }

        let layout = &settings.material_layout;
        if settings.decode_textures {
            let sources = to_create
                .iter()
                .flat_map(|&i| requested_textures(&parsed[i], layout))
                .map(|(_, source)| source);
            self.decode_textures(sources);
        }

        for i in to_create {
            let material = self.build_material(&names[i], &parsed[i], layout);
            if let Err(e) = self.registry.add(&names[i], layout.clone(), material) {
                warn!("Material {} not registered: {}", names[i], e);
            }
        }
        names
    }

    fn build_material(&self, name: &str, parsed: &ParsedMaterial, layout: &MaterialLayout) -> Material {
        let mut material = Material::new(name, layout.clone());
        for param in layout.params() {
            let value = source_param(parsed, param).unwrap_or_else(|| param.default_value());
            material.set_param(param, value);
        }
        for (channel, source) in requested_textures(parsed, layout) {
            if let Some(texture) = self.textures.get(&source.key()) {
                material.set_texture(channel, texture);
            }
        }
        material
    }

    /// Decode every source not in the cache yet. Failures leave the slot unset.
    fn decode_textures<'s>(&mut self, sources: impl Iterator<Item = &'s TextureSource>) {
        let mut pending: Vec<(String, &TextureSource)> = Vec::new();
        for source in sources {
            let key = source.key();
            if !self.textures.contains(&key) && !pending.iter().any(|(k, _)| *k == key) {
                pending.push((key, source));
            }
        }
        if pending.is_empty() {
            return;
        }
        let started = Instant::now();
        let count = pending.len();

        let results: Vec<(String, Result<_, TextureError>)> = match self.pool {
            Some(pool) => {
                let handles: Vec<_> = pending
                    .into_iter()
                    .map(|(key, source)| {
                        let source = source.clone();
                        (key, pool.submit(move || decode(&source)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|(key, handle)| match handle.wait() {
                        Ok(result) => Some((key, result)),
                        Err(e) => {
                            warn!("Texture {} was not decoded: {}", key, e);
                            None
                        }
                    })
                    .collect()
            }
            None => pending.into_iter().map(|(key, source)| (key, decode(source))).collect(),
        };

        for (key, result) in results {
            match result {
                Ok(data) => {
                    self.textures.insert(key, data);
                }
                Err(e) => warn!("Texture {} could not be loaded: {}", key, e),
            }
        }
        debug!("Decoded {} textures in {:?}", count, started.elapsed());
    }
}

/// Textures of `material` the layout asks for: first texture per semantic, mapped to its channel.
fn requested_textures<'m>(
    material: &'m ParsedMaterial,
    layout: &'m MaterialLayout,
) -> impl Iterator<Item = (TextureChannel, &'m TextureSource)> + 'm {
    material
        .textures
        .iter()
        .filter(|t| t.index == 0)
        .filter_map(|t| t.semantic.channel().map(|c| (c, &t.source)))
        .filter(|(c, _)| layout.has_texture(*c))
}

fn source_param(material: &ParsedMaterial, param: MaterialParam) -> Option<ParamValue> {
    let color = |c: Option<[f32; 3]>| c.map(|c| ParamValue::Color(c.into()));
    match param {
        MaterialParam::Ambient => color(material.ambient),
        MaterialParam::Diffuse => color(material.diffuse),
        MaterialParam::Specular => color(material.specular),
        MaterialParam::Emissive => color(material.emissive),
        MaterialParam::Shininess => material.shininess.map(ParamValue::Float),
        MaterialParam::Opacity => material.opacity.map(ParamValue::Float),
    }
}

/// Row-major 3x4 affine to a column-major 4x4 matrix.
pub fn affine_to_matrix(t: &[[f32; 4]; 3]) -> Matrix4<f32> {
    #[rustfmt::skip]
    let m = Matrix4::new(
        t[0][0], t[1][0], t[2][0], 0.0,
        t[0][1], t[1][1], t[2][1], 0.0,
        t[0][2], t[1][2], t[2][2], 0.0,
        t[0][3], t[1][3], t[2][3], 1.0,
    );
    m
}

fn convert_mesh(parsed: &ParsedMesh, index: usize, settings: &ImportSettings) -> Mesh {
    let layout = &settings.mesh_layout;
    let name = if parsed.name.is_empty() {
        format!("mesh_{}", index)
    } else {
        parsed.name.clone()
    };
    let vertex_count = parsed.positions.len();
    let vec3s = |wanted: bool, attr: &Option<Vec<[f32; 3]>>| -> Vec<Vector3<f32>> {
        match attr {
            Some(values) if wanted && values.len() == vertex_count => values.iter().map(|&v| v.into()).collect(),
            _ => Vec::new(),
        }
    };

    // One source UV set, copied into every requested channel
    let uvs = match &parsed.uv0 {
        Some(uv) if layout.uv_channels > 0 && uv.len() == vertex_count => {
            let channel: Vec<_> = uv.iter().map(|&t| t.into()).collect();
            vec![channel; layout.uv_channels as usize]
        }
        _ => Vec::new(),
    };

    let data = MeshData {
        positions: parsed.positions.iter().map(|&p| p.into()).collect(),
        normals: vec3s(layout.normals, &parsed.normals),
        tangents: vec3s(layout.tangents, &parsed.tangents),
        bitangents: vec3s(layout.bitangents, &parsed.bitangents),
        uvs,
    };
    let indices = parsed.triangle_indices();
    let lod_chain = build_lod_chain(&indices, &parsed.positions, &settings.simplify);
    let mesh = Mesh::from_parts(name, data, lod_chain);
    debug!(
        "Mesh {}: {} vertices, LOD triangles {:?}",
        mesh.name,
        mesh.vertex_count(),
        (0..mesh.lod_count()).map(|l| mesh.triangle_count(l)).collect::<Vec<_>>()
    );
    mesh
}

/// Move the root so the world-space bounds of all meshes are centred on the origin.
fn center(scene: &mut ImportedScene) {
    let bounds = scene.world_bounds();
    let Some(root) = scene.graph.root() else {
        return;
    };
    if bounds.is_empty() {
        return;
    }
    let Some(local) = scene.graph.node(root).map(|n| n.local_transform) else {
        return;
    };
    let offset = Matrix4::from_translation(-bounds.center);
    if scene.graph.set_local_transform(root, offset * local).is_ok() {
        scene.graph.recalculate_global_transforms();
        debug!("Centred scene by {:?}", -bounds.center);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;

    #[test]
    fn affine_rows_become_columns() {
        let t = [[1.0, 0.0, 0.0, 5.0], [0.0, 1.0, 0.0, 6.0], [0.0, 0.0, 1.0, 7.0]];
        let m = affine_to_matrix(&t);
        assert_eq!(m.w, cgmath::Vector4::new(5.0, 6.0, 7.0, 1.0));
        assert_eq!(affine_to_matrix(&crate::resources::parsed::IDENTITY_3X4), Matrix4::identity());
    }

    #[test]
    fn flags_follow_layout() {
        let flags = parse_flags(&MeshLayout::POSITIONS_ONLY);
        assert!(flags.triangulate && flags.remove_redundant_materials);
        assert!(!flags.generate_normals && !flags.calc_tangent_space);
        let flags = parse_flags(&MeshLayout::POSITIONS_ONLY.with_tangents(true));
        assert!(flags.calc_tangent_space && !flags.generate_normals);
    }
}
