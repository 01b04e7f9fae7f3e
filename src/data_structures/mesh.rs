//! The normalized in-memory mesh and its GPU buffer cache.
//!
//! A [`Mesh`] is built once by the importer and never mutated afterwards.
//! GPU buffers derived from it are created lazily per requested
//! [`MeshLayout`] and cached on the mesh itself.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    mem,
    sync::{Arc, Mutex, PoisonError},
};

use cgmath::{Vector2, Vector3};
use wgpu::util::DeviceExt;

use crate::geometry::BoundingVolume;

/// Which vertex attributes a consumer wants. Positions are always present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshLayout {
    pub normals: bool,
    pub tangents: bool,
    pub bitangents: bool,
    pub uv_channels: u8,
}

impl MeshLayout {
    pub const POSITIONS_ONLY: MeshLayout = MeshLayout {
        normals: false,
        tangents: false,
        bitangents: false,
        uv_channels: 0,
    };

    /// Positions, normals, tangent frame and a single UV channel.
    pub const STANDARD: MeshLayout = MeshLayout {
        normals: true,
        tangents: true,
        bitangents: true,
        uv_channels: 1,
    };

    pub fn with_normals(mut self, normals: bool) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_tangents(mut self, tangents: bool) -> Self {
        self.tangents = tangents;
        self.bitangents = tangents;
        self
    }

    pub fn with_uv_channels(mut self, uv_channels: u8) -> Self {
        self.uv_channels = uv_channels;
        self
    }

    /// Number of `f32` per interleaved vertex.
    pub fn floats_per_vertex(&self) -> usize {
        3 + 3 * (self.normals as usize + self.tangents as usize + self.bitangents as usize)
            + 2 * self.uv_channels as usize
    }

    pub fn stride(&self) -> wgpu::BufferAddress {
        (self.floats_per_vertex() * mem::size_of::<f32>()) as wgpu::BufferAddress
    }

    /**
     * Vertex attributes in interleave order: position, normal, tangent, bitangent, uv0..uvN.
     * Shader locations are assigned sequentially from zero.
     */
    pub fn attributes(&self) -> Vec<wgpu::VertexAttribute> {
        let mut attributes = Vec::new();
        let mut offset = 0;
        let mut push = |format: wgpu::VertexFormat, floats: usize| {
            attributes.push(wgpu::VertexAttribute {
                offset,
                shader_location: attributes.len() as u32,
                format,
            });
            offset += (floats * mem::size_of::<f32>()) as wgpu::BufferAddress;
        };
        push(wgpu::VertexFormat::Float32x3, 3);
        for enabled in [self.normals, self.tangents, self.bitangents] {
            if enabled {
                push(wgpu::VertexFormat::Float32x3, 3);
            }
        }
        for _ in 0..self.uv_channels {
            push(wgpu::VertexFormat::Float32x2, 2);
        }
        attributes
    }
}

impl Default for MeshLayout {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// A contiguous index range of one detail level inside [`Mesh::indices`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lod {
    pub index_offset: u32,
    pub index_count: u32,
}

/// Normalized mesh record.
///
/// All populated per-vertex sequences have the same length. LOD0 spans the
/// unsimplified triangle list, later LODs are appended after it in decreasing
/// detail.
pub struct Mesh {
    pub name: String,
    pub(crate) positions: Vec<Vector3<f32>>,
    pub(crate) normals: Vec<Vector3<f32>>,
    pub(crate) tangents: Vec<Vector3<f32>>,
    pub(crate) bitangents: Vec<Vector3<f32>>,
    pub(crate) uvs: Vec<Vec<Vector2<f32>>>,
    pub(crate) indices: Vec<u32>,
    pub(crate) lods: Vec<Lod>,
    pub(crate) bounds: BoundingVolume,
    gpu_cache: Mutex<HashMap<(MeshLayout, TypeId), Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("name", &self.name)
            .field("vertices", &self.positions.len())
            .field("indices", &self.indices.len())
            .field("lods", &self.lods)
            .field("bounds", &self.bounds)
            .finish()
    }
}

/// Vertex data handed to [`Mesh::from_parts`].
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub tangents: Vec<Vector3<f32>>,
    pub bitangents: Vec<Vector3<f32>>,
    pub uvs: Vec<Vec<Vector2<f32>>>,
}

impl Mesh {
    /**
     * Assemble a mesh from vertex data and a LOD chain (first entry = full index list).
     *
     * Optional attribute sequences whose length differs from the position count
     * are dropped with a warning. LOD0 always exists: triangles of it that
     * reference missing vertices are dropped, while a coarser LOD doing so cuts
     * the chain there. The record thus always satisfies its invariants.
     */
    pub fn from_parts(name: impl Into<String>, data: MeshData, lod_chain: Vec<Vec<u32>>) -> Self {
        let name = name.into();
        let vertex_count = data.positions.len();
        let keep = |attr: Vec<Vector3<f32>>, what: &str| {
            if attr.is_empty() || attr.len() == vertex_count {
                attr
            } else {
                log::warn!(
                    "Mesh {}: dropping {} ({} entries for {} vertices)",
                    name,
                    what,
                    attr.len(),
                    vertex_count
                );
                Vec::new()
            }
        };
        let normals = keep(data.normals, "normals");
        let tangents = keep(data.tangents, "tangents");
        let bitangents = keep(data.bitangents, "bitangents");
        let uvs = data
            .uvs
            .into_iter()
            .map(|channel| if channel.len() == vertex_count { channel } else { vec![Vector2::new(0.0, 0.0); vertex_count] })
            .collect();

        let mut indices = Vec::new();
        let mut lods = Vec::new();
        let mut lod_chain = lod_chain.into_iter();
        let full = lod_chain.next().unwrap_or_default();
        let valid: Vec<u32> = full
            .chunks_exact(3)
            .filter(|tri| tri.iter().all(|&i| (i as usize) < vertex_count))
            .flatten()
            .copied()
            .collect();
        if valid.len() != full.len() {
            log::warn!(
                "Mesh {}: dropped {} of {} indices of LOD0 referencing missing vertices",
                name,
                full.len() - valid.len(),
                full.len()
            );
        }
        lods.push(Lod {
            index_offset: 0,
            index_count: valid.len() as u32,
        });
        indices.extend(valid);

        for (level, lod) in lod_chain.enumerate().map(|(i, lod)| (i + 1, lod)) {
            if lod.iter().any(|&i| i as usize >= vertex_count) {
                log::warn!("Mesh {}: LOD{} references missing vertices, chain cut", name, level);
                break;
            }
            if let Some(prev) = lods.last().map(|l: &Lod| l.index_count as usize) {
                if lod.len() > prev {
                    break;
                }
            }
            lods.push(Lod {
                index_offset: indices.len() as u32,
                index_count: lod.len() as u32,
            });
            indices.extend(lod);
        }

        let bounds = BoundingVolume::from_points(data.positions.iter());
        Self {
            name,
            positions: data.positions,
            normals,
            tangents,
            bitangents,
            uvs,
            indices,
            lods,
            bounds,
            gpu_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vector3<f32>] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vector3<f32>] {
        &self.normals
    }

    pub fn tangents(&self) -> &[Vector3<f32>] {
        &self.tangents
    }

    pub fn bitangents(&self) -> &[Vector3<f32>] {
        &self.bitangents
    }

    /// One UV sequence per requested texture channel.
    pub fn uv_channels(&self) -> &[Vec<Vector2<f32>>] {
        &self.uvs
    }

    /// The shared backing index sequence of all LODs.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn lods(&self) -> &[Lod] {
        &self.lods
    }

    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    pub fn lod_indices(&self, level: usize) -> Option<&[u32]> {
        self.lods.get(level).map(|lod| {
            let start = lod.index_offset as usize;
            &self.indices[start..start + lod.index_count as usize]
        })
    }

    pub fn triangle_count(&self, level: usize) -> usize {
        self.lods.get(level).map_or(0, |lod| lod.index_count as usize / 3)
    }

    pub fn bounds(&self) -> &BoundingVolume {
        &self.bounds
    }

    pub fn min_bounds(&self) -> Vector3<f32> {
        self.bounds.min
    }

    pub fn max_bounds(&self) -> Vector3<f32> {
        self.bounds.max
    }

    pub fn local_center(&self) -> Vector3<f32> {
        self.bounds.center
    }

    pub fn bounding_sphere_radius(&self) -> f32 {
        self.bounds.radius
    }

    /// Pack vertices for `layout`; attributes the mesh lacks are zero-filled.
    pub fn interleave(&self, layout: &MeshLayout) -> Vec<f32> {
        let zero3 = Vector3::new(0.0, 0.0, 0.0);
        let zero2 = Vector2::new(0.0, 0.0);
        let mut out = Vec::with_capacity(self.vertex_count() * layout.floats_per_vertex());
        for i in 0..self.vertex_count() {
            let p = self.positions[i];
            out.extend_from_slice(&[p.x, p.y, p.z]);
            for (enabled, attr) in [
                (layout.normals, &self.normals),
                (layout.tangents, &self.tangents),
                (layout.bitangents, &self.bitangents),
            ] {
                if enabled {
                    let v = attr.get(i).copied().unwrap_or(zero3);
                    out.extend_from_slice(&[v.x, v.y, v.z]);
                }
            }
            for channel in 0..layout.uv_channels as usize {
                let uv = self.uvs.get(channel).and_then(|c| c.get(i)).copied().unwrap_or(zero2);
                out.extend_from_slice(&[uv.x, uv.y]);
            }
        }
        out
    }

    /**
     * Cache-or-create GPU buffers for `layout`.
     *
     * Repeated calls with the same layout and factory type return the same
     * `Arc`, the factory runs only on the first request.
     */
    pub fn gpu_buffers<F: BufferFactory>(&self, factory: &F, layout: &MeshLayout) -> Arc<F::Buffers> {
        let key = (*layout, TypeId::of::<F::Buffers>());
        let mut cache = self.gpu_cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = cache.get(&key) {
            if let Ok(buffers) = Arc::clone(existing).downcast::<F::Buffers>() {
                return buffers;
            }
        }
        let vertices = self.interleave(layout);
        let buffers = Arc::new(factory.create_buffers(self, layout, &vertices));
        cache.insert(key, buffers.clone());
        buffers
    }

    pub fn cached_layouts(&self) -> usize {
        self.gpu_cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Creates GPU-side buffers for a mesh. Implemented for [`wgpu::Device`].
pub trait BufferFactory {
    type Buffers: Send + Sync + 'static;

    fn create_buffers(&self, mesh: &Mesh, layout: &MeshLayout, vertices: &[f32]) -> Self::Buffers;
}

/// Vertex and index buffers of one mesh in one layout.
#[derive(Debug)]
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub lods: Vec<Lod>,
    pub layout: MeshLayout,
}

impl GpuMesh {
    pub fn draw_lod(&self, render_pass: &mut wgpu::RenderPass<'_>, level: usize, instances: std::ops::Range<u32>) {
        let Some(lod) = self.lods.get(level.min(self.lods.len().saturating_sub(1))) else {
            return;
        };
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed(lod.index_offset..lod.index_offset + lod.index_count, 0, instances);
    }
}

impl BufferFactory for wgpu::Device {
    type Buffers = GpuMesh;

    fn create_buffers(&self, mesh: &Mesh, layout: &MeshLayout, vertices: &[f32]) -> GpuMesh {
        let vertex_buffer = self.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Vertex Buffer", mesh.name)),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Index Buffer", mesh.name)),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        GpuMesh {
            vertex_buffer,
            index_buffer,
            lods: mesh.lods.clone(),
            layout: *layout,
        }
    }
}
