//! Render objects, visibility, batching and draw submission.
//!
//! A [`RenderObject`] ties a mesh to a material, a shader and a world
//! transform. Every frame the [`RenderObjectSet`] is filtered against the
//! camera [`Frustum`], the visible objects are grouped into [`Batch`]es by
//! `(shader, material)` and [`submit`] walks the batches, picking a LOD per
//! object and handing each draw to a [`DrawSink`].
//!
//! # Key types
//!
//! - [`RenderObject`] is one drawable unit
//! - [`RenderObjectSet`] owns the active objects
//! - [`Batch`] borrows the visible objects sharing a shader and material
//! - [`GpuDrawSink`] records draws against wgpu buffers and material textures

use std::{collections::HashMap, sync::Arc};

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, SquareMatrix, Transform, Vector3};

use crate::{
    culling::Frustum,
    data_structures::{
        buffer::{BufferError, GpuBuffer},
        instance::InstanceRaw,
        material::{MaterialRegistry, TextureChannel},
        mesh::{GpuMesh, Mesh, MeshLayout},
        texture::{Bindable, CubeTexture, GpuTextureCache, Texture2d},
    },
    resources::importer::ImportedScene,
};

/// One drawable: a mesh drawn with a material and shader at a transform.
#[derive(Clone, Debug)]
pub struct RenderObject {
    pub mesh: Arc<Mesh>,
    pub layout: MeshLayout,
    pub material: String,
    pub shader: String,
    pub transform: Matrix4<f32>,
}

impl RenderObject {
    pub fn new(mesh: Arc<Mesh>, material: impl Into<String>, shader: impl Into<String>) -> Self {
        Self {
            mesh,
            layout: MeshLayout::STANDARD,
            material: material.into(),
            shader: shader.into(),
            transform: Matrix4::identity(),
        }
    }

    pub fn with_layout(mut self, layout: MeshLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_transform(mut self, transform: impl Into<Matrix4<f32>>) -> Self {
        self.transform = transform.into();
        self
    }

    /**
     * The mesh's bounding sphere in world space.
     *
     * The radius is scaled by the largest axis scale of the transform, so the
     * sphere stays conservative under non-uniform scaling.
     */
    pub fn world_sphere(&self) -> (Vector3<f32>, f32) {
        let center = self
            .transform
            .transform_point(Point3::from_vec(self.mesh.local_center()))
            .to_vec();
        let scale = self
            .transform
            .x
            .truncate()
            .magnitude()
            .max(self.transform.y.truncate().magnitude())
            .max(self.transform.z.truncate().magnitude());
        (center, self.mesh.bounding_sphere_radius() * scale)
    }

    /// Distance from `point` to the centre of the object's world bounding sphere.
    pub fn compute_distance_to(&self, point: Vector3<f32>) -> f32 {
        (self.world_sphere().0 - point).magnitude()
    }

    /// LOD to draw when seen from `eye`.
    pub fn select_lod(&self, eye: Vector3<f32>, policy: &LodPolicy) -> usize {
        policy.level_for(self.compute_distance_to(eye), self.mesh.lod_count())
    }
}

/// Distance-based LOD selection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodPolicy {
    /// Up to this distance LOD0 is drawn.
    pub base_distance: f32,
    /// Every time the distance grows by this factor past `base_distance`, the next coarser LOD is used.
    pub distance_factor: f32,
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self {
            base_distance: 10.0,
            distance_factor: 2.0,
        }
    }
}

impl LodPolicy {
    pub fn level_for(&self, distance: f32, lod_count: usize) -> usize {
        let last = lod_count.saturating_sub(1);
        if distance <= self.base_distance || self.base_distance <= 0.0 || self.distance_factor <= 1.0 {
            return 0;
        }
        let level = ((distance / self.base_distance).ln() / self.distance_factor.ln()).ceil();
        (level.max(0.0) as usize).min(last)
    }
}

pub type ObjectId = u64;

/// The active render objects, in spawn order.
#[derive(Clone, Debug, Default)]
pub struct RenderObjectSet {
    objects: Vec<(ObjectId, RenderObject)>,
    next_id: ObjectId,
}

impl RenderObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One object per mesh reference of the scene, placed at its node's global transform.
    pub fn from_scene(scene: &ImportedScene, shader: &str, layout: MeshLayout) -> Self {
        let mut set = Self::new();
        set.spawn_scene(scene, shader, layout);
        set
    }

    pub fn spawn_scene(&mut self, scene: &ImportedScene, shader: &str, layout: MeshLayout) -> Vec<ObjectId> {
        scene
            .graph
            .drawables()
            .filter_map(|(node, mesh_ref, global)| {
                let mesh = scene.meshes.get(mesh_ref.mesh);
                let material = scene.materials.get(mesh_ref.material);
                match (mesh, material) {
                    (Some(mesh), Some(material)) => Some(
                        RenderObject::new(mesh.clone(), material.clone(), shader)
                            .with_layout(layout)
                            .with_transform(global),
                    ),
                    _ => {
                        log::warn!("Node {} holds a dangling mesh reference {:?}", node, mesh_ref);
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|object| self.spawn(object))
            .collect()
    }

    pub fn spawn(&mut self, object: RenderObject) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.push((id, object));
        id
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<RenderObject> {
        let index = self.objects.iter().position(|(i, _)| *i == id)?;
        Some(self.objects.remove(index).1)
    }

    pub fn get(&self, id: ObjectId) -> Option<&RenderObject> {
        self.objects.iter().find(|(i, _)| *i == id).map(|(_, o)| o)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut RenderObject> {
        self.objects.iter_mut().find(|(i, _)| *i == id).map(|(_, o)| o)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &RenderObject)> {
        self.objects.iter().map(|(id, o)| (*id, o))
    }

    /// Objects whose world bounding sphere is not entirely outside `frustum`.
    pub fn visible(&self, frustum: &Frustum) -> Vec<&RenderObject> {
        self.objects
            .iter()
            .map(|(_, o)| o)
            .filter(|o| {
                let (center, radius) = o.world_sphere();
                frustum.is_visible(center, radius)
            })
            .collect()
    }
}

/// Visible objects sharing a shader and a material.
#[derive(Debug)]
pub struct Batch<'a> {
    pub shader: &'a str,
    pub material: &'a str,
    pub objects: Vec<&'a RenderObject>,
}

/// Group objects by `(shader, material)`. Batches appear in the order their
/// first object does; objects keep their relative order inside a batch.
pub fn batch<'a>(objects: impl IntoIterator<Item = &'a RenderObject>) -> Vec<Batch<'a>> {
    let mut batches: Vec<Batch<'a>> = Vec::new();
    let mut lookup: HashMap<(&'a str, &'a str), usize> = HashMap::new();
    for object in objects {
        let key = (object.shader.as_str(), object.material.as_str());
        let index = *lookup.entry(key).or_insert_with(|| {
            batches.push(Batch {
                shader: key.0,
                material: key.1,
                objects: Vec::new(),
            });
            batches.len() - 1
        });
        batches[index].objects.push(object);
    }
    batches
}

/// Receives the draws of [`submit`]: a `begin_batch` per batch followed by its draws.
pub trait DrawSink {
    fn begin_batch(&mut self, shader: &str, material: &str);

    fn draw(&mut self, object: &RenderObject, lod: usize);

    fn end_batch(&mut self) {}
}

/// Drive `sink` with every batch, choosing each object's LOD as seen from `eye`.
pub fn submit<S: DrawSink + ?Sized>(batches: &[Batch<'_>], eye: Vector3<f32>, policy: &LodPolicy, sink: &mut S) {
    for batch in batches {
        sink.begin_batch(batch.shader, batch.material);
        for object in &batch.objects {
            sink.draw(object, object.select_lod(eye, policy));
        }
        sink.end_batch();
    }
}

struct GpuDraw {
    mesh: Arc<GpuMesh>,
    lod: usize,
    instance: u32,
}

struct GpuBatch {
    shader: String,
    material: String,
    textures: Vec<(u32, Arc<Texture2d>)>,
    draws: Vec<GpuDraw>,
}

/// Where the textures of a batch's material come from and which slots they go to.
struct MaterialTextures<'a> {
    queue: &'a wgpu::Queue,
    registry: &'a MaterialRegistry,
    cache: &'a mut GpuTextureCache,
    slots: Vec<(u32, TextureChannel)>,
}

impl MaterialTextures<'_> {
    fn resolve(&mut self, device: &wgpu::Device, name: &str) -> Vec<(u32, Arc<Texture2d>)> {
        let Some(material) = self.registry.get_by_name(name) else {
            log::warn!("Material {} is not registered, drawing without its textures", name);
            return Vec::new();
        };
        let mut bound = Vec::with_capacity(self.slots.len());
        for &(slot, channel) in &self.slots {
            match self.cache.material_texture(device, self.queue, &material, channel) {
                Ok(texture) => bound.push((slot, texture)),
                Err(e) => log::warn!("{:?} texture of {} not uploaded: {}", channel, name, e),
            }
        }
        bound
    }
}

/**
 * Records a frame's draws for wgpu.
 *
 * Mesh buffers come from each mesh's GPU cache. Per-object transforms are
 * collected as [`InstanceRaw`] and uploaded in one write; a frame with more
 * instances than the buffer holds is rejected, not truncated. With
 * [`with_material_textures`](Self::with_material_textures) every batch also
 * binds its material's textures.
 */
pub struct GpuDrawSink<'a> {
    device: &'a wgpu::Device,
    batches: Vec<GpuBatch>,
    instances: Vec<InstanceRaw>,
    materials: Option<MaterialTextures<'a>>,
    environment: Option<(u32, &'a CubeTexture)>,
}

impl<'a> GpuDrawSink<'a> {
    pub fn new(device: &'a wgpu::Device) -> Self {
        Self {
            device,
            batches: Vec::new(),
            instances: Vec::new(),
            materials: None,
            environment: None,
        }
    }

    /// Bind `channel` of each batch's material at the paired bind group slot.
    pub fn with_material_textures(
        mut self,
        queue: &'a wgpu::Queue,
        registry: &'a MaterialRegistry,
        cache: &'a mut GpuTextureCache,
        slots: &[(u32, TextureChannel)],
    ) -> Self {
        self.materials = Some(MaterialTextures {
            queue,
            registry,
            cache,
            slots: slots.to_vec(),
        });
        self
    }

    /// A cube map bound at `slot` for every batch, e.g. for reflections.
    pub fn with_environment(mut self, slot: u32, environment: &'a CubeTexture) -> Self {
        self.environment = Some((slot, environment));
        self
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn upload(&self, queue: &wgpu::Queue, instance_buffer: &GpuBuffer) -> Result<(), BufferError> {
        instance_buffer.write(queue, 0, bytemuck::cast_slice(&self.instances))
    }

    /**
     * Issue the recorded draws. Mesh vertices go to slot 0 and instances to
     * slot 1; `bind` is called whenever the shader/material pair changes so the
     * caller can set the pipeline and its own bind groups. The environment and
     * material textures are bound right after.
     */
    pub fn record(
        &self,
        render_pass: &mut wgpu::RenderPass<'_>,
        instance_buffer: &GpuBuffer,
        mut bind: impl FnMut(&str, &str, &mut wgpu::RenderPass<'_>),
    ) {
        for batch in &self.batches {
            bind(&batch.shader, &batch.material, render_pass);
            if let Some((slot, environment)) = self.environment {
                environment.bind(slot, render_pass);
            }
            for (slot, texture) in &batch.textures {
                texture.bind(*slot, render_pass);
            }
            for draw in &batch.draws {
                render_pass.set_vertex_buffer(1, instance_buffer.buffer().slice(..));
                draw.mesh.draw_lod(render_pass, draw.lod, draw.instance..draw.instance + 1);
            }
        }
    }
}

impl DrawSink for GpuDrawSink<'_> {
    fn begin_batch(&mut self, shader: &str, material: &str) {
        let textures = match self.materials.as_mut() {
            Some(materials) => materials.resolve(self.device, material),
            None => Vec::new(),
        };
        self.batches.push(GpuBatch {
            shader: shader.to_string(),
            material: material.to_string(),
            textures,
            draws: Vec::new(),
        });
    }

    fn draw(&mut self, object: &RenderObject, lod: usize) {
        let mesh = object.mesh.gpu_buffers(self.device, &object.layout);
        let instance = self.instances.len() as u32;
        self.instances.push(InstanceRaw::from_matrix(&object.transform));
        if let Some(batch) = self.batches.last_mut() {
            batch.draws.push(GpuDraw { mesh, lod, instance });
        }
    }
}
