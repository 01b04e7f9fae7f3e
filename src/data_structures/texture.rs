//! Decoded textures, the texture cache and GPU texture handles.
//!
//! Import works on CPU-side [`TextureData`]; uploading to the GPU happens
//! later through [`Texture2d`] / [`CubeTexture`], which expose only the
//! [`Bindable`] capability to draw code. [`GpuTextureCache`] uploads the
//! textures of registered materials on first use.

use std::{collections::HashMap, sync::Arc};

use anyhow::*;

use crate::data_structures::material::{Material, TextureChannel};

/// Decoded RGBA8 pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for TextureData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TextureData({}x{})", self.width, self.height)
    }
}

impl TextureData {
    pub fn from_image(img: &image::DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        }
    }

    /// A `width` x `height` texture filled with one colour.
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let rgba = color
            .iter()
            .cycle()
            .take(width as usize * height as usize * 4)
            .copied()
            .collect();
        Self { width, height, rgba }
    }
}

/// A material's handle on a decoded texture, identified by its source key.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureRef {
    pub key: String,
    pub data: Arc<TextureData>,
}

/**
 * Decoded textures keyed by source (file path or `embedded:<file>#<image>`).
 *
 * Shared across imports so materials referencing the same file decode it once.
 */
#[derive(Debug, Default)]
pub struct TextureCache {
    textures: HashMap<String, Arc<TextureData>>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<TextureRef> {
        self.textures.get(key).map(|data| TextureRef {
            key: key.to_string(),
            data: data.clone(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.textures.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, data: TextureData) -> TextureRef {
        let key = key.into();
        let data = Arc::new(data);
        self.textures.insert(key.clone(), data.clone());
        TextureRef { key, data }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// A GPU resource that can be attached to a bind group slot of a render pass.
pub trait Bindable {
    fn bind(&self, slot: u32, render_pass: &mut wgpu::RenderPass<'_>);

    fn unbind(&self, slot: u32, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.set_bind_group(slot, None, &[]);
    }
}

/// A 2D texture on the GPU: opaque handle, dimensions and its bind group.
#[derive(Clone, Debug)]
pub struct Texture2d {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub bind_group: wgpu::BindGroup,
    pub width: u32,
    pub height: u32,
}

impl Texture2d {
    /// Upload `data`. `srgb` selects between colour and linear data formats.
    pub fn from_data(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        data: &TextureData,
        label: &str,
        srgb: bool,
    ) -> Result<Self> {
        ensure!(
            data.rgba.len() == data.width as usize * data.height as usize * 4,
            "texture {} has {} bytes for {}x{} pixels",
            label,
            data.rgba.len(),
            data.width,
            data.height
        );
        let size = wgpu::Extent3d {
            width: data.width.max(1),
            height: data.height.max(1),
            depth_or_array_layers: 1,
        };
        let format = if srgb {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        write_layer(queue, &texture, data, 0);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_default_sampler(device);
        let layout = texture_layout(device, wgpu::TextureViewDimension::D2);
        let bind_group = create_bind_group(device, &layout, &view, &sampler, label);
        Ok(Self {
            texture,
            view,
            sampler,
            bind_group,
            width: data.width,
            height: data.height,
        })
    }

    /// Neutral stand-in for an unset material slot (flat normal or white).
    pub fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue, is_normal_map: bool) -> Result<Self> {
        // The blue/purple-ish colour that represents the default for normal maps
        let (color, label) = if is_normal_map {
            ([127, 127, 255, 255], "default normal map")
        } else {
            ([255, 255, 255, 255], "default white")
        };
        Self::from_data(device, queue, &TextureData::solid(2, 2, color), label, !is_normal_map)
    }
}

impl Bindable for Texture2d {
    fn bind(&self, slot: u32, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.set_bind_group(slot, &self.bind_group, &[]);
    }
}

/// Six-face cube map, faces ordered +X, -X, +Y, -Y, +Z, -Z.
#[derive(Clone, Debug)]
pub struct CubeTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub bind_group: wgpu::BindGroup,
    pub size: u32,
}

impl CubeTexture {
    pub fn from_faces(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        faces: &[TextureData; 6],
        label: &str,
    ) -> Result<Self> {
        let size = cube_face_size(faces, label)?;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        for (layer, face) in faces.iter().enumerate() {
            write_layer(queue, &texture, face, layer as u32);
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        let sampler = create_default_sampler(device);
        let layout = texture_layout(device, wgpu::TextureViewDimension::Cube);
        let bind_group = create_bind_group(device, &layout, &view, &sampler, label);
        Ok(Self {
            texture,
            view,
            sampler,
            bind_group,
            size,
        })
    }
}

impl Bindable for CubeTexture {
    fn bind(&self, slot: u32, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.set_bind_group(slot, &self.bind_group, &[]);
    }
}

/// Edge length shared by all six faces, which must be square and non-empty.
fn cube_face_size(faces: &[TextureData; 6], label: &str) -> Result<u32> {
    let size = faces[0].width;
    ensure!(size > 0, "cube texture {} has empty faces", label);
    for (i, face) in faces.iter().enumerate() {
        ensure!(
            face.width == size && face.height == size,
            "cube face {} of {} is {}x{}, expected {}x{}",
            i,
            label,
            face.width,
            face.height,
            size,
            size
        );
    }
    Ok(size)
}

/// What a material texture slot is uploaded as.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GpuTextureKey {
    Source { key: String, srgb: bool },
    Placeholder { normal_map: bool },
}

impl GpuTextureKey {
    pub fn for_slot(channel: TextureChannel, texture: Option<&TextureRef>) -> Self {
        match texture {
            Some(texture) => GpuTextureKey::Source {
                key: texture.key.clone(),
                srgb: channel.is_srgb(),
            },
            None => GpuTextureKey::Placeholder {
                normal_map: channel == TextureChannel::Normal,
            },
        }
    }
}

/**
 * GPU uploads of material textures.
 *
 * One [`Texture2d`] per source and colour space, so materials sharing a file
 * share the upload. Unset slots resolve to a neutral placeholder.
 */
#[derive(Debug, Default)]
pub struct GpuTextureCache {
    textures: HashMap<GpuTextureKey, Arc<Texture2d>>,
}

impl GpuTextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn material_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        material: &Material,
        channel: TextureChannel,
    ) -> Result<Arc<Texture2d>> {
        let texture = material.texture(channel);
        let key = GpuTextureKey::for_slot(channel, texture);
        if let Some(uploaded) = self.textures.get(&key) {
            return Ok(uploaded.clone());
        }
        let uploaded = match texture {
            Some(texture) => Texture2d::from_data(device, queue, &texture.data, &texture.key, channel.is_srgb())?,
            None => Texture2d::placeholder(device, queue, channel == TextureChannel::Normal)?,
        };
        log::debug!("Uploaded {:?} for {}", key, material.name());
        let uploaded = Arc::new(uploaded);
        self.textures.insert(key, uploaded.clone());
        Ok(uploaded)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

fn write_layer(queue: &wgpu::Queue, texture: &wgpu::Texture, data: &TextureData, layer: u32) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
        },
        &data.rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * data.width),
            rows_per_image: Some(data.height),
        },
        wgpu::Extent3d {
            width: data.width,
            height: data.height,
            depth_or_array_layers: 1,
        },
    );
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
        label: Some(label),
    })
}

/// Texture at binding 0 and its filtering sampler at binding 1.
pub fn texture_layout(device: &wgpu::Device, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
        label: Some("texture_bind_group_layout"),
    })
}

pub fn create_default_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}
