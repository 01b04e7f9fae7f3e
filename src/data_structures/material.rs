//! Materials, material layouts and the named material registry.
//!
//! A [`Material`] is a named bundle of scalar/colour parameters plus texture
//! slots. Which of those a shader expects is described by a
//! [`MaterialLayout`]; the importer only fills what the layout asks for.
//! Registered materials are shared as `Arc<Material>` and never mutated.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use cgmath::Vector3;
use thiserror::Error;

use crate::data_structures::texture::TextureRef;

pub const DEFAULT_AMBIENT: [f32; 3] = [0.2, 0.2, 0.2];
pub const DEFAULT_DIFFUSE: [f32; 3] = [0.6, 0.6, 0.6];
pub const DEFAULT_SPECULAR: [f32; 3] = [0.5, 0.5, 0.5];
pub const DEFAULT_SHININESS: f32 = 32.0;

/// Base name for source materials that carry no name.
pub const UNNAMED_MATERIAL: &str = "UnnamedMaterial";
/// Base name for generated replacements of invalid material references.
pub const FALLBACK_MATERIAL: &str = "FallbackMaterial";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MaterialParam {
    Ambient,
    Diffuse,
    Specular,
    Emissive,
    Shininess,
    Opacity,
}

impl MaterialParam {
    /// Value used when the source material does not define the parameter.
    pub fn default_value(self) -> ParamValue {
        match self {
            MaterialParam::Ambient => ParamValue::Color(DEFAULT_AMBIENT.into()),
            MaterialParam::Diffuse => ParamValue::Color(DEFAULT_DIFFUSE.into()),
            MaterialParam::Specular => ParamValue::Color(DEFAULT_SPECULAR.into()),
            MaterialParam::Emissive => ParamValue::Color(Vector3::new(0.0, 0.0, 0.0)),
            MaterialParam::Shininess => ParamValue::Float(DEFAULT_SHININESS),
            MaterialParam::Opacity => ParamValue::Float(1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Color(Vector3<f32>),
}

impl ParamValue {
    pub fn as_color(&self) -> Option<Vector3<f32>> {
        match self {
            ParamValue::Color(c) => Some(*c),
            ParamValue::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Color(_) => None,
        }
    }
}

/// Texture slots a material can bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureChannel {
    Albedo,
    Normal,
    Occlusion,
    Emissive,
    MetalRoughness,
}

impl TextureChannel {
    pub const ALL: [TextureChannel; 5] = [
        TextureChannel::Albedo,
        TextureChannel::Normal,
        TextureChannel::Occlusion,
        TextureChannel::Emissive,
        TextureChannel::MetalRoughness,
    ];

    /// Normal and data maps are sampled linearly, colour maps as sRGB.
    pub fn is_srgb(self) -> bool {
        matches!(self, TextureChannel::Albedo | TextureChannel::Emissive)
    }
}

/// The parameters and texture channels a shader expects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaterialLayout {
    params: BTreeSet<MaterialParam>,
    textures: BTreeSet<TextureChannel>,
}

impl MaterialLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classic Blinn-Phong parameters with albedo and normal maps.
    pub fn phong() -> Self {
        Self::new()
            .with_param(MaterialParam::Ambient)
            .with_param(MaterialParam::Diffuse)
            .with_param(MaterialParam::Specular)
            .with_param(MaterialParam::Shininess)
            .with_texture(TextureChannel::Albedo)
            .with_texture(TextureChannel::Normal)
    }

    pub fn with_param(mut self, param: MaterialParam) -> Self {
        self.params.insert(param);
        self
    }

    pub fn with_texture(mut self, channel: TextureChannel) -> Self {
        self.textures.insert(channel);
        self
    }

    pub fn params(&self) -> impl Iterator<Item = MaterialParam> + '_ {
        self.params.iter().copied()
    }

    pub fn textures(&self) -> impl Iterator<Item = TextureChannel> + '_ {
        self.textures.iter().copied()
    }

    pub fn has_param(&self, param: MaterialParam) -> bool {
        self.params.contains(&param)
    }

    pub fn has_texture(&self, channel: TextureChannel) -> bool {
        self.textures.contains(&channel)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn merged(&self, other: &MaterialLayout) -> MaterialLayout {
        MaterialLayout {
            params: self.params.union(&other.params).copied().collect(),
            textures: self.textures.union(&other.textures).copied().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    name: String,
    layout: MaterialLayout,
    params: BTreeMap<MaterialParam, ParamValue>,
    textures: BTreeMap<TextureChannel, TextureRef>,
}

impl Material {
    pub fn new(name: impl Into<String>, layout: MaterialLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            params: BTreeMap::new(),
            textures: BTreeMap::new(),
        }
    }

    /// The replacement used for meshes whose material reference is invalid.
    pub fn fallback(name: impl Into<String>, layout: &MaterialLayout) -> Self {
        let fixed = MaterialLayout::new()
            .with_param(MaterialParam::Ambient)
            .with_param(MaterialParam::Diffuse)
            .with_param(MaterialParam::Specular)
            .with_param(MaterialParam::Shininess);
        let layout = layout.merged(&fixed);
        let mut material = Self::new(name, layout.clone());
        for param in layout.params() {
            material.set_param(param, param.default_value());
        }
        material
    }

    pub fn with_param(mut self, param: MaterialParam, value: ParamValue) -> Self {
        self.set_param(param, value);
        self
    }

    pub fn set_param(&mut self, param: MaterialParam, value: ParamValue) {
        self.params.insert(param, value);
    }

    pub fn set_texture(&mut self, channel: TextureChannel, texture: TextureRef) {
        self.textures.insert(channel, texture);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &MaterialLayout {
        &self.layout
    }

    pub fn param(&self, param: MaterialParam) -> Option<ParamValue> {
        self.params.get(&param).copied()
    }

    pub fn color(&self, param: MaterialParam) -> Option<Vector3<f32>> {
        self.param(param).and_then(|v| v.as_color())
    }

    pub fn float(&self, param: MaterialParam) -> Option<f32> {
        self.param(param).and_then(|v| v.as_float())
    }

    pub fn texture(&self, channel: TextureChannel) -> Option<&TextureRef> {
        self.textures.get(&channel)
    }

    pub fn textures(&self) -> impl Iterator<Item = (TextureChannel, &TextureRef)> {
        self.textures.iter().map(|(c, t)| (*c, t))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaterialError {
    #[error("a material named {0:?} is already registered")]
    DuplicateName(String),
}

/// `base` if free, otherwise the first of `base_1`, `base_2`, … that `is_taken` accepts as free.
pub fn dedup_name(base: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_string();
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/**
 * Named material store shared by the importer and the draw path.
 *
 * Names are unique for the registry's lifetime. The registry is an explicit
 * object owned by the caller; there is no global instance. Not internally
 * synchronized: wrap it in a lock to share between threads.
 */
#[derive(Debug, Default)]
pub struct MaterialRegistry {
    materials: HashMap<String, Arc<Material>>,
    order: Vec<String>,
    fallback_counter: u64,
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Material>> {
        self.materials.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.materials.contains_key(name)
    }

    /// Register `material` under `name` with the given layout.
    pub fn add(&mut self, name: &str, layout: MaterialLayout, material: Material) -> Result<Arc<Material>, MaterialError> {
        if self.materials.contains_key(name) {
            return Err(MaterialError::DuplicateName(name.to_string()));
        }
        let mut material = material;
        material.name = name.to_string();
        material.layout = layout;
        let material = Arc::new(material);
        self.materials.insert(name.to_string(), material.clone());
        self.order.push(name.to_string());
        Ok(material)
    }

    /// Create and register a fallback material with a fresh counter-based name.
    pub fn create_fallback(&mut self, layout: &MaterialLayout) -> Arc<Material> {
        loop {
            self.fallback_counter += 1;
            let name = format!("{}_{}", FALLBACK_MATERIAL, self.fallback_counter);
            if self.contains(&name) {
                continue;
            }
            let material = Material::fallback(name.clone(), layout);
            let layout = material.layout().clone();
            if let Ok(material) = self.add(&name, layout, material) {
                log::debug!("Created fallback material {}", name);
                return material;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn dedup_appends_suffixes() {
        let taken: HashSet<String> = ["Wood", "Wood_1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedup_name("Wood", |n| taken.contains(n)), "Wood_2");
        assert_eq!(dedup_name("Stone", |n| taken.contains(n)), "Stone");
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut registry = MaterialRegistry::new();
        let layout = MaterialLayout::phong();
        registry.add("Wood", layout.clone(), Material::new("Wood", layout.clone())).unwrap();
        let err = registry.add("Wood", layout.clone(), Material::new("Wood", layout)).unwrap_err();
        assert_eq!(err, MaterialError::DuplicateName("Wood".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn fallbacks_get_unique_names_and_defaults() {
        let mut registry = MaterialRegistry::new();
        let a = registry.create_fallback(&MaterialLayout::new());
        let b = registry.create_fallback(&MaterialLayout::new());
        assert_ne!(a.name(), b.name());
        assert_eq!(a.color(MaterialParam::Ambient), Some(Vector3::new(0.2, 0.2, 0.2)));
        assert_eq!(a.color(MaterialParam::Diffuse), Some(Vector3::new(0.6, 0.6, 0.6)));
        assert_eq!(a.color(MaterialParam::Specular), Some(Vector3::new(0.5, 0.5, 0.5)));
        assert_eq!(a.float(MaterialParam::Shininess), Some(32.0));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![a.name(), b.name()]);
    }

    #[test]
    fn fallback_skips_names_already_taken() {
        let mut registry = MaterialRegistry::new();
        let layout = MaterialLayout::new();
        registry
            .add("FallbackMaterial_1", layout.clone(), Material::new("x", layout.clone()))
            .unwrap();
        let fallback = registry.create_fallback(&layout);
        assert_eq!(fallback.name(), "FallbackMaterial_2");
    }
}
