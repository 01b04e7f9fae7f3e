use image::{Rgba, RgbaImage};
use strata_ngin::{
    Vector2, Vector3,
    data_structures::{
        material::{MaterialParam, MaterialRegistry, TextureChannel},
        texture::TextureCache,
    },
    import,
    pool::{PoolConfig, WorkerPool},
    resources::{ImportSettings, importer::ImportError},
};
use tempfile::tempdir;

use crate::common::test_utils::{assert_vec3_near, write_fixture};

mod common;

const QUAD_AND_TRIANGLE_OBJ: &str = "\
mtllib scene.mtl
o Quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
usemtl Brick
f 1/1/1 2/2/1 3/3/1 4/4/1
o Tri
v 2 0 0
v 3 0 0
v 2 1 0
usemtl Glass
f 5 6 7
";

const SCENE_MTL: &str = "\
newmtl Brick
Ka 0.1 0.1 0.1
Kd 0.8 0.2 0.1
Ks 0.3 0.3 0.3
Ns 10
map_Kd brick.png

newmtl Glass
Kd 0.9 0.9 1.0
d 0.5
";

/// A parent node moved to z = -5 with a child scaling a red triangle by 2.
/// The buffer holds three positions followed by three u16 indices.
const TRIANGLE_GLTF: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "name": "Demo", "nodes": [0] }],
  "nodes": [
    { "name": "Parent", "translation": [0.0, 0.0, -5.0], "children": [1] },
    { "name": "Tri", "mesh": 0, "scale": [2.0, 2.0, 2.0] }
  ],
  "meshes": [{
    "name": "Triangle",
    "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }]
  }],
  "materials": [{
    "name": "Red",
    "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.0, 0.0, 1.0] }
  }],
  "buffers": [{
    "byteLength": 44,
    "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIAAAA="
  }],
  "bufferViews": [
    { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
    { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
  ],
  "accessors": [
    { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
    { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
  ]
}"#;

#[test]
fn should_import_obj_with_materials() {
    let dir = tempdir().unwrap();
    let obj = write_fixture(dir.path(), "scene.obj", QUAD_AND_TRIANGLE_OBJ);
    write_fixture(dir.path(), "scene.mtl", SCENE_MTL);
    let mut registry = MaterialRegistry::new();
    let mut textures = TextureCache::new();
    let settings = ImportSettings::default().with_decode_textures(false);

    let imported = import(&obj, &settings, &mut registry, &mut textures, None).unwrap();

    let graph = &imported.graph;
    let root = graph.root().unwrap();
    assert_eq!(graph.node(root).unwrap().name, "scene.obj");
    assert_eq!(graph.children(root).len(), 2);
    assert!(graph.find_by_name("Quad").is_some());
    assert!(graph.find_by_name("Tri").is_some());

    assert_eq!(imported.materials, vec!["Brick", "Glass"]);
    let brick = registry.get_by_name("Brick").unwrap();
    assert_eq!(brick.color(MaterialParam::Diffuse), Some(Vector3::new(0.8, 0.2, 0.1)));
    assert_eq!(brick.color(MaterialParam::Ambient), Some(Vector3::new(0.1, 0.1, 0.1)));
    assert_eq!(brick.float(MaterialParam::Shininess), Some(10.0));
    // Decoding was switched off
    assert!(brick.texture(TextureChannel::Albedo).is_none());
    assert!(textures.is_empty());

    let quad_node = graph.node(graph.find_by_name("Quad").unwrap()).unwrap();
    let quad = &imported.meshes[quad_node.meshes[0].mesh];
    assert_eq!(imported.materials[quad_node.meshes[0].material], "Brick");
    assert_eq!(quad.vertex_count(), 4);
    assert_eq!(quad.triangle_count(0), 2);
    // The UV origin moves from bottom-left to top-left
    assert_eq!(quad.uv_channels().len(), 1);
    assert_eq!(quad.uv_channels()[0][0], Vector2::new(0.0, 1.0));
    assert_eq!(quad.uv_channels()[0][2], Vector2::new(1.0, 0.0));

    let tri_node = graph.node(graph.find_by_name("Tri").unwrap()).unwrap();
    let tri = &imported.meshes[tri_node.meshes[0].mesh];
    assert_eq!(imported.materials[tri_node.meshes[0].material], "Glass");
    assert_eq!(tri.vertex_count(), 3);
    // No normals in the file: they are generated
    assert_eq!(tri.normals().len(), 3);
    assert_vec3_near(tri.normals()[0], Vector3::new(0.0, 0.0, 1.0));
}

#[test]
fn should_decode_textures_on_worker_pool() {
    let dir = tempdir().unwrap();
    let obj = write_fixture(dir.path(), "scene.obj", QUAD_AND_TRIANGLE_OBJ);
    write_fixture(dir.path(), "scene.mtl", SCENE_MTL);
    RgbaImage::from_pixel(2, 2, Rgba([200, 40, 20, 255]))
        .save(dir.path().join("brick.png"))
        .unwrap();
    let pool = WorkerPool::new(PoolConfig::default().with_threads(2)).unwrap();
    let mut registry = MaterialRegistry::new();
    let mut textures = TextureCache::new();

    import(&obj, &ImportSettings::default(), &mut registry, &mut textures, Some(&pool)).unwrap();

    assert_eq!(textures.len(), 1);
    let brick = registry.get_by_name("Brick").unwrap();
    let albedo = brick.texture(TextureChannel::Albedo).unwrap();
    assert_eq!((albedo.data.width, albedo.data.height), (2, 2));
    assert_eq!(&albedo.data.rgba[..4], &[200, 40, 20, 255]);
    assert!(registry.get_by_name("Glass").unwrap().texture(TextureChannel::Albedo).is_none());
}

#[test]
fn should_import_when_texture_is_missing() {
    let dir = tempdir().unwrap();
    let obj = write_fixture(dir.path(), "scene.obj", QUAD_AND_TRIANGLE_OBJ);
    write_fixture(dir.path(), "scene.mtl", SCENE_MTL);
    let mut registry = MaterialRegistry::new();
    let mut textures = TextureCache::new();

    let imported = import(&obj, &ImportSettings::default(), &mut registry, &mut textures, None).unwrap();

    assert_eq!(imported.meshes.len(), 2);
    assert!(textures.is_empty());
    assert!(registry.get_by_name("Brick").unwrap().texture(TextureChannel::Albedo).is_none());
}

#[test]
fn should_import_gltf_hierarchy() {
    let dir = tempdir().unwrap();
    let path = write_fixture(dir.path(), "triangle.gltf", TRIANGLE_GLTF);
    let mut registry = MaterialRegistry::new();
    let mut textures = TextureCache::new();

    let imported = import(&path, &ImportSettings::default(), &mut registry, &mut textures, None).unwrap();

    let graph = &imported.graph;
    assert_eq!(graph.len(), 3);
    let root = graph.root().unwrap();
    assert_eq!(graph.node(root).unwrap().name, "Demo");
    let parent = graph.find_by_name("Parent").unwrap();
    let tri = graph.find_by_name("Tri").unwrap();
    assert_eq!(graph.parent(parent), Some(root));
    assert_eq!(graph.parent(tri), Some(parent));

    assert_eq!(imported.meshes.len(), 1);
    let mesh = &imported.meshes[0];
    assert_eq!(mesh.name, "Triangle");
    assert_eq!(mesh.indices(), &[0, 1, 2]);
    assert_eq!(mesh.normals().len(), 3);

    assert_eq!(imported.materials, vec!["Red"]);
    let red = registry.get_by_name("Red").unwrap();
    assert_eq!(red.color(MaterialParam::Diffuse), Some(Vector3::new(1.0, 0.0, 0.0)));

    let bounds = imported.world_bounds();
    assert_vec3_near(bounds.min, Vector3::new(0.0, 0.0, -5.0));
    assert_vec3_near(bounds.max, Vector3::new(2.0, 2.0, -5.0));
}

#[test]
fn should_center_gltf_on_origin() {
    let dir = tempdir().unwrap();
    let path = write_fixture(dir.path(), "triangle.gltf", TRIANGLE_GLTF);
    let mut registry = MaterialRegistry::new();
    let mut textures = TextureCache::new();
    let settings = ImportSettings::default().with_center_scene(true);

    let imported = import(&path, &settings, &mut registry, &mut textures, None).unwrap();

    let bounds = imported.world_bounds();
    assert_vec3_near(bounds.center, Vector3::new(0.0, 0.0, 0.0));
    assert_vec3_near(bounds.max - bounds.min, Vector3::new(2.0, 2.0, 0.0));
}

#[test]
fn should_fail_on_missing_file() {
    let dir = tempdir().unwrap();
    let mut registry = MaterialRegistry::new();
    let mut textures = TextureCache::new();

    let result = import(
        dir.path().join("nowhere.obj"),
        &ImportSettings::default(),
        &mut registry,
        &mut textures,
        None,
    );

    assert!(matches!(result, Err(ImportError::ParseFailed { .. })));
    assert!(registry.is_empty());
}
