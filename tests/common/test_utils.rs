use std::path::{Path, PathBuf};

use strata_ngin::{
    Matrix4, Vector3,
    data_structures::{material::MaterialRegistry, texture::TextureCache},
    resources::{
        ImportSettings,
        importer::{ImportError, ImportedScene, Importer},
        parsed::{ParsedMaterial, ParsedMesh, ParsedNode, ParsedScene},
    },
};

pub(crate) const EPSILON: f32 = 1e-4;

/// A unit right triangle in the XY plane.
pub(crate) fn triangle_mesh(name: &str, material_index: Option<usize>) -> ParsedMesh {
    ParsedMesh {
        name: name.to_string(),
        positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        faces: vec![vec![0, 1, 2]],
        material_index,
        ..Default::default()
    }
}

/// An `n` x `n` quad grid in the XY plane, one quad per face.
pub(crate) fn grid_mesh(name: &str, n: u32) -> ParsedMesh {
    let mut positions = Vec::new();
    for y in 0..=n {
        for x in 0..=n {
            positions.push([x as f32, y as f32, 0.0]);
        }
    }
    let mut faces = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let i = y * (n + 1) + x;
            faces.push(vec![i, i + 1, i + n + 2, i + n + 1]);
        }
    }
    ParsedMesh {
        name: name.to_string(),
        positions,
        faces,
        material_index: Some(0),
        ..Default::default()
    }
}

pub(crate) fn named_material(name: &str, diffuse: [f32; 3]) -> ParsedMaterial {
    ParsedMaterial {
        name: Some(name.to_string()),
        diffuse: Some(diffuse),
        ..Default::default()
    }
}

/// A root holding every mesh of `meshes` directly.
pub(crate) fn flat_scene(meshes: Vec<ParsedMesh>, materials: Vec<ParsedMaterial>) -> ParsedScene {
    let mut root = ParsedNode::new("root");
    root.meshes = (0..meshes.len()).collect();
    ParsedScene { meshes, materials, root }
}

/// Row-major 3x4 translation.
pub(crate) fn translation(x: f32, y: f32, z: f32) -> [[f32; 4]; 3] {
    [[1.0, 0.0, 0.0, x], [0.0, 1.0, 0.0, y], [0.0, 0.0, 1.0, z]]
}

pub(crate) fn import_in_memory(
    scene: ParsedScene,
    settings: &ImportSettings,
    registry: &mut MaterialRegistry,
) -> Result<ImportedScene, ImportError> {
    let mut textures = TextureCache::new();
    Importer::new(registry, &mut textures).import_parsed(scene, Path::new("memory"), settings)
}

pub(crate) fn write_fixture(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("failed to write fixture");
    path
}

pub(crate) fn assert_vec3_near(actual: Vector3<f32>, expected: Vector3<f32>) {
    let d = actual - expected;
    assert!(
        d.x.abs() < EPSILON && d.y.abs() < EPSILON && d.z.abs() < EPSILON,
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}

pub(crate) fn assert_matrix_near(actual: Matrix4<f32>, expected: Matrix4<f32>) {
    let a: &[f32; 16] = actual.as_ref();
    let e: &[f32; 16] = expected.as_ref();
    for (x, y) in a.iter().zip(e.iter()) {
        assert!((x - y).abs() < EPSILON, "expected {:?}, got {:?}", expected, actual);
    }
}
