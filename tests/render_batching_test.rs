use strata_ngin::{
    Deg, Vector3,
    camera::{Camera, Projection, frustum},
    data_structures::{material::MaterialRegistry, mesh::MeshLayout},
    render::{DrawSink, LodPolicy, RenderObject, RenderObjectSet, batch, submit},
    resources::{
        ImportSettings,
        parsed::{ParsedNode, ParsedScene},
    },
};

use crate::common::test_utils::{grid_mesh, import_in_memory, named_material, translation, triangle_mesh};

mod common;

#[derive(Default)]
struct RecordingSink {
    batches: Vec<(String, String)>,
    draws: Vec<(String, usize)>,
    ended: usize,
}

impl DrawSink for RecordingSink {
    fn begin_batch(&mut self, shader: &str, material: &str) {
        self.batches.push((shader.to_string(), material.to_string()));
    }

    fn draw(&mut self, object: &RenderObject, lod: usize) {
        self.draws.push((object.mesh.name.clone(), lod));
    }

    fn end_batch(&mut self) {
        self.ended += 1;
    }
}

/// Three triangles in a row along -z: two sharing "Wood", one "Stone", and a
/// fourth far behind the camera.
fn row_scene() -> ParsedScene {
    let mut root = ParsedNode::new("root");
    for (name, mesh, z) in [("a", 0, -5.0), ("b", 1, -10.0), ("c", 0, -15.0), ("behind", 1, 30.0)] {
        let mut child = ParsedNode::new(name);
        child.transform = translation(0.0, 0.0, z);
        child.meshes.push(mesh);
        root.children.push(child);
    }
    ParsedScene {
        meshes: vec![triangle_mesh("wooden", Some(0)), triangle_mesh("stony", Some(1))],
        materials: vec![named_material("Wood", [0.5, 0.3, 0.1]), named_material("Stone", [0.5, 0.5, 0.5])],
        root,
    }
}

fn camera_at_origin() -> (Camera, Projection) {
    (
        Camera::new((0.0, 0.0, 0.0), Deg(-90.0), Deg(0.0)),
        Projection::new(800, 600, Deg(60.0), 0.1, 100.0),
    )
}

#[test]
fn should_spawn_one_object_per_mesh_reference() {
    let mut registry = MaterialRegistry::new();
    let imported = import_in_memory(row_scene(), &ImportSettings::default(), &mut registry).unwrap();

    let set = RenderObjectSet::from_scene(&imported, "lit", MeshLayout::STANDARD);

    assert_eq!(set.len(), 4);
    let materials: Vec<_> = set.iter().map(|(_, o)| o.material.as_str()).collect();
    assert_eq!(materials, vec!["Wood", "Stone", "Wood", "Stone"]);
    assert!(set.iter().all(|(_, o)| o.shader == "lit"));
    let (_, first) = set.iter().next().unwrap();
    assert_eq!(first.transform.w.truncate(), Vector3::new(0.0, 0.0, -5.0));
}

#[test]
fn should_cull_and_batch_visible_objects() {
    let mut registry = MaterialRegistry::new();
    let imported = import_in_memory(row_scene(), &ImportSettings::default(), &mut registry).unwrap();
    let set = RenderObjectSet::from_scene(&imported, "lit", MeshLayout::STANDARD);
    let (camera, projection) = camera_at_origin();

    let visible = set.visible(&frustum(&camera, &projection));
    assert_eq!(visible.len(), 3);

    let batches = batch(visible);
    let keys: Vec<_> = batches.iter().map(|b| (b.shader, b.material, b.objects.len())).collect();
    assert_eq!(keys, vec![("lit", "Wood", 2), ("lit", "Stone", 1)]);

    let mut sink = RecordingSink::default();
    submit(&batches, camera.position.to_homogeneous().truncate(), &LodPolicy::default(), &mut sink);
    assert_eq!(sink.batches.len(), 2);
    assert_eq!(sink.ended, 2);
    let drawn: Vec<_> = sink.draws.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(drawn, vec!["wooden", "wooden", "stony"]);
    // Single-LOD meshes always draw LOD0
    assert!(sink.draws.iter().all(|(_, lod)| *lod == 0));
}

#[test]
fn should_pick_coarser_lods_further_away() {
    let mut registry = MaterialRegistry::new();
    let mut root = ParsedNode::new("root");
    root.meshes.push(0);
    let scene = ParsedScene {
        meshes: vec![grid_mesh("grid", 40)],
        materials: vec![named_material("Grass", [0.1, 0.8, 0.1])],
        root,
    };
    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();
    let set = RenderObjectSet::from_scene(&imported, "lit", MeshLayout::STANDARD);
    let (_, object) = set.iter().next().unwrap();
    let policy = LodPolicy::default();
    let lod_count = object.mesh.lod_count();
    assert!(lod_count > 1);

    let center = object.world_sphere().0;
    let near = object.select_lod(center + Vector3::new(0.0, 0.0, 5.0), &policy);
    let mid = object.select_lod(center + Vector3::new(0.0, 0.0, 30.0), &policy);
    let far = object.select_lod(center + Vector3::new(0.0, 0.0, 10_000.0), &policy);

    assert_eq!(near, 0);
    assert!(mid >= near);
    assert!(far >= mid);
    assert_eq!(far, lod_count - 1);
}

#[test]
fn should_remove_objects_by_id() {
    let mut registry = MaterialRegistry::new();
    let imported = import_in_memory(row_scene(), &ImportSettings::default(), &mut registry).unwrap();
    let mut set = RenderObjectSet::new();
    let ids = set.spawn_scene(&imported, "lit", MeshLayout::STANDARD);

    assert_eq!(ids.len(), 4);
    let removed = set.remove(ids[1]).unwrap();
    assert_eq!(removed.material, "Stone");
    assert!(set.get(ids[1]).is_none());
    assert_eq!(set.len(), 3);

    let object = set.get_mut(ids[0]).unwrap();
    object.material = "Stone".to_string();
    let batches = batch(set.iter().map(|(_, o)| o));
    assert_eq!(batches[0].material, "Stone");
    assert_eq!(batches[0].objects.len(), 2);
}
