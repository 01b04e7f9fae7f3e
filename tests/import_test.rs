use strata_ngin::{
    Matrix4, SquareMatrix, Vector3,
    data_structures::{
        material::{MaterialParam, MaterialRegistry},
        mesh::MeshLayout,
    },
    resources::{
        ImportSettings,
        importer::ImportError,
        parsed::{ParsedMaterial, ParsedNode, ParsedScene},
    },
};

use crate::common::test_utils::{
    assert_matrix_near, assert_vec3_near, flat_scene, grid_mesh, import_in_memory, named_material, translation,
    triangle_mesh,
};

mod common;

#[test]
fn should_import_single_triangle() {
    let mut registry = MaterialRegistry::new();
    let settings = ImportSettings::default().with_mesh_layout(MeshLayout::POSITIONS_ONLY);
    let scene = flat_scene(vec![triangle_mesh("tri", Some(0))], vec![named_material("Red", [1.0, 0.0, 0.0])]);

    let imported = import_in_memory(scene, &settings, &mut registry).unwrap();

    assert_eq!(imported.meshes.len(), 1);
    let mesh = &imported.meshes[0];
    assert_eq!(mesh.name, "tri");
    assert_eq!(mesh.vertex_count(), 3);
    assert!(mesh.normals().is_empty());
    assert!(mesh.uv_channels().is_empty());
    assert_eq!(mesh.indices(), &[0, 1, 2]);
    assert_eq!(mesh.lod_count(), 1);
    assert_eq!(mesh.lods()[0].index_offset, 0);
    assert_eq!(mesh.lods()[0].index_count, 3);
    assert_vec3_near(mesh.min_bounds(), Vector3::new(0.0, 0.0, 0.0));
    assert_vec3_near(mesh.max_bounds(), Vector3::new(1.0, 1.0, 0.0));

    assert_eq!(imported.materials, vec!["Red".to_string()]);
    let red = registry.get_by_name("Red").unwrap();
    assert_eq!(red.color(MaterialParam::Diffuse), Some(Vector3::new(1.0, 0.0, 0.0)));
    // Parameters the source leaves out get their defaults
    assert_eq!(red.float(MaterialParam::Shininess), Some(32.0));

    let root = imported.graph.root().unwrap();
    assert_eq!(imported.graph.len(), 1);
    let node = imported.graph.node(root).unwrap();
    assert_eq!(node.meshes.len(), 1);
    assert_eq!(node.meshes[0].mesh, 0);
    assert_eq!(node.meshes[0].material, 0);
}

#[test]
fn should_generate_normals_for_standard_layout() {
    let mut registry = MaterialRegistry::new();
    let scene = flat_scene(vec![triangle_mesh("tri", Some(0))], vec![named_material("Red", [1.0, 0.0, 0.0])]);

    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();

    let mesh = &imported.meshes[0];
    assert_eq!(mesh.normals().len(), 3);
    for normal in mesh.normals() {
        assert_vec3_near(*normal, Vector3::new(0.0, 0.0, 1.0));
    }
    assert_eq!(mesh.tangents().len(), 3);
    assert_eq!(mesh.bitangents().len(), 3);
}

#[test]
fn should_assign_one_fallback_for_invalid_material_references() {
    let mut registry = MaterialRegistry::new();
    let scene = flat_scene(
        vec![triangle_mesh("out_of_range", Some(3)), triangle_mesh("missing", None)],
        vec![named_material("Wood", [0.5, 0.3, 0.1])],
    );

    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();

    assert_eq!(imported.materials.len(), 2);
    assert_eq!(imported.materials[0], "Wood");
    let fallback_name = &imported.materials[1];
    assert!(fallback_name.starts_with("FallbackMaterial"));
    assert_eq!(registry.len(), 2);

    let root = imported.graph.root().unwrap();
    let refs = &imported.graph.node(root).unwrap().meshes;
    assert!(refs.iter().all(|r| r.material == 1));

    let fallback = registry.get_by_name(fallback_name).unwrap();
    assert_eq!(fallback.color(MaterialParam::Ambient), Some(Vector3::new(0.2, 0.2, 0.2)));
    assert_eq!(fallback.color(MaterialParam::Diffuse), Some(Vector3::new(0.6, 0.6, 0.6)));
    assert_eq!(fallback.color(MaterialParam::Specular), Some(Vector3::new(0.5, 0.5, 0.5)));
    assert_eq!(fallback.float(MaterialParam::Shininess), Some(32.0));
}

#[test]
fn should_not_create_fallback_when_all_references_are_valid() {
    let mut registry = MaterialRegistry::new();
    let scene = flat_scene(vec![triangle_mesh("tri", Some(0))], vec![named_material("Wood", [0.5, 0.3, 0.1])]);

    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();

    assert_eq!(imported.materials, vec!["Wood".to_string()]);
    assert!(registry.names().all(|n| !n.starts_with("FallbackMaterial")));
}

#[test]
fn should_dedup_material_names_and_reuse_them_across_imports() {
    let mut registry = MaterialRegistry::new();
    let scene = || {
        flat_scene(
            vec![triangle_mesh("a", Some(0)), triangle_mesh("b", Some(1)), triangle_mesh("c", Some(2))],
            vec![
                named_material("Wood", [0.5, 0.3, 0.1]),
                named_material("Wood", [0.4, 0.2, 0.1]),
                ParsedMaterial {
                    diffuse: Some([0.1, 0.1, 0.1]),
                    ..Default::default()
                },
            ],
        )
    };

    let first = import_in_memory(scene(), &ImportSettings::default(), &mut registry).unwrap();
    assert_eq!(first.materials, vec!["Wood", "Wood_1", "UnnamedMaterial"]);
    assert_eq!(registry.len(), 3);
    let wood = registry.get_by_name("Wood").unwrap();
    let wood_1 = registry.get_by_name("Wood_1").unwrap();
    assert_eq!(wood.color(MaterialParam::Diffuse), Some(Vector3::new(0.5, 0.3, 0.1)));
    assert_eq!(wood_1.color(MaterialParam::Diffuse), Some(Vector3::new(0.4, 0.2, 0.1)));

    // Named materials are reused, the unnamed one is not
    let second = import_in_memory(scene(), &ImportSettings::default(), &mut registry).unwrap();
    assert_eq!(second.materials, vec!["Wood", "Wood_1", "UnnamedMaterial_1"]);
    assert_eq!(registry.len(), 4);
}

#[test]
fn should_keep_unnamed_materials_of_different_imports_apart() {
    let mut registry = MaterialRegistry::new();
    let unnamed = |diffuse: [f32; 3]| {
        flat_scene(
            vec![triangle_mesh("t", Some(0))],
            vec![ParsedMaterial {
                diffuse: Some(diffuse),
                ..Default::default()
            }],
        )
    };

    let red = import_in_memory(unnamed([1.0, 0.0, 0.0]), &ImportSettings::default(), &mut registry).unwrap();
    let blue = import_in_memory(unnamed([0.0, 0.0, 1.0]), &ImportSettings::default(), &mut registry).unwrap();

    assert_eq!(red.materials, vec!["UnnamedMaterial"]);
    assert_eq!(blue.materials, vec!["UnnamedMaterial_1"]);
    assert_eq!(registry.len(), 2);
    let red = registry.get_by_name("UnnamedMaterial").unwrap();
    let blue = registry.get_by_name("UnnamedMaterial_1").unwrap();
    assert_eq!(red.color(MaterialParam::Diffuse), Some(Vector3::new(1.0, 0.0, 0.0)));
    assert_eq!(blue.color(MaterialParam::Diffuse), Some(Vector3::new(0.0, 0.0, 1.0)));
}

#[test]
fn should_share_meshes_referenced_by_several_nodes() {
    let mut registry = MaterialRegistry::new();
    let mut root = ParsedNode::new("root");
    for (i, x) in [0.0, 5.0].into_iter().enumerate() {
        let mut child = ParsedNode::new(format!("copy_{}", i));
        child.transform = translation(x, 0.0, 0.0);
        child.meshes.push(0);
        root.children.push(child);
    }
    let scene = ParsedScene {
        meshes: vec![triangle_mesh("tri", Some(0))],
        materials: vec![named_material("Red", [1.0, 0.0, 0.0])],
        root,
    };

    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();

    assert_eq!(imported.meshes.len(), 1);
    assert_eq!(imported.graph.drawables().count(), 2);
    assert!(imported.graph.drawables().all(|(_, r, _)| r.mesh == 0));
}

#[test]
fn should_compose_global_transforms_from_parents() {
    let mut registry = MaterialRegistry::new();
    let mut leaf = ParsedNode::new("leaf");
    leaf.transform = translation(1.0, 0.0, 0.0);
    leaf.meshes.push(0);
    let mut scaled = ParsedNode::new("scaled");
    scaled.transform = [[2.0, 0.0, 0.0, 0.0], [0.0, 2.0, 0.0, 0.0], [0.0, 0.0, 2.0, 0.0]];
    scaled.children.push(leaf);
    let mut root = ParsedNode::new("root");
    root.transform = translation(1.0, 2.0, 3.0);
    root.children.push(scaled);
    let scene = ParsedScene {
        meshes: vec![triangle_mesh("tri", Some(0))],
        materials: vec![named_material("Red", [1.0, 0.0, 0.0])],
        root,
    };

    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();
    let graph = &imported.graph;

    assert_eq!(graph.len(), 3);
    for (handle, node) in graph.iter() {
        let parent_global = node
            .parent
            .map(|p| graph.node(p).unwrap().global_transform)
            .unwrap_or_else(Matrix4::identity);
        assert_matrix_near(node.global_transform, parent_global * node.local_transform);
        if let Some(parent) = node.parent {
            assert!(graph.children(parent).contains(&handle));
        }
    }

    let leaf = graph.node(graph.find_by_name("leaf").unwrap()).unwrap();
    assert_vec3_near(leaf.global_transform.w.truncate(), Vector3::new(3.0, 2.0, 3.0));

    // Root bounds contain the leaf triangle: scaled by 2 and moved
    let root_bounds = graph.world_bounds(graph.root().unwrap()).unwrap();
    assert_vec3_near(root_bounds.min, Vector3::new(3.0, 2.0, 3.0));
    assert_vec3_near(root_bounds.max, Vector3::new(5.0, 4.0, 3.0));
}

#[test]
fn should_keep_children_in_source_order() {
    let mut registry = MaterialRegistry::new();
    let mut root = ParsedNode::new("root");
    root.meshes.push(0);
    for name in ["first", "second", "third"] {
        root.children.push(ParsedNode::new(name));
    }
    let scene = ParsedScene {
        meshes: vec![triangle_mesh("tri", Some(0))],
        materials: vec![named_material("Red", [1.0, 0.0, 0.0])],
        root,
    };

    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();
    let graph = &imported.graph;

    let names: Vec<_> = graph
        .depth_first()
        .into_iter()
        .map(|h| graph.node(h).unwrap().name.clone())
        .collect();
    assert_eq!(names, vec!["root", "first", "second", "third"]);
}

#[test]
fn should_center_scene_on_origin() {
    let mut registry = MaterialRegistry::new();
    let mut root = ParsedNode::new("root");
    for (name, x) in [("near", 10.0), ("far", 20.0)] {
        let mut child = ParsedNode::new(name);
        child.transform = translation(x, 0.0, 0.0);
        child.meshes.push(0);
        root.children.push(child);
    }
    let scene = ParsedScene {
        meshes: vec![triangle_mesh("tri", Some(0))],
        materials: vec![named_material("Red", [1.0, 0.0, 0.0])],
        root,
    };

    let settings = ImportSettings::default().with_center_scene(true);
    let imported = import_in_memory(scene, &settings, &mut registry).unwrap();

    assert_vec3_near(imported.world_bounds().center, Vector3::new(0.0, 0.0, 0.0));
    let graph = &imported.graph;
    let near = graph.node(graph.find_by_name("near").unwrap()).unwrap();
    let far = graph.node(graph.find_by_name("far").unwrap()).unwrap();
    // Only the root moved; the children keep their relative placement
    assert_vec3_near(near.local_transform.w.truncate(), Vector3::new(10.0, 0.0, 0.0));
    assert_vec3_near(
        far.global_transform.w.truncate() - near.global_transform.w.truncate(),
        Vector3::new(10.0, 0.0, 0.0),
    );
}

#[test]
fn should_build_shrinking_lod_chain_for_large_mesh() {
    let mut registry = MaterialRegistry::new();
    let scene = flat_scene(vec![grid_mesh("grid", 40)], vec![named_material("Grass", [0.1, 0.8, 0.1])]);

    let imported = import_in_memory(scene, &ImportSettings::default(), &mut registry).unwrap();
    let mesh = &imported.meshes[0];

    // Quads are triangulated before LOD generation
    assert_eq!(mesh.triangle_count(0), 40 * 40 * 2);
    assert!(mesh.lod_count() > 1);
    let mut expected_offset = 0;
    for level in 0..mesh.lod_count() {
        let lod = mesh.lods()[level];
        assert_eq!(lod.index_offset, expected_offset);
        assert_eq!(lod.index_count % 3, 0);
        expected_offset += lod.index_count;
        if level > 0 {
            assert!(mesh.triangle_count(level) <= mesh.triangle_count(level - 1));
        }
        let indices = mesh.lod_indices(level).unwrap();
        assert!(indices.iter().all(|&i| (i as usize) < mesh.vertex_count()));
    }
    assert_eq!(expected_offset as usize, mesh.indices().len());
}

#[test]
fn should_fail_on_scene_without_meshes() {
    let mut registry = MaterialRegistry::new();
    let scene = ParsedScene {
        root: ParsedNode::new("empty"),
        ..Default::default()
    };

    let result = import_in_memory(scene, &ImportSettings::default(), &mut registry);

    assert!(matches!(result, Err(ImportError::ParseFailed { .. })));
    assert!(registry.is_empty());
}
