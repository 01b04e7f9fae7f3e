use cgmath::{InnerSpace, Vector2, Vector3, Zero};
use log::{debug, warn};

use crate::resources::parsed::{ParseFlags, ParsedMaterial, ParsedMesh, ParsedScene};

/// Run the post-processing steps `flags` asks for.
pub fn apply(scene: &mut ParsedScene, flags: ParseFlags) {
    for mesh in scene.meshes.iter_mut() {
        if flags.triangulate {
            triangulate(mesh);
        }
        if flags.generate_normals && mesh.normals.is_none() {
            generate_normals(mesh);
        }
        if flags.calc_tangent_space && mesh.tangents.is_none() {
            generate_tangents(mesh);
        }
    }
    if flags.remove_redundant_materials {
        remove_redundant_materials(scene);
    }
}

/**
 * Fan-triangulate polygons. Points and lines cannot be triangulated and are
 * dropped; so are faces referencing vertices the mesh does not have.
 */
pub fn triangulate(mesh: &mut ParsedMesh) {
    let vertex_count = mesh.positions.len() as u32;
    let mut dropped = 0usize;
    let mut faces = Vec::with_capacity(mesh.faces.len());
    for face in mesh.faces.drain(..) {
        if face.len() < 3 || face.iter().any(|&i| i >= vertex_count) {
            dropped += 1;
            continue;
        }
        for k in 1..face.len() - 1 {
            faces.push(vec![face[0], face[k], face[k + 1]]);
        }
    }
    if dropped > 0 {
        warn!("Mesh {:?}: dropped {} faces that are not polygons", mesh.name, dropped);
    }
    mesh.faces = faces;
}

/**
 * Point mesh material indices at the first material with identical
 * properties. Names are ignored when comparing. The material list itself is
 * left untouched so indices stay valid.
 */
pub fn remove_redundant_materials(scene: &mut ParsedScene) {
    let mut canonical: Vec<usize> = Vec::with_capacity(scene.materials.len());
    for (i, material) in scene.materials.iter().enumerate() {
        let first = scene.materials[..i]
            .iter()
            .position(|m| same_properties(m, material))
            .map_or(i, |j| canonical[j]);
        canonical.push(first);
    }
    let mut merged = 0usize;
    for mesh in scene.meshes.iter_mut() {
        if let Some(idx) = mesh.material_index {
            if let Some(&target) = canonical.get(idx) {
                if target != idx {
                    merged += 1;
                }
                mesh.material_index = Some(target);
            }
        }
    }
    if merged > 0 {
        debug!("Remapped {} mesh material references to identical materials", merged);
    }
}

fn same_properties(a: &ParsedMaterial, b: &ParsedMaterial) -> bool {
    a.ambient == b.ambient
        && a.diffuse == b.diffuse
        && a.specular == b.specular
        && a.emissive == b.emissive
        && a.shininess == b.shininess
        && a.opacity == b.opacity
        && a.textures == b.textures
}

fn smooth_normals(positions: &[[f32; 3]], faces: &[Vec<u32>]) -> Vec<Vector3<f32>> {
    let mut normals = vec![Vector3::zero(); positions.len()];
    for face in faces.iter().filter(|f| f.len() == 3) {
        let [a, b, c] = [face[0] as usize, face[1] as usize, face[2] as usize];
        if a.max(b).max(c) >= positions.len() {
            continue;
        }
        let pa = Vector3::from(positions[a]);
        // Unnormalized cross product: its length is twice the triangle area
        let n = (Vector3::from(positions[b]) - pa).cross(Vector3::from(positions[c]) - pa);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals
        .into_iter()
        .map(|n| if n.magnitude2() > 0.0 { n.normalize() } else { Vector3::unit_y() })
        .collect()
}

/// Area-weighted smooth vertex normals.
pub fn generate_normals(mesh: &mut ParsedMesh) {
    let normals = smooth_normals(&mesh.positions, &mesh.faces);
    mesh.normals = Some(normals.into_iter().map(Into::into).collect());
}

/**
 * Tangents and bitangents from UV derivatives, averaged per vertex.
 *
 * Vertices without a usable UV gradient (no UVs, or degenerate UV triangles)
 * get an arbitrary orthonormal basis around their normal.
 */
pub fn generate_tangents(mesh: &mut ParsedMesh) {
    let vertex_count = mesh.positions.len();
    let normals: Vec<Vector3<f32>> = match &mesh.normals {
        Some(n) if n.len() == vertex_count => n.iter().map(|&v| Vector3::from(v)).collect(),
        _ => smooth_normals(&mesh.positions, &mesh.faces),
    };
    let mut tangents = vec![Vector3::zero(); vertex_count];
    let mut bitangents = vec![Vector3::zero(); vertex_count];

    if let Some(uvs) = mesh.uv0.as_ref().filter(|uvs| uvs.len() == vertex_count) {
        for face in mesh.faces.iter().filter(|f| f.len() == 3) {
            let c = [face[0] as usize, face[1] as usize, face[2] as usize];
            if c.iter().any(|&i| i >= vertex_count) {
                continue;
            }
            let pos0 = Vector3::from(mesh.positions[c[0]]);
            let pos1 = Vector3::from(mesh.positions[c[1]]);
            let pos2 = Vector3::from(mesh.positions[c[2]]);
            let uv0 = Vector2::from(uvs[c[0]]);
            let uv1 = Vector2::from(uvs[c[1]]);
            let uv2 = Vector2::from(uvs[c[2]]);

            // Calculate the edges of the triangle
            let delta_pos1 = pos1 - pos0;
            let delta_pos2 = pos2 - pos0;
            // This will give us a direction to calculate the
            // tangent and bitangent
            let delta_uv1 = uv1 - uv0;
            let delta_uv2 = uv2 - uv0;

            let det = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
            if det.abs() < f32::EPSILON {
                continue;
            }
            let r = 1.0 / det;
            let tangent = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
            // We flip the bitangent to enable right-handed normal
            // maps with wgpu texture coordinate system
            let bitangent = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * -r;
            for &i in &c {
                tangents[i] += tangent;
                bitangents[i] += bitangent;
            }
        }
    }

    for i in 0..vertex_count {
        let n = normals[i];
        // Gram-Schmidt against the normal keeps the basis orthogonal
        let t = tangents[i] - n * n.dot(tangents[i]);
        if t.magnitude2() > 1e-12 {
            tangents[i] = t.normalize();
            let b = bitangents[i];
            bitangents[i] = if b.magnitude2() > 1e-12 { b.normalize() } else { n.cross(tangents[i]) };
        } else {
            let (t, b) = basis_from_normal(n);
            tangents[i] = t;
            bitangents[i] = b;
        }
    }
    mesh.tangents = Some(tangents.into_iter().map(Into::into).collect());
    mesh.bitangents = Some(bitangents.into_iter().map(Into::into).collect());
}

fn basis_from_normal(n: Vector3<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let helper = if n.x.abs() < 0.9 { Vector3::unit_x() } else { Vector3::unit_y() };
    let t = (helper - n * n.dot(helper)).normalize();
    (t, n.cross(t))
}
