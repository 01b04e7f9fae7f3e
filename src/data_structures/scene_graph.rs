//! Flat scene graph.
//!
//! Nodes live in one `Vec` and are addressed by [`NodeHandle`]. Node 0 is the
//! root. A node is always appended after its parent, so every parent index is
//! smaller than its children's. That ordering lets global transforms be
//! recomputed with a single forward pass and bounds aggregated with a single
//! backward pass; the graph is a tree by construction and needs no cycle checks.

use cgmath::{Matrix4, SquareMatrix};
use log::warn;
use thiserror::Error;

use crate::{data_structures::mesh::Mesh, geometry::BoundingVolume};

pub type NodeHandle = usize;

/// One drawable attached to a node: a mesh index and a material index, both
/// relative to the lists produced alongside the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshRef {
    pub mesh: usize,
    pub material: usize,
}

#[derive(Clone, Debug)]
pub struct SceneNode {
    pub parent: Option<NodeHandle>,
    pub name: String,
    pub local_transform: Matrix4<f32>,
    pub global_transform: Matrix4<f32>,
    pub meshes: Vec<MeshRef>,
    pub bounds: BoundingVolume,
    children: Vec<NodeHandle>,
}

impl SceneNode {
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneGraphError {
    #[error("the scene graph already has a root node")]
    RootAlreadyExists,
    #[error("the scene graph has no root node yet")]
    MissingRoot,
    #[error("node {0} does not exist")]
    InvalidNode(NodeHandle),
}

#[derive(Clone, Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
    dirty: bool,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Append a node. `None` creates the root and is only valid on an empty
     * graph; every other node needs an existing parent.
     */
    pub fn add_node(&mut self, parent: Option<NodeHandle>, name: impl Into<String>) -> Result<NodeHandle, SceneGraphError> {
        match parent {
            None if !self.nodes.is_empty() => return Err(SceneGraphError::RootAlreadyExists),
            Some(_) if self.nodes.is_empty() => return Err(SceneGraphError::MissingRoot),
            Some(p) if p >= self.nodes.len() => return Err(SceneGraphError::InvalidNode(p)),
            _ => (),
        }
        let handle = self.nodes.len();
        let parent_global = parent.map_or(Matrix4::identity(), |p| self.nodes[p].global_transform);
        self.nodes.push(SceneNode {
            parent,
            name: name.into(),
            local_transform: Matrix4::identity(),
            global_transform: parent_global,
            meshes: Vec::new(),
            bounds: BoundingVolume::empty(),
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(handle);
        }
        Ok(handle)
    }

    /// Replace a node's local transform. Globals are refreshed by
    /// [`recalculate_global_transforms`](Self::recalculate_global_transforms).
    pub fn set_local_transform(&mut self, node: NodeHandle, transform: Matrix4<f32>) -> Result<(), SceneGraphError> {
        self.node_mut(node)?.local_transform = transform;
        self.dirty = true;
        Ok(())
    }

    pub fn set_node_bounding_volumes(&mut self, node: NodeHandle, bounds: BoundingVolume) -> Result<(), SceneGraphError> {
        self.node_mut(node)?.bounds = bounds;
        Ok(())
    }

    pub fn add_mesh_reference(&mut self, node: NodeHandle, mesh: usize, material: usize) -> Result<(), SceneGraphError> {
        self.node_mut(node)?.meshes.push(MeshRef { mesh, material });
        Ok(())
    }

    /// `global[n] = global[parent[n]] * local[n]`, one forward pass.
    pub fn recalculate_global_transforms(&mut self) {
        for i in 0..self.nodes.len() {
            let parent_global = match self.nodes[i].parent {
                Some(p) => self.nodes[p].global_transform,
                None => Matrix4::identity(),
            };
            self.nodes[i].global_transform = parent_global * self.nodes[i].local_transform;
        }
        self.dirty = false;
    }

    /// Whether a local transform changed since the last recalculation.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /**
     * Recompute every node's bounds bottom-up: the union of its meshes' bounds
     * and its children's bounds, all expressed in the node's local space.
     * Mesh references pointing outside `meshes` are skipped.
     */
    pub fn recalculate_bounds<M: AsRef<Mesh>>(&mut self, meshes: &[M]) {
        for i in (0..self.nodes.len()).rev() {
            let mut bounds = BoundingVolume::empty();
            for mesh_ref in &self.nodes[i].meshes {
                match meshes.get(mesh_ref.mesh) {
                    Some(mesh) => bounds = bounds.union(mesh.as_ref().bounds()),
                    None => warn!("node {} references missing mesh {}", i, mesh_ref.mesh),
                }
            }
            for &child in &self.nodes[i].children {
                let child_node = &self.nodes[child];
                bounds = bounds.union(&child_node.bounds.transformed(&child_node.local_transform));
            }
            self.nodes[i].bounds = bounds;
        }
    }

    pub fn root(&self) -> Option<NodeHandle> {
        if self.nodes.is_empty() { None } else { Some(0) }
    }

    pub fn node(&self, node: NodeHandle) -> Option<&SceneNode> {
        self.nodes.get(node)
    }

    fn node_mut(&mut self, node: NodeHandle) -> Result<&mut SceneNode, SceneGraphError> {
        self.nodes.get_mut(node).ok_or(SceneGraphError::InvalidNode(node))
    }

    pub fn parent(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeHandle) -> &[NodeHandle] {
        self.nodes.get(node).map_or(&[], |n| &n.children)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in storage order, which is also a valid parent-before-child order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &SceneNode)> {
        self.nodes.iter().enumerate()
    }

    /// Depth-first pre-order walk from the root, children in insertion order.
    pub fn depth_first(&self) -> Vec<NodeHandle> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeHandle> = self.root().into_iter().collect();
        while let Some(n) = stack.pop() {
            order.push(n);
            stack.extend(self.nodes[n].children.iter().rev());
        }
        order
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeHandle> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// The node's bounds in world space.
    pub fn world_bounds(&self, node: NodeHandle) -> Option<BoundingVolume> {
        self.nodes.get(node).map(|n| n.bounds.transformed(&n.global_transform))
    }

    /// Every mesh reference with the global transform of the node holding it.
    pub fn drawables(&self) -> impl Iterator<Item = (NodeHandle, MeshRef, Matrix4<f32>)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .flat_map(|(i, n)| n.meshes.iter().map(move |m| (i, *m, n.global_transform)))
    }
}
