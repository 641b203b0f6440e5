//! Scene graph and resource pools.
//!
//! A [`Scene`] is the explicit context every pipeline stage works on: an
//! ordered set of objects (meshes, armatures, cameras, lights, empties) with
//! parent relations, plus pools for the meshes, materials and images those
//! objects reference. Handles are allocated monotonically, so iterating a pool
//! or the object list always yields creation order.

use std::collections::{BTreeMap, HashSet};

use cgmath::{Matrix4, SquareMatrix, Vector3};
use log::{debug, warn};

use crate::data_structures::{
    instance::{invert_or_identity, translation_of},
    material::Material,
    texture::Image,
};

macro_rules! handle {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

handle!(ObjectId);
handle!(MeshId);
handle!(MaterialId);
handle!(ImageId);

/// Insertion-ordered storage with monotonically allocated handles.
#[derive(Debug)]
pub struct Pool<K, T> {
    next: u32,
    items: BTreeMap<K, T>,
}

impl<K: Ord + Copy + From<u32>, T> Pool<K, T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            items: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, item: T) -> K {
        let key = K::from(self.next);
        self.next += 1;
        self.items.insert(key, item);
        key
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.items.get(&key)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.items.get_mut(&key)
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        self.items.remove(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.items.iter().map(|(k, v)| (*k, v))
    }

    pub fn keys(&self) -> Vec<K> {
        self.items.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops every entry whose key is not in `used`, returning how many went.
    fn retain_used(&mut self, used: &HashSet<K>) -> usize
    where
        K: std::hash::Hash,
    {
        let before = self.items.len();
        self.items.retain(|key, _| used.contains(key));
        before - self.items.len()
    }
}

impl<K: Ord + Copy + From<u32>, T> Default for Pool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One bone of an armature; `parent` indexes into the same bone list.
#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub local: Matrix4<f32>,
}

/// Armature-space rest matrix of every bone, in bone order.
pub fn bone_globals(bones: &[Bone]) -> Vec<Matrix4<f32>> {
    (0..bones.len())
        .map(|idx| {
            let mut global = bones[idx].local;
            let mut parent = bones[idx].parent;
            // bounded walk, a malformed parent cycle stops after one lap
            for _ in 0..bones.len() {
                let Some(bone) = parent.and_then(|p| bones.get(p)) else {
                    break;
                };
                global = bone.local * global;
                parent = bone.parent;
            }
            global
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct Primitive {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub tex_coords: Option<Vec<[f32; 2]>>,
    pub joints: Option<Vec<[u16; 4]>>,
    pub weights: Option<Vec<[f32; 4]>>,
    pub indices: Option<Vec<u32>>,
    pub material: Option<MaterialId>,
}

impl Primitive {
    pub fn from_positions(positions: Vec<[f32; 3]>, material: Option<MaterialId>) -> Self {
        Self {
            positions,
            normals: None,
            tex_coords: None,
            joints: None,
            weights: None,
            indices: None,
            material,
        }
    }
}

/// Mesh data; `joint_names` names the bones that `joints` indices refer to.
#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,
    pub primitives: Vec<Primitive>,
    pub joint_names: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum ObjectKind {
    Mesh(MeshId),
    Armature(Vec<Bone>),
    Camera,
    Light,
    Empty,
}

impl ObjectKind {
    pub fn is_mesh(&self) -> bool {
        matches!(self, ObjectKind::Mesh(_))
    }

    pub fn is_armature(&self) -> bool {
        matches!(self, ObjectKind::Armature(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentKind {
    Object,
    /// Armature deform: the child's vertices follow the parent's bones.
    Deform,
}

#[derive(Clone, Debug)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
    pub parent: Option<(ObjectId, ParentKind)>,
    pub basis: Matrix4<f32>,
    pub parent_inverse: Matrix4<f32>,
    /// Category slot this object was assembled for, if any.
    pub category: Option<String>,
}

impl SceneObject {
    pub fn new(name: &str, kind: ObjectKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parent: None,
            basis: Matrix4::identity(),
            parent_inverse: Matrix4::identity(),
            category: None,
        }
    }

    pub fn with_basis(mut self, basis: Matrix4<f32>) -> Self {
        self.basis = basis;
        self
    }

    pub fn parent_id(&self) -> Option<ObjectId> {
        self.parent.map(|(id, _)| id)
    }

    pub fn mesh(&self) -> Option<MeshId> {
        match self.kind {
            ObjectKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

/// Resources dropped by [`Scene::purge_unused`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub meshes: usize,
    pub materials: usize,
    pub images: usize,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.meshes + self.materials + self.images
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    objects: Pool<ObjectId, SceneObject>,
    pub meshes: Pool<MeshId, MeshData>,
    pub materials: Pool<MaterialId, Material>,
    pub images: Pool<ImageId, Image>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object, suffixing its name (`.001`, `.002`, ...) when taken.
    pub fn add_object(&mut self, mut object: SceneObject) -> ObjectId {
        object.name = self.unique_name(&object.name, None);
        self.objects.insert(object)
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.get_mut(id)
    }

    /// Objects in enumeration (creation) order.
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &SceneObject)> {
        self.objects.iter()
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        self.objects
            .iter()
            .find(|(_, obj)| obj.name == name)
            .map(|(id, _)| id)
    }

    pub fn armatures(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, obj)| obj.kind.is_armature())
            .map(|(id, _)| id)
            .collect()
    }

    /// Renames an object and returns the name it actually got.
    pub fn rename(&mut self, id: ObjectId, name: &str) -> Option<String> {
        let unique = self.unique_name(name, Some(id));
        let object = self.objects.get_mut(id)?;
        object.name = unique.clone();
        Some(unique)
    }

    fn unique_name(&self, name: &str, exclude: Option<ObjectId>) -> String {
        let taken = |candidate: &str| {
            self.objects
                .iter()
                .any(|(id, obj)| Some(id) != exclude && obj.name == candidate)
        };
        if !taken(name) {
            return name.to_string();
        }
        (1u32..)
            .map(|n| format!("{name}.{n:03}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| name.to_string())
    }

    /// Removes an object. Children are re-rooted keeping their world transform.
    pub fn remove_object(&mut self, id: ObjectId) -> Option<SceneObject> {
        let children: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, obj)| obj.parent_id() == Some(id))
            .map(|(child, _)| child)
            .collect();
        for child in children {
            self.clear_parent_keep_transform(child);
        }
        self.objects.remove(id)
    }

    pub fn world_matrix(&self, id: ObjectId) -> Matrix4<f32> {
        let Some(object) = self.objects.get(id) else {
            return Matrix4::identity();
        };
        match object.parent_id() {
            Some(parent) => self.world_matrix(parent) * object.parent_inverse * object.basis,
            None => object.basis,
        }
    }

    pub fn world_location(&self, id: ObjectId) -> Vector3<f32> {
        translation_of(&self.world_matrix(id))
    }

    /// Moves an object along its local basis.
    pub fn translate(&mut self, id: ObjectId, offset: Vector3<f32>) {
        if let Some(object) = self.objects.get_mut(id) {
            object.basis = Matrix4::from_translation(offset) * object.basis;
        }
    }

    /// Detaches an object from its parent; its world transform is baked into its basis.
    pub fn clear_parent_keep_transform(&mut self, id: ObjectId) {
        let world = self.world_matrix(id);
        if let Some(object) = self.objects.get_mut(id) {
            object.parent = None;
            object.basis = world;
            object.parent_inverse = Matrix4::identity();
        }
    }

    /// Parents `child` under `parent` without moving it in world space.
    pub fn set_parent_keep_transform(&mut self, child: ObjectId, parent: ObjectId, kind: ParentKind) {
        if child == parent || self.is_ancestor(child, parent) {
            warn!("Refusing to create a parent cycle between objects {child:?} and {parent:?}");
            return;
        }
        let child_world = self.world_matrix(child);
        let parent_inverse = invert_or_identity(&self.world_matrix(parent));
        if let Some(object) = self.objects.get_mut(child) {
            object.parent = Some((parent, kind));
            object.basis = child_world;
            object.parent_inverse = parent_inverse;
        }
    }

    /// True when `ancestor` appears on `id`'s parent chain.
    fn is_ancestor(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        let mut current = self.objects.get(id).and_then(SceneObject::parent_id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.objects.get(parent).and_then(SceneObject::parent_id);
        }
        false
    }

    /// Deform-parents every object in `objects` under `skeleton`, keeping world transforms.
    pub fn parent_under_skeleton(&mut self, objects: &[ObjectId], skeleton: ObjectId) {
        for &object in objects {
            if object != skeleton {
                self.set_parent_keep_transform(object, skeleton, ParentKind::Deform);
            }
        }
    }

    /// Material in the first slot of an object's mesh.
    pub fn active_material(&self, id: ObjectId) -> Option<MaterialId> {
        let mesh = self.objects.get(id)?.mesh()?;
        self.meshes
            .get(mesh)?
            .primitives
            .iter()
            .find_map(|primitive| primitive.material)
    }

    /// Removes every object except cameras and lights.
    pub fn clear(&mut self) -> usize {
        let doomed: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, obj)| !matches!(obj.kind, ObjectKind::Camera | ObjectKind::Light))
            .map(|(id, _)| id)
            .collect();
        for &id in &doomed {
            self.objects.remove(id);
        }
        // survivors may have pointed at removed objects
        let survivors = self.objects.keys();
        for id in survivors {
            let orphaned = self
                .objects
                .get(id)
                .and_then(SceneObject::parent_id)
                .is_some_and(|parent| self.objects.get(parent).is_none());
            if orphaned {
                if let Some(object) = self.objects.get_mut(id) {
                    object.parent = None;
                    object.parent_inverse = Matrix4::identity();
                }
            }
        }
        debug!("Cleared {} objects from the scene", doomed.len());
        doomed.len()
    }

    /// Drops meshes, materials and images nothing references any more.
    pub fn purge_unused(&mut self) -> PurgeReport {
        let used_meshes: HashSet<MeshId> = self
            .objects
            .iter()
            .filter_map(|(_, obj)| obj.mesh())
            .collect();
        let meshes = self.meshes.retain_used(&used_meshes);

        let used_materials: HashSet<MaterialId> = self
            .meshes
            .iter()
            .flat_map(|(_, mesh)| mesh.primitives.iter().filter_map(|p| p.material))
            .collect();
        let materials = self.materials.retain_used(&used_materials);

        let used_images: HashSet<ImageId> = self
            .materials
            .iter()
            .flat_map(|(_, material)| material.graph.images().collect::<Vec<_>>())
            .collect();
        let images = self.images.retain_used(&used_images);

        PurgeReport {
            meshes,
            materials,
            images,
        }
    }

    /// Full reset between characters: clear, then purge what the clear orphaned.
    pub fn reset(&mut self) -> PurgeReport {
        self.clear();
        self.purge_unused()
    }
}
