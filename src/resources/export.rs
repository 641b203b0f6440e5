//! Binary glTF writer.
//!
//! Serialises a selection of scene objects into a single `.glb`. The output is a
//! pure function of the scene: JSON keys are sorted, images are PNG encoded and
//! every list follows the scene's enumeration order, so exporting the same scene
//! twice yields identical bytes.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    path::Path,
};

use anyhow::Context;
use cgmath::{InnerSpace, Matrix, Matrix3, Matrix4, Point3, SquareMatrix, Transform, Vector3};
use image::RgbaImage;
use serde_json::{Value, json};

use crate::data_structures::{
    instance::invert_or_identity,
    material::{NodeGraph, NodeKind, ShaderNode, socket},
    scene_graph::{ImageId, MaterialId, MeshId, ObjectId, ObjectKind, ParentKind, Scene, bone_globals},
    texture::blend,
};

const FLOAT: u32 = 5126;
const UNSIGNED_SHORT: u32 = 5123;
const UNSIGNED_INT: u32 = 5125;
const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MAX_GRAPH_DEPTH: usize = 16;

/// Writes `objects` to `path`, replacing any existing file.
pub async fn export_glb(scene: &Scene, objects: &[ObjectId], path: &Path) -> anyhow::Result<()> {
    let bytes = encode_glb(scene, objects)?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Could not create {}", dir.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Could not write {}", path.display()))?;
    Ok(())
}

/// Encodes `objects` as a binary glTF document.
pub fn encode_glb(scene: &Scene, objects: &[ObjectId]) -> anyhow::Result<Vec<u8>> {
    let mut writer = GlbWriter::default();
    writer.write_scene(scene, objects)?;
    writer.finish()
}

/// A colour source resolved from a material graph.
enum ColorSource {
    Image(ImageId),
    Baked(RgbaImage),
}

#[derive(Default)]
struct GlbWriter {
    bin: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
    nodes: Vec<Value>,
    meshes: Vec<Value>,
    materials: Vec<Value>,
    textures: Vec<Value>,
    images: Vec<Value>,
    skins: Vec<Value>,
    roots: Vec<usize>,
    material_index: HashMap<MaterialId, usize>,
    texture_index: HashMap<ImageId, usize>,
    /// skinned meshes are keyed by their object, their vertices are baked per object
    mesh_index: HashMap<(MeshId, Option<ObjectId>), usize>,
    /// armature object -> (skin index, armature name, bone names)
    armature_skin: HashMap<ObjectId, (usize, String, Vec<String>)>,
}

impl GlbWriter {
    fn write_scene(&mut self, scene: &Scene, objects: &[ObjectId]) -> anyhow::Result<()> {
        let selected: HashSet<ObjectId> = objects
            .iter()
            .copied()
            .filter(|id| scene.object(*id).is_some())
            .collect();
        let ordered: Vec<ObjectId> = scene
            .objects()
            .map(|(id, _)| id)
            .filter(|id| selected.contains(id))
            .collect();

        let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
        let mut roots = Vec::new();
        for &id in &ordered {
            match scene.object(id).and_then(|o| o.parent_id()) {
                Some(parent) if selected.contains(&parent) => {
                    children.entry(parent).or_default().push(id)
                }
                _ => roots.push(id),
            }
        }
        for root in roots {
            let node = self.write_object(scene, root, None, &children)?;
            self.roots.push(node);
        }
        Ok(())
    }

    fn write_object(
        &mut self,
        scene: &Scene,
        id: ObjectId,
        parent: Option<ObjectId>,
        children: &HashMap<ObjectId, Vec<ObjectId>>,
    ) -> anyhow::Result<usize> {
        let Some(object) = scene.object(id) else {
            anyhow::bail!("Object {id:?} vanished during export");
        };
        let node_index = self.nodes.len();
        self.nodes.push(Value::Null);

        let matrix = match parent {
            Some(_) => object.parent_inverse * object.basis,
            None => scene.world_matrix(id),
        };
        let mut node = json!({ "name": object.name });
        if matrix != Matrix4::identity() {
            node["matrix"] = matrix_json(&matrix);
        }

        let mut child_nodes = Vec::new();
        match &object.kind {
            ObjectKind::Armature(bones) => {
                let mut bone_nodes = Vec::with_capacity(bones.len());
                for bone in bones {
                    let mut bone_node = json!({ "name": bone.name });
                    if bone.local != Matrix4::identity() {
                        bone_node["matrix"] = matrix_json(&bone.local);
                    }
                    bone_nodes.push(self.nodes.len());
                    self.nodes.push(bone_node);
                }
                for (idx, bone) in bones.iter().enumerate() {
                    match bone.parent.and_then(|p| bone_nodes.get(p)) {
                        Some(&parent_node) => push_child(&mut self.nodes[parent_node], bone_nodes[idx]),
                        None => child_nodes.push(bone_nodes[idx]),
                    }
                }
                if !bones.is_empty() {
                    // skinned vertices are written in armature space, so the
                    // inverse bind of a bone is the inverse of its rest matrix
                    let inverse_binds: Vec<f32> = bone_globals(bones)
                        .iter()
                        .flat_map(|global| {
                            let inverse = invert_or_identity(global);
                            let flat: &[f32; 16] = inverse.as_ref();
                            *flat
                        })
                        .collect();
                    let accessor = self.push_accessor(
                        bytemuck::cast_slice(&inverse_binds),
                        bones.len(),
                        FLOAT,
                        "MAT4",
                        None,
                        None,
                    );
                    let skin = self.skins.len();
                    self.skins.push(json!({
                        "name": object.name,
                        "joints": bone_nodes,
                        "skeleton": node_index,
                        "inverseBindMatrices": accessor,
                    }));
                    let names = bones.iter().map(|b| b.name.clone()).collect();
                    self.armature_skin.insert(id, (skin, object.name.clone(), names));
                }
            }
            ObjectKind::Mesh(mesh) => {
                let deform_parent = match object.parent {
                    Some((armature, ParentKind::Deform)) if Some(armature) == parent => Some(armature),
                    _ => None,
                };
                let skin = deform_parent.and_then(|a| self.armature_skin.get(&a).map(|(skin, ..)| (a, *skin)));
                let bind = skin.map(|(armature, _)| (id, armature, matrix));
                let (mesh_index, skinned) = self.write_mesh(scene, *mesh, &object.name, bind)?;
                node["mesh"] = json!(mesh_index);
                if let (true, Some((_, skin))) = (skinned, skin) {
                    // a skinned node's own transform is ignored, it is baked into the vertices
                    if let Some(node) = node.as_object_mut() {
                        node.remove("matrix");
                    }
                    node["skin"] = json!(skin);
                }
            }
            ObjectKind::Camera | ObjectKind::Light | ObjectKind::Empty => {}
        }

        for &child in children.get(&id).map(Vec::as_slice).unwrap_or_default() {
            child_nodes.push(self.write_object(scene, child, Some(id), children)?);
        }
        if !child_nodes.is_empty() {
            node["children"] = json!(child_nodes);
        }
        self.nodes[node_index] = node;
        Ok(node_index)
    }

    /// Returns the mesh index and whether every primitive carries skinning data.
    ///
    /// `bind` is `(object, armature, object-to-armature matrix)` for a mesh
    /// deform-parented to an exported armature.
    fn write_mesh(
        &mut self,
        scene: &Scene,
        mesh: MeshId,
        object_name: &str,
        bind: Option<(ObjectId, ObjectId, Matrix4<f32>)>,
    ) -> anyhow::Result<(usize, bool)> {
        let data = scene
            .meshes
            .get(mesh)
            .with_context(|| format!("Mesh {mesh:?} is missing from the scene"))?;
        let skinned = bind.is_some()
            && !data.primitives.is_empty()
            && data
                .primitives
                .iter()
                .all(|p| p.joints.is_some() && p.weights.is_some());
        let bind = bind.filter(|_| skinned);
        let key = (mesh, bind.map(|(object, ..)| object));
        if let Some(&index) = self.mesh_index.get(&key) {
            return Ok((index, skinned));
        }

        // joints index the bones the mesh was authored against; map them by name
        let remap: Vec<u16> = match bind.and_then(|(_, armature, _)| self.armature_skin.get(&armature)) {
            Some((_, armature, bones)) => data
                .joint_names
                .iter()
                .map(|name| match bones.iter().position(|b| b == name) {
                    Some(bone) => bone as u16,
                    None => {
                        log::warn!(
                            "Joint {name} of {object_name} has no bone in {armature}, bound to {} instead",
                            bones[0]
                        );
                        0
                    }
                })
                .collect(),
            None => Vec::new(),
        };
        let to_armature = bind.map(|(_, _, matrix)| matrix);

        let mut primitives = Vec::new();
        for primitive in &data.primitives {
            let mut attributes = serde_json::Map::new();
            let positions = match &to_armature {
                Some(matrix) => Cow::Owned(bake_positions(matrix, &primitive.positions)),
                None => Cow::Borrowed(&primitive.positions),
            };
            let (min, max) = bounds(&positions);
            let position = self.push_accessor(
                bytemuck::cast_slice(positions.as_slice()),
                positions.len(),
                FLOAT,
                "VEC3",
                Some(ARRAY_BUFFER),
                Some((min, max)),
            );
            attributes.insert("POSITION".into(), json!(position));
            if let Some(normals) = &primitive.normals {
                let normals = match &to_armature {
                    Some(matrix) => Cow::Owned(bake_normals(matrix, normals)),
                    None => Cow::Borrowed(normals),
                };
                let accessor = self.push_accessor(
                    bytemuck::cast_slice(normals.as_slice()),
                    normals.len(),
                    FLOAT,
                    "VEC3",
                    Some(ARRAY_BUFFER),
                    None,
                );
                attributes.insert("NORMAL".into(), json!(accessor));
            }
            if let Some(tex_coords) = &primitive.tex_coords {
                let accessor = self.push_accessor(
                    bytemuck::cast_slice(tex_coords),
                    tex_coords.len(),
                    FLOAT,
                    "VEC2",
                    Some(ARRAY_BUFFER),
                    None,
                );
                attributes.insert("TEXCOORD_0".into(), json!(accessor));
            }
            if skinned {
                if let (Some(joints), Some(weights)) = (&primitive.joints, &primitive.weights) {
                    let joints: Vec<[u16; 4]> = joints
                        .iter()
                        .map(|j| j.map(|bone| remap.get(bone as usize).copied().unwrap_or(0)))
                        .collect();
                    let accessor = self.push_accessor(
                        bytemuck::cast_slice(&joints),
                        joints.len(),
                        UNSIGNED_SHORT,
                        "VEC4",
                        Some(ARRAY_BUFFER),
                        None,
                    );
                    attributes.insert("JOINTS_0".into(), json!(accessor));
                    let accessor = self.push_accessor(
                        bytemuck::cast_slice(weights),
                        weights.len(),
                        FLOAT,
                        "VEC4",
                        Some(ARRAY_BUFFER),
                        None,
                    );
                    attributes.insert("WEIGHTS_0".into(), json!(accessor));
                }
            }
            let mut json_primitive = json!({ "attributes": attributes });
            if let Some(indices) = &primitive.indices {
                let accessor = self.push_accessor(
                    bytemuck::cast_slice(indices),
                    indices.len(),
                    UNSIGNED_INT,
                    "SCALAR",
                    Some(ELEMENT_ARRAY_BUFFER),
                    None,
                );
                json_primitive["indices"] = json!(accessor);
            }
            if let Some(material) = primitive.material {
                json_primitive["material"] = json!(self.write_material(scene, material)?);
            }
            primitives.push(json_primitive);
        }

        let index = self.meshes.len();
        self.meshes.push(json!({ "name": data.name, "primitives": primitives }));
        self.mesh_index.insert(key, index);
        Ok((index, skinned))
    }

    fn write_material(&mut self, scene: &Scene, material: MaterialId) -> anyhow::Result<usize> {
        if let Some(&index) = self.material_index.get(&material) {
            return Ok(index);
        }
        let data = scene
            .materials
            .get(material)
            .with_context(|| format!("Material {material:?} is missing from the scene"))?;
        let mut pbr = json!({ "metallicFactor": 0.0 });
        let mut json_material = json!({ "name": data.name });
        if let Some(bsdf) = data.graph.principled_node() {
            if let Some(source) = upstream_color(scene, &data.graph, bsdf, socket::BASE_COLOR) {
                let texture = self.write_texture(scene, source, &format!("{}.base", data.name))?;
                pbr["baseColorTexture"] = json!({ "index": texture });
            }
            if let Some(source) = upstream_color(scene, &data.graph, bsdf, socket::EMISSION) {
                let texture = self.write_texture(scene, source, &format!("{}.emission", data.name))?;
                json_material["emissiveTexture"] = json!({ "index": texture });
                json_material["emissiveFactor"] = json!([1.0, 1.0, 1.0]);
            }
        }
        json_material["pbrMetallicRoughness"] = pbr;
        let index = self.materials.len();
        self.materials.push(json_material);
        self.material_index.insert(material, index);
        Ok(index)
    }

    fn write_texture(&mut self, scene: &Scene, source: ColorSource, name: &str) -> anyhow::Result<usize> {
        let (png, image_name) = match &source {
            ColorSource::Image(id) => {
                if let Some(&index) = self.texture_index.get(id) {
                    return Ok(index);
                }
                let image = scene
                    .images
                    .get(*id)
                    .with_context(|| format!("Image {id:?} is missing from the scene"))?;
                (image.to_png()?, image.name.clone())
            }
            ColorSource::Baked(pixels) => {
                let baked = crate::data_structures::texture::Image {
                    name: name.to_string(),
                    source: None,
                    pixels: pixels.clone(),
                };
                (baked.to_png()?, name.to_string())
            }
        };
        let view = self.push_view(&png, None);
        let image = self.images.len();
        self.images.push(json!({
            "name": image_name,
            "bufferView": view,
            "mimeType": "image/png",
        }));
        let texture = self.textures.len();
        self.textures.push(json!({ "source": image }));
        if let ColorSource::Image(id) = source {
            self.texture_index.insert(id, texture);
        }
        Ok(texture)
    }

    fn push_view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.bin.extend_from_slice(bytes);
        self.buffer_views.push(view);
        self.buffer_views.len() - 1
    }

    fn push_accessor(
        &mut self,
        bytes: &[u8],
        count: usize,
        component_type: u32,
        kind: &str,
        target: Option<u32>,
        min_max: Option<([f32; 3], [f32; 3])>,
    ) -> usize {
        let view = self.push_view(bytes, target);
        let mut accessor = json!({
            "bufferView": view,
            "componentType": component_type,
            "count": count,
            "type": kind,
        });
        if let Some((min, max)) = min_max {
            accessor["min"] = json!(min);
            accessor["max"] = json!(max);
        }
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    fn finish(self) -> anyhow::Result<Vec<u8>> {
        let mut root = json!({
            "asset": {
                "version": "2.0",
                "generator": concat!("character-assembler ", env!("CARGO_PKG_VERSION")),
            },
            "scene": 0,
            "scenes": [{ "nodes": self.roots }],
        });
        let lists = [
            ("nodes", self.nodes),
            ("meshes", self.meshes),
            ("materials", self.materials),
            ("textures", self.textures),
            ("images", self.images),
            ("skins", self.skins),
            ("accessors", self.accessors),
            ("bufferViews", self.buffer_views),
        ];
        for (key, list) in lists {
            if !list.is_empty() {
                root[key] = Value::Array(list);
            }
        }
        if !self.bin.is_empty() {
            root["buffers"] = json!([{ "byteLength": self.bin.len() }]);
        }

        let json = serde_json::to_vec(&root)?;
        let glb = gltf::Glb {
            header: gltf::binary::Header {
                magic: *b"glTF",
                version: 2,
                // recomputed by the writer
                length: 0,
            },
            json: Cow::Owned(json),
            bin: (!self.bin.is_empty()).then_some(Cow::Owned(self.bin)),
        };
        Ok(glb.to_vec()?)
    }
}

/// Resolves what feeds `input` of `node` into something exportable as a texture.
fn upstream_color(scene: &Scene, graph: &NodeGraph, node: &ShaderNode, input: &str) -> Option<ColorSource> {
    graph
        .upstream(node.id, input)
        .and_then(|source| evaluate(scene, graph, source, 0))
}

fn evaluate(scene: &Scene, graph: &NodeGraph, node: &ShaderNode, depth: usize) -> Option<ColorSource> {
    if depth > MAX_GRAPH_DEPTH {
        log::warn!("Material graph nests deeper than {MAX_GRAPH_DEPTH} nodes, ignoring the rest.");
        return None;
    }
    match &node.kind {
        NodeKind::ImageTexture { image } => image
            .filter(|id| scene.images.get(*id).is_some())
            .map(ColorSource::Image),
        NodeKind::MixRgb { blend: mode } => {
            let input = |name: &str| {
                graph
                    .upstream(node.id, name)
                    .and_then(|n| evaluate(scene, graph, n, depth + 1))
            };
            let a = input(socket::COLOR1);
            let b = input(socket::COLOR2);
            match (a, b) {
                (Some(a), Some(b)) => {
                    let a_pixels = pixels(scene, &a)?;
                    let b_pixels = pixels(scene, &b)?;
                    let factor = input(socket::FAC);
                    let baked = match factor.as_ref().and_then(|f| pixels(scene, f)) {
                        Some(factor) => blend(a_pixels, b_pixels, factor, *mode),
                        None => {
                            // unlinked factor defaults to one half
                            let half = RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 128]));
                            blend(a_pixels, b_pixels, &half, *mode)
                        }
                    };
                    Some(ColorSource::Baked(baked))
                }
                (Some(a), None) => Some(a),
                (None, b) => b,
            }
        }
        _ => None,
    }
}

fn pixels<'a>(scene: &'a Scene, source: &'a ColorSource) -> Option<&'a RgbaImage> {
    match source {
        ColorSource::Image(id) => scene.images.get(*id).map(|image| &image.pixels),
        ColorSource::Baked(pixels) => Some(pixels),
    }
}

fn push_child(node: &mut Value, child: usize) {
    match node.get_mut("children").and_then(Value::as_array_mut) {
        Some(children) => children.push(json!(child)),
        None => node["children"] = json!([child]),
    }
}

fn bake_positions(matrix: &Matrix4<f32>, positions: &[[f32; 3]]) -> Vec<[f32; 3]> {
    positions
        .iter()
        .map(|&p| matrix.transform_point(Point3::from(p)).into())
        .collect()
}

fn bake_normals(matrix: &Matrix4<f32>, normals: &[[f32; 3]]) -> Vec<[f32; 3]> {
    let linear = Matrix3::from_cols(matrix.x.truncate(), matrix.y.truncate(), matrix.z.truncate());
    let normal_matrix = linear.invert().map(|m| m.transpose()).unwrap_or(linear);
    normals
        .iter()
        .map(|&n| {
            let n = normal_matrix * Vector3::from(n);
            if n.magnitude2() > 0.0 { n.normalize().into() } else { n.into() }
        })
        .collect()
}

fn matrix_json(matrix: &Matrix4<f32>) -> Value {
    let flat: &[f32; 16] = matrix.as_ref();
    json!(flat.to_vec())
}

fn bounds(positions: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    if positions.is_empty() {
        return ([0.0; 3], [0.0; 3]);
    }
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for position in positions {
        for axis in 0..3 {
            min[axis] = min[axis].min(position[axis]);
            max[axis] = max[axis].max(position[axis]);
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{
        instance::translation_of,
        scene_graph::{Bone, MeshData, Primitive, SceneObject},
    };

    /// An armature at x = 1 with a mesh two units further along, bound to it.
    fn rigged_scene(joint_names: &[&str]) -> (Scene, Vec<ObjectId>) {
        let mut scene = Scene::new();
        let mut primitive = Primitive::from_positions(vec![[0.0, 0.0, 0.0]], None);
        primitive.joints = Some(vec![[0, 1, 0, 0]]);
        primitive.weights = Some(vec![[0.5, 0.5, 0.0, 0.0]]);
        let mesh = scene.meshes.insert(MeshData {
            name: "body".into(),
            primitives: vec![primitive],
            joint_names: joint_names.iter().map(|n| n.to_string()).collect(),
        });
        let bones = vec![
            Bone {
                name: "root".into(),
                parent: None,
                local: Matrix4::identity(),
            },
            Bone {
                name: "spine".into(),
                parent: Some(0),
                local: Matrix4::from_translation(Vector3::new(0.0, 0.5, 0.0)),
            },
        ];
        let armature = scene.add_object(
            SceneObject::new("rig", ObjectKind::Armature(bones))
                .with_basis(Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0))),
        );
        let body = scene.add_object(
            SceneObject::new("body", ObjectKind::Mesh(mesh))
                .with_basis(Matrix4::from_translation(Vector3::new(3.0, 0.0, 0.0))),
        );
        scene.set_parent_keep_transform(body, armature, ParentKind::Deform);
        (scene, vec![armature, body])
    }

    #[test]
    fn skin_is_written_in_armature_space() {
        let (scene, objects) = rigged_scene(&["root", "spine"]);
        let bytes = encode_glb(&scene, &objects).unwrap();
        let gltf = gltf::Gltf::from_slice(&bytes).unwrap();
        let blob = gltf.blob.clone().unwrap();

        let skin = gltf.skins().next().unwrap();
        let inverse_binds: Vec<Matrix4<f32>> = skin
            .reader(|_| Some(blob.as_slice()))
            .read_inverse_bind_matrices()
            .unwrap()
            .map(Matrix4::from)
            .collect();
        assert_eq!(translation_of(&inverse_binds[0]), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(translation_of(&inverse_binds[1]), Vector3::new(0.0, -0.5, 0.0));

        let node = gltf.nodes().find(|n| n.skin().is_some()).unwrap();
        assert_eq!(node.transform().decomposed().0, [0.0; 3]);
        let primitive = node.mesh().unwrap().primitives().next().unwrap();
        let positions: Vec<[f32; 3]> = primitive
            .reader(|_| Some(blob.as_slice()))
            .read_positions()
            .unwrap()
            .collect();
        // world x = 3, the armature sits at x = 1
        assert_eq!(positions, vec![[2.0, 0.0, 0.0]]);
    }

    #[test]
    fn unknown_joint_falls_back_to_the_first_bone() {
        let (scene, objects) = rigged_scene(&["spine", "tail"]);
        let bytes = encode_glb(&scene, &objects).unwrap();
        let gltf = gltf::Gltf::from_slice(&bytes).unwrap();
        let blob = gltf.blob.clone().unwrap();

        let node = gltf.nodes().find(|n| n.skin().is_some()).unwrap();
        let primitive = node.mesh().unwrap().primitives().next().unwrap();
        let joints: Vec<[u16; 4]> = primitive
            .reader(|_| Some(blob.as_slice()))
            .read_joints(0)
            .unwrap()
            .into_u16()
            .collect();
        assert_eq!(joints, vec![[1, 0, 1, 1]]);
    }
}
