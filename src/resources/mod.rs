//! Moving models and textures between files and a `Scene`.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use anyhow::Context;
use cgmath::{Matrix4, SquareMatrix};

use crate::data_structures::{
    instance::Instance,
    material::{EMISSIVE_LABEL, Material, NodeGraph, NodeKind, SocketRef, socket},
    scene_graph::{
        Bone, ImageId, MaterialId, MeshData, MeshId, ObjectId, ObjectKind, ParentKind, Scene, SceneObject, bone_globals,
    },
};

pub mod export;
pub mod mesh;
pub mod texture;

pub use export::{encode_glb, export_glb};
pub use texture::{load_binary, load_image, load_string};

/// Everything the node walk needs once buffers, images and materials are in memory.
struct ImportState {
    buffers: Vec<Vec<u8>>,
    materials: Vec<MaterialId>,
    /// joint node index -> skin index
    joint_of: HashMap<usize, usize>,
    /// non-joint node index that stands in for a skin's armature -> skin index
    host_of: HashMap<usize, usize>,
    armatures: Vec<ObjectId>,
    /// per skin: where its meshes sit in armature space at bind time
    binds: Vec<Matrix4<f32>>,
    meshes: HashMap<usize, MeshId>,
    created: Vec<ObjectId>,
}

/// Imports a `.glb` (or `.gltf`) file into `scene`.
///
/// Every skin becomes an armature object whose bones are the skin's joints, mesh
/// nodes become mesh objects (skinned ones deform-parented to their armature) and
/// glTF materials become node graphs with the base colour texture wired into
/// `Base Color` and an `EMISSIVE` labelled texture wired into `Emission`.
///
/// Returns the created objects in creation order.
pub async fn import_glb(scene: &mut Scene, path: &Path) -> anyhow::Result<Vec<ObjectId>> {
    let data = load_binary(path)
        .await
        .with_context(|| format!("Could not read {}", path.display()))?;
    let gltf = gltf::Gltf::from_slice(&data)
        .with_context(|| format!("{} is not a valid glTF file", path.display()))?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());

    // Load buffers
    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => {
                buffers.push(gltf.blob.clone().unwrap_or_default());
            }
            gltf::buffer::Source::Uri(uri) => {
                if uri.starts_with("data:") {
                    anyhow::bail!("{}: embedded data uris are not supported", path.display());
                }
                let bin = load_binary(&base_dir.join(uri))
                    .await
                    .with_context(|| format!("Missing buffer {uri} of {}", path.display()))?;
                buffers.push(bin);
            }
        }
    }

    // Load images, shared between materials
    let mut images: HashMap<usize, ImageId> = HashMap::new();
    for material in gltf.materials() {
        let textures = [
            material.pbr_metallic_roughness().base_color_texture(),
            material.emissive_texture(),
        ];
        for info in textures.into_iter().flatten() {
            let image = info.texture().source();
            if images.contains_key(&image.index()) {
                continue;
            }
            let index = image.index();
            let loaded = texture::load_gltf_image(image, &buffers, base_dir, &stem).await?;
            images.insert(index, scene.images.insert(loaded));
        }
    }

    // Load materials
    let mut materials = Vec::new();
    for material in gltf.materials() {
        let name = material
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{stem}.material.{}", materials.len()));
        let (mut graph, bsdf) = NodeGraph::principled();
        if let Some(info) = material.pbr_metallic_roughness().base_color_texture() {
            let image = images.get(&info.texture().source().index()).copied();
            let node = graph.add_node(NodeKind::ImageTexture { image }, "", [-400.0, 0.0]);
            graph.wire(
                SocketRef::new(node, socket::COLOR),
                SocketRef::new(bsdf, socket::BASE_COLOR),
            );
        }
        if let Some(info) = material.emissive_texture() {
            let image = images.get(&info.texture().source().index()).copied();
            let node = graph.add_node(NodeKind::ImageTexture { image }, EMISSIVE_LABEL, [-400.0, -300.0]);
            graph.wire(
                SocketRef::new(node, socket::COLOR),
                SocketRef::new(bsdf, socket::EMISSION),
            );
        }
        materials.push(scene.materials.insert(Material { name, graph }));
    }

    let mut state = ImportState {
        buffers,
        materials,
        joint_of: HashMap::new(),
        host_of: HashMap::new(),
        armatures: Vec::new(),
        binds: Vec::new(),
        meshes: HashMap::new(),
        created: Vec::new(),
    };
    create_armatures(&gltf, scene, &mut state);

    let mut visited_any = false;
    for gltf_scene in gltf.scenes() {
        for node in gltf_scene.nodes() {
            visit(node, None, scene, &mut state);
            visited_any = true;
        }
    }
    if !visited_any {
        // documents without scenes: walk the parentless nodes
        let children: HashSet<usize> = gltf
            .nodes()
            .flat_map(|n| n.children().map(|c| c.index()).collect::<Vec<_>>())
            .collect();
        for node in gltf.nodes().filter(|n| !children.contains(&n.index())) {
            visit(node, None, scene, &mut state);
        }
    }

    log::debug!(
        "Imported {} objects from {}",
        state.created.len(),
        path.display()
    );
    Ok(state.created)
}

fn create_armatures(gltf: &gltf::Gltf, scene: &mut Scene, state: &mut ImportState) {
    let mut parents: HashMap<usize, usize> = HashMap::new();
    for node in gltf.nodes() {
        for child in node.children() {
            parents.insert(child.index(), node.index());
        }
    }
    for skin in gltf.skins() {
        for joint in skin.joints() {
            state.joint_of.entry(joint.index()).or_insert(skin.index());
        }
    }

    for skin in gltf.skins() {
        let joints: Vec<gltf::Node> = skin.joints().collect();
        let joint_indices: Vec<usize> = joints.iter().map(|j| j.index()).collect();
        let bones: Vec<Bone> = joints
            .iter()
            .map(|joint| Bone {
                name: joint
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("bone.{}", joint.index())),
                parent: parents
                    .get(&joint.index())
                    .and_then(|p| joint_indices.iter().position(|j| j == p)),
                local: Instance::from_decomposed(joint.transform().decomposed()).to_matrix(),
            })
            .collect();

        // skinned vertices are posed by joint * inverse bind; absent matrices mean identity
        let first_inverse_bind = skin
            .reader(|buffer| state.buffers.get(buffer.index()).map(Vec::as_slice))
            .read_inverse_bind_matrices()
            .and_then(|mut matrices| matrices.next())
            .map(Matrix4::from)
            .unwrap_or_else(Matrix4::identity);
        let bind = bone_globals(&bones)
            .first()
            .map_or(first_inverse_bind, |global| global * first_inverse_bind);
        state.binds.push(bind);

        let is_joint = |idx: &usize| state.joint_of.contains_key(idx);
        let root_joint = joint_indices
            .iter()
            .find(|j| parents.get(*j).is_none_or(|p| !joint_indices.contains(p)));
        let host = skin
            .skeleton()
            .map(|n| n.index())
            .filter(|n| !is_joint(n))
            .or_else(|| root_joint.and_then(|j| parents.get(j).copied()).filter(|p| !is_joint(p)))
            .filter(|h| !state.host_of.contains_key(h));

        let (name, basis) = match host.and_then(|h| gltf.nodes().nth(h)) {
            Some(node) => (
                node.name().unwrap_or("Armature").to_string(),
                Instance::from_decomposed(node.transform().decomposed()).to_matrix(),
            ),
            None => (
                skin.name().unwrap_or("Armature").to_string(),
                Matrix4::identity(),
            ),
        };
        if let Some(host) = host {
            state.host_of.insert(host, skin.index());
        }
        let id = scene.add_object(SceneObject::new(&name, ObjectKind::Armature(bones)).with_basis(basis));
        state.armatures.push(id);
        state.created.push(id);
    }
}

fn visit(node: gltf::Node, parent: Option<ObjectId>, scene: &mut Scene, state: &mut ImportState) {
    let index = node.index();

    if let Some(&skin) = state.joint_of.get(&index) {
        // bones live inside the armature; whatever hangs off them follows the armature
        let armature = state.armatures[skin];
        for child in node.children() {
            visit(child, Some(armature), scene, state);
        }
        return;
    }

    let id = if let Some(&skin) = state.host_of.get(&index) {
        let armature = state.armatures[skin];
        if let Some(object) = scene.object_mut(armature) {
            object.parent = parent.map(|p| (p, ParentKind::Object));
        }
        armature
    } else {
        let kind = match node.mesh() {
            Some(mesh) => {
                let mesh_id = *state.meshes.entry(mesh.index()).or_insert_with(|| {
                    let joint_names = node
                        .skin()
                        .map(|skin| {
                            skin.joints()
                                .map(|j| j.name().map(str::to_string).unwrap_or_else(|| format!("bone.{}", j.index())))
                                .collect()
                        })
                        .unwrap_or_default();
                    scene.meshes.insert(MeshData {
                        name: mesh.name().unwrap_or("unknown_mesh").to_string(),
                        primitives: mesh::read_primitives(&mesh, &state.buffers, &state.materials),
                        joint_names,
                    })
                });
                ObjectKind::Mesh(mesh_id)
            }
            None if node.camera().is_some() => ObjectKind::Camera,
            None => ObjectKind::Empty,
        };
        let name = node
            .name()
            .or_else(|| node.mesh().and_then(|m| m.name()))
            .unwrap_or("Object")
            .to_string();
        let armature = node.skin().and_then(|skin| {
            let armature = state.armatures.get(skin.index())?;
            Some((*armature, state.binds.get(skin.index())?))
        });
        let object = match armature {
            // the node's own transform does not apply to skinned meshes
            Some((armature, bind)) => {
                let mut object = SceneObject::new(&name, kind).with_basis(*bind);
                object.parent = Some((armature, ParentKind::Deform));
                object
            }
            None => {
                let basis = Instance::from_decomposed(node.transform().decomposed()).to_matrix();
                let mut object = SceneObject::new(&name, kind).with_basis(basis);
                object.parent = parent.map(|p| (p, ParentKind::Object));
                object
            }
        };
        let id = scene.add_object(object);
        state.created.push(id);
        id
    };

    for child in node.children() {
        visit(child, Some(id), scene, state);
    }
}
