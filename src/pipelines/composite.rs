//! Face compositing.
//!
//! Overlays a face texture on the head material by inserting a `MixRgb` node
//! between an existing texture and the principled node. The target input is
//! picked by a fixed rule:
//!
//! 1. the sentinel head option blends into `Emission` (linear light) and needs
//!    an `EMISSIVE` labelled texture there,
//! 2. any other head blends into `Base Color` (mix),
//! 3. otherwise nothing is changed and the failure is reported.

use log::info;

use crate::{
    catalog::TokenId,
    config::AssemblerConfig,
    data_structures::{
        material::{BlendMode, EMISSIVE_LABEL, NodeGraph, NodeId, NodeKind, ShaderNode, SocketRef, socket},
        scene_graph::{ImageId, ObjectId, Scene},
    },
    error::CompositeFailure,
    resources::load_image,
};

/// Horizontal gap between the blended texture and the inserted blend node.
const BLEND_NODE_OFFSET: f32 = 300.0;

/// Where the face ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Composited {
    pub head: ObjectId,
    pub material: String,
    /// The principled input now fed by the blend node.
    pub input: &'static str,
    pub blend: BlendMode,
}

pub async fn apply_face_texture(
    scene: &mut Scene,
    token: TokenId,
    face_option_id: &str,
    head_option_id: Option<&str>,
    config: &AssemblerConfig,
) -> Result<Composited, CompositeFailure> {
    let path = config.texture_path(face_option_id);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(CompositeFailure::TextureNotFound { token, path });
    }
    let face = load_image(&path)
        .await
        .map_err(|e| CompositeFailure::TextureLoad {
            token,
            path: path.clone(),
            reason: format!("{e:#}"),
        })?;

    let head = find_head(scene, config).ok_or_else(|| CompositeFailure::HeadObjectNotFound {
        token,
        wanted: config.head_match.to_string(),
    })?;
    let material_id = scene
        .active_material(head)
        .ok_or_else(|| CompositeFailure::MaterialMissing {
            token,
            object: scene
                .object(head)
                .map(|o| o.name.clone())
                .unwrap_or_default(),
        })?;
    let material = scene
        .materials
        .get(material_id)
        .ok_or_else(|| CompositeFailure::MaterialMissing {
            token,
            object: format!("{head:?}"),
        })?;
    let material_name = material.name.clone();
    let graph = &material.graph;
    let bsdf = graph
        .principled_node()
        .ok_or_else(|| CompositeFailure::PrincipledNodeNotFound {
            token,
            material: material_name.clone(),
        })?;

    let texture_feeding = |input: &str| {
        graph
            .upstream(bsdf.id, input)
            .filter(|node| node.is_image_texture())
            .cloned()
    };
    let base_color = texture_feeding(socket::BASE_COLOR);
    let emissive = texture_feeding(socket::EMISSION).filter(|node| node.label == EMISSIVE_LABEL);
    let bsdf = bsdf.id;

    let (source, input, blend) = if head_option_id == Some(config.sentinel_head_id.as_str()) {
        let source = emissive.ok_or_else(|| CompositeFailure::EmissiveSourceNotFound {
            token,
            material: material_name.clone(),
            label: EMISSIVE_LABEL.to_string(),
            face: face_option_id.to_string(),
        })?;
        (source, socket::EMISSION, BlendMode::LinearLight)
    } else if let Some(source) = base_color {
        (source, socket::BASE_COLOR, BlendMode::Mix)
    } else {
        return Err(CompositeFailure::NoBlendTarget {
            token,
            material: material_name,
            face: face_option_id.to_string(),
        });
    };

    let image = scene.images.insert(face);
    let Some(material) = scene.materials.get_mut(material_id) else {
        return Err(CompositeFailure::MaterialMissing {
            token,
            object: format!("{head:?}"),
        });
    };
    insert_blend(&mut material.graph, &source, bsdf, input, blend, image);

    info!("Token {token}: face {face_option_id} blended into {input} of {material_name}");
    Ok(Composited {
        head,
        material: material_name,
        input,
        blend,
    })
}

/// The first object the configured head predicate accepts, meshes before anything else.
fn find_head(scene: &Scene, config: &AssemblerConfig) -> Option<ObjectId> {
    let is_head = |name: &str, category: Option<&str>| config.head_match.matches(name, category);
    let mut fallback = None;
    for (id, object) in scene.objects() {
        if !is_head(&object.name, object.category.as_deref()) {
            continue;
        }
        if object.kind.is_mesh() {
            return Some(id);
        }
        fallback.get_or_insert(id);
    }
    fallback
}

fn insert_blend(
    graph: &mut NodeGraph,
    source: &ShaderNode,
    bsdf: NodeId,
    input: &str,
    blend: BlendMode,
    image: ImageId,
) {
    let [x, y] = source.location;
    let face = graph.add_node(
        NodeKind::ImageTexture { image: Some(image) },
        "",
        [x, y - BLEND_NODE_OFFSET],
    );
    let mix = graph.add_node(NodeKind::MixRgb { blend }, "", [x + BLEND_NODE_OFFSET, y]);
    graph.wire(SocketRef::new(source.id, socket::COLOR), SocketRef::new(mix, socket::COLOR1));
    graph.wire(SocketRef::new(face, socket::COLOR), SocketRef::new(mix, socket::COLOR2));
    graph.wire(SocketRef::new(face, socket::ALPHA), SocketRef::new(mix, socket::FAC));
    graph.wire(SocketRef::new(mix, socket::COLOR), SocketRef::new(bsdf, input));
}
