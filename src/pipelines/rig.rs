use log::{debug, info};

use crate::{
    catalog::TokenId,
    config::AssemblerConfig,
    data_structures::scene_graph::{ObjectId, Scene},
    error::RigFailure,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rigged {
    pub armature: ObjectId,
    pub name: String,
    /// Mesh objects now deform-bound to `armature`.
    pub parts: Vec<ObjectId>,
    /// Extra armatures removed from the scene.
    pub discarded: usize,
}

/// Collapses every armature in the scene into the first one and binds all meshes to it.
///
/// The survivor is renamed `"{prefix} {token}"` and becomes a scene root.
/// World transforms of the meshes are preserved.
pub fn rig(scene: &mut Scene, token: TokenId, config: &AssemblerConfig) -> Result<Rigged, RigFailure> {
    let armatures = scene.armatures();
    let Some((&armature, extra)) = armatures.split_first() else {
        return Err(RigFailure::NoArmatureFound { token });
    };
    for &doomed in extra {
        if let Some(object) = scene.remove_object(doomed) {
            debug!("Token {token}: discarded extra armature {}", object.name);
        }
    }

    let wanted = config.armature_name(token);
    let name = scene.rename(armature, &wanted).unwrap_or(wanted);

    let parts: Vec<ObjectId> = scene
        .objects()
        .filter(|(_, object)| object.kind.is_mesh())
        .map(|(id, _)| id)
        .collect();
    for &part in &parts {
        scene.clear_parent_keep_transform(part);
    }
    scene.clear_parent_keep_transform(armature);
    scene.parent_under_skeleton(&parts, armature);

    info!(
        "Token {token}: rigged {} parts to {name} ({} extra armatures discarded)",
        parts.len(),
        extra.len()
    );
    Ok(Rigged {
        armature,
        name,
        parts,
        discarded: extra.len(),
    })
}

#[cfg(test)]
mod tests {
    use cgmath::{Matrix4, Vector3};

    use super::*;
    use crate::data_structures::{
        instance::approx_eq,
        scene_graph::{MeshData, ObjectKind, ParentKind, SceneObject},
    };

    fn mesh(scene: &mut Scene, name: &str) -> ObjectId {
        let mesh = scene.meshes.insert(MeshData {
            name: name.into(),
            primitives: Vec::new(),
            joint_names: Vec::new(),
        });
        scene.add_object(SceneObject::new(name, ObjectKind::Mesh(mesh)))
    }

    #[test]
    fn empty_scene_has_no_armature() {
        let mut scene = Scene::new();
        let err = rig(&mut scene, TokenId(8), &AssemblerConfig::default()).unwrap_err();
        assert_eq!(err, RigFailure::NoArmatureFound { token: TokenId(8) });
    }

    #[test]
    fn nested_armature_becomes_root_and_keeps_world_transform() {
        let mut scene = Scene::new();
        let holder = scene.add_object(
            SceneObject::new("holder", ObjectKind::Empty)
                .with_basis(Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0))),
        );
        let armature = scene.add_object(SceneObject::new("Armature", ObjectKind::Armature(Vec::new())));
        scene.set_parent_keep_transform(armature, holder, ParentKind::Object);
        let body = mesh(&mut scene, "body");
        scene.set_parent_keep_transform(body, holder, ParentKind::Object);
        let before = scene.world_matrix(body);

        let rigged = rig(&mut scene, TokenId(12), &AssemblerConfig::default()).unwrap();
        assert_eq!(rigged.name, "fRiENDSiES 12");
        assert_eq!(scene.object(armature).unwrap().parent, None);
        assert_eq!(
            scene.object(body).unwrap().parent,
            Some((armature, ParentKind::Deform))
        );
        assert!(approx_eq(&scene.world_matrix(body), &before, 1e-5));
    }
}
