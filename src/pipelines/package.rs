use std::path::PathBuf;

use log::info;

use crate::{
    catalog::TokenId,
    config::AssemblerConfig,
    data_structures::scene_graph::{ObjectId, Scene},
    error::ExportError,
    resources::export_glb,
};

/// The armature named after `token` plus every mesh parented directly to it.
pub fn select_character(scene: &Scene, token: TokenId, config: &AssemblerConfig) -> Result<Vec<ObjectId>, ExportError> {
    let name = config.armature_name(token);
    let armature = scene
        .find_by_name(&name)
        .filter(|&id| scene.object(id).is_some_and(|o| o.kind.is_armature()))
        .ok_or(ExportError::CharacterNotFound { token, name })?;
    let mut selection = vec![armature];
    selection.extend(
        scene
            .objects()
            .filter(|(_, object)| object.kind.is_mesh() && object.parent_id() == Some(armature))
            .map(|(id, _)| id),
    );
    Ok(selection)
}

/// Writes the token's character to `{glb_folder}/Character_{token}.glb`, overwriting.
pub async fn export(scene: &Scene, token: TokenId, config: &AssemblerConfig) -> Result<PathBuf, ExportError> {
    let selection = select_character(scene, token, config)?;
    let path = config.export_path(token);
    export_glb(scene, &selection, &path)
        .await
        .map_err(|source| ExportError::Write {
            token,
            path: path.clone(),
            source,
        })?;
    info!(
        "Token {token}: exported {} objects to {}",
        selection.len(),
        path.display()
    );
    Ok(path)
}
