use std::path::PathBuf;

use log::{debug, info, warn};

use crate::{
    catalog::{Assignment, TokenId},
    config::AssemblerConfig,
    data_structures::scene_graph::{ObjectId, Scene},
    error::PartFailure,
    resources::import_glb,
};

/// The objects one part asset brought into the scene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembledPart {
    pub category: String,
    pub option_id: String,
    pub path: PathBuf,
    pub objects: Vec<ObjectId>,
}

/// An unrigged character: whatever parts could be loaded plus the ones that could not.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assembly {
    pub parts: Vec<AssembledPart>,
    pub failures: Vec<PartFailure>,
}

impl Assembly {
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.parts.iter().flat_map(|part| part.objects.iter().copied())
    }

    pub fn part(&self, category: &str) -> Option<&AssembledPart> {
        self.parts.iter().find(|part| part.category == category)
    }
}

/// Imports the asset of every non-empty option in `assignment`, in order.
///
/// Mesh objects are renamed to their category and every imported object is
/// tagged with it. Missing or unreadable assets are recorded and skipped.
/// Options that only exist as a texture (faces) have no model to import and
/// are left to the compositor.
pub async fn assemble(
    scene: &mut Scene,
    token: TokenId,
    assignment: &Assignment,
    config: &AssemblerConfig,
) -> Assembly {
    let mut assembly = Assembly::default();
    for (category, option_id) in assignment {
        if option_id.is_empty() {
            continue;
        }
        let path = config.model_path(option_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let texture = config.texture_path(option_id);
            if tokio::fs::try_exists(&texture).await.unwrap_or(false) {
                debug!(
                    "Token {token}: {category} ({option_id}) is texture only, nothing to import from {}",
                    texture.display()
                );
                continue;
            }
            let failure = PartFailure::AssetNotFound {
                token,
                category: category.clone(),
                path,
            };
            warn!("{failure}");
            assembly.failures.push(failure);
            continue;
        }

        let objects = match import_glb(scene, &path).await {
            Ok(objects) => objects,
            Err(e) => {
                let failure = PartFailure::ImportFailed {
                    token,
                    category: category.clone(),
                    path,
                    reason: format!("{e:#}"),
                };
                warn!("{failure}");
                assembly.failures.push(failure);
                continue;
            }
        };
        for &id in &objects {
            let is_mesh = match scene.object_mut(id) {
                Some(object) => {
                    object.category = Some(category.clone());
                    object.kind.is_mesh()
                }
                None => false,
            };
            if is_mesh {
                scene.rename(id, category);
            }
        }
        info!(
            "Token {token}: imported {category} ({option_id}) as {} objects",
            objects.len()
        );
        assembly.parts.push(AssembledPart {
            category: category.clone(),
            option_id: option_id.clone(),
            path,
            objects,
        });
    }
    assembly
}
