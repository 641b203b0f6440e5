use std::{path::PathBuf, time::Duration};

use instant::Instant;
use log::{info, warn};

use crate::{
    catalog::{Catalog, TokenAssignments, TokenId},
    config::AssemblerConfig,
    data_structures::scene_graph::{PurgeReport, Scene},
    error::{CatalogError, CompositeFailure, ExportError, RigFailure},
    pipelines::{
        assemble::{Assembly, assemble},
        composite::{Composited, apply_face_texture},
        package,
        resolve::{ResolvedAttributes, resolve},
        rig::{Rigged, rig},
    },
};

pub const FACE_CATEGORY: &str = "face";
pub const HEAD_CATEGORY: &str = "head";

/// Everything a build produced, including the recoverable failures.
#[derive(Debug)]
pub struct BuildReport {
    pub token: TokenId,
    pub purged: PurgeReport,
    pub attributes: ResolvedAttributes,
    pub assembly: Assembly,
    /// `None` when the token has no face to composite.
    pub composite: Option<Result<Composited, CompositeFailure>>,
    pub rig: Result<Rigged, RigFailure>,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn is_rigged(&self) -> bool {
        self.rig.is_ok()
    }

    /// Rigged, with every part loaded and the face (if any) composited.
    pub fn is_complete(&self) -> bool {
        self.is_rigged()
            && self.assembly.failures.is_empty()
            && !matches!(self.composite, Some(Err(_)))
    }

    /// Messages of every recoverable failure, in stage order.
    pub fn failures(&self) -> Vec<String> {
        let mut failures: Vec<String> = self.assembly.failures.iter().map(ToString::to_string).collect();
        if let Some(Err(e)) = &self.composite {
            failures.push(e.to_string());
        }
        if let Err(e) = &self.rig {
            failures.push(e.to_string());
        }
        failures
    }
}

/// The assembler's state: configuration, the loaded catalog files and the scene.
///
/// Commands are explicit method calls; nothing rebuilds implicitly.
#[derive(Debug)]
pub struct Context {
    pub config: AssemblerConfig,
    pub catalog: Catalog,
    pub assignments: TokenAssignments,
    pub scene: Scene,
}

impl Context {
    /// Loads the catalog and the token assignments named by `config`.
    pub async fn new(config: AssemblerConfig) -> Result<Self, CatalogError> {
        let catalog = Catalog::load(&config.catalog_path()).await?;
        let assignments = TokenAssignments::load(&config.assignment_path()).await?;
        info!(
            "Loaded {} catalog options and {} token assignments",
            catalog.option_count(),
            assignments.len()
        );
        Ok(Self::from_parts(config, catalog, assignments))
    }

    pub fn from_parts(config: AssemblerConfig, catalog: Catalog, assignments: TokenAssignments) -> Self {
        Self {
            config,
            catalog,
            assignments,
            scene: Scene::new(),
        }
    }

    pub fn resolve_attributes(&self, token: TokenId) -> ResolvedAttributes {
        resolve(token, &self.catalog, &self.assignments.get(token))
    }

    /// Resets the scene, then resolves, assembles, composites and rigs `token`.
    pub async fn build_character(&mut self, token: TokenId) -> BuildReport {
        let start = Instant::now();
        let purged = self.scene.reset();
        let attributes = self.resolve_attributes(token);
        let assignment = attributes.assignment();

        let assembly = assemble(&mut self.scene, token, &assignment, &self.config).await;

        let composite = match attributes.option(FACE_CATEGORY).filter(|id| !id.is_empty()) {
            Some(face) => {
                let head = attributes.option(HEAD_CATEGORY);
                let result = apply_face_texture(&mut self.scene, token, face, head, &self.config).await;
                if let Err(e) = &result {
                    warn!("{e}");
                }
                Some(result)
            }
            None => None,
        };

        let rig = rig(&mut self.scene, token, &self.config);
        if let Err(e) = &rig {
            warn!("{e}");
        }

        let report = BuildReport {
            token,
            purged,
            attributes,
            assembly,
            composite,
            rig,
            elapsed: start.elapsed(),
        };
        info!(
            "Token {token}: built {} parts in {:?}{}",
            report.assembly.parts.len(),
            report.elapsed,
            if report.is_complete() { "" } else { " with failures" }
        );
        report
    }

    pub async fn export_character(&self, token: TokenId) -> Result<PathBuf, ExportError> {
        package::export(&self.scene, token, &self.config).await
    }
}
