//! Error types for every pipeline stage.
//!
//! Catalog and configuration errors are fatal to the call that hit them.
//! Part, composite and rig failures are recorded in a
//! [`BuildReport`](crate::context::BuildReport) and never abort a build.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::TokenId;

/// Reading the catalog or the token assignments failed.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("malformed json in {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogError {
    pub(crate) fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// A single part could not be added to a character.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartFailure {
    #[error("token {token}: {category} asset not found: {}", path.display())]
    AssetNotFound {
        token: TokenId,
        category: String,
        path: PathBuf,
    },

    #[error("token {token}: {category} asset {} could not be imported: {reason}", path.display())]
    ImportFailed {
        token: TokenId,
        category: String,
        path: PathBuf,
        reason: String,
    },
}

/// The face texture could not be composited onto the head material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositeFailure {
    #[error("token {token}: face texture not found: {}", path.display())]
    TextureNotFound { token: TokenId, path: PathBuf },

    #[error("token {token}: face texture {} could not be loaded: {reason}", path.display())]
    TextureLoad {
        token: TokenId,
        path: PathBuf,
        reason: String,
    },

    #[error("token {token}: no head object with {wanted} in the scene")]
    HeadObjectNotFound { token: TokenId, wanted: String },

    #[error("token {token}: head object {object} has no material")]
    MaterialMissing { token: TokenId, object: String },

    #[error("token {token}: material {material} has no principled node")]
    PrincipledNodeNotFound { token: TokenId, material: String },

    #[error("token {token}: no {label} texture feeds the emission of material {material} (face {face})")]
    EmissiveSourceNotFound {
        token: TokenId,
        material: String,
        label: String,
        face: String,
    },

    #[error("token {token}: neither base color nor emission texture found in material {material} (face {face})")]
    NoBlendTarget {
        token: TokenId,
        material: String,
        face: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RigFailure {
    #[error("token {token}: no armature found in the scene")]
    NoArmatureFound { token: TokenId },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("token {token}: character {name} not found, build it before exporting")]
    CharacterNotFound { token: TokenId, name: String },

    #[error("token {token}: could not write {}: {source}", path.display())]
    Write {
        token: TokenId,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// A batch entry that is not a usable token id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token {0:?} is not a number")]
    NotANumber(String),

    #[error("token {token} is outside 1..={max}")]
    OutOfRange { token: i64, max: u32 },
}

/// The batch input file could not be used.
#[derive(Error, Debug)]
pub enum BatchFileError {
    #[error("batch file {} is not a .json file", .0.display())]
    NotJson(PathBuf),

    #[error("batch file {} must hold a json array of token ids", .0.display())]
    NotAnArray(PathBuf),

    #[error(transparent)]
    Read(#[from] CatalogError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
