//! Assembler configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all) gives
//! the stock layout: `resources/available.json`, `resources/combined_data.json`
//! and part assets under `resources/All_Assets_FWY`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{catalog::TokenId, error::ConfigError};

/// How an object is recognised as the head when compositing the face.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "match", content = "value")]
pub enum HeadMatch {
    /// Case-insensitive substring of the object name.
    NameContains(String),
    /// Exact category tag written by the assembler.
    Category(String),
}

impl Default for HeadMatch {
    fn default() -> Self {
        Self::NameContains("head".to_string())
    }
}

impl HeadMatch {
    pub fn matches(&self, name: &str, category: Option<&str>) -> bool {
        match self {
            HeadMatch::NameContains(needle) => {
                name.to_lowercase().contains(&needle.to_lowercase())
            }
            HeadMatch::Category(wanted) => category == Some(wanted.as_str()),
        }
    }
}

impl std::fmt::Display for HeadMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeadMatch::NameContains(needle) => write!(f, "a name containing {needle:?}"),
            HeadMatch::Category(wanted) => write!(f, "category {wanted:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Pause between two tokens, giving the host time to release resources.
    pub settle_ms: u64,
    /// Every object of the i-th token is moved `i * offset_x` along X.
    pub offset_x: f32,
    /// Export each successfully rigged token into `glb_folder`.
    pub export: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            offset_x: 0.5,
            export: false,
        }
    }
}

impl BatchConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssemblerConfig {
    pub resources_dir: PathBuf,
    pub catalog_file: PathBuf,
    pub assignment_file: PathBuf,
    pub asset_dir: PathBuf,
    pub glb_folder: PathBuf,
    pub model_ext: String,
    pub image_ext: String,
    /// Prefix of the armature name, `"{prefix} {token}"`.
    pub namespace_prefix: String,
    /// Head option whose face is blended into the emission instead of the base colour.
    pub sentinel_head_id: String,
    pub head_match: HeadMatch,
    pub max_token: u32,
    pub batch: BatchConfig,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            resources_dir: PathBuf::from("resources"),
            catalog_file: PathBuf::from("available.json"),
            assignment_file: PathBuf::from("combined_data.json"),
            asset_dir: PathBuf::from("All_Assets_FWY"),
            glb_folder: PathBuf::from("exports"),
            model_ext: "glb".to_string(),
            image_ext: "png".to_string(),
            namespace_prefix: "fRiENDSiES".to_string(),
            sentinel_head_id: "678d5c8760".to_string(),
            head_match: HeadMatch::default(),
            max_token: 10000,
            batch: BatchConfig::default(),
        }
    }
}

impl AssemblerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents, path)
    }

    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Convenience constructor for a resources directory with the stock layout.
    pub fn with_resources(resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            resources_dir: resources_dir.into(),
            ..Self::default()
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.resources_dir.join(path)
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.resolve(&self.catalog_file)
    }

    pub fn assignment_path(&self) -> PathBuf {
        self.resolve(&self.assignment_file)
    }

    pub fn asset_root(&self) -> PathBuf {
        self.resolve(&self.asset_dir)
    }

    pub fn glb_folder(&self) -> PathBuf {
        self.resolve(&self.glb_folder)
    }

    /// `{asset_root}/{option_id}.{model_ext}`
    pub fn model_path(&self, option_id: &str) -> PathBuf {
        self.asset_root()
            .join(format!("{option_id}.{}", self.model_ext))
    }

    /// `{asset_root}/{option_id}.{image_ext}`
    pub fn texture_path(&self, option_id: &str) -> PathBuf {
        self.asset_root()
            .join(format!("{option_id}.{}", self.image_ext))
    }

    pub fn armature_name(&self, token: TokenId) -> String {
        format!("{} {}", self.namespace_prefix, token)
    }

    /// `{glb_folder}/Character_{token}.{model_ext}`
    pub fn export_path(&self, token: TokenId) -> PathBuf {
        self.glb_folder()
            .join(format!("Character_{token}.{}", self.model_ext))
    }
}
