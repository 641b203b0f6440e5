//! Catalog store: part options per category and per-token assignments.
//!
//! Both files are JSON. The catalog groups option metadata by category and may
//! be wrapped in a top-level `"assets"` object; assignments map a token id (as
//! a string key) to an ordered `{category: option_id}` object.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{CatalogError, TokenError},
    resources::load_string,
};

/// Identifier of one character instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u32);

impl TokenId {
    /// Parses a token id and checks it lies in `1..=max`.
    pub fn parse(raw: &str, max: u32) -> Result<Self, TokenError> {
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| TokenError::NotANumber(raw.to_string()))?;
        Self::checked(value, max)
    }

    pub fn checked(value: i64, max: u32) -> Result<Self, TokenError> {
        if value < 1 || value > max as i64 {
            return Err(TokenError::OutOfRange { token: value, max });
        }
        Ok(Self(value as u32))
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category name to option id, in the order the assignment file lists them.
/// An empty option id means "no part" for that category.
pub type Assignment = IndexMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: Option<String>,
    pub category: String,
}

#[derive(Deserialize)]
struct OptionRecord {
    name: Option<String>,
    category: Option<String>,
}

type Grouped<T> = IndexMap<String, IndexMap<String, T>>;

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { assets: Grouped<OptionRecord> },
    Bare(Grouped<OptionRecord>),
}

/// Option metadata grouped by category, plus a flattened option id → name
/// index. Option ids are assumed unique across categories.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    categories: Grouped<CatalogEntry>,
    names: HashMap<String, String>,
}

impl Catalog {
    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = load_string(path)
            .await
            .map_err(|e| CatalogError::from_io(path, e))?;
        Self::from_json_str(&text, path)
    }

    pub fn from_json_str(text: &str, path: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(text).map_err(|source| CatalogError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        let grouped = match file {
            CatalogFile::Wrapped { assets } => assets,
            CatalogFile::Bare(grouped) => grouped,
        };
        let mut names = HashMap::new();
        let categories = grouped
            .into_iter()
            .map(|(category, options)| {
                let options = options
                    .into_iter()
                    .map(|(option_id, record)| {
                        if let Some(name) = &record.name {
                            // a later category wins a duplicated id
                            names.insert(option_id.clone(), name.clone());
                        }
                        let entry = CatalogEntry {
                            name: record.name,
                            category: record.category.unwrap_or_else(|| category.clone()),
                        };
                        (option_id, entry)
                    })
                    .collect();
                (category, options)
            })
            .collect();
        Ok(Self { categories, names })
    }

    /// Display name of an option, searched across all categories.
    pub fn display_name(&self, option_id: &str) -> Option<&str> {
        self.names.get(option_id).map(String::as_str)
    }

    pub fn entry(&self, category: &str, option_id: &str) -> Option<&CatalogEntry> {
        self.categories.get(category)?.get(option_id)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn option_count(&self) -> usize {
        self.categories.values().map(IndexMap::len).sum()
    }
}

/// Every token's assignment, loaded once.
#[derive(Clone, Debug, Default)]
pub struct TokenAssignments {
    path: PathBuf,
    records: HashMap<String, Assignment>,
}

impl TokenAssignments {
    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = load_string(path)
            .await
            .map_err(|e| CatalogError::from_io(path, e))?;
        Self::from_json_str(&text, path)
    }

    pub fn from_json_str(text: &str, path: &Path) -> Result<Self, CatalogError> {
        let raw: Grouped<serde_json::Value> =
            serde_json::from_str(text).map_err(|source| CatalogError::Format {
                path: path.to_path_buf(),
                source,
            })?;
        let records = raw
            .into_iter()
            .map(|(token, parts)| {
                let parts = parts
                    .into_iter()
                    .map(|(category, value)| (category, option_id_of(value)))
                    .collect();
                (token.trim().to_string(), parts)
            })
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// The token's assignment; a token without a record has no parts.
    pub fn get(&self, token: TokenId) -> Assignment {
        match self.records.get(&token.to_string()) {
            Some(assignment) => assignment.clone(),
            None => {
                log::debug!("No assignment for token {token} in {}", self.path.display());
                Assignment::new()
            }
        }
    }

    pub fn contains(&self, token: TokenId) -> bool {
        self.records.contains_key(&token.to_string())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn option_id_of(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub async fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    Catalog::load(path).await
}

/// One token's assignment straight from the file, `{}` when it has no record.
pub async fn load_token_assignment(path: &Path, token: TokenId) -> Result<Assignment, CatalogError> {
    Ok(TokenAssignments::load(path).await?.get(token))
}
