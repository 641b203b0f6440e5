use std::fmt;

use crate::catalog::{Assignment, Catalog, TokenId};

pub const UNKNOWN_NAME: &str = "Unknown";

/// One category of a token, paired with the catalog's display name for its option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAttribute {
    pub category: String,
    pub option_id: String,
    pub name: String,
}

impl fmt::Display for ResolvedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.category, self.name, self.option_id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedAttributes {
    pub token: Option<TokenId>,
    pub attributes: Vec<ResolvedAttribute>,
}

impl ResolvedAttributes {
    /// The `"{category}: {name} ({option_id})"` lines shown to the user.
    pub fn display_list(&self) -> Vec<String> {
        self.attributes.iter().map(ToString::to_string).collect()
    }

    /// The raw category → option map the assembler works from.
    pub fn assignment(&self) -> Assignment {
        self.attributes
            .iter()
            .map(|a| (a.category.clone(), a.option_id.clone()))
            .collect()
    }

    pub fn option(&self, category: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.category == category)
            .map(|a| a.option_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Projects a token's assignment through the catalog. Pure; keeps the
/// assignment's order and labels options missing from the catalog `Unknown`.
pub fn resolve(token: TokenId, catalog: &Catalog, assignment: &Assignment) -> ResolvedAttributes {
    let attributes = assignment
        .iter()
        .map(|(category, option_id)| ResolvedAttribute {
            category: category.clone(),
            option_id: option_id.clone(),
            name: catalog
                .display_name(option_id)
                .unwrap_or(UNKNOWN_NAME)
                .to_string(),
        })
        .collect();
    ResolvedAttributes {
        token: Some(token),
        attributes,
    }
}
