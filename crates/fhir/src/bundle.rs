//! Bundle wire model: transaction requests/responses and search result sets.
//!
//! Entry resources are kept as raw JSON so a single bundle can carry any mix of resource types;
//! callers convert them with [`crate::Resources::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Bundles carry their `resourceType` as a typed marker so that serde can validate it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleMarker {
    #[default]
    Bundle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    Searchset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    pub method: HttpVerb,
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_none_exist: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BundleResponse {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl BundleResponse {
    /// The numeric part of `status` ("201 Created" → 201).
    pub fn status_code(&self) -> Option<u16> {
        self.status.split_whitespace().next()?.parse().ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Match,
    Include,
    Outcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BundleSearch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SearchMode>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleResponse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleSearch>,
}

impl BundleEntry {
    /// Search entries without a mode are treated as matches.
    pub fn is_match(&self) -> bool {
        self.search
            .as_ref()
            .and_then(|s| s.mode)
            .map_or(true, |mode| mode == SearchMode::Match)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(rename = "resourceType", default)]
    pub resource_type: BundleMarker,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: BundleMarker::Bundle,
            id: None,
            bundle_type,
            total: None,
            entry: Vec::new(),
        }
    }

    /// Resources of entries in search mode `match`.
    pub fn matches(&self) -> impl Iterator<Item = &Value> {
        self.entry
            .iter()
            .filter(|e| e.is_match())
            .filter_map(|e| e.resource.as_ref())
    }

    /// Resources of entries in search mode `include`.
    pub fn included(&self) -> impl Iterator<Item = &Value> {
        self.entry
            .iter()
            .filter(|e| !e.is_match())
            .filter_map(|e| e.resource.as_ref())
    }
}
