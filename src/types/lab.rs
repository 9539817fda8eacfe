//! Lab (secondary entity) data joined onto reservations for display

use serde::{Deserialize, Serialize};

use super::subject::LabId;

/// Base lab entity as read from the backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lab {
    pub id: LabId,
    /// Metadata document URI
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    /// Access authentication endpoint; present when the lab requires auth
    #[serde(default)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl Lab {
    pub fn requires_auth(&self) -> bool {
        self.auth_uri
            .as_deref()
            .map(|uri| !uri.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Off-chain metadata document referenced by [`Lab::uri`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub docs: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Lab owner (provider) record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabOwner {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Display-ready lab data, merged once per lab id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabDetails {
    pub id: LabId,
    pub name: String,
    pub owner: Option<String>,
    pub owner_name: Option<String>,
    pub auth_required: bool,
    pub images: Vec<String>,
    pub docs: Vec<String>,
    pub category: Option<String>,
    /// Some piece of the join was missing
    pub degraded: bool,
}

impl LabDetails {
    pub fn fallback_name(id: LabId) -> String {
        format!("Lab {}", id)
    }

    /// Details carrying only the fallback display name
    pub fn fallback(id: LabId) -> Self {
        Self::merge(id, None, None, None)
    }

    /// Merge whatever pieces resolved. Missing pieces never fail the merge.
    pub fn merge(
        id: LabId,
        base: Option<&Lab>,
        metadata: Option<&LabMetadata>,
        owner: Option<&LabOwner>,
    ) -> Self {
        let name = metadata
            .and_then(|m| m.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Self::fallback_name(id));

        Self {
            id,
            name,
            owner: owner
                .map(|o| o.address.clone())
                .or_else(|| base.and_then(|b| b.owner.clone())),
            owner_name: owner.and_then(|o| o.name.clone()),
            auth_required: base.map(Lab::requires_auth).unwrap_or(false),
            images: metadata.map(|m| m.images.clone()).unwrap_or_default(),
            docs: metadata.map(|m| m.docs.clone()).unwrap_or_default(),
            category: metadata.and_then(|m| m.category.clone()),
            degraded: base.is_none() || metadata.is_none() || owner.is_none(),
        }
    }
}
