//! Evidence attached to verdicts
//!
//! Each verdict carries the facts it was reached on. Primary evidence comes
//! from the classifier, `validation_*` kinds from the secondary validator.

use serde::{Deserialize, Serialize};

/// Kinds of evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// A site success or not-found pattern matched
    Pattern,
    /// `<link rel="canonical">` pointing at the profile
    Canonical,
    /// `og:url` pointing at the profile
    #[serde(rename = "og:url")]
    OgUrl,
    /// Post-redirect URL pointing at the profile
    FinalUrl,
    /// Handle present in the body, no URL evidence
    #[serde(rename = "username-text")]
    UsernameText,
    ValidationCanonical,
    ValidationOgTitle,
    ValidationOgUrl,
    ValidationProfileImage,
    ValidationSchema,
    ValidationUsernameMentions,
    #[serde(rename = "validation_head_200")]
    ValidationHead200,
    #[serde(rename = "validation_head_404")]
    ValidationHead404,
    ValidationRedirectNotfound,
    ValidationRedirectUsername,
    ValidationContentType,
    ValidationServer,
    ValidationCache,
    ValidationJsonApi,
}

impl EvidenceKind {
    /// URL evidence about the profile location itself
    pub fn is_profile_url(&self) -> bool {
        matches!(self, Self::Canonical | Self::OgUrl | Self::FinalUrl)
    }
}

/// A typed, valued fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub value: String,
}

impl Evidence {
    pub fn new(kind: EvidenceKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
