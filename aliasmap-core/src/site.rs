//! Site specifications
//!
//! A [`SiteSpec`] is the compiled, immutable form of a declarative
//! [`SiteDefinition`]. Patterns are compiled once at load; patterns that
//! embed `{handle}` are re-compiled per probe with the escaped handle.

use std::fmt;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::hooks::SiteHooks;
use crate::{DEFAULT_TIMEOUT_MS, HANDLE_PLACEHOLDER};

/// Priority bucket controlling which sites a scan covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Fundamental,
    #[default]
    Core,
    Optional,
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fundamental" => Ok(Self::Fundamental),
            "core" => Ok(Self::Core),
            "optional" => Ok(Self::Optional),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// How much a site tolerates automated probing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTag {
    Green,
    #[default]
    Amber,
    Red,
}

/// Declarative handle rules as written in a site file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationDef {
    pub case_sensitive: bool,
    /// Regex the whole handle must match
    pub allowed: Option<String>,
}

/// Declarative site entry, deserialized from TOML or built from the builtin table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDefinition {
    pub id: String,
    #[serde(default)]
    pub tier: Tier,
    pub url: String,
    #[serde(default)]
    pub success_patterns: Vec<String>,
    #[serde(default)]
    pub not_found_patterns: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub normalization: NormalizationDef,
    #[serde(default)]
    pub risk: RiskTag,
}

/// Compiled handle rules
#[derive(Debug, Clone)]
pub struct Normalization {
    pub case_sensitive: bool,
    pub allowed: Option<Regex>,
}

impl Normalization {
    /// Lowercase unless case-sensitive, then check the allowed pattern.
    pub fn apply(&self, raw: &str) -> Option<String> {
        let handle = raw.trim();
        if handle.is_empty() {
            return None;
        }
        let handle = if self.case_sensitive {
            handle.to_string()
        } else {
            handle.to_lowercase()
        };
        match &self.allowed {
            Some(allowed) if !allowed.is_match(&handle) => None,
            _ => Some(handle),
        }
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Static(Regex),
    Templated,
}

/// A success or not-found pattern
#[derive(Debug, Clone)]
pub struct SitePattern {
    source: String,
    case_insensitive: bool,
    compiled: Compiled,
}

impl SitePattern {
    pub fn compile(source: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let compiled = if source.contains(HANDLE_PLACEHOLDER) {
            // Validate the shape now; the real regex is built per handle.
            build_regex(&source.replace(HANDLE_PLACEHOLDER, "handle"), case_insensitive)?;
            Compiled::Templated
        } else {
            Compiled::Static(build_regex(source, case_insensitive)?)
        };
        Ok(Self {
            source: source.to_string(),
            case_insensitive,
            compiled,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn embeds_handle(&self) -> bool {
        matches!(self.compiled, Compiled::Templated)
    }

    /// Pattern text with the handle filled in, used as evidence
    pub fn describe(&self, handle: &str) -> String {
        self.source.replace(HANDLE_PLACEHOLDER, handle)
    }

    pub fn is_match(&self, body: &str, handle: &str) -> bool {
        match &self.compiled {
            Compiled::Static(re) => re.is_match(body),
            Compiled::Templated => {
                let expanded = self
                    .source
                    .replace(HANDLE_PLACEHOLDER, &regex::escape(handle));
                build_regex(&expanded, self.case_insensitive)
                    .map(|re| re.is_match(body))
                    .unwrap_or(false)
            }
        }
    }
}

fn build_regex(source: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(case_insensitive)
        .multi_line(true)
        .build()
}

/// Compiled, immutable site spec
pub struct SiteSpec {
    pub id: String,
    pub tier: Tier,
    pub url_template: String,
    pub success_patterns: Vec<SitePattern>,
    pub not_found_patterns: Vec<SitePattern>,
    pub timeout: Duration,
    pub normalization: Normalization,
    pub risk: RiskTag,
    pub hooks: SiteHooks,
}

impl fmt::Debug for SiteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteSpec")
            .field("id", &self.id)
            .field("tier", &self.tier)
            .field("url_template", &self.url_template)
            .field("timeout", &self.timeout)
            .field("risk", &self.risk)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl SiteSpec {
    pub fn normalize(&self, raw: &str) -> Option<String> {
        self.normalization.apply(raw)
    }

    /// Profile URL for an already-normalized handle
    pub fn profile_url(&self, handle: &str) -> String {
        self.url_template
            .replace(HANDLE_PLACEHOLDER, &urlencoding::encode(handle))
    }

    pub fn case_insensitive(&self) -> bool {
        !self.normalization.case_sensitive
    }

    /// Success patterns, handle-embedding ones first
    pub fn ordered_success_patterns(&self) -> impl Iterator<Item = &SitePattern> {
        let templated = self.success_patterns.iter().filter(|p| p.embeds_handle());
        let generic = self.success_patterns.iter().filter(|p| !p.embeds_handle());
        templated.chain(generic)
    }

    /// Build a spec with builtin-style defaults, for tests and ad-hoc callers
    pub fn from_definition(def: &SiteDefinition) -> Result<Self, crate::RegistryError> {
        crate::registry::compile_definition(def)
    }
}

pub(crate) fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}
