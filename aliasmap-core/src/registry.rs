//! Site registry
//!
//! Loads the builtin site table, optionally merged with a TOML file of
//! extra or overriding `[[sites]]` entries. A malformed entry is logged and
//! left out; the remaining sites still load.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::hooks::hooks_for;
use crate::site::{
    default_timeout, Normalization, NormalizationDef, RiskTag, SiteDefinition, SitePattern,
    SiteSpec, Tier,
};
use crate::HANDLE_PLACEHOLDER;

/// Errors from building the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Site definition has an empty id")]
    EmptyId,

    #[error("Site {site}: URL template must contain exactly one {{handle}} placeholder, found {count}")]
    Placeholder { site: String, count: usize },

    #[error("Site {site}: invalid URL template {url}")]
    InvalidUrl { site: String, url: String },

    #[error("Site {site}: invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        site: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("Duplicate site id: {0}")]
    DuplicateId(String),

    #[error("Failed to parse site file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read site file: {0}")]
    Io(#[from] std::io::Error),
}

/// Compile one declarative entry
pub(crate) fn compile_definition(def: &SiteDefinition) -> Result<SiteSpec, RegistryError> {
    let site = def.id.trim();
    if site.is_empty() {
        return Err(RegistryError::EmptyId);
    }

    let count = def.url.matches(HANDLE_PLACEHOLDER).count();
    if count != 1 {
        return Err(RegistryError::Placeholder {
            site: site.to_string(),
            count,
        });
    }
    if Url::parse(&def.url.replace(HANDLE_PLACEHOLDER, "handle")).is_err() {
        return Err(RegistryError::InvalidUrl {
            site: site.to_string(),
            url: def.url.clone(),
        });
    }

    let case_insensitive = !def.normalization.case_sensitive;
    let compile = |patterns: &[String]| -> Result<Vec<SitePattern>, RegistryError> {
        patterns
            .iter()
            .map(|p| {
                SitePattern::compile(p, case_insensitive).map_err(|source| {
                    RegistryError::InvalidPattern {
                        site: site.to_string(),
                        pattern: p.clone(),
                        source,
                    }
                })
            })
            .collect()
    };

    let allowed = match &def.normalization.allowed {
        Some(pattern) => Some(Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
            RegistryError::InvalidPattern {
                site: site.to_string(),
                pattern: pattern.clone(),
                source,
            }
        })?),
        None => None,
    };

    Ok(SiteSpec {
        id: site.to_string(),
        tier: def.tier,
        url_template: def.url.clone(),
        success_patterns: compile(&def.success_patterns)?,
        not_found_patterns: compile(&def.not_found_patterns)?,
        timeout: def
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(default_timeout),
        normalization: Normalization {
            case_sensitive: def.normalization.case_sensitive,
            allowed,
        },
        risk: def.risk,
        hooks: hooks_for(site),
    })
}

#[derive(Debug, Deserialize)]
struct SiteFile {
    #[serde(default)]
    sites: Vec<SiteDefinition>,
}

/// Read-only set of compiled sites, in declaration order
#[derive(Debug, Default)]
pub struct SiteRegistry {
    sites: Vec<Arc<SiteSpec>>,
    index: HashMap<String, usize>,
    rejected: Vec<RegistryError>,
}

impl SiteRegistry {
    /// Registry of the builtin sites
    pub fn builtin() -> Self {
        Self::from_definitions(builtin_definitions())
    }

    /// Compile definitions, skipping malformed ones
    pub fn from_definitions(definitions: impl IntoIterator<Item = SiteDefinition>) -> Self {
        let mut registry = Self::default();
        registry.extend(definitions);
        registry
    }

    /// Registry of only the sites in a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, RegistryError> {
        let file: SiteFile = toml::from_str(raw)?;
        Ok(Self::from_definitions(file.sites))
    }

    /// Builtin sites merged with a TOML site file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: SiteFile = toml::from_str(&raw)?;
        let mut registry = Self::builtin();
        registry.merge(file.sites);
        Ok(registry)
    }

    /// Add definitions; an id already present is replaced in place
    pub fn merge(&mut self, definitions: impl IntoIterator<Item = SiteDefinition>) {
        for def in definitions {
            match compile_definition(&def) {
                Ok(spec) => match self.index.get(&spec.id) {
                    Some(&pos) => {
                        debug!("Overriding site {}", spec.id);
                        self.sites[pos] = Arc::new(spec);
                    }
                    None => self.push(spec),
                },
                Err(e) => self.reject(e),
            }
        }
    }

    fn extend(&mut self, definitions: impl IntoIterator<Item = SiteDefinition>) {
        for def in definitions {
            match compile_definition(&def) {
                Ok(spec) if self.index.contains_key(&spec.id) => {
                    self.reject(RegistryError::DuplicateId(spec.id))
                }
                Ok(spec) => self.push(spec),
                Err(e) => self.reject(e),
            }
        }
    }

    fn push(&mut self, spec: SiteSpec) {
        self.index.insert(spec.id.clone(), self.sites.len());
        self.sites.push(Arc::new(spec));
    }

    fn reject(&mut self, error: RegistryError) {
        warn!("Excluding site: {}", error);
        self.rejected.push(error);
    }

    pub fn get(&self, id: &str) -> Option<&SiteSpec> {
        self.index.get(id).map(|&pos| self.sites[pos].as_ref())
    }

    pub fn sites(&self) -> &[Arc<SiteSpec>] {
        &self.sites
    }

    /// Sites of one tier, or every site for `None`
    pub fn select(&self, tier: Option<Tier>) -> Vec<Arc<SiteSpec>> {
        self.sites
            .iter()
            .filter(|s| tier.map_or(true, |t| s.tier == t))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Definitions excluded at load
    pub fn rejected(&self) -> &[RegistryError] {
        &self.rejected
    }
}

/// Builtin site entry
#[derive(Debug, Clone, Copy)]
struct BuiltinSite {
    id: &'static str,
    tier: Tier,
    url: &'static str,
    success: &'static [&'static str],
    not_found: &'static [&'static str],
    timeout_ms: Option<u64>,
    allowed: Option<&'static str>,
    risk: RiskTag,
}

impl BuiltinSite {
    fn definition(&self) -> SiteDefinition {
        SiteDefinition {
            id: self.id.to_string(),
            tier: self.tier,
            url: self.url.to_string(),
            success_patterns: self.success.iter().map(|s| s.to_string()).collect(),
            not_found_patterns: self.not_found.iter().map(|s| s.to_string()).collect(),
            timeout_ms: self.timeout_ms,
            normalization: NormalizationDef {
                case_sensitive: false,
                allowed: self.allowed.map(String::from),
            },
            risk: self.risk,
        }
    }
}

pub fn builtin_definitions() -> Vec<SiteDefinition> {
    BUILTIN_SITES.iter().map(BuiltinSite::definition).collect()
}

static BUILTIN_SITES: &[BuiltinSite] = &[
    BuiltinSite {
        id: "github",
        tier: Tier::Fundamental,
        url: "https://github.com/{handle}",
        success: &["Followers", "Following", r#"rel="canonical".*github.com/{handle}"#],
        not_found: &["Not Found"],
        timeout_ms: None,
        allowed: Some("[A-Za-z0-9-]{1,39}"),
        risk: RiskTag::Green,
    },
    BuiltinSite {
        id: "telegram",
        tier: Tier::Fundamental,
        url: "https://t.me/{handle}",
        success: &["t.me/{handle}"],
        not_found: &["If you have Telegram, you can contact"],
        timeout_ms: Some(3000),
        allowed: None,
        risk: RiskTag::Red,
    },
    BuiltinSite {
        id: "linkedin",
        tier: Tier::Fundamental,
        url: "https://www.linkedin.com/in/{handle}",
        success: &["LinkedIn", "in/{handle}"],
        not_found: &[
            "This page doesn’t exist",
            "A página não existe",
            "Profile Not Found",
            "Page not found",
        ],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Red,
    },
    BuiltinSite {
        id: "gitlab",
        tier: Tier::Fundamental,
        url: "https://gitlab.com/{handle}",
        success: &[r#"rel="canonical".*gitlab.com/{handle}"#],
        not_found: &["404"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Green,
    },
    BuiltinSite {
        id: "reddit",
        tier: Tier::Fundamental,
        url: "https://www.reddit.com/user/{handle}",
        success: &["u/{handle}", r#"rel="canonical".*reddit.com/user/{handle}"#],
        not_found: &["page not found", "Sorry, nobody on Reddit goes by that name."],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Green,
    },
    BuiltinSite {
        id: "twitter",
        tier: Tier::Fundamental,
        url: "https://x.com/{handle}",
        success: &[
            "Followers",
            "Following",
            "Tweets",
            r#"rel="canonical".*x.com/{handle}"#,
            "Account suspended",
        ],
        not_found: &["This account doesn’t exist", "Try searching for another"],
        timeout_ms: None,
        allowed: Some("[a-z0-9_]{1,15}"),
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "instagram",
        tier: Tier::Fundamental,
        url: "https://www.instagram.com/{handle}/",
        success: &[r#"property="og:url""#, "instagram.com/{handle}"],
        not_found: &["Sorry, this page isn't available.", "Esta página não está disponível"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "youtube",
        tier: Tier::Fundamental,
        url: "https://www.youtube.com/@{handle}",
        success: &["Subscribe", r#"link rel="canonical".*youtube.com/@{handle}"#],
        not_found: &["This page isn’t available"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "tiktok",
        tier: Tier::Fundamental,
        url: "https://www.tiktok.com/@{handle}",
        success: &["Following", "Followers", r#"rel="canonical".*tiktok.com/@{handle}"#],
        not_found: &["Couldn't find this account"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "steam",
        tier: Tier::Fundamental,
        url: "https://steamcommunity.com/id/{handle}",
        success: &[
            "Steam Community",
            r#"rel="canonical".*steamcommunity.com/id/{handle}"#,
        ],
        not_found: &[
            "The specified profile could not be found",
            "No match",
            "was not found",
        ],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Red,
    },
    BuiltinSite {
        id: "flipboard",
        tier: Tier::Fundamental,
        url: "https://flipboard.com/@{handle}",
        success: &["Flipboard", r#"rel="canonical".*flipboard.com/@{handle}"#, "@{handle}"],
        not_found: &["Not Found", "Page not found", "We couldn't find"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "twitch",
        tier: Tier::Fundamental,
        url: "https://www.twitch.tv/{handle}",
        success: &["Followers", r#"rel="canonical".*twitch.tv/{handle}"#],
        not_found: &["Sorry. Unless you’ve got a time machine"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "keybase",
        tier: Tier::Fundamental,
        url: "https://keybase.io/{handle}",
        success: &["Keybase", "proving"],
        not_found: &["Sorry, we couldn't find"],
        timeout_ms: Some(3000),
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "hackernews",
        tier: Tier::Fundamental,
        url: "https://news.ycombinator.com/user?id={handle}",
        success: &["user:", "created:"],
        not_found: &["No such user"],
        timeout_ms: Some(3000),
        allowed: None,
        risk: RiskTag::Red,
    },
    BuiltinSite {
        id: "stackoverflow",
        tier: Tier::Fundamental,
        url: "https://stackoverflow.com/users/{handle}",
        success: &["Stack Overflow", "Profile"],
        not_found: &["Page not found"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "pinterest",
        tier: Tier::Core,
        url: "https://www.pinterest.com/{handle}",
        success: &[r#"rel="canonical".*pinterest.com/{handle}"#],
        not_found: &["Page not found", "User not found"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "medium",
        tier: Tier::Core,
        url: "https://medium.com/@{handle}",
        success: &[],
        not_found: &["Username available", "404", "Page not found"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "slideshare",
        tier: Tier::Core,
        url: "https://www.slideshare.net/{handle}",
        success: &[],
        not_found: &["Username available"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "gravatar",
        tier: Tier::Core,
        url: "https://en.gravatar.com/{handle}",
        success: &[],
        not_found: &["not found", "404"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "ello",
        tier: Tier::Core,
        url: "https://ello.co/{handle}",
        success: &[],
        not_found: &["404", "Page not found"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "tripadvisor",
        tier: Tier::Core,
        url: "https://www.tripadvisor.com/members/{handle}",
        success: &[
            r#"rel="canonical".*tripadvisor.com/Profile/{handle}"#,
            "Profile/{handle}",
        ],
        not_found: &["This page isn’t available", "Page not found", "doesn’t exist"],
        timeout_ms: Some(4000),
        allowed: None,
        risk: RiskTag::Amber,
    },
    BuiltinSite {
        id: "devto",
        tier: Tier::Optional,
        url: "https://dev.to/{handle}",
        success: &[r#"rel="canonical".*dev.to/{handle}"#],
        not_found: &["This page does not exist"],
        timeout_ms: None,
        allowed: None,
        risk: RiskTag::Green,
    },
    BuiltinSite {
        id: "mastodon",
        tier: Tier::Optional,
        url: "https://mastodon.social/@{handle}",
        success: &[r#"rel="canonical".*mastodon.social/@{handle}"#],
        not_found: &["The page you are looking for isn't here"],
        timeout_ms: None,
        allowed: Some("[A-Za-z0-9_]{1,30}"),
        risk: RiskTag::Green,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: &str, url: &str) -> SiteDefinition {
        SiteDefinition {
            id: id.into(),
            tier: Tier::Optional,
            url: url.into(),
            success_patterns: vec![],
            not_found_patterns: vec![],
            timeout_ms: None,
            normalization: Default::default(),
            risk: Default::default(),
        }
    }

    #[test]
    fn test_builtin_registry_loads_cleanly() {
        let registry = SiteRegistry::builtin();
        assert!(registry.rejected().is_empty(), "{:?}", registry.rejected());
        assert_eq!(registry.len(), BUILTIN_SITES.len());
        assert!(registry.get("github").is_some());
        assert_eq!(registry.sites()[0].id, "github");
    }

    #[test]
    fn test_tier_selection_keeps_order() {
        let registry = SiteRegistry::builtin();
        let core = registry.select(Some(Tier::Core));
        assert!(core.iter().all(|s| s.tier == Tier::Core));
        assert_eq!(core[0].id, "pinterest");
        assert_eq!(registry.select(None).len(), registry.len());
    }

    #[test]
    fn test_malformed_sites_excluded() {
        let mut missing = def("missing", "https://example.com/");
        missing.success_patterns.push("x".into());
        let double = def("double", "https://example.com/{handle}/{handle}");
        let mut bad_regex = def("bad", "https://example.com/{handle}");
        bad_regex.not_found_patterns.push("(unclosed".into());
        let good = def("good", "https://example.com/{handle}");

        let registry = SiteRegistry::from_definitions(vec![missing, double, bad_regex, good]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.rejected().len(), 3);
        assert!(matches!(
            registry.rejected()[1],
            RegistryError::Placeholder { count: 2, .. }
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let registry = SiteRegistry::from_definitions(vec![
            def("a", "https://a.example/{handle}"),
            def("a", "https://b.example/{handle}"),
        ]);
        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.rejected()[0], RegistryError::DuplicateId(_)));
    }

    #[test]
    fn test_blank_id_rejected() {
        assert!(matches!(
            compile_definition(&def("  ", "https://x.test/{handle}")),
            Err(RegistryError::EmptyId)
        ));

        let registry = SiteRegistry::from_definitions(vec![
            def("", "https://x.test/{handle}"),
            def("x", "https://x.test/{handle}"),
        ]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("x").is_some());
        assert!(matches!(registry.rejected(), [RegistryError::EmptyId]));
    }

    #[test]
    fn test_toml_sites() {
        let raw = r#"
            [[sites]]
            id = "codeberg"
            tier = "optional"
            url = "https://codeberg.org/{handle}"
            success_patterns = ['rel="canonical".*codeberg.org/{handle}']
            not_found_patterns = ["Not found"]
            timeout_ms = 2500
            risk = "green"

            [sites.normalization]
            allowed = "[a-z0-9_.-]{1,40}"
        "#;
        let registry = SiteRegistry::from_toml_str(raw).unwrap();
        let site = registry.get("codeberg").unwrap();
        assert_eq!(site.tier, Tier::Optional);
        assert_eq!(site.timeout, Duration::from_millis(2500));
        assert!(site.normalize("bad handle").is_none());
        assert_eq!(site.profile_url("alice"), "https://codeberg.org/alice");
    }

    #[test]
    fn test_merge_overrides_in_place() {
        let mut registry = SiteRegistry::builtin();
        let mut github = def("github", "https://github.example/{handle}");
        github.tier = Tier::Fundamental;
        registry.merge(vec![github]);
        assert_eq!(registry.len(), BUILTIN_SITES.len());
        assert_eq!(registry.sites()[0].url_template, "https://github.example/{handle}");
    }

    #[test]
    fn test_builtin_hooks_attached() {
        let registry = SiteRegistry::builtin();
        assert!(!registry.get("instagram").unwrap().hooks.is_empty());
        assert!(registry.get("gitlab").unwrap().hooks.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            SiteRegistry::from_toml_str("[[sites]]\nid = 3"),
            Err(RegistryError::Parse(_))
        ));
    }
}
