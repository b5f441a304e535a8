//! Evidence extraction from profile pages
//!
//! Pulls the identity hints a profile page carries:
//! - `<link rel="canonical">` and `og:url`
//! - JSON-LD `@type`, `name` and `image`
//! - profile image, title and description with fallbacks
//!
//! Every field is "first non-empty wins" in the priority order listed on
//! [`PageEvidence::parse`].

use std::collections::HashMap;
use std::sync::LazyLock;

use reqwest::Url;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::result::ProfileMeta;
use crate::HANDLE_PLACEHOLDER;

static META_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta").unwrap());
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[rel][href]").unwrap());
static LD_JSON_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

/// Structured data from the first JSON-LD object on the page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredData {
    pub schema_type: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
}

impl StructuredData {
    fn from_value(value: &Value) -> Option<Self> {
        let object = match value {
            Value::Object(map) => match map.get("@graph") {
                Some(Value::Array(graph)) => graph.iter().find(|v| v.is_object())?,
                _ => value,
            },
            Value::Array(items) => items.iter().find(|v| v.is_object())?,
            _ => return None,
        };

        let schema_type = match object.get("@type") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(types)) => types.iter().find_map(|t| t.as_str().map(String::from)),
            _ => None,
        };
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let image = match object.get("image") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(images)) => images.iter().find_map(|i| match i {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("url").and_then(Value::as_str).map(String::from),
                _ => None,
            }),
            Some(Value::Object(o)) => o.get("url").and_then(Value::as_str).map(String::from),
            _ => None,
        };

        Some(Self {
            schema_type,
            name,
            image,
        })
    }

    /// `@type` names a person or profile page
    pub fn is_profile(&self) -> bool {
        matches!(self.schema_type.as_deref(), Some("Person") | Some("ProfilePage"))
    }
}

/// Identity hints extracted from one response body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageEvidence {
    pub canonical: Option<String>,
    pub og_url: Option<String>,
    pub og_title: Option<String>,
    /// Raw `og:image`, unresolved
    pub og_image: Option<String>,
    pub touch_icon: Option<String>,
    pub structured: Option<StructuredData>,
    /// Best profile image, resolved against the request URL
    pub image: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl PageEvidence {
    /// Parse a body fetched from `base_url`.
    ///
    /// Image priority: JSON-LD image, `og:image:secure_url`, `og:image`,
    /// `twitter:image`, `<link rel="image_src">`. Title priority: JSON-LD
    /// name, `og:title`, `<title>`. Description: `og:description`, then
    /// `<meta name="description">`.
    pub fn parse(body: &str, base_url: &str) -> Self {
        let document = Html::parse_document(body);

        let mut meta: HashMap<String, String> = HashMap::new();
        for element in document.select(&META_SELECTOR) {
            let value = element.value();
            let key = value.attr("property").or_else(|| value.attr("name"));
            let content = value.attr("content").map(str::trim).filter(|c| !c.is_empty());
            if let (Some(key), Some(content)) = (key, content) {
                meta.entry(key.to_ascii_lowercase())
                    .or_insert_with(|| content.to_string());
            }
        }

        let mut links: HashMap<String, String> = HashMap::new();
        for element in document.select(&LINK_SELECTOR) {
            let value = element.value();
            let (Some(rel), Some(href)) = (value.attr("rel"), value.attr("href")) else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() {
                continue;
            }
            for token in rel.split_ascii_whitespace() {
                links
                    .entry(token.to_ascii_lowercase())
                    .or_insert_with(|| href.to_string());
            }
        }

        let structured = document.select(&LD_JSON_SELECTOR).find_map(|script| {
            let raw = script.text().collect::<String>();
            serde_json::from_str::<Value>(raw.trim())
                .ok()
                .and_then(|v| StructuredData::from_value(&v))
        });

        let page_title = document
            .select(&TITLE_SELECTOR)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let image = structured
            .as_ref()
            .and_then(|s| s.image.clone())
            .or_else(|| meta.get("og:image:secure_url").cloned())
            .or_else(|| meta.get("og:image").cloned())
            .or_else(|| meta.get("twitter:image").cloned())
            .or_else(|| links.get("image_src").cloned())
            .map(|src| resolve_url(base_url, &src).unwrap_or(src));

        let title = structured
            .as_ref()
            .and_then(|s| s.name.clone())
            .or_else(|| meta.get("og:title").cloned())
            .or(page_title);

        let description = meta
            .get("og:description")
            .or_else(|| meta.get("description"))
            .cloned();

        Self {
            canonical: links.get("canonical").cloned(),
            og_url: meta.get("og:url").cloned(),
            og_title: meta.get("og:title").cloned(),
            og_image: meta.get("og:image").cloned(),
            touch_icon: links.get("apple-touch-icon").cloned(),
            structured,
            image,
            title,
            description,
        }
    }

    pub fn profile_meta(&self) -> ProfileMeta {
        ProfileMeta {
            image: self.image.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }
}

/// Resolve a possibly relative URL against a base
pub fn resolve_url(base: &str, candidate: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(candidate).ok().map(String::from)
}

fn normalize_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => host,
    }
}

fn decoded_lower(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
        .to_lowercase()
}

/// Decides whether a URL points at the expected profile
///
/// Hosts are compared case-insensitively with a leading `www.` ignored. The
/// candidate path, lowercased and with trailing slashes stripped, must
/// contain the handle. Templates that put `{handle}` in the query string
/// (`/user?id={handle}`) instead need the same path and a query value equal
/// to the handle.
#[derive(Debug, Clone)]
pub struct ProfileMatcher {
    base: Url,
    host: String,
    handle: String,
    handle_in_query: bool,
}

impl ProfileMatcher {
    /// Matcher for a site URL template expanded with `handle`
    pub fn new(url_template: &str, handle: &str) -> Option<Self> {
        let handle_in_query = url_template
            .split_once('?')
            .is_some_and(|(_, query)| query.contains(HANDLE_PLACEHOLDER));
        let expected = url_template.replace(HANDLE_PLACEHOLDER, &urlencoding::encode(handle));
        let base = Url::parse(&expected).ok()?;
        let host = normalize_host(base.host_str()?);
        Some(Self {
            base,
            host,
            handle: handle.to_lowercase(),
            handle_in_query,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return false;
        }
        let Ok(parsed) = self.base.join(candidate) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        if normalize_host(host) != self.host {
            return false;
        }
        if self.handle_in_query {
            let same_path = decoded_lower(parsed.path()).trim_end_matches('/')
                == decoded_lower(self.base.path()).trim_end_matches('/');
            return same_path
                && parsed
                    .query_pairs()
                    .any(|(_, value)| value.to_lowercase() == self.handle);
        }
        let path = decoded_lower(parsed.path());
        path.trim_end_matches('/').contains(&self.handle)
    }
}
