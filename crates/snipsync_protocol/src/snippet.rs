//! Snippet data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header map attached to a snippet request.
pub type HeaderMap = BTreeMap<String, String>;

/// Custom property map, opaque to the sync core.
pub type PropMap = BTreeMap<String, serde_json::Value>;

/// Content type of an injectable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceKind {
    /// A stylesheet.
    Css,
    /// A script.
    Js,
    /// Anything else.
    Other,
}

/// An injectable resource attached to a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicResource {
    /// Resource URL.
    pub url: String,
    /// Resource content type.
    #[serde(rename = "contentType")]
    pub kind: ResourceKind,
}

impl DynamicResource {
    /// Creates a new resource entry.
    pub fn new(url: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }
}

/// Rendering engine hint. Opaque to the sync core beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RenderEngine {
    /// No engine; content is rendered as-is.
    None,
    /// Mustache-style template interpolation.
    Mustache,
    /// An engine this core does not know about.
    Other(String),
}

impl Default for RenderEngine {
    fn default() -> Self {
        RenderEngine::None
    }
}

impl From<String> for RenderEngine {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "none" => RenderEngine::None,
            "mustache" => RenderEngine::Mustache,
            _ => RenderEngine::Other(value),
        }
    }
}

impl From<RenderEngine> for String {
    fn from(value: RenderEngine) -> Self {
        match value {
            RenderEngine::None => "none".into(),
            RenderEngine::Mustache => "mustache".into(),
            RenderEngine::Other(name) => name,
        }
    }
}

/// Visibility window of a snippet.
///
/// A snippet with no visibility window is always visible. Once `until_utc`
/// (server time, epoch milliseconds) has passed, the snippet must be treated
/// as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    /// Instant after which the snippet is no longer visible.
    #[serde(rename = "untilUtc")]
    pub until_utc: i64,
}

impl Visibility {
    /// Creates a visibility window ending at the given instant.
    pub fn until(until_utc: i64) -> Self {
        Self { until_utc }
    }
}

/// A unit of remote content plus routing/display metadata.
///
/// `id` is immutable once created. `load_iteration` only ever increases; it
/// is bumped when the content body changed without a metadata change, telling
/// consumers to reload the content instead of just re-rendering metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    /// Identity, unique within a collection.
    pub id: String,
    /// Target URL.
    pub target: String,
    /// Request headers.
    #[serde(default)]
    pub headers: HeaderMap,
    /// Ordered injectable resources.
    #[serde(default)]
    pub dynamic_resources: Vec<DynamicResource>,
    /// Custom properties, opaque to the core.
    #[serde(default)]
    pub props: PropMap,
    /// Rendering engine hint.
    #[serde(default)]
    pub engine: RenderEngine,
    /// Visibility window; `None` means always visible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Content reload counter.
    #[serde(default)]
    pub load_iteration: u64,
}

impl Snippet {
    /// Creates a snippet with the given identity and target, everything else
    /// empty.
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            headers: HeaderMap::new(),
            dynamic_resources: Vec::new(),
            props: PropMap::new(),
            engine: RenderEngine::None,
            visibility: None,
            load_iteration: 0,
        }
    }

    /// Sets the headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the injectable resources.
    pub fn with_resources(mut self, resources: Vec<DynamicResource>) -> Self {
        self.dynamic_resources = resources;
        self
    }

    /// Sets the custom properties.
    pub fn with_props(mut self, props: PropMap) -> Self {
        self.props = props;
        self
    }

    /// Sets the rendering engine.
    pub fn with_engine(mut self, engine: RenderEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the visibility window.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Returns true if the snippet's visibility window has elapsed at the
    /// given server-time instant.
    pub fn is_expired_at(&self, server_now_millis: i64) -> bool {
        match self.visibility {
            Some(window) => window.until_utc <= server_now_millis,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_roundtrip_preserves_all_fields() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization".into(), "Bearer x".into());
        let mut props = PropMap::new();
        props.insert("weight".into(), serde_json::json!(3));

        let snippet = Snippet::new("s-1", "https://example.com/banner")
            .with_headers(headers)
            .with_resources(vec![DynamicResource::new(
                "https://cdn.example.com/a.css",
                ResourceKind::Css,
            )])
            .with_props(props)
            .with_engine(RenderEngine::Mustache)
            .with_visibility(Visibility::until(1_700_000_000_000));

        let mut snippet = snippet;
        snippet.load_iteration = 7;

        let json = serde_json::to_string(&snippet).unwrap();
        let decoded: Snippet = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, snippet);
        assert_eq!(decoded.visibility, Some(Visibility::until(1_700_000_000_000)));
        assert_eq!(decoded.load_iteration, 7);
    }

    #[test]
    fn snippet_decodes_with_missing_optionals() {
        let decoded: Snippet =
            serde_json::from_str(r#"{"id":"s-1","target":"https://example.com"}"#).unwrap();

        assert_eq!(decoded.id, "s-1");
        assert!(decoded.headers.is_empty());
        assert!(decoded.dynamic_resources.is_empty());
        assert!(decoded.props.is_empty());
        assert_eq!(decoded.engine, RenderEngine::None);
        assert!(decoded.visibility.is_none());
        assert_eq!(decoded.load_iteration, 0);
    }

    #[test]
    fn engine_maps_unknown_names_to_other() {
        let engine: RenderEngine = serde_json::from_str(r#""liquid""#).unwrap();
        assert_eq!(engine, RenderEngine::Other("liquid".into()));

        let engine: RenderEngine = serde_json::from_str(r#""mustache""#).unwrap();
        assert_eq!(engine, RenderEngine::Mustache);
    }

    #[test]
    fn expiry_check_uses_server_time() {
        let snippet =
            Snippet::new("s-1", "https://example.com").with_visibility(Visibility::until(1_000));

        assert!(!snippet.is_expired_at(999));
        assert!(snippet.is_expired_at(1_000));
        assert!(snippet.is_expired_at(1_001));

        let always = Snippet::new("s-2", "https://example.com");
        assert!(!always.is_expired_at(i64::MAX));
    }
}
