//! Update actions: CRUD-style deltas against the snippet list.

use crate::snippet::{DynamicResource, HeaderMap, PropMap, RenderEngine, Snippet, Visibility};
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of update action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// A snippet was created.
    Created,
    /// A snippet was updated.
    Updated,
    /// A snippet was deleted.
    Deleted,
}

impl ActionKind {
    /// Wire name of this action kind.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ActionKind::Created => "created",
            ActionKind::Updated => "updated",
            ActionKind::Deleted => "deleted",
        }
    }

    /// Parses a wire name.
    pub fn from_wire_str(value: &str) -> Option<Self> {
        match value {
            "created" => Some(ActionKind::Created),
            "updated" => Some(ActionKind::Updated),
            "deleted" => Some(ActionKind::Deleted),
            _ => None,
        }
    }
}

/// Partial snippet payload carried by an update action.
///
/// Every field except `id` is optional; `None` means "field not present in
/// this delta". `visibility` is doubly optional so an explicit wire `null`
/// (clear the window) is distinguishable from an absent key (retain).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetDelta {
    /// Identity of the affected snippet.
    pub id: String,
    /// New target URL, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// New headers, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    /// New visibility window. Outer `None`: absent. `Some(None)`: cleared.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub visibility: Option<Option<Visibility>>,
    /// New resource list, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_resources: Option<Vec<DynamicResource>>,
    /// New properties, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<PropMap>,
    /// New rendering engine, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<RenderEngine>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl SnippetDelta {
    /// Creates a delta carrying only an identity.
    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Creates a delta restating every field of an existing snippet.
    pub fn from_snippet(snippet: &Snippet) -> Self {
        Self {
            id: snippet.id.clone(),
            target: Some(snippet.target.clone()),
            headers: Some(snippet.headers.clone()),
            visibility: Some(snippet.visibility),
            dynamic_resources: Some(snippet.dynamic_resources.clone()),
            props: Some(snippet.props.clone()),
            engine: Some(snippet.engine.clone()),
        }
    }

    /// Sets the target URL.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Sets the visibility window (`None` clears it).
    pub fn with_visibility(mut self, visibility: Option<Visibility>) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Sets the resource list.
    pub fn with_resources(mut self, resources: Vec<DynamicResource>) -> Self {
        self.dynamic_resources = Some(resources);
        self
    }

    /// Sets the properties.
    pub fn with_props(mut self, props: PropMap) -> Self {
        self.props = Some(props);
        self
    }

    /// Sets the rendering engine.
    pub fn with_engine(mut self, engine: RenderEngine) -> Self {
        self.engine = Some(engine);
        self
    }
}

/// A single CRUD-style delta describing a change to one snippet.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAction {
    /// What happened.
    pub kind: ActionKind,
    /// The partial payload.
    pub delta: SnippetDelta,
}

impl UpdateAction {
    /// Creates a `Created` action.
    pub fn created(delta: SnippetDelta) -> Self {
        Self {
            kind: ActionKind::Created,
            delta,
        }
    }

    /// Creates an `Updated` action.
    pub fn updated(delta: SnippetDelta) -> Self {
        Self {
            kind: ActionKind::Updated,
            delta,
        }
    }

    /// Creates a `Deleted` action for the given identity.
    pub fn deleted(id: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Deleted,
            delta: SnippetDelta::for_id(id),
        }
    }

    /// Identity of the snippet this action affects.
    pub fn id(&self) -> &str {
        &self.delta.id
    }
}
