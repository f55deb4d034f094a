//! Merge semantics: applying update actions to the canonical list.

use snipsync_protocol::{ActionKind, Snippet, SnippetDelta, UpdateAction};
use tracing::debug;

/// Applies one action to the canonical list. Returns true when the list
/// changed.
///
/// Semantics:
/// - `Created` requires a `target` and an unused `id`; anything else is a
///   no-op.
/// - `Updated` against a delta that matches the current snippet field-by-field
///   (absent fields compare equal) means "content body changed, metadata did
///   not": only `load_iteration` is bumped, telling consumers to reload.
///   Otherwise each present field overwrites the canonical one and
///   `load_iteration` stays put.
/// - `Deleted` removes by `id`, no-op when absent.
pub fn apply_action(snippets: &mut Vec<Snippet>, action: &UpdateAction) -> bool {
    match action.kind {
        ActionKind::Created => apply_created(snippets, &action.delta),
        ActionKind::Updated => apply_updated(snippets, &action.delta),
        ActionKind::Deleted => apply_deleted(snippets, action.id()),
    }
}

fn apply_created(snippets: &mut Vec<Snippet>, delta: &SnippetDelta) -> bool {
    let Some(target) = delta.target.as_ref() else {
        debug!(id = %delta.id, "dropping created action without target");
        return false;
    };
    if snippets.iter().any(|s| s.id == delta.id) {
        debug!(id = %delta.id, "dropping created action for existing id");
        return false;
    }

    snippets.push(Snippet {
        id: delta.id.clone(),
        target: target.clone(),
        headers: delta.headers.clone().unwrap_or_default(),
        dynamic_resources: delta.dynamic_resources.clone().unwrap_or_default(),
        props: delta.props.clone().unwrap_or_default(),
        engine: delta.engine.clone().unwrap_or_default(),
        visibility: delta.visibility.unwrap_or(None),
        load_iteration: 0,
    });
    true
}

fn apply_updated(snippets: &mut [Snippet], delta: &SnippetDelta) -> bool {
    let Some(current) = snippets.iter_mut().find(|s| s.id == delta.id) else {
        debug!(id = %delta.id, "dropping updated action for unknown id");
        return false;
    };

    if delta_matches_current(delta, current) {
        // The delta carries no metadata change: the content body changed.
        current.load_iteration += 1;
        return true;
    }

    if let Some(target) = &delta.target {
        current.target = target.clone();
    }
    if let Some(headers) = &delta.headers {
        current.headers = headers.clone();
    }
    if let Some(visibility) = delta.visibility {
        current.visibility = visibility;
    }
    if let Some(resources) = &delta.dynamic_resources {
        current.dynamic_resources = resources.clone();
    }
    if let Some(props) = &delta.props {
        current.props = props.clone();
    }
    if let Some(engine) = &delta.engine {
        current.engine = engine.clone();
    }
    true
}

fn apply_deleted(snippets: &mut Vec<Snippet>, id: &str) -> bool {
    let before = snippets.len();
    snippets.retain(|s| s.id != id);
    snippets.len() != before
}

/// Field-by-field equality of a delta against the current snippet, with
/// absent fields comparing equal.
///
/// An all-absent delta therefore matches, exactly like a delta restating the
/// current values; both mean "reload content". This comparison decides
/// whether consumers reload the content body or just re-render metadata, so
/// it must stay value-based rather than presence-based.
fn delta_matches_current(delta: &SnippetDelta, current: &Snippet) -> bool {
    delta.target.as_ref().is_none_or(|t| *t == current.target)
        && delta.headers.as_ref().is_none_or(|h| *h == current.headers)
        && delta.visibility.is_none_or(|v| v == current.visibility)
        && delta
            .dynamic_resources
            .as_ref()
            .is_none_or(|r| *r == current.dynamic_resources)
        && delta.props.as_ref().is_none_or(|p| *p == current.props)
        && delta.engine.as_ref().is_none_or(|e| *e == current.engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipsync_protocol::{PropMap, Visibility};

    fn base_snippet() -> Snippet {
        let mut props = PropMap::new();
        props.insert("a".into(), serde_json::json!(1));
        Snippet::new("x", "t").with_props(props)
    }

    #[test]
    fn created_without_target_never_adds() {
        let mut list = Vec::new();
        let changed = apply_action(&mut list, &UpdateAction::created(SnippetDelta::for_id("x")));
        assert!(!changed);
        assert!(list.is_empty());
    }

    #[test]
    fn created_twice_keeps_one_snippet() {
        let mut list = Vec::new();
        let action =
            UpdateAction::created(SnippetDelta::for_id("x").with_target("http://a"));

        assert!(apply_action(&mut list, &action));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].target, "http://a");

        // Second application is a no-op: the id exists.
        assert!(!apply_action(&mut list, &action));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn empty_update_bumps_load_iteration_only() {
        let mut list = vec![base_snippet()];
        let changed =
            apply_action(&mut list, &UpdateAction::updated(SnippetDelta::for_id("x")));

        assert!(changed);
        let expected = Snippet {
            load_iteration: 1,
            ..base_snippet()
        };
        assert_eq!(list[0], expected);
    }

    #[test]
    fn update_restating_current_values_also_bumps_load_iteration() {
        let mut list = vec![base_snippet()];
        let delta = SnippetDelta::from_snippet(&list[0]);

        assert!(apply_action(&mut list, &UpdateAction::updated(delta)));
        assert_eq!(list[0].load_iteration, 1);
        assert_eq!(list[0].props, base_snippet().props);
    }

    #[test]
    fn metadata_update_overwrites_without_bumping() {
        let mut list = vec![base_snippet()];
        let mut props = PropMap::new();
        props.insert("a".into(), serde_json::json!(2));

        let changed = apply_action(
            &mut list,
            &UpdateAction::updated(SnippetDelta::for_id("x").with_props(props.clone())),
        );

        assert!(changed);
        assert_eq!(list[0].props, props);
        assert_eq!(list[0].load_iteration, 0);
        // Omitted fields retain prior values.
        assert_eq!(list[0].target, "t");
    }

    #[test]
    fn update_can_clear_visibility() {
        let mut list =
            vec![base_snippet().with_visibility(Visibility::until(99))];

        apply_action(
            &mut list,
            &UpdateAction::updated(SnippetDelta::for_id("x").with_visibility(None)),
        );
        assert_eq!(list[0].visibility, None);
        assert_eq!(list[0].load_iteration, 0);
    }

    #[test]
    fn update_for_unknown_id_is_noop() {
        let mut list = vec![base_snippet()];
        let changed = apply_action(
            &mut list,
            &UpdateAction::updated(SnippetDelta::for_id("missing").with_target("u")),
        );
        assert!(!changed);
        assert_eq!(list[0], base_snippet());
    }

    #[test]
    fn delete_missing_id_leaves_list_unchanged() {
        let mut list = vec![base_snippet(), Snippet::new("y", "t2")];
        let before = list.clone();

        assert!(!apply_action(&mut list, &UpdateAction::deleted("missing")));
        assert_eq!(list, before);
    }

    #[test]
    fn delete_removes_matching_snippet() {
        let mut list = vec![base_snippet(), Snippet::new("y", "t2")];

        assert!(apply_action(&mut list, &UpdateAction::deleted("x")));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "y");
    }
}
