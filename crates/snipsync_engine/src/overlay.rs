//! Local property overlay.
//!
//! Client-side, non-persisted per-snippet properties merged into the output
//! projection at read time. The overlay never touches canonical state, the
//! cache, or the server, and it is locked independently so overlay writes
//! never contend with canonical merges.

use parking_lot::RwLock;
use snipsync_protocol::{PropMap, Snippet};
use std::collections::HashMap;

/// Holds local per-snippet properties.
#[derive(Debug, Default)]
pub struct LocalOverlay {
    entries: RwLock<HashMap<String, PropMap>>,
}

impl LocalOverlay {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the given properties into the overlay entry for `id`.
    pub fn set(&self, id: &str, props: PropMap) {
        let mut entries = self.entries.write();
        entries.entry(id.to_string()).or_default().extend(props);
    }

    /// Removes the overlay entry for `id`.
    pub fn clear(&self, id: &str) {
        self.entries.write().remove(id);
    }

    /// Projects the canonical list for observers: overlay properties are
    /// merged into each snippet's props, overlay winning on key conflict.
    pub fn project(&self, snippets: &[Snippet]) -> Vec<Snippet> {
        let entries = self.entries.read();
        if entries.is_empty() {
            return snippets.to_vec();
        }
        snippets
            .iter()
            .map(|snippet| {
                let mut projected = snippet.clone();
                if let Some(props) = entries.get(&snippet.id) {
                    projected
                        .props
                        .extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                projected
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, i64)]) -> PropMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
            .collect()
    }

    #[test]
    fn overlay_wins_on_key_conflict() {
        let overlay = LocalOverlay::new();
        overlay.set("x", props(&[("a", 10), ("local", 1)]));

        let canonical = vec![Snippet::new("x", "t").with_props(props(&[("a", 1), ("b", 2)]))];
        let projected = overlay.project(&canonical);

        assert_eq!(projected[0].props, props(&[("a", 10), ("b", 2), ("local", 1)]));
        // Canonical list is untouched.
        assert_eq!(canonical[0].props, props(&[("a", 1), ("b", 2)]));
    }

    #[test]
    fn snippets_without_overlay_pass_through() {
        let overlay = LocalOverlay::new();
        overlay.set("other", props(&[("a", 1)]));

        let canonical = vec![Snippet::new("x", "t")];
        assert_eq!(overlay.project(&canonical), canonical);
    }

    #[test]
    fn set_merges_and_clear_removes() {
        let overlay = LocalOverlay::new();
        overlay.set("x", props(&[("a", 1)]));
        overlay.set("x", props(&[("b", 2)]));

        let projected = overlay.project(&[Snippet::new("x", "t")]);
        assert_eq!(projected[0].props, props(&[("a", 1), ("b", 2)]));

        overlay.clear("x");
        let projected = overlay.project(&[Snippet::new("x", "t")]);
        assert!(projected[0].props.is_empty());
    }
}
