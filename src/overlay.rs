//! Overlay collection, deterministic ordering, and provenance-tracking merge.
//!
//! Overlays are ordered by `(stack rank, source ref, original index)` before
//! merging, so the result is independent of the order callers list them in.
//! The merge matches nodes structurally and never replaces an `items` list
//! wholesale; replace is forbidden by the overlay stack canon.

use crate::canon::OverlayStackCanon;
use crate::diagnostics::{Diagnostic, Diagnostics, E_MENU_OVERLAY_STACK_DRIFT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

pub const PROVENANCE_ORIGIN_KEY: &str = "origin";
pub const PROVENANCE_SOURCE_REFS_KEY: &str = "sourceRefs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayOrigin {
    Base,
    Platform,
    Profile,
    Workspace,
    User,
    Plugin,
}

impl OverlayOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayOrigin::Base => "base",
            OverlayOrigin::Platform => "platform",
            OverlayOrigin::Profile => "profile",
            OverlayOrigin::Workspace => "workspace",
            OverlayOrigin::User => "user",
            OverlayOrigin::Plugin => "plugin",
        }
    }

    pub fn parse(name: &str) -> Option<OverlayOrigin> {
        match name {
            "base" => Some(OverlayOrigin::Base),
            "platform" => Some(OverlayOrigin::Platform),
            "profile" => Some(OverlayOrigin::Profile),
            "workspace" => Some(OverlayOrigin::Workspace),
            "user" => Some(OverlayOrigin::User),
            "plugin" => Some(OverlayOrigin::Plugin),
            _ => None,
        }
    }
}

impl fmt::Display for OverlayOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configuration fragment ready to merge. Created per normalization
/// call and discarded with it.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub origin: OverlayOrigin,
    pub source_ref: String,
    pub config: Value,
}

impl Overlay {
    pub fn stack_label(&self) -> String {
        format!("{}:{}", self.origin, self.source_ref)
    }
}

/// Sort overlays into their deterministic application order.
///
/// Origins missing from the canon stack order fall back to the plugin rank
/// and record a stack-drift warning.
pub fn order_overlays(
    overlays: Vec<Overlay>,
    stack: &OverlayStackCanon,
    diagnostics: &mut Diagnostics,
) -> Vec<Overlay> {
    let plugin_rank = stack
        .stack_order
        .iter()
        .position(|name| name == OverlayOrigin::Plugin.as_str())
        .unwrap_or(stack.stack_order.len());
    let mut ranked: Vec<(usize, usize, Overlay)> = Vec::with_capacity(overlays.len());
    for (index, overlay) in overlays.into_iter().enumerate() {
        let rank = match stack
            .stack_order
            .iter()
            .position(|name| name == overlay.origin.as_str())
        {
            Some(rank) => rank,
            None => {
                diagnostics.warning(
                    Diagnostic::new(
                        E_MENU_OVERLAY_STACK_DRIFT,
                        format!(
                            "origin {} is missing from the canon stack order; using plugin rank",
                            overlay.origin
                        ),
                    )
                    .with_source_ref(overlay.source_ref.clone()),
                );
                plugin_rank
            }
        };
        ranked.push((rank, index, overlay));
    }
    ranked.sort_by(|a, b| {
        (a.0, a.2.source_ref.as_str(), a.1).cmp(&(b.0, b.2.source_ref.as_str(), b.1))
    });
    let ordered: Vec<Overlay> = ranked.into_iter().map(|(_, _, overlay)| overlay).collect();
    diagnostics
        .overlay_order
        .extend(ordered.iter().map(Overlay::stack_label));
    ordered
}

/// Seed provenance on a freshly loaded tree.
pub fn annotate_provenance(node: &mut Value, origin: OverlayOrigin, source_ref: &str) {
    let Some(object) = node.as_object_mut() else {
        return;
    };
    object.insert(
        PROVENANCE_ORIGIN_KEY.to_string(),
        Value::String(origin.as_str().to_string()),
    );
    object.insert(
        PROVENANCE_SOURCE_REFS_KEY.to_string(),
        Value::Array(vec![Value::String(source_ref.to_string())]),
    );
    if let Some(items) = object.get_mut("items").and_then(Value::as_array_mut) {
        for child in items {
            annotate_provenance(child, origin, source_ref);
        }
    }
}

/// Merge one overlay's menu fragment into the accumulator tree.
pub fn merge_overlay(menus: &mut Vec<Value>, overlay: &Overlay) {
    let Some(incoming) = overlay.config.get("menus").and_then(Value::as_array) else {
        return;
    };
    merge_item_lists(menus, incoming, overlay.origin, &overlay.source_ref);
}

/// Structural match key for a node within its sibling list.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKey {
    Id(String),
    Separator(usize),
    Label(String),
    Position(usize),
}

fn node_key(node: &Value, index: usize, separator_ordinal: usize) -> NodeKey {
    if let Some(id) = node.get("id").and_then(Value::as_str) {
        if !id.is_empty() {
            return NodeKey::Id(id.to_string());
        }
    }
    if node.get("type").and_then(Value::as_str) == Some("separator") {
        return NodeKey::Separator(separator_ordinal);
    }
    if let Some(label) = node.get("label").and_then(Value::as_str) {
        if !label.is_empty() {
            return NodeKey::Label(label.to_lowercase());
        }
    }
    NodeKey::Position(index)
}

fn keys_for_list(items: &[Value]) -> Vec<NodeKey> {
    let mut separators = 0usize;
    items
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let key = node_key(node, index, separators);
            if matches!(key, NodeKey::Separator(_)) {
                separators += 1;
            }
            key
        })
        .collect()
}

fn merge_item_lists(
    existing: &mut Vec<Value>,
    incoming: &[Value],
    origin: OverlayOrigin,
    source_ref: &str,
) {
    let incoming_keys = keys_for_list(incoming);
    for (node, key) in incoming.iter().zip(incoming_keys.iter()) {
        // Keys are recomputed per node: appends shift positional matches.
        let existing_keys = keys_for_list(existing);
        match existing_keys.iter().position(|candidate| candidate == key) {
            Some(found) => merge_into_node(&mut existing[found], node, origin, source_ref),
            None => {
                let mut inserted = node.clone();
                annotate_provenance(&mut inserted, origin, source_ref);
                existing.push(inserted);
            }
        }
    }
}

fn merge_into_node(target: &mut Value, incoming: &Value, origin: OverlayOrigin, source_ref: &str) {
    let Some(incoming_object) = incoming.as_object() else {
        return;
    };
    let Some(target_object) = target.as_object_mut() else {
        return;
    };
    for (key, value) in incoming_object {
        if key == PROVENANCE_ORIGIN_KEY || key == PROVENANCE_SOURCE_REFS_KEY {
            continue;
        }
        if key == "items" {
            let incoming_items = value.as_array().cloned().unwrap_or_default();
            let target_items = target_object
                .entry("items".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Some(items) = target_items.as_array_mut() {
                merge_item_lists(items, &incoming_items, origin, source_ref);
            }
            continue;
        }
        target_object.insert(key.clone(), value.clone());
    }
    touch_provenance(target_object, origin, source_ref);
}

fn touch_provenance(object: &mut Map<String, Value>, origin: OverlayOrigin, source_ref: &str) {
    object.insert(
        PROVENANCE_ORIGIN_KEY.to_string(),
        Value::String(origin.as_str().to_string()),
    );
    let mut refs: BTreeSet<String> = object
        .get(PROVENANCE_SOURCE_REFS_KEY)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    refs.insert(source_ref.to_string());
    object.insert(
        PROVENANCE_SOURCE_REFS_KEY.to_string(),
        Value::Array(refs.into_iter().map(Value::String).collect()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overlay(origin: OverlayOrigin, source_ref: &str, menus: serde_json::Value) -> Overlay {
        Overlay {
            origin,
            source_ref: source_ref.to_string(),
            config: json!({ "menus": menus }),
        }
    }

    fn base_menus() -> Vec<Value> {
        let mut menus = vec![json!({
            "id": "file",
            "label": "File",
            "items": [
                {"id": "save", "label": "Save", "command": "cmd.project.save"},
                {"type": "separator"},
                {"id": "close", "label": "Close", "command": "cmd.project.close"},
            ],
        })];
        for node in &mut menus {
            annotate_provenance(node, OverlayOrigin::Base, "base");
        }
        menus
    }

    #[test]
    fn ordering_is_independent_of_input_order() {
        let stack = OverlayStackCanon::default();
        let forward = vec![
            overlay(OverlayOrigin::Plugin, "plugin:a", json!([])),
            overlay(OverlayOrigin::Plugin, "plugin:b", json!([])),
            overlay(OverlayOrigin::User, "user", json!([])),
        ];
        let reversed = vec![
            overlay(OverlayOrigin::Plugin, "plugin:b", json!([])),
            overlay(OverlayOrigin::User, "user", json!([])),
            overlay(OverlayOrigin::Plugin, "plugin:a", json!([])),
        ];
        let mut first_diag = Diagnostics::default();
        let mut second_diag = Diagnostics::default();
        let first: Vec<String> = order_overlays(forward, &stack, &mut first_diag)
            .iter()
            .map(Overlay::stack_label)
            .collect();
        let second: Vec<String> = order_overlays(reversed, &stack, &mut second_diag)
            .iter()
            .map(Overlay::stack_label)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["user:user", "plugin:plugin:a", "plugin:plugin:b"]);
    }

    #[test]
    fn unknown_origin_falls_back_to_plugin_rank_with_drift_warning() {
        let mut stack = OverlayStackCanon::default();
        stack.stack_order.retain(|name| name != "user");
        let mut diagnostics = Diagnostics::default();
        let ordered = order_overlays(
            vec![
                overlay(OverlayOrigin::User, "user", json!([])),
                overlay(OverlayOrigin::Platform, "platform", json!([])),
            ],
            &stack,
            &mut diagnostics,
        );
        assert_eq!(ordered[0].origin, OverlayOrigin::Platform);
        assert!(diagnostics.has_code("E_MENU_OVERLAY_STACK_DRIFT"));
    }

    #[test]
    fn matched_nodes_overwrite_scalars_and_merge_items() {
        let mut menus = base_menus();
        let edit = overlay(
            OverlayOrigin::User,
            "user",
            json!([{
                "id": "file",
                "items": [
                    {"id": "save", "label": "Save Project"},
                ],
            }]),
        );
        merge_overlay(&mut menus, &edit);

        assert_eq!(menus.len(), 1);
        let file = &menus[0];
        assert_eq!(file["label"], "File");
        let items = file["items"].as_array().expect("items");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["label"], "Save Project");
        assert_eq!(items[0]["command"], "cmd.project.save");
        assert_eq!(items[0]["origin"], "user");
        assert_eq!(
            items[0]["sourceRefs"],
            json!(["base", "user"])
        );
        // Untouched sibling keeps base provenance.
        assert_eq!(items[2]["sourceRefs"], json!(["base"]));
    }

    #[test]
    fn unmatched_nodes_append_as_new_siblings() {
        let mut menus = base_menus();
        let insert = overlay(
            OverlayOrigin::Plugin,
            "plugin:exporter",
            json!([{
                "id": "file",
                "items": [
                    {"id": "exportDocx", "label": "Export DOCX", "command": "cmd.project.export.docxMin"},
                ],
            }]),
        );
        merge_overlay(&mut menus, &insert);

        let items = menus[0]["items"].as_array().expect("items");
        assert_eq!(items.len(), 4);
        assert_eq!(items[3]["id"], "exportDocx");
        assert_eq!(items[3]["origin"], "plugin");
        assert_eq!(items[3]["sourceRefs"], json!(["plugin:exporter"]));
    }

    #[test]
    fn label_and_separator_keys_match_without_ids() {
        let mut menus = vec![json!({
            "label": "View",
            "items": [
                {"type": "separator"},
                {"label": "Zoom In"},
            ],
        })];
        for node in &mut menus {
            annotate_provenance(node, OverlayOrigin::Base, "base");
        }
        let edit = overlay(
            OverlayOrigin::Workspace,
            "workspace",
            json!([{
                "label": "View",
                "items": [
                    {"type": "separator", "visible": false},
                    {"label": "Zoom In", "accelerator": "Ctrl+Plus"},
                ],
            }]),
        );
        merge_overlay(&mut menus, &edit);

        let items = menus[0]["items"].as_array().expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["visible"], false);
        assert_eq!(items[1]["accelerator"], "Ctrl+Plus");
    }

    #[test]
    fn provenance_union_never_shrinks() {
        let mut menus = base_menus();
        let first = overlay(
            OverlayOrigin::Plugin,
            "plugin:b",
            json!([{"id": "file", "items": [{"id": "save", "label": "Save (B)"}]}]),
        );
        let second = overlay(
            OverlayOrigin::Plugin,
            "plugin:a",
            json!([{"id": "file", "items": [{"id": "save", "label": "Save (A)"}]}]),
        );
        merge_overlay(&mut menus, &first);
        merge_overlay(&mut menus, &second);

        let save = &menus[0]["items"][0];
        assert_eq!(save["label"], "Save (A)");
        assert_eq!(save["origin"], "plugin");
        assert_eq!(save["sourceRefs"], json!(["base", "plugin:a", "plugin:b"]));
    }
}
