//! End-to-end tests driving the mcanon binary over scratch config packs.

mod common;

use common::{stdout_text, PackFixture};
use serde_json::json;

fn signed_plugin(plugin_id: &str, menus: serde_json::Value) -> serde_json::Value {
    json!({
        "pluginId": plugin_id,
        "pluginVersion": "1.0.0",
        "overlayId": "menu",
        "signatureStatus": "signed",
        "sourceRef": format!("plugin:{plugin_id}"),
        "menus": menus,
    })
}

#[test]
fn normalize_writes_config_and_report() {
    let pack = PackFixture::new();
    pack.write_json(
        "overlays/user.json",
        &json!({"menus": [{"id": "save", "label": "My Save"}]}),
    );

    let output = pack.run(&["normalize"]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let report = pack.report();
    assert_eq!(report["ok"], true);
    assert_eq!(report["overlayStackApplied"], json!(["user:user"]));
    assert!(report["normalizedHashSha256"]
        .as_str()
        .is_some_and(|hash| hash.len() == 64));
    // All five canon documents fell back to builtin defaults.
    assert_eq!(report["canonDefaultsUsed"].as_array().map(Vec::len), Some(5));

    let config = pack.config();
    assert_eq!(config["normalizedShapeVersion"], 1);
    assert_eq!(config["menuConfigVersion"], 3);
    let menus = config["menus"].as_array().expect("menus");
    assert_eq!(menus.len(), 1);
    assert_eq!(menus[0]["label"], "My Save");
    assert_eq!(menus[0]["canonicalCmdId"], "cmd.project.save");
    assert_eq!(menus[0]["visibilityPolicy"], "visible_enabled");
    assert_eq!(menus[0]["sourceRefs"], json!(["base", "user"]));
}

#[test]
fn plugin_file_order_does_not_change_the_hash() {
    let insert = signed_plugin(
        "exporter",
        json!([{"id": "exportDocx", "label": "Export DOCX", "command": "cmd.project.export.docxMin"}]),
    );
    let relabel = signed_plugin("labeler", json!([{"id": "save", "label": "Save Project"}]));

    let forward = PackFixture::new();
    forward.write_json("overlays/plugins/01.json", &insert);
    forward.write_json("overlays/plugins/02.json", &relabel);
    assert!(forward.run(&["normalize"]).status.success());

    let reversed = PackFixture::new();
    reversed.write_json("overlays/plugins/01.json", &relabel);
    reversed.write_json("overlays/plugins/02.json", &insert);
    assert!(reversed.run(&["normalize"]).status.success());

    let first = forward.report();
    let second = reversed.report();
    assert_eq!(
        first["normalizedHashSha256"],
        second["normalizedHashSha256"]
    );
    // The raw inputs differ, so the audit fingerprints must differ.
    assert_ne!(
        first["inputFingerprintSha256"],
        second["inputFingerprintSha256"]
    );

    let config = forward.config();
    let ids: Vec<&str> = config["menus"]
        .as_array()
        .expect("menus")
        .iter()
        .filter_map(|node| node["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["exportDocx", "save"]);
}

#[test]
fn promotion_mode_fails_on_sandbox_violations_and_keeps_no_config() {
    let pack = PackFixture::new();
    pack.write_json(
        "context.json",
        &json!({
            "mode": "offline",
            "profile": "pro",
            "platform": "linux",
            "stage": "X2",
            "executionMode": "promotion",
        }),
    );
    pack.write_json(
        "overlays/plugins/rogue.json",
        &signed_plugin(
            "rogue",
            json!([{"id": "x", "handlerCallback": "require('child_process')"}]),
        ),
    );

    let output = pack.run(&["normalize"]);
    assert!(!output.status.success());

    let report = pack.report();
    assert_eq!(report["ok"], false);
    assert_eq!(report["normalizedHashSha256"], "");
    let errors = report["diagnostics"]["errors"].as_array().expect("errors");
    assert!(errors
        .iter()
        .any(|entry| entry["code"] == "PLUGIN_OVERLAY_EXECUTABLE_FIELD_FORBIDDEN"));
    assert!(!pack.has_artifact("normalized/config.json"));
}

#[test]
fn check_reports_without_writing_artifacts() {
    let pack = PackFixture::new();
    let output = pack.run(&["check", "--json"]);
    assert!(output.status.success());
    let outcome: serde_json::Value =
        serde_json::from_str(&stdout_text(&output)).expect("parse check output");
    assert_eq!(outcome["ok"], true);
    assert!(!pack.has_artifact("normalized/report.json"));
    assert!(!pack.has_artifact("normalized/config.json"));
}

#[test]
fn sunset_enforcement_fails_expired_aliases_end_to_end() {
    let pack = PackFixture::new();
    pack.write_json(
        "menu/base.json",
        &json!({
            "menus": [{"id": "save", "label": "Save", "command": "legacy.save"}],
        }),
    );

    let allowed = pack.run(&["normalize", "--enforce-sunset", "--today", "2026-01-01"]);
    assert!(allowed.status.success());

    let expired = pack.run(&["normalize", "--enforce-sunset", "--today", "2099-01-01"]);
    assert!(!expired.status.success());
    let report = pack.report();
    let errors = report["diagnostics"]["errors"].as_array().expect("errors");
    assert!(errors
        .iter()
        .any(|entry| entry["code"] == "E_COMMAND_NAMESPACE_SUNSET_EXPIRED"));
}

#[test]
fn resolve_debugs_alias_resolution() {
    let pack = PackFixture::new();
    let output = pack.run(&["resolve", "--id", "legacy.save"]);
    assert!(output.status.success());
    assert!(stdout_text(&output).contains("cmd.project.save"));

    let failed = pack.run(&["resolve", "--id", "legacy.missing"]);
    assert!(!failed.status.success());
}
