//! Shared test infrastructure for config-pack integration tests.

use serde_json::Value;
use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

/// A scratch config pack plus helpers to run `mcanon` against it.
pub struct PackFixture {
    dir: TempDir,
}

impl Default for PackFixture {
    fn default() -> Self {
        PackFixture::new()
    }
}

impl PackFixture {
    /// Create a pack with a base menu and a pro-profile context.
    pub fn new() -> Self {
        let fixture = PackFixture {
            dir: TempDir::new().expect("create tempdir"),
        };
        fixture.write_json(
            "menu/base.json",
            &serde_json::json!({
                "menuConfigVersion": 3,
                "menus": [
                    {"id": "save", "label": "Save", "command": "cmd.project.save"},
                ],
            }),
        );
        fixture.write_json(
            "context.json",
            &serde_json::json!({
                "mode": "offline",
                "profile": "pro",
                "platform": "linux",
                "stage": "X2",
            }),
        );
        fixture
    }

    pub fn write_json(&self, rel: &str, value: &Value) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create pack dirs");
        }
        fs::write(&path, serde_json::to_vec_pretty(value).expect("serialize")).expect("write");
    }

    /// Run mcanon with `--config-pack <root>` appended.
    pub fn run(&self, args: &[&str]) -> Output {
        let mut command = Command::new(env!("CARGO_BIN_EXE_mcanon"));
        command.args(args);
        command.arg("--config-pack");
        command.arg(self.dir.path());
        command.output().expect("run mcanon")
    }

    pub fn read_json(&self, rel: &str) -> Value {
        let path = self.dir.path().join(rel);
        serde_json::from_slice(&fs::read(&path).expect("read artifact")).expect("parse artifact")
    }

    pub fn report(&self) -> Value {
        self.read_json("normalized/report.json")
    }

    pub fn config(&self) -> Value {
        self.read_json("normalized/config.json")
    }

    pub fn has_artifact(&self, rel: &str) -> bool {
        self.dir.path().join(rel).is_file()
    }
}

pub fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}
