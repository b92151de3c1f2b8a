#![cfg(all(test, unix))]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::terraform::Workspace;

/// A stand-in `terraform` executable. Every run appends its argv to
/// `state/calls.log` and its physical cwd to `state/cwd`; a run that starts
/// while another is still inside the script is recorded in `state/overlaps`.
pub struct FakeTerraform {
    dir: TempDir,
}

impl FakeTerraform {
    pub fn new() -> Self {
        Self::build(0, 0)
    }

    pub fn failing() -> Self {
        Self::build(0, 1)
    }

    pub fn with_delay_ms(delay_ms: u64) -> Self {
        Self::build(delay_ms, 0)
    }

    fn build(delay_ms: u64, exit_code: i32) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        for sub in ["bin", "state", "terraform"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }

        let state = dir.path().join("state");
        let state = state.display();
        let sleep = if delay_ms > 0 {
            format!("sleep {}.{:03}\n", delay_ms / 1000, delay_ms % 1000)
        } else {
            String::new()
        };
        let script = format!(
            r#"#!/bin/sh
echo "$*" >> "{state}/calls.log"
pwd -P > "{state}/cwd"
if ! mkdir "{state}/running" 2>/dev/null; then
  echo overlap >> "{state}/overlaps"
fi
{sleep}echo "fake terraform $*"
if [ {exit_code} -ne 0 ]; then
  echo "Error: fake failure" 1>&2
fi
rmdir "{state}/running" 2>/dev/null
exit {exit_code}
"#
        );

        let bin = dir.path().join("bin").join("terraform");
        std::fs::write(&bin, script).expect("failed to write fake terraform");
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir }
    }

    pub fn binary(&self) -> String {
        self.dir
            .path()
            .join("bin")
            .join("terraform")
            .display()
            .to_string()
    }

    pub fn working_dir(&self) -> PathBuf {
        self.dir
            .path()
            .join("terraform")
            .canonicalize()
            .expect("working dir exists")
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.binary(), self.dir.path().join("terraform"))
    }

    /// A workspace pointing at this binary but at a directory that was never
    /// created.
    pub fn workspace_without_dir(&self) -> Workspace {
        Workspace::new(self.binary(), self.dir.path().join("missing"))
    }

    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("state").join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn last_cwd(&self) -> PathBuf {
        let raw = std::fs::read_to_string(self.dir.path().join("state").join("cwd"))
            .expect("fake terraform never ran");
        PathBuf::from(raw.trim_end())
    }

    pub fn overlapped(&self) -> bool {
        self.dir.path().join("state").join("overlaps").exists()
    }
}
