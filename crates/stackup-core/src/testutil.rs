//! Helpers for tests that stand external tools up as small shell scripts.

use std::path::{Path, PathBuf};

/// Write a `/bin/sh` script body to `dir/name`.
///
/// Callers run it as `/bin/sh <path>` rather than executing it directly, which
/// sidesteps ETXTBSY races with concurrently forking tests.
pub fn stub_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    path
}

/// A file a stub appends one line per invocation to.
pub struct StubLog {
    path: PathBuf,
}

impl StubLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.path)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
