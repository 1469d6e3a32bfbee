use std::path::{Path, PathBuf};

use crate::consts::LOCK_SUFFIX;
use crate::identity::{InstanceId, Scope};

/// Per-user runtime directory (cleaned on logout when the session provides one).
pub fn user_runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(d) if !d.is_empty() => PathBuf::from(d),
        _ => std::env::temp_dir(),
    }
}

/// Machine-wide directory every user can reach.
pub fn machine_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn scope_dir(scope: Scope) -> PathBuf {
    match scope {
        Scope::Local => user_runtime_dir(),
        Scope::Global => machine_dir(),
    }
}

/// Where one identity's lock file and listening socket live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    pub dir: PathBuf,
    pub lock: PathBuf,
    pub socket: PathBuf,
}

impl InstancePaths {
    pub fn new(id: &InstanceId, scope: Scope, dir_override: Option<&Path>) -> Self {
        let dir = dir_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| scope_dir(scope));
        Self {
            lock: dir.join(format!("{}{}", id.as_str(), LOCK_SUFFIX)),
            socket: dir.join(id.as_str()),
            dir,
        }
    }
}

pub fn safe_for_filename(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
