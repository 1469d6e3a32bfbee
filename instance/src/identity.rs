use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consts::{ID_FRAGMENT_LEN, ID_NAMESPACE};
use crate::error::InstanceError;
use crate::hash::checksum8;
use crate::paths::safe_for_filename;

/// Whether one instance is allowed per OS user or per machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Local,
    Global,
}

impl Scope {
    pub fn from_global(global: bool) -> Self {
        if global {
            Scope::Global
        } else {
            Scope::Local
        }
    }

    pub fn is_global(self) -> bool {
        self == Scope::Global
    }
}

/// Channel name shared by the lock file and the listening socket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// `singleinstance-<name[..8]>-<checksum>[-<uid>]`
    ///
    /// The checksum covers the untruncated `vendor_name` pair so two apps
    /// sharing an 8-char prefix still get different channels.
    pub fn derive(app_name: &str, vendor: &str, scope: Scope) -> Self {
        Self::derive_for_user(app_name, vendor, scope, current_uid())
    }

    fn derive_for_user(app_name: &str, vendor: &str, scope: Scope, uid: u32) -> Self {
        let fragment: String = app_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(ID_FRAGMENT_LEN)
            .collect();
        let sum = checksum8(format!("{}_{}", vendor, app_name).as_bytes());
        let mut id = format!("{}{}-{}", ID_NAMESPACE, fragment, sum);
        if scope == Scope::Local {
            id.push_str(&format!("-{:x}", uid));
        }
        Self(id)
    }

    /// A host-chosen id, made safe for use as a file and socket name.
    pub fn explicit(raw: &str) -> Result<Self, InstanceError> {
        let id = safe_for_filename(raw.trim());
        if id.is_empty() || id.chars().all(|c| c == '.') {
            return Err(InstanceError::InvalidId(raw.to_string()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn current_uid() -> u32 {
    unsafe { libc::geteuid() }
}
