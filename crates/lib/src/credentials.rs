//! Credential holder shared by the HTTP client and the gateway session, plus
//! on-disk token persistence for the CLI.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Current bearer token. Clones share the same slot, so a token set after
/// sign-in is seen by every holder (HTTP requests and the next gateway identify).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    token: Arc<RwLock<Option<String>>>,
}

impl Credentials {
    pub fn new(token: Option<String>) -> Self {
        let creds = Self::default();
        creds.set_token(token);
        creds
    }

    /// Return the current token, if any.
    pub fn get_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the token. Empty or whitespace-only tokens clear it.
    pub fn set_token(&self, token: Option<String>) {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        match self.token.write() {
            Ok(mut g) => *g = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    pub fn clear(&self) {
        self.set_token(None);
    }
}

/// Default path for the stored token (~/.derailed/token).
pub fn default_token_path() -> PathBuf {
    crate::config::config_dir().join("token")
}

/// Load a stored token if present and non-empty.
pub fn load_token(path: &Path) -> Option<String> {
    let s = std::fs::read_to_string(path).ok()?;
    let t = s.trim().to_string();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

/// Persist a token (e.g. after login). Creates parent dirs if needed.
pub fn save_token(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, token)?;
    Ok(())
}

/// Remove the stored token. A missing file is not an error.
pub fn remove_token(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
