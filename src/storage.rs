//! Client-side persistent key/value storage.
//!
//! The client only ever reads the bearer token from here; whoever signs the
//! user in owns writing it.

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// Storage key holding the bearer token.
pub const AUTH_TOKEN_KEY: &str = "authToken";

/// Read access to a persistent key/value store.
#[cfg_attr(test, mockall::automock)]
pub trait TokenStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` when absent.
    fn get_item(&self, key: &str) -> Result<Option<String>>;
}

/// Looks up the bearer token. Missing tokens and storage failures both
/// resolve to `None`.
pub fn bearer_token(store: &dyn TokenStore) -> Option<String> {
    match store.get_item(AUTH_TOKEN_KEY) {
        Ok(Some(token)) if !token.is_empty() => Some(token),
        Ok(_) => None,
        Err(e) => {
            debug!("Token storage unavailable, continuing without auth: {:#}", e);
            None
        }
    }
}

/// Masks a token for logging: `abcd****wxyz`.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

/// A JSON object on disk, one string value per key.
pub struct FileTokenStore<R: Runtime> {
    runtime: R,
    path: PathBuf,
}

impl<R: Runtime> FileTokenStore<R> {
    pub fn new(runtime: R, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    /// Opens the store at `path`, or at `<config_dir>/rapi/storage.json`.
    pub fn open(runtime: R, path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path(&runtime)?,
        };
        debug!("Using token storage at {:?}", path);
        Ok(Self::new(runtime, path))
    }

    pub fn default_path(runtime: &R) -> Result<PathBuf> {
        let config_dir = runtime
            .config_dir()
            .ok_or_else(|| anyhow!("Could not determine the user configuration directory"))?;
        Ok(config_dir.join("rapi").join("storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.runtime.exists(&self.path) {
            return Ok(Map::new());
        }
        let contents = self.runtime.read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token storage at {:?}", self.path))
    }
}

impl<R: Runtime> TokenStore for FileTokenStore<R> {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.load()?;
        Ok(items.get(key).and_then(|value| match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            // Storage holds strings; anything else reads back as its JSON text
            other => Some(other.to_string()),
        }))
    }
}
