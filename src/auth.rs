//! # API Token
//!
//! The daemon protects every endpoint except `/health` with one bearer token.
//! The token is created on first run, stored with owner-only permissions and
//! reused afterwards, so local editors can read it from disk once.

use crate::config::AuthConfig;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

const TOKEN_DIR: &str = ".dictate2me";
const TOKEN_FILE: &str = "api-token";

/// The process-wide shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiToken({}...)", self.prefix())
    }
}

impl ApiToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 64 hex characters of fresh randomness.
    pub fn generate() -> Self {
        Self(format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First few characters, safe to put in logs.
    pub fn prefix(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }

    pub fn matches(&self, candidate: &str) -> bool {
        // length first, then every byte, so the comparison does not stop early
        self.0.len() == candidate.len()
            && self
                .0
                .bytes()
                .zip(candidate.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    /// Token from configuration, or from the token file (created if missing).
    pub fn resolve(config: &AuthConfig) -> Result<Self> {
        if let Some(token) = config.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            info!("Using API token from configuration");
            return Ok(Self::new(token));
        }

        let path = match &config.token_path {
            Some(path) => PathBuf::from(path),
            None => default_token_path()?,
        };
        Self::load_or_generate(&path)
    }

    /// Read the token at `path`, writing a new one there if it does not exist.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read token file {}", path.display()))?;
            let token = raw.trim();
            if token.is_empty() {
                return Err(anyhow!("token file {} is empty", path.display()));
            }
            info!(path = %path.display(), "Loaded API token");
            return Ok(Self::new(token));
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create token directory {}", dir.display()))?;
            restrict_permissions(dir, 0o700)?;
        }

        let token = Self::generate();
        fs::write(path, token.as_str())
            .with_context(|| format!("failed to write token file {}", path.display()))?;
        restrict_permissions(path, 0o600)?;

        info!(path = %path.display(), "Generated new API token");
        Ok(token)
    }
}

fn default_token_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(TOKEN_DIR).join(TOKEN_FILE))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_64_hex_chars() {
        let a = ApiToken::generate();
        let b = ApiToken::generate();
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(a.prefix().len(), 8);
    }

    #[test]
    fn test_matches() {
        let token = ApiToken::new("secret-token");
        assert!(token.matches("secret-token"));
        assert!(!token.matches("secret-tokeN"));
        assert!(!token.matches("secret"));
        assert!(!token.matches(""));
    }

    #[test]
    fn test_token_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("api-token");

        let first = ApiToken::load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = ApiToken::load_or_generate(&path).unwrap();
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
            let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }

    #[test]
    fn test_existing_file_is_trimmed_and_empty_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-token");

        fs::write(&path, "abc123\n").unwrap();
        assert_eq!(ApiToken::load_or_generate(&path).unwrap().as_str(), "abc123");

        fs::write(&path, "  \n").unwrap();
        assert!(ApiToken::load_or_generate(&path).is_err());
    }

    #[test]
    fn test_configured_token_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-token");
        let config = AuthConfig {
            token: Some("pinned".to_string()),
            token_path: Some(path.to_string_lossy().into_owned()),
        };
        assert_eq!(ApiToken::resolve(&config).unwrap().as_str(), "pinned");
        assert!(!path.exists());

        let config = AuthConfig {
            token: None,
            token_path: Some(path.to_string_lossy().into_owned()),
        };
        let generated = ApiToken::resolve(&config).unwrap();
        assert_eq!(generated.as_str().len(), 64);
    }
}
