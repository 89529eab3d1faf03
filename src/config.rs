use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::OwnerIdentity;

const DEFAULT_DB_PATH: &str = "greenloop.db";
const DEFAULT_MEDIA_DIR: &str = "uploads";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5001";

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    db_path: Option<String>,
    media_dir: Option<String>,
    api: Option<ApiConfigFile>,
    owners: Option<Vec<OwnerTokenFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct OwnerTokenFile {
    token: String,
    owner_id: String,
    display_name: Option<String>,
    avatar: Option<String>,
}

/// One bearer token and the identity it resolves to. Token issuance is the
/// external identity provider's job; the service only maps presented tokens
/// to owners.
#[derive(Clone, Debug)]
pub struct OwnerToken {
    pub token: String,
    pub identity: OwnerIdentity,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub db_path: String,
    pub media_dir: String,
    pub api_addr: String,
    /// Where to write the generated token when no owners are configured.
    pub api_token_path: Option<PathBuf>,
    pub owners: Vec<OwnerToken>,
}

impl ServiceConfig {
    /// Load from the JSON file named by `GREENLOOP_CONFIG` (if set), then
    /// apply env overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GREENLOOP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let media_dir = file
            .media_dir
            .unwrap_or_else(|| DEFAULT_MEDIA_DIR.to_string());
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let api_token_path = file.api.and_then(|api| api.token_path);
        let owners = file
            .owners
            .unwrap_or_default()
            .into_iter()
            .map(|owner| OwnerToken {
                token: owner.token,
                identity: OwnerIdentity {
                    display_name: owner
                        .display_name
                        .unwrap_or_else(|| owner.owner_id.clone()),
                    owner_id: owner.owner_id,
                    avatar: owner.avatar,
                },
            })
            .collect();
        Self {
            db_path,
            media_dir,
            api_addr,
            api_token_path,
            owners,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("GREENLOOP_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("GREENLOOP_MEDIA_DIR") {
            if !dir.trim().is_empty() {
                self.media_dir = dir;
            }
        }
        if let Ok(addr) = std::env::var("GREENLOOP_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("GREENLOOP_API_TOKEN_PATH") {
            if !path.trim().is_empty() {
                self.api_token_path = Some(PathBuf::from(path));
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.media_dir.trim().is_empty() {
            return Err(anyhow!("media_dir must not be empty"));
        }
        for owner in &self.owners {
            if owner.token.trim().is_empty() {
                return Err(anyhow!("owner token must not be empty"));
            }
            if owner.identity.owner_id.trim().is_empty() {
                return Err(anyhow!("owner_id must not be empty"));
            }
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
