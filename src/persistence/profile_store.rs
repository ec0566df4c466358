use super::ProfileConfig;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "openremap";
const PROFILE_DIR: &str = "profiles";
const DEFAULT_PROFILE_FILE: &str = "default.toml";

// Shipped with the binary, written on first start
const DEFAULT_PROFILE: &str = include_str!("../../profiles/default.toml");

pub fn default_profile_path() -> PathBuf {
    let mut path = get_config_dir();
    path.push(CONFIG_DIR);
    path.push(PROFILE_DIR);
    path.push(DEFAULT_PROFILE_FILE);
    path
}

pub async fn load_profile(path: &Path) -> Result<ProfileConfig> {
    debug!("Loading profile from {}", path.display());
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read profile {}: {}", path.display(), e))?;
    let profile = ProfileConfig::from_toml_str(&content)
        .map_err(|e| eyre!("Failed to load profile {}: {}", path.display(), e))?;
    info!(
        "Loaded profile '{}' with {} modes",
        profile.name,
        profile.modes.len()
    );
    Ok(profile)
}

pub async fn save_profile(path: &Path, profile: &ProfileConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !tokio::fs::try_exists(parent)
            .await
            .map_err(|e| eyre!("Failed to check if profile directory exists: {}", e))?
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create profile directory: {}", e))?;
        }
    }

    let content = profile.to_toml_string()?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| eyre!("Failed to write profile {}: {}", path.display(), e))?;
    info!("Saved profile '{}' to {}", profile.name, path.display());
    Ok(())
}

/// Writes the bundled example profile if `path` does not exist yet
pub async fn ensure_default_profile(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if profile exists: {}", e))?
    {
        return Ok(());
    }

    warn!(
        "No profile at {}, writing the example profile. Edit the device ids before use.",
        path.display()
    );
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("Failed to create profile directory: {}", e))?;
    }
    tokio::fs::write(path, DEFAULT_PROFILE)
        .await
        .map_err(|e| eyre!("Failed to write default profile: {}", e))?;
    Ok(())
}

pub(crate) fn get_config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(file: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("openremap-test-{}", uuid::Uuid::new_v4()));
        path.push(file);
        path
    }

    #[test]
    fn bundled_profile_parses() {
        let profile = ProfileConfig::from_toml_str(DEFAULT_PROFILE).unwrap();
        assert!(!profile.modes.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips_through_disk() {
        let path = scratch_path("profile.toml");
        let profile = ProfileConfig::from_toml_str(DEFAULT_PROFILE).unwrap();

        save_profile(&path, &profile).await.unwrap();
        let loaded = load_profile(&path).await.unwrap();
        assert_eq!(loaded, profile);

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }

    #[tokio::test]
    async fn ensure_default_writes_only_once() {
        let path = scratch_path("default.toml");
        ensure_default_profile(&path).await.unwrap();
        tokio::fs::write(&path, "name = \"changed\"\nmodes = []\n")
            .await
            .unwrap();
        ensure_default_profile(&path).await.unwrap();
        let loaded = load_profile(&path).await.unwrap();
        assert_eq!(loaded.name, "changed");

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        assert!(load_profile(&scratch_path("missing.toml")).await.is_err());
    }
}
