//! Typed application settings, loaded from a JSON file with env/CLI override
//! precedence and persisted atomically.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Clone)]
struct PartialSettings {
    #[serde(default)]
    folder: Option<PathBuf>,
    #[serde(default)]
    continuous_export: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportSettings {
    pub folder: Option<PathBuf>,
    pub continuous_export: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            folder: None,
            continuous_export: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    pub folder: Option<PathBuf>,
    pub continuous_export: Option<bool>,
}

pub fn default_settings_path() -> PathBuf {
    home_dir().join(".ente-export").join("settings.json")
}

pub fn default_log_file_path() -> PathBuf {
    home_dir().join(".ente-export").join("logs").join("export.log")
}

impl ExportSettings {
    pub fn resolve_settings_path(flag_path: Option<&Path>) -> PathBuf {
        if let Some(p) = flag_path {
            return absolutize_path(p);
        }
        if let Ok(env_path) = std::env::var("ENTE_EXPORT_SETTINGS_PATH") {
            let env_path = env_path.trim();
            if !env_path.is_empty() {
                return absolutize_path(Path::new(env_path));
            }
        }
        absolutize_path(&default_settings_path())
    }

    pub fn load_file_only(path: &Path) -> Result<Self> {
        let partial = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("read settings {}", path.display()))?;
            serde_json::from_str::<PartialSettings>(&data).context("parse settings json")?
        } else {
            PartialSettings::default()
        };

        let mut folder = partial.folder;
        if folder.is_none() {
            if let Ok(env_folder) = std::env::var("ENTE_EXPORT_FOLDER") {
                if !env_folder.trim().is_empty() {
                    folder = Some(PathBuf::from(env_folder));
                }
            }
        }

        let mut continuous_export = partial.continuous_export.unwrap_or(false);
        if let Ok(env_continuous) = std::env::var("ENTE_EXPORT_CONTINUOUS") {
            let v = env_continuous.trim().to_ascii_lowercase();
            if v == "1" || v == "true" {
                continuous_export = true;
            } else if v == "0" || v == "false" {
                continuous_export = false;
            }
        }

        Ok(ExportSettings {
            folder,
            continuous_export,
        })
    }

    /// Apply CLI-flag overrides, which take precedence over both the env
    /// layer and the file.
    pub fn load_with_overrides(path: &Path, overrides: SettingsOverrides) -> Result<Self> {
        let mut cfg = Self::load_file_only(path)?;
        if let Some(folder) = overrides.folder {
            cfg.folder = Some(folder);
        }
        if let Some(continuous) = overrides.continuous_export {
            cfg.continuous_export = continuous;
        }
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize settings")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &raw).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

fn absolutize_path(p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(p))
            .unwrap_or_else(|_| p.to_path_buf())
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = std::env::temp_dir().join("ente-export-settings-missing.json");
        let _ = std::fs::remove_file(&tmp);
        let cfg = ExportSettings::load_file_only(&tmp).unwrap();
        assert_eq!(cfg, ExportSettings::default());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let tmp = std::env::temp_dir().join("ente-export-settings-roundtrip.json");
        let cfg = ExportSettings {
            folder: Some(PathBuf::from("/exports/Ente Photos")),
            continuous_export: true,
        };
        cfg.save(&tmp).unwrap();
        let loaded = ExportSettings::load_file_only(&tmp).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn overrides_take_precedence_over_file() {
        let tmp = std::env::temp_dir().join("ente-export-settings-overrides.json");
        ExportSettings {
            folder: Some(PathBuf::from("/a")),
            continuous_export: false,
        }
        .save(&tmp)
        .unwrap();

        let cfg = ExportSettings::load_with_overrides(
            &tmp,
            SettingsOverrides {
                folder: Some(PathBuf::from("/b")),
                continuous_export: Some(true),
            },
        )
        .unwrap();
        assert_eq!(cfg.folder, Some(PathBuf::from("/b")));
        assert!(cfg.continuous_export);
    }
}
