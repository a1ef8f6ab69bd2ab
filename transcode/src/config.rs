use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::classify::FileClassifier;
use crate::encoding::EncodingName;

pub const DEFAULT_CONFIG_FILE: &str = "transcode.yaml";
pub const DEFAULT_CONCURRENCY: usize = 5;

/// User settings, read once at the start of each command and not observed
/// again until the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    pub concurrency: usize,
    #[serde(alias = "createBackup")]
    pub create_backup: bool,
    #[serde(alias = "showDetailedResults")]
    pub show_detailed_results: bool,
    #[serde(alias = "excludePatterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(alias = "autoReopenFiles")]
    pub auto_reopen_files: bool,
    #[serde(alias = "includeHidden")]
    pub include_hidden: bool,
    pub hints: BTreeMap<PathBuf, EncodingName>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            create_backup: true,
            show_detailed_results: false,
            exclude_patterns: Vec::new(),
            auto_reopen_files: false,
            include_hidden: false,
            hints: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be a positive integer");
        }
        FileClassifier::new(&self.exclude_patterns)?;
        Ok(())
    }
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub concurrency: Option<usize>,
    pub no_backup: bool,
    pub show_detailed_results: bool,
    pub exclude_patterns: Vec<String>,
    pub include_hidden: bool,
    pub hints: Vec<(PathBuf, EncodingName)>,
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let data = fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    let settings: Settings = if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing config {}", path.display()))?
    } else {
        serde_yaml::from_slice(&data)
            .with_context(|| format!("parsing config {}", path.display()))?
    };
    Ok(settings)
}

/// Loads the explicit config file, else `transcode.yaml` in the working
/// directory when present, else defaults; then applies `overrides`.
pub fn resolve_settings(explicit: Option<&Path>, overrides: &SettingsOverrides) -> Result<Settings> {
    let base = match explicit {
        Some(path) => load_settings(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            load_settings(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => Settings::default(),
    };
    let merged = merge_settings(base, overrides);
    merged.validate()?;
    Ok(merged)
}

pub fn merge_settings(base: Settings, overrides: &SettingsOverrides) -> Settings {
    let mut merged = base;
    if let Some(concurrency) = overrides.concurrency {
        merged.concurrency = concurrency;
    }
    if overrides.no_backup {
        merged.create_backup = false;
    }
    if overrides.show_detailed_results {
        merged.show_detailed_results = true;
    }
    if overrides.include_hidden {
        merged.include_hidden = true;
    }
    merged
        .exclude_patterns
        .extend(overrides.exclude_patterns.iter().cloned());
    for (path, encoding) in &overrides.hints {
        merged.hints.insert(path.clone(), *encoding);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.concurrency, 5);
        assert!(settings.create_backup);
        assert!(!settings.show_detailed_results);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn yaml_config_fills_missing_fields_with_defaults() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("transcode.yaml");
        fs::write(
            &path,
            "concurrency: 2\nexcludePatterns:\n  - \"*.min.js\"\nhints:\n  legacy.txt: Big5\n",
        )
        .expect("write config");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.exclude_patterns, vec!["*.min.js".to_string()]);
        assert!(settings.create_backup);
        assert_eq!(
            settings.hints.get(Path::new("legacy.txt")),
            Some(&EncodingName::Big5)
        );
    }

    #[test]
    fn json_config_is_detected_by_extension() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("settings.json");
        fs::write(&path, r#"{"createBackup": false, "concurrency": 8}"#).expect("write config");
        let settings = load_settings(&path).expect("load");
        assert!(!settings.create_backup);
        assert_eq!(settings.concurrency, 8);
    }

    #[test]
    fn unknown_hint_encodings_are_rejected() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("bad.yaml");
        fs::write(&path, "hints:\n  a.txt: not-an-encoding\n").expect("write config");
        assert!(load_settings(&path).is_err());
    }

    #[test]
    fn overrides_win_over_file_values() {
        let overrides = SettingsOverrides {
            concurrency: Some(3),
            no_backup: true,
            exclude_patterns: vec!["*.log".into()],
            hints: vec![(PathBuf::from("x.txt"), EncodingName::ShiftJis)],
            ..SettingsOverrides::default()
        };
        let merged = merge_settings(Settings::default(), &overrides);
        assert_eq!(merged.concurrency, 3);
        assert!(!merged.create_backup);
        assert_eq!(merged.exclude_patterns, vec!["*.log".to_string()]);
        assert_eq!(merged.hints.len(), 1);
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let settings = Settings {
            concurrency: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
