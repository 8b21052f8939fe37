use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Read-only settings surface for one stream. Loaded once by the process
/// supervisor and injected into the handler; the handler never mutates it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Directory receiving run files (summary, metadata, patches, code).
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,

    /// Root of the user's working tree, used for git operations.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Identifier of the run this stream serves.
    #[serde(default)]
    pub run_id: String,

    /// Skip git availability checks and patch capture.
    #[serde(default)]
    pub disable_git: bool,

    /// Copy the user program under `<files_dir>/code/` at run start.
    #[serde(default)]
    pub save_code: bool,

    /// User program path relative to the project root.
    #[serde(default)]
    pub program_relpath: String,

    /// Absolute path of the user program on disk.
    #[serde(default)]
    pub program_abspath: String,

    /// Offline-sync replay mode: suppress synthesized records and local files.
    #[serde(default)]
    pub sync: bool,

    /// Server-stepped shared mode: the server assigns history step numbers.
    #[serde(default)]
    pub shared: bool,

    /// Do not start the system monitor.
    #[serde(default)]
    pub disable_stats: bool,

    /// Do not write the run metadata file.
    #[serde(default)]
    pub disable_meta: bool,

    // Identity fields copied verbatim into the run metadata file.
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub python: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub cuda: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub code_path_local: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub docker: String,
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub colab_url: String,

    /// Minimum interval between rate-limited summary flushes. Default: 30s.
    #[serde(default = "default_summary_debounce", with = "humantime_serde")]
    pub summary_debounce_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            files_dir: default_files_dir(),
            root_dir: default_root_dir(),
            run_id: String::new(),
            disable_git: false,
            save_code: false,
            program_relpath: String::new(),
            program_abspath: String::new(),
            sync: false,
            shared: false,
            disable_stats: false,
            disable_meta: false,
            os: String::new(),
            python: String::new(),
            host: String::new(),
            cuda: String::new(),
            program: String::new(),
            code_path_local: String::new(),
            email: String::new(),
            username: String::new(),
            docker: String::new(),
            executable: String::new(),
            args: Vec::new(),
            colab_url: String::new(),
            summary_debounce_interval: default_summary_debounce(),
        }
    }
}

impl Settings {
    /// Loads settings from a YAML file and validates them.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;

        let settings: Settings = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing settings file {}", path.display()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.summary_debounce_interval.is_zero() {
            bail!("summary_debounce_interval must be > 0");
        }

        if self.save_code && self.program_relpath.is_empty() && self.program_abspath.is_empty() {
            bail!("save_code requires program_relpath and program_abspath");
        }

        Ok(())
    }
}

fn default_files_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_summary_debounce() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.files_dir, PathBuf::from("."));
        assert!(!settings.sync);
        assert!(!settings.shared);
        assert_eq!(settings.summary_debounce_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_default_matches_empty_config() {
        let parsed: Settings = serde_yaml::from_str("{}").expect("settings should parse");
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_parse_yaml_settings() {
        let settings: Settings = serde_yaml::from_str(
            r#"
files_dir: /tmp/run-files
run_id: abc123
shared: true
summary_debounce_interval: 5s
"#,
        )
        .expect("settings should parse");

        assert_eq!(settings.files_dir, PathBuf::from("/tmp/run-files"));
        assert_eq!(settings.run_id, "abc123");
        assert!(settings.shared);
        assert_eq!(settings.summary_debounce_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_debounce() {
        let settings: Settings = serde_yaml::from_str("summary_debounce_interval: 0s")
            .expect("settings should parse");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_save_code_without_program() {
        let settings: Settings =
            serde_yaml::from_str("save_code: true").expect("settings should parse");
        let err = settings.validate().expect_err("should fail");
        assert!(err.to_string().contains("save_code"));
    }
}
