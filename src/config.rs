use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

use crate::error::ConfigError;

pub const DEFAULT_INTERPRETER: &str = "python";
pub const DEFAULT_ENGINE: &str = "engine_api.py";
pub const DEFAULT_SESSIONS_DIR: &str = "sessions";
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 16 * 1024 * 1024;

/// Companion modules the stock engine script imports.
pub const DEFAULT_REQUIRED_FILES: [&str; 5] = [
    "engine.py",
    "engine_classes.py",
    "input_handler.py",
    "sql.py",
    "config.py",
];

/// How to reach and drive the calculation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program that runs the engine script. `None` (or `""` in a file)
    /// executes the engine directly.
    #[serde(deserialize_with = "blank_path_as_none")]
    pub interpreter: Option<PathBuf>,
    pub engine_path: PathBuf,
    /// Extra arguments placed between the engine path and the file arguments.
    pub engine_args: Vec<String>,
    /// Working directory of the engine; defaults to the engine's parent directory.
    pub working_dir: Option<PathBuf>,
    /// Where per-attempt scratch directories are created; defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    pub timeout_secs: f64,
    /// Total attempts for transient failures, first one included.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Cap on captured stdout, stderr and response file, each.
    pub max_output_bytes: u64,
    /// Files that must exist next to the engine, relative to its working
    /// directory unless absolute.
    pub required_files: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter: Some(PathBuf::from(DEFAULT_INTERPRETER)),
            engine_path: PathBuf::from(DEFAULT_ENGINE),
            engine_args: Vec::new(),
            working_dir: None,
            scratch_dir: None,
            timeout_secs: 30.0,
            max_retries: 3,
            retry_backoff_ms: 1000,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            required_files: DEFAULT_REQUIRED_FILES.iter().map(PathBuf::from).collect(),
        }
    }
}

impl EngineConfig {
    /// Config that runs `engine` as an executable, without an interpreter
    /// or companion files.
    pub fn direct(engine: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: None,
            engine_path: engine.into(),
            required_files: Vec::new(),
            ..Self::default()
        }
    }

    /// Rejects settings the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                value: self.timeout_secs.to_string(),
                reason: "must be a positive number of seconds",
            });
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_output_bytes",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Required files that are not present, as resolved paths.
    pub fn missing_files(&self) -> Vec<PathBuf> {
        let base = self.effective_working_dir().unwrap_or_default();
        self.required_files
            .iter()
            .map(|file| base.join(file))
            .filter(|path| !path.is_file())
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::from_secs(30))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn effective_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| {
            self.engine_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
    }

    pub fn effective_scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn blank_path_as_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub sessions_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            sessions_dir: PathBuf::from(DEFAULT_SESSIONS_DIR),
        }
    }
}

impl AppConfig {
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading configuration from file");
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File (when given) first, then environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Applies `TRACKAFACE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(python) = get("TRACKAFACE_PYTHON") {
            self.engine.interpreter = Some(PathBuf::from(python));
        }
        if let Some(engine) = get("TRACKAFACE_ENGINE") {
            self.engine.engine_path = PathBuf::from(engine);
        }
        if let Some(dir) = get("TRACKAFACE_ENGINE_DIR") {
            self.engine.working_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get("TRACKAFACE_SESSIONS_DIR") {
            self.sessions_dir = PathBuf::from(dir);
        }
        if let Some(value) = get("TRACKAFACE_TIMEOUT_SECS") {
            self.engine.timeout_secs = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite() && *t > 0.0)
                .ok_or(ConfigError::InvalidEnv {
                    var: "TRACKAFACE_TIMEOUT_SECS",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = get("TRACKAFACE_MAX_RETRIES") {
            self.engine.max_retries =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "TRACKAFACE_MAX_RETRIES",
                    value: value.clone(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_desktop_install() {
        let config = AppConfig::default();
        assert_eq!(config.engine.interpreter, Some(PathBuf::from("python")));
        assert_eq!(config.engine.engine_path, PathBuf::from("engine_api.py"));
        assert_eq!(config.engine.timeout(), Duration::from_secs(30));
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.sessions_dir, PathBuf::from("sessions"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            sessions_dir = "/var/lib/trackaface"

            [engine]
            engine_path = "/opt/engine/engine_api.py"
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.sessions_dir, PathBuf::from("/var/lib/trackaface"));
        assert_eq!(config.engine.timeout(), Duration::from_secs(5));
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(
            config.engine.effective_working_dir(),
            Some(PathBuf::from("/opt/engine"))
        );
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackaface.toml");
        std::fs::write(&path, "engine = 3").unwrap();
        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("TRACKAFACE_PYTHON", "/usr/bin/python3"),
            ("TRACKAFACE_ENGINE", "/srv/engine_api.py"),
            ("TRACKAFACE_TIMEOUT_SECS", "2.5"),
            ("TRACKAFACE_MAX_RETRIES", "1"),
            ("TRACKAFACE_SESSIONS_DIR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(
            config.engine.interpreter,
            Some(PathBuf::from("/usr/bin/python3"))
        );
        assert_eq!(config.engine.engine_path, PathBuf::from("/srv/engine_api.py"));
        assert_eq!(config.engine.timeout(), Duration::from_millis(2500));
        assert_eq!(config.engine.max_retries, 1);
        // blank values are ignored
        assert_eq!(config.sessions_dir, PathBuf::from("sessions"));
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|k| (k == "TRACKAFACE_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "TRACKAFACE_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn blank_interpreter_runs_engine_directly() {
        let config: AppConfig = toml::from_str(
            r#"
            [engine]
            interpreter = ""
            engine_path = "/opt/engine/run"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.interpreter, None);
    }

    #[test]
    fn non_positive_timeouts_are_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let engine = EngineConfig {
                timeout_secs: bad,
                ..EngineConfig::default()
            };
            assert!(
                matches!(
                    engine.validate(),
                    Err(ConfigError::InvalidValue {
                        field: "timeout_secs",
                        ..
                    })
                ),
                "{bad}"
            );
        }
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn load_rejects_negative_timeout_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackaface.toml");
        std::fs::write(&path, "[engine]\ntimeout_secs = -5\n").unwrap();
        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn missing_files_resolve_against_engine_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("engine.py"), "").unwrap();
        let engine = EngineConfig {
            engine_path: dir.path().join("engine_api.py"),
            required_files: vec![PathBuf::from("engine.py"), PathBuf::from("sql.py")],
            ..EngineConfig::default()
        };
        assert_eq!(engine.missing_files(), vec![dir.path().join("sql.py")]);
        assert!(EngineConfig::direct("/opt/engine").missing_files().is_empty());
    }

    #[test]
    fn bare_engine_name_has_no_working_dir() {
        assert_eq!(EngineConfig::default().effective_working_dir(), None);
    }
}
