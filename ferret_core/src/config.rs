use crate::interp::{DEFAULT_FUEL, DEFAULT_MAX_CALL_DEPTH, InterpOptions};
use crate::mutate::DEFAULT_BUFFER_LEN;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    /// Module that holds the entry function, e.g. `demo.pages`. Its
    /// namespace decides which loaded modules get instrumented.
    pub module: String,
    /// Entry function, either a bare name or a full signature such as
    /// `parse(markup)` when overloads need disambiguation.
    pub function: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fixed seed for replayable sessions. Left empty, each run draws a
    /// fresh one and prints it.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_iterations: Option<u64>,
    #[serde(default = "default_buffer_len")]
    pub buffer_len: usize,
    #[serde(default = "default_seed_inputs")]
    pub seed_inputs: Vec<String>,
}

pub fn default_timeout_secs() -> u64 {
    20
}

fn default_buffer_len() -> usize {
    DEFAULT_BUFFER_LEN
}

pub fn default_seed_inputs() -> Vec<String> {
    vec![
        "<html><body><h1>Test</h1></body></html>".to_string(),
        "<!DOCTYPE html><html><head><title>Test</title></head><body></body></html>".to_string(),
        "<html><body><div>Unclosed tag".to_string(),
    ]
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            seed: None,
            max_iterations: None,
            buffer_len: default_buffer_len(),
            seed_inputs: default_seed_inputs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct InterpSettings {
    #[serde(default = "default_fuel")]
    pub fuel: u64,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_fuel() -> u64 {
    DEFAULT_FUEL
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

impl InterpSettings {
    pub fn options(&self) -> InterpOptions {
        InterpOptions {
            fuel: self.fuel,
            max_call_depth: self.max_call_depth,
        }
    }
}

impl Default for InterpSettings {
    fn default() -> Self {
        Self {
            fuel: default_fuel(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ArtifactSettings {
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
    /// When set, the session summary is also written here as JSON.
    #[serde(default)]
    pub report_json: Option<PathBuf>,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            report_json: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FerretConfig {
    pub target: TargetSettings,
    /// Directories probed, in order, for `.fmod` files on lazy loads.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub interp: InterpSettings,
    #[serde(default)]
    pub artifacts: ArtifactSettings,
}

impl FerretConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: FerretConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::DEFAULT_FUEL;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn full_config_parses() {
        let text = r#"
search-paths = ["modules", "more/modules"]

[target]
module = "demo.pages"
function = "parse(markup)"

[session]
timeout-secs = 5
seed = 99
max-iterations = 1000
buffer-len = 64
seed-inputs = ["<div>"]

[interp]
fuel = 5000
max-call-depth = 8

[artifacts]
dir = "out"
report-json = "out/report.json"
"#;
        let config: FerretConfig = toml::from_str(text).unwrap();
        assert_eq!(config.target.module, "demo.pages");
        assert_eq!(config.target.function, "parse(markup)");
        assert_eq!(
            config.search_paths,
            vec![PathBuf::from("modules"), PathBuf::from("more/modules")]
        );
        assert_eq!(config.session.timeout_secs, 5);
        assert_eq!(config.session.seed, Some(99));
        assert_eq!(config.session.max_iterations, Some(1000));
        assert_eq!(config.session.buffer_len, 64);
        assert_eq!(config.session.seed_inputs, vec!["<div>".to_string()]);
        assert_eq!(config.interp.fuel, 5000);
        assert_eq!(config.interp.max_call_depth, 8);
        assert_eq!(config.artifacts.dir, PathBuf::from("out"));
        assert_eq!(
            config.artifacts.report_json,
            Some(PathBuf::from("out/report.json"))
        );
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let text = r#"
[target]
module = "demo.pages"
function = "parse"
"#;
        let config: FerretConfig = toml::from_str(text).unwrap();
        assert!(config.search_paths.is_empty());
        assert_eq!(config.session.timeout_secs, 20);
        assert_eq!(config.session.seed, None);
        assert_eq!(config.session.max_iterations, None);
        assert_eq!(config.session.buffer_len, 500);
        assert_eq!(config.session.seed_inputs.len(), 3);
        assert_eq!(config.interp.fuel, DEFAULT_FUEL);
        assert_eq!(config.interp.max_call_depth, 64);
        assert_eq!(config.artifacts.dir, PathBuf::from("."));
        assert_eq!(config.artifacts.report_json, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = r#"
[target]
module = "demo.pages"
function = "parse"

[session]
timeout = 5
"#;
        assert!(toml::from_str::<FerretConfig>(text).is_err());
    }

    #[test]
    fn interp_settings_map_onto_options() {
        let settings = InterpSettings {
            fuel: 777,
            max_call_depth: 4,
        };
        let options = settings.options();
        assert_eq!(options.fuel, 777);
        assert_eq!(options.max_call_depth, 4);
    }

    #[test]
    fn load_from_file_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferret.toml");
        fs::write(
            &path,
            "[target]\nmodule = \"demo.pages\"\nfunction = \"check\"\n",
        )
        .unwrap();
        let config = FerretConfig::load_from_file(&path).unwrap();
        assert_eq!(config.target.function, "check");
    }

    #[test]
    fn load_from_file_reports_a_missing_file() {
        let path = PathBuf::from("/definitely/not/here.toml");
        let error = FerretConfig::load_from_file(&path).unwrap_err();
        assert!(error.to_string().contains("Failed to read config file"));
    }
}
