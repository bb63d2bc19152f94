//! Configuration management
//!
//! Settings load from a YAML file and are overridden by environment
//! variables with the `WT_` prefix, using `__` to address nested fields
//! (e.g. `WT_SERVER__PORT=9000`). API keys fall back to the standard
//! `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    /// Default sandbox root when no workspace is selected
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Named workspaces selectable by the client
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfig>,
    /// Optional projws projects.json to derive workspaces from
    #[serde(default)]
    pub projws_path: String,
    #[serde(default)]
    pub anthropic_api_key: String,
    #[serde(default)]
    pub openai_api_key: String,
}

fn default_workspace_root() -> String {
    "~/workspace".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    #[serde(default = "default_claude_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_turns")]
    pub max_conversation_turns: usize,
}

fn default_claude_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_turns() -> usize {
    50
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: default_claude_model(),
            max_tokens: default_max_tokens(),
            max_conversation_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_model")]
    pub model_size: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_size: default_stt_model(),
            language: default_language(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub instructions: String,
}

fn default_tts_model() -> String {
    "gpt-4o-mini-tts".to_string()
}

fn default_voice() -> String {
    "nova".to_string()
}

fn default_speed() -> f32 {
    1.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: default_tts_model(),
            voice: default_voice(),
            speed: default_speed(),
            instructions: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_chunk_ms")]
    pub chunk_duration_ms: u32,
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_chunk_ms() -> u32 {
    100
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            chunk_duration_ms: default_chunk_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_duration_ms: u32,
    #[serde(default = "default_min_silence_ms")]
    pub min_silence_duration_ms: u32,
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_min_speech_ms() -> u32 {
    250
}

fn default_min_silence_ms() -> u32 {
    800
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            min_speech_duration_ms: default_min_speech_ms(),
            min_silence_duration_ms: default_min_silence_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
}

fn default_command_timeout() -> u64 {
    30
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            blocked_commands: Vec::new(),
        }
    }
}

/// A named workspace directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub name: String,
    pub path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            workspace_root: default_workspace_root(),
            claude: ClaudeConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            safety: SafetyConfig::default(),
            workspaces: Vec::new(),
            projws_path: String::new(),
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
        }
    }
}

/// Expand a leading `~` and absolutize against the current directory.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/"))
            .join(rest)
    } else if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
    } else {
        PathBuf::from(path)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    };

    absolute.canonicalize().unwrap_or(absolute)
}

/// Load settings from a YAML file, overridden by `WT_`-prefixed env vars.
///
/// The config path resolves in order: explicit argument, `WT_CONFIG`,
/// `config.yaml` in the current directory. A missing file is not an error.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => std::env::var("WT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.yaml")),
    };

    let mut data = if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str::<serde_yaml::Value>(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        serde_yaml::Value::Mapping(Default::default())
    };

    // An empty file parses as null; treat it as an empty mapping
    if data.is_null() {
        data = serde_yaml::Value::Mapping(Default::default());
    }
    if !matches!(data, serde_yaml::Value::Mapping(_)) {
        anyhow::bail!("Config file must contain a YAML mapping: {}", path.display());
    }

    if let serde_yaml::Value::Mapping(map) = &mut data {
        apply_env_overrides(
            map,
            std::env::vars().filter_map(|(k, v)| {
                k.strip_prefix("WT_")
                    .filter(|rest| *rest != "CONFIG")
                    .map(|rest| (rest.to_string(), v))
            }),
        );
    }

    let mut settings: Settings =
        serde_yaml::from_value(data).context("Invalid configuration")?;

    // Standard env vars win only when the config left the keys empty
    if settings.anthropic_api_key.is_empty() {
        settings.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    }
    if settings.openai_api_key.is_empty() {
        settings.openai_api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    }

    settings.workspace_root = expand_path(&settings.workspace_root)
        .to_string_lossy()
        .into_owned();
    for ws in &mut settings.workspaces {
        ws.path = expand_path(&ws.path).to_string_lossy().into_owned();
    }

    if settings.workspaces.is_empty() && !settings.projws_path.is_empty() {
        let projws_file = expand_path(&settings.projws_path);
        if projws_file.exists() {
            settings.workspaces = load_projws_workspaces(&projws_file)?;
        }
    }

    Ok(settings)
}

/// Apply `PREFIX_A__B=value` style overrides onto the raw YAML tree.
///
/// Key segments are lower-cased; values parse as YAML scalars so numbers
/// and booleans keep their types.
fn apply_env_overrides(
    root: &mut serde_yaml::Mapping,
    vars: impl Iterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let segments: Vec<String> = key.split("__").map(|s| s.to_ascii_lowercase()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            continue;
        }

        let parsed: serde_yaml::Value = serde_yaml::from_str(&value)
            .unwrap_or(serde_yaml::Value::String(value));

        set_nested(root, &segments, parsed);
    }
}

fn set_nested(map: &mut serde_yaml::Mapping, segments: &[String], value: serde_yaml::Value) {
    let key = serde_yaml::Value::String(segments[0].clone());
    if segments.len() == 1 {
        map.insert(key, value);
        return;
    }

    if !matches!(map.get(&key), Some(serde_yaml::Value::Mapping(_))) {
        map.insert(
            key.clone(),
            serde_yaml::Value::Mapping(Default::default()),
        );
    }
    if let Some(serde_yaml::Value::Mapping(child)) = map.get_mut(&key) {
        set_nested(child, &segments[1..], value);
    }
}

/// Derive workspaces from a projws `projects.json` file.
///
/// Expected shape: `{"projects": {"key": {"label": ..., "cwd": ...}}}`.
fn load_projws_workspaces(path: &Path) -> Result<Vec<WorkspaceConfig>> {
    #[derive(Deserialize)]
    struct ProjwsFile {
        #[serde(default)]
        projects: std::collections::BTreeMap<String, ProjwsProject>,
    }

    #[derive(Deserialize)]
    struct ProjwsProject {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read projws file: {}", path.display()))?;
    let parsed: ProjwsFile = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse projws file: {}", path.display()))?;

    let mut workspaces = Vec::new();
    for (key, project) in parsed.projects {
        if let Some(cwd) = project.cwd {
            workspaces.push(WorkspaceConfig {
                name: project.label.unwrap_or(key),
                path: expand_path(&cwd).to_string_lossy().into_owned(),
            });
        }
    }
    Ok(workspaces)
}
