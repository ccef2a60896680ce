//! Configuration store, embedding models, and file filtering rules
//!
//! The store is a flat key/value YAML document at a per-user path. Every
//! value is a string or null; numeric options are parsed once, during
//! validation, into [`Settings`].

use crate::error::{Result, TalkError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Directory under the home directory holding the config file
pub const CONFIG_DIR_NAME: &str = "talk_codebase";

/// File name of the YAML configuration
pub const CONFIG_FILE_NAME: &str = "talk_codebase_config.yaml";

/// Default value for every key of the configuration schema
pub const DEFAULT_CONFIG: &[(&str, Option<&str>)] = &[
    ("api_key", None),
    ("chunk_overlap", Some("256")),
    ("chunk_size", Some("2056")),
    ("embedding_model", Some("minilm")),
    ("k", Some("2")),
    ("max_tokens", Some("16000")),
    ("model_name", Some("gpt-3.5-turbo-16k-0613")),
    ("model_path", Some("models/ggml-gpt4all-j-v1.3-groovy.bin")),
    ("model_type", Some("openai")),
    ("repo_path", None),
    ("temperature", Some("0.7")),
    ("venv_path", None),
];

fn default_value(key: &str) -> Option<&'static str> {
    DEFAULT_CONFIG
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, v)| *v)
}

/// Which language model answers queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// OpenAI chat completions, requires `api_key`
    OpenAi,
    /// Local model, requires `model_path`
    Local,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = TalkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" => Ok(Self::Local),
            _ => Err(TalkError::Config(format!(
                "Unknown model type: {}. Valid options: openai, local",
                s
            ))),
        }
    }
}

/// Supported embedding models (all run locally via ONNX)
///
/// These models are downloaded on first use and cached locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmbeddingModel {
    /// Fast, small model (384 dims, ~30MB) - good for most use cases
    #[default]
    AllMiniLmL6V2,
    /// Higher quality (384 dims, ~90MB) - better semantic understanding
    BgeSmallEnV15,
    /// Best quality for code (768 dims, ~90MB)
    NomicEmbedTextV15,
}

impl EmbeddingModel {
    /// Get the HuggingFace model identifier
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            Self::NomicEmbedTextV15 => "nomic-ai/nomic-embed-text-v1.5",
        }
    }

    /// Get the embedding vector dimension
    pub fn dimension(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 => 384,
            Self::BgeSmallEnV15 => 384,
            Self::NomicEmbedTextV15 => 768,
        }
    }
}

impl FromStr for EmbeddingModel {
    type Err = TalkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minilm" | "all-minilm-l6-v2" | "default" => Ok(Self::AllMiniLmL6V2),
            "bge" | "bge-small" | "bge-small-en-v1.5" => Ok(Self::BgeSmallEnV15),
            "nomic" | "nomic-embed" | "nomic-embed-text-v1.5" => Ok(Self::NomicEmbedTextV15),
            _ => Err(TalkError::Config(format!(
                "Unknown embedding model: {}. Valid options: minilm, bge, nomic",
                s
            ))),
        }
    }
}

/// Key/value configuration as stored on disk.
///
/// Keys outside the default schema are kept as-is so a round trip through
/// the store never drops them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, Option<String>>,
}

impl Configuration {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// The full default table
    pub fn defaults() -> Self {
        fill_defaults(Self::new())
    }

    /// Value for `key`, or `None` when the key is missing or null
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_deref())
    }

    /// Value for `key` if it holds something other than whitespace
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Option<String>) {
        self.values.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse a YAML document.
    ///
    /// Numbers and booleans are read back as strings; an empty document is an
    /// empty configuration.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mapping = match document {
            serde_yaml::Value::Null => return Ok(Self::new()),
            serde_yaml::Value::Mapping(mapping) => mapping,
            _ => {
                return Err(TalkError::Config(
                    "Configuration file must contain a mapping".to_string(),
                ))
            }
        };

        let mut config = Self::new();
        for (key, value) in mapping {
            let key = scalar_to_string(&key).ok_or_else(|| {
                TalkError::Config(format!("Unsupported configuration key: {:?}", key))
            })?;
            let value = match value {
                serde_yaml::Value::Null => None,
                other => Some(scalar_to_string(&other).ok_or_else(|| {
                    TalkError::Config(format!("Unsupported value for `{}`: expected a scalar", key))
                })?),
            };
            config.values.insert(key, value);
        }

        Ok(config)
    }

    /// Serialize with sorted keys so the file stays stable across writes
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.values)?)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Populate every schema key that is missing. Present keys, null ones
/// included, are left alone, so applying this twice changes nothing.
pub fn fill_defaults(mut config: Configuration) -> Configuration {
    for (key, value) in DEFAULT_CONFIG {
        if !config.contains_key(key) {
            config.set(*key, value.map(str::to_string));
        }
    }
    config
}

/// Typed view of a validated configuration
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub model_type: ModelType,
    pub api_key: Option<String>,
    pub model_name: Option<String>,
    pub model_path: Option<PathBuf>,
    pub embedding_model: EmbeddingModel,
    pub max_tokens: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub k: usize,
    pub temperature: f32,
    pub repo_path: Option<PathBuf>,
    pub venv_path: Option<PathBuf>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("model_type", &self.model_type)
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("model_name", &self.model_name)
            .field("model_path", &self.model_path)
            .field("embedding_model", &self.embedding_model)
            .field("max_tokens", &self.max_tokens)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("k", &self.k)
            .field("temperature", &self.temperature)
            .field("repo_path", &self.repo_path)
            .field("venv_path", &self.venv_path)
            .finish()
    }
}

/// A configuration that passed [`validate`], together with its typed view.
/// The configuration inside is exactly what gets persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    config: Configuration,
    settings: Settings,
}

impl ValidatedConfig {
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn model_type(&self) -> ModelType {
        self.settings.model_type
    }
}

/// Check a configuration without modifying it.
///
/// Every schema key must be present, the model type must be known, and the
/// credential for that model type must be non-empty.
pub fn validate(config: &Configuration) -> Result<ValidatedConfig> {
    if let Some((missing, _)) = DEFAULT_CONFIG.iter().find(|(k, _)| !config.contains_key(k)) {
        return Err(TalkError::Config(format!("Missing key `{}`", missing)));
    }

    let model_type: ModelType = config
        .non_empty("model_type")
        .ok_or_else(|| TalkError::Config("Model type not configured".to_string()))?
        .parse()?;

    let api_key = config.non_empty("api_key").map(str::to_string);
    let model_path = config.non_empty("model_path").map(PathBuf::from);
    let model_name = config.non_empty("model_name").map(str::to_string);

    match model_type {
        ModelType::OpenAi => {
            if api_key.is_none() {
                return Err(TalkError::Config("API key not configured".to_string()));
            }
            if model_name.is_none() {
                return Err(TalkError::Config("Model name not configured".to_string()));
            }
        }
        ModelType::Local => {
            if model_path.is_none() {
                return Err(TalkError::Config("Model path not configured".to_string()));
            }
        }
    }

    let chunk_size: usize = parse_number(config, "chunk_size")?;
    let chunk_overlap: usize = parse_number(config, "chunk_overlap")?;
    let k: usize = parse_number(config, "k")?;
    let max_tokens: usize = parse_number(config, "max_tokens")?;
    let temperature: f32 = parse_number(config, "temperature")?;

    if chunk_size == 0 {
        return Err(TalkError::Config("`chunk_size` must be positive".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(TalkError::Config(format!(
            "`chunk_overlap` ({}) must be smaller than `chunk_size` ({})",
            chunk_overlap, chunk_size
        )));
    }
    if k == 0 {
        return Err(TalkError::Config("`k` must be at least 1".to_string()));
    }

    let embedding_model = match config.non_empty("embedding_model") {
        Some(name) => name.parse()?,
        None => EmbeddingModel::default(),
    };

    let settings = Settings {
        model_type,
        api_key,
        model_name,
        model_path,
        embedding_model,
        max_tokens,
        chunk_size,
        chunk_overlap,
        k,
        temperature,
        repo_path: config.non_empty("repo_path").map(PathBuf::from),
        venv_path: config.non_empty("venv_path").map(PathBuf::from),
    };

    Ok(ValidatedConfig {
        config: config.clone(),
        settings,
    })
}

fn parse_number<T: FromStr>(config: &Configuration, key: &str) -> Result<T> {
    let raw = config
        .non_empty(key)
        .ok_or_else(|| TalkError::Config(format!("`{}` not configured", key)))?;
    raw.parse()
        .map_err(|_| TalkError::Config(format!("`{}` is not a valid number: {}", key, raw)))
}

/// Hide all but the last four characters of a secret
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Reads and writes the configuration file at one explicit path
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store backed by the given file
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store backed by the standard file name inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CONFIG_FILE_NAME))
    }

    /// `~/talk_codebase/talk_codebase_config.yaml`
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| TalkError::Config("Could not determine home directory".to_string()))?;
        Ok(Self::in_dir(&home.join(CONFIG_DIR_NAME)))
    }

    /// Use `dir` when given, the default location otherwise
    pub fn resolve(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Ok(Self::in_dir(dir)),
            None => Self::default_location(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration; `None` when the file does not exist or is empty
    pub fn load(&self) -> Result<Option<Configuration>> {
        if !self.path.exists() {
            debug!("No configuration at {:?}", self.path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        Configuration::from_yaml(&content).map(Some)
    }

    /// Load the configuration, writing the default table first if there is none
    pub fn load_or_init(&self) -> Result<Configuration> {
        match self.load()? {
            Some(config) => Ok(config),
            None => {
                info!("Writing default configuration to {:?}", self.path);
                let config = Configuration::defaults();
                self.persist(&config)?;
                Ok(config)
            }
        }
    }

    /// Write the whole configuration via a temporary file and rename
    pub fn persist(&self, config: &Configuration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = config.to_yaml()?;
        let tmp_path = self.path.with_extension("yaml.tmp");

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(yaml.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;
        debug!("Saved {} configuration keys to {:?}", config.len(), self.path);

        Ok(())
    }

    /// Select the model used for chat and persist the result.
    ///
    /// `openai` stores the API key as given (null when omitted) and the model
    /// name; `local` stores the model path. Omitted names and paths fall back
    /// to the defaults.
    pub fn configure(
        &self,
        model_type: ModelType,
        api_key: Option<String>,
        model_name: Option<String>,
        model_path: Option<String>,
    ) -> Result<Configuration> {
        let mut config = self.load()?.unwrap_or_default();
        config.set("model_type", Some(model_type.as_str().to_string()));

        match model_type {
            ModelType::OpenAi => {
                config.set("api_key", api_key);
                let name = model_name.or_else(|| default_value("model_name").map(str::to_string));
                config.set("model_name", name);
            }
            ModelType::Local => {
                let path = model_path.or_else(|| default_value("model_path").map(str::to_string));
                config.set("model_path", path);
            }
        }

        let config = fill_defaults(config);
        self.persist(&config)?;
        info!("Configuration saved to {:?}", self.path);

        Ok(config)
    }
}

/// File extensions that should be indexed
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "js", "mjs", "ts", "tsx", "css", "scss", "less", "html", "htm", "json", "py", "java", "c",
    "cpp", "cs", "go", "php", "rb", "rs", "swift", "kt", "scala", "m", "h", "sh", "pl", "pm",
    "lua", "sql", "gml", "md", "csv",
];

/// Directories never descended into
pub const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__", ".venv", ".git", ".idea", "venv", "env", "node_modules", "dist", "build",
    ".vscode", ".github", ".gitlab", "vector_store", "models", "data", "logs", "output",
];

/// File names, or name suffixes, never indexed
pub const EXCLUDED_FILES: &[&str] = &[
    "requirements.txt", "package.json", "package-lock.json", "yarn.lock", ".yy", ".yyp", ".yyz",
    "__init__.py", "__main__.py", ".gitignore",
];

/// Check if a file should be indexed based on its name and extension
pub fn should_index_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    if EXCLUDED_FILES.iter().any(|excluded| name.ends_with(excluded)) {
        return false;
    }

    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check if a directory is on the exclusion list
pub fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn openai_config(api_key: Option<&str>) -> Configuration {
        let mut config = Configuration::defaults();
        config.set("api_key", api_key.map(str::to_string));
        config
    }

    #[test]
    fn test_fill_defaults_is_idempotent() {
        let mut partial = Configuration::new();
        partial.set("k", Some("5".to_string()));
        partial.set("custom", Some("kept".to_string()));

        let once = fill_defaults(partial);
        let twice = fill_defaults(once.clone());

        assert_eq!(once, twice);
        assert_eq!(once.get("k"), Some("5"));
        assert_eq!(once.get("custom"), Some("kept"));
        assert_eq!(once.get("chunk_size"), Some("2056"));
    }

    #[test]
    fn test_fill_defaults_keeps_null_values() {
        let mut config = Configuration::new();
        config.set("model_name", None);

        let filled = fill_defaults(config);
        assert!(filled.contains_key("model_name"));
        assert_eq!(filled.get("model_name"), None);
    }

    #[test]
    fn test_openai_without_api_key_is_rejected() {
        let err = validate(&openai_config(None)).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("API key"));

        assert!(validate(&openai_config(Some("   "))).is_err());
    }

    #[test]
    fn test_openai_with_api_key_is_accepted() {
        let validated = validate(&openai_config(Some("sk-test"))).unwrap();
        let settings = validated.settings();

        assert_eq!(validated.model_type(), ModelType::OpenAi);
        assert_eq!(settings.k, 2);
        assert_eq!(settings.chunk_size, 2056);
        assert_eq!(settings.chunk_overlap, 256);
        assert_eq!(settings.max_tokens, 16000);
        assert!((settings.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(validated.configuration(), &openai_config(Some("sk-test")));
    }

    #[test]
    fn test_local_requires_model_path() {
        let mut config = Configuration::defaults();
        config.set("model_type", Some("local".to_string()));
        config.set("model_path", None);
        assert!(validate(&config).unwrap_err().to_string().contains("Model path"));

        config.set("model_path", Some("models/llama.bin".to_string()));
        let validated = validate(&config).unwrap();
        assert_eq!(
            validated.settings().model_path,
            Some(PathBuf::from("models/llama.bin"))
        );
    }

    #[test]
    fn test_validate_rejects_missing_keys_and_bad_values() {
        let mut config = Configuration::new();
        config.set("model_type", Some("openai".to_string()));
        config.set("api_key", Some("sk-test".to_string()));
        assert!(validate(&config).unwrap_err().to_string().contains("Missing key"));

        let mut config = openai_config(Some("sk-test"));
        config.set("model_type", Some("anthropic".to_string()));
        assert!(validate(&config).is_err());

        let mut config = openai_config(Some("sk-test"));
        config.set("k", Some("many".to_string()));
        assert!(validate(&config).is_err());

        let mut config = openai_config(Some("sk-test"));
        config.set("chunk_overlap", Some("4096".to_string()));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_yaml_scalars_are_read_as_strings() {
        let config = Configuration::from_yaml("k: 3\ntemperature: 0.2\napi_key: null\nflag: true\n")
            .unwrap();

        assert_eq!(config.get("k"), Some("3"));
        assert_eq!(config.get("temperature"), Some("0.2"));
        assert_eq!(config.get("flag"), Some("true"));
        assert!(config.contains_key("api_key"));
        assert_eq!(config.get("api_key"), None);

        assert!(Configuration::from_yaml("- a\n- b\n").is_err());
        assert!(Configuration::from_yaml("k: [1, 2]\n").is_err());
        assert!(Configuration::from_yaml("").unwrap().is_empty());
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::in_dir(&dir.path().join("nested"));

        assert!(store.load().unwrap().is_none());

        let config = openai_config(Some("sk-test"));
        store.persist(&config).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.get("max_tokens"), Some("16000"));
    }

    #[test]
    fn test_load_or_init_writes_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::in_dir(dir.path());

        let config = store.load_or_init().unwrap();
        assert_eq!(config, Configuration::defaults());
        assert!(store.path().exists());
    }

    #[test]
    fn test_configure_keeps_unrelated_keys() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::in_dir(dir.path());
        std::fs::write(store.path(), "k: '7'\nrepo_path: /work/repo\n").unwrap();

        let config = store
            .configure(ModelType::OpenAi, Some("sk-abc".to_string()), None, None)
            .unwrap();
        assert_eq!(config.get("k"), Some("7"));
        assert_eq!(config.get("repo_path"), Some("/work/repo"));
        assert_eq!(config.get("model_name"), Some("gpt-3.5-turbo-16k-0613"));

        let config = store
            .configure(ModelType::Local, None, None, Some("/models/m.bin".to_string()))
            .unwrap();
        assert_eq!(config.get("model_type"), Some("local"));
        assert_eq!(config.get("model_path"), Some("/models/m.bin"));
        assert_eq!(config.get("api_key"), Some("sk-abc"));

        assert_eq!(store.load().unwrap().unwrap(), config);
    }

    #[test]
    fn test_model_parsing() {
        let model: EmbeddingModel = "minilm".parse().unwrap();
        assert_eq!(model.dimension(), 384);

        let model: EmbeddingModel = "nomic".parse().unwrap();
        assert_eq!(model.dimension(), 768);

        assert!("invalid".parse::<EmbeddingModel>().is_err());
        assert_eq!("OpenAI".parse::<ModelType>().unwrap(), ModelType::OpenAi);
    }

    #[test]
    fn test_should_index_file() {
        assert!(should_index_file(Path::new("main.rs")));
        assert!(should_index_file(Path::new("scripts/player.gml")));
        assert!(should_index_file(Path::new("README.md")));
        assert!(!should_index_file(Path::new("package.json")));
        assert!(!should_index_file(Path::new("pkg/__init__.py")));
        assert!(!should_index_file(Path::new("image.png")));
        assert!(is_excluded_dir("node_modules"));
        assert!(!is_excluded_dir("src"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-1234567890"), "****7890");
        assert_eq!(mask_secret("abc"), "****");
    }
}
