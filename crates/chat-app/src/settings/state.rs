use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use repochat_llm::{
    DEFAULT_ENDPOINT, DEFAULT_MIN_SIMILARITY, DEFAULT_OPENAI_MODEL, DEFAULT_PROVIDER_ID,
    DEFAULT_RETRIEVAL_LIMIT, ProjectId, RagModelConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "repochat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "REPOCHAT_";
pub const DEFAULT_PROJECT_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default = "default_project_id")]
    pub project_id: String,
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model_name: default_model_name(),
            max_tokens: None,
            temperature: None,
            project_id: default_project_id(),
            index_path: None,
            retrieval_limit: default_retrieval_limit(),
            min_similarity: default_min_similarity(),
        }
    }
}

impl ChatSettings {
    pub fn to_model_config(&self) -> Option<RagModelConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        let mut config = RagModelConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            &self.model_name,
        );
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }
        Some(config)
    }

    pub fn project_id(&self) -> ProjectId {
        ProjectId::new(self.project_id.clone())
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(self.endpoint, default_endpoint);
        self.model_name = non_blank_or(self.model_name, default_model_name);
        self.project_id = non_blank_or(self.project_id, default_project_id);
        self.index_path = self
            .index_path
            .filter(|path| !path.as_os_str().is_empty());
        if self.retrieval_limit == 0 {
            self.retrieval_limit = default_retrieval_limit();
        }
        self.min_similarity = self.min_similarity.clamp(0.0, 1.0);
        self
    }

    /// Layers defaults, an optional JSON file and `REPOCHAT_*` environment variables.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".repochat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::extract(ChatSettings::figment(&config_path), &config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    /// Applies `change` to the current settings, writes the changed keys back to the
    /// settings file and swaps the result in for later readers.
    ///
    /// Keys the change leaves alone are not written, so values that came from the
    /// environment stay out of the file.
    pub fn update(
        &self,
        change: impl FnOnce(&mut ChatSettings),
    ) -> Result<Arc<ChatSettings>, SettingsError> {
        let previous = self.settings.load_full();
        let mut next = ChatSettings::clone(&previous);
        change(&mut next);
        let next = Arc::new(next.normalized());

        self.write_changes(&previous, &next)?;
        self.settings.store(Arc::clone(&next));
        Ok(next)
    }

    fn extract(figment: Figment, path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults and environment", path);
        }

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ChatSettings::default()
            }
        }
    }

    fn write_changes(
        &self,
        previous: &ChatSettings,
        next: &ChatSettings,
    ) -> Result<(), SettingsError> {
        let previous = settings_object(previous)?;
        let mut document = self.read_document()?;
        let mut changed = Vec::new();
        for (key, value) in settings_object(next)? {
            if previous.get(&key) != Some(&value) {
                changed.push(key.clone());
                document.insert(key, value);
            }
        }
        if changed.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }
        let content = serde_json::to_string_pretty(&document).context(SerializeSettingsSnafu {
            stage: "serialize-settings-document",
        })?;

        let staged_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&staged_path, content).context(WriteFileSnafu {
            stage: "write-staged-settings",
            path: staged_path.clone(),
        })?;
        std::fs::rename(&staged_path, &self.config_path).context(ReplaceFileSnafu {
            stage: "replace-settings-file",
            path: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, keys = ?changed, "saved settings");
        Ok(())
    }

    /// Reads the settings file as a JSON object; a missing file is an empty one.
    fn read_document(&self) -> Result<Map<String, Value>, SettingsError> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(error) => {
                return Err(error).context(ReadFileSnafu {
                    stage: "read-settings-file",
                    path: self.config_path.clone(),
                });
            }
        };
        serde_json::from_str(&content).context(ParseFileSnafu {
            stage: "parse-settings-file",
            path: self.config_path.clone(),
        })
    }
}

fn settings_object(settings: &ChatSettings) -> Result<Map<String, Value>, SettingsError> {
    let value = serde_json::to_value(settings).context(SerializeSettingsSnafu {
        stage: "serialize-settings",
    })?;
    Ok(match value {
        Value::Object(object) => object,
        _ => Map::new(),
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to read settings file at {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("settings file at {path:?} is not a JSON object on `{stage}`: {source}"))]
    ParseFile {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write settings at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace settings file at {path:?} on `{stage}`: {source}"))]
    ReplaceFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: String, default: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default()
    } else {
        trimmed.to_string()
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model_name() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_project_id() -> String {
    DEFAULT_PROJECT_ID.to_string()
}

fn default_retrieval_limit() -> usize {
    DEFAULT_RETRIEVAL_LIMIT
}

fn default_min_similarity() -> f64 {
    DEFAULT_MIN_SIMILARITY
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_json(json: &str) -> ChatSettings {
        Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::string(json))
            .extract::<ChatSettings>()
            .expect("settings")
            .normalized()
    }

    #[test]
    fn defaults_have_no_model_config() {
        let settings = ChatSettings::default();
        assert!(settings.to_model_config().is_none());
        assert_eq!(settings.project_id(), ProjectId::new(DEFAULT_PROJECT_ID));
    }

    #[test]
    fn json_layer_overrides_defaults_and_is_normalized() {
        let settings = extract_json(
            r#"{
                "api_key": "  sk-test  ",
                "endpoint": "   ",
                "model_name": "gpt-4o",
                "max_tokens": 512,
                "project_id": " acme ",
                "retrieval_limit": 0,
                "min_similarity": 3.5
            }"#,
        );

        assert_eq!(settings.api_key, "sk-test");
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.project_id, "acme");
        assert_eq!(settings.retrieval_limit, DEFAULT_RETRIEVAL_LIMIT);
        assert_eq!(settings.min_similarity, 1.0);

        let config = settings.to_model_config().expect("model config");
        assert_eq!(config.model_id, "gpt-4o");
        assert_eq!(config.max_tokens, Some(512));
        assert!(config.temperature.is_none());
    }

    #[test]
    fn environment_overrides_settings_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                SETTINGS_FILE_NAME,
                r#"{"api_key": "file-key", "project_id": "acme"}"#,
            )?;
            jail.set_env("REPOCHAT_API_KEY", "env-key");

            let store = SettingsStore::new(PathBuf::from(SETTINGS_FILE_NAME));
            let settings = store.settings();
            assert_eq!(settings.api_key, "env-key");
            assert_eq!(settings.project_id, "acme");
            assert_eq!(settings.model_name, DEFAULT_OPENAI_MODEL);
            Ok(())
        });
    }

    #[test]
    fn update_writes_only_changed_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(SETTINGS_FILE_NAME, r#"{"api_key": "file-key"}"#)?;
            jail.set_env("REPOCHAT_MODEL_NAME", "gpt-4o");

            let store = SettingsStore::new(PathBuf::from(SETTINGS_FILE_NAME));
            let updated = store
                .update(|settings| settings.project_id = " acme-web ".to_string())
                .expect("update");

            assert_eq!(updated.project_id(), ProjectId::new("acme-web"));
            assert_eq!(store.settings().project_id, "acme-web");
            assert_eq!(store.settings().model_name, "gpt-4o");

            let written = std::fs::read_to_string(SETTINGS_FILE_NAME).expect("settings file");
            let document: Map<String, Value> = serde_json::from_str(&written).expect("json");
            assert_eq!(document.len(), 2);
            assert_eq!(document["api_key"], "file-key");
            assert_eq!(document["project_id"], "acme-web");
            Ok(())
        });
    }

    #[test]
    fn update_creates_missing_settings_file() {
        let directory = tempfile::tempdir().expect("temp dir");
        let path = directory.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        store
            .update(|settings| settings.project_id = "demo".to_string())
            .expect("update");

        let written = std::fs::read_to_string(&path).expect("settings file");
        let reloaded: ChatSettings = serde_json::from_str(&written).expect("json");
        assert_eq!(reloaded.project_id, "demo");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
