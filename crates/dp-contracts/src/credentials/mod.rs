mod env_file;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::providers::ProviderKind;

pub use env_file::{parse_env_file, read_env_file};

pub const PLUGIN_ENV_LABEL: &str = ".env (plugin root)";
pub const PROJECT_ENV_LABEL: &str = ".env (project root)";

const KEY_PREVIEW_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKey {
    Openai,
    Gemini,
    GeminiProjectId,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 3] = [
        CredentialKey::Openai,
        CredentialKey::Gemini,
        CredentialKey::GeminiProjectId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Gemini => "gemini",
            Self::GeminiProjectId => "geminiProjectId",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            Self::Openai => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::GeminiProjectId => "GEMINI_PROJECT_ID",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceOrigin {
    File { label: String, path: PathBuf },
    Environment,
}

/// One layer consulted for API keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSource {
    origin: SourceOrigin,
    values: BTreeMap<String, String>,
}

impl CredentialSource {
    /// A `KEY=value` file. An absent file is a normal, empty source.
    pub fn env_file(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = read_env_file(&path);
        Self {
            origin: SourceOrigin::File {
                label: label.into(),
                path,
            },
            values,
        }
    }

    pub fn environment<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            origin: SourceOrigin::Environment,
            values: vars
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn process_environment() -> Self {
        Self::environment(std::env::vars())
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            SourceOrigin::File { path, .. } => Some(path.as_path()),
            SourceOrigin::Environment => None,
        }
    }

    pub fn lookup(&self, key: CredentialKey) -> Option<&str> {
        self.values
            .get(key.env_var())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn label_for(&self, key: CredentialKey) -> String {
        match &self.origin {
            SourceOrigin::File { label, .. } => label.clone(),
            SourceOrigin::Environment => format!("{} from environment", key.env_var()),
        }
    }
}

/// Keys resolved from layered sources, with the label of the layer that
/// supplied each one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    values: BTreeMap<CredentialKey, String>,
    origins: BTreeMap<CredentialKey, String>,
    sources: Vec<String>,
}

impl CredentialSet {
    pub fn get(&self, key: CredentialKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn source_for(&self, key: CredentialKey) -> Option<&str> {
        self.origins.get(&key).map(String::as_str)
    }

    /// Labels in the order keys were found.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn has_openai(&self) -> bool {
        self.get(CredentialKey::Openai).is_some()
    }

    pub fn has_gemini(&self) -> bool {
        self.get(CredentialKey::Gemini).is_some()
            || self.get(CredentialKey::GeminiProjectId).is_some()
    }

    pub fn has_provider(&self, provider: ProviderKind) -> bool {
        match provider {
            ProviderKind::Openai => self.has_openai(),
            ProviderKind::Gemini => self.has_gemini(),
        }
    }

    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|provider| self.has_provider(*provider))
            .collect()
    }

    /// Diagnostic report with key previews instead of full secrets.
    pub fn report(&self) -> Value {
        let mut keys = Map::new();
        for key in CredentialKey::ALL {
            let preview = self.get(key).map(|value| match key {
                CredentialKey::GeminiProjectId => value.to_string(),
                _ => key_preview(value),
            });
            keys.insert(
                key.name().to_string(),
                json!({
                    "configured": preview.is_some(),
                    "preview": preview,
                    "source": self.source_for(key),
                }),
            );
        }
        json!({
            "keys": keys,
            "sources": self.sources,
            "hasOpenAI": self.has_openai(),
            "hasGemini": self.has_gemini(),
        })
    }
}

/// Resolves every recognized key against `sources` in priority order. The
/// first source holding a non-empty value wins; later sources are not
/// consulted for that key.
pub fn resolve_credentials(sources: &[CredentialSource]) -> CredentialSet {
    let mut set = CredentialSet::default();
    for source in sources {
        for key in CredentialKey::ALL {
            if set.values.contains_key(&key) {
                continue;
            }
            let Some(value) = source.lookup(key) else {
                continue;
            };
            let label = source.label_for(key);
            set.values.insert(key, value.to_string());
            set.origins.insert(key, label.clone());
            set.sources.push(label);
        }
    }
    set
}

/// The standard plugin-file, project-file, process-environment stack.
pub fn default_sources(plugin_root: Option<&Path>, project_env: &Path) -> Vec<CredentialSource> {
    let mut sources = Vec::new();
    if let Some(root) = plugin_root {
        sources.push(CredentialSource::env_file(
            PLUGIN_ENV_LABEL,
            root.join(".env"),
        ));
    }
    sources.push(CredentialSource::env_file(PROJECT_ENV_LABEL, project_env));
    sources.push(CredentialSource::process_environment());
    sources
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSecurity {
    pub protected: bool,
    pub warning: Option<String>,
}

/// Checks that the `.gitignore` beside a plugin's `.env` covers it.
pub fn check_env_security(plugin_root: &Path) -> EnvSecurity {
    let gitignore = plugin_root.join(".gitignore");
    let Ok(content) = std::fs::read_to_string(&gitignore) else {
        return EnvSecurity {
            protected: false,
            warning: Some(".gitignore file not found".to_string()),
        };
    };
    let protected = content.contains(".env");
    EnvSecurity {
        protected,
        warning: (!protected).then(|| {
            ".env is not in .gitignore - API keys could be committed to git!".to_string()
        }),
    }
}

pub fn key_preview(value: &str) -> String {
    let head: String = value.chars().take(KEY_PREVIEW_CHARS).collect();
    format!("{head}...")
}
