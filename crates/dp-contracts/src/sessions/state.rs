use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::front_matter::{join_front_matter, split_front_matter};
use crate::errors::{DpError, DpResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignBrief {
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub challenge: Option<String>,
}

/// One previously generated image as recorded in the session header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(default, deserialize_with = "scalar_text_or_empty")]
    pub file_path: String,
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub prompt: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageRecord {
    /// A record stamped with the current UTC time.
    pub fn new(file_path: impl Into<String>, prompt: &str, provider: &str) -> Self {
        Self {
            file_path: file_path.into(),
            prompt: Some(prompt.to_string()),
            provider: Some(provider.to_string()),
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            extra: Map::new(),
        }
    }
}

/// The header fields this toolkit reads. Unknown fields are ignored, and
/// known fields holding an unexpected shape read as absent: numbers and
/// booleans become text, a non-mapping `design_brief` and non-mapping image
/// entries are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    #[serde(default, deserialize_with = "scalar_text")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub output_path_preference: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub project_name: Option<String>,
    #[serde(default, deserialize_with = "mapping_or_none")]
    pub design_brief: Option<DesignBrief>,
    #[serde(default, deserialize_with = "image_list")]
    pub generated_images: Vec<ImageRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub path: PathBuf,
    pub header: SessionHeader,
    pub body: String,
}

impl SessionState {
    /// Reads a state file. A file without a header block loads as an empty
    /// header; a header that is not valid YAML is an error.
    pub fn load(path: impl Into<PathBuf>) -> DpResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|err| {
            DpError::state_file(format!(
                "failed to read state file {}: {err}",
                path.display()
            ))
        })?;
        let (header, body) = match split_front_matter(&content) {
            Some((header, body)) => (parse_header(header, &path)?, body.to_string()),
            None => (SessionHeader::default(), content),
        };
        Ok(Self { path, header, body })
    }

    /// Like [`SessionState::load`], but any problem reads as "no state yet".
    pub fn load_lenient(path: &Path) -> Option<Self> {
        Self::load(path).ok()
    }

    pub fn session_id(&self) -> Option<&str> {
        non_empty(self.header.session_id.as_deref())
    }

    pub fn output_path_preference(&self) -> Option<&str> {
        non_empty(self.header.output_path_preference.as_deref())
    }

    pub fn project_name(&self) -> Option<&str> {
        non_empty(self.header.project_name.as_deref()).or_else(|| {
            self.header
                .design_brief
                .as_ref()
                .and_then(|brief| non_empty(brief.project_name.as_deref()))
        })
    }

    pub fn challenge(&self) -> Option<&str> {
        self.header
            .design_brief
            .as_ref()
            .and_then(|brief| non_empty(brief.challenge.as_deref()))
    }

    pub fn generated_images(&self) -> &[ImageRecord] {
        &self.header.generated_images
    }
}

/// Appends one image descriptor to the state file's `generated_images`.
///
/// Every other header field and the body text are kept. A missing file is
/// created with a fresh header carrying `session_id`. There is no locking:
/// concurrent writers can lose each other's appends.
pub fn append_generated_image(
    path: &Path,
    record: &ImageRecord,
    session_id: &str,
) -> DpResult<()> {
    let (mut mapping, body) = match std::fs::read_to_string(path) {
        Ok(content) => match split_front_matter(&content) {
            Some((header, body)) => (parse_mapping(header, path)?, body.to_string()),
            None => (serde_yaml::Mapping::new(), content),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            (serde_yaml::Mapping::new(), String::new())
        }
        Err(err) => {
            return Err(DpError::state_file(format!(
                "failed to read state file {}: {err}",
                path.display()
            )));
        }
    };

    let has_session = mapping
        .get("session_id")
        .and_then(scalar_to_text)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if !has_session {
        mapping.insert(
            serde_yaml::Value::from("session_id"),
            serde_yaml::Value::from(session_id),
        );
    }

    let entry = serde_yaml::to_value(record)
        .map_err(|err| DpError::state_file(format!("failed to encode image record: {err}")))?;
    match mapping.get_mut("generated_images") {
        Some(serde_yaml::Value::Sequence(rows)) => rows.push(entry),
        _ => {
            mapping.insert(
                serde_yaml::Value::from("generated_images"),
                serde_yaml::Value::Sequence(vec![entry]),
            );
        }
    }

    let header = serde_yaml::to_string(&mapping)
        .map_err(|err| DpError::state_file(format!("failed to encode state header: {err}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            DpError::filesystem(format!("failed to create {}: {err}", parent.display()))
        })?;
    }
    std::fs::write(path, join_front_matter(&header, &body)).map_err(|err| {
        DpError::filesystem(format!("failed to write {}: {err}", path.display()))
    })
}

fn parse_header(raw: &str, path: &Path) -> DpResult<SessionHeader> {
    if raw.trim().is_empty() {
        return Ok(SessionHeader::default());
    }
    let value: serde_yaml::Value =
        serde_yaml::from_str(raw).map_err(|err| malformed(path, err))?;
    if value.is_null() {
        return Ok(SessionHeader::default());
    }
    serde_yaml::from_value(value).map_err(|err| malformed(path, err))
}

fn parse_mapping(raw: &str, path: &Path) -> DpResult<serde_yaml::Mapping> {
    if raw.trim().is_empty() {
        return Ok(serde_yaml::Mapping::new());
    }
    match serde_yaml::from_str::<serde_yaml::Value>(raw).map_err(|err| malformed(path, err))? {
        serde_yaml::Value::Mapping(mapping) => Ok(mapping),
        serde_yaml::Value::Null => Ok(serde_yaml::Mapping::new()),
        _ => Err(DpError::state_file(format!(
            "malformed header in {}: expected key/value fields",
            path.display()
        ))),
    }
}

fn malformed(path: &Path, err: serde_yaml::Error) -> DpError {
    DpError::state_file(format!("malformed header in {}: {err}", path.display()))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn scalar_to_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        serde_yaml::Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(scalar_to_text(&value))
}

fn scalar_text_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(deserializer)?.unwrap_or_default())
}

fn mapping_or_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: for<'a> Deserialize<'a>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    if !value.is_mapping() {
        return Ok(None);
    }
    Ok(serde_yaml::from_value(value).ok())
}

fn image_list<'de, D>(deserializer: D) -> Result<Vec<ImageRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_yaml::Value::Sequence(rows) = serde_yaml::Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(rows
        .into_iter()
        .filter(serde_yaml::Value::is_mapping)
        .filter_map(|row| serde_yaml::from_value(row).ok())
        .collect())
}
