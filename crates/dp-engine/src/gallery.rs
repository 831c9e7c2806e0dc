use std::fs;
use std::path::{Path, PathBuf};

use dp_contracts::errors::{DpError, DpResult};
use dp_contracts::sessions::SessionState;
use serde_json::{json, Map, Value};
use tracing::info;

const BUILTIN_TEMPLATE: &str = include_str!("../resources/gallery-template.html");

pub const IMAGES_PLACEHOLDER: &str = "__IMAGES_DATA__";
pub const SESSION_PLACEHOLDER: &str = "__SESSION_DATA__";

/// Recorded paths under this segment are rewritten relative to the gallery,
/// which lives in the same directory.
const ARTIFACTS_PREFIX: &str = "artifacts/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GalleryTemplate {
    Builtin,
    File(PathBuf),
}

impl GalleryTemplate {
    fn load(&self) -> DpResult<String> {
        match self {
            Self::Builtin => Ok(BUILTIN_TEMPLATE.to_string()),
            Self::File(path) => fs::read_to_string(path).map_err(|err| {
                DpError::filesystem(format!(
                    "failed to read gallery template {}: {err}",
                    path.display()
                ))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GallerySummary {
    pub image_count: usize,
    pub gallery_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryResult {
    pub outcome: Result<GallerySummary, DpError>,
}

impl GalleryResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&DpError> {
        self.outcome.as_ref().err()
    }

    pub fn to_json(&self) -> Value {
        match &self.outcome {
            Ok(summary) => json!({
                "success": true,
                "imageCount": summary.image_count,
                "galleryPath": summary.gallery_path.display().to_string(),
            }),
            Err(err) => json!({
                "success": false,
                "error": err.message,
                "errorKind": err.kind.as_str(),
            }),
        }
    }
}

/// Renders the session's images into `output`. Problems come back inside
/// the result rather than as an `Err`.
pub fn render_gallery(
    state_file: &Path,
    output: &Path,
    template: &GalleryTemplate,
) -> GalleryResult {
    GalleryResult {
        outcome: try_render(state_file, output, template),
    }
}

fn try_render(
    state_file: &Path,
    output: &Path,
    template: &GalleryTemplate,
) -> DpResult<GallerySummary> {
    let state = SessionState::load(state_file)?;
    let template = template.load()?;

    let gallery_dir = output.parent().unwrap_or_else(|| Path::new(""));
    let images = state
        .generated_images()
        .iter()
        .map(|record| {
            let mut entry = match serde_json::to_value(record) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            let relative = record
                .file_path
                .strip_prefix(ARTIFACTS_PREFIX)
                .unwrap_or(&record.file_path);
            entry.insert("file_path".to_string(), json!(relative));
            entry.insert(
                "full_path".to_string(),
                json!(gallery_dir.join(relative).display().to_string()),
            );
            Value::Object(entry)
        })
        .collect::<Vec<_>>();

    let mut session = Map::new();
    if let Some(name) = state.project_name() {
        session.insert("project_name".to_string(), json!(name));
    }
    if let Some(challenge) = state.challenge() {
        session.insert("challenge".to_string(), json!(challenge));
    }

    let html = substitute(
        &template,
        &[
            (IMAGES_PLACEHOLDER, pretty(&Value::Array(images))?),
            (SESSION_PLACEHOLDER, pretty(&Value::Object(session))?),
        ],
    );

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            DpError::filesystem(format!("failed to create {}: {err}", parent.display()))
        })?;
    }
    fs::write(output, html).map_err(|err| {
        DpError::filesystem(format!("failed to write {}: {err}", output.display()))
    })?;

    let image_count = state.generated_images().len();
    info!(path = %output.display(), image_count, "gallery written");
    Ok(GallerySummary {
        image_count,
        gallery_path: output.to_path_buf(),
    })
}

/// Pretty JSON safe to embed in a `<script>` block: `</` is written as the
/// equivalent `<\/` so recorded text cannot close the element.
fn pretty(value: &Value) -> DpResult<String> {
    serde_json::to_string_pretty(value)
        .map(|json| json.replace("</", "<\\/"))
        .map_err(|err| DpError::filesystem(format!("failed to encode gallery data: {err}")))
}

/// Replaces the first occurrence of each token as found in the original
/// template, so substituted text is never scanned again.
fn substitute(template: &str, replacements: &[(&str, String)]) -> String {
    let mut spans = replacements
        .iter()
        .filter_map(|(token, value)| {
            template
                .find(token)
                .map(|start| (start, start + token.len(), value.as_str()))
        })
        .collect::<Vec<_>>();
    spans.sort_by_key(|(start, _, _)| *start);

    let mut html = String::with_capacity(template.len());
    let mut cursor = 0;
    for (start, end, value) in spans {
        if start < cursor {
            continue;
        }
        html.push_str(&template[cursor..start]);
        html.push_str(value);
        cursor = end;
    }
    html.push_str(&template[cursor..]);
    html
}
