use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use dp_contracts::errors::{DpError, DpResult};
use dp_contracts::sessions::{new_session_id, SessionState};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const GIT_ARTIFACTS_RELATIVE: &str = ".claude/design-partner/artifacts";
pub const IMAGES_DIR: &str = "images";
pub const GALLERY_FILE: &str = "gallery.html";

const PREFERENCE_GIT_REPO: &str = "git-repo";
const PREFERENCE_PLUGIN_CACHE: &str = "plugin-cache";
const PREFERENCE_DOWNLOADS: &str = "downloads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStrategy {
    CustomPath,
    GitRepository,
    PluginCache,
    Downloads,
}

impl OutputStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomPath => "custom-path",
            Self::GitRepository => "git-repo",
            Self::PluginCache => "plugin-cache",
            Self::Downloads => "downloads",
        }
    }
}

impl fmt::Display for OutputStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process facts the resolver depends on, captured once so tests can supply
/// their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputContext {
    pub home: Option<PathBuf>,
    pub plugin_root: Option<PathBuf>,
    pub cwd: PathBuf,
}

impl OutputContext {
    pub fn from_env(plugin_root: Option<PathBuf>) -> DpResult<Self> {
        let cwd = env::current_dir().map_err(|err| {
            DpError::filesystem(format!("failed to read working directory: {err}"))
        })?;
        Ok(Self {
            home: home_dir(),
            plugin_root,
            cwd,
        })
    }

    fn home(&self) -> DpResult<&Path> {
        self.home
            .as_deref()
            .ok_or_else(|| DpError::filesystem("home directory not found (HOME is unset)"))
    }
}

fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| env::var_os(key))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocation {
    pub output_path: PathBuf,
    pub session_id: String,
    /// True when no session id was stored and one was generated here.
    pub session_id_assigned: bool,
    pub preference: Option<String>,
    pub strategy: OutputStrategy,
    pub git_root: Option<PathBuf>,
}

impl OutputLocation {
    pub fn images_dir(&self) -> PathBuf {
        self.output_path.join(IMAGES_DIR)
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.output_path.join(GALLERY_FILE)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "outputPath": self.output_path.display().to_string(),
            "sessionId": self.session_id,
            "preference": self.preference.as_deref().unwrap_or("auto"),
            "strategy": self.strategy.as_str(),
            "isGitRepo": self.git_root.is_some(),
            "gitRoot": self.git_root.as_ref().map(|root| root.display().to_string()),
            "imagesDir": self.images_dir().display().to_string(),
            "galleryPath": self.gallery_path().display().to_string(),
        })
    }
}

/// Nearest ancestor of `start` (inclusive) that contains a `.git` entry.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Picks the destination directory for this session and creates it together
/// with its `images` subdirectory.
pub fn resolve_output_location(
    state: Option<&SessionState>,
    ctx: &OutputContext,
) -> DpResult<OutputLocation> {
    let preference = state
        .and_then(SessionState::output_path_preference)
        .map(str::to_string);
    let (session_id, session_id_assigned) = match state.and_then(SessionState::session_id) {
        Some(existing) => (existing.to_string(), false),
        None => (new_session_id(), true),
    };
    let git_root = find_git_root(&ctx.cwd);

    let (strategy, output_path) = match preference.as_deref() {
        Some(PREFERENCE_GIT_REPO) => match git_root.as_deref() {
            Some(root) => (OutputStrategy::GitRepository, root.join(GIT_ARTIFACTS_RELATIVE)),
            None => {
                warn!(
                    cwd = %ctx.cwd.display(),
                    "git-repo output requested outside a repository"
                );
                (OutputStrategy::Downloads, downloads_dir(ctx, &session_id)?)
            }
        },
        Some(PREFERENCE_PLUGIN_CACHE) => match ctx.plugin_root.as_deref() {
            Some(root) => (OutputStrategy::PluginCache, root.join("artifacts")),
            None => {
                warn!("plugin-cache output requested without a plugin root");
                (OutputStrategy::Downloads, downloads_dir(ctx, &session_id)?)
            }
        },
        Some(custom) if custom != PREFERENCE_DOWNLOADS => {
            (OutputStrategy::CustomPath, expand_custom_path(custom, ctx)?)
        }
        _ => (OutputStrategy::Downloads, downloads_dir(ctx, &session_id)?),
    };

    let location = OutputLocation {
        output_path,
        session_id,
        session_id_assigned,
        preference,
        strategy,
        git_root,
    };
    let images = location.images_dir();
    fs::create_dir_all(&images).map_err(|err| {
        DpError::filesystem(format!("failed to create {}: {err}", images.display()))
    })?;
    debug!(
        path = %location.output_path.display(),
        strategy = %location.strategy,
        session_id = %location.session_id,
        "output location resolved"
    );
    Ok(location)
}

fn downloads_dir(ctx: &OutputContext, session_id: &str) -> DpResult<PathBuf> {
    Ok(ctx
        .home()?
        .join("Downloads")
        .join(format!("design-partner-{session_id}")))
}

fn expand_custom_path(raw: &str, ctx: &OutputContext) -> DpResult<PathBuf> {
    let expanded = if raw == "~" {
        ctx.home()?.to_path_buf()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        ctx.home()?.join(rest)
    } else {
        PathBuf::from(raw)
    };
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(ctx.cwd.join(expanded))
    }
}
