use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dp_contracts::credentials::{
    check_env_security, default_sources, key_preview, resolve_credentials, CredentialKey,
    CredentialSet,
};
use dp_contracts::errors::{DpError, DpResult};
use dp_contracts::generation::{
    GeneratedImage, GenerationRequest, DEFAULT_PROVIDER, DEFAULT_QUALITY, DEFAULT_SIZE,
};
use dp_contracts::providers::ProviderKind;
use dp_contracts::sessions::{
    append_generated_image, ImageRecord, SessionState, STATE_FILE_RELATIVE,
};
use dp_engine::output::IMAGES_DIR;
use dp_engine::{
    render_gallery, resolve_output_location, save_generated_image, GalleryTemplate,
    HttpTransport, ImageGenerator, OutputContext, ProviderEndpoints,
};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DP_LOG";
const PLUGIN_ROOT_ENV: &str = "CLAUDE_PLUGIN_ROOT";
const SMOKE_TEST_PROMPT: &str = "A simple red circle on a white background";
const SMOKE_TEST_SIZE: &str = "1024x1024";

#[derive(Debug, Parser)]
#[command(name = "dp-rs", version, about = "Design Partner image toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one image and print the result as JSON.
    Generate(GenerateArgs),
    /// Report which provider keys are configured and where they came from.
    DetectKeys(DetectKeysArgs),
    /// Run a fixed prompt against every configured provider.
    TestProviders(KeySourceArgs),
    /// Resolve and create the session output directory.
    ConfigureOutput(ConfigureOutputArgs),
    /// Render the session gallery HTML.
    Gallery(GalleryArgs),
}

#[derive(Debug, Clone, Args)]
struct KeySourceArgs {
    /// Plugin installation root; its `.env` has the highest priority.
    #[arg(long)]
    plugin_root: Option<PathBuf>,
    /// Project `.env` file (defaults to `./.env`).
    #[arg(long)]
    project_env: Option<PathBuf>,
}

impl KeySourceArgs {
    fn plugin_root(&self) -> Option<PathBuf> {
        self.plugin_root.clone().or_else(plugin_root_from_env)
    }

    fn credentials(&self) -> Result<CredentialSet> {
        let project_env = match &self.project_env {
            Some(path) => path.clone(),
            None => env::current_dir()
                .context("failed to read working directory")?
                .join(".env"),
        };
        let plugin_root = self.plugin_root();
        let sources = default_sources(plugin_root.as_deref(), &project_env);
        Ok(resolve_credentials(&sources))
    }
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(value_parser = parse_prompt)]
    prompt: String,
    #[arg(default_value = DEFAULT_PROVIDER)]
    provider: String,
    #[arg(long, default_value = DEFAULT_SIZE)]
    size: String,
    #[arg(long, default_value = DEFAULT_QUALITY)]
    quality: String,
    /// Write the image into the session output directory and record it.
    #[arg(long)]
    save: bool,
    /// Session state file (defaults to `./.claude/dp.local.md`).
    #[arg(long)]
    state: Option<PathBuf>,
    #[command(flatten)]
    keys: KeySourceArgs,
}

#[derive(Debug, Parser)]
struct DetectKeysArgs {
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    keys: KeySourceArgs,
}

#[derive(Debug, Parser)]
struct ConfigureOutputArgs {
    state_file: Option<PathBuf>,
    plugin_root: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GalleryArgs {
    state_file: PathBuf,
    output: PathBuf,
    #[arg(long)]
    template: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("dp-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::DetectKeys(args) => run_detect_keys(args),
        Command::TestProviders(args) => run_test_providers(args),
        Command::ConfigureOutput(args) => run_configure_output(args),
        Command::Gallery(args) => run_gallery(args),
    }
}

fn parse_prompt(raw: &str) -> std::result::Result<String, String> {
    if raw.trim().is_empty() {
        return Err("prompt must not be empty".to_string());
    }
    Ok(raw.to_string())
}

fn plugin_root_from_env() -> Option<PathBuf> {
    env::var_os(PLUGIN_ROOT_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn default_state_file() -> Result<PathBuf> {
    Ok(env::current_dir()
        .context("failed to read working directory")?
        .join(STATE_FILE_RELATIVE))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let credentials = args.keys.credentials()?;
    let generator =
        ImageGenerator::with_default_transport(credentials, &ProviderEndpoints::from_env());
    let request = GenerationRequest::new(args.prompt.clone())
        .with_provider(args.provider.clone())
        .with_size(args.size.clone())
        .with_quality(args.quality.clone());
    let result = generator.generate(&request);
    let mut output = result.to_json();
    let mut failure = result.error().cloned();

    if let Some(image) = result.image().filter(|_| args.save) {
        let state_file = match args.state.clone() {
            Some(path) => path,
            None => default_state_file()?,
        };
        let ctx = OutputContext::from_env(args.keys.plugin_root())?;
        match save_and_record(generator.transport(), &ctx, &state_file, &args.prompt, image) {
            Ok(saved) => {
                output["savedPath"] = json!(saved.display().to_string());
            }
            Err(err) => {
                output["saveError"] = json!(err.message);
                output["saveErrorKind"] = json!(err.kind.as_str());
                failure = Some(err);
            }
        }
    }

    print_json(&output)?;
    exit_code(failure.as_ref(), &mut io::stderr())
}

/// 0 on success; otherwise writes `error: <message>` to `stderr` and
/// returns 1. The JSON result has already been printed either way.
fn exit_code(failure: Option<&DpError>, stderr: &mut dyn Write) -> Result<i32> {
    match failure {
        Some(err) => {
            writeln!(stderr, "error: {}", err.message)?;
            Ok(1)
        }
        None => Ok(0),
    }
}

/// Writes the image into the session's `images` directory and appends its
/// descriptor to the state file. Returns the written path.
fn save_and_record(
    transport: &dyn HttpTransport,
    ctx: &OutputContext,
    state_file: &Path,
    prompt: &str,
    image: &GeneratedImage,
) -> DpResult<PathBuf> {
    let state = if state_file.exists() {
        Some(SessionState::load(state_file)?)
    } else {
        None
    };
    let location = resolve_output_location(state.as_ref(), ctx)?;

    let stamp = Utc::now().format("%Y%m%d-%H%M%S-%3f");
    let file_name = format!("{stamp}-{}.{}", image.provider, image.image.extension());
    let path = location.images_dir().join(&file_name);
    save_generated_image(transport, &image.image, &path)?;

    let mut record = ImageRecord::new(
        format!("{IMAGES_DIR}/{file_name}"),
        prompt,
        image.provider.as_str(),
    );
    record.extra.insert("model".to_string(), json!(image.model));
    record.extra.insert("cost".to_string(), json!(image.cost_usd));
    append_generated_image(state_file, &record, &location.session_id)?;
    info!(
        path = %path.display(),
        state_file = %state_file.display(),
        "image recorded"
    );
    Ok(path)
}

fn run_detect_keys(args: DetectKeysArgs) -> Result<i32> {
    let credentials = args.keys.credentials()?;
    let security = args.keys.plugin_root().map(|root| check_env_security(&root));

    if args.json {
        let mut report = credentials.report();
        if let Some(security) = &security {
            report["security"] = json!({
                "protected": security.protected,
                "warning": security.warning,
            });
        }
        print_json(&report)?;
        return Ok(0);
    }

    println!("API Key Detection Results\n");
    for provider in ProviderKind::ALL {
        let status = if credentials.has_provider(provider) {
            "Configured"
        } else {
            "Not configured"
        };
        println!("{}: {status}", provider.display_name());
        let key = match provider {
            ProviderKind::Openai => CredentialKey::Openai,
            ProviderKind::Gemini => CredentialKey::Gemini,
        };
        if let Some(value) = credentials.get(key) {
            println!("   Key: {}", key_preview(value));
        }
        if provider == ProviderKind::Gemini {
            if let Some(project) = credentials.get(CredentialKey::GeminiProjectId) {
                println!("   Project: {project}");
            }
        }
        println!();
    }

    if !credentials.sources().is_empty() {
        println!("Sources checked:");
        for source in credentials.sources() {
            println!("  - {source}");
        }
        println!();
    }
    if credentials.configured_providers().is_empty() {
        println!("No image generation providers configured.");
        println!("Set OPENAI_API_KEY or GEMINI_API_KEY in a .env file to get started.\n");
    }

    match security {
        Some(security) if !security.protected => {
            if let Some(warning) = security.warning {
                println!("WARNING: {warning}");
            }
        }
        Some(_) => println!("Security: .env file is properly protected in .gitignore"),
        None => debug!("no plugin root; skipping .gitignore check"),
    }
    Ok(0)
}

fn run_test_providers(args: KeySourceArgs) -> Result<i32> {
    let credentials = args.credentials()?;
    let configured = credentials.configured_providers();

    println!("Image Generation Provider Tests\n");
    println!("{}", "=".repeat(50));
    println!("\nDetected providers:");
    for provider in ProviderKind::ALL {
        let status = if configured.contains(&provider) {
            "Configured"
        } else {
            "Not configured"
        };
        println!("  {}: {status}", provider.display_name());
    }
    if configured.is_empty() {
        println!("\nNo providers configured. Please set up API keys first.");
        return Ok(1);
    }

    let generator =
        ImageGenerator::with_default_transport(credentials, &ProviderEndpoints::from_env());
    let mut passed = 0usize;
    let mut total_cost = 0.0;
    for provider in &configured {
        println!("\nTesting {provider}...");
        let request = GenerationRequest::new(SMOKE_TEST_PROMPT)
            .with_provider(provider.as_str())
            .with_size(SMOKE_TEST_SIZE);
        let result = generator.generate(&request);
        match (result.image(), result.error()) {
            (Some(image), _) => {
                passed += 1;
                total_cost += image.cost_usd;
                println!("Success");
                println!("   Model: {}", image.model);
                println!("   Response time: {:.1}s", result.elapsed_seconds());
                println!("   Cost: ${:.3}", image.cost_usd);
                if let Some(revised) = &image.revised_prompt {
                    println!("   Revised prompt: {}", truncate(revised, 60));
                }
            }
            (None, Some(err)) => {
                println!("Failed");
                println!("   Error: {} ({})", err.message, err.kind);
            }
            (None, None) => {}
        }
    }

    println!("\n{}", "=".repeat(50));
    println!("Summary:");
    println!("  Tests run: {}", configured.len());
    println!("  Passed: {passed}");
    println!("  Failed: {}", configured.len() - passed);
    println!("  Total cost: ${total_cost:.3}\n");
    Ok(0)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

fn run_configure_output(args: ConfigureOutputArgs) -> Result<i32> {
    let state_file = match args.state_file {
        Some(path) => path,
        None => default_state_file()?,
    };
    let plugin_root = args.plugin_root.or_else(plugin_root_from_env);
    let state = SessionState::load_lenient(&state_file);
    let ctx = OutputContext::from_env(plugin_root)?;
    let location = resolve_output_location(state.as_ref(), &ctx)?;
    print_json(&location.to_json())?;
    Ok(0)
}

fn run_gallery(args: GalleryArgs) -> Result<i32> {
    let template = match args.template {
        Some(path) => GalleryTemplate::File(path),
        None => GalleryTemplate::Builtin,
    };
    let result = render_gallery(&args.state_file, &args.output, &template);
    print_json(&result.to_json())?;
    exit_code(result.error(), &mut io::stderr())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use anyhow::bail;
    use clap::Parser;
    use dp_contracts::errors::{DpError, ErrorKind};
    use dp_contracts::generation::{GeneratedImage, GenerationResult, ImagePayload};
    use dp_contracts::providers::ProviderKind;
    use dp_contracts::sessions::SessionState;
    use dp_engine::{render_gallery, GalleryTemplate, HttpReply, HttpTransport, OutputContext};
    use serde_json::Value;

    use super::{exit_code, save_and_record, truncate, Cli, Command};

    struct OfflineTransport;

    impl HttpTransport for OfflineTransport {
        fn post_json(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            _body: &Value,
        ) -> anyhow::Result<HttpReply> {
            bail!("offline: {url}")
        }

        fn get(&self, url: &str) -> anyhow::Result<HttpReply> {
            bail!("offline: {url}")
        }
    }

    fn inline_image() -> GeneratedImage {
        GeneratedImage {
            provider: ProviderKind::Gemini,
            model: "gemini-3-pro-image-preview".to_string(),
            cost_usd: 0.0,
            image: ImagePayload::Inline {
                data: "aGVsbG8=".to_string(),
                mime_type: "image/jpeg".to_string(),
            },
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            revised_prompt: None,
            text: None,
        }
    }

    fn context(root: &Path) -> OutputContext {
        OutputContext {
            home: Some(root.join("home")),
            plugin_root: None,
            cwd: root.to_path_buf(),
        }
    }

    #[test]
    fn generate_defaults_and_rejects_empty_prompts() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["dp-rs", "generate", "a chair"])?;
        let Command::Generate(args) = cli.command else {
            bail!("expected generate");
        };
        assert_eq!(args.provider, "openai");
        assert_eq!(args.size, "1024x1024");
        assert_eq!(args.quality, "standard");
        assert!(!args.save);

        assert!(Cli::try_parse_from(["dp-rs", "generate", "  "]).is_err());
        assert!(Cli::try_parse_from(["dp-rs", "generate"]).is_err());
        assert!(Cli::try_parse_from(["dp-rs", "gallery", "state.md"]).is_err());
        Ok(())
    }

    #[test]
    fn configure_output_takes_optional_positionals() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["dp-rs", "configure-output", "s.md", "/plugin"])?;
        let Command::ConfigureOutput(args) = cli.command else {
            bail!("expected configure-output");
        };
        assert_eq!(args.state_file.as_deref(), Some(Path::new("s.md")));
        assert_eq!(args.plugin_root.as_deref(), Some(Path::new("/plugin")));
        Ok(())
    }

    #[test]
    fn saving_writes_image_and_appends_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out_dir = temp.path().join("renders");
        let state_file = temp.path().join(".claude/dp.local.md");
        fs::create_dir_all(temp.path().join(".claude"))?;
        fs::write(
            &state_file,
            format!(
                "---\nsession_id: \"feedbeef\"\noutput_path_preference: \"{}\"\n---\n\nnotes\n",
                out_dir.display()
            ),
        )?;

        let saved = save_and_record(
            &OfflineTransport,
            &context(temp.path()),
            &state_file,
            "paper lamp",
            &inline_image(),
        )?;
        assert!(saved.starts_with(out_dir.join("images")));
        assert_eq!(saved.extension().and_then(|ext| ext.to_str()), Some("jpg"));
        assert_eq!(fs::read(&saved)?, b"hello");

        let state = SessionState::load(&state_file)?;
        assert_eq!(state.session_id(), Some("feedbeef"));
        assert_eq!(state.body, "\nnotes\n");
        let records = state.generated_images();
        assert_eq!(records.len(), 1);
        assert!(records[0].file_path.starts_with("images/"));
        assert_eq!(records[0].prompt.as_deref(), Some("paper lamp"));
        assert_eq!(records[0].provider.as_deref(), Some("gemini"));
        assert_eq!(
            records[0].extra.get("model").and_then(Value::as_str),
            Some("gemini-3-pro-image-preview")
        );
        Ok(())
    }

    #[test]
    fn saving_without_state_creates_it_with_the_assigned_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state_file = temp.path().join(".claude/dp.local.md");
        let saved = save_and_record(
            &OfflineTransport,
            &context(temp.path()),
            &state_file,
            "paper lamp",
            &inline_image(),
        )?;

        let state = SessionState::load(&state_file)?;
        let session = state.session_id().map(str::to_string);
        let session = session.ok_or_else(|| anyhow::anyhow!("session id missing"))?;
        assert!(saved.starts_with(
            temp.path()
                .join("home/Downloads")
                .join(format!("design-partner-{session}"))
        ));
        assert_eq!(state.generated_images().len(), 1);
        Ok(())
    }

    #[test]
    fn failed_download_records_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state_file = temp.path().join("dp.local.md");
        let mut image = inline_image();
        image.image = ImagePayload::Url("https://img.test/x.png".to_string());
        let err = save_and_record(
            &OfflineTransport,
            &context(temp.path()),
            &state_file,
            "paper lamp",
            &image,
        )
        .err();
        assert!(err.is_some());
        assert!(!state_file.exists());
        Ok(())
    }

    #[test]
    fn failed_generation_exits_one_with_error_line() -> anyhow::Result<()> {
        let result = GenerationResult {
            provider: "openai".to_string(),
            elapsed: Duration::from_millis(12),
            outcome: Err(DpError::new(
                ErrorKind::RateLimited,
                "Rate limit exceeded. Try again in 1 minute.",
            )),
        };
        let mut stderr = Vec::new();
        assert_eq!(exit_code(result.error(), &mut stderr)?, 1);
        assert_eq!(
            String::from_utf8(stderr)?,
            "error: Rate limit exceeded. Try again in 1 minute.\n"
        );
        Ok(())
    }

    #[test]
    fn failed_gallery_exits_one_and_success_exits_zero() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let output = temp.path().join("gallery.html");
        let missing = render_gallery(
            &temp.path().join("absent.md"),
            &output,
            &GalleryTemplate::Builtin,
        );
        let mut stderr = Vec::new();
        assert_eq!(exit_code(missing.error(), &mut stderr)?, 1);
        assert!(String::from_utf8(stderr)?.starts_with("error: failed to read state file"));

        let state_file = temp.path().join("dp.local.md");
        fs::write(&state_file, "---\nsession_id: \"s1\"\n---\n")?;
        let rendered = render_gallery(&state_file, &output, &GalleryTemplate::Builtin);
        let mut stderr = Vec::new();
        assert_eq!(exit_code(rendered.error(), &mut stderr)?, 0);
        assert!(stderr.is_empty());
        Ok(())
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 60), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
