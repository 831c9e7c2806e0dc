use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dp_contracts::errors::{DpError, DpResult, ErrorKind};
use dp_contracts::generation::ImagePayload;
use tracing::info;

use crate::transport::HttpTransport;

/// Fetches `url` and writes the body verbatim to `output`.
pub fn download_image(
    transport: &dyn HttpTransport,
    url: &str,
    output: &Path,
) -> DpResult<PathBuf> {
    let reply = transport
        .get(url)
        .map_err(|err| DpError::unknown_provider(format!("image download failed: {err:#}")))?;
    if !reply.is_success() {
        return Err(DpError::unknown_provider(format!(
            "image download failed ({}): {url}",
            reply.status
        )));
    }
    write_bytes(output, &reply.body)
}

/// Decodes a base64 payload (optionally a `data:` URL) and writes the bytes
/// to `output`.
pub fn save_base64_image(data: &str, output: &Path) -> DpResult<PathBuf> {
    let bytes = decode_base64(data)?;
    write_bytes(output, &bytes)
}

pub fn save_generated_image(
    transport: &dyn HttpTransport,
    image: &ImagePayload,
    output: &Path,
) -> DpResult<PathBuf> {
    match image {
        ImagePayload::Url(url) => download_image(transport, url, output),
        ImagePayload::Inline { data, .. } => save_base64_image(data, output),
    }
}

fn decode_base64(data: &str) -> DpResult<Vec<u8>> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let compact: String = payload
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|err| {
            DpError::new(
                ErrorKind::MalformedResponse,
                format!("invalid base64 image data: {err}"),
            )
        })
}

/// Whole-buffer write; the parent directory is created when missing.
fn write_bytes(output: &Path, bytes: &[u8]) -> DpResult<PathBuf> {
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            DpError::filesystem(format!("failed to create {}: {err}", parent.display()))
        })?;
    }
    fs::write(output, bytes).map_err(|err| {
        DpError::filesystem(format!("failed to write {}: {err}", output.display()))
    })?;
    info!(path = %output.display(), bytes = bytes.len(), "image saved");
    Ok(output.to_path_buf())
}
