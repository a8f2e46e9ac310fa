use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::fs_utils::remove_file_if_exists;

pub fn part_path(dest: &Path) -> PathBuf {
    dest.with_file_name(format!(
        "{}.part",
        dest.file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("download")
    ))
}

/// Fetches `url` to `dest` through `transport`, which writes the raw body to the
/// path it is given. Leftovers from an interrupted run (`dest` or `dest.part`) are
/// deleted first so a truncated file can never pass for a finished download.
/// There is no retry.
pub fn fetch_artifact_with_transport<Transport>(
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
    mut transport: Transport,
) -> Result<()>
where
    Transport: FnMut(&str, &Path) -> Result<()>,
{
    let part = part_path(dest);
    for stale in [dest, part.as_path()] {
        if remove_file_if_exists(stale)
            .with_context(|| format!("failed to remove stale download: {}", stale.display()))?
        {
            info!(path = %stale.display(), "removed leftover download from a previous run");
        }
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create download dir: {}", parent.display()))?;
    }

    debug!(url, dest = %dest.display(), "fetching");
    if let Err(err) = transport(url, &part) {
        discard_partial_download(&part);
        return Err(err.context(format!("failed to fetch {url}")));
    }

    if let Some(expected) = expected_sha256 {
        let actual = sha256_file(&part)?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            discard_partial_download(&part);
            return Err(anyhow!(
                "sha256 mismatch for {url}: expected {}, got {actual}",
                expected.trim()
            ));
        }
    }

    fs::rename(&part, dest).with_context(|| {
        format!(
            "failed to move downloaded file into place: {}",
            dest.display()
        )
    })?;
    Ok(())
}

fn discard_partial_download(part: &Path) {
    if let Err(err) = remove_file_if_exists(part) {
        warn!(path = %part.display(), "failed to remove partial download: {err:#}");
    }
}

pub fn download_to_path(
    client: &reqwest::blocking::Client,
    url: &str,
    out_path: &Path,
) -> Result<()> {
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("request failed: {url}"))?
        .error_for_status()
        .with_context(|| format!("server rejected request: {url}"))?;

    let expected_len = response.content_length();
    let mut file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let written = response
        .copy_to(&mut file)
        .with_context(|| format!("transfer interrupted: {url}"))?;
    file.sync_all()
        .with_context(|| format!("failed to flush {}", out_path.display()))?;

    if let Some(expected) = expected_len {
        if written != expected {
            return Err(anyhow!(
                "transfer truncated: {url} ({written} of {expected} bytes)"
            ));
        }
    }
    Ok(())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}
