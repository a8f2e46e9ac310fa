use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const SITE_IMPORT_DIRECTIVE: &str = "import site";

/// The embeddable runtime ships a `python3XX._pth` file that pins `sys.path`;
/// site-packages stays invisible until its `import site` line is enabled.
pub fn find_runtime_path_config(python_dir: &Path) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(python_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read {}", python_dir.display()));
        }
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read {}", python_dir.display()))?;
        let path = entry.path();
        let is_pth = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| {
                let lower = name.to_ascii_lowercase();
                lower.starts_with("python") && lower.ends_with("._pth")
            });
        if is_pth && path.is_file() {
            candidates.push(path);
        }
    }

    candidates.sort();
    Ok(candidates.into_iter().next())
}

pub fn site_import_enabled(contents: &str) -> bool {
    contents
        .lines()
        .any(|line| line.trim() == SITE_IMPORT_DIRECTIVE)
}

/// Returns the patched contents, or `None` when the directive is already enabled.
/// The commented `#import site` line is enabled in place; when neither form is
/// present the directive is appended.
pub fn enable_site_import(contents: &str) -> Option<String> {
    if site_import_enabled(contents) {
        return None;
    }

    let mut patched = String::with_capacity(contents.len() + SITE_IMPORT_DIRECTIVE.len());
    let mut replaced = false;
    for line in contents.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];
        let is_commented_directive = body
            .trim()
            .strip_prefix('#')
            .is_some_and(|rest| rest.trim() == SITE_IMPORT_DIRECTIVE);
        if !replaced && is_commented_directive {
            patched.push_str(SITE_IMPORT_DIRECTIVE);
            patched.push_str(ending);
            replaced = true;
        } else {
            patched.push_str(line);
        }
    }

    if !replaced {
        if !patched.is_empty() && !patched.ends_with('\n') {
            patched.push_str(line_ending_of(contents));
        }
        patched.push_str(SITE_IMPORT_DIRECTIVE);
        patched.push_str(line_ending_of(contents));
    }
    Some(patched)
}

/// Applies [`enable_site_import`] to the file on disk. Returns whether it changed.
pub fn patch_runtime_path_config(path: &Path) -> Result<bool> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let Some(patched) = enable_site_import(&contents) else {
        debug!(path = %path.display(), "site import already enabled");
        return Ok(false);
    };
    fs::write(path, patched.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn runtime_path_config_enabled(python_dir: &Path) -> Result<bool> {
    let Some(path) = find_runtime_path_config(python_dir)? else {
        return Ok(false);
    };
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(site_import_enabled(&contents))
}

fn line_ending_of(contents: &str) -> &'static str {
    if contents.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}
