//! Safe filename handling for incoming transfers.
//!
//! Peer-supplied names are untrusted: they can carry path components,
//! reserved characters, or control bytes. Everything that lands on local
//! disk goes through here first.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};

/// Reduce a peer-supplied name to a bare, safe filename.
///
/// Path components are stripped, reserved and control characters become
/// `_`, and an empty or dots-only result falls back to `"unnamed"`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Create `name` inside `dir` without clobbering anything.
///
/// The name is sanitized first. On collision tries `stem_1.ext` through
/// `stem_999.ext`, then gives up with `AlreadyExists`.
pub async fn create_unique(dir: &Path, name: &str) -> std::io::Result<(PathBuf, File)> {
    let safe = sanitize_filename(name);
    let (stem, ext) = split_name(&safe);
    for attempt in 0..1000u32 {
        let candidate = if attempt == 0 {
            safe.clone()
        } else {
            format!("{stem}_{attempt}{ext}")
        };
        let path = dir.join(candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {safe} in {}", dir.display()),
    ))
}

/// Split `report.txt` into `("report", ".txt")`. A leading dot is part of
/// the stem, so dotfiles keep their whole name.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}
