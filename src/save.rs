use std::{
    collections::hash_map::DefaultHasher,
    fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use image::RgbImage;
use tracing::instrument;

use crate::Result;

/// Writes `patches` to `out_dir` as `{index}_{file name of source}`, renaming on collision.
/// Returns the paths actually written.
#[instrument(level = "debug", skip(patches))]
pub fn save_patches<'a>(
    out_dir: &Path,
    source: &Path,
    patches: impl IntoIterator<Item = &'a RgbImage>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "patch.png".to_string());

    let mut written = Vec::new();
    for (index, patch) in patches.into_iter().enumerate() {
        let path = available_path(out_dir.join(format!("{index}_{file_name}")));
        patch.save(&path)?;
        written.push(path);
    }
    Ok(written)
}

fn time_suffix(attempt: u32) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    nanos.hash(&mut hasher);
    attempt.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

/// `path` itself if unused, otherwise `{stem}_{suffix}.{ext}` with a time-derived suffix.
fn available_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    log::warn!("{} already exists", path.display());

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned());
    let mut attempt = 0;
    loop {
        let suffix = time_suffix(attempt);
        let name = match &extension {
            Some(ext) => format!("{stem}_{suffix}.{ext}"),
            None => format!("{stem}_{suffix}"),
        };
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            log::warn!("Renaming to {}", candidate.display());
            return candidate;
        }
        attempt += 1;
    }
}
