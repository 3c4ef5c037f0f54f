//! Archive unpacking for folder retrievals.

use anyhow::Context;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ConductorError, Result};

/// Extract every entry of a zip archive into `dest`.
///
/// Entries whose names would escape `dest` are skipped with a warning.
/// Returns the number of files written.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| ConductorError::filesystem(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a zip archive", archive.display()))?;

    fs::create_dir_all(dest).map_err(|e| ConductorError::filesystem(dest, e))?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .with_context(|| format!("reading entry {i} of {}", archive.display()))?;

        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry '{}'", entry.name());
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| ConductorError::filesystem(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConductorError::filesystem(parent, e))?;
        }
        let mut out =
            File::create(&out_path).map_err(|e| ConductorError::filesystem(&out_path, e))?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }

        written += 1;
    }

    debug!(
        "Extracted {} files from {} into {}",
        written,
        archive.display(),
        dest.display()
    );
    Ok(written)
}
