use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use crate::error::{ImportError, Result};

/// Extracts every member of `archive` into `target_dir`.
///
/// Members whose target file already exists are left untouched, so an
/// interrupted extraction can be resumed. Returns the newly written files.
pub fn extract_archive(archive: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    log::info!("Extracting {:?} into {:?}", archive, target_dir);
    let zip_err = |source| ImportError::Extract {
        archive: archive.to_path_buf(),
        source,
    };
    let io_err = |path: &Path, source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(|err| io_err(archive, err))?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;
    fs::create_dir_all(target_dir).map_err(|err| io_err(target_dir, err))?;

    let mut extracted = vec![];
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            log::warn!("Skipping archive member with unsafe path {:?}", entry.name());
            continue;
        };
        let path = target_dir.join(relative);
        if path.exists() {
            log::debug!("{:?} already exists, skipping", path);
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_err(parent, err))?;
        }
        let mut out = File::create(&path).map_err(|err| io_err(path.as_path(), err))?;
        io::copy(&mut entry, &mut out).map_err(|err| io_err(path.as_path(), err))?;
        extracted.push(path);
    }

    log::info!("Extracted {} files", extracted.len());
    Ok(extracted)
}
