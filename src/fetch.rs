// Downloading result archives and unpacking them locally.

use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{info, warn};
use zip::ZipArchive;

use crate::api::ParseService;
use crate::error::ApiError;

/// Where results land.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLayout {
    /// Everything goes straight into this directory (single input).
    Flat(PathBuf),
    /// One sub-directory per task, named after its input.
    PerTask(PathBuf),
}

impl OutputLayout {
    pub fn root(&self) -> &Path {
        match self {
            OutputLayout::Flat(dir) | OutputLayout::PerTask(dir) => dir,
        }
    }

    pub fn destination(&self, name: &str) -> PathBuf {
        match self {
            OutputLayout::Flat(dir) => dir.clone(),
            OutputLayout::PerTask(dir) => dir.join(sanitize(name)),
        }
    }
}

/// `<stem>_MinerU_<YYYYMMDD>_<HHMMSS>`.
pub fn timestamped_dir_name(stem: &str, now: DateTime<Local>) -> String {
    format!("{}_MinerU_{}", stem, now.format("%Y%m%d_%H%M%S"))
}

/// Folder names for one run's results, in input order. Names that repeat
/// (two `report.pdf` from different folders, two URLs ending in the same
/// stem) get `_2`, `_3`, ... so no result is extracted over another.
pub fn unique_names(names: Vec<String>) -> Vec<String> {
    let mut taken = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let base = sanitize(&name);
            let mut candidate = base.clone();
            let mut n = 1;
            while !taken.insert(candidate.clone()) {
                n += 1;
                candidate = format!("{base}_{n}");
            }
            candidate
        })
        .collect()
}

pub struct ResultFetcher {
    layout: OutputLayout,
}

impl ResultFetcher {
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Downloads the archive at `url` and extracts it for the task `name`.
    pub fn fetch(
        &self,
        service: &dyn ParseService,
        name: &str,
        url: &str,
    ) -> Result<PathBuf, ApiError> {
        let dest = self.layout.destination(name);
        let bytes = service.download(url)?;
        match extract_archive(&bytes, &dest) {
            Ok(files) => {
                info!(task = name, files, output = %dest.display(), "Extracted result");
                Ok(dest)
            }
            Err(e) => {
                let mut kept = dest.clone().into_os_string();
                kept.push(".zip");
                let kept = PathBuf::from(kept);
                if let Some(parent) = kept.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                match fs::write(&kept, &bytes) {
                    Ok(()) => Err(ApiError::Download(format!(
                        "{e}; archive kept at {}",
                        kept.display()
                    ))),
                    Err(write_err) => {
                        warn!(path = %kept.display(), error = %write_err, "Could not keep raw archive");
                        Err(e)
                    }
                }
            }
        }
    }
}

/// Unpacks a zip archive held in memory into `dest`, returning the number
/// of entries.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<usize, ApiError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ApiError::Download(format!("unreadable archive: {e}")))?;
    fs::create_dir_all(dest).map_err(|source| ApiError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    archive
        .extract(dest)
        .map_err(|e| ApiError::Download(format!("extraction failed: {e}")))?;
    Ok(archive.len())
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "result".to_string(),
        s => s.to_string(),
    }
}
