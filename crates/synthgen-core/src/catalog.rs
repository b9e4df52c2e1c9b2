//! Read-through view over the generator's output directory.
//!
//! Nothing is cached: every call walks the filesystem so results always
//! reflect the current directory state.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::CatalogError;

/// Subdirectories the generator writes per format; recreated after cleanup.
pub const CATEGORY_DIRS: [&str; 6] = ["fhir", "ccda", "csv", "json", "cpcds", "hl7"];

/// Extensions that count as generator output.
pub const RECOGNIZED_EXTENSIONS: [&str; 7] = ["json", "ndjson", "xml", "csv", "txt", "html", "hl7"];

/// File name used for bulk downloads.
pub const ARCHIVE_NAME: &str = "synthea_output.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Fhir,
    Ccda,
    Csv,
    Json,
    Cpcds,
    Hl7,
    Text,
    Html,
    Other,
}

impl FileCategory {
    /// Classify by the first path component, falling back to the extension.
    pub fn classify(relative: &Path) -> Self {
        let first = relative
            .components()
            .next()
            .and_then(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .filter(|_| relative.components().count() > 1);

        match first {
            Some("fhir") => return FileCategory::Fhir,
            Some("ccda") => return FileCategory::Ccda,
            Some("csv") => return FileCategory::Csv,
            Some("json") => return FileCategory::Json,
            Some("cpcds") => return FileCategory::Cpcds,
            Some("hl7") => return FileCategory::Hl7,
            Some("text") => return FileCategory::Text,
            Some("html") => return FileCategory::Html,
            _ => {}
        }

        match extension_of(relative).as_deref() {
            Some("txt") => FileCategory::Text,
            Some("html") => FileCategory::Html,
            _ => FileCategory::Other,
        }
    }
}

/// One file in the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Path relative to the output root, `/` separated.
    #[serde(rename = "name")]
    pub relative_path: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "modified", with = "time::serde::timestamp")]
    pub modified_at: OffsetDateTime,
    pub category: FileCategory,
}

/// A resolved, opened file ready for download.
#[derive(Debug)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub file: File,
}

/// A zip of the catalog held in an unnamed temporary file. Dropping it
/// releases the storage.
#[derive(Debug)]
pub struct CatalogArchive {
    pub file: File,
    pub entries: usize,
    pub size_bytes: u64,
}

/// Outcome of [`OutputCatalog::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub removed_files: usize,
    pub removed_dirs: usize,
    pub failures: usize,
}

#[derive(Debug, Clone)]
pub struct OutputCatalog {
    root: PathBuf,
}

impl OutputCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and the per-format subdirectories.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        for dir in CATEGORY_DIRS {
            std::fs::create_dir_all(self.root.join(dir))?;
        }
        tracing::debug!(root = %self.root.display(), "output layout verified");
        Ok(())
    }

    /// All recognized files, most recently modified first.
    pub fn list(&self) -> Result<Vec<OutputFile>, CatalogError> {
        if !self.root.is_dir() {
            return Err(CatalogError::DirectoryMissing);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable output entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_recognized(entry.path()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping output file without metadata");
                    continue;
                }
            };
            let modified_at = metadata
                .modified()
                .map(OffsetDateTime::from)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);

            files.push(OutputFile {
                relative_path: to_slash_path(relative),
                size_bytes: metadata.len(),
                modified_at,
                category: FileCategory::classify(relative),
            });
        }

        files.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        tracing::debug!(count = files.len(), "output files listed");
        Ok(files)
    }

    /// Resolve `relative` to a regular file strictly inside the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, CatalogError> {
        let requested = relative.trim();
        if requested.is_empty() {
            return Err(CatalogError::NotFound(String::new()));
        }
        if requested.contains('\0') {
            return Err(reject(requested));
        }

        let mut clean = PathBuf::new();
        for component in Path::new(requested).components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(reject(requested));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(CatalogError::NotFound(requested.to_string()));
        }

        let candidate = self.root.join(&clean);
        if !candidate.exists() {
            return Err(CatalogError::NotFound(requested.to_string()));
        }

        // symlinks inside the root may still point outside of it
        let canonical_root = self.root.canonicalize()?;
        let canonical = candidate.canonicalize()?;
        if !canonical.starts_with(&canonical_root) {
            return Err(reject(requested));
        }
        if !canonical.is_file() {
            return Err(CatalogError::NotFound(requested.to_string()));
        }
        Ok(canonical)
    }

    /// Open one file for download.
    pub fn fetch(&self, relative: &str) -> Result<FetchedFile, CatalogError> {
        let path = self.resolve(relative)?;
        let file = File::open(&path)?;
        let size_bytes = file.metadata()?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        Ok(FetchedFile {
            path,
            file_name,
            size_bytes,
            file,
        })
    }

    /// Zip every recognized file into an unnamed temporary file.
    pub fn archive(&self) -> Result<CatalogArchive, CatalogError> {
        let files = match self.list() {
            Ok(files) => files,
            Err(CatalogError::DirectoryMissing) => Vec::new(),
            Err(e) => return Err(e),
        };
        if files.is_empty() {
            return Err(CatalogError::NothingToArchive);
        }

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(tempfile::tempfile()?);
        let mut entries = 0usize;
        for output in &files {
            let path = self.root.join(&output.relative_path);
            let mut source = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(file = %output.relative_path, error = %e, "skipping file in archive");
                    continue;
                }
            };
            writer.start_file(output.relative_path.as_str(), options)?;
            std::io::copy(&mut source, &mut writer)?;
            entries += 1;
        }
        if entries == 0 {
            return Err(CatalogError::NothingToArchive);
        }

        let mut file = writer.finish()?;
        let size_bytes = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        tracing::info!(entries, size_bytes, "output archive built");
        Ok(CatalogArchive {
            file,
            entries,
            size_bytes,
        })
    }

    /// Remove everything under the root and recreate the layout.
    ///
    /// Individual removal failures are logged and counted; the rest of the
    /// tree is still processed.
    pub fn clear(&self) -> Result<ClearReport, CatalogError> {
        let mut report = ClearReport::default();
        if !self.root.exists() {
            tracing::warn!("output directory does not exist; creating it");
            self.ensure_layout()?;
            return Ok(report);
        }

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .contents_first(true)
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read output entry");
                    report.failures += 1;
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_dir() {
                match std::fs::remove_dir(entry.path()) {
                    Ok(()) => {
                        report.removed_dirs += 1;
                        tracing::debug!(dir = %name, "removed directory");
                    }
                    Err(e) => {
                        report.failures += 1;
                        tracing::error!(dir = %name, error = %e, "failed to remove directory");
                    }
                }
            } else {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => {
                        report.removed_files += 1;
                        tracing::debug!(file = %name, "removed file");
                    }
                    Err(e) => {
                        report.failures += 1;
                        tracing::error!(file = %name, error = %e, "failed to remove file");
                    }
                }
            }
        }

        self.ensure_layout()?;
        tracing::info!(
            removed_files = report.removed_files,
            removed_dirs = report.removed_dirs,
            failures = report.failures,
            "output directory cleared"
        );
        Ok(report)
    }
}

fn reject(requested: &str) -> CatalogError {
    tracing::warn!(requested, "rejected path outside the output directory");
    CatalogError::PathTraversalRejected(requested.to_string())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_recognized(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| RECOGNIZED_EXTENSIONS.contains(&ext.as_str()))
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
