//! Worker bundle packaging (spec §4.3, C3).
//!
//! Rust has no runtime equivalent of reading a function's source and
//! embedding it in a generated script, so a task's "function" is a
//! `&'static str` key into a process-wide `HandlerTable` (see
//! [`crate::worker_proto`]) shared by the driver and any worker process.
//! This module packages everything *around* that handler name: data files
//! and module labels a worker-side run needs alongside it.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::PmwError;

/// A handler plus the extra files it needs packaged alongside it.
#[derive(Debug, Clone)]
pub struct FunctionBundle {
    /// Name registered in a [`crate::worker_proto::HandlerTable`].
    pub handler: &'static str,
    /// Opaque module labels, packaged best-effort (missing ones are skipped
    /// with a warning rather than failing the submission).
    pub modules: Vec<String>,
    /// Data files packaged verbatim; an unreadable entry fails `prepare`.
    pub data_files: Vec<PathBuf>,
}

impl FunctionBundle {
    /// A bundle with no extra modules or data files.
    pub fn new(handler: &'static str) -> Self {
        FunctionBundle {
            handler,
            modules: Vec::new(),
            data_files: Vec::new(),
        }
    }

    fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.handler.hash(&mut hasher);
        self.modules.hash(&mut hasher);
        for file in &self.data_files {
            file.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// The manifest a worker-side harness loads to resolve and run a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Registered handler name.
    pub handler: String,
    /// Whether the task's input was partitioned as a file range rather
    /// than passed as encoded arguments.
    pub file_input: bool,
    /// Archive file name holding packaged data files, if any.
    pub data_archive: Option<String>,
    /// Archive file name holding packaged modules, if any.
    pub module_archive: Option<String>,
}

/// The result of a (possibly cached) `prepare` call.
#[derive(Debug, Clone)]
pub struct PreparedBundle {
    /// Path to the written descriptor manifest.
    pub descriptor_path: PathBuf,
    /// Path to the data archive, if any data files were packaged.
    pub data_archive_path: Option<PathBuf>,
    /// Path to the module archive, if any modules were packaged.
    pub module_archive_path: Option<PathBuf>,
}

/// Packages [`FunctionBundle`]s into worker-ready archives, content-
/// addressed so repeat submissions of the same bundle reuse prior output.
#[derive(Default)]
pub struct BundleGenerator {
    cache: Mutex<HashMap<(u64, bool), PreparedBundle>>,
}

impl BundleGenerator {
    /// A fresh generator with an empty cache.
    pub fn new() -> Self {
        BundleGenerator::default()
    }

    /// Package `bundle` for a task rooted at `task_dir`, tagged with the
    /// owning task's `start_time` label (used only to name the descriptor
    /// file, matching the original's `<func>_<start_time>.py` naming).
    pub fn prepare(
        &self,
        bundle: &FunctionBundle,
        task_dir: &Path,
        start_time: &str,
        input_from_file: bool,
    ) -> Result<PreparedBundle, PmwError> {
        let key = (bundle.content_hash(), input_from_file);

        if let Some(cached) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(cached.clone());
        }

        std::fs::create_dir_all(task_dir)
            .map_err(|e| PmwError::serialization(task_dir, e))?;

        let data_archive_path = self.package_data_files(bundle, task_dir)?;
        let module_archive_path = self.package_modules(bundle, task_dir);

        let descriptor = WorkerDescriptor {
            handler: bundle.handler.to_string(),
            file_input: input_from_file,
            data_archive: data_archive_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
            module_archive: module_archive_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
        };

        let descriptor_path = task_dir.join(format!("{}_{start_time}.json", bundle.handler));
        let descriptor_bytes = serde_json::to_vec_pretty(&descriptor)
            .map_err(|e| PmwError::serialization(&descriptor_path, anyhow::anyhow!(e)))?;
        std::fs::write(&descriptor_path, descriptor_bytes)
            .map_err(|e| PmwError::serialization(&descriptor_path, e))?;

        let prepared = PreparedBundle {
            descriptor_path,
            data_archive_path,
            module_archive_path,
        };

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, prepared.clone());

        Ok(prepared)
    }

    fn package_data_files(
        &self,
        bundle: &FunctionBundle,
        task_dir: &Path,
    ) -> Result<Option<PathBuf>, PmwError> {
        if bundle.data_files.is_empty() {
            return Ok(None);
        }

        let archive_path = unique_archive_path(task_dir, "data")?;
        let file = std::fs::File::create(&archive_path)
            .map_err(|e| PmwError::serialization(&archive_path, e))?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        for data_file in &bundle.data_files {
            let contents = std::fs::read(data_file)
                .map_err(|e| PmwError::serialization(data_file, e))?;
            let name = data_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| data_file.to_string_lossy().into_owned());
            zip.start_file(name, options)
                .map_err(|e| PmwError::serialization(&archive_path, anyhow::anyhow!(e)))?;
            std::io::Write::write_all(&mut zip, &contents)
                .map_err(|e| PmwError::serialization(&archive_path, e))?;
        }

        zip.finish()
            .map_err(|e| PmwError::serialization(&archive_path, anyhow::anyhow!(e)))?;

        Ok(Some(archive_path))
    }

    fn package_modules(&self, bundle: &FunctionBundle, task_dir: &Path) -> Option<PathBuf> {
        if bundle.modules.is_empty() {
            return None;
        }

        let archive_path = match unique_archive_path(task_dir, "modules") {
            Ok(path) => path,
            Err(_) => {
                eprintln!("warning: could not allocate module archive path for task_dir {}", task_dir.display());
                return None;
            }
        };

        let file = match std::fs::File::create(&archive_path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("warning: could not create module archive {}: {e}", archive_path.display());
                return None;
            }
        };

        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        let mut packaged_any = false;

        for module in &bundle.modules {
            let path = PathBuf::from(module);
            let contents = match std::fs::read(&path) {
                Ok(contents) => contents,
                Err(_) => {
                    eprintln!("warning: module {module} could not be read, skipping");
                    continue;
                }
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| module.clone());
            if zip.start_file(name.clone(), options).is_err() {
                eprintln!("warning: module {module} could not be archived, skipping");
                continue;
            }
            if std::io::Write::write_all(&mut zip, &contents).is_err() {
                eprintln!("warning: module {module} could not be written, skipping");
                continue;
            }
            packaged_any = true;
        }

        if zip.finish().is_err() {
            eprintln!("warning: module archive {} failed to finalize", archive_path.display());
            return None;
        }

        if packaged_any { Some(archive_path) } else { None }
    }
}

fn unique_archive_path(task_dir: &Path, prefix: &str) -> Result<PathBuf, PmwError> {
    let named = tempfile::Builder::new()
        .prefix(&format!("{prefix}_"))
        .suffix(".zip")
        .tempfile_in(task_dir)
        .map_err(|e| PmwError::serialization(task_dir, e))?;
    named
        .into_temp_path()
        .keep()
        .map_err(|e| PmwError::serialization(task_dir, anyhow::anyhow!(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_without_extras_writes_descriptor_only() {
        let dir = tempfile::tempdir().unwrap();
        let gen = BundleGenerator::new();
        let bundle = FunctionBundle::new("square");
        let prepared = gen.prepare(&bundle, dir.path(), "t0", false).unwrap();
        assert!(prepared.descriptor_path.exists());
        assert!(prepared.data_archive_path.is_none());
        assert!(prepared.module_archive_path.is_none());
    }

    #[test]
    fn repeat_prepare_with_identical_bundle_reuses_cached_result() {
        let dir = tempfile::tempdir().unwrap();
        let gen = BundleGenerator::new();
        let bundle = FunctionBundle::new("square");
        let first = gen.prepare(&bundle, dir.path(), "t0", false).unwrap();
        let second = gen.prepare(&bundle, dir.path(), "t1", false).unwrap();
        assert_eq!(first.descriptor_path, second.descriptor_path);
    }

    #[test]
    fn unreadable_data_file_fails_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let gen = BundleGenerator::new();
        let mut bundle = FunctionBundle::new("square");
        bundle.data_files.push(dir.path().join("does_not_exist.bin"));
        assert!(gen.prepare(&bundle, dir.path(), "t0", false).is_err());
    }

    #[test]
    fn missing_module_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let gen = BundleGenerator::new();
        let mut bundle = FunctionBundle::new("square");
        bundle.modules.push("no_such_module.rs".to_string());
        let prepared = gen.prepare(&bundle, dir.path(), "t0", false).unwrap();
        assert!(prepared.module_archive_path.is_none());
    }

    #[test]
    fn file_input_flag_is_recorded_on_the_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let gen = BundleGenerator::new();
        let bundle = FunctionBundle::new("square");
        let prepared = gen.prepare(&bundle, dir.path(), "t0", true).unwrap();
        let written = std::fs::read_to_string(&prepared.descriptor_path).unwrap();
        let descriptor: WorkerDescriptor = serde_json::from_str(&written).unwrap();
        assert!(descriptor.file_input);
    }
}
