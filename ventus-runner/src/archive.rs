//! Result packaging
//!
//! Completed result directories are immutable, so one archive per job is
//! built on first download and reused afterwards.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Result directory not found: {0}")]
    MissingResults(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| ArchiveError::Io { context, source }
    }
}

/// Zips `result_dir` into `archive_path`, returning the archive path
///
/// An existing archive is returned as is. The archive is written next to its
/// final location and renamed into place, so readers never see a partial
/// file.
pub fn package_results(result_dir: &Path, archive_path: &Path) -> Result<PathBuf, ArchiveError> {
    if archive_path.is_file() {
        return Ok(archive_path.to_path_buf());
    }
    if !result_dir.is_dir() {
        return Err(ArchiveError::MissingResults(result_dir.to_path_buf()));
    }

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent).map_err(ArchiveError::io(format!(
            "Failed to create {}",
            parent.display()
        )))?;
    }

    // One scratch file per call; concurrent downloads of a job each build
    // their own and the last rename wins.
    let partial = archive_path.with_extension(format!("partial-{}", Uuid::new_v4().simple()));
    let result = write_archive(result_dir, &partial).and_then(|()| {
        match fs::rename(&partial, archive_path) {
            Ok(()) => Ok(()),
            Err(_) if archive_path.is_file() => Ok(()),
            Err(source) => Err(ArchiveError::Io {
                context: format!("Failed to move archive to {}", archive_path.display()),
                source,
            }),
        }
    });

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result.map(|()| archive_path.to_path_buf())
}

fn write_archive(result_dir: &Path, target: &Path) -> Result<(), ArchiveError> {
    let file = File::create(target)
        .map_err(ArchiveError::io(format!("Failed to create {}", target.display())))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    add_dir(&mut zip, result_dir, "", options)?;

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer).map_err(ArchiveError::io("Failed to flush archive"))?;
    Ok(())
}

fn add_dir<W: io::Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    let mut entries = fs::read_dir(dir)
        .map_err(ArchiveError::io(format!("Failed to read {}", dir.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(ArchiveError::io(format!("Failed to read {}", dir.display())))?;
    // Stable entry order
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = format!("{prefix}{}", entry.file_name().to_string_lossy());

        if path.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
            add_dir(zip, &path, &format!("{name}/"), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut source = File::open(&path)
                .map_err(ArchiveError::io(format!("Failed to open {}", path.display())))?;
            io::copy(&mut source, zip)
                .map_err(ArchiveError::io(format!("Failed to archive {}", path.display())))?;
        }
    }

    Ok(())
}
