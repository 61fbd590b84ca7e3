//! Job workspaces
//!
//! A workspace is the job-private case directory the external tools run in:
//!
//! ```text
//! <data_dir>/workspaces/<id>/
//!   0/          initial and boundary conditions
//!   constant/   physical properties, surface geometry, polyMesh
//!   system/     tool dictionaries
//!   log.<tool>  combined output of each tool run
//! ```
//!
//! The layout is created once per job; input files are written by the job's
//! plan through [`CaseWriter`].

pub mod foam;
pub mod geometry;
pub mod mesh;
pub mod simulation;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use ventus_core::domain::job::JobRecord;
use ventus_core::domain::params::ValidationError;

/// Workspace preparation failures
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: io::Error,
    },

    #[error("{0}")]
    InputNotFound(String),

    #[error("Unsupported geometry format: {0}")]
    UnsupportedGeometry(String),

    #[error("Invalid geometry: {0}")]
    Geometry(String),

    #[error("Background mesh too large: {cells} cells (limit {limit})")]
    MeshTooLarge { cells: u64, limit: u64 },

    #[error(transparent)]
    InvalidParameters(#[from] ValidationError),

    #[error("Workspace {} already exists", .0.display())]
    WorkspaceExists(PathBuf),
}

impl SetupError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> SetupError {
        let context = context.into();
        move |source| SetupError::Io { context, source }
    }
}

/// Writes the kind-specific input files into a fresh workspace
pub trait CaseWriter: Send + Sync {
    fn write_inputs(&self, workspace: &Workspace) -> Result<(), SetupError>;
}

/// A prepared job directory and the result directory paired with it
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    result_dir: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, result_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            result_dir: result_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn zero_dir(&self) -> PathBuf {
        self.root.join("0")
    }

    pub fn constant_dir(&self) -> PathBuf {
        self.root.join("constant")
    }

    pub fn system_dir(&self) -> PathBuf {
        self.root.join("system")
    }

    pub fn poly_mesh_dir(&self) -> PathBuf {
        self.constant_dir().join("polyMesh")
    }

    /// Log file of one tool run, e.g. `log.snappyHexMesh`
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("log.{name}"))
    }

    /// Most recently written tool log, if any tool has run yet
    pub fn latest_log(&self) -> Option<PathBuf> {
        latest_log_in(&self.root)
    }

    /// Writes `contents` to `relative` inside the workspace
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: &str) -> Result<(), SetupError> {
        let path = self.root.join(relative.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(SetupError::io(format!("Failed to create {}", parent.display())))?;
        }
        fs::write(&path, contents)
            .map_err(SetupError::io(format!("Failed to write {}", path.display())))
    }
}

/// Latest `log.*` file in `dir` by modification time
pub fn latest_log_in(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("log."))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

/// Creates job workspaces
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceBuilder;

impl WorkspaceBuilder {
    /// Creates the job's private directory tree and writes its inputs
    ///
    /// A workspace is created exactly once; an existing directory at the
    /// job's path is an error rather than something to reuse.
    pub fn prepare<W: CaseWriter + ?Sized>(
        &self,
        job: &JobRecord,
        writer: &W,
    ) -> Result<Workspace, SetupError> {
        let workspace = Workspace::new(&job.workspace_path, &job.result_path);

        if workspace.root().exists() {
            return Err(SetupError::WorkspaceExists(workspace.root().to_path_buf()));
        }

        for dir in [
            workspace.zero_dir(),
            workspace.constant_dir(),
            workspace.system_dir(),
        ] {
            fs::create_dir_all(&dir)
                .map_err(SetupError::io(format!("Failed to create {}", dir.display())))?;
        }

        writer.write_inputs(&workspace)?;

        debug!(
            "Prepared {} workspace for job {} at {}",
            job.kind,
            job.id,
            workspace.root().display()
        );

        Ok(workspace)
    }
}

/// Recursively copies `src` into `dst`, creating `dst` if needed
pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Copies `src` to `dst` so that `dst` only ever appears complete
///
/// The tree is staged in a hidden sibling of `dst` and renamed into place.
/// Readers that test for `dst` see either nothing or the whole copy.
pub(crate) fn publish_dir(src: &Path, dst: &Path) -> io::Result<u64> {
    let parent = dst.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "publish target has no parent")
    })?;
    let name = dst
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{name}.partial-{}", uuid::Uuid::new_v4().simple()));

    let published = copy_dir_all(src, &staging).and_then(|copied| {
        if dst.exists() {
            fs::remove_dir_all(dst)?;
        }
        fs::rename(&staging, dst)?;
        Ok(copied)
    });

    if published.is_err() {
        let _ = fs::remove_dir_all(&staging);
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;
    use ventus_core::domain::job::JobKind;

    struct Noop;

    impl CaseWriter for Noop {
        fn write_inputs(&self, workspace: &Workspace) -> Result<(), SetupError> {
            workspace.write_file("system/controlDict", "application noop;\n")
        }
    }

    struct Failing;

    impl CaseWriter for Failing {
        fn write_inputs(&self, _workspace: &Workspace) -> Result<(), SetupError> {
            Err(SetupError::InputNotFound("Mesh 42 not found".to_string()))
        }
    }

    fn job(root: &Path) -> JobRecord {
        let id = Uuid::new_v4();
        JobRecord::new(
            id,
            JobKind::Mesh,
            HashMap::new(),
            root.join("workspaces").join(id.to_string()),
            root.join("results").join(id.to_string()),
        )
    }

    #[test]
    fn test_prepare_creates_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());

        let workspace = WorkspaceBuilder.prepare(&job, &Noop).unwrap();

        assert!(workspace.zero_dir().is_dir());
        assert!(workspace.constant_dir().is_dir());
        assert!(workspace.system_dir().is_dir());
        assert!(workspace.system_dir().join("controlDict").is_file());
        assert_eq!(workspace.result_dir(), job.result_path);
    }

    #[test]
    fn test_prepare_refuses_existing_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());
        WorkspaceBuilder.prepare(&job, &Noop).unwrap();

        let err = WorkspaceBuilder.prepare(&job, &Noop).unwrap_err();
        assert!(matches!(err, SetupError::WorkspaceExists(_)));
    }

    #[test]
    fn test_writer_error_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkspaceBuilder.prepare(&job(dir.path()), &Failing).unwrap_err();
        assert_eq!(err.to_string(), "Mesh 42 not found");
    }

    #[test]
    fn test_latest_log_picks_newest() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path(), dir.path().join("result"));
        assert!(workspace.latest_log().is_none());

        fs::write(workspace.log_path("blockMesh"), "one").unwrap();
        let old = SystemTime::now() - std::time::Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(workspace.log_path("blockMesh"))
            .unwrap()
            .set_modified(old)
            .unwrap();
        fs::write(workspace.log_path("snappyHexMesh"), "two").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(workspace.latest_log(), Some(workspace.log_path("snappyHexMesh")));
    }

    #[test]
    fn test_copy_dir_all() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("points"), "p").unwrap();
        fs::write(src.join("nested/faces"), "f").unwrap();

        let dst = dir.path().join("dst");
        assert_eq!(copy_dir_all(&src, &dst).unwrap(), 2);
        assert_eq!(fs::read_to_string(dst.join("nested/faces")).unwrap(), "f");
    }

    #[test]
    fn test_publish_dir_leaves_no_staging() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("points"), "p").unwrap();
        fs::write(src.join("faces"), "f").unwrap();

        let dst = dir.path().join("result/constant/polyMesh");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        assert_eq!(publish_dir(&src, &dst).unwrap(), 2);

        assert_eq!(fs::read_to_string(dst.join("faces")).unwrap(), "f");
        let siblings: Vec<_> = fs::read_dir(dst.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(siblings, ["polyMesh"]);
    }

    #[test]
    fn test_failed_publish_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("polyMesh");

        assert!(publish_dir(&dir.path().join("missing"), &dst).is_err());
        assert!(!dst.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
