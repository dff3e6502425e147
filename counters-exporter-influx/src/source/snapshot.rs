use std::{
    fs::{self, File, Metadata},
    io::{self, Read as _, Seek as _, SeekFrom},
    path::{Path, PathBuf},
};

use super::{CounterHandle, CounterPoint, CounterSource, CounterType, SourceError};

/// Directory used when no instance directory is given.
pub const DEFAULT_INSTANCE_DIR: &str = "/var/run/counters";

/// Name of the snapshot file within an instance directory.
pub const SNAPSHOT_FILE_NAME: &str = "_.counters";

/// A counter source backed by a text snapshot file maintained by the monitored process.
///
/// Each non-empty line that doesn't start with `#` describes one counter as six tab-separated fields:
///
/// ```text
/// type<TAB>ident<TAB>name<TAB>ctype<TAB>value<TAB>description
/// ```
///
/// The type and ident fields may be empty. The file is re-read on every enumeration. When the writer replaces the file
/// (rather than rewriting it in place) outstanding handles become stale and must be reopened.
#[derive(Clone, Debug)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Creates a `SnapshotFile` reading from the given file.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        SnapshotFile { path: path.into() }
    }

    /// Creates a `SnapshotFile` for the instance rooted at the given directory.
    pub fn for_instance<P: AsRef<Path>>(dir: P) -> Self {
        SnapshotFile { path: dir.as_ref().join(SNAPSHOT_FILE_NAME) }
    }

    /// Returns the path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for SnapshotFile {
    fn default() -> Self {
        SnapshotFile::for_instance(DEFAULT_INSTANCE_DIR)
    }
}

impl CounterSource for SnapshotFile {
    type Handle = SnapshotHandle;

    fn open(&mut self) -> Result<Self::Handle, SourceError> {
        let unavailable =
            |e: io::Error| SourceError::Unavailable { reason: format!("{}: {}", self.path.display(), e) };

        let file = File::open(&self.path).map_err(unavailable)?;
        let identity = file.metadata().map(|m| identity(&m)).map_err(unavailable)?;

        Ok(SnapshotHandle { path: self.path.clone(), file, identity })
    }
}

/// Handle to an opened [`SnapshotFile`].
pub struct SnapshotHandle {
    path: PathBuf,
    file: File,
    identity: Option<(u64, u64)>,
}

impl SnapshotHandle {
    fn check_identity(&self) -> Result<(), SourceError> {
        match fs::metadata(&self.path) {
            Ok(metadata) if identity(&metadata) == self.identity => Ok(()),
            Ok(_) => Err(SourceError::Stale),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SourceError::Stale),
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

impl CounterHandle for SnapshotHandle {
    fn points(&mut self) -> Result<Vec<CounterPoint>, SourceError> {
        self.check_identity()?;

        let mut contents = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut contents)?;

        parse_snapshot(&contents)
    }
}

#[cfg(unix)]
fn identity(metadata: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt as _;

    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn identity(_metadata: &Metadata) -> Option<(u64, u64)> {
    None
}

pub(crate) fn parse_snapshot(contents: &str) -> Result<Vec<CounterPoint>, SourceError> {
    let mut points = Vec::new();

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = |reason: &str| SourceError::Malformed { line: idx + 1, reason: reason.to_string() };

        let mut fields = line.splitn(6, '\t');
        let (Some(section_type), Some(section_ident), Some(name), Some(ctype), Some(value)) =
            (fields.next(), fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("expected at least five tab-separated fields"));
        };
        let description = fields.next().unwrap_or_default();

        if name.is_empty() {
            return Err(malformed("counter name is empty"));
        }

        let value = value
            .trim()
            .parse::<u64>()
            .map_err(|e| malformed(&format!("invalid value '{}': {}", value, e)))?;

        points.push(CounterPoint {
            section_type: section_type.to_string(),
            section_ident: section_ident.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            declared_type: CounterType::from_name(ctype),
            value,
        });
    }

    Ok(points)
}
