use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::Namespace;
use crate::error::SubmitError;

const SENTINEL_SUFFIX: &str = "complete";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub size: u64,
}

/// Files produced by one transfer unit and uploaded, in upload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, name: impl Into<String>, size: u64) {
        self.entries.push(ManifestEntry {
            name: name.into(),
            size,
        });
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.name);
            out.push('\t');
            out.push_str(&entry.size.to_string());
            out.push('\n');
        }
        out
    }

    /// Blank lines are ignored; any other line must be `name<TAB>size`.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (name, size) = line
                .split_once('\t')
                .ok_or_else(|| format!("line {}: missing tab separator", index + 1))?;
            let size = size
                .trim()
                .parse::<u64>()
                .map_err(|err| format!("line {}: invalid size {size:?}: {err}", index + 1))?;
            if name.is_empty() {
                return Err(format!("line {}: empty file name", index + 1));
            }
            entries.push(ManifestEntry {
                name: name.to_string(),
                size,
            });
        }
        Ok(Self { entries })
    }

    pub fn read(path: &Utf8Path) -> Result<Self, SubmitError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| SubmitError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse(&content).map_err(|message| SubmitError::ManifestParse {
            path: path.to_string(),
            message,
        })
    }

    /// Writes through a temporary file in the same directory so a crash never
    /// leaves a truncated sentinel behind.
    pub fn write_atomic(&self, path: &Utf8Path) -> Result<(), SubmitError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".sra-submit-manifest")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        temp.write_all(self.to_text().as_bytes())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// `<archive>.<namespace>.complete`
pub fn sentinel_path(archive: &Utf8Path, namespace: Namespace) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{archive}.{namespace}.{SENTINEL_SUFFIX}"))
}

/// `<path>.complete`
pub fn marker_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.{SENTINEL_SUFFIX}"))
}

/// Splits a unit sentinel path back into its archive path and namespace.
pub fn split_sentinel_path(sentinel: &Utf8Path) -> Option<(Utf8PathBuf, Namespace)> {
    let rest = sentinel
        .as_str()
        .strip_suffix(SENTINEL_SUFFIX)?
        .strip_suffix('.')?;
    let (archive, namespace) = rest.rsplit_once('.')?;
    let namespace = namespace.parse().ok()?;
    Some((Utf8PathBuf::from(archive), namespace))
}

/// Creates an empty marker file.
pub fn touch(path: &Utf8Path) -> Result<(), SubmitError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    }
    fs::File::create(path.as_std_path())
        .map_err(|err| SubmitError::Filesystem(format!("create {path}: {err}")))?;
    Ok(())
}
