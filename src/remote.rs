use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, LazyLock, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::error::SubmitError;
use crate::transfer::find_in_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
}

/// Listing side of a secure session against the submission server.
pub trait RemoteSession: Send + Sync {
    fn list_files(&self, remote_path: &Utf8Path) -> Result<Vec<RemoteFile>, SubmitError>;
}

impl<S: RemoteSession + ?Sized> RemoteSession for Arc<S> {
    fn list_files(&self, remote_path: &Utf8Path) -> Result<Vec<RemoteFile>, SubmitError> {
        (**self).list_files(remote_path)
    }
}

#[derive(Debug, Clone)]
pub struct SftpSession {
    program: Option<PathBuf>,
    user: String,
    host: String,
    keyfile: Utf8PathBuf,
}

impl SftpSession {
    pub fn new(user: impl Into<String>, host: impl Into<String>, keyfile: Utf8PathBuf) -> Self {
        Self {
            program: find_in_path("sftp"),
            user: user.into(),
            host: host.into(),
            keyfile,
        }
    }
}

impl RemoteSession for SftpSession {
    fn list_files(&self, remote_path: &Utf8Path) -> Result<Vec<RemoteFile>, SubmitError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| SubmitError::MissingTool("sftp".to_string()))?;
        let mut child = Command::new(program)
            .args(["-b", "-", "-i"])
            .arg(self.keyfile.as_std_path())
            .args(["-o", "BatchMode=yes"])
            .arg(format!("{}@{}", self.user, self.host))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SubmitError::RemoteListing(err.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "ls -ln \"{remote_path}\"")
                .map_err(|err| SubmitError::RemoteListing(err.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|err| SubmitError::RemoteListing(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SubmitError::RemoteListing(if stderr.is_empty() {
                format!("sftp exited with {}", output.status)
            } else {
                stderr
            }));
        }
        Ok(parse_long_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

static LONG_LISTING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-\S*\s+\d+\s+\S+\s+\S+\s+(\d+)\s+\S+\s+\S+\s+\S+\s+(.+)$")
        .expect("valid listing regex")
});

/// Parses `ls -l` output, keeping regular files only.
pub fn parse_long_listing(output: &str) -> Vec<RemoteFile> {
    output
        .lines()
        .filter_map(|line| {
            let caps = LONG_LISTING_LINE.captures(line.trim_end())?;
            let size = caps[1].parse().ok()?;
            let name = caps[2].rsplit('/').next()?.to_string();
            Some(RemoteFile { name, size })
        })
        .collect()
}

/// Size reported by the cache. `Missing` never equals any integer, so an
/// absent remote file can't be mistaken for a matching one.
#[derive(Debug, Clone, Copy)]
pub enum RemoteSize {
    Known(u64),
    Missing,
}

impl PartialEq<u64> for RemoteSize {
    fn eq(&self, other: &u64) -> bool {
        match self {
            RemoteSize::Known(size) => size == other,
            RemoteSize::Missing => false,
        }
    }
}

/// Name → size snapshot of one remote directory, listed on first use and
/// kept for the rest of the run.
pub struct RemoteFileCache<S: RemoteSession> {
    session: S,
    remote_path: Utf8PathBuf,
    files: Mutex<Option<Arc<HashMap<Utf8PathBuf, u64>>>>,
}

impl<S: RemoteSession> RemoteFileCache<S> {
    pub fn new(session: S, remote_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            session,
            remote_path: remote_path.into(),
            files: Mutex::new(None),
        }
    }

    pub fn remote_path(&self) -> &Utf8Path {
        &self.remote_path
    }

    /// `path` is the full remote path, `<remote_path>/<name>`.
    pub fn size_of(&self, path: &Utf8Path) -> Result<RemoteSize, SubmitError> {
        let files = self.files()?;
        Ok(files
            .get(path)
            .map(|size| RemoteSize::Known(*size))
            .unwrap_or(RemoteSize::Missing))
    }

    // A failed listing is not memoized; the next query lists again.
    fn files(&self) -> Result<Arc<HashMap<Utf8PathBuf, u64>>, SubmitError> {
        let mut guard = self
            .files
            .lock()
            .map_err(|_| SubmitError::RemoteListing("remote cache poisoned".to_string()))?;
        if let Some(files) = guard.as_ref() {
            return Ok(Arc::clone(files));
        }
        let listing = self.session.list_files(&self.remote_path)?;
        tracing::debug!(
            "listed {} remote files under {}",
            listing.len(),
            self.remote_path
        );
        let files: HashMap<_, _> = listing
            .into_iter()
            .map(|file| (self.remote_path.join(&file.name), file.size))
            .collect();
        let files = Arc::new(files);
        *guard = Some(Arc::clone(&files));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSession {
        calls: AtomicUsize,
    }

    impl RemoteSession for CountingSession {
        fn list_files(&self, _remote_path: &Utf8Path) -> Result<Vec<RemoteFile>, SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RemoteFile {
                name: "a.16s.dat".to_string(),
                size: 1024,
            }])
        }
    }

    #[test]
    fn missing_size_never_matches() {
        assert!(RemoteSize::Missing != 0);
        assert!(RemoteSize::Missing != u64::MAX);
        assert!(RemoteSize::Known(7) == 7);
        assert!(RemoteSize::Known(7) != 8);
    }

    #[test]
    fn cache_lists_once() {
        let cache = RemoteFileCache::new(
            CountingSession {
                calls: AtomicUsize::new(0),
            },
            "/submit/Production/S1/",
        );
        let hit = cache
            .size_of(Utf8Path::new("/submit/Production/S1/a.16s.dat"))
            .unwrap();
        assert!(hit == 1024);
        let miss = cache
            .size_of(Utf8Path::new("/submit/Production/S1/b.16s.dat"))
            .unwrap();
        assert!(miss != 1024);
        assert_eq!(cache.session.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_sftp_listing() {
        let output = "sftp> ls -ln \"/submit/Production/S1/\"\n\
-rw-r--r--    1 1001     1001         1024 Jan 02 10:00 /submit/Production/S1/a.16s.dat\n\
drwxr-xr-x    2 1001     1001         4096 Jan 02 10:00 /submit/Production/S1/sub\n\
-rw-r--r--    1 1001     1001         2048 Jan 02  2024 b 16s.dat\n";
        let files = parse_long_listing(output);
        assert_eq!(
            files,
            vec![
                RemoteFile {
                    name: "a.16s.dat".to_string(),
                    size: 1024,
                },
                RemoteFile {
                    name: "b 16s.dat".to_string(),
                    size: 2048,
                },
            ]
        );
    }
}
