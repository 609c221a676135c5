use std::collections::HashSet;
use std::fs;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::error::SubmitError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Everything an archive put on disk, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Files and directories, parents before children.
    pub paths: Vec<Utf8PathBuf>,
    /// Plain files among `paths`.
    pub files: Vec<Utf8PathBuf>,
}

impl Extraction {
    fn record(&mut self, seen: &mut HashSet<Utf8PathBuf>, path: Utf8PathBuf) {
        if seen.insert(path.clone()) {
            self.paths.push(path);
        }
    }

    fn finish(mut self) -> Self {
        self.files = self
            .paths
            .iter()
            .filter(|path| path.as_std_path().is_file())
            .cloned()
            .collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Tar,
    TarGz,
    Zip,
}

/// Unpacks a tar, gzip-compressed tar or zip archive into `target_dir`.
///
/// On failure whatever the archive already put on disk is removed again
/// before the error is returned.
pub fn extract(archive: &Utf8Path, target_dir: &Utf8Path) -> Result<Extraction, SubmitError> {
    let mut file = fs::File::open(archive.as_std_path())
        .map_err(|err| SubmitError::Archive(format!("open {archive}: {err}")))?;
    let kind = sniff(&mut file).map_err(|err| SubmitError::Archive(format!("{archive}: {err}")))?;
    fs::create_dir_all(target_dir.as_std_path())
        .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    tracing::debug!("extracting {archive} ({kind:?}) into {target_dir}");
    let mut extraction = Extraction::default();
    let result = match kind {
        ArchiveKind::Tar => extract_tar(BufReader::new(file), target_dir, &mut extraction),
        ArchiveKind::TarGz => extract_tar(
            GzDecoder::new(BufReader::new(file)),
            target_dir,
            &mut extraction,
        ),
        ArchiveKind::Zip => extract_zip(file, target_dir, &mut extraction),
    };
    if let Err(err) = result {
        tracing::warn!("extracting {archive} failed, removing partial output");
        cleanup(&extraction.paths);
        return Err(err);
    }
    Ok(extraction.finish())
}

/// Removes extracted paths, children first. Failures are logged only.
pub fn cleanup(paths: &[Utf8PathBuf]) {
    for path in paths.iter().rev() {
        if let Err(err) = remove_path(path) {
            tracing::warn!("unable to remove {path}: {err}");
        }
    }
}

fn remove_path(path: &Utf8Path) -> io::Result<()> {
    if path.as_std_path().is_dir() {
        fs::remove_dir(path.as_std_path())
    } else {
        fs::remove_file(path.as_std_path())
    }
}

fn sniff(file: &mut fs::File) -> io::Result<ArchiveKind> {
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    if read >= 4 && magic == ZIP_MAGIC {
        Ok(ArchiveKind::Zip)
    } else if read >= 2 && magic[..2] == GZIP_MAGIC {
        Ok(ArchiveKind::TarGz)
    } else {
        Ok(ArchiveKind::Tar)
    }
}

fn extract_tar<R: Read>(
    reader: R,
    target_dir: &Utf8Path,
    extraction: &mut Extraction,
) -> Result<(), SubmitError> {
    let mut archive = tar::Archive::new(reader);
    let mut seen = HashSet::new();
    let entries = archive
        .entries()
        .map_err(|err| SubmitError::Archive(err.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| SubmitError::Archive(err.to_string()))?;
        let relative = entry
            .path()
            .map_err(|err| SubmitError::Archive(err.to_string()))?
            .into_owned();
        let Some(relative) = normalize(&relative)? else {
            continue;
        };
        record_new_parents(extraction, &mut seen, target_dir, &relative);
        let entry_path = target_dir.join(&relative);
        record_if_new(extraction, &mut seen, &entry_path);
        let unpacked = entry
            .unpack_in(target_dir.as_std_path())
            .map_err(|err| SubmitError::Archive(err.to_string()))?;
        if !unpacked {
            return Err(SubmitError::Archive(format!(
                "tar entry escapes target directory: {relative}"
            )));
        }
        extraction.record(&mut seen, entry_path);
    }
    Ok(())
}

fn extract_zip(
    file: fs::File,
    target_dir: &Utf8Path,
    extraction: &mut Extraction,
) -> Result<(), SubmitError> {
    let mut archive =
        ZipArchive::new(file).map_err(|err| SubmitError::Archive(err.to_string()))?;
    let mut seen = HashSet::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| SubmitError::Archive(err.to_string()))?;
        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                return Err(SubmitError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };
        let Some(relative) = normalize(&relative)? else {
            continue;
        };
        record_new_parents(extraction, &mut seen, target_dir, &relative);
        let entry_path = target_dir.join(&relative);
        record_if_new(extraction, &mut seen, &entry_path);

        if entry.is_dir() {
            fs::create_dir_all(entry_path.as_std_path())
                .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
            extraction.record(&mut seen, entry_path);
            continue;
        }

        let mut outfile = fs::File::create(entry_path.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| SubmitError::Archive(err.to_string()))?;
        extraction.record(&mut seen, entry_path);
    }
    Ok(())
}

// Half-written entries are still ours to remove.
fn record_if_new(extraction: &mut Extraction, seen: &mut HashSet<Utf8PathBuf>, path: &Utf8Path) {
    if !path.as_std_path().exists() {
        extraction.record(seen, path.to_path_buf());
    }
}

/// Drops `.` components; `None` for the archive root itself.
fn normalize(path: &Path) -> Result<Option<Utf8PathBuf>, SubmitError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            _ => {
                return Err(SubmitError::Archive(format!(
                    "unsupported archive path: {}",
                    path.display()
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Ok(None);
    }
    Utf8PathBuf::from_path_buf(out)
        .map(Some)
        .map_err(|path| SubmitError::Archive(format!("non-utf8 path: {}", path.display())))
}

// Directories the archive creates implicitly still need cleaning up.
fn record_new_parents(
    extraction: &mut Extraction,
    seen: &mut HashSet<Utf8PathBuf>,
    target_dir: &Utf8Path,
    relative: &Utf8Path,
) {
    let mut current = target_dir.to_path_buf();
    let Some(parent) = relative.parent() else {
        return;
    };
    for part in parent.components() {
        current.push(part);
        if !current.as_std_path().exists() {
            if let Err(err) = fs::create_dir(current.as_std_path()) {
                tracing::debug!("create {current}: {err}");
            }
            extraction.record(seen, current.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn utf8(path: &Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    fn append(builder: &mut tar::Builder<impl Write>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    #[test]
    fn extract_plain_tar_lists_parents_first() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("run.tar");
        let mut builder = tar::Builder::new(fs::File::create(&archive).unwrap());
        append(&mut builder, "nested/a.dat", b"aaaa");
        append(&mut builder, "b.dat", b"bb");
        builder.finish().unwrap();
        drop(builder);

        let out = utf8(&temp.path().join("out"));
        let extraction = extract(&utf8(&archive), &out).unwrap();
        assert_eq!(
            extraction.paths,
            vec![out.join("nested"), out.join("nested/a.dat"), out.join("b.dat")]
        );
        assert_eq!(extraction.files, vec![out.join("nested/a.dat"), out.join("b.dat")]);
        assert_eq!(fs::read(out.join("b.dat")).unwrap(), b"bb");
    }

    #[test]
    fn extract_gzip_tar() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("run.tar.gz");
        let encoder = flate2::write::GzEncoder::new(
            fs::File::create(&archive).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        append(&mut builder, "./r1.fastq", b"@r1\nACGT\n+\nIIII\n");
        builder.into_inner().unwrap().finish().unwrap();

        let out = utf8(temp.path());
        let extraction = extract(&utf8(&archive), &out).unwrap();
        assert_eq!(extraction.files, vec![out.join("r1.fastq")]);
    }

    #[test]
    fn failed_extraction_removes_what_it_created() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("run.tar");
        let mut builder = tar::Builder::new(fs::File::create(&archive).unwrap());
        append(&mut builder, "nested/a.dat", b"aaaa");
        let mut header = tar::Header::new_gnu();
        let name = b"../escape.dat";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"ee"[..]).unwrap();
        builder.finish().unwrap();
        drop(builder);

        let out = utf8(&temp.path().join("out"));
        let err = extract(&utf8(&archive), &out).unwrap_err();
        assert!(matches!(err, SubmitError::Archive(_)), "{err:?}");
        assert!(out.as_std_path().is_dir());
        assert_eq!(fs::read_dir(out.as_std_path()).unwrap().count(), 0);
        assert!(!temp.path().join("escape.dat").exists());
    }

    #[test]
    fn extract_zip_archive() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("run.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("reads/r1.fastq", options).unwrap();
        writer.write_all(b"@r1\n").unwrap();
        writer.finish().unwrap();

        let out = utf8(&temp.path().join("out"));
        let extraction = extract(&utf8(&archive), &out).unwrap();
        assert_eq!(
            extraction.paths,
            vec![out.join("reads"), out.join("reads/r1.fastq")]
        );
        assert_eq!(extraction.files, vec![out.join("reads/r1.fastq")]);
    }
}
