use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{Namespace, SourceRecord, TransferUnit};
use crate::error::SubmitError;

/// Archives already downloaded for one namespace, and where that namespace
/// works.
#[derive(Debug, Clone)]
pub struct LocalCache {
    pub dir: Utf8PathBuf,
    pub names: Arc<BTreeSet<String>>,
}

impl LocalCache {
    /// The working directory is the parent of the first cached file, or
    /// `fallback_dir` when nothing is cached.
    pub fn from_files(files: &[Utf8PathBuf], fallback_dir: &Utf8Path) -> Self {
        let dir = files
            .first()
            .and_then(|file| file.parent())
            .filter(|parent| !parent.as_str().is_empty())
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| fallback_dir.to_path_buf());
        let names = files
            .iter()
            .filter_map(|file| file.file_name().map(str::to_string))
            .collect();
        Self {
            dir,
            names: Arc::new(names),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NamespaceRecords<'a> {
    pub namespace: Namespace,
    pub records: &'a [SourceRecord],
    pub cache: &'a LocalCache,
}

/// Collapses every sequence referenced by the records into one unit per
/// (primary source URL, namespace), keeping first-seen order.
///
/// A sequence with no source URL fails the whole resolution before any
/// transfer is attempted, as do two distinct URLs that would share one
/// archive path and sentinel in the same working directory.
pub fn resolve(inputs: &[NamespaceRecords<'_>]) -> Result<Vec<TransferUnit>, SubmitError> {
    let mut seen: HashSet<(Namespace, String)> = HashSet::new();
    let mut sentinels: HashMap<Utf8PathBuf, String> = HashMap::new();
    let mut units = Vec::new();
    for input in inputs {
        for record in input.records {
            for prepseq in &record.prepseqs {
                let url = prepseq.seq.primary_url()?;
                if !seen.insert((input.namespace, url.to_string())) {
                    continue;
                }
                let unit = TransferUnit::new(
                    &prepseq.seq,
                    input.namespace,
                    input.cache.dir.clone(),
                    Arc::clone(&input.cache.names),
                )?;
                let sentinel = unit.sentinel_path();
                if let Some(first) = sentinels.get(&sentinel) {
                    return Err(SubmitError::ConflictingUnits {
                        path: sentinel.into_string(),
                        first: first.clone(),
                        second: url.to_string(),
                    });
                }
                sentinels.insert(sentinel, url.to_string());
                units.push(unit);
            }
        }
    }
    Ok(units)
}
