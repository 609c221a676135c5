use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{Namespace, SourceUrl};
use crate::error::SubmitError;
use crate::manifest::{self, Manifest};
use crate::records::RecordSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentContext {
    pub study_id: String,
    pub release_date: Option<String>,
    pub bioproject_id: Option<String>,
}

/// Uploaded files per (archive name, namespace), read back from the unit
/// manifests.
pub type FileListings = BTreeMap<(String, Namespace), Manifest>;

/// Renders the submission document. Must be deterministic for a given input.
pub trait DocumentBuilder: Send + Sync {
    fn build(
        &self,
        context: &DocumentContext,
        records: &RecordSet,
        listings: &FileListings,
    ) -> Result<Vec<u8>, SubmitError>;
}

pub fn collect_listings(sentinels: &[Utf8PathBuf]) -> Result<FileListings, SubmitError> {
    let mut listings = FileListings::new();
    for sentinel in sentinels {
        let (archive, namespace) = manifest::split_sentinel_path(sentinel).ok_or_else(|| {
            SubmitError::Document(format!("not a unit sentinel: {sentinel}"))
        })?;
        let name = archive
            .file_name()
            .ok_or_else(|| SubmitError::Document(format!("no archive name in {sentinel}")))?
            .to_string();
        listings.insert((name, namespace), Manifest::read(sentinel)?);
    }
    Ok(listings)
}

/// Collects listings from `sentinels`, builds the document and writes it to
/// `destination`.
pub fn write_document<B: DocumentBuilder + ?Sized>(
    builder: &B,
    context: &DocumentContext,
    records: &RecordSet,
    sentinels: &[Utf8PathBuf],
    destination: &Utf8Path,
) -> Result<(), SubmitError> {
    let listings = collect_listings(sentinels)?;
    let bytes = builder.build(context, records, &listings)?;
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    std::fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".sra-submit-document")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    std::fs::write(temp.path(), &bytes).map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    temp.persist(destination.as_std_path())
        .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Plain JSON rendering of the record set with each sequence's uploaded
/// files attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentBuilder;

#[derive(Serialize)]
struct JsonDocument<'a> {
    context: &'a DocumentContext,
    unsequenced_samples: Vec<&'a str>,
    runs: Vec<JsonRun<'a>>,
}

#[derive(Serialize)]
struct JsonRun<'a> {
    namespace: Namespace,
    sample_id: &'a str,
    preparation_id: &'a str,
    sequence_id: &'a str,
    instrument_model: Option<&'a str>,
    files: Vec<JsonFile<'a>>,
}

#[derive(Serialize)]
struct JsonFile<'a> {
    name: &'a str,
    size: u64,
}

impl DocumentBuilder for JsonDocumentBuilder {
    fn build(
        &self,
        context: &DocumentContext,
        records: &RecordSet,
        listings: &FileListings,
    ) -> Result<Vec<u8>, SubmitError> {
        let mut runs = Vec::new();
        for namespace in Namespace::ALL {
            for record in records.records(namespace) {
                for prepseq in &record.prepseqs {
                    let url: SourceUrl = prepseq.seq.primary_url()?.parse()?;
                    let archive = url.file_name().unwrap_or_default().to_string();
                    let files = listings
                        .get(&(archive, namespace))
                        .map(|manifest| {
                            manifest
                                .entries()
                                .iter()
                                .map(|entry| JsonFile {
                                    name: &entry.name,
                                    size: entry.size,
                                })
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    if files.is_empty() && prepseq.seq.size == 0 {
                        continue;
                    }
                    runs.push(JsonRun {
                        namespace,
                        sample_id: &record.sample.id,
                        preparation_id: &prepseq.prep.id,
                        sequence_id: &prepseq.seq.id,
                        instrument_model: prepseq.seq.instrument_model.as_deref(),
                        files,
                    });
                }
            }
        }
        let document = JsonDocument {
            context,
            unsequenced_samples: records
                .unsequenced
                .iter()
                .map(|record| record.sample.id.as_str())
                .collect(),
            runs,
        };
        let mut bytes = serde_json::to_vec_pretty(&document)
            .map_err(|err| SubmitError::Document(err.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
