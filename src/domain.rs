use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::SubmitError;
use crate::manifest;

/// Category of sequencing data. Each namespace uploads through its own
/// completion sentinel and tags its files with its own label.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
pub enum Namespace {
    #[serde(rename = "16s")]
    #[value(name = "16s")]
    SixteenS,
    #[serde(rename = "wgs")]
    #[value(name = "wgs")]
    Wgs,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::SixteenS, Namespace::Wgs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::SixteenS => "16s",
            Namespace::Wgs => "wgs",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = SubmitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "16s" => Ok(Namespace::SixteenS),
            "wgs" => Ok(Namespace::Wgs),
            _ => Err(SubmitError::InvalidNamespace(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preparation {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub size: u64,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub instrument_model: Option<String>,
}

impl Sequence {
    pub fn primary_url(&self) -> Result<&str, SubmitError> {
        self.urls
            .first()
            .map(String::as_str)
            .ok_or_else(|| SubmitError::MissingSource(self.id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepSeq {
    pub prep: Preparation,
    pub seq: Sequence,
}

/// A sample with the (preparation, sequence) pairs sequenced from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub sample: Sample,
    #[serde(default)]
    pub prepseqs: Vec<PrepSeq>,
}

impl SourceRecord {
    pub fn unsequenced(sample: Sample) -> Self {
        Self {
            sample,
            prepseqs: Vec::new(),
        }
    }

    pub fn is_sequenced(&self) -> bool {
        !self.prepseqs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUrl {
    Fasp { host: String, path: String },
    Http(Url),
}

impl SourceUrl {
    pub fn file_name(&self) -> Option<&str> {
        let path = match self {
            SourceUrl::Fasp { path, .. } => path.as_str(),
            SourceUrl::Http(url) => url.path(),
        };
        path.rsplit('/').next().filter(|name| !name.is_empty())
    }
}

impl FromStr for SourceUrl {
    type Err = SubmitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let url =
            Url::parse(value.trim()).map_err(|_| SubmitError::InvalidSourceUrl(value.to_string()))?;
        match url.scheme() {
            "fasp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| SubmitError::InvalidSourceUrl(value.to_string()))?;
                Ok(SourceUrl::Fasp {
                    host: host.to_string(),
                    path: url.path().to_string(),
                })
            }
            "http" | "https" => Ok(SourceUrl::Http(url)),
            _ => Err(SubmitError::InvalidSourceUrl(value.to_string())),
        }
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceUrl::Fasp { host, path } => write!(f, "fasp://{host}{path}"),
            SourceUrl::Http(url) => write!(f, "{url}"),
        }
    }
}

/// One deduplicated source archive to download, unpack and re-upload under a
/// single namespace.
#[derive(Debug, Clone)]
pub struct TransferUnit {
    pub sequence_id: String,
    pub source: SourceUrl,
    pub namespace: Namespace,
    pub local_dir: Utf8PathBuf,
    pub cached_names: Arc<BTreeSet<String>>,
    /// Size of the archive at the source, not of its contents.
    pub expected_size: u64,
    archive_name: String,
}

impl TransferUnit {
    pub fn new(
        sequence: &Sequence,
        namespace: Namespace,
        local_dir: Utf8PathBuf,
        cached_names: Arc<BTreeSet<String>>,
    ) -> Result<Self, SubmitError> {
        let raw = sequence.primary_url()?;
        let source: SourceUrl = raw.parse()?;
        let archive_name = source
            .file_name()
            .ok_or_else(|| SubmitError::InvalidSourceUrl(raw.to_string()))?
            .to_string();
        Ok(Self {
            sequence_id: sequence.id.clone(),
            source,
            namespace,
            local_dir,
            cached_names,
            expected_size: sequence.size,
            archive_name,
        })
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn archive_path(&self) -> Utf8PathBuf {
        self.local_dir.join(&self.archive_name)
    }

    pub fn sentinel_path(&self) -> Utf8PathBuf {
        manifest::sentinel_path(&self.archive_path(), self.namespace)
    }

    pub fn task_name(&self) -> String {
        format!(
            "serialize:download_upload: {}.{}",
            self.archive_name, self.namespace
        )
    }

    pub fn is_cached_locally(&self) -> bool {
        self.cached_names.contains(&self.archive_name)
    }
}

/// Inserts `tag` before the final extension of `path`'s file name.
pub fn add_tag(path: &Utf8Path, tag: &str) -> Utf8PathBuf {
    let file_name = path.file_name().unwrap_or_default();
    let tagged = match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) if !stem.is_empty() => format!("{stem}.{tag}.{ext}"),
        _ => format!("{file_name}.{tag}"),
    };
    path.with_file_name(tagged)
}
