use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::{Namespace, SourceRecord};
use crate::error::SubmitError;

/// On-disk form of the records exported from the metadata store.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RecordFile {
    #[serde(default)]
    pub records_16s: Vec<SourceRecord>,
    #[serde(default)]
    pub records_wgs: Vec<SourceRecord>,
}

/// Sequenced records per namespace, plus samples that have nothing to
/// transfer but still belong in the submission document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordSet {
    pub records_16s: Vec<SourceRecord>,
    pub records_wgs: Vec<SourceRecord>,
    pub unsequenced: Vec<SourceRecord>,
}

impl RecordSet {
    pub fn load(path: &Utf8Path) -> Result<Self, SubmitError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| SubmitError::Records(format!("read {path}: {err}")))?;
        let file: RecordFile = serde_json::from_str(&content)
            .map_err(|err| SubmitError::Records(format!("parse {path}: {err}")))?;
        Ok(Self::split(file.records_16s, file.records_wgs))
    }

    /// Moves records without any (preparation, sequence) pair into
    /// `unsequenced`, one entry per sample id.
    pub fn split(records_16s: Vec<SourceRecord>, records_wgs: Vec<SourceRecord>) -> Self {
        let mut seen = HashSet::new();
        let mut unsequenced = Vec::new();
        let mut keep = |records: Vec<SourceRecord>| -> Vec<SourceRecord> {
            let mut sequenced = Vec::new();
            for record in records {
                if record.is_sequenced() {
                    sequenced.push(record);
                } else if seen.insert(record.sample.id.clone()) {
                    unsequenced.push(SourceRecord::unsequenced(record.sample));
                }
            }
            sequenced
        };
        let records_16s = keep(records_16s);
        let records_wgs = keep(records_wgs);
        Self {
            records_16s,
            records_wgs,
            unsequenced,
        }
    }

    pub fn records(&self, namespace: Namespace) -> &[SourceRecord] {
        match namespace {
            Namespace::SixteenS => &self.records_16s,
            Namespace::Wgs => &self.records_wgs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PrepSeq, Preparation, Sample, Sequence};

    fn sample(id: &str) -> Sample {
        Sample {
            id: id.to_string(),
            name: None,
            attributes: Default::default(),
        }
    }

    fn sequenced(id: &str) -> SourceRecord {
        SourceRecord {
            sample: sample(id),
            prepseqs: vec![PrepSeq {
                prep: Preparation {
                    id: format!("p-{id}"),
                    attributes: Default::default(),
                },
                seq: Sequence {
                    id: format!("q-{id}"),
                    size: 1,
                    urls: vec![format!("fasp://h/{id}.tar")],
                    instrument_model: None,
                },
            }],
        }
    }

    #[test]
    fn split_moves_unsequenced_once() {
        let set = RecordSet::split(
            vec![sequenced("s1"), SourceRecord::unsequenced(sample("s2"))],
            vec![
                SourceRecord::unsequenced(sample("s2")),
                SourceRecord::unsequenced(sample("s3")),
                sequenced("s4"),
            ],
        );
        assert_eq!(set.records_16s.len(), 1);
        assert_eq!(set.records_wgs.len(), 1);
        let ids: Vec<_> = set.unsequenced.iter().map(|r| r.sample.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s3"]);
    }

    #[test]
    fn load_record_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(temp.path().join("records.json")).unwrap();
        fs::write(
            path.as_std_path(),
            r#"{
                "records_16s": [
                    {"sample": {"id": "s1"},
                     "prepseqs": [{"prep": {"id": "p1"},
                                   "seq": {"id": "q1", "size": 10, "urls": ["fasp://h/a.tar"]}}]}
                ],
                "records_wgs": [{"sample": {"id": "s2"}}]
            }"#,
        )
        .unwrap();
        let set = RecordSet::load(&path).unwrap();
        assert_eq!(set.records_16s[0].prepseqs[0].seq.size, 10);
        assert!(set.records_wgs.is_empty());
        assert_eq!(set.unsequenced[0].sample.id, "s2");
    }
}
