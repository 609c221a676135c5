use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use sra_submit::domain::SourceUrl;
use sra_submit::error::SubmitError;
use sra_submit::remote::{RemoteFile, RemoteSession};
use sra_submit::report::{PollOutcome, PollSettings, ReportConsumer, ReportPoller};
use sra_submit::transfer::TransferClient;

struct ListingSession {
    names: Vec<&'static str>,
    fail: bool,
}

impl RemoteSession for ListingSession {
    fn list_files(&self, _remote_path: &Utf8Path) -> Result<Vec<RemoteFile>, SubmitError> {
        if self.fail {
            return Err(SubmitError::RemoteListing("connection refused".to_string()));
        }
        Ok(self
            .names
            .iter()
            .map(|name| RemoteFile {
                name: name.to_string(),
                size: 10,
            })
            .collect())
    }
}

#[derive(Default)]
struct ReportDownloads {
    fetched: Mutex<Vec<String>>,
    broken: Option<&'static str>,
}

impl TransferClient for ReportDownloads {
    fn download(
        &self,
        source: &SourceUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, SubmitError> {
        let name = source.file_name().unwrap();
        if self.broken == Some(name) {
            return Err(SubmitError::TransferFailed(name.to_string()));
        }
        let destination = destination_dir.join(name);
        fs::write(destination.as_std_path(), b"<SubmissionStatus status=\"processed-ok\"/>")
            .unwrap();
        self.fetched.lock().unwrap().push(source.to_string());
        Ok(destination)
    }

    fn upload(&self, _local: &Utf8Path, _host: &str, _remote_dir: &Utf8Path) -> Result<(), SubmitError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingConsumer {
    reports: Mutex<Vec<Utf8PathBuf>>,
}

impl ReportConsumer for RecordingConsumer {
    fn update_from_report(&self, report: &Utf8Path) -> Result<(), SubmitError> {
        self.reports.lock().unwrap().push(report.to_path_buf());
        Ok(())
    }
}

fn reports_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().join("reports")).unwrap();
    (temp, dir)
}

fn quick() -> PollSettings {
    PollSettings {
        timeout: Duration::from_millis(200),
        interval: Duration::from_millis(50),
    }
}

#[test]
fn most_recent_report_is_chosen_numerically() {
    let (_temp, dir) = reports_dir();
    let session = ListingSession {
        names: vec!["submission.xml", "report.1.xml", "report.2.xml", "report.10.xml"],
        fail: false,
    };
    let client = Arc::new(ReportDownloads::default());
    let consumer = Arc::new(RecordingConsumer::default());
    let poller = ReportPoller::new(
        session,
        Arc::clone(&client),
        Arc::clone(&consumer),
        "upload.example.org",
        "/submit/Production/S1/",
        dir.clone(),
        quick(),
    );

    let outcome = poller.poll().unwrap();
    assert_eq!(
        outcome,
        PollOutcome::Updated {
            report: dir.join("report.10.xml")
        }
    );
    assert_eq!(*consumer.reports.lock().unwrap(), vec![dir.join("report.10.xml")]);
    let fetched = client.fetched.lock().unwrap();
    assert_eq!(fetched.len(), 3);
    assert!(fetched.iter().any(|source| source
        == "fasp://upload.example.org/submit/Production/S1/report.2.xml"));
}

#[test]
fn failed_candidate_download_is_skipped() {
    let (_temp, dir) = reports_dir();
    let session = ListingSession {
        names: vec!["report.1.xml", "report.2.xml"],
        fail: false,
    };
    let client = Arc::new(ReportDownloads {
        broken: Some("report.2.xml"),
        ..Default::default()
    });
    let consumer = Arc::new(RecordingConsumer::default());
    let poller = ReportPoller::new(
        session,
        Arc::clone(&client),
        Arc::clone(&consumer),
        "upload.example.org",
        "/submit/Production/S1/",
        dir.clone(),
        quick(),
    );

    assert_eq!(poller.run().unwrap(), dir.join("report.1.xml"));
}

#[test]
fn reports_already_present_locally_are_not_candidates() {
    let (_temp, dir) = reports_dir();
    fs::create_dir_all(dir.as_std_path()).unwrap();
    fs::write(dir.join("report.1.xml").as_std_path(), b"old").unwrap();
    let session = ListingSession {
        names: vec!["report.1.xml"],
        fail: false,
    };
    let client = Arc::new(ReportDownloads::default());
    let consumer = Arc::new(RecordingConsumer::default());
    let poller = ReportPoller::new(
        session,
        Arc::clone(&client),
        Arc::clone(&consumer),
        "upload.example.org",
        "/submit/Production/S1/",
        dir,
        quick(),
    );

    let started = Instant::now();
    assert_matches!(poller.poll().unwrap(), PollOutcome::TimedOut { .. });
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(consumer.reports.lock().unwrap().is_empty());
    assert!(client.fetched.lock().unwrap().is_empty());
}

#[test]
fn timeout_is_honoured_and_reported_as_error() {
    let (_temp, dir) = reports_dir();
    let session = ListingSession {
        names: Vec::new(),
        fail: true,
    };
    let client = Arc::new(ReportDownloads::default());
    let consumer = Arc::new(RecordingConsumer::default());
    let poller = ReportPoller::new(
        session,
        Arc::clone(&client),
        Arc::clone(&consumer),
        "upload.example.org",
        "/submit/Production/S1/",
        dir,
        quick(),
    );

    let started = Instant::now();
    let err = poller.run().unwrap_err();
    let elapsed = started.elapsed();
    assert_matches!(err, SubmitError::ReportTimeout(0));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(5));
    assert!(consumer.reports.lock().unwrap().is_empty());
}
