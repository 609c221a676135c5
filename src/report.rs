use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::domain::SourceUrl;
use crate::error::SubmitError;
use crate::remote::RemoteSession;
use crate::transfer::TransferClient;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

static REPORT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"report\.([\d.]*)xml").expect("valid report regex"));

/// Reflects a processing report back into the metadata store. Implementors
/// own whatever session the store needs.
pub trait ReportConsumer: Send + Sync {
    fn update_from_report(&self, report: &Utf8Path) -> Result<(), SubmitError>;
}

impl<C: ReportConsumer + ?Sized> ReportConsumer for Arc<C> {
    fn update_from_report(&self, report: &Utf8Path) -> Result<(), SubmitError> {
        (**self).update_from_report(report)
    }
}

static REPORT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"status="([^"]+)""#).expect("valid status regex"));

/// Tallies the `status` attributes of a report and logs them. Stands in for a
/// metadata store when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingConsumer;

impl LoggingConsumer {
    pub fn statuses(xml: &str) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for caps in REPORT_STATUS.captures_iter(xml) {
            *counts.entry(caps[1].to_string()).or_insert(0) += 1;
        }
        counts
    }
}

impl ReportConsumer for LoggingConsumer {
    fn update_from_report(&self, report: &Utf8Path) -> Result<(), SubmitError> {
        let xml = fs::read_to_string(report.as_std_path())
            .map_err(|err| SubmitError::ReportUpdate(format!("{report}: {err}")))?;
        let counts = Self::statuses(&xml);
        if counts.is_empty() {
            tracing::warn!("{report} carries no status attributes");
        }
        for (status, count) in counts {
            tracing::info!("{report}: {count} x {status}");
        }
        Ok(())
    }
}

/// Embedded report number, e.g. `report.12.xml` → `[12]`, compared
/// component-wise as integers. `None` when `name` is not a report or a
/// component does not fit in a `u64`.
pub fn report_number(name: &str) -> Option<Vec<u64>> {
    let caps = REPORT_NAME.captures(name)?;
    caps[1]
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

pub fn is_report_name(name: &str) -> bool {
    report_number(name).is_some()
}

/// Numerically greatest report among `names`.
pub fn most_recent<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .filter_map(|name| report_number(name).map(|number| (number, name)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, name)| name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Updated { report: Utf8PathBuf },
    TimedOut { waited: Duration },
}

/// Waits for the submission server to publish processing reports, fetches
/// the new ones and hands the latest to a [`ReportConsumer`].
pub struct ReportPoller<S: RemoteSession, T: TransferClient, C: ReportConsumer> {
    session: S,
    client: T,
    consumer: C,
    host: String,
    remote_path: Utf8PathBuf,
    reports_dir: Utf8PathBuf,
    settings: PollSettings,
}

impl<S: RemoteSession, T: TransferClient, C: ReportConsumer> ReportPoller<S, T, C> {
    pub fn new(
        session: S,
        client: T,
        consumer: C,
        host: impl Into<String>,
        remote_path: impl Into<Utf8PathBuf>,
        reports_dir: impl Into<Utf8PathBuf>,
        settings: PollSettings,
    ) -> Self {
        Self {
            session,
            client,
            consumer,
            host: host.into(),
            remote_path: remote_path.into(),
            reports_dir: reports_dir.into(),
            settings,
        }
    }

    /// Like [`ReportPoller::poll`], but a timeout is an error.
    pub fn run(&self) -> Result<Utf8PathBuf, SubmitError> {
        match self.poll()? {
            PollOutcome::Updated { report } => Ok(report),
            PollOutcome::TimedOut { waited } => Err(SubmitError::ReportTimeout(waited.as_secs())),
        }
    }

    pub fn poll(&self) -> Result<PollOutcome, SubmitError> {
        let started = Instant::now();
        let candidates = loop {
            let candidates = self.new_candidates();
            if !candidates.is_empty() {
                break candidates;
            }
            let waited = started.elapsed();
            if waited >= self.settings.timeout {
                tracing::warn!("timed out waiting for report xml files");
                return Ok(PollOutcome::TimedOut { waited });
            }
            thread::sleep(self.settings.interval.min(self.settings.timeout - waited));
        };

        fs::create_dir_all(self.reports_dir.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        let mut downloaded = Vec::new();
        for name in &candidates {
            let local = self.reports_dir.join(name);
            if !local.as_std_path().exists() {
                let source = SourceUrl::Fasp {
                    host: self.host.clone(),
                    path: self.remote_path.join(name).into_string(),
                };
                if let Err(err) = self.client.download(&source, &self.reports_dir) {
                    tracing::warn!("unable to download report {name}: {err}");
                    continue;
                }
            }
            if local.as_std_path().is_file() {
                downloaded.push(name.as_str());
            }
        }

        let latest = most_recent(downloaded.iter().copied()).ok_or_else(|| {
            SubmitError::TransferFailed("no report candidate could be downloaded".to_string())
        })?;
        let report = self.reports_dir.join(latest);
        tracing::info!("updating metadata from {report}");
        self.consumer.update_from_report(&report)?;
        Ok(PollOutcome::Updated { report })
    }

    // Reports already present locally were handled by an earlier run.
    fn new_candidates(&self) -> Vec<String> {
        let files = match self.session.list_files(&self.remote_path) {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!("listing {} failed: {err}", self.remote_path);
                return Vec::new();
            }
        };
        files
            .into_iter()
            .map(|file| file.name)
            .filter(|name| is_report_name(name))
            .filter(|name| !self.reports_dir.join(name).as_std_path().exists())
            .collect()
    }
}
