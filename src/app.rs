use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::document::{self, DocumentBuilder, DocumentContext};
use crate::domain::{Namespace, TransferUnit};
use crate::error::SubmitError;
use crate::executor::{SubmissionTarget, TransferExecutor};
use crate::kickoff::Kickoff;
use crate::manifest;
use crate::predicate::{self, UnitStatus};
use crate::records::RecordSet;
use crate::remote::{RemoteFileCache, RemoteSession};
use crate::report::{PollSettings, ReportConsumer, ReportPoller};
use crate::resolver::{self, LocalCache, NamespaceRecords};
use crate::task::{RunReport, SequentialRunner, TaskDescriptor, TaskPlan};
use crate::transfer::TransferClient;

pub const REPORT_TASK: &str = "report:get_reports";

/// The parts of the configuration a run needs once credentials have been
/// handed to the clients.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub study_id: String,
    pub products_dir: Utf8PathBuf,
    pub target: SubmissionTarget,
    pub cached_16s: Vec<Utf8PathBuf>,
    pub cached_wgs: Vec<Utf8PathBuf>,
    pub reports_dir: Utf8PathBuf,
    pub poll: PollSettings,
    pub document: DocumentContext,
}

impl PipelineSettings {
    pub fn submission_file(&self) -> Utf8PathBuf {
        self.products_dir.join("submission.xml")
    }

    pub fn ready_file(&self) -> Utf8PathBuf {
        self.products_dir.join("submit.ready")
    }

    fn cached(&self, namespace: Namespace) -> &[Utf8PathBuf] {
        match namespace {
            Namespace::SixteenS => &self.cached_16s,
            Namespace::Wgs => &self.cached_wgs,
        }
    }
}

impl From<&ResolvedConfig> for PipelineSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            study_id: config.study_id.clone(),
            products_dir: config.products_dir.clone(),
            target: config.target.clone(),
            cached_16s: config.cached_16s.clone(),
            cached_wgs: config.cached_wgs.clone(),
            reports_dir: config.reports_dir.clone(),
            poll: config.poll,
            document: config.document.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub study_id: String,
    pub tasks: Vec<TaskPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub study_id: String,
    pub remote_path: String,
    pub units: Vec<UnitCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitCheck {
    pub task: String,
    pub sequence_id: String,
    pub namespace: Namespace,
    pub source: String,
    pub sentinel: String,
    #[serde(flatten)]
    pub status: UnitStatus,
}

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub study_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_secs: f64,
    #[serde(flatten)]
    pub report: RunReport,
}

/// Wires the transfer clients, listing session, document builder and
/// metadata consumer together and emits the task descriptors of a run.
///
/// `source` fetches archives from the data source; `submission` talks to the
/// submission server for uploads and report downloads.
pub struct App<T, S, B, C>
where
    T: TransferClient + 'static,
    S: RemoteSession + 'static,
    B: DocumentBuilder + 'static,
    C: ReportConsumer + 'static,
{
    source: Arc<T>,
    submission: Arc<T>,
    session: Arc<S>,
    builder: Arc<B>,
    consumer: Arc<C>,
    settings: PipelineSettings,
}

impl<T, S, B, C> App<T, S, B, C>
where
    T: TransferClient + 'static,
    S: RemoteSession + 'static,
    B: DocumentBuilder + 'static,
    C: ReportConsumer + 'static,
{
    pub fn new(
        source: T,
        submission: T,
        session: S,
        builder: B,
        consumer: C,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source: Arc::new(source),
            submission: Arc::new(submission),
            session: Arc::new(session),
            builder: Arc::new(builder),
            consumer: Arc::new(consumer),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn resolve_units(&self, records: &RecordSet) -> Result<Vec<TransferUnit>, SubmitError> {
        let caches: Vec<(Namespace, LocalCache)> = Namespace::ALL
            .into_iter()
            .map(|namespace| {
                let cache = LocalCache::from_files(
                    self.settings.cached(namespace),
                    &self.settings.products_dir,
                );
                (namespace, cache)
            })
            .collect();
        let inputs: Vec<NamespaceRecords<'_>> = caches
            .iter()
            .map(|(namespace, cache)| NamespaceRecords {
                namespace: *namespace,
                records: records.records(*namespace),
                cache,
            })
            .collect();
        resolver::resolve(&inputs)
    }

    /// Every descriptor of a run, in emission order: one per unit, then the
    /// serialize tasks, the kickoff uploads and finally the report poll.
    pub fn tasks(&self, records: RecordSet) -> Result<Vec<TaskDescriptor>, SubmitError> {
        let units = self.resolve_units(&records)?;
        let cache = Arc::new(RemoteFileCache::new(
            Arc::clone(&self.session),
            self.settings.target.remote_path.clone(),
        ));
        let sentinels: Vec<Utf8PathBuf> = units.iter().map(TransferUnit::sentinel_path).collect();

        let mut tasks = self.unit_tasks(units, &cache);
        tasks.extend(self.serialize_tasks(Arc::new(records), &sentinels));
        tasks.extend(self.kickoff_tasks(&sentinels));
        tasks.push(self.report_task());
        Ok(tasks)
    }

    pub fn plan(&self, records: RecordSet) -> Result<PlanResult, SubmitError> {
        let tasks = self.tasks(records)?;
        Ok(PlanResult {
            study_id: self.settings.study_id.clone(),
            tasks: tasks.iter().map(TaskDescriptor::plan).collect(),
        })
    }

    pub fn run(&self, records: RecordSet) -> Result<RunResult, SubmitError> {
        let started_at = now();
        let started = std::time::Instant::now();
        let tasks = self.tasks(records)?;
        let report = SequentialRunner.run(&tasks)?;
        Ok(RunResult {
            study_id: self.settings.study_id.clone(),
            started_at,
            finished_at: now(),
            elapsed_secs: round_secs(started.elapsed()),
            report,
        })
    }

    /// Evaluates the idempotency predicate for every unit without
    /// transferring anything.
    pub fn check(&self, records: &RecordSet) -> Result<CheckResult, SubmitError> {
        let units = self.resolve_units(records)?;
        let cache = RemoteFileCache::new(
            Arc::clone(&self.session),
            self.settings.target.remote_path.clone(),
        );
        let units = units
            .iter()
            .map(|unit| UnitCheck {
                task: unit.task_name(),
                sequence_id: unit.sequence_id.clone(),
                namespace: unit.namespace,
                source: unit.source.to_string(),
                sentinel: unit.sentinel_path().into_string(),
                status: predicate::check_unit(unit, &cache),
            })
            .collect();
        Ok(CheckResult {
            study_id: self.settings.study_id.clone(),
            remote_path: self.settings.target.remote_path.to_string(),
            units,
        })
    }

    fn unit_tasks(
        &self,
        units: Vec<TransferUnit>,
        cache: &Arc<RemoteFileCache<Arc<S>>>,
    ) -> Vec<TaskDescriptor> {
        let executor = Arc::new(TransferExecutor::new(
            Arc::clone(&self.source),
            Arc::clone(&self.submission),
            self.settings.target.clone(),
        ));
        units
            .into_iter()
            .map(|unit| {
                let unit = Arc::new(unit);
                let run_unit = Arc::clone(&unit);
                let executor = Arc::clone(&executor);
                let check_unit = Arc::clone(&unit);
                let cache = Arc::clone(cache);
                TaskDescriptor::new(unit.task_name())
                    .target(unit.sentinel_path())
                    .action(move || executor.execute(&run_unit).map(|_| ()))
                    .uptodate(move || predicate::is_unit_complete(&check_unit, &*cache))
            })
            .collect()
    }

    fn serialize_tasks(
        &self,
        records: Arc<RecordSet>,
        sentinels: &[Utf8PathBuf],
    ) -> Vec<TaskDescriptor> {
        let submission_file = self.settings.submission_file();
        let ready_file = self.settings.ready_file();

        let builder = Arc::clone(&self.builder);
        let context = self.settings.document.clone();
        let deps = sentinels.to_vec();
        let destination = submission_file.clone();
        let xml = TaskDescriptor::new(format!("serialize:xml: {submission_file}"))
            .file_deps(sentinels.iter().cloned())
            .target(submission_file.clone())
            .action(move || {
                document::write_document(&*builder, &context, &records, &deps, &destination)
            });

        let marker = ready_file.clone();
        let ready = TaskDescriptor::new(format!("serialize:ready_file: {ready_file}"))
            .target(ready_file)
            .action(move || manifest::touch(&marker));

        vec![xml, ready]
    }

    fn kickoff_tasks(&self, sentinels: &[Utf8PathBuf]) -> Vec<TaskDescriptor> {
        let kickoff = Arc::new(Kickoff::new(
            Arc::clone(&self.submission),
            self.settings.target.clone(),
        ));
        let submission_file = self.settings.submission_file();
        let ready_file = self.settings.ready_file();
        let document_sentinel = manifest::marker_path(&submission_file);

        let upload = Arc::clone(&kickoff);
        let local = submission_file.clone();
        let document = TaskDescriptor::new(upload_task_name(&submission_file))
            .file_deps(sentinels.iter().cloned())
            .file_deps([submission_file.clone()])
            .target(document_sentinel.clone())
            .action(move || upload.upload_document(&local).map(|_| ()));

        let local = ready_file.clone();
        let ready = TaskDescriptor::new(upload_task_name(&ready_file))
            .file_deps(sentinels.iter().cloned())
            .file_deps([ready_file.clone(), document_sentinel])
            .target(manifest::marker_path(&ready_file))
            .action(move || kickoff.upload_ready_marker(&local).map(|_| ()));

        vec![document, ready]
    }

    fn report_task(&self) -> TaskDescriptor {
        let poller = ReportPoller::new(
            Arc::clone(&self.session),
            Arc::clone(&self.submission),
            Arc::clone(&self.consumer),
            self.settings.target.host.clone(),
            self.settings.target.remote_path.clone(),
            self.settings.reports_dir.clone(),
            self.settings.poll,
        );
        TaskDescriptor::new(REPORT_TASK)
            .file_deps([manifest::marker_path(&self.settings.ready_file())])
            .uptodate(|| false)
            .action(move || poller.run().map(|_| ()))
    }
}

pub fn upload_task_name(path: &Utf8Path) -> String {
    format!("upload: {}", path.file_name().unwrap_or(path.as_str()))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
