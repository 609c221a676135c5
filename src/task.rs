use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::SubmitError;

pub type Action = Box<dyn Fn() -> Result<(), SubmitError> + Send + Sync>;
pub type UpToDateCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// A unit of work handed to a scheduler: run `actions` only after every
/// `file_deps` path exists, and only when some `uptodate` check says the
/// `targets` are stale.
pub struct TaskDescriptor {
    pub name: String,
    pub actions: Vec<Action>,
    pub file_deps: Vec<Utf8PathBuf>,
    pub targets: Vec<Utf8PathBuf>,
    pub uptodate: Vec<UpToDateCheck>,
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("actions", &self.actions.len())
            .field("file_deps", &self.file_deps)
            .field("targets", &self.targets)
            .field("uptodate", &self.uptodate.len())
            .finish()
    }
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            file_deps: Vec::new(),
            targets: Vec::new(),
            uptodate: Vec::new(),
        }
    }

    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn() -> Result<(), SubmitError> + Send + Sync + 'static,
    {
        self.actions.push(Box::new(action));
        self
    }

    pub fn file_deps(mut self, deps: impl IntoIterator<Item = Utf8PathBuf>) -> Self {
        self.file_deps.extend(deps);
        self
    }

    pub fn target(mut self, target: Utf8PathBuf) -> Self {
        self.targets.push(target);
        self
    }

    pub fn uptodate<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.uptodate.push(Box::new(check));
        self
    }

    pub fn missing_deps(&self) -> Vec<Utf8PathBuf> {
        self.file_deps
            .iter()
            .filter(|dep| !dep.as_std_path().exists())
            .cloned()
            .collect()
    }

    /// Up to date when there is something to judge by, every target exists
    /// and is newer than every file dep, and every uptodate check holds.
    pub fn is_up_to_date(&self) -> bool {
        if self.targets.is_empty() && self.uptodate.is_empty() {
            return false;
        }
        if !self.targets.is_empty() {
            let Some(oldest_target) = oldest_mtime(&self.targets) else {
                return false;
            };
            let deps_newer = self
                .file_deps
                .iter()
                .filter_map(|dep| mtime(dep))
                .any(|modified| modified > oldest_target);
            if deps_newer {
                return false;
            }
        }
        self.uptodate.iter().all(|check| check())
    }

    pub fn plan(&self) -> TaskPlan {
        TaskPlan {
            name: self.name.clone(),
            file_deps: self.file_deps.iter().map(ToString::to_string).collect(),
            targets: self.targets.iter().map(ToString::to_string).collect(),
            uptodate_checks: self.uptodate.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPlan {
    pub name: String,
    pub file_deps: Vec<String>,
    pub targets: Vec<String>,
    pub uptodate_checks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Ran,
    UpToDate,
    Blocked { missing: Vec<String> },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: TaskStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
    #[serde(skip)]
    errors: Vec<SubmitError>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, TaskStatus::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| matches!(outcome.status, TaskStatus::Ran | TaskStatus::UpToDate))
    }

    /// The error of the first failed task, in run order.
    pub fn take_error(&mut self) -> Option<SubmitError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.remove(0))
        }
    }

    pub fn status_of(&self, name: &str) -> Option<&TaskStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.name == name)
            .map(|outcome| &outcome.status)
    }
}

/// Runs descriptors one at a time in dependency order. A task depends on
/// every task whose targets it lists as file deps. Failed tasks don't stop
/// the run; their dependents end up blocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialRunner;

impl SequentialRunner {
    pub fn run(&self, tasks: &[TaskDescriptor]) -> Result<RunReport, SubmitError> {
        let order = topological_order(tasks)?;
        let mut report = RunReport::default();
        for index in order {
            let task = &tasks[index];
            let status = match run_task(task) {
                Ok(status) => status,
                Err(err) => {
                    let status = TaskStatus::Failed {
                        message: err.to_string(),
                    };
                    report.errors.push(err);
                    status
                }
            };
            match &status {
                TaskStatus::Ran => tracing::info!("ran {}", task.name),
                TaskStatus::UpToDate => tracing::debug!("{} is up to date", task.name),
                TaskStatus::Blocked { missing } => {
                    tracing::warn!("{} blocked on {}", task.name, missing.join(", "))
                }
                TaskStatus::Failed { message } => {
                    tracing::warn!("{} failed: {message}", task.name)
                }
            }
            report.outcomes.push(TaskOutcome {
                name: task.name.clone(),
                status,
            });
        }
        Ok(report)
    }
}

fn run_task(task: &TaskDescriptor) -> Result<TaskStatus, SubmitError> {
    let missing = task.missing_deps();
    if !missing.is_empty() {
        return Ok(TaskStatus::Blocked {
            missing: missing.iter().map(ToString::to_string).collect(),
        });
    }
    if task.is_up_to_date() {
        return Ok(TaskStatus::UpToDate);
    }
    for action in &task.actions {
        action()?;
    }
    Ok(TaskStatus::Ran)
}

/// Kahn's algorithm, ties broken by emission order.
pub fn topological_order(tasks: &[TaskDescriptor]) -> Result<Vec<usize>, SubmitError> {
    let mut producers: HashMap<&Utf8Path, usize> = HashMap::new();
    for (index, task) in tasks.iter().enumerate() {
        for target in &task.targets {
            if let Some(previous) = producers.insert(target.as_path(), index)
                && previous != index
            {
                return Err(SubmitError::TaskFailed {
                    name: format!("{}, {}", tasks[previous].name, task.name),
                    message: format!("duplicate target {target}"),
                });
            }
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    let mut pending = vec![0usize; tasks.len()];
    for (index, task) in tasks.iter().enumerate() {
        let upstream: HashSet<usize> = task
            .file_deps
            .iter()
            .filter_map(|dep| producers.get(dep.as_path()).copied())
            .filter(|producer| *producer != index)
            .collect();
        pending[index] = upstream.len();
        for producer in upstream {
            dependents[producer].push(index);
        }
    }

    let mut ready: VecDeque<usize> = (0..tasks.len()).filter(|i| pending[*i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(index) = ready.pop_front() {
        order.push(index);
        let mut released = Vec::new();
        for &dependent in &dependents[index] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                released.push(dependent);
            }
        }
        released.sort_unstable();
        ready.extend(released);
    }

    if order.len() != tasks.len() {
        let stuck: Vec<_> = (0..tasks.len())
            .filter(|i| pending[*i] > 0)
            .map(|i| tasks[i].name.clone())
            .collect();
        return Err(SubmitError::TaskFailed {
            name: stuck.join(", "),
            message: "dependency cycle".to_string(),
        });
    }
    Ok(order)
}

fn mtime(path: &Utf8Path) -> Option<SystemTime> {
    fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .ok()
}

/// `None` when any path is missing or `paths` is empty.
fn oldest_mtime(paths: &[Utf8PathBuf]) -> Option<SystemTime> {
    let mut oldest: Option<SystemTime> = None;
    for path in paths {
        let modified = mtime(path)?;
        oldest = Some(oldest.map_or(modified, |current| current.min(modified)));
    }
    oldest
}
