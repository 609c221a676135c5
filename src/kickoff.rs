use camino::{Utf8Path, Utf8PathBuf};

use crate::error::SubmitError;
use crate::executor::SubmissionTarget;
use crate::manifest;
use crate::transfer::TransferClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Mark complete only when the upload succeeds.
    OnSuccess,
    /// Mark complete once attempted, whatever the outcome.
    Blithe,
}

/// Final uploads that start processing on the submission server: the document
/// first, then the readiness marker.
pub struct Kickoff<T: TransferClient> {
    client: T,
    target: SubmissionTarget,
}

impl<T: TransferClient> Kickoff<T> {
    pub fn new(client: T, target: SubmissionTarget) -> Self {
        Self { client, target }
    }

    pub fn upload_document(&self, document: &Utf8Path) -> Result<Utf8PathBuf, SubmitError> {
        self.upload(document, Completion::OnSuccess)
    }

    /// Writes the sentinel even when the upload fails; the failure is only
    /// logged, so a failed readiness upload is not retried on later runs.
    pub fn upload_ready_marker(&self, ready: &Utf8Path) -> Result<Utf8PathBuf, SubmitError> {
        self.upload(ready, Completion::Blithe)
    }

    /// Uploads `local` and writes `<local>.complete` according to `completion`.
    pub fn upload(
        &self,
        local: &Utf8Path,
        completion: Completion,
    ) -> Result<Utf8PathBuf, SubmitError> {
        let sentinel = manifest::marker_path(local);
        match self
            .client
            .upload(local, &self.target.host, &self.target.remote_path)
        {
            Ok(()) => {}
            Err(err) if completion == Completion::Blithe => {
                tracing::warn!("upload of {local} failed, marking complete anyway: {err}");
            }
            Err(err) => return Err(err),
        }
        manifest::touch(&sentinel)?;
        Ok(sentinel)
    }
}
