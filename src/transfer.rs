use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::SourceUrl;
use crate::error::SubmitError;

const ASPERA_PORT: &str = "33001";
const ASPERA_RATE: &str = "200m";

/// Fast-transfer side of a remote endpoint.
pub trait TransferClient: Send + Sync {
    /// Fetches `source` into `destination_dir` and returns the local path.
    fn download(
        &self,
        source: &SourceUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, SubmitError>;

    fn upload(&self, local: &Utf8Path, host: &str, remote_dir: &Utf8Path)
    -> Result<(), SubmitError>;
}

impl<T: TransferClient + ?Sized> TransferClient for std::sync::Arc<T> {
    fn download(
        &self,
        source: &SourceUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, SubmitError> {
        (**self).download(source, destination_dir)
    }

    fn upload(
        &self,
        local: &Utf8Path,
        host: &str,
        remote_dir: &Utf8Path,
    ) -> Result<(), SubmitError> {
        (**self).upload(local, host, remote_dir)
    }
}

#[derive(Debug, Clone)]
pub enum Credential {
    Password(String),
    KeyFile(Utf8PathBuf),
}

#[derive(Clone)]
pub struct SystemTransferClient {
    ascp: Option<PathBuf>,
    http: Client,
    user: String,
    credential: Credential,
}

impl SystemTransferClient {
    pub fn new(user: impl Into<String>, credential: Credential) -> Result<Self, SubmitError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sra-submit/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SubmitError::TransferFailed(err.to_string()))?,
        );
        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60 * 60))
            .build()
            .map_err(|err| SubmitError::TransferFailed(err.to_string()))?;
        Ok(Self {
            ascp: find_in_path("ascp"),
            http,
            user: user.into(),
            credential,
        })
    }

    fn require_ascp(&self) -> Result<&PathBuf, SubmitError> {
        self.ascp
            .as_ref()
            .ok_or_else(|| SubmitError::MissingTool("ascp".to_string()))
    }

    fn ascp(&self, mut args: Vec<String>) -> Result<(), SubmitError> {
        let program = self.require_ascp()?;
        let mut cmd = Command::new(program);
        match &self.credential {
            Credential::Password(password) => {
                cmd.env("ASPERA_SCP_PASS", password);
            }
            Credential::KeyFile(keyfile) => {
                args.splice(0..0, ["-i".to_string(), keyfile.to_string()]);
            }
        }
        cmd.args(&args);
        run_cmd(cmd, program)
    }

    fn download_http(
        &self,
        url: &reqwest::Url,
        destination: &Utf8Path,
    ) -> Result<(), SubmitError> {
        let mut request = self.http.get(url.clone());
        if let Credential::Password(password) = &self.credential {
            request = request.basic_auth(&self.user, Some(password));
        }
        let mut response = request
            .send()
            .map_err(|err| SubmitError::TransferFailed(format!("{url}: {err}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "source request failed".to_string());
            return Err(SubmitError::HttpStatus { status, message });
        }
        let parent = destination
            .parent()
            .ok_or_else(|| SubmitError::Filesystem("invalid destination path".to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".sra-submit-download")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| SubmitError::TransferFailed(format!("{url}: {err}")))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl TransferClient for SystemTransferClient {
    fn download(
        &self,
        source: &SourceUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, SubmitError> {
        let name = source
            .file_name()
            .ok_or_else(|| SubmitError::InvalidSourceUrl(source.to_string()))?;
        fs::create_dir_all(destination_dir.as_std_path())
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
        let destination = destination_dir.join(name);
        tracing::info!("downloading {source} into {destination_dir}");
        match source {
            SourceUrl::Fasp { host, path } => self.ascp(vec![
                "-T".to_string(),
                "-l".to_string(),
                ASPERA_RATE.to_string(),
                "-P".to_string(),
                ASPERA_PORT.to_string(),
                format!("{}@{host}:{path}", self.user),
                destination_dir.to_string(),
            ])?,
            SourceUrl::Http(url) => self.download_http(url, &destination)?,
        }
        if !destination.as_std_path().is_file() {
            return Err(SubmitError::TransferFailed(format!(
                "{source} did not produce {destination}"
            )));
        }
        Ok(destination)
    }

    fn upload(
        &self,
        local: &Utf8Path,
        host: &str,
        remote_dir: &Utf8Path,
    ) -> Result<(), SubmitError> {
        tracing::info!("uploading {local} to {host}:{remote_dir}");
        self.ascp(vec![
            "-Q".to_string(),
            "-T".to_string(),
            "-k".to_string(),
            "1".to_string(),
            "-l".to_string(),
            ASPERA_RATE.to_string(),
            "-P".to_string(),
            ASPERA_PORT.to_string(),
            local.to_string(),
            format!("{}@{host}:{remote_dir}", self.user),
        ])
    }
}

fn run_cmd(mut cmd: Command, program: &Path) -> Result<(), SubmitError> {
    let output = cmd
        .output()
        .map_err(|err| SubmitError::TransferFailed(err.to_string()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {}", program.display())
    } else {
        stderr
    };
    Err(SubmitError::TransferFailed(message))
}

pub(crate) fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
