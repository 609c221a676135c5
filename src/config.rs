use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::document::DocumentContext;
use crate::error::SubmitError;
use crate::executor::SubmissionTarget;
use crate::report::{DEFAULT_INTERVAL, DEFAULT_TIMEOUT, PollSettings};

pub const DEFAULT_CONFIG_FILE: &str = "sra-submit.json";
pub const DEFAULT_SUBMISSION_HOST: &str = "upload.ncbi.nlm.nih.gov";
pub const DEFAULT_SUBMISSION_USER: &str = "asp-hmp2";
pub const DEFAULT_PASSWORD_ENV: &str = "SRA_SOURCE_PASSWORD";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub study_id: Option<String>,
    #[serde(default)]
    pub products_dir: Option<String>,
    #[serde(default)]
    pub records: Option<String>,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub submission: SubmissionSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub bioproject_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SourceSection {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SubmissionSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub keyfile: Option<String>,
    #[serde(default)]
    pub remote_path: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default)]
    pub files_16s: Vec<String>,
    #[serde(default)]
    pub files_wgs: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReportSection {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub study_id: String,
    pub products_dir: Utf8PathBuf,
    pub records_path: Utf8PathBuf,
    pub source_user: String,
    pub source_password: String,
    pub submission_user: String,
    pub keyfile: Utf8PathBuf,
    pub target: SubmissionTarget,
    pub cached_16s: Vec<Utf8PathBuf>,
    pub cached_wgs: Vec<Utf8PathBuf>,
    pub reports_dir: Utf8PathBuf,
    pub poll: PollSettings,
    pub document: DocumentContext,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SubmitError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(SubmitError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SubmitError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SubmitError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, |name| std::env::var(name).ok())
    }

    /// `env` looks up the environment variable holding the source password.
    pub fn resolve_config<E>(config: Config, env: E) -> Result<ResolvedConfig, SubmitError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let schema_version = config.schema_version.unwrap_or(1);
        let study_id = config
            .study_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SubmitError::ConfigParse("study_id is required".to_string()))?;

        let products_dir =
            Utf8PathBuf::from(config.products_dir.unwrap_or_else(|| "products".to_string()));
        let records_path =
            Utf8PathBuf::from(config.records.unwrap_or_else(|| "records.json".to_string()));

        let source_user = config
            .source
            .user
            .ok_or_else(|| SubmitError::MissingCredential("source.user".to_string()))?;
        let password_env = config
            .source
            .password_env
            .unwrap_or_else(|| DEFAULT_PASSWORD_ENV.to_string());
        let source_password = env(&password_env)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SubmitError::MissingCredential(format!("environment variable {password_env}"))
            })?;

        let keyfile = config
            .submission
            .keyfile
            .map(Utf8PathBuf::from)
            .ok_or_else(|| SubmitError::MissingCredential("submission.keyfile".to_string()))?;
        let remote_path = normalize_remote_path(
            config
                .submission
                .remote_path
                .unwrap_or_else(|| default_remote_path(&study_id)),
        );
        let target = SubmissionTarget {
            host: config
                .submission
                .host
                .unwrap_or_else(|| DEFAULT_SUBMISSION_HOST.to_string()),
            remote_path: Utf8PathBuf::from(remote_path),
        };
        let submission_user = config
            .submission
            .user
            .unwrap_or_else(|| DEFAULT_SUBMISSION_USER.to_string());

        let reports_dir = config
            .report
            .dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| products_dir.join("reports"));
        let poll = PollSettings {
            timeout: config
                .report
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            interval: config
                .report
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INTERVAL),
        };

        Ok(ResolvedConfig {
            schema_version,
            document: DocumentContext {
                study_id: study_id.clone(),
                release_date: config.release_date,
                bioproject_id: config.bioproject_id,
            },
            study_id,
            products_dir,
            records_path,
            source_user,
            source_password,
            submission_user,
            keyfile,
            target,
            cached_16s: config
                .cache
                .files_16s
                .into_iter()
                .map(Utf8PathBuf::from)
                .collect(),
            cached_wgs: config
                .cache
                .files_wgs
                .into_iter()
                .map(Utf8PathBuf::from)
                .collect(),
            reports_dir,
            poll,
        })
    }
}

pub fn default_remote_path(study_id: &str) -> String {
    format!("/submit/Production/{study_id}/")
}

fn normalize_remote_path(path: String) -> String {
    if path.ends_with('/') {
        path
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::app::PipelineSettings;

    fn minimal() -> Config {
        Config {
            study_id: Some("S1".to_string()),
            source: SourceSection {
                user: Some("dcc".to_string()),
                password_env: None,
            },
            submission: SubmissionSection {
                keyfile: Some("/keys/sra".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn env(name: &str) -> Option<String> {
        (name == DEFAULT_PASSWORD_ENV).then(|| "secret".to_string())
    }

    #[test]
    fn defaults_fill_in() {
        let resolved = ConfigLoader::resolve_config(minimal(), env).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.target.host, DEFAULT_SUBMISSION_HOST);
        assert_eq!(
            resolved.target.remote_path,
            Utf8PathBuf::from("/submit/Production/S1/")
        );
        assert_eq!(resolved.submission_user, DEFAULT_SUBMISSION_USER);
        assert_eq!(resolved.reports_dir, Utf8PathBuf::from("products/reports"));
        assert_eq!(resolved.poll, PollSettings::default());
        assert_eq!(resolved.source_password, "secret");
        assert_eq!(
            PipelineSettings::from(&resolved).submission_file(),
            Utf8PathBuf::from("products/submission.xml")
        );
    }

    #[test]
    fn remote_path_gets_trailing_slash() {
        let mut config = minimal();
        config.submission.remote_path = Some("/submit/Test/S1".to_string());
        let resolved = ConfigLoader::resolve_config(config, env).unwrap();
        assert_eq!(
            resolved.target.remote_path,
            Utf8PathBuf::from("/submit/Test/S1/")
        );
    }

    #[test]
    fn missing_password_is_a_credential_error() {
        let err = ConfigLoader::resolve_config(minimal(), |_| None).unwrap_err();
        assert_matches!(err, SubmitError::MissingCredential(_));
    }

    #[test]
    fn study_id_is_required() {
        let mut config = minimal();
        config.study_id = None;
        let err = ConfigLoader::resolve_config(config, env).unwrap_err();
        assert_matches!(err, SubmitError::ConfigParse(_));
    }
}
