use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use sra_submit::app::{App, PipelineSettings};
use sra_submit::config::{ConfigLoader, ResolvedConfig};
use sra_submit::document::JsonDocumentBuilder;
use sra_submit::domain::Namespace;
use sra_submit::error::SubmitError;
use sra_submit::output::JsonOutput;
use sra_submit::records::RecordSet;
use sra_submit::remote::SftpSession;
use sra_submit::report::LoggingConsumer;
use sra_submit::transfer::{Credential, SystemTransferClient};

#[derive(Parser)]
#[command(name = "sra-submit")]
#[command(about = "Resumable transfer of sequencing archives into an SRA submission area")]
#[command(version, author)]
struct Cli {
    /// Path to the JSON config (default: ./sra-submit.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Transfer every unit, submit and wait for the processing report")]
    Run,
    #[command(about = "List the tasks a run would execute, with their deps and targets")]
    Plan,
    #[command(about = "Report which units are already transferred")]
    Check {
        /// Only report units of this namespace
        #[arg(long)]
        namespace: Option<Namespace>,
    },
}

type SystemApp = App<SystemTransferClient, SftpSession, JsonDocumentBuilder, LoggingConsumer>;

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SubmitError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SubmitError) -> u8 {
    match error {
        SubmitError::MissingConfig
        | SubmitError::ConfigRead(_)
        | SubmitError::ConfigParse(_)
        | SubmitError::MissingCredential(_)
        | SubmitError::InvalidNamespace(_)
        | SubmitError::InvalidSourceUrl(_)
        | SubmitError::MissingSource(_)
        | SubmitError::ConflictingUnits { .. }
        | SubmitError::Records(_) => 2,
        SubmitError::MissingTool(_)
        | SubmitError::TransferFailed(_)
        | SubmitError::HttpStatus { .. }
        | SubmitError::RemoteListing(_) => 3,
        SubmitError::ReportTimeout(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let records = RecordSet::load(&config.records_path)?;
    let app = build_app(&config)?;

    match cli.command {
        Commands::Run => {
            let mut result = app.run(records)?;
            JsonOutput::print_run(&result).into_diagnostic()?;
            match result.report.take_error() {
                Some(err) => Err(err.into()),
                None => Ok(()),
            }
        }
        Commands::Plan => {
            let result = app.plan(records)?;
            JsonOutput::print_plan(&result).into_diagnostic()?;
            Ok(())
        }
        Commands::Check { namespace } => {
            let mut result = app.check(&records)?;
            if let Some(namespace) = namespace {
                result.units.retain(|unit| unit.namespace == namespace);
            }
            JsonOutput::print_check(&result).into_diagnostic()?;
            Ok(())
        }
    }
}

fn build_app(config: &ResolvedConfig) -> Result<SystemApp, SubmitError> {
    let source = SystemTransferClient::new(
        config.source_user.clone(),
        Credential::Password(config.source_password.clone()),
    )?;
    let submission = SystemTransferClient::new(
        config.submission_user.clone(),
        Credential::KeyFile(config.keyfile.clone()),
    )?;
    let session = SftpSession::new(
        config.submission_user.clone(),
        config.target.host.clone(),
        config.keyfile.clone(),
    );
    Ok(App::new(
        source,
        submission,
        session,
        JsonDocumentBuilder,
        LoggingConsumer,
        PipelineSettings::from(config),
    ))
}
