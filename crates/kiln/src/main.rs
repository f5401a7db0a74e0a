mod cli;
mod logging;

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kiln_core::archive::nightly;
use kiln_core::kernel::constants::DEFAULT_CONFIG_FILE;
use kiln_core::kernel::exit_code;
use kiln_core::stage_manager::core_stages::{
    BuildArtifactStage, BuildMode, BuildOptions, InstallRuntimeStage, PackageOptions, PackageStage, ProvisionStage,
    RuntimeMode, RuntimeOptions, ValidateOptions, ValidateStage,
};
use kiln_core::stage_manager::{StageError, StageOptions, default_stages};
use kiln_core::{
    ArchiveProvisioner, CancelSignal, CommandRunner, ConfigFile, ConfigSnapshot, ExecutionMode, InstallationRecord,
    KernelError, PartialConfig, PipelineResult, Readiness, ReqwestClient, Stage, StageContext, StageExecutor,
    StagePipeline, StageResult, resolve,
};
use log::{error, warn};

use crate::cli::{CliArgs, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    logging::init(args.verbose, args.quiet);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: CliArgs) -> Result<u8, KernelError> {
    let config = Arc::new(load_config(&args)?);

    if let Commands::ListNightly { platform, target, count, quiet } = &args.command {
        let client = ReqwestClient::new(config.timeouts.download).map_err(|e| KernelError::Other(e.to_string()))?;
        let platform = platform.as_deref().unwrap_or(&config.platform);
        let target = target.as_deref().unwrap_or(&config.gpu_target);
        for candidate in nightly::list(&client, platform, target, *count).await? {
            if *quiet {
                println!("{}", candidate.url);
            } else {
                println!("{:<16} {}", candidate.version, candidate.url);
            }
        }
        return Ok(exit_code::SUCCESS);
    }

    let cancel = CancelSignal::new();
    watch_signals(cancel.clone());

    let client = ReqwestClient::new(config.timeouts.download).map_err(|e| KernelError::Other(e.to_string()))?;
    let dry_run = matches!(args.command, Commands::Run { dry_run: true, .. });
    let context = StageContext::new(
        config.clone(),
        CommandRunner::new(cancel.clone()),
        ArchiveProvisioner::new(Arc::new(client), cancel.clone()),
    )
    .with_search_path(std::env::var("PATH").ok())
    .with_mode(if dry_run { ExecutionMode::DryRun } else { ExecutionMode::Live });

    let code = match args.command {
        Commands::Provision { .. } => provision(&context).await?,
        Commands::InstallRuntime { url, verify_only, configure_only, .. } => {
            let mode = if verify_only {
                RuntimeMode::VerifyOnly
            } else if configure_only {
                RuntimeMode::ConfigureOnly
            } else {
                RuntimeMode::Full
            };
            single(&InstallRuntimeStage::new(RuntimeOptions { url, mode }), &context).await
        }
        Commands::BuildArtifact { install_toolchain, build_only, install, clean, .. } => {
            let mode = match (build_only, install, clean) {
                (true, _, _) => BuildMode::BuildOnly,
                (_, true, _) => BuildMode::InstallOnly,
                (_, _, true) => BuildMode::Clean,
                _ => BuildMode::Full,
            };
            single(&BuildArtifactStage::new(BuildOptions { mode, install_toolchain }, None), &context).await
        }
        Commands::Validate { binary, model } => {
            single(&ValidateStage::new(ValidateOptions { binary, model }), &context).await
        }
        Commands::Package { restore, no_archive } => {
            single(&PackageStage::new(PackageOptions { restore, no_archive }), &context).await
        }
        Commands::Run { from, .. } => {
            let stages = default_stages(&StageOptions::default());
            let result = StagePipeline::run(&context, &stages, from).await;
            report(&result);
            result.exit_code()
        }
        Commands::Status => {
            status(&context).await;
            exit_code::SUCCESS
        }
        Commands::ListNightly { .. } => exit_code::SUCCESS,
    };

    if cancel.is_cancelled() && code != exit_code::SUCCESS {
        return Ok(exit_code::INTERRUPTED);
    }
    Ok(code)
}

fn load_config(args: &CliArgs) -> Result<ConfigSnapshot, KernelError> {
    let base_dir = std::env::current_dir().map_err(|e| KernelError::Other(format!("no working directory: {}", e)))?;
    let environment: HashMap<String, String> = std::env::vars().collect();
    let default_file = base_dir.join(DEFAULT_CONFIG_FILE);
    let config_file = match &args.config {
        Some(path) => ConfigFile::Explicit(path),
        None => ConfigFile::Default(&default_file),
    };
    let cli = PartialConfig {
        install_root: args.install_root.clone(),
        workspace: args.workspace.clone(),
        gpu_target: args.gpu_target.clone(),
        non_interactive: args.non_interactive.then_some(true),
        force: args.command.force().then_some(true),
        ..PartialConfig::default()
    };
    Ok(resolve(PartialConfig::builtin(&base_dir), config_file, &environment, cli, &base_dir)?)
}

/// Fire `cancel` on Ctrl-C or SIGTERM
fn watch_signals(cancel: CancelSignal) {
    tokio::spawn(async move {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        warn!("Interrupted, stopping the running command and restoring backups");
        cancel.cancel();
    });
}

/// Re-provisioning an already provisioned host asks first when interactive
async fn provision(context: &StageContext) -> Result<u8, KernelError> {
    let config = context.config();
    if ProvisionStage::already_provisioned(context) && !config.non_interactive && !config.force {
        if !confirm(&format!("{} is already provisioned. Provision again?", config.workspace.display())) {
            return Err(StageError::ProvisionDeclined.into());
        }
        let result = StageExecutor::execute_with(&ProvisionStage, context, true).await;
        print_result(&result);
        return Ok(result.exit_code());
    }
    Ok(single(&ProvisionStage, context).await)
}

fn confirm(question: &str) -> bool {
    print!("{} [y/N] ", question);
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

async fn single(stage: &dyn Stage, context: &StageContext) -> u8 {
    let result = StageExecutor::execute(stage, context).await;
    print_result(&result);
    result.exit_code()
}

fn print_result(result: &StageResult) {
    println!("{}", result);
    if result.failed() {
        print_failure(result);
    }
}

fn print_failure(result: &StageResult) {
    let Some(error) = &result.error else { return };
    eprintln!("{} failed: {}", result.stage, error);
    if let Some(diagnostics) = error.diagnostics() {
        eprintln!("{}", diagnostics);
    }
}

fn report(result: &PipelineResult) {
    println!("Run {}:", result.status);
    for stage in &result.results {
        println!("  {}", stage);
    }
    for failure in result.optional_failures() {
        warn!("Optional stage {} failed: {:?}", failure.stage, failure.error.as_ref().map(|e| e.to_string()));
    }
    if let Some(failure) = result.first_failure() {
        print_failure(failure);
    }
}

async fn status(context: &StageContext) {
    let config = context.config();
    let stages = default_stages(&StageOptions::default());
    println!("Installation root: {}", config.install_root.display());
    println!("Workspace:         {}", config.workspace.display());
    println!("GPU target:        {}", config.gpu_target);

    for (_, name, readiness) in StagePipeline::inspect(context, &stages).await {
        let state = match readiness {
            Ok(Readiness::Pending) => "pending".to_string(),
            Ok(Readiness::Satisfied(reason)) => format!("done ({})", reason),
            Ok(Readiness::NotApplicable(reason)) => format!("n/a ({})", reason),
            Err(e) => format!("blocked ({})", e),
        };
        println!("  {:<16} {}", name, state);
    }

    for path in [&config.install_root, &config.artifact_dir] {
        let record = InstallationRecord::new(path);
        let stale = if record.has_stale_backup() { ", stale backup present" } else { "" };
        println!("{}: {}{}", path.display(), record.state(), stale);
    }
}
