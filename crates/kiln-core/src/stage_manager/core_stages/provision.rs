use async_trait::async_trait;

use crate::command::CommandSpec;
use crate::install::VersionMarker;
use crate::kernel::constants::APP_VERSION;
use crate::stage_manager::core_stages::markers;
use crate::stage_manager::{Readiness, Stage, StageContext, StageError, StageKind};

/// Host preparation: working directories and system packages
#[derive(Debug, Default, Clone, Copy)]
pub struct ProvisionStage;

impl ProvisionStage {
    fn missing_tools(context: &StageContext) -> Vec<String> {
        context
            .config()
            .host_tools
            .iter()
            .filter(|tool| context.probe(tool).is_none())
            .cloned()
            .collect()
    }

    fn package_command(context: &StageContext, args: &[&str]) -> CommandSpec {
        let config = context.config();
        let spec = if config.use_sudo {
            CommandSpec::new("sudo").arg(config.package_manager.as_str())
        } else {
            CommandSpec::new(config.package_manager.as_str())
        };
        spec.args(args.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
            .timeout(config.timeouts.command)
            .label(format!("{} {}", config.package_manager, args.first().copied().unwrap_or_default()))
    }

    /// Whether a previous run already provisioned this workspace
    pub fn already_provisioned(context: &StageContext) -> bool {
        VersionMarker::load(&context.config().workspace, markers::PROVISION).is_some()
    }
}

#[async_trait]
impl Stage for ProvisionStage {
    fn kind(&self) -> StageKind {
        StageKind::Provision
    }

    fn description(&self) -> &str {
        "Prepare the host: working directories and required system packages"
    }

    async fn check(&self, context: &StageContext) -> Result<Readiness, StageError> {
        if !Self::already_provisioned(context) {
            return Ok(Readiness::Pending);
        }
        let missing = Self::missing_tools(context);
        if missing.is_empty() {
            Ok(Readiness::Satisfied("host already provisioned".to_string()))
        } else {
            log::info!("Provisioned before, but missing on PATH: {}", missing.join(", "));
            Ok(Readiness::Pending)
        }
    }

    async fn execute(&self, context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        for dir in [&config.workspace, &config.cache_dir, &config.state_dir()] {
            std::fs::create_dir_all(dir).map_err(StageError::io(dir))?;
        }

        if !config.system_packages.is_empty() {
            context.run_checked(&Self::package_command(context, &["update"])).await?;
            let mut install = vec!["install", "-y"];
            install.extend(config.system_packages.iter().map(String::as_str));
            context.run_checked(&Self::package_command(context, &install)).await?;
        }

        if let Some(tool) = Self::missing_tools(context).into_iter().next() {
            return Err(StageError::HostToolMissing { tool });
        }

        VersionMarker::new(markers::PROVISION, APP_VERSION)
            .with_reference(config.package_manager.as_str())
            .write(&config.workspace)?;
        Ok(())
    }

    fn dry_run_description(&self, context: &StageContext) -> String {
        let config = context.config();
        format!(
            "Would create {} and install {} package(s) with {}",
            config.workspace.display(),
            config.system_packages.len(),
            config.package_manager
        )
    }
}
