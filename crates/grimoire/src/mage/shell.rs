use serde_json::json;

use super::engine::{MageProfile, ResultStrategy};
use super::portal::PortalSettings;
use crate::errors::MageResult;
use crate::kit::Kit;
use crate::prompt_template::Prompt;
use crate::toolkits::shell::{shell_kit, Platform};

/// Runs shell commands; each execution reports only its own command output
pub struct ShellProfile;

impl MageProfile for ShellProfile {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn preamble(&self, settings: &PortalSettings) -> MageResult<Vec<String>> {
        let platform = Platform::detect();
        let project_dir = settings
            .project_bounds
            .first()
            .map(|b| b.abs_path.display().to_string())
            .unwrap_or_else(|| "none".to_string());

        let advisory = Prompt::ShellPlatform.render(&json!({
            "os": platform.os,
            "arch": platform.arch,
            "shell": platform.shell,
            "project_dir": project_dir,
        }))?;
        Ok(vec![advisory])
    }

    fn build_kit(&self, settings: &PortalSettings) -> MageResult<Kit> {
        shell_kit(&settings.project_bounds)
    }

    fn result_strategy(&self) -> ResultStrategy {
        ResultStrategy::CommandOutput
    }

    fn clears_result_each_execution(&self) -> bool {
        true
    }
}
