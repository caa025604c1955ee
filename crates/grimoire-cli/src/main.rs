use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use grimoire::bounds::ProjectBounds;
use grimoire::{Agent, AgentConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod configuration;
mod error;
mod session;

use configuration::{Overrides, Settings};
use session::TerminalObserver;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// API key (can also be set via GRIMOIRE_PROVIDER__API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Chat-completion API base URL, xAI unless set
    #[arg(long)]
    base_url: Option<String>,

    /// Model for the agent and its text mages
    #[arg(short, long)]
    model: Option<String>,

    /// Vision model for the image mage, defaults to --model
    #[arg(long)]
    image_model: Option<String>,

    /// Directory the agent may work in, repeatable. Defaults to the current directory.
    #[arg(short, long = "project", value_name = "DIR")]
    projects: Vec<PathBuf>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Extra instruction for the agent's system prompt, repeatable
    #[arg(long = "refine", value_name = "TEXT")]
    refinements: Vec<String>,

    /// TOML settings file, read before the environment
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config_file: self.config.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            image_model: self.image_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Resolve project directories to absolute bounds, falling back to the working directory
fn project_bounds(paths: &[PathBuf]) -> Result<Vec<ProjectBounds>> {
    if paths.is_empty() {
        let cwd = std::env::current_dir().context("failed to get working directory")?;
        return Ok(vec![ProjectBounds::new(
            "workspace",
            "Current working directory",
            cwd,
        )]);
    }

    paths
        .iter()
        .map(|path| {
            let abs_path = path
                .canonicalize()
                .with_context(|| format!("project directory '{}' is not accessible", path.display()))?;
            let name = abs_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "root".to_string());
            Ok(ProjectBounds::new(name, "Project directory", abs_path))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::new(&cli.overrides())?;
    let bounds = project_bounds(&cli.projects)?;

    let model = settings.provider.model();
    let config = AgentConfig {
        model: model.clone(),
        image_model: settings.provider.image_model.clone(),
        project_bounds: bounds.clone(),
        temperature: settings.provider.temperature,
        max_tokens: settings.provider.max_tokens,
        max_tool_rounds: settings.agent.max_tool_rounds,
        prompt_refinements: cli.refinements.clone(),
    };

    let (observer, turns) = TerminalObserver::new();
    let agent = Agent::new(
        settings.provider.client_config(),
        config,
        Some(Arc::new(observer)),
    )
    .context("failed to create agent")?;

    let root = CancellationToken::new();
    agent.start(&root)?;

    let projects: Vec<String> = bounds
        .iter()
        .map(|b| b.abs_path.display().to_string())
        .collect();
    session::print_banner(&model, &projects);

    let result = session::run(&agent, turns).await;
    agent.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "grimoire",
            "--api-key",
            "k",
            "-m",
            "grok-4",
            "--project",
            "/tmp/a",
            "-p",
            "/tmp/b",
            "--refine",
            "be brief",
            "--temperature",
            "0.3",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.api_key.as_deref(), Some("k"));
        assert_eq!(overrides.model.as_deref(), Some("grok-4"));
        assert_eq!(overrides.temperature, Some(0.3));
        assert_eq!(cli.projects.len(), 2);
        assert_eq!(cli.refinements, vec!["be brief".to_string()]);
    }

    #[test]
    fn test_project_bounds_default_to_working_directory() {
        let bounds = project_bounds(&[]).unwrap();
        assert_eq!(bounds.len(), 1);
        assert_eq!(bounds[0].name, "workspace");
        assert_eq!(bounds[0].abs_path, std::env::current_dir().unwrap());
    }

    #[test]
    fn test_project_bounds_are_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("app");
        std::fs::create_dir(&nested).unwrap();

        let bounds = project_bounds(&[nested.join("..").join("app")]).unwrap();
        assert_eq!(bounds[0].name, "app");
        assert_eq!(bounds[0].abs_path, nested.canonicalize().unwrap());

        assert!(project_bounds(&[dir.path().join("missing")]).is_err());
    }
}
