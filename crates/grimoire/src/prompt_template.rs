use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

/// Prompt templates shipped with the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    AgentSystem,
    ProjectBounds,
    ShellPlatform,
    FsMageRole,
    ImageMageRole,
    ShellMageRole,
}

impl Prompt {
    fn template(&self) -> &'static str {
        match self {
            Prompt::AgentSystem => include_str!("prompts/agent_system.md"),
            Prompt::ProjectBounds => include_str!("prompts/project_bounds.md"),
            Prompt::ShellPlatform => include_str!("prompts/shell_platform.md"),
            Prompt::FsMageRole => include_str!("prompts/fs_mage_role.md"),
            Prompt::ImageMageRole => include_str!("prompts/image_mage_role.md"),
            Prompt::ShellMageRole => include_str!("prompts/shell_mage_role.md"),
        }
    }

    pub fn render<T: Serialize>(&self, context_data: &T) -> Result<String, TeraError> {
        load_prompt(self.template(), context_data)
    }
}

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::ProjectBounds;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_load_prompt() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        context.insert("age".to_string(), 30.to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "Hello, Alice! You are 30 years old.");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        let result = load_prompt(template, &context);
        assert!(result.is_err());
    }

    #[test]
    fn test_project_bounds_prompt() {
        let projects = vec![ProjectBounds::new("web", "the website", "/srv/web")];
        let rendered = Prompt::ProjectBounds
            .render(&json!({"projects": projects, "subject": "", "noun": "files"}))
            .unwrap();

        assert!(rendered.starts_with("You have access to the following project directories:"));
        assert!(rendered.contains("- web: the website (use absolute path: /srv/web)"));
        assert!(rendered.contains("when working with files."));
    }

    #[test]
    fn test_agent_system_refinements() {
        let plain = Prompt::AgentSystem
            .render(&json!({"projects": [], "refinements": []}))
            .unwrap();
        assert!(!plain.contains("Further Instructions"));

        let refined = Prompt::AgentSystem
            .render(&json!({"projects": [], "refinements": ["Answer in French", "Be brief"]}))
            .unwrap();
        assert!(refined.contains("# Further Instructions/ Refinements to instructions"));
        assert!(refined.contains("Answer in French\nBe brief"));
    }
}
