//! Default-value templating
//!
//! Non-secret defaults and override values may name the environment, the
//! service, and the project:
//!
//! ```yaml
//! PUBLIC_URL: { default: "https://{{ service }}.{{ environment }}.example.com" }
//! ```
//!
//! Rendering is strict: an unknown name is an error, never an empty string.

use minijinja::{context, Environment, UndefinedBehavior};

/// Values a default template may reference
#[derive(Clone, Copy, Debug)]
pub struct TemplateContext<'a> {
    /// Environment label
    pub environment: &'a str,
    /// Service the variable belongs to
    pub service: &'a str,
    /// Project name
    pub project: &'a str,
}

/// minijinja environment configured for default values
pub struct DefaultTemplates {
    env: Environment<'static>,
}

impl Default for DefaultTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultTemplates {
    /// Create an engine with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render `template`, returning it unchanged when it has no template syntax
    pub fn render(&self, template: &str, ctx: &TemplateContext<'_>) -> Result<String, String> {
        if !has_template_syntax(template) {
            return Ok(template.to_string());
        }
        self.env
            .render_str(
                template,
                context! {
                    environment => ctx.environment,
                    service => ctx.service,
                    project => ctx.project,
                },
            )
            .map_err(|e| e.to_string())
    }
}

/// Whether a string contains minijinja syntax
pub fn has_template_syntax(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}
