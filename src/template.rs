use std::collections::HashMap;

/// Boundary to an external prompt-template store. The orchestrator treats
/// it as optional: a missing template or a render failure falls back to
/// the task's raw prompt with a warning, never a hard failure.
pub trait TemplateSource: Send + Sync {
    /// Render `name` with `vars` substituted. None when the template does
    /// not exist or cannot be rendered.
    fn render(&self, name: &str, vars: &HashMap<String, String>) -> Option<String>;
}

/// In-memory template store with `{var}` substitution. Sufficient for
/// embedding applications that wire templates at startup; anything richer
/// lives behind the same trait.
#[derive(Debug, Default)]
pub struct StaticTemplates {
    templates: HashMap<String, String>,
}

impl StaticTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(name.into(), body.into());
    }
}

impl TemplateSource for StaticTemplates {
    fn render(&self, name: &str, vars: &HashMap<String, String>) -> Option<String> {
        let body = self.templates.get(name)?;
        let mut rendered = body.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        Some(rendered)
    }
}
