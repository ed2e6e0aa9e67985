//! A file-backed [`TemplateRenderer`]. The templating engine itself is out of
//! scope for the core engine; this loads a Markdown prompt file per template
//! name and appends the call's variables and temporal context as JSON.

use std::path::PathBuf;

use async_trait::async_trait;
use recon_core::prompt::{TemplateRenderer, TemporalContext};
use serde_json::Value;

/// Renders templates by reading `{dir}/{template_name}.md` and appending the
/// variables as a JSON block.
#[derive(Debug, Clone)]
pub struct FileTemplateRenderer {
    dir: PathBuf,
}

impl FileTemplateRenderer {
    /// Creates a renderer that looks up templates under `dir`.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl TemplateRenderer for FileTemplateRenderer {
    async fn render(&self, template_name: &str, variables: &Value, temporal: &TemporalContext) -> anyhow::Result<String> {
        let path = self.dir.join(format!("{template_name}.md"));
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read template '{}': {e}", path.display()))?;
        Ok(format!(
            "{body}\n\n## Current date\n{}\n\n## Variables\n```json\n{}\n```\n",
            temporal.current_date,
            serde_json::to_string_pretty(variables)?
        ))
    }
}
