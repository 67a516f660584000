//! Report collaborator. Holds the request parameters a report is built from; rendering
//! is not implemented here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const DEFAULT_FORMAT: &str = "html";
pub const DEFAULT_TEMPLATE_DIR: &str = "/var/www/templates/";

#[derive(Debug, Clone)]
pub struct ReportManager {
    report_id: Option<String>,
    output_format: String,
    template_path: PathBuf,
    config_data: HashMap<String, serde_json::Value>,
}

/// What `/reports` hands back to the caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportDescriptor {
    pub report_id: Option<String>,
    pub format: String,
    pub template_dir: String,
}

impl Default for ReportManager {
    fn default() -> Self { Self::new(None, None) }
}

impl ReportManager {
    pub fn new(report_id: Option<String>, format: Option<String>) -> Self {
        // Blank values from query strings count as absent.
        let report_id = report_id.filter(|s| !s.trim().is_empty());
        let output_format = format
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
        Self {
            report_id,
            output_format,
            template_path: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            config_data: HashMap::new(),
        }
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_path = dir.into();
        self
    }

    pub fn report_id(&self) -> Option<&str> { self.report_id.as_deref() }
    pub fn output_format(&self) -> &str { &self.output_format }
    pub fn template_dir(&self) -> &Path { &self.template_path }
    pub fn config(&self) -> &HashMap<String, serde_json::Value> { &self.config_data }

    pub fn descriptor(&self) -> ReportDescriptor {
        ReportDescriptor {
            report_id: self.report_id.clone(),
            format: self.output_format.clone(),
            template_dir: self.template_path.to_string_lossy().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let r = ReportManager::default();
        assert_eq!(r.report_id(), None);
        assert_eq!(r.output_format(), "html");
        assert_eq!(r.template_dir(), Path::new("/var/www/templates/"));
        assert!(r.config().is_empty());
    }

    #[test]
    fn explicit_values_and_blank_fallbacks() {
        let r = ReportManager::new(Some("equipment-weekly".into()), Some("pdf".into()))
            .with_template_dir("/srv/templates");
        let d = r.descriptor();
        assert_eq!(d.report_id.as_deref(), Some("equipment-weekly"));
        assert_eq!(d.format, "pdf");
        assert_eq!(d.template_dir, "/srv/templates");

        let r = ReportManager::new(Some(" ".into()), Some(String::new()));
        assert_eq!(r.report_id(), None);
        assert_eq!(r.output_format(), "html");
    }
}
