//! Output formatting for multiple formats
//!
//! Plans, image summaries, inspections and check reports can each be printed
//! as JSON, YAML or human-readable text. Only a plan can be rendered as a
//! Dockerfile.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write;

use crate::image::{ImageInspection, RuntimeImage};
use crate::output::{render_dockerfile, BuildPlan};

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
    /// Multi-stage Dockerfile (plans only)
    Dockerfile,
}

/// Result of `venvpack check`
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub project: String,
    pub manifest: String,
    pub lockfile: String,
    pub dependencies: usize,
    pub pinned: usize,
    pub consistent: bool,
    pub problems: Vec<String>,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_plan(&self, plan: &BuildPlan) -> Result<String> {
        match self.format {
            OutputFormat::Json => plan.to_json(),
            OutputFormat::Yaml => plan.to_yaml(),
            OutputFormat::Human => Ok(plan.to_string()),
            OutputFormat::Dockerfile => Ok(render_dockerfile(plan)),
        }
    }

    /// Summary printed after a successful build
    pub fn format_image(&self, image: &RuntimeImage) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&image.config)
                .context("Failed to serialize image config to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(&image.config)
                .context("Failed to serialize image config to YAML"),
            OutputFormat::Human => Ok(self.format_image_human(image)),
            OutputFormat::Dockerfile => unsupported("build"),
        }
    }

    pub fn format_inspection(&self, inspection: &ImageInspection) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(inspection)
                .context("Failed to serialize inspection to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(inspection).context("Failed to serialize inspection to YAML")
            }
            OutputFormat::Human => Ok(inspection.to_string()),
            OutputFormat::Dockerfile => unsupported("inspect"),
        }
    }

    pub fn format_check(&self, report: &CheckReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize check report to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(report).context("Failed to serialize check report to YAML")
            }
            OutputFormat::Human => Ok(self.format_check_human(report)),
            OutputFormat::Dockerfile => unsupported("check"),
        }
    }

    fn format_image_human(&self, image: &RuntimeImage) -> String {
        let config = &image.config;
        let mut out = String::new();
        let _ = writeln!(out, "Runtime image written to {}", image.root.display());
        if let Some(digest) = config.digest() {
            let _ = writeln!(out, "  Digest:   {}", digest);
        }
        let _ = writeln!(out, "  Packages: {}", config.packages.len());
        let _ = writeln!(out, "  Command:  {}", config.cmd.join(" "));
        let _ = writeln!(
            out,
            "  Ports:    {}",
            config
                .exposed_ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        out
    }

    fn format_check_human(&self, report: &CheckReport) -> String {
        let mut out = String::new();
        if report.consistent {
            let _ = writeln!(
                out,
                "✓ {} satisfies {} ({} dependencies, {} pinned packages)",
                report.lockfile, report.manifest, report.dependencies, report.pinned
            );
        } else {
            let _ = writeln!(
                out,
                "✗ {} does not satisfy {}:",
                report.lockfile, report.manifest
            );
            for problem in &report.problems {
                let _ = writeln!(out, "  - {}", problem);
            }
        }
        out
    }
}

fn unsupported(command: &str) -> Result<String> {
    anyhow::bail!(
        "Dockerfile output is only available for 'plan', not '{}'",
        command
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(consistent: bool) -> CheckReport {
        CheckReport {
            project: "crawler-server".to_string(),
            manifest: "pyproject.toml".to_string(),
            lockfile: "poetry.lock".to_string(),
            dependencies: 1,
            pinned: 5,
            consistent,
            problems: if consistent {
                vec![]
            } else {
                vec!["uvicorn is not locked".to_string()]
            },
        }
    }

    #[test]
    fn test_check_human() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let ok = formatter.format_check(&report(true)).unwrap();
        assert!(ok.contains("✓ poetry.lock satisfies pyproject.toml"));

        let bad = formatter.format_check(&report(false)).unwrap();
        assert!(bad.contains("✗ poetry.lock does not satisfy pyproject.toml"));
        assert!(bad.contains("  - uvicorn is not locked"));
    }

    #[test]
    fn test_check_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let json = formatter.format_check(&report(true)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["consistent"], true);
        assert_eq!(value["pinned"], 5);
    }

    #[test]
    fn test_dockerfile_only_for_plans() {
        let formatter = OutputFormatter::new(OutputFormat::Dockerfile);
        assert!(formatter.format_check(&report(true)).is_err());
    }
}
