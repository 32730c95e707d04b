//! BuildPlan: the resolved, declarative description of all three stages
//!
//! The plan is what `venvpack plan` prints and what the Dockerfile renderer
//! consumes. It is resolved from the configuration and the validated inputs
//! without running anything.

use crate::config::PipelineConfig;
use crate::image::Healthcheck;
use crate::stage::base::BaseEnvironment;
use crate::stage::builder::{installer_upgrade_args, install_args, BuildInputs, CONSTRAINTS_FILE};
use crate::stage::final_stage::ImagePromoter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const PLAN_VERSION: &str = "1.0";

/// Complete build plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub version: String,
    pub metadata: ProjectMetadata,
    pub base: BasePlan,
    pub builder: BuilderPlan,
    #[serde(rename = "final")]
    pub final_stage: FinalPlan,
}

/// What the plan was resolved from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
    /// Direct dependencies declared by the manifest
    pub dependencies: usize,
    /// Packages pinned by the lock file
    pub pinned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BasePlan {
    pub image: String,
    pub python_version: String,
    pub workdir: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BuilderPlan {
    /// Full stage environment, base flags included
    pub env: BTreeMap<String, String>,
    pub steps: Vec<BuildStep>,
}

/// One builder instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildStep {
    /// Run a command (exec form)
    Run { argv: Vec<String> },
    /// Copy project paths into the stage
    Copy { sources: Vec<String>, dest: String },
    /// Write generated content to a file
    WriteFile { path: String, content: String },
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Run { argv } => write!(f, "run {}", argv.join(" ")),
            BuildStep::Copy { sources, dest } => write!(f, "copy {} -> {}", sources.join(" "), dest),
            BuildStep::WriteFile { path, content } => {
                write!(f, "write {} ({} lines)", path, content.lines().count())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FinalPlan {
    pub image: String,
    /// Full stage environment, base flags included
    pub env: BTreeMap<String, String>,
    pub copy: Vec<CopySpec>,
    pub command: Vec<String>,
    pub ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
}

/// Copy from the builder stage into the final stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CopySpec {
    pub from: String,
    pub to: String,
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl BuildPlan {
    /// Resolve the plan for validated `inputs`
    pub fn resolve(config: &PipelineConfig, inputs: &BuildInputs) -> Result<Self> {
        let base = BaseEnvironment::from_config(&config.base);
        let builder_stage = base
            .derive_stage(crate::stage::builder::STAGE_NAME)
            .with_env(config.installer.env());
        let promoter = ImagePromoter::new(config, &base);
        let final_env = promoter.stage();

        let workdir = &config.base.workdir;
        let venv = path_str(&config.build.venv_path);
        let python = config.build.venv_path.join("bin").join("python");
        let python_str = path_str(&python);

        let mut steps = vec![BuildStep::Run {
            argv: vec![
                config.base.interpreter.clone(),
                "-m".to_string(),
                "venv".to_string(),
                venv.clone(),
            ],
        }];
        steps.push(BuildStep::Copy {
            sources: inputs
                .context_files(&config.build)
                .iter()
                .map(|p| path_str(p))
                .collect(),
            dest: format!("{}/", path_str(workdir)),
        });
        for source in &inputs.sources {
            steps.push(BuildStep::Copy {
                sources: vec![path_str(source)],
                dest: path_str(&workdir.join(source)),
            });
        }
        steps.push(BuildStep::Run {
            argv: std::iter::once(python_str.clone())
                .chain(installer_upgrade_args(&config.installer))
                .collect(),
        });
        let constraints = path_str(&workdir.join(CONSTRAINTS_FILE));
        steps.push(BuildStep::WriteFile {
            path: constraints.clone(),
            content: inputs.lock.to_constraints(),
        });
        steps.push(BuildStep::Run {
            argv: std::iter::once(python_str)
                .chain(install_args(&constraints, "."))
                .collect(),
        });

        let runtime = &config.runtime;
        Ok(Self {
            version: PLAN_VERSION.to_string(),
            metadata: ProjectMetadata {
                name: inputs.manifest.name.clone(),
                version: inputs.manifest.version.clone(),
                requires_python: inputs.manifest.requires_python.as_ref().map(|c| c.to_string()),
                dependencies: inputs.manifest.dependencies.len(),
                pinned: inputs.lock.packages.len(),
                lock_hash: inputs.lock.content_hash.clone(),
            },
            base: BasePlan {
                image: base.image.clone(),
                python_version: base.python_version.clone(),
                workdir: path_str(workdir),
                env: base.env(),
            },
            builder: BuilderPlan {
                env: builder_stage.env,
                steps,
            },
            final_stage: FinalPlan {
                image: final_env.base_image.clone(),
                env: final_env.env.clone(),
                copy: vec![CopySpec {
                    from: venv.clone(),
                    to: venv,
                }],
                command: promoter
                    .startup_command()
                    .context("Failed to resolve startup command")?,
                ports: vec![runtime.port],
                healthcheck: runtime
                    .healthcheck_path
                    .as_deref()
                    .map(|path| Healthcheck::http(&python, runtime.port, path)),
            },
        })
    }

    /// Serialize the plan to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize BuildPlan to YAML")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize BuildPlan to JSON")
    }

    /// Validate the plan structure
    ///
    /// Checks:
    /// - Version and base image are set
    /// - The builder has steps and the final stage a command
    /// - The final stage copies exactly one path from the builder: the environment
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            anyhow::bail!("Version cannot be empty");
        }
        if self.base.image.is_empty() {
            anyhow::bail!("Base image cannot be empty");
        }
        if self.builder.steps.is_empty() {
            anyhow::bail!("Builder steps cannot be empty");
        }
        for (i, step) in self.builder.steps.iter().enumerate() {
            match step {
                BuildStep::Run { argv } if argv.is_empty() => {
                    anyhow::bail!("Builder step[{}] has an empty command", i)
                }
                BuildStep::Copy { sources, dest } if sources.is_empty() || dest.is_empty() => {
                    anyhow::bail!("Builder step[{}] copy needs sources and a destination", i)
                }
                _ => {}
            }
        }
        if self.final_stage.copy.len() != 1 {
            anyhow::bail!(
                "Final stage must copy exactly the environment, got {} copy specs",
                self.final_stage.copy.len()
            );
        }
        for (i, copy_spec) in self.final_stage.copy.iter().enumerate() {
            if copy_spec.from.is_empty() {
                anyhow::bail!("Final copy[{}] 'from' path cannot be empty", i);
            }
            if copy_spec.to.is_empty() {
                anyhow::bail!("Final copy[{}] 'to' path cannot be empty", i);
            }
        }
        if self.final_stage.command.is_empty() {
            anyhow::bail!("Final command cannot be empty");
        }
        if self.final_stage.ports.is_empty() {
            anyhow::bail!("Final stage must expose the server port");
        }
        Ok(())
    }
}

fn env_lines(f: &mut fmt::Formatter<'_>, env: &BTreeMap<String, String>) -> fmt::Result {
    for (key, value) in env {
        writeln!(f, "    {}={}", key, value)?;
    }
    Ok(())
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "venvpack Build Plan")?;
        writeln!(f, "===================")?;
        match self.metadata.version {
            Some(ref version) => writeln!(f, "Project: {} {}", self.metadata.name, version)?,
            None => writeln!(f, "Project: {}", self.metadata.name)?,
        }
        if let Some(ref requires) = self.metadata.requires_python {
            writeln!(f, "Requires Python: {}", requires)?;
        }
        writeln!(
            f,
            "Dependencies: {} declared, {} pinned",
            self.metadata.dependencies, self.metadata.pinned
        )?;
        writeln!(f)?;

        writeln!(f, "Base Stage:")?;
        writeln!(f, "  Image:   {}", self.base.image)?;
        writeln!(f, "  Workdir: {}", self.base.workdir)?;
        writeln!(f, "  Env:")?;
        env_lines(f, &self.base.env)?;
        writeln!(f)?;

        writeln!(f, "Builder Stage:")?;
        writeln!(f, "  Steps:")?;
        for step in &self.builder.steps {
            writeln!(f, "    - {}", step)?;
        }
        writeln!(f)?;

        writeln!(f, "Final Stage:")?;
        for copy in &self.final_stage.copy {
            writeln!(f, "  Copy:    {} (from builder) -> {}", copy.from, copy.to)?;
        }
        writeln!(f, "  Command: {}", self.final_stage.command.join(" "))?;
        writeln!(
            f,
            "  Ports:   {}",
            self.final_stage
                .ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )?;
        if let Some(ref healthcheck) = self.final_stage.healthcheck {
            writeln!(f, "  Healthcheck: GET {}", healthcheck.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
[tool.poetry]
name = "crawler-server"
version = "0.1.0"
readme = "README.md"
packages = [{ include = "crawler_server" }]

[tool.poetry.dependencies]
python = "^3.10"
uvicorn = "^0.17.6"
"#;

    const LOCK: &str = r#"
[[package]]
name = "uvicorn"
version = "0.17.6"

[[package]]
name = "h11"
version = "0.13.0"

[metadata]
content-hash = "abc123"
"#;

    fn plan() -> BuildPlan {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("pyproject.toml"), MANIFEST).unwrap();
        fs::write(temp.path().join("poetry.lock"), LOCK).unwrap();
        fs::write(temp.path().join("README.md"), "# crawler").unwrap();
        fs::create_dir_all(temp.path().join("crawler_server")).unwrap();
        let config = PipelineConfig::default();
        let inputs = BuildInputs::load(&config, temp.path()).unwrap();
        BuildPlan::resolve(&config, &inputs).unwrap()
    }

    #[test]
    fn test_resolve_plan() {
        let plan = plan();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.metadata.name, "crawler-server");
        assert_eq!(plan.metadata.pinned, 2);
        assert_eq!(plan.metadata.lock_hash.as_deref(), Some("abc123"));
        assert_eq!(plan.base.image, "python:3.10-slim-bullseye");
        assert_eq!(plan.base.env.len(), 3);
        assert_eq!(plan.builder.env["PIP_DEFAULT_TIMEOUT"], "100");
        assert!(!plan.final_stage.env.contains_key("PIP_NO_CACHE_DIR"));
        assert_eq!(
            plan.final_stage.copy,
            vec![CopySpec {
                from: "/venv".to_string(),
                to: "/venv".to_string()
            }]
        );
        assert_eq!(plan.final_stage.command[0], "/venv/bin/python");
        assert_eq!(plan.final_stage.ports, vec![8080]);
    }

    #[test]
    fn test_builder_steps() {
        let plan = plan();
        let steps = &plan.builder.steps;
        assert_eq!(steps.len(), 6);
        assert_eq!(
            steps[0],
            BuildStep::Run {
                argv: vec!["python3".into(), "-m".into(), "venv".into(), "/venv".into()]
            }
        );
        assert_eq!(
            steps[1],
            BuildStep::Copy {
                sources: vec!["pyproject.toml".into(), "poetry.lock".into(), "README.md".into()],
                dest: "/app/".into()
            }
        );
        assert_eq!(
            steps[2],
            BuildStep::Copy {
                sources: vec!["crawler_server".into()],
                dest: "/app/crawler_server".into()
            }
        );
        match &steps[4] {
            BuildStep::WriteFile { path, content } => {
                assert_eq!(path, "/app/constraints.txt");
                assert_eq!(content, "h11==0.13.0\nuvicorn==0.17.6\n");
            }
            other => panic!("unexpected step {other:?}"),
        }
        match &steps[5] {
            BuildStep::Run { argv } => assert_eq!(
                argv,
                &vec![
                    "/venv/bin/python",
                    "-m",
                    "pip",
                    "install",
                    "--constraint",
                    "/app/constraints.txt",
                    "."
                ]
            ),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_extra_copies() {
        let mut plan = plan();
        plan.final_stage.copy.push(CopySpec {
            from: "/app".to_string(),
            to: "/app".to_string(),
        });
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut plan = plan();
        plan.final_stage.command.clear();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_yaml_and_json() {
        let plan = plan();
        let yaml = plan.to_yaml().unwrap();
        assert!(yaml.contains("final:"));
        assert!(yaml.contains("kind: write_file"));
        let back: BuildPlan = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, plan);

        let json = plan.to_json().unwrap();
        assert!(json.contains("\"PYTHONHASHSEED\": \"random\""));
    }

    #[test]
    fn test_display() {
        let display = plan().to_string();
        assert!(display.contains("venvpack Build Plan"));
        assert!(display.contains("Project: crawler-server 0.1.0"));
        assert!(display.contains("Dependencies: 1 declared, 2 pinned"));
        assert!(display.contains("PYTHONFAULTHANDLER=1"));
        assert!(display.contains("write /app/constraints.txt (2 lines)"));
        assert!(display.contains("Copy:    /venv (from builder) -> /venv"));
        assert!(display.contains("Healthcheck: GET /"));
    }
}
