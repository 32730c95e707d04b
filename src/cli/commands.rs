use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Two-stage virtual environment builder for ASGI applications
#[derive(Parser, Debug)]
#[command(
    name = "venvpack",
    about = "Two-stage virtual environment builder for ASGI applications",
    version,
    author,
    long_about = "venvpack installs a project's locked dependencies into an isolated virtual \
                  environment, promotes only that environment into a minimal runtime image, \
                  and starts the application server from it."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(
        short = 'v',
        long,
        global = true,
        help = "Increase verbosity (can be used multiple times)"
    )]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build the environment and promote it into a runtime image",
        long_about = "Runs the base, builder and final stages. The builder creates a virtual \
                      environment in a scratch directory and installs the locked dependencies; \
                      the final stage copies only that environment into the output image.\n\n\
                      Examples:\n  \
                      venvpack build\n  \
                      venvpack build /path/to/project -o /tmp/image\n  \
                      venvpack build --python-version 3.10 --interpreter python3.10"
    )]
    Build(BuildArgs),

    #[command(
        about = "Show the resolved build plan",
        long_about = "Resolves all three stages without running anything.\n\n\
                      Examples:\n  \
                      venvpack plan\n  \
                      venvpack plan --format yaml\n  \
                      venvpack plan --format dockerfile -o Dockerfile"
    )]
    Plan(PlanArgs),

    #[command(about = "Check that the lock file satisfies the manifest")]
    Check(CheckArgs),

    #[command(
        about = "Start the server from a runtime image",
        long_about = "Checks that the application imports, then runs the server in the \
                      foreground and exits with its exit status.\n\n\
                      Examples:\n  \
                      venvpack run dist/image\n  \
                      venvpack run dist/image --preflight-only"
    )]
    Run(RunArgs),

    #[command(about = "Describe a runtime image and verify its contents")]
    Inspect(InspectArgs),

    #[command(about = "Write a runtime image as a reproducible tar.gz")]
    Export(ExportArgs),

    #[command(about = "Send one health request to a running server")]
    Probe(ProbeArgs),
}

/// Settings that override the configuration file and environment
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    #[arg(long, value_name = "VERSION", help = "Interpreter version, e.g. 3.10")]
    pub python_version: Option<String>,

    #[arg(long, value_name = "PROGRAM", help = "Interpreter used to create the environment")]
    pub interpreter: Option<String>,

    #[arg(long, value_name = "MODULE:ATTR", help = "ASGI application to serve")]
    pub app: Option<String>,

    #[arg(long, value_name = "PORT", help = "Port the server binds")]
    pub port: Option<u16>,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "PATH",
        help = "Project directory (defaults to current directory)"
    )]
    pub project_path: Option<PathBuf>,

    #[arg(
        short = 'o',
        long,
        value_name = "DIR",
        help = "Runtime image directory (defaults to <PATH>/dist/image)"
    )]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Scratch directory for the builder")]
    pub work_dir: Option<PathBuf>,

    #[arg(long, help = "Keep the builder's scratch directory")]
    pub keep_work: bool,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        value_name = "PATH",
        help = "Project directory (defaults to current directory)"
    )]
    pub project_path: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    #[arg(
        value_name = "PATH",
        help = "Project directory (defaults to current directory)"
    )]
    pub project_path: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "IMAGE", help = "Runtime image directory")]
    pub image: PathBuf,

    #[arg(long, help = "Stop after the import check")]
    pub preflight_only: bool,

    #[arg(long, conflicts_with = "preflight_only", help = "Skip the import check")]
    pub skip_preflight: bool,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Time the server gets to stop after Ctrl-C (defaults to the image's setting)"
    )]
    pub grace: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    #[arg(value_name = "IMAGE", help = "Runtime image directory")]
    pub image: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ExportArgs {
    #[arg(value_name = "IMAGE", help = "Runtime image directory")]
    pub image: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", help = "Tarball to write")]
    pub output: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    #[arg(long, value_name = "URL", help = "Full URL to request")]
    pub url: Option<String>,

    #[arg(long, default_value = "127.0.0.1", conflicts_with = "url")]
    pub host: String,

    #[arg(long, default_value = "8080", conflicts_with = "url")]
    pub port: u16,

    #[arg(long, default_value = "/", conflicts_with = "url")]
    pub path: String,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value = "5",
        help = "Request timeout in seconds"
    )]
    pub timeout: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
    Dockerfile,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
            OutputFormatArg::Dockerfile => super::output::OutputFormat::Dockerfile,
        }
    }
}
