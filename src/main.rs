use venvpack::cli::commands::{CliArgs, Commands};
use venvpack::cli::handlers::{
    handle_build, handle_check, handle_export, handle_inspect, handle_plan, handle_probe,
    handle_run,
};
use venvpack::util::logging::{init_logging, parse_level, LoggingConfig};
use venvpack::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(logging_config(&args));

    debug!("venvpack v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Plan(plan_args) => handle_plan(plan_args),
        Commands::Check(check_args) => handle_check(check_args),
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::Inspect(inspect_args) => handle_inspect(inspect_args),
        Commands::Export(export_args) => handle_export(export_args, args.quiet),
        Commands::Probe(probe_args) => handle_probe(probe_args).await,
    };

    std::process::exit(exit_code);
}

fn logging_config(args: &CliArgs) -> LoggingConfig {
    let mut config = LoggingConfig::from_env();
    if let Some(level_str) = &args.log_level {
        config.level = parse_level(level_str);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }
    config
}
