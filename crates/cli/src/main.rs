use std::path::PathBuf;

use clap::{ArgAction, Parser};
use function_differ::{init_logging, run_command, RunOptions};

/// Decide which cloud functions changed since the last recorded build.
///
/// Each function is isolated from its shared source file, bundled, and hashed;
/// hashes are diffed against `.differspec.lock.json` in the working directory.
/// The only stdout output is the list of functions to redeploy.
#[derive(Parser, Debug)]
#[command(
    name = "function-differ",
    version,
    about = "Resolve which cloud functions need redeploying",
    long_about = None
)]
struct Cli {
    /// Working directory holding `.differspec.json`.
    #[arg(short, long)]
    dir: String,

    /// Persist the new baseline to `.differspec.lock.json`.
    #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
    write: bool,

    /// Enable debug logging on stderr.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Prefix prepended to every function name in the output.
    #[arg(long, default_value = "functions:")]
    prefix: String,

    /// Separator joining the output names.
    #[arg(long, default_value = ",")]
    sep: String,

    /// Treat the baseline as empty and redeploy everything.
    #[arg(long, default_value_t = false)]
    force_deploy: bool,

    /// Bundler configuration file (JSON or YAML), relative to --dir.
    #[arg(long)]
    bundler_config: Option<String>,

    /// Maximum concurrent builds. Overrides `concurrency` from the bundler config.
    #[arg(long)]
    concurrency: Option<usize>,

    /// node_modules package to bundle instead of marking external. Repeatable.
    #[arg(long = "include-module")]
    include_modules: Vec<String>,

    /// Separator for hierarchical function names (`group-name` → export `name`).
    #[arg(long, default_value = "-")]
    name_separator: String,

    /// Path to the esbuild executable. Defaults to `ESBUILD_BIN`, then `esbuild`.
    #[arg(long)]
    esbuild_bin: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = RunOptions {
        dir: cli.dir,
        write: cli.write,
        prefix: cli.prefix,
        separator: cli.sep,
        force_deploy: cli.force_deploy,
        bundler_config: cli.bundler_config,
        concurrency: cli.concurrency,
        include_modules: cli.include_modules,
        name_separator: cli.name_separator,
        esbuild_bin: cli.esbuild_bin,
    };

    match run_command(&options).await {
        Ok(line) => println!("{line}"),
        Err(err) => {
            tracing::error!("{err:#}");
            std::process::exit(1);
        }
    }
}
