// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, set up logging, dispatch.
// - Returns `anyhow::Result` so any failure prints a diagnostic and exits 1.

use anyhow::{bail, Context};
use clap::Parser;
use crossterm::style::{style, Stylize};
use tracing_subscriber::EnvFilter;

use mini_test_groups::cli::{Cli, Command, PublishArgs, S3ConfigArgs};
use mini_test_groups::config::{
    encode_config_blob, parse_config_blob, resolve_storage_config, save_storage_config,
    ProcessEnv, StorageOverrides,
};
use mini_test_groups::git::GitCli;
use mini_test_groups::pipeline::{LiveConnector, PublishOutcome, PublishPipeline};
use mini_test_groups::store::FileStore;
use mini_test_groups::ui::TerminalPrompt;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "mini_test_groups=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Command::S3Config(args)) => s3_config(args),
        None => publish(cli.publish),
    }
}

fn publish(args: PublishArgs) -> anyhow::Result<()> {
    let mut store = FileStore::open_default()?;
    let opts = args.into_options();
    let git = GitCli::new();

    let outcome = PublishPipeline::new(&ProcessEnv, &git, &TerminalPrompt, &LiveConnector, &mut store)
        .run(&opts)?;

    match outcome {
        PublishOutcome::Checked => println!("Working tree checks passed"),
        PublishOutcome::Published(report) => {
            println!("Uploaded {} files to {}", report.uploaded, report.remote_prefix);
            println!("{}", style(&report.url).green());
            if let Some(group) = report.group {
                println!("Updated successful #{}", group.group_id);
                println!("{}", group.manage_url);
                println!("{}", style(&group.name).bold());
            }
        }
    }
    Ok(())
}

fn s3_config(args: S3ConfigArgs) -> anyhow::Result<()> {
    let mut store = FileStore::open_default()?;

    if args.print {
        let config = resolve_storage_config(&ProcessEnv, &StorageOverrides::default(), &store);
        println!("current config:");
        if let Err(e) = config.validate() {
            println!("{} {e}", style("not valid:").yellow());
        }
        let (json, encoded) = encode_config_blob(&config)?;
        println!("{json}");
        println!("{encoded}");
        return Ok(());
    }

    let Some(blob) = args.config else {
        bail!("pass a config as JSON or base64-encoded JSON, or use --print");
    };
    let config = parse_config_blob(&blob).context("failed to parse config")?;
    config.validate().context("config not valid")?;
    save_storage_config(&mut store, &config)?;
    println!("config valid, saved to {}", store.path().display());
    Ok(())
}
