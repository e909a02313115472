#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mixpki::auth::authentication_epochs;
use mixpki::config::NodeConfigFile;
use mixpki::debug::link_key_string;
use mixpki::descriptor::Role;
use mixpki::epoch::SystemEpochClock;
use mixpki::plan::{NEXT_FETCH_TILL, PUBLISH_DEADLINE};

#[derive(Parser)]
#[command(name = "mixpki", about = "Mix node PKI utility CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Show the epoch schedule at an instant.
    Epoch(EpochArgs),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Generate a node configuration with fresh keys.
    Init(InitArgs),
    /// Validate a node configuration and print its public identity.
    Show(ShowArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Mix,
    Provider,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Mix => Role::Mix,
            RoleArg::Provider => Role::Provider,
        }
    }
}

#[derive(Args)]
struct InitArgs {
    identifier: String,
    #[arg(long = "address", value_name = "ADDR", required = true)]
    addresses: Vec<String>,
    #[arg(long, value_enum, default_value = "mix")]
    role: RoleArg,
    #[arg(long, value_name = "FILE", default_value = "node.json")]
    out: PathBuf,
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(long, value_name = "FILE", default_value = "node.json")]
    config: PathBuf,
}

#[derive(Args)]
struct EpochArgs {
    /// Unix timestamp to evaluate instead of the current time.
    #[arg(long, value_name = "SECONDS")]
    at: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Config(ConfigCommand::Init(args)) => handle_init(args),
        Command::Config(ConfigCommand::Show(args)) => handle_show(args),
        Command::Epoch(args) => handle_epoch(args),
    }
}

fn handle_init(args: InitArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            args.out.display()
        );
    }
    let file = NodeConfigFile::generate(args.identifier, args.role.into(), args.addresses);
    let config = file
        .clone()
        .into_node_config()
        .context("generated configuration is invalid")?;
    file.save_to_path(&args.out)
        .with_context(|| format!("failed to save {}", args.out.display()))?;
    println!("wrote {} for node {}", args.out.display(), config.node_id());
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<()> {
    let config = NodeConfigFile::load_from_path(&args.config)
        .and_then(NodeConfigFile::into_node_config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    println!("identifier: {}", config.identifier());
    println!("node id:    {}", config.node_id());
    println!("link key:   {}", link_key_string(&config.link_public()));
    println!("role:       {:?}", config.role());
    for address in config.addresses() {
        println!("address:    {address}");
    }
    let debug = config.debug();
    if debug.disable_key_rotation {
        println!("warning: mix key rotation is disabled");
    }
    if debug.disable_authentication {
        println!("warning: peer authentication is disabled");
    }
    Ok(())
}

fn handle_epoch(args: EpochArgs) -> Result<()> {
    let clock = SystemEpochClock::default();
    let instant = match args.at {
        Some(seconds) => UNIX_EPOCH + Duration::from_secs(seconds),
        None => SystemTime::now(),
    };
    let time = clock.at(instant);
    let fetch_next = yes_no(time.till < NEXT_FETCH_TILL);
    let publishable = yes_no(time.till > PUBLISH_DEADLINE);
    println!("epoch:   {}", time.epoch);
    println!("period:  {}s", clock.period().as_secs());
    println!("elapsed: {}s", time.elapsed.as_secs());
    println!("till:    {}s", time.till.as_secs());
    println!("authenticating against: {:?}", authentication_epochs(time));
    println!("next document fetched: {fetch_next}");
    println!("next descriptor publishable: {publishable}");
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
