use std::fs;
use std::sync::Arc;

use backchannel_core::crypto::IdentityKeypair;
use backchannel_core::store::SledStore;
use backchannel_node::config;
use backchannel_node::logging::init_logging;
use backchannel_node::logging::set_panic_hook;
use backchannel_node::logging::LogLevel;
use backchannel_node::processor::ProcessorBuilder;
use backchannel_node::processor::ProcessorConfig;
use backchannel_node::util;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(about, version, author)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value_t = LogLevel::Info, value_enum, env)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    #[command(about = "Initializes a node with the given configuration.")]
    Init(InitCommand),
    #[command(about = "Starts a long-running node daemon.")]
    Run(RunCommand),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(
        long,
        short = 'c',
        env,
        default_value = "~/.backchannel/config.yaml",
        help = "Config file location"
    )]
    pub config: String,
}

#[derive(Args, Debug)]
struct InitCommand {
    #[arg(
        long,
        default_value = "~/.backchannel/config.yaml",
        help = "The location of config file"
    )]
    pub location: String,

    #[arg(
        long = "key",
        short = 'k',
        help = "Your identity secret as hex. If not provided, a new identity will be generated"
    )]
    pub identity_secret: Option<String>,

    #[arg(
        long,
        default_value = "~/.backchannel/identity.key",
        help = "The location the identity secret file is written to"
    )]
    pub secret_location: String,

    #[arg(long, help = "Overwrite existing identity and config files")]
    pub force: bool,
}

#[derive(Args, Debug)]
struct RunCommand {
    #[arg(
        long,
        short = 's',
        help = "ICE server list. If not provided, use ice_servers in config file or stun://stun.l.google.com:19302",
        env
    )]
    pub ice_servers: Option<String>,

    #[arg(long, help = "external ip address", env)]
    pub external_ip: Option<String>,

    #[arg(
        long,
        help = "Storage files location. If not provided, use storage.path in config file or ~/.backchannel/relay",
        env
    )]
    pub storage_path: Option<String>,

    #[arg(
        long,
        help = "Storage capacity. If not provided, use storage.capacity in config file or 200000000",
        env
    )]
    pub storage_capacity: Option<u32>,

    #[command(flatten)]
    config_args: ConfigArgs,
}

fn get_value<V>(value: Option<V>, default_value: V) -> V {
    value.unwrap_or(default_value)
}

fn init_run(args: InitCommand) -> anyhow::Result<()> {
    let config_path = util::expand_home(&args.location)?;
    if config_path.exists() && !args.force {
        anyhow::bail!(
            "Config file already exists at {}. Pass --force to overwrite.",
            config_path.to_string_lossy()
        );
    }
    let secret_path = util::expand_home(&args.secret_location)?;
    if secret_path.exists() && !args.force {
        anyhow::bail!(
            "Identity file already exists at {}. Pass --force to overwrite.",
            secret_path.to_string_lossy()
        );
    }

    let identity = if let Some(secret) = args.identity_secret {
        IdentityKeypair::from_secret_hex(&secret)?
    } else {
        IdentityKeypair::generate()
    };

    util::ensure_parent_dir(&args.secret_location)?;
    fs::write(&secret_path, identity.dump_secret_hex())?;
    println!(
        "Your identity file has saved to: {}",
        secret_path.to_string_lossy()
    );

    // The config keeps the unexpanded location so the file stays portable
    // across home directories.
    let config = config::Config::new(args.secret_location);
    println!("Peer id: {}", config.peer_id);

    let p = config.write_fs(args.location.as_str())?;
    println!("Your config has saved to: {}", p);
    Ok(())
}

async fn daemon_run(args: RunCommand) -> anyhow::Result<()> {
    let mut c = config::Config::read_fs(args.config_args.config)?;

    let storage = if let Some(storage_path) = args.storage_path {
        let capacity = get_value(args.storage_capacity, config::DEFAULT_STORAGE_CAPACITY);
        config::StorageConfig::new(&storage_path, capacity)
    } else {
        c.storage.clone()
    };

    c.ice_servers = get_value(args.ice_servers, c.ice_servers);
    c.external_ip = args.external_ip.map(Some).unwrap_or(c.external_ip);

    let config: ProcessorConfig = c.try_into()?;

    let storage_path = util::expand_home(&storage.path)?;
    let store = Arc::new(SledStore::new_with_cap_and_path(storage.capacity, storage_path).await?);

    let processor = Arc::new(
        ProcessorBuilder::from_config(&config)?
            .store(store)
            .build()?,
    );
    println!("Peer id: {}", processor.local_id());

    let shutdown = CancellationToken::new();
    let shutdown_handle = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_handle.cancel();
        }
    });

    processor.listen(shutdown).await;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_level);
    set_panic_hook();

    match cli.command {
        Command::Init(args) => init_run(args),
        Command::Run(args) => daemon_run(args).await,
    }
}
