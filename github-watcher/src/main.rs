/*!
GitHub Activity Watcher
*/

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Arg, ArgAction, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use github_watcher::core::config::FileConfig;
use github_watcher::core::output_plugins::SinkSet;
use github_watcher::{ActivityWatcher, GitHubClient, UserContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("GitHub Activity Watcher")
        .version(clap::crate_version!())
        .about("Forwards new GitHub notifications and repository stars as alerts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the TOML configuration file")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("write-default-config")
                .long("write-default-config")
                .help("Print a default configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("instance-id")
                .long("instance-id")
                .help("Identity used to route alerts when no application token is configured")
                .value_name("ID")
                .value_parser(clap::value_parser!(u64))
                .default_value("0"),
        )
        .get_matches();

    if matches.get_flag("write-default-config") {
        print!("{}", FileConfig::default().to_toml_string()?);
        return Ok(());
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(FileConfig::default_path);
    let instance_id = matches.get_one::<u64>("instance-id").copied().unwrap_or(0);

    info!("📄 Loading configuration from {:?}", config_path);
    let config = FileConfig::load(&config_path).await?;

    let source = Arc::new(GitHubClient::new(&config.github)?);
    let sink = Arc::new(SinkSet::from_configs(&config.outputs));
    let mut watcher = ActivityWatcher::new(
        UserContext { instance_id },
        source,
        sink,
        config.engine.clone(),
    );

    info!("🚀 Starting GitHub activity watcher");
    watcher.enable(&config.watcher).await?;

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown");
    watcher.disable().await;

    Ok(())
}
