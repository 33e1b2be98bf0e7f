//! Gerrit Stream - watch a Gerrit server's event stream from the terminal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gerrit_stream::config::{ClientConfig, ConfigLoader};
use gerrit_stream::GerritClient;

#[derive(Parser)]
#[command(
    name = "gerrit-stream",
    about = "Gerrit event stream client",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to the usual search paths)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gerrit host name or ssh alias
    #[arg(long)]
    host: Option<String>,

    /// Gerrit ssh port
    #[arg(short, long)]
    port: Option<u16>,

    /// Username for the ssh session
    #[arg(short, long)]
    username: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print events as they arrive.
    Stream {
        /// Seconds to wait for each event; waits forever when unset.
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Keep going after the stream reports an error.
        #[arg(long)]
        ignore_stream_errors: bool,
        /// Print the raw JSON of each event.
        #[arg(long)]
        json: bool,
    },
    /// Run a change query.
    Query {
        /// Query term, e.g. "status:open project:demo".
        term: String,
    },
    /// Print the server version.
    Version,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    if let Some(host) = &cli.host {
        config.ssh.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.ssh.port = Some(port);
    }
    if let Some(username) = &cli.username {
        config.ssh.username = Some(username.clone());
    }
    Ok(config)
}

async fn stream(
    client: &GerritClient,
    timeout: Option<Duration>,
    ignore_stream_errors: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    client.start_event_stream().await?;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = client.get_event(timeout) => event,
        };

        let Some(event) = event else {
            if client.stream_state().is_finished() {
                break;
            }
            tracing::info!("No event");
            continue;
        };

        if event.is_stream_error() {
            tracing::error!(event = %event, "Stream error");
            if !ignore_stream_errors {
                break;
            }
            continue;
        }

        if json {
            println!("{}", Value::Object(event.into_raw()));
        } else {
            println!("{event}");
        }
    }

    client.stop_event_stream().await;
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    tracing::debug!(host = %config.ssh.host, port = ?config.ssh.port, "Connecting");
    let client = GerritClient::from_config(&config);

    match cli.command {
        Commands::Stream {
            timeout,
            ignore_stream_errors,
            json,
        } => {
            let timeout = timeout.map(Duration::from_secs);
            stream(&client, timeout, ignore_stream_errors, json).await?;
        }
        Commands::Query { term } => {
            for change in client.query(&term).await? {
                println!("{}", serde_json::to_string(&change)?);
            }
        }
        Commands::Version => {
            let (username, version) = client.gerrit_info().await?;
            match username {
                Some(user) => println!("Gerrit {version} (as {user})"),
                None => println!("Gerrit {version}"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
