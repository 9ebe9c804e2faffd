use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use tokio::io::AsyncReadExt;

use clipdrop::client::Client;
use clipdrop::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    #[command(flatten)]
    global: GlobalFlags,
}

#[derive(Args, Debug)]
struct GlobalFlags {
    /// Server to talk to (client commands only)
    #[arg(long, global = true, default_value = "localhost:8080")]
    host: String,

    /// Log level (0 = debug, 1 = info, 2 = warn, anything else = error)
    #[arg(long, global = true)]
    log_level: Option<u8>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add text to the clipboard history, reading stdin when no text is given.
    Copy { text: Option<String> },

    /// Print the most recent clipboard entry.
    Paste,

    /// Print the whole clipboard history, newest first.
    History,

    /// Clear the clipboard history.
    Clear,

    /// Upload a file.
    Upload { path: PathBuf },

    /// List uploaded files, newest first.
    Files,

    /// Remove an uploaded file.
    Remove { name: String },

    /// Download an uploaded file.
    Download {
        name: String,

        /// Where to write the file; defaults to its name in the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start clipdrop server.
    Server {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// Directory uploaded files are stored in.
        #[arg(long, default_value = "uploads")]
        upload_dir: PathBuf,

        /// Largest accepted upload, in bytes.
        #[arg(long, default_value_t = ServerConfig::default().max_upload_size)]
        max_upload_size: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.global.log_level {
        None => log::LevelFilter::Info,
        Some(0) => log::LevelFilter::Debug,
        Some(1) => log::LevelFilter::Info,
        Some(2) => log::LevelFilter::Warn,
        Some(_) => log::LevelFilter::Error,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_env("CLIPDROP_LOG")
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let host = cli.global.host;

    match cli.cmd {
        Command::Server {
            addr,
            upload_dir,
            max_upload_size,
        } => {
            info!("starting server on {addr}");
            clipdrop::server::serve(ServerConfig {
                addr,
                upload_dir,
                max_upload_size,
            })
            .await?;
        }
        Command::Copy { text } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut text = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut text)
                        .await
                        .context("couldn't read stdin")?;
                    text
                }
            };
            Client::new(host)?.copy(&text).await?;
        }
        Command::Paste => {
            if let Some(text) = Client::new(host)?.paste().await? {
                println!("{text}");
            }
        }
        Command::History => {
            for text in Client::new(host)?.history().await? {
                println!("{text}");
            }
        }
        Command::Clear => Client::new(host)?.clear_history().await?,
        Command::Upload { path } => {
            let name = Client::new(host)?.upload(&path).await?;
            info!("uploaded {name}");
        }
        Command::Files => {
            for name in Client::new(host)?.files().await? {
                println!("{name}");
            }
        }
        Command::Remove { name } => Client::new(host)?.remove(&name).await?,
        Command::Download { name, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&name));
            let written = Client::new(host)?
                .download_to(&name, &output)
                .await
                .with_context(|| format!("couldn't save {name} to {}", output.display()))?;
            info!("saved {name} to {} ({written} bytes)", output.display());
        }
    }
    Ok(())
}
