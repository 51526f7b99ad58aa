use clap::{Parser, Subcommand};
use std::path::PathBuf;

use upsync::push::{PushArgs, push};
use upsync::{Config, logging, server};

#[derive(Parser)]
#[command(name = "upsync")]
#[command(about = "Concurrent chunked uploads and a receiver to upload to")]
#[command(version = "1.0")]
struct Cli {
    #[arg(short, long, global = true, help = "debug logging for upsync")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Serve {
        #[arg(long, default_value = "0.0.0.0", help = "Address to bind to")]
        address: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(short, long, help = "Directory received uploads are written to")]
        root: PathBuf,
        #[arg(long, default_value_t = 1024, help = "largest accepted body, in MiB")]
        max_body_mb: usize,
    },
    Upload {
        #[arg(short, long, required = true, help = "base URL of a receiver")]
        to: Vec<String>,
        #[arg(short, long, help = "split each file across all --to targets")]
        split: bool,
        #[arg(short = 'j', long, help = "concurrent uploads")]
        threads: Option<usize>,
        #[arg(short, long, help = "TOML config file")]
        config: Option<PathBuf>,
        #[arg(required = true, help = "files or directories to upload")]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Some(Commands::Serve {
            address,
            port,
            root,
            max_body_mb,
        }) => {
            server::startup(address, port, root, max_body_mb * 1024 * 1024).await?;
        }

        Some(Commands::Upload {
            to,
            split,
            threads,
            config,
            paths,
        }) => {
            let mut config = match config {
                Some(path) => Config::load(path)?,
                None => Config::default(),
            };
            if let Some(threads) = threads {
                config.threads = threads;
            }
            push(PushArgs {
                paths,
                to,
                split,
                config,
            })
            .await?;
        }

        None => {
            println!("Use --help for available commands");
        }
    }

    Ok(())
}
