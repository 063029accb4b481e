//! `pytr` command-line interface
//!
//! # Usage
//!
//! ## Server Mode
//! ```bash
//! pytr server --port 8000 --host ::
//! ```
//!
//! ## Probe Mode
//! ```bash
//! pytr probe "https://rr1.googlevideo.com/videoplayback?..."
//! ```

use clap::{CommandFactory, Parser, Subcommand};

use pytr_relay::cli::{ProbeArgs, ServerArgs, run_probe_mode, run_server_mode};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "pytr")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Configuration file path
        #[arg(long)]
        config: Option<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the DASH init and index byte ranges of a media URL as JSON
    Probe {
        /// Media URL to probe
        #[arg(value_name = "URL")]
        url: String,

        /// Configuration file path
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Server {
            port,
            host,
            config,
            verbose,
        }) => {
            run_server_mode(ServerArgs {
                port,
                host,
                config,
                verbose,
            })
            .await
        }
        Some(Commands::Probe { url, config }) => run_probe_mode(ProbeArgs { url, config }).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
