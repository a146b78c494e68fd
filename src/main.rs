use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagesmith::config::PipelineConfig;
use pagesmith::pipeline::{self, Pipeline};

#[derive(Parser)]
#[command(name = "pagesmith")]
#[command(about = "Static-asset pipeline with a live-reload development server")]
struct Cli {
    /// Source root (overrides PAGESMITH_SRC)
    #[arg(long, global = true)]
    src: Option<PathBuf>,

    /// Build output root (overrides PAGESMITH_DIST)
    #[arg(long, global = true)]
    dist: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean the output directory and run every production stage
    Build {
        /// Keep watching Sass, styles and markup after the build
        #[arg(short, long)]
        watch: bool,

        /// Minify scripts as well
        #[arg(long)]
        scripts: bool,
    },
    /// Compile styles, watch sources and serve them with live reload
    Dev {
        /// Port for the dev server
        #[arg(short, long)]
        port: Option<u16>,

        /// Watch scripts as well
        #[arg(long)]
        scripts: bool,
    },
    /// Delete the output directory
    Clean,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "pagesmith=info,tower_http=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = PipelineConfig::from_env();
    if let Some(src) = cli.src {
        config.src_root = src;
    }
    if let Some(dist) = cli.dist {
        config.dist_root = dist;
    }

    match cli.command {
        Some(Commands::Build { watch, scripts }) => {
            config.scripts |= scripts;
            let pipeline = Pipeline::new(config)?;

            let report = pipeline.build().await?;
            for failure in report.failures() {
                tracing::warn!("Not built: {}", failure);
            }

            if watch {
                pipeline.watch_until_shutdown().await?;
            }
        }
        Some(Commands::Dev { port, scripts }) => {
            config.scripts |= scripts;
            if let Some(port) = port {
                config.port = port;
            }
            let pipeline = Pipeline::new(config)?;
            pipeline.dev().await?;
        }
        Some(Commands::Clean) => {
            let pipeline = Pipeline::new(config)?;
            pipeline.clean().await?;
        }
        None => {
            println!("{}", pipeline::usage());
        }
    }

    Ok(())
}
