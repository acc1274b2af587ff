//! `cinefetch` CLI - load provider links, inspect playlists, decode links

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cinefetch")]
#[command(about = "Resolve video provider links into playable streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a link and print its content tree
    Resolve {
        /// Page URL, media URL or PlayerJS playlist
        url: String,

        /// How many folder levels to expand
        #[arg(short, long, default_value = "3")]
        depth: usize,

        /// Only print the tree, don't resolve file videos
        #[arg(long)]
        no_resolve: bool,
    },

    /// Parse a PlayerJS playlist string
    Playerjs {
        /// Playlist string, e.g. "[720p]https://a/x.mp4 or https://b/x.mp4"
        input: String,

        /// Base URL for relative links
        #[arg(short, long)]
        base: Option<String>,

        /// Print the comma-only normalized form
        #[arg(short, long)]
        normalize: bool,
    },

    /// List the variants of an HLS master playlist
    M3u8 {
        /// Manifest URL
        url: String,
    },

    /// Decode an obfuscated player link
    Decode {
        /// Payload (plain links are printed unchanged)
        payload: String,

        /// Cipher keys as s1,s2,s12,s22
        #[arg(short, long)]
        keys: Option<String>,

        /// Provider decoder script defining decode(input)
        #[arg(short, long)]
        script: Option<String>,

        /// Use the configured bootstrap of this provider
        #[arg(short, long, conflicts_with_all = ["keys", "script"])]
        provider: Option<String>,
    },

    /// Obfuscate a link with the given keys
    Encode {
        text: String,

        /// Cipher keys as s1,s2,s12,s22
        #[arg(short, long)]
        keys: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve { url, depth, no_resolve } => {
            cmd::cmd_resolve(&url, depth, !no_resolve).await?;
        }
        Commands::Playerjs { input, base, normalize } => {
            cmd::cmd_playerjs(&input, base.as_deref(), normalize)?;
        }
        Commands::M3u8 { url } => {
            cmd::cmd_m3u8(&url).await?;
        }
        Commands::Decode { payload, keys, script, provider } => {
            cmd::cmd_decode(&payload, keys.as_deref(), script.as_deref(), provider.as_deref())
                .await?;
        }
        Commands::Encode { text, keys } => {
            cmd::cmd_encode(&text, &keys)?;
        }
    }

    Ok(())
}
