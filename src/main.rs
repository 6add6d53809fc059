mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "affinity")]
#[command(about = "Profile embeddings and group similarity maps", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Data root (default: current directory)")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data folders and a default config
    Init {
        #[arg(long, help = "Create missing folders")]
        create: bool,
    },
    /// Set the profile fields of a user or group
    Profile {
        subject: String,
        #[arg(long, default_value = "user", help = "user or group")]
        kind: String,
        #[arg(long, help = "Display name")]
        label: Option<String>,
        #[arg(long = "tag", help = "Selected tag (repeatable)")]
        tags: Vec<String>,
        #[arg(long, help = "Free-text self description")]
        description: Option<String>,
    },
    /// Caption, translate and tag photos, then refresh the embedding
    Enrich {
        subject: String,
        #[arg(required = true, help = "Photos or directories of photos")]
        paths: Vec<PathBuf>,
        #[arg(long, help = "Store captions without refreshing the embedding")]
        no_embed: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Refresh a subject's embedding (skipped when nothing changed)
    Embed {
        subject: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Set group members and recompute the group embedding
    Group {
        group: String,
        #[arg(required = true)]
        members: Vec<String>,
        #[arg(long, help = "Display name")]
        label: Option<String>,
    },
    /// Lay out a group's members on the 2-D map
    Map {
        group: String,
        #[arg(long, help = "Viewer subject, added to the map and used for similarity")]
        viewer: Option<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Rank groups by similarity to a user
    Search {
        user: String,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show store statistics
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Print a subject's canonical text and fingerprint
    Compose {
        subject: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("affinity=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = commands::Context::load(cli.root)?;

    match cli.command {
        Commands::Init { create } => commands::init::run(&ctx, create),
        Commands::Profile {
            subject,
            kind,
            label,
            tags,
            description,
        } => commands::profile::run(&ctx, &subject, &kind, label.as_deref(), &tags, description.as_deref()),
        Commands::Enrich {
            subject,
            paths,
            no_embed,
            json,
        } => commands::enrich::run(&ctx, &subject, &paths, !no_embed, json),
        Commands::Embed { subject, json } => commands::embed::run(&ctx, &subject, json),
        Commands::Group {
            group,
            members,
            label,
        } => commands::group::run(&ctx, &group, &members, label.as_deref()),
        Commands::Map { group, viewer, json } => commands::map::run(&ctx, &group, viewer.as_deref(), json),
        Commands::Search { user, limit, json } => commands::search::run(&ctx, &user, limit, json),
        Commands::Status { json } => commands::status::run(&ctx, json),
        Commands::Compose { subject, json } => commands::compose::run(&ctx, &subject, json),
    }
}
