use anyhow::Result;
use colored::Colorize;

use super::Context;
use affinity::map::{annotate, load_members, EmbeddingStatus};
use affinity::MapProjector;

pub fn run(ctx: &Context, group: &str, viewer: Option<&str>, json: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let projector = MapProjector::from_settings(&ctx.settings.map);

    let members = load_members(&store, group, viewer)?;
    let layout = projector.project(group, &members);

    let viewer_embedding = match viewer {
        Some(id) => store.get_active_embedding(id)?.map(|r| r.vector),
        None => None,
    };
    let nodes = annotate(&layout, &members, viewer_embedding.as_deref());

    if json {
        let canvas = projector.canvas();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "group_id": group,
                "width": canvas.width,
                "height": canvas.height,
                "nodes": nodes,
            }))?
        );
        return Ok(());
    }

    if nodes.is_empty() {
        println!("{}", "No members to place.".yellow());
        return Ok(());
    }

    println!("{} ({} members)", format!("Map of {}", group).bold(), nodes.len());
    println!("{}", "=".repeat(50));
    for node in &nodes {
        let status = match node.embedding_status {
            EmbeddingStatus::Ready => "ready".green(),
            EmbeddingStatus::Missing => "missing".red(),
        };
        let marker = if Some(node.subject_id.as_str()) == viewer { "*" } else { " " };
        print!(
            "{} {:<20} ({:>6.1}, {:>6.1})  {}",
            marker, node.subject_id, node.x, node.y, status
        );
        if let Some(similarity) = node.similarity {
            print!("  sim {:.3}", similarity);
        }
        println!();
    }
    Ok(())
}
