//! Search command - rank groups by similarity to a user

use anyhow::Result;
use colored::Colorize;

use super::Context;
use affinity::embedding::rank_groups_for_user;

pub fn run(ctx: &Context, user: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let limit = limit.unwrap_or(10);

    let has_embedding = store.get_active_embedding(user)?.is_some();
    let mut results = rank_groups_for_user(&store, user)?;
    results.truncate(limit);

    if json {
        let json_results: Vec<_> = results
            .iter()
            .map(|r| {
                let label = store
                    .get_subject(&r.group_id)
                    .ok()
                    .flatten()
                    .and_then(|s| s.label);
                serde_json::json!({
                    "group_id": r.group_id,
                    "label": label,
                    "similarity": r.similarity,
                    "has_embedding": r.has_embedding,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json_results)?);
        return Ok(());
    }

    if !has_embedding {
        println!(
            "{} {} has no embedding yet; run {} first",
            "!".yellow(),
            user.bold(),
            format!("affinity embed {}", user).cyan()
        );
        println!();
    }

    if results.is_empty() {
        println!("{} No groups found", "→".dimmed());
        return Ok(());
    }

    println!("{} {} groups for: {}", "→".dimmed(), results.len(), user.cyan());
    println!();

    for (i, result) in results.iter().enumerate() {
        let score_str = format!("{:.2}", result.similarity);
        let score_colored = if !result.has_embedding {
            "n/a".dimmed()
        } else if result.similarity > 0.8 {
            score_str.green()
        } else if result.similarity > 0.5 {
            score_str.yellow()
        } else {
            score_str.dimmed()
        };

        println!(
            "{}. [{}] {}",
            (i + 1).to_string().bold(),
            score_colored,
            result.group_id.cyan()
        );
    }

    Ok(())
}
