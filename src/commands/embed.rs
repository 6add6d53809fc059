use anyhow::Result;
use colored::Colorize;

use super::Context;

pub fn run(ctx: &Context, subject: &str, json: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let pipeline = ctx.pipeline();
    let runtime = ctx.runtime()?;

    let outcome = runtime.block_on(pipeline.gate().refresh(&store, subject))?;
    let record = outcome.record();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "subject_id": record.subject_id,
                "generated": outcome.was_generated(),
                "model_name": record.model_name,
                "model_version": record.model_version,
                "source_hash": record.source_hash,
                "dim": record.vector.len(),
                "updated_at": record.updated_at.to_rfc3339(),
            }))?
        );
        return Ok(());
    }

    if outcome.was_generated() {
        println!("{} Embedding updated for {}", "✓".green(), subject.bold());
    } else {
        println!("{} Profile unchanged for {}, embedding reused", "=".dimmed(), subject.bold());
    }
    println!(
        "  {} {} ({} dims)",
        record.model_name.cyan(),
        record.model_version.as_deref().unwrap_or("-").dimmed(),
        record.vector.len()
    );
    println!("  Fingerprint: {}", &record.source_hash[..16]);
    println!("  Updated:     {}", record.updated_at.to_rfc3339());
    Ok(())
}
