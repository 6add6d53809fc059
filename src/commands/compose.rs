use anyhow::Result;
use colored::Colorize;

use super::Context;
use affinity::{compose, fingerprint};

pub fn run(ctx: &Context, subject: &str, json: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let pipeline = ctx.pipeline();

    let signal = pipeline.gate().build_signal(&store, subject)?;
    let text = compose(&signal);
    let hash = fingerprint(&text);
    let active = store.get_active_embedding(subject)?;
    let up_to_date = active.as_ref().is_some_and(|a| a.source_hash == hash);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "subject_id": subject,
                "text": text,
                "fingerprint": hash,
                "tags": signal.merged_tags(),
                "embedding_up_to_date": up_to_date,
            }))?
        );
        return Ok(());
    }

    println!("{}", text);
    println!("{} {}", "Fingerprint:".dimmed(), hash);
    println!(
        "{} {}",
        "Embedding:  ".dimmed(),
        match (&active, up_to_date) {
            (Some(_), true) => "up to date".green(),
            (Some(_), false) => "stale".yellow(),
            (None, _) => "missing".red(),
        }
    );
    Ok(())
}
