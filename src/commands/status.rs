use anyhow::Result;
use chrono::Utc;
use colored::*;
use serde::Serialize;

use super::Context;
use affinity::SubjectKind;

#[derive(Serialize)]
struct StoreStatus {
    timestamp: String,
    database: String,
    users: usize,
    groups: usize,
    subjects: usize,
    captions: usize,
    embeddings: usize,
    last_embedded: Option<String>,
    embedding_model: String,
    embedding_dim: usize,
    openai_configured: bool,
    captioning_endpoint: Option<String>,
}

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let stats = store.get_stats()?;
    let settings = &ctx.settings;

    let status = StoreStatus {
        timestamp: Utc::now().to_rfc3339(),
        database: ctx.paths.database.display().to_string(),
        users: store.list_subjects(SubjectKind::User)?.len(),
        groups: store.list_subjects(SubjectKind::Group)?.len(),
        subjects: stats.subject_count,
        captions: stats.caption_count,
        embeddings: stats.embedding_count,
        last_embedded: stats.last_embedded.map(|t| t.to_rfc3339()),
        embedding_model: settings.embedding.model.clone(),
        embedding_dim: settings.embedding.dim,
        openai_configured: settings.openai.api_key.is_some(),
        captioning_endpoint: settings.captioning.endpoint.clone(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(status: &StoreStatus) {
    println!("{}", "affinity status".bold());
    println!("{}", "=".repeat(50));
    println!();
    println!("Checked:  {}", status.timestamp);
    println!("Database: {}", status.database);
    println!();

    println!("{}", "Store".cyan());
    println!("{}", "-".repeat(30));
    println!("   {:<12} {:>6}", "Users", status.users);
    println!("   {:<12} {:>6}", "Groups", status.groups);
    println!("   {:<12} {:>6}", "Captions", status.captions);
    println!("   {:<12} {:>6}", "Embeddings", status.embeddings);
    if let Some(last) = &status.last_embedded {
        println!("   Last embedded {}", last);
    }
    println!();

    println!("{}", "Services".cyan());
    println!("{}", "-".repeat(30));
    println!("   Embedding   {} ({} dims)", status.embedding_model, status.embedding_dim);
    println!(
        "   OpenAI      {}",
        if status.openai_configured {
            "configured".green()
        } else {
            "offline (fallback vectors)".yellow()
        }
    );
    println!(
        "   Captioning  {}",
        match &status.captioning_endpoint {
            Some(endpoint) => endpoint.as_str().green(),
            None => "offline (file-name captions)".yellow(),
        }
    );
}
