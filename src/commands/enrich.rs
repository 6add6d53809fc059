//! Enrich command - caption photos and refresh the subject embedding

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use colored::Colorize;
use walkdir::WalkDir;

use super::Context;
use affinity::core::schema::is_image_path;
use affinity::enrich::{BatchReport, PipelineRunner};
use affinity::{fingerprint, BatchJob, EnrichmentQueue, PhotoJob};

/// Expand files and directories into the image files they contain
fn collect_photos(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut photos = Vec::new();
    for path in paths {
        if path.is_dir() {
            photos.extend(
                WalkDir::new(path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && is_image_path(e.path()))
                    .map(|e| e.into_path()),
            );
        } else if is_image_path(path) {
            photos.push(path.clone());
        }
    }
    photos
}

/// Stable photo id derived from the absolute path
fn photo_id(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    fingerprint(&absolute.to_string_lossy())[..16].to_string()
}

pub fn run(ctx: &Context, subject: &str, paths: &[PathBuf], refresh_embedding: bool, json: bool) -> Result<()> {
    let photos = collect_photos(paths);
    if photos.is_empty() {
        bail!("No photos found in the given paths");
    }

    let job = BatchJob {
        subject_id: subject.to_string(),
        photos: photos.iter().map(|p| PhotoJob::new(&photo_id(p), p)).collect(),
        refresh_embedding,
    };

    let store = ctx.open_store()?;
    let pipeline = ctx.pipeline();
    let runtime = ctx.runtime()?;

    if job.photos.len() == 1 {
        let report = runtime.block_on(pipeline.process_inline(&store, &job))?;
        print_report(&report, json)?;
        return Ok(());
    }

    if !json {
        println!("{} Queued {} photos for {}", "→".dimmed(), job.photos.len(), subject.bold());
    }

    let settings = &ctx.settings.pipeline;
    let stats = runtime.block_on(async {
        let pipeline = Arc::new(pipeline);
        let runner = Arc::new(PipelineRunner::new(Arc::clone(&pipeline), store.session()?));
        let queue = EnrichmentQueue::start(settings.workers, settings.queue_capacity, runner);
        pipeline.submit_batch(&store, &queue, job)?;
        anyhow::Ok(queue.shutdown().await)
    })?;

    let status = store.get_captioning_status(subject)?;
    let captions = store.get_recent_enrichments(subject, None)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "subject_id": subject,
                "photos": photos.len(),
                "completed": stats.completed,
                "failed": stats.failed,
                "captioning_status": status.map(|s| s.as_str()),
                "captions": captions.iter().map(|c| c.annotated()).collect::<Vec<_>>(),
            })
        );
    } else {
        println!(
            "{} {} job(s) completed, {} failed; status {}",
            if stats.failed == 0 { "✓".green() } else { "✗".red() },
            stats.completed,
            stats.failed,
            status.map(|s| s.as_str()).unwrap_or("unknown").cyan()
        );
    }

    if stats.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    let embedding = report.embedding.as_ref().map(|e| e.record());

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "subject_id": report.subject_id,
                "photos": report.photos,
                "fallback_captions": report.fallback_captions,
                "embedding_generated": report.embedding.as_ref().map(|e| e.was_generated()),
                "model_name": embedding.map(|e| e.model_name.clone()),
                "updated_at": embedding.map(|e| e.updated_at.to_rfc3339()),
            }))?
        );
        return Ok(());
    }

    println!(
        "{} Enriched {} photo(s) for {}",
        "✓".green(),
        report.photos,
        report.subject_id.bold()
    );
    if report.fallback_captions > 0 {
        println!(
            "  {} {} caption(s) fell back to the file name",
            "!".yellow(),
            report.fallback_captions
        );
    }
    match &report.embedding {
        Some(outcome) if outcome.was_generated() => {
            println!("  Embedding updated ({})", outcome.record().model_name.cyan())
        }
        Some(_) => println!("  Embedding unchanged"),
        None => println!("  Embedding not refreshed"),
    }
    Ok(())
}
