use anyhow::{bail, Result};
use colored::Colorize;

use super::Context;
use affinity::SubjectKind;

pub fn run(
    ctx: &Context,
    subject: &str,
    kind: &str,
    label: Option<&str>,
    tags: &[String],
    description: Option<&str>,
) -> Result<()> {
    let Some(kind) = SubjectKind::parse(kind) else {
        bail!("Unknown subject kind '{}' (expected user or group)", kind);
    };

    let store = ctx.open_store()?;
    store.upsert_subject(subject, kind, label, tags, description)?;

    println!(
        "{} {} {} saved ({} tags)",
        "✓".green(),
        kind,
        subject.bold(),
        tags.len()
    );
    println!("  Run {} to refresh its embedding", format!("affinity embed {}", subject).cyan());
    Ok(())
}
