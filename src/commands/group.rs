use anyhow::Result;
use colored::Colorize;

use super::Context;
use affinity::embedding::refresh_group_embedding;
use affinity::SubjectKind;

pub fn run(ctx: &Context, group: &str, members: &[String], label: Option<&str>) -> Result<()> {
    let store = ctx.open_store()?;

    // Keep any profile fields already stored for the group
    let existing = store.get_subject(group)?;
    let (tags, description) = existing
        .as_ref()
        .map(|p| (p.selected_tags.clone(), p.description.clone()))
        .unwrap_or_default();
    let label = label.or_else(|| existing.as_ref().and_then(|p| p.label.as_deref()));

    store.upsert_subject(group, SubjectKind::Group, label, &tags, description.as_deref())?;
    store.set_group_members(group, members)?;

    println!("{} Group {} has {} member(s)", "✓".green(), group.bold(), members.len());
    match refresh_group_embedding(&store, group)? {
        Some(record) => println!(
            "  Group embedding from members ({} dims)",
            record.vector.len()
        ),
        None => println!(
            "  {} No member has an embedding yet; group embedding cleared",
            "!".yellow()
        ),
    }
    Ok(())
}
