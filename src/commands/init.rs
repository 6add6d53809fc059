use anyhow::Result;
use colored::*;
use std::fs;

use super::Context;
use affinity::Settings;

pub fn run(ctx: &Context, create: bool) -> Result<()> {
    let paths = &ctx.paths;

    println!("{}", "affinity data root".bold());
    println!("{}", "=".repeat(50));
    println!();

    let mut missing = 0;
    let mut created = 0;

    println!("{}", "Checking required folders...".cyan());
    println!();

    for (path, purpose) in paths.required_folders() {
        if path.exists() {
            println!("{} {} exists ({})", "✓".green(), path.display(), purpose);
        } else if create {
            fs::create_dir_all(path)?;
            created += 1;
            println!("{} Created {} ({})", "✓".green(), path.display(), purpose);
        } else {
            missing += 1;
            println!("{} {} missing ({})", "✗".red(), path.display(), purpose);
        }
    }

    if paths.config.exists() {
        println!("{} {} exists (settings)", "✓".green(), paths.config.display());
    } else if create {
        fs::write(&paths.config, serde_yaml::to_string(&Settings::default())?)?;
        created += 1;
        println!("{} Created {} (settings)", "✓".green(), paths.config.display());
    } else {
        println!(
            "{} {} missing (defaults and environment are used)",
            "-".dimmed(),
            paths.config.display()
        );
    }

    if create {
        ctx.open_store()?;
        println!("{} Database ready at {}", "✓".green(), paths.database.display());
    }

    println!();
    println!("{}", "Summary".bold());
    println!("{}", "=".repeat(50));

    if create {
        println!("Created: {}", created.to_string().green());
    } else {
        println!(
            "Missing: {} folders",
            if missing > 0 {
                missing.to_string().red()
            } else {
                missing.to_string().green()
            }
        );
    }
    println!(
        "OpenAI key: {}",
        if ctx.settings.openai.api_key.is_some() {
            "configured".green()
        } else {
            "not set (offline fallbacks)".yellow()
        }
    );
    println!();

    if missing > 0 {
        println!("{}", "Run with --create to create missing folders.".yellow());
        std::process::exit(1);
    }
    Ok(())
}
