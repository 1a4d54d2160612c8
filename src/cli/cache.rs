// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Cache command - manage the step cache

use colored::Colorize;
use miette::Result;
use std::io::{self, Write};

use super::CacheAction;
use crate::cache::{CacheStore, FilesystemCache};
use crate::config::Settings;

/// Run the cache command
pub async fn run(action: CacheAction, settings: &Settings, _verbose: bool) -> Result<()> {
    let cache_dir = settings.cache.directory.clone();
    let cache = FilesystemCache::new(cache_dir.clone())?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await?;

            println!("{}", "Cache Statistics".bold());
            println!("{}", "═".repeat(40));
            println!("  Location: {}", cache_dir.display());
            println!("  Entries:  {}", stats.entries);
            if stats.expired > 0 {
                println!("  Expired:  {}", stats.expired.to_string().yellow());
            }
            println!("  Size:     {}", stats.formatted_size());

            if let Some(oldest) = stats.oldest_entry {
                if let Ok(duration) = oldest.elapsed() {
                    println!("  Oldest:   {} ago", format_duration(duration));
                }
            }

            if let Some(newest) = stats.newest_entry {
                if let Ok(duration) = newest.elapsed() {
                    println!("  Newest:   {} ago", format_duration(duration));
                }
            }

            if !settings.cache.enabled {
                println!();
                println!("{}", "  Caching is disabled in the settings.".dimmed());
            }

            Ok(())
        }

        CacheAction::Clear { yes } => {
            let stats = cache.stats().await?;

            if stats.entries == 0 {
                println!("{}", "Cache is already empty.".dimmed());
                return Ok(());
            }

            if !yes {
                print!(
                    "Clear {} cache entries ({})? [y/N] ",
                    stats.entries,
                    stats.formatted_size()
                );
                io::stdout().flush().ok();

                let mut input = String::new();
                io::stdin().read_line(&mut input).ok();

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("{}", "Cancelled.".dimmed());
                    return Ok(());
                }
            }

            cache.clear().await?;
            println!("{}", "Cache cleared.".green());

            Ok(())
        }
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
