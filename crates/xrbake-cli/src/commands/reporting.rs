//! Shared console reporting for commands.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;

/// BLAKE3 hash of a written file, or "unreadable".
pub fn file_hash(path: &Path) -> String {
    match fs::read(path) {
        Ok(data) => blake3::hash(&data).to_hex().to_string(),
        Err(_) => "unreadable".to_string(),
    }
}

pub fn print_warnings<W: Display>(warnings: &[W]) {
    for warning in warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
}

/// List written files with a short content hash.
pub fn print_written(paths: &[PathBuf]) {
    for path in paths {
        let hash = file_hash(path);
        println!(
            "  {} {} {}",
            "->".dimmed(),
            path.display(),
            format!("({})", &hash[..hash.len().min(16)]).dimmed()
        );
    }
}

pub fn print_skipped(paths: &[PathBuf], kind: &str) {
    for path in paths {
        println!(
            "  {} skipped {} (not a {} file)",
            "!".yellow(),
            path.display(),
            kind
        );
    }
}

pub fn print_summary(processed: usize, noun: &str) {
    println!(
        "\n{} {} {}(s) processed",
        "SUCCESS".green().bold(),
        processed,
        noun
    );
}
