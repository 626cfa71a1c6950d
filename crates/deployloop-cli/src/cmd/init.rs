use anyhow::Context;
use deployloop_core::{config::Config, io, paths};
use std::path::Path;

const GITIGNORE_ENTRY: &str = ".deployloop/runs/";

pub fn run(root: &Path) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    println!("Initializing deployloop in: {}", root.display());

    let runs = paths::runs_dir(root);
    io::ensure_dir(&runs).with_context(|| format!("failed to create {}", runs.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    if ensure_gitignored(root)? {
        println!("  updated: .gitignore");
    }

    println!("\nNext: deployloop run");
    Ok(())
}

/// Add the runs directory to `.gitignore` when a `.gitignore` exists and
/// does not already list it. Returns true if the file changed.
fn ensure_gitignored(root: &Path) -> anyhow::Result<bool> {
    let path = root.join(".gitignore");
    let Some(mut content) = io::read_optional(&path)? else {
        return Ok(false);
    };
    if content.lines().any(|l| l.trim() == GITIGNORE_ENTRY) {
        return Ok(false);
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(GITIGNORE_ENTRY);
    content.push('\n');
    io::atomic_write(&path, content.as_bytes())?;
    Ok(true)
}
