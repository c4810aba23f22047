//! Config command - inspect and edit pebuild.toml.

use anyhow::{bail, Context, Result};
use std::path::Path;

use pebuild::config::ConfigDocument;
use pebuild::pipeline::StepName;

pub enum ConfigAction {
    Show,
    /// Write a default document
    Init { force: bool },
    SetStep { step: String, enabled: bool },
    /// Toggle every optional customization step at once
    SetAll { enabled: bool },
}

/// Execute the config command. `layered` is the effective document with
/// `.env` and environment overrides; edits go to the file as written.
pub fn cmd_config(
    base_dir: &Path,
    path: &Path,
    layered: ConfigDocument,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Config file: {}", path.display());
            let config = layered.snapshot(base_dir)?;
            config.print();
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists. Use --force to overwrite.", path.display());
            }
            ConfigDocument::default().save(path)?;
            println!("Wrote {}", path.display());
        }
        ConfigAction::SetStep { step, enabled } => {
            let Some(name) = StepName::parse(&step) else {
                let known: Vec<&str> = StepName::all().iter().map(|s| s.as_str()).collect();
                bail!("Unknown step '{}'. Known steps: {}", step, known.join(", "));
            };
            let mut doc = ConfigDocument::load(path)?;
            doc.set_step(name, enabled)?;
            doc.save(path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            println!("{} = {}", name, if enabled { "on" } else { "off" });
        }
        ConfigAction::SetAll { enabled } => {
            let mut doc = ConfigDocument::load(path)?;
            doc.set_optional_steps(enabled);
            doc.save(path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            println!("Optional steps turned {}", if enabled { "on" } else { "off" });
        }
    }
    Ok(())
}
