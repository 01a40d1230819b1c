//! Diff command - show what `up` would change

use console::style;
use keelson_core::{PropertyMap, ValuePath};
use keelson_provider::{DiffRequest, DiffResponse, ReleaseProvider};
use std::path::Path;

use super::InputArgs;
use super::check::checked;
use crate::error::Result;
use crate::state::State;

/// Run the diff command
pub fn run(
    provider: &ReleaseProvider,
    inputs: &InputArgs,
    state_path: &Path,
    json: bool,
) -> Result<()> {
    let state = State::load(state_path)?;
    let news = checked(provider, inputs, state.as_ref())?.inputs;

    let Some(state) = state else {
        if json {
            let created = DiffResponse {
                changes: true,
                ..Default::default()
            };
            println!("{}", serde_json::to_string_pretty(&created)?);
        } else {
            println!(
                "{} release {} will be created",
                style("+").green().bold(),
                style(release_name(&news)).cyan()
            );
        }
        return Ok(());
    };

    let diff = provider.diff(DiffRequest {
        id: state.id.clone(),
        urn: inputs.urn(),
        olds: state.outputs,
        news,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }
    print_diff(&state.id, &diff);
    Ok(())
}

pub fn print_diff(id: &str, diff: &DiffResponse) {
    if !diff.changes {
        println!(
            "{} release {} is up to date",
            style("✓").green().bold(),
            style(id).cyan()
        );
        return;
    }

    for key in &diff.diffs {
        if diff.replaces.contains(key) {
            println!(
                "  {} {} {}",
                style("+-").red().bold(),
                key,
                style("(forces replacement)").red()
            );
        } else {
            println!("  {} {}", style("~").yellow().bold(), key);
        }
    }

    let action = match (diff.replaces.is_empty(), diff.delete_before_replace) {
        (true, _) => "upgraded in place",
        (false, true) => "deleted, then recreated",
        (false, false) => "replaced",
    };
    println!("\nrelease {} will be {}", style(id).cyan(), action);
}

/// Release name from checked inputs, or a placeholder while it is unknown
pub fn release_name(inputs: &PropertyMap) -> String {
    ValuePath::parse("releaseSpec.name")
        .ok()
        .and_then(|path| inputs.get_path(&path).and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| "(known after up)".to_string())
}
