//! Refresh command - update the state from the release store

use console::style;
use keelson_provider::{ReadRequest, ReleaseProvider};
use std::path::Path;

use crate::error::Result;
use crate::state::State;

/// Run the refresh command
pub async fn run(provider: &ReleaseProvider, state_path: &Path) -> Result<()> {
    let state = State::require(state_path)?;
    let read = provider
        .read(ReadRequest {
            id: state.id.clone(),
            urn: state.urn.clone(),
            properties: state.outputs.clone(),
        })
        .await?;

    if read.is_gone() {
        State::remove(state_path)?;
        println!(
            "{} release {} no longer exists; state removed",
            style("!").yellow().bold(),
            style(&state.id).cyan()
        );
        return Ok(());
    }

    let changed = read.properties != state.outputs;
    let id = read.id.clone();
    State {
        urn: state.urn,
        id: read.id,
        inputs: state.inputs,
        outputs: read.properties,
    }
    .save(state_path)?;

    if changed {
        println!("{} Refreshed release {}", style("✓").green().bold(), style(id).cyan());
    } else {
        println!("{} release {} is unchanged", style("✓").green().bold(), style(id).cyan());
    }
    Ok(())
}
