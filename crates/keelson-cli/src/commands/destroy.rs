//! Destroy command - uninstall the release and drop the state

use console::style;
use keelson_provider::{DeleteRequest, ReleaseProvider};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::state::State;

/// Run the destroy command
pub async fn run(
    provider: &ReleaseProvider,
    state_path: &Path,
    timeout: Option<Duration>,
) -> Result<()> {
    let Some(state) = State::load(state_path)? else {
        println!("{} nothing to destroy", style("✓").green().bold());
        return Ok(());
    };

    println!(
        "{} Uninstalling release {}",
        style("→").blue().bold(),
        style(&state.id).cyan()
    );
    provider
        .delete(DeleteRequest {
            id: state.id.clone(),
            urn: state.urn.clone(),
            properties: state.outputs,
            timeout,
        })
        .await?;
    State::remove(state_path)?;

    println!(
        "{} Release {} uninstalled",
        style("✓").green().bold(),
        style(&state.id).cyan()
    );
    Ok(())
}
