//! Check command - validate inputs and print the normalized document

use console::style;
use keelson_provider::{CheckRequest, CheckResponse, ReleaseProvider};
use std::path::Path;

use super::InputArgs;
use crate::error::{CliError, Result};
use crate::state::State;

/// Run check against the saved state, returning the accepted inputs
pub fn checked(
    provider: &ReleaseProvider,
    inputs: &InputArgs,
    state: Option<&State>,
) -> Result<CheckResponse> {
    let response = provider.check(CheckRequest {
        urn: inputs.urn(),
        olds: state.map(|s| s.outputs.clone()),
        news: inputs.load()?,
    })?;

    if response.failures.is_empty() {
        return Ok(response);
    }
    for failure in &response.failures {
        eprintln!(
            "{} {}: {}",
            style("✗").red().bold(),
            style(&failure.property).yellow(),
            failure.reason
        );
    }
    Err(CliError::validation_with_help(
        format!("{} input(s) failed check", response.failures.len()),
        "fix the listed properties in the input file",
    ))
}

/// Run the check command
pub fn run(provider: &ReleaseProvider, inputs: &InputArgs, state_path: &Path) -> Result<()> {
    let state = State::load(state_path)?;
    let response = checked(provider, inputs, state.as_ref())?;

    println!("{}", serde_json::to_string_pretty(&response.inputs)?);
    eprintln!("{} Inputs are valid", style("✓").green().bold());
    Ok(())
}
