//! Up command - create, upgrade or replace the release to match the inputs

use console::style;
use keelson_core::PropertyMap;
use keelson_provider::{
    CreateRequest, DeleteRequest, DiffRequest, ProviderError, ReleaseProvider, UpdateRequest,
};
use std::path::Path;
use std::time::Duration;

use super::InputArgs;
use super::check::checked;
use super::diff::{print_diff, release_name};
use crate::error::{CliError, Result};
use crate::state::State;

/// Options for one `up` run
#[derive(Debug, Clone, Copy, Default)]
pub struct UpOptions {
    pub preview: bool,
    pub timeout: Option<Duration>,
}

/// Run the up command
pub async fn run(
    provider: &ReleaseProvider,
    inputs: &InputArgs,
    state_path: &Path,
    opts: UpOptions,
) -> Result<()> {
    let state = State::load(state_path)?;
    let news = checked(provider, inputs, state.as_ref())?.inputs;
    let urn = inputs.urn();

    let Some(state) = state else {
        return create(provider, &urn, news, state_path, opts).await;
    };

    let diff = provider.diff(DiffRequest {
        id: state.id.clone(),
        urn: urn.clone(),
        olds: state.outputs.clone(),
        news: news.clone(),
    })?;
    if !diff.changes {
        print_diff(&state.id, &diff);
        return Ok(());
    }
    if opts.preview {
        print_diff(&state.id, &diff);
        if diff.replaces.is_empty() {
            preview_update(provider, &urn, state, news, opts).await?;
        }
        return Ok(());
    }

    if diff.replaces.is_empty() {
        return update(provider, &urn, state, news, state_path, opts).await;
    }

    tracing::debug!(id = %state.id, replaces = ?diff.replaces, "replacing release");
    if diff.delete_before_replace {
        destroy_old(provider, &urn, &state, opts).await?;
        State::remove(state_path)?;
        create(provider, &urn, news, state_path, opts).await
    } else {
        create(provider, &urn, news, state_path, opts).await?;
        destroy_old(provider, &urn, &state, opts).await
    }
}

async fn create(
    provider: &ReleaseProvider,
    urn: &str,
    inputs: PropertyMap,
    state_path: &Path,
    opts: UpOptions,
) -> Result<()> {
    let name = release_name(&inputs);
    let result = provider
        .create(CreateRequest {
            urn: urn.to_string(),
            properties: inputs.clone(),
            timeout: opts.timeout,
            preview: opts.preview,
        })
        .await;
    let created = match result {
        Ok(created) => created,
        Err(err) => return Err(save_partial(err, urn, &inputs, state_path)),
    };

    if opts.preview {
        println!(
            "{} release {} will be created",
            style("+").green().bold(),
            style(name).cyan()
        );
        return Ok(());
    }

    let id = created.id.clone();
    State {
        urn: urn.to_string(),
        id: created.id,
        inputs,
        outputs: created.properties,
    }
    .save(state_path)?;
    println!(
        "{} Created release {}",
        style("✓").green().bold(),
        style(id).cyan()
    );
    Ok(())
}

async fn update(
    provider: &ReleaseProvider,
    urn: &str,
    state: State,
    inputs: PropertyMap,
    state_path: &Path,
    opts: UpOptions,
) -> Result<()> {
    let result = provider
        .update(UpdateRequest {
            id: state.id.clone(),
            urn: urn.to_string(),
            olds: state.outputs,
            news: inputs.clone(),
            timeout: opts.timeout,
            preview: false,
        })
        .await;
    let updated = match result {
        Ok(updated) => updated,
        Err(err) => return Err(save_partial(err, urn, &inputs, state_path)),
    };

    println!(
        "{} Upgraded release {}",
        style("✓").green().bold(),
        style(&state.id).cyan()
    );
    State {
        urn: urn.to_string(),
        id: state.id,
        inputs,
        outputs: updated.properties,
    }
    .save(state_path)
}

async fn preview_update(
    provider: &ReleaseProvider,
    urn: &str,
    state: State,
    inputs: PropertyMap,
    opts: UpOptions,
) -> Result<()> {
    provider
        .update(UpdateRequest {
            id: state.id,
            urn: urn.to_string(),
            olds: state.outputs,
            news: inputs,
            timeout: opts.timeout,
            preview: true,
        })
        .await?;
    Ok(())
}

async fn destroy_old(
    provider: &ReleaseProvider,
    urn: &str,
    state: &State,
    opts: UpOptions,
) -> Result<()> {
    provider
        .delete(DeleteRequest {
            id: state.id.clone(),
            urn: urn.to_string(),
            properties: state.outputs.clone(),
            timeout: opts.timeout,
        })
        .await?;
    println!(
        "{} Deleted release {}",
        style("-").red().bold(),
        style(&state.id).cyan()
    );
    Ok(())
}

/// Persist the checkpoint carried by a partial failure before reporting it
fn save_partial(
    err: ProviderError,
    urn: &str,
    inputs: &PropertyMap,
    state_path: &Path,
) -> CliError {
    if let ProviderError::InitFailed { id, properties, .. } = &err {
        let state = State {
            urn: urn.to_string(),
            id: id.clone(),
            inputs: inputs.clone(),
            outputs: properties.clone(),
        };
        if let Err(save_err) = state.save(state_path) {
            return save_err;
        }
        tracing::warn!(
            release = %id,
            path = %state_path.display(),
            "saved state of an unhealthy release"
        );
    }
    err.into()
}
