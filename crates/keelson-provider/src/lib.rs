//! Keelson Provider - the release resource state machine
//!
//! This crate connects the control loop to release actions:
//! - **Provider**: Check, Diff, Create, Read, Update and Delete on property documents
//! - **Checkpoints**: live state plus frozen inputs, with sensitive overrides redacted
//! - **Configuration**: default namespace, secret support and the release store
//!
//! # Example
//!
//! ```no_run
//! use keelson_core::PropertyMap;
//! use keelson_provider::{CheckRequest, CreateRequest, ProviderConfig, ReleaseProvider};
//! use keelson_repo::CacheLocks;
//!
//! # async fn example(news: PropertyMap) -> keelson_provider::Result<()> {
//! let provider = ReleaseProvider::from_config(ProviderConfig::default(), &CacheLocks::new()).await?;
//! let urn = "urn:keelson:dev::shop::keelson:index:Release::web".to_string();
//!
//! let checked = provider.check(CheckRequest { urn: urn.clone(), olds: None, news })?;
//! let created = provider
//!     .create(CreateRequest { urn, properties: checked.inputs, ..Default::default() })
//!     .await?;
//! println!("created {}", created.id);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod naming;
pub mod provider;

pub use checkpoint::{
    Checkpoint, INPUTS_KEY, SENSITIVE_PLACEHOLDER, SensitiveValues, checkpoint_document,
    cloak_set_value, manifest_to_json, parse_checkpoint, redact_manifest, sensitive_set_paths,
    set_release_attributes,
};
pub use config::{ProviderConfig, StorageKind};
pub use error::{ProviderError, Result};
pub use naming::autoname;
pub use provider::{
    CheckFailure, CheckRequest, CheckResponse, CreateRequest, CreateResponse, DeleteRequest,
    DiffRequest, DiffResponse, ReadRequest, ReadResponse, ReleaseProvider, UpdateRequest,
    UpdateResponse,
};
