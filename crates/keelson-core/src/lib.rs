//! Keelson Core - Core types for the release reconciler
//!
//! This crate provides the foundational types used throughout Keelson:
//! - `Values`: Layered values composition with deep merge and `--set` overrides
//! - `ReleaseSpec` / `ReleaseStatus`: The release resource data model
//! - `PropertyMap`: Property documents with secret and unknown markers
//! - `Chart`: Chart metadata and loading from directories or archives

pub mod archive;
pub mod chart;
pub mod error;
pub mod property;
pub mod spec;
pub mod values;

pub use chart::{Chart, ChartDependency, ChartFile, ChartMetadata};
pub use error::{CoreError, Result};
pub use property::{Annotations, MarshalOptions, PropertyMap, PropertyValue};
pub use spec::{Release, ReleaseSpec, ReleaseStatus, RepositorySpec, SetValue};
pub use values::{PathSegment, SetValueType, ValuePath, Values};
