//! # stapler-attachments
//!
//! File attachments for persisted records.
//!
//! ## Features
//!
//! - Templated storage paths and URLs (`:class`, `:attachment`, `:id_partition`, ...)
//! - Id partitioned directory layout (`1234` is stored under `000/001/234`)
//! - Multiple styles per attachment, resized through the `image` crate
//! - Save and delete hooks that keep files in step with the record
//! - Existence-checked resource lookup with a "missing" placeholder fallback
//!
//! ## Example
//!
//! ```rust,ignore
//! use stapler_attachments::{AttachmentOptions, Hook, Model, Stapler, UploadDescriptor};
//! use stapler_core::StaplerConfig;
//!
//! let mut stapler = Stapler::new(StaplerConfig::load()?);
//! stapler.has_attached_file(
//!     "User",
//!     "avatar",
//!     AttachmentOptions::new().style("thumb", "100x100#"),
//! )?;
//!
//! let mut user = Model::new("User").with_id(1);
//! user.attach("avatar", &UploadDescriptor::new("me.jpg", "image/jpeg", tmp_path, size));
//!
//! stapler.dispatch(Hook::BeforeSave, &mut user).await?;
//! // ... persist the record ...
//! stapler.dispatch(Hook::AfterSave, &mut user).await?;
//!
//! let url = stapler.call(&user, "avatar_url", Some("thumb")).await;
//! ```

pub mod interpolation;
pub mod lifecycle;
pub mod model;
pub mod partition;
pub mod pluralize;
pub mod processing;
pub mod registry;
pub mod resource;
pub mod storage;
pub mod upload;

pub use interpolation::{handle_backslashes, Interpolator, Subject};
pub use lifecycle::{AttachmentError, AttachmentResult, Stapler};
pub use model::{
    Attachable, AttachmentMetadata, DimensionSpec, Model, PendingUpload, PendingUploads,
    RawAttachment, Style, ORIGINAL_STYLE, UPLOADED_AT_FORMAT,
};
pub use partition::{id_partition, locate_boundary, record_directory};
pub use pluralize::{EnglishPluralizer, Pluralizer};
#[cfg(feature = "image")]
pub use processing::ImageResizer;
pub use processing::{ImageProcessor, ProcessingError};
pub use registry::{
    AttachedType, AttachmentDefinition, AttachmentOptions, Hook, Registry, DEFAULT_MISSING_URL,
    DEFAULT_URL,
};
pub use resource::{ResourceKind, ResourceResolver};
pub use storage::{Filesystem, LocalFilesystem, StorageError, StorageResult};
pub use upload::{
    arrange_files, ParallelUpload, TempDirVerifier, UploadDescriptor, UploadError, UploadVerifier,
};
