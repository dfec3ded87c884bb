//! Resource resolution
//!
//! Turns a definition's templates into URLs and filesystem paths, and picks
//! the default (placeholder) resource when the stored file is missing.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::interpolation::{Interpolator, Subject};
use crate::storage::Filesystem;

/// Which form of a resource to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Path,
    Url,
}

/// Builds URLs and paths for attachments
#[derive(Clone)]
pub struct ResourceResolver {
    interpolator: Interpolator,
    public_root: String,
    filesystem: Arc<dyn Filesystem>,
}

impl ResourceResolver {
    pub fn new(
        interpolator: Interpolator,
        public_root: impl Into<String>,
        filesystem: Arc<dyn Filesystem>,
    ) -> Self {
        Self {
            interpolator,
            public_root: public_root.into().trim_end_matches('/').to_string(),
            filesystem,
        }
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    pub fn public_root(&self) -> &str {
        &self.public_root
    }

    /// Public URL of the stored file
    pub fn url(&self, subject: &Subject<'_>) -> String {
        self.interpolator
            .interpolate(&subject.definition.url, subject)
    }

    /// Public URL of the placeholder shown when no file is stored
    pub fn default_url(&self, subject: &Subject<'_>) -> String {
        self.interpolator
            .interpolate(&subject.definition.default_url, subject)
    }

    /// Filesystem path of the stored file
    pub fn path(&self, subject: &Subject<'_>) -> String {
        format!("{}{}", self.public_root, self.url(subject))
    }

    /// Filesystem path of the placeholder
    pub fn default_path(&self, subject: &Subject<'_>) -> String {
        format!("{}{}", self.public_root, self.default_url(subject))
    }

    /// Resolve the stored resource, falling back to the default one.
    ///
    /// Existence is always probed on the filesystem path, whichever kind is
    /// asked for. The default is returned without checking that it exists.
    pub async fn resolve(&self, kind: ResourceKind, subject: &Subject<'_>) -> String {
        let path = self.path(subject);
        let exists = self.filesystem.exists(&PathBuf::from(&path)).await;

        debug!(
            attachment = %subject.definition.name,
            path = %path,
            exists,
            "Resolving attachment resource"
        );

        match (kind, exists) {
            (ResourceKind::Path, true) => path,
            (ResourceKind::Path, false) => self.default_path(subject),
            (ResourceKind::Url, true) => self.url(subject),
            (ResourceKind::Url, false) => self.default_url(subject),
        }
    }
}

impl std::fmt::Debug for ResourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceResolver")
            .field("public_root", &self.public_root)
            .field("filesystem", &self.filesystem.name())
            .finish()
    }
}
