//! Attachment lifecycle
//!
//! [`Stapler`] is the engine the host's record layer calls into:
//!
//! - `before_save` inspects each attachment attribute, fills the metadata
//!   columns and stages the upload (or the removal) on the record.
//! - `after_save` commits staged work: every style of a new upload is written
//!   to disk, removed attachments lose their record directory.
//! - `after_delete` removes every attachment's record directory.
//!
//! Hooks run to completion before they return and take no locks. Saves and
//! deletes of the same record id must not run concurrently: one writer's
//! directory cleanup can remove files another writer just stored.
//!
//! A failed style write aborts the commit. Styles and attachments already
//! written stay on disk; nothing is rolled back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stapler_core::{Record, StaplerConfig, ValidationErrors};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::interpolation::{Interpolator, Subject};
use crate::model::{AttachmentMetadata, Attachable, PendingUpload, RawAttachment, Style};
use crate::partition::record_directory;
use crate::pluralize::{EnglishPluralizer, Pluralizer};
use crate::processing::{ImageProcessor, ProcessingError, SNIFF_LEN};
use crate::registry::{AttachmentDefinition, AttachmentOptions, Hook, Registry};
use crate::resource::{ResourceKind, ResourceResolver};
use crate::storage::{Filesystem, LocalFilesystem, StorageError};
use crate::upload::{TempDirVerifier, UploadDescriptor, UploadVerifier};

/// Engine errors
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Unknown attachment {attachment} on {class_name}")]
    UnknownAttachment {
        class_name: String,
        attachment: String,
    },
    #[error("No attachments registered for {0}")]
    UnknownRecordType(String),
    #[error("File upload hijacking detected: {} is not a genuine upload for {attachment}", path.display())]
    UploadHijacked { attachment: String, path: PathBuf },
    #[error("Failed to save style {style} of {attachment}: {source}")]
    SaveFailed {
        attachment: String,
        style: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Invalid definition for {attachment}: {errors}")]
    InvalidDefinition {
        attachment: String,
        errors: ValidationErrors,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

fn save_failed(
    definition: &AttachmentDefinition,
    style: &Style,
    source: impl std::error::Error + Send + Sync + 'static,
) -> AttachmentError {
    AttachmentError::SaveFailed {
        attachment: definition.name.clone(),
        style: style.name.clone(),
        source: Box::new(source),
    }
}

/// The attachment engine
pub struct Stapler {
    config: StaplerConfig,
    registry: Registry,
    filesystem: Arc<dyn Filesystem>,
    verifier: Arc<dyn UploadVerifier>,
    processor: Option<Arc<dyn ImageProcessor>>,
    pluralizer: Arc<dyn Pluralizer>,
    resources: ResourceResolver,
}

impl Stapler {
    /// Create an engine writing below the configured public root
    pub fn new(config: StaplerConfig) -> Self {
        let filesystem: Arc<dyn Filesystem> = Arc::new(LocalFilesystem::new(config.public_root()));
        let verifier: Arc<dyn UploadVerifier> =
            Arc::new(TempDirVerifier::new(config.upload_tmp_dir.clone()));
        let pluralizer: Arc<dyn Pluralizer> = Arc::new(EnglishPluralizer);
        let processor = default_processor(&config);
        let resources = build_resources(&config, &pluralizer, &filesystem);

        Self {
            config,
            registry: Registry::new(),
            filesystem,
            verifier,
            processor,
            pluralizer,
            resources,
        }
    }

    pub fn with_filesystem(mut self, filesystem: Arc<dyn Filesystem>) -> Self {
        self.filesystem = filesystem;
        self.resources = build_resources(&self.config, &self.pluralizer, &self.filesystem);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn UploadVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Replace the image processor; `None` stores every style unprocessed
    pub fn with_processor(mut self, processor: Option<Arc<dyn ImageProcessor>>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_pluralizer(mut self, pluralizer: Arc<dyn Pluralizer>) -> Self {
        self.pluralizer = pluralizer;
        self.resources = build_resources(&self.config, &self.pluralizer, &self.filesystem);
        self
    }

    pub fn config(&self) -> &StaplerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Declare an attachment on a record type.
    ///
    /// Definition problems are logged, or rejected when
    /// `strict_definitions` is set. Declaring the same attachment again
    /// replaces the earlier definition.
    pub fn has_attached_file(
        &mut self,
        class_name: &str,
        attachment: &str,
        options: AttachmentOptions,
    ) -> AttachmentResult<&AttachmentDefinition> {
        let definition = AttachmentDefinition::new(attachment, options);
        let errors = definition.validate();

        if !errors.is_empty() {
            if self.config.strict_definitions {
                return Err(AttachmentError::InvalidDefinition {
                    attachment: attachment.to_string(),
                    errors,
                });
            }

            for message in errors.full_messages() {
                warn!(class = class_name, attachment, "Invalid attachment definition: {}", message);
            }
        }

        debug!(
            class = class_name,
            attachment,
            url = %definition.url,
            styles = definition.styles.len(),
            "Attachment registered"
        );

        self.registry.register(class_name, definition);
        self.registry
            .definition(class_name, attachment)
            .ok_or_else(|| AttachmentError::UnknownAttachment {
                class_name: class_name.to_string(),
                attachment: attachment.to_string(),
            })
    }

    /// Run one lifecycle hook for a record; a record type without
    /// attachments has no hooks and this does nothing
    pub async fn dispatch<R>(&self, hook: Hook, record: &mut R) -> AttachmentResult<()>
    where
        R: Attachable,
    {
        if !self.registry.hooks(record.class_name()).contains(&hook) {
            return Ok(());
        }

        match hook {
            Hook::BeforeSave => self.before_save(record),
            Hook::AfterSave => self.after_save(record).await,
            Hook::AfterDelete => self.after_delete(&*record).await,
        }
    }

    /// Pre-save hook: normalize attachment attributes into metadata columns.
    ///
    /// Every upload is verified before the record is touched, so a forged
    /// upload leaves all attachment attributes and pending work as they were.
    #[instrument(skip(self, record), fields(class = %record.class_name(), id = ?record.id()))]
    pub fn before_save<R>(&self, record: &mut R) -> AttachmentResult<()>
    where
        R: Attachable,
    {
        let class_name = record.class_name().to_string();
        let definitions = self.registry.definitions(&class_name);

        for definition in definitions {
            let name = definition.name.as_str();
            if let RawAttachment::Upload(upload) = RawAttachment::from_attribute(record.attribute(name)) {
                if !self.verifier.is_uploaded_file(&upload.temp_location) {
                    return Err(AttachmentError::UploadHijacked {
                        attachment: name.to_string(),
                        path: upload.temp_location,
                    });
                }
            }
        }

        for definition in definitions {
            let name = definition.name.as_str();

            match RawAttachment::from_attribute(record.attribute(name)) {
                RawAttachment::Absent => continue,
                RawAttachment::Remove => {
                    let previous = AttachmentMetadata::from_record(&*record, name);
                    record.fill_raw(AttachmentMetadata::default().to_attributes(name));
                    record
                        .pending_uploads_mut()
                        .insert(name, PendingUpload::Removal { previous });
                    debug!(attachment = name, "Attachment marked for removal");
                }
                RawAttachment::Upload(upload) => {
                    let metadata = AttachmentMetadata::from_upload(&upload);
                    record.fill_raw(metadata.to_attributes(name));
                    debug!(attachment = name, file_name = %upload.name, "Upload staged");
                    record
                        .pending_uploads_mut()
                        .insert(name, PendingUpload::Staged(upload));
                }
                RawAttachment::Malformed { error_code } => {
                    debug!(
                        attachment = name,
                        ?error_code,
                        "Ignoring unusable upload, stored attachment kept"
                    );
                }
            }

            record.remove_attribute(name);
        }

        Ok(())
    }

    /// Post-save hook: write staged uploads and drop removed attachments
    #[instrument(skip(self, record), fields(class = %record.class_name(), id = ?record.id()))]
    pub async fn after_save<R>(&self, record: &mut R) -> AttachmentResult<()>
    where
        R: Attachable,
    {
        let mut pending = std::mem::take(record.pending_uploads_mut());
        let record: &R = record;

        for definition in self.registry.definitions(record.class_name()) {
            match pending.take(&definition.name) {
                Some(PendingUpload::Removal { previous }) => {
                    if let Err(e) = self.remove_directory(record, definition).await {
                        warn!(
                            attachment = %definition.name,
                            file_name = ?previous.file_name,
                            error = %e,
                            "Failed to remove attachment directory"
                        );
                    } else {
                        info!(
                            attachment = %definition.name,
                            file_name = ?previous.file_name,
                            "Attachment removed"
                        );
                    }
                }
                Some(PendingUpload::Staged(upload)) => {
                    self.write_styles(record, definition, &upload).await?;
                    info!(
                        attachment = %definition.name,
                        file_name = %upload.name,
                        styles = definition.styles.len(),
                        "Attachment stored"
                    );
                }
                None => {}
            }
        }

        Ok(())
    }

    /// Post-delete hook: remove every attachment's record directory
    #[instrument(skip(self, record), fields(class = %record.class_name(), id = ?record.id()))]
    pub async fn after_delete<R>(&self, record: &R) -> AttachmentResult<()>
    where
        R: Record,
    {
        for definition in self.registry.definitions(record.class_name()) {
            self.remove_directory(record, definition).await?;
        }

        info!("Attachment files deleted");
        Ok(())
    }

    /// Public URL of a stored style, without an existence check
    pub fn url(&self, record: &dyn Record, attachment: &str, style: &str) -> AttachmentResult<String> {
        let definition = self.definition_for(record, attachment)?;
        Ok(self.resources.url(&subject(definition, style, record)))
    }

    /// Filesystem path of a stored style, without an existence check
    pub fn path(&self, record: &dyn Record, attachment: &str, style: &str) -> AttachmentResult<String> {
        let definition = self.definition_for(record, attachment)?;
        Ok(self.resources.path(&subject(definition, style, record)))
    }

    pub fn default_url(
        &self,
        record: &dyn Record,
        attachment: &str,
        style: &str,
    ) -> AttachmentResult<String> {
        let definition = self.definition_for(record, attachment)?;
        Ok(self.resources.default_url(&subject(definition, style, record)))
    }

    pub fn default_path(
        &self,
        record: &dyn Record,
        attachment: &str,
        style: &str,
    ) -> AttachmentResult<String> {
        let definition = self.definition_for(record, attachment)?;
        Ok(self.resources.default_path(&subject(definition, style, record)))
    }

    /// The stored resource if its file exists, else the default one
    pub async fn resolve_resource(
        &self,
        kind: ResourceKind,
        record: &dyn Record,
        attachment: &str,
        style: &str,
    ) -> AttachmentResult<String> {
        let definition = self.definition_for(record, attachment)?;
        Ok(self
            .resources
            .resolve(kind, &subject(definition, style, record))
            .await)
    }

    /// Call a generated accessor such as `avatar_url` or `avatar_path`
    pub async fn call(
        &self,
        record: &dyn Record,
        method: &str,
        style: Option<&str>,
    ) -> Option<String> {
        let (definition, kind) = self
            .registry
            .attached_type(record.class_name())?
            .accessor(method)?;

        Some(
            self.resources
                .resolve(kind, &subject(definition, style.unwrap_or_default(), record))
                .await,
        )
    }

    fn definition_for(
        &self,
        record: &dyn Record,
        attachment: &str,
    ) -> AttachmentResult<&AttachmentDefinition> {
        let class_name = record.class_name();

        if !self.registry.is_registered(class_name) {
            return Err(AttachmentError::UnknownRecordType(class_name.to_string()));
        }

        self.registry
            .definition(class_name, attachment)
            .ok_or_else(|| AttachmentError::UnknownAttachment {
                class_name: class_name.to_string(),
                attachment: attachment.to_string(),
            })
    }

    /// Remove the record's subtree for one attachment
    async fn remove_directory<R>(
        &self,
        record: &R,
        definition: &AttachmentDefinition,
    ) -> AttachmentResult<()>
    where
        R: Record,
    {
        // Only the URL part is searched; the public root may contain the id too
        let url = self.resources.url(&subject(definition, "", record));
        let id = record.id();

        match record_directory(&url, id.as_ref()) {
            Some(directory) => {
                let directory = format!("{}{}", self.resources.public_root(), directory);
                self.filesystem.remove_dir_all(Path::new(&directory)).await?;
                debug!(attachment = %definition.name, directory = %directory, "Record directory removed");
            }
            None => {
                warn!(
                    attachment = %definition.name,
                    url = %url,
                    "No record directory in attachment url, nothing removed"
                );
            }
        }

        Ok(())
    }

    /// Write every style of a staged upload, in declaration order
    async fn write_styles<R>(
        &self,
        record: &R,
        definition: &AttachmentDefinition,
        upload: &UploadDescriptor,
    ) -> AttachmentResult<()>
    where
        R: Record,
    {
        let source = upload.temp_location.as_path();
        let processor = self.active_processor(source).await;

        let relocates = |style: &Style| processor.is_none() || style.is_passthrough();

        // The upload can only be moved by a relocated style with no processed
        // style after it; every other relocation copies it
        let last_relocation = match definition.styles.last() {
            Some(style) if relocates(style) => Some(definition.styles.len() - 1),
            _ => None,
        };

        for (index, style) in definition.styles.iter().enumerate() {
            let path = PathBuf::from(self.resources.path(&subject(definition, &style.name, record)));
            let directory = path.parent().unwrap_or(Path::new("/"));

            self.filesystem
                .create_dir_all(directory)
                .await
                .map_err(|e| save_failed(definition, style, e))?;

            if !definition.keep_old_files {
                self.filesystem
                    .empty_dir(directory)
                    .await
                    .map_err(|e| save_failed(definition, style, e))?;
            }

            match processor {
                Some(processor) if !style.is_passthrough() => {
                    let spec = style
                        .dimension_spec()
                        .map_err(|e| save_failed(definition, style, e))?;
                    processor
                        .process(source, &path, &spec)
                        .await
                        .map_err(|e| save_failed(definition, style, e))?;
                }
                _ if Some(index) == last_relocation => {
                    self.filesystem
                        .move_file(source, &path)
                        .await
                        .map_err(|e| save_failed(definition, style, e))?;
                }
                _ => {
                    self.filesystem
                        .copy_file(source, &path)
                        .await
                        .map_err(|e| save_failed(definition, style, e))?;
                }
            }

            debug!(attachment = %definition.name, style = %style.name, path = ?path, "Style written");
        }

        if last_relocation.is_none() {
            discard_upload(source).await;
        }

        Ok(())
    }

    /// The image processor, if one is configured and accepts the upload
    async fn active_processor(&self, source: &Path) -> Option<&dyn ImageProcessor> {
        if !self.config.image_processing {
            return None;
        }

        let processor = self.processor.as_deref()?;

        match self.filesystem.read_prefix(source, SNIFF_LEN).await {
            Ok(head) if processor.accepts(&head) => Some(processor),
            Ok(_) => None,
            Err(e) => {
                debug!(path = ?source, error = %e, "Could not sniff upload, storing unprocessed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Stapler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stapler")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("filesystem", &self.filesystem.name())
            .field("image_processing", &self.processor.is_some())
            .finish()
    }
}

fn subject<'a>(definition: &'a AttachmentDefinition, style: &'a str, record: &'a dyn Record) -> Subject<'a> {
    Subject {
        definition,
        style,
        record,
    }
}

/// Remove an upload that every style copied or processed
async fn discard_upload(source: &Path) {
    match tokio::fs::remove_file(source).await {
        Ok(()) => debug!(path = ?source, "Upload discarded"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?source, error = %e, "Failed to discard upload"),
    }
}

fn build_resources(
    config: &StaplerConfig,
    pluralizer: &Arc<dyn Pluralizer>,
    filesystem: &Arc<dyn Filesystem>,
) -> ResourceResolver {
    ResourceResolver::new(
        Interpolator::new(config.app_root_str(), pluralizer.clone()),
        config.public_root(),
        filesystem.clone(),
    )
}

#[cfg(feature = "image")]
fn default_processor(config: &StaplerConfig) -> Option<Arc<dyn ImageProcessor>> {
    config
        .image_processing
        .then(|| Arc::new(crate::processing::ImageResizer::new()) as Arc<dyn ImageProcessor>)
}

#[cfg(not(feature = "image"))]
fn default_processor(_config: &StaplerConfig) -> Option<Arc<dyn ImageProcessor>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        app: TempDir,
        uploads: TempDir,
        stapler: Stapler,
    }

    impl Fixture {
        fn new(options: AttachmentOptions) -> Self {
            let app = tempdir().unwrap();
            let uploads = tempdir().unwrap();
            let config = StaplerConfig {
                app_root: app.path().to_path_buf(),
                upload_tmp_dir: uploads.path().to_path_buf(),
                ..StaplerConfig::default()
            };

            let mut stapler = Stapler::new(config);
            stapler.has_attached_file("User", "avatar", options).unwrap();

            Self {
                app,
                uploads,
                stapler,
            }
        }

        fn stage(&self, name: &str, bytes: &[u8]) -> UploadDescriptor {
            let temp = self.uploads.path().join(format!("php_{}", name));
            std::fs::write(&temp, bytes).unwrap();
            UploadDescriptor::new(name, "text/plain", temp, bytes.len() as u64)
        }

        fn stored(&self, relative: &str) -> PathBuf {
            self.app.path().join("public").join(relative)
        }

        async fn save(&self, record: &mut Model) -> AttachmentResult<()> {
            self.stapler.dispatch(Hook::BeforeSave, record).await?;
            self.stapler.dispatch(Hook::AfterSave, record).await
        }
    }

    fn thumb_options() -> AttachmentOptions {
        AttachmentOptions::new().style("thumb", "10x10#")
    }

    #[tokio::test]
    async fn test_save_stores_every_style() {
        let fixture = Fixture::new(thumb_options());
        let upload = fixture.stage("notes.txt", b"hello");
        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &upload);

        fixture.save(&mut user).await.unwrap();

        for style in ["thumb", "original"] {
            let stored = fixture.stored(&format!("system/User/avatars/000/000/001/{}/notes.txt", style));
            assert_eq!(std::fs::read(&stored).unwrap(), b"hello", "style: {}", style);
        }

        assert!(!upload.temp_location.exists());
        assert!(!user.has_attribute("avatar"));
        assert!(user.pending_uploads().is_empty());
        assert_eq!(user.get("avatar_file_name"), Some(&json!("notes.txt")));
        assert_eq!(user.get("avatar_file_size"), Some(&json!(5)));
        assert_eq!(user.get("avatar_content_type"), Some(&json!("text/plain")));
        assert!(user.get("avatar_uploaded_at").and_then(Value::as_str).is_some());
    }

    #[cfg(feature = "image")]
    #[tokio::test]
    async fn test_image_styles_are_resized() {
        use image::GenericImageView;

        let fixture = Fixture::new(thumb_options());
        let temp = fixture.uploads.path().join("php_image");
        image::RgbImage::from_pixel(40, 20, image::Rgb([0, 0, 255]))
            .save_with_format(&temp, image::ImageFormat::Png)
            .unwrap();
        let upload = UploadDescriptor::new("photo.png", "image/png", &temp, 100);

        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &upload);
        fixture.save(&mut user).await.unwrap();

        let thumb = image::open(fixture.stored("system/User/avatars/000/000/001/thumb/photo.png")).unwrap();
        assert_eq!(thumb.dimensions(), (10, 10));

        let original =
            image::open(fixture.stored("system/User/avatars/000/000/001/original/photo.png")).unwrap();
        assert_eq!(original.dimensions(), (40, 20));
    }

    #[cfg(feature = "image")]
    #[tokio::test]
    async fn test_original_declared_before_resized_style() {
        use image::GenericImageView;

        let fixture = Fixture::new(
            AttachmentOptions::new()
                .style("original", "")
                .style("thumb", "10x10#"),
        );
        let temp = fixture.uploads.path().join("php_image");
        image::RgbImage::from_pixel(40, 20, image::Rgb([255, 0, 0]))
            .save_with_format(&temp, image::ImageFormat::Png)
            .unwrap();
        let upload = UploadDescriptor::new("photo.png", "image/png", &temp, 100);

        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &upload);
        fixture.save(&mut user).await.unwrap();

        let original =
            image::open(fixture.stored("system/User/avatars/000/000/001/original/photo.png")).unwrap();
        assert_eq!(original.dimensions(), (40, 20));

        let thumb = image::open(fixture.stored("system/User/avatars/000/000/001/thumb/photo.png")).unwrap();
        assert_eq!(thumb.dimensions(), (10, 10));

        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_forged_upload_leaves_other_attachments_unstaged() {
        let mut fixture = Fixture::new(thumb_options());
        fixture
            .stapler
            .has_attached_file("User", "resume", AttachmentOptions::new())
            .unwrap();

        let elsewhere = tempdir().unwrap();
        let forged = elsewhere.path().join("passwd");
        std::fs::write(&forged, b"root:x:0:0").unwrap();

        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &fixture.stage("notes.txt", b"hello"));
        user.attach("resume", &UploadDescriptor::new("passwd", "text/plain", &forged, 10));

        let result = fixture.stapler.before_save(&mut user);
        assert!(matches!(
            result,
            Err(AttachmentError::UploadHijacked { ref attachment, .. }) if attachment == "resume"
        ));
        assert!(user.has_attribute("avatar"));
        assert!(user.has_attribute("resume"));
        assert!(user.get("avatar_file_name").is_none());
        assert!(user.pending_uploads().is_empty());

        user.remove_attribute("resume");
        fixture.save(&mut user).await.unwrap();
        assert!(fixture
            .stored("system/User/avatars/000/000/001/original/notes.txt")
            .exists());
        assert!(!fixture.stored("system/User/resumes").exists());
    }

    #[tokio::test]
    async fn test_forged_upload_is_rejected() {
        let fixture = Fixture::new(thumb_options());
        let elsewhere = tempdir().unwrap();
        let forged = elsewhere.path().join("passwd");
        std::fs::write(&forged, b"root:x:0:0").unwrap();

        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &UploadDescriptor::new("passwd", "text/plain", &forged, 10));

        let result = fixture.save(&mut user).await;
        assert!(matches!(result, Err(AttachmentError::UploadHijacked { .. })));
        assert!(user.get("avatar_file_name").is_none());
        assert!(forged.exists());
    }

    #[tokio::test]
    async fn test_failed_upload_is_ignored() {
        let fixture = Fixture::new(thumb_options());
        let mut user = Model::new("User").with_id(1);
        user.set("avatar_file_name", "kept.txt");
        user.attach(
            "avatar",
            &UploadDescriptor::new("big.txt", "text/plain", "", 0).with_error(1),
        );

        fixture.save(&mut user).await.unwrap();

        assert_eq!(user.get("avatar_file_name"), Some(&json!("kept.txt")));
        assert!(!user.has_attribute("avatar"));
        assert!(!fixture.stored("system").exists());
    }

    #[tokio::test]
    async fn test_removal_clears_metadata_and_directory() {
        let fixture = Fixture::new(thumb_options());
        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &fixture.stage("notes.txt", b"hello"));
        fixture.save(&mut user).await.unwrap();

        let record_dir = fixture.stored("system/User/avatars/000/000/001");
        assert!(record_dir.is_dir());

        user.detach("avatar");
        fixture.stapler.before_save(&mut user).unwrap();

        for column in AttachmentMetadata::columns("avatar") {
            assert_eq!(user.get(&column), Some(&Value::Null), "column: {}", column);
        }
        assert!(matches!(
            user.pending_uploads().get("avatar"),
            Some(PendingUpload::Removal { previous }) if previous.file_name.as_deref() == Some("notes.txt")
        ));

        fixture.stapler.after_save(&mut user).await.unwrap();
        assert!(!record_dir.exists());
        assert!(fixture.stored("system/User/avatars").is_dir());
    }

    #[tokio::test]
    async fn test_old_files_are_replaced() {
        let fixture = Fixture::new(thumb_options());
        let mut user = Model::new("User").with_id(1);

        user.attach("avatar", &fixture.stage("first.txt", b"1"));
        fixture.save(&mut user).await.unwrap();
        user.attach("avatar", &fixture.stage("second.txt", b"2"));
        fixture.save(&mut user).await.unwrap();

        let original = fixture.stored("system/User/avatars/000/000/001/original");
        assert!(!original.join("first.txt").exists());
        assert!(original.join("second.txt").exists());
    }

    #[tokio::test]
    async fn test_keep_old_files() {
        let fixture = Fixture::new(thumb_options().keep_old_files(true));
        let mut user = Model::new("User").with_id(1);

        user.attach("avatar", &fixture.stage("first.txt", b"1"));
        fixture.save(&mut user).await.unwrap();
        user.attach("avatar", &fixture.stage("second.txt", b"2"));
        fixture.save(&mut user).await.unwrap();

        let original = fixture.stored("system/User/avatars/000/000/001/original");
        assert!(original.join("first.txt").exists());
        assert!(original.join("second.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let fixture = Fixture::new(thumb_options());
        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &fixture.stage("notes.txt", b"hello"));
        fixture.save(&mut user).await.unwrap();

        let mut neighbour = Model::new("User").with_id(2);
        neighbour.attach("avatar", &fixture.stage("other.txt", b"hi"));
        fixture.save(&mut neighbour).await.unwrap();

        fixture.stapler.dispatch(Hook::AfterDelete, &mut user).await.unwrap();
        fixture.stapler.dispatch(Hook::AfterDelete, &mut user).await.unwrap();

        assert!(!fixture.stored("system/User/avatars/000/000/001").exists());
        assert!(fixture
            .stored("system/User/avatars/000/000/002/original/other.txt")
            .exists());
    }

    #[tokio::test]
    async fn test_delete_when_app_root_contains_the_id() {
        let base = tempdir().unwrap();
        let uploads = tempdir().unwrap();
        let app_root = base.path().join("7");
        std::fs::create_dir(&app_root).unwrap();

        let config = StaplerConfig {
            app_root: app_root.clone(),
            upload_tmp_dir: uploads.path().to_path_buf(),
            ..StaplerConfig::default()
        };
        let mut stapler = Stapler::new(config);
        stapler
            .has_attached_file(
                "User",
                "avatar",
                AttachmentOptions::new().url("/system/:attachment/:id/:style/:filename"),
            )
            .unwrap();

        let temp = uploads.path().join("php_notes");
        std::fs::write(&temp, b"hello").unwrap();
        let mut user = Model::new("User").with_id(7);
        user.attach("avatar", &UploadDescriptor::new("notes.txt", "text/plain", &temp, 5));
        stapler.dispatch(Hook::BeforeSave, &mut user).await.unwrap();
        stapler.dispatch(Hook::AfterSave, &mut user).await.unwrap();

        let record_dir = app_root.join("public/system/avatars/7");
        assert!(record_dir.join("original/notes.txt").exists());

        stapler.dispatch(Hook::AfterDelete, &mut user).await.unwrap();
        assert!(!record_dir.exists());
        assert!(app_root.join("public/system/avatars").is_dir());
    }

    #[tokio::test]
    async fn test_unregistered_type_is_untouched() {
        let fixture = Fixture::new(thumb_options());
        let mut post = Model::new("Post").with_id(1);
        post.set("avatar", json!({"name": "x"}));

        for hook in Hook::ALL {
            fixture.stapler.dispatch(hook, &mut post).await.unwrap();
        }

        assert!(post.has_attribute("avatar"));
        assert!(matches!(
            fixture.stapler.url(&post, "avatar", ""),
            Err(AttachmentError::UnknownRecordType(_))
        ));
        assert!(fixture.stapler.call(&post, "avatar_url", None).await.is_none());
    }

    #[tokio::test]
    async fn test_accessors() {
        let fixture = Fixture::new(thumb_options());
        let mut user = Model::new("User").with_id(1);

        assert_eq!(
            fixture.stapler.call(&user, "avatar_url", Some("thumb")).await.as_deref(),
            Some("/avatars/thumb/missing.png")
        );
        assert!(fixture.stapler.call(&user, "avatar_size", None).await.is_none());
        assert!(matches!(
            fixture.stapler.path(&user, "resume", ""),
            Err(AttachmentError::UnknownAttachment { .. })
        ));

        user.attach("avatar", &fixture.stage("notes.txt", b"hello"));
        fixture.save(&mut user).await.unwrap();

        assert_eq!(
            fixture.stapler.call(&user, "avatar_url", Some("thumb")).await.as_deref(),
            Some("/system/User/avatars/000/000/001/thumb/notes.txt")
        );
        assert_eq!(
            fixture.stapler.call(&user, "avatar_path", None).await,
            Some(
                fixture
                    .stored("system/User/avatars/000/000/001/original/notes.txt")
                    .display()
                    .to_string()
            )
        );
    }

    #[test]
    fn test_strict_definitions() {
        let config = StaplerConfig {
            strict_definitions: true,
            ..StaplerConfig::with_app_root("/srv/app")
        };
        let mut stapler = Stapler::new(config);

        let result = stapler.has_attached_file(
            "User",
            "avatar",
            AttachmentOptions::new().url("/uploads/:filename"),
        );
        assert!(matches!(result, Err(AttachmentError::InvalidDefinition { .. })));
        assert!(!stapler.registry().is_registered("User"));

        let mut lenient = Stapler::new(StaplerConfig::with_app_root("/srv/app"));
        lenient
            .has_attached_file("User", "avatar", AttachmentOptions::new().url("/uploads/:filename"))
            .unwrap();
        assert!(lenient.registry().is_registered("User"));
    }

    struct FailingProcessor;

    #[async_trait]
    impl ImageProcessor for FailingProcessor {
        fn accepts(&self, _head: &[u8]) -> bool {
            true
        }

        async fn process(
            &self,
            _source: &Path,
            _target: &Path,
            _spec: &crate::model::DimensionSpec,
        ) -> Result<(), ProcessingError> {
            Err(ProcessingError::Encode("encoder unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_processing_failure_names_the_style() {
        let fixture = Fixture::new(thumb_options());
        let mut stapler = Stapler::new(fixture.stapler.config().clone())
            .with_processor(Some(Arc::new(FailingProcessor)));
        stapler
            .has_attached_file("User", "avatar", thumb_options())
            .unwrap();

        let mut user = Model::new("User").with_id(1);
        user.attach("avatar", &fixture.stage("photo.png", b"not really"));
        stapler.before_save(&mut user).unwrap();

        match stapler.after_save(&mut user).await {
            Err(AttachmentError::SaveFailed { attachment, style, .. }) => {
                assert_eq!(attachment, "avatar");
                assert_eq!(style, "thumb");
            }
            other => panic!("expected a save failure, got {:?}", other),
        }

        // Nothing was rolled back or retried; the original was never written
        assert!(!fixture
            .stored("system/User/avatars/000/000/001/original/photo.png")
            .exists());
        assert!(user.pending_uploads().is_empty());
    }
}
