//! Attachment Model
//!
//! Styles and their dimension specs, the metadata columns persisted on a
//! record, and the per-save-cycle state the lifecycle hooks pass between
//! each other.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stapler_core::{Record, RecordId};

use crate::processing::ProcessingError;
use crate::upload::UploadDescriptor;

/// Name of the style every attachment carries
pub const ORIGINAL_STYLE: &str = "original";

/// Format of the `{attachment}_uploaded_at` column
pub const UPLOADED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A named rendition of an attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub name: String,
    /// Raw dimension spec (`100x100#`, `300`, `x200`, ... or empty)
    pub dimensions: String,
}

impl Style {
    pub fn new(name: impl Into<String>, dimensions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions: dimensions.into(),
        }
    }

    pub fn original() -> Self {
        Self::new(ORIGINAL_STYLE, "")
    }

    /// Whether this style stores the upload unchanged
    pub fn is_passthrough(&self) -> bool {
        self.dimensions.trim().is_empty()
    }

    pub fn dimension_spec(&self) -> Result<DimensionSpec, ProcessingError> {
        DimensionSpec::parse(&self.dimensions)
    }
}

/// Parsed resize instruction of a style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSpec {
    /// No resize
    Original,
    /// `300`: width given, height follows the aspect ratio
    Width(u32),
    /// `x200`: height given, width follows the aspect ratio
    Height(u32),
    /// `300x200`: fit inside the box
    Auto(u32, u32),
    /// `300x200#`: resize to fill, then crop
    Crop(u32, u32),
    /// `300x200!`: exact size, aspect ratio ignored
    Exact(u32, u32),
}

impl DimensionSpec {
    pub fn parse(spec: &str) -> Result<Self, ProcessingError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::Original);
        }

        let Some((width, height)) = spec.split_once('x') else {
            return Ok(Self::Width(parse_dimension(spec, spec)?));
        };

        if width.is_empty() {
            let height = height.trim_end_matches(['#', '!']);
            return Ok(Self::Height(parse_dimension(spec, height)?));
        }

        let width = parse_dimension(spec, width)?;
        if let Some(height) = height.strip_suffix('#') {
            Ok(Self::Crop(width, parse_dimension(spec, height)?))
        } else if let Some(height) = height.strip_suffix('!') {
            Ok(Self::Exact(width, parse_dimension(spec, height)?))
        } else {
            Ok(Self::Auto(width, parse_dimension(spec, height)?))
        }
    }
}

fn parse_dimension(spec: &str, value: &str) -> Result<u32, ProcessingError> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ProcessingError::InvalidDimensions(spec.to_string())),
    }
}

impl fmt::Display for DimensionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => Ok(()),
            Self::Width(w) => write!(f, "{}", w),
            Self::Height(h) => write!(f, "x{}", h),
            Self::Auto(w, h) => write!(f, "{}x{}", w, h),
            Self::Crop(w, h) => write!(f, "{}x{}#", w, h),
            Self::Exact(w, h) => write!(f, "{}x{}!", w, h),
        }
    }
}

/// The four metadata columns persisted for an attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub content_type: Option<String>,
    pub uploaded_at: Option<NaiveDateTime>,
}

impl AttachmentMetadata {
    /// Metadata for a freshly staged upload
    pub fn from_upload(upload: &UploadDescriptor) -> Self {
        let content_type = if upload.mime_type.is_empty() {
            mime_guess::from_path(&upload.name)
                .first_or_octet_stream()
                .to_string()
        } else {
            upload.mime_type.clone()
        };

        Self {
            file_name: Some(upload.name.clone()),
            file_size: Some(upload.size),
            content_type: Some(content_type),
            uploaded_at: Some(Utc::now().naive_utc()),
        }
    }

    /// Column names: `{attachment}_file_name`, `_file_size`, `_content_type`, `_uploaded_at`
    pub fn columns(attachment: &str) -> [String; 4] {
        [
            format!("{}_file_name", attachment),
            format!("{}_file_size", attachment),
            format!("{}_content_type", attachment),
            format!("{}_uploaded_at", attachment),
        ]
    }

    /// Read the columns back from a record
    pub fn from_record(record: &dyn Record, attachment: &str) -> Self {
        let [name, size, content_type, uploaded_at] = Self::columns(attachment);

        let string = |column: &str| {
            record
                .attribute(column)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let file_size = record.attribute(&size).and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

        let uploaded_at = string(&uploaded_at)
            .and_then(|s| NaiveDateTime::parse_from_str(&s, UPLOADED_AT_FORMAT).ok());

        Self {
            file_name: string(&name),
            file_size,
            content_type: string(&content_type),
            uploaded_at,
        }
    }

    /// Attribute pairs to write onto a record
    pub fn to_attributes(&self, attachment: &str) -> Vec<(String, Value)> {
        let [name, size, content_type, uploaded_at] = Self::columns(attachment);
        vec![
            (name, self.file_name.clone().map_or(Value::Null, Value::String)),
            (size, self.file_size.map_or(Value::Null, Value::from)),
            (
                content_type,
                self.content_type.clone().map_or(Value::Null, Value::String),
            ),
            (
                uploaded_at,
                self.uploaded_at.map_or(Value::Null, |t| {
                    Value::String(t.format(UPLOADED_AT_FORMAT).to_string())
                }),
            ),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.file_name.is_none()
    }
}

/// The raw attachment attribute as the host assigned it
#[derive(Debug, Clone, PartialEq)]
pub enum RawAttachment {
    /// Attribute not set: leave the attachment alone
    Absent,
    /// Explicit null: remove the attachment
    Remove,
    /// A well-formed upload with a zero error code
    Upload(UploadDescriptor),
    /// Anything else, including uploads that reported an error
    Malformed { error_code: Option<i64> },
}

impl RawAttachment {
    pub fn from_attribute(value: Option<&Value>) -> Self {
        match value {
            None => Self::Absent,
            Some(Value::Null) => Self::Remove,
            Some(value) => match serde_json::from_value::<UploadDescriptor>(value.clone()) {
                Ok(upload) if upload.error_code == 0 => Self::Upload(upload),
                Ok(upload) => Self::Malformed {
                    error_code: Some(upload.error_code),
                },
                Err(_) => Self::Malformed { error_code: None },
            },
        }
    }
}

/// Work staged by the pre-save hook for the post-save commit
#[derive(Debug, Clone, PartialEq)]
pub enum PendingUpload {
    /// The attachment was removed; its directory is deleted on commit
    Removal { previous: AttachmentMetadata },
    /// A new upload waiting to be written for every style
    Staged(UploadDescriptor),
}

/// Pending uploads of one record, at most one per attachment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingUploads {
    entries: HashMap<String, PendingUpload>,
}

impl PendingUploads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attachment: impl Into<String>, pending: PendingUpload) {
        self.entries.insert(attachment.into(), pending);
    }

    pub fn get(&self, attachment: &str) -> Option<&PendingUpload> {
        self.entries.get(attachment)
    }

    pub fn take(&mut self, attachment: &str) -> Option<PendingUpload> {
        self.entries.remove(attachment)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A record that can hold attachments between the save hooks
pub trait Attachable: Record {
    fn pending_uploads(&self) -> &PendingUploads;
    fn pending_uploads_mut(&mut self) -> &mut PendingUploads;
}

/// A dynamic record: type name, key, and an attribute map.
///
/// Hosts with their own ORM implement [`Attachable`] on their types instead.
#[derive(Debug, Clone, Default)]
pub struct Model {
    class_name: String,
    id: Option<RecordId>,
    attributes: HashMap<String, Value>,
    pending: PendingUploads,
}

impl Model {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn set_id(&mut self, id: impl Into<RecordId>) {
        self.id = Some(id.into());
    }

    /// Set an attribute
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Assign an upload to an attachment attribute
    pub fn attach(&mut self, attachment: impl Into<String>, upload: &UploadDescriptor) {
        self.set(attachment, upload.to_value());
    }

    /// Mark an attachment for removal on the next save
    pub fn detach(&mut self, attachment: impl Into<String>) {
        self.set(attachment, Value::Null);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

impl Record for Model {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn id(&self) -> Option<RecordId> {
        self.id.clone()
    }

    fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    fn fill_raw(&mut self, attributes: Vec<(String, Value)>) {
        self.attributes.extend(attributes);
    }
}

impl Attachable for Model {
    fn pending_uploads(&self) -> &PendingUploads {
        &self.pending
    }

    fn pending_uploads_mut(&mut self) -> &mut PendingUploads {
        &mut self.pending
    }
}
