//! Upload descriptors
//!
//! Uploads arrive in the conventional multipart shape
//! `{name, type, tmp_name, error, size}`. Several files posted under one
//! form field arrive as parallel arrays instead and are rearranged into one
//! descriptor per file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Upload payload errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Upload field {field} has {actual} entries, expected {expected}")]
    MismatchedFields {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// A single uploaded file as handed over by the upload source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDescriptor {
    /// Client-side file name
    pub name: String,
    /// Declared MIME type
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Where the upload source staged the bytes
    #[serde(rename = "tmp_name")]
    pub temp_location: PathBuf,
    /// Size in bytes
    #[serde(default, deserialize_with = "lenient_number")]
    pub size: u64,
    /// Upload source error code, zero on success
    #[serde(rename = "error", default, deserialize_with = "lenient_number")]
    pub error_code: i64,
}

impl UploadDescriptor {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        temp_location: impl Into<PathBuf>,
        size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            temp_location: temp_location.into(),
            size,
            error_code: 0,
        }
    }

    pub fn with_error(mut self, error_code: i64) -> Self {
        self.error_code = error_code;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }

    /// Wire shape of the descriptor, for assigning to a record attribute
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "type": self.mime_type,
            "tmp_name": self.temp_location.to_string_lossy(),
            "error": self.error_code,
            "size": self.size,
        })
    }
}

/// Multipart fields arrive as numbers or numeric strings depending on the source
fn lenient_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr + Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString<T> {
        Number(T),
        String(String),
    }

    match NumberOrString::<T>::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid number: {}", s))),
    }
}

/// Several files posted under one field: one array per descriptor field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelUpload {
    pub name: Vec<String>,
    #[serde(rename = "type")]
    pub mime_type: Vec<String>,
    pub tmp_name: Vec<PathBuf>,
    pub error: Vec<i64>,
    pub size: Vec<u64>,
}

/// Rearrange a parallel-array payload into one descriptor per file.
///
/// The `error` array decides how many files there are; every other array
/// must have an entry for each of them.
pub fn arrange_files(files: &ParallelUpload) -> Result<Vec<UploadDescriptor>, UploadError> {
    let expected = files.error.len();
    let lengths = [
        ("name", files.name.len()),
        ("type", files.mime_type.len()),
        ("tmp_name", files.tmp_name.len()),
        ("size", files.size.len()),
    ];

    if let Some((field, actual)) = lengths.into_iter().find(|(_, len)| *len < expected) {
        return Err(UploadError::MismatchedFields {
            field,
            expected,
            actual,
        });
    }

    Ok((0..expected)
        .map(|i| UploadDescriptor {
            name: files.name[i].clone(),
            mime_type: files.mime_type[i].clone(),
            temp_location: files.tmp_name[i].clone(),
            size: files.size[i],
            error_code: files.error[i],
        })
        .collect())
}

/// Decides whether a temp location really came from the upload channel
pub trait UploadVerifier: Send + Sync {
    fn is_uploaded_file(&self, path: &Path) -> bool;
}

/// Accepts regular files staged below one of the configured temp roots
#[derive(Debug, Clone)]
pub struct TempDirVerifier {
    roots: Vec<PathBuf>,
}

impl TempDirVerifier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }
}

impl UploadVerifier for TempDirVerifier {
    fn is_uploaded_file(&self, path: &Path) -> bool {
        let Ok(canonical) = path.canonicalize() else {
            return false;
        };

        if !canonical.is_file() {
            return false;
        }

        let accepted = self
            .roots
            .iter()
            .filter_map(|root| root.canonicalize().ok())
            .any(|root| canonical.starts_with(root));

        if !accepted {
            warn!(path = ?path, "Upload temp location is outside the upload directories");
        }

        accepted
    }
}
