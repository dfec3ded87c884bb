//! Attachment definitions
//!
//! Each record type declares its attachments once at startup. Registration
//! merges the caller's options over the defaults, injects the `original`
//! style, and builds the record type's hook list and accessor table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stapler_core::ValidationErrors;

use crate::interpolation::references;
use crate::model::{Style, ORIGINAL_STYLE};
use crate::resource::ResourceKind;

pub const DEFAULT_URL: &str = "/system/:class/:attachment/:id_partition/:style/:filename";
pub const DEFAULT_MISSING_URL: &str = "/:attachment/:style/missing.png";

/// Caller-supplied attachment options; unset fields take the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentOptions {
    pub url: Option<String>,
    pub default_url: Option<String>,
    pub default_style: Option<String>,
    /// Declared styles, in processing order
    pub styles: Vec<Style>,
    pub keep_old_files: Option<bool>,
}

impl AttachmentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn default_url(mut self, default_url: impl Into<String>) -> Self {
        self.default_url = Some(default_url.into());
        self
    }

    pub fn default_style(mut self, style: impl Into<String>) -> Self {
        self.default_style = Some(style.into());
        self
    }

    /// Declare a style; declaring the same name again replaces its dimensions
    pub fn style(mut self, name: impl Into<String>, dimensions: impl Into<String>) -> Self {
        upsert_style(&mut self.styles, Style::new(name, dimensions));
        self
    }

    pub fn keep_old_files(mut self, keep: bool) -> Self {
        self.keep_old_files = Some(keep);
        self
    }
}

fn upsert_style(styles: &mut Vec<Style>, style: Style) {
    match styles.iter_mut().find(|s| s.name == style.name) {
        Some(existing) => existing.dimensions = style.dimensions,
        None => styles.push(style),
    }
}

/// A registered attachment with every option resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentDefinition {
    pub name: String,
    pub url: String,
    pub default_url: String,
    pub default_style: String,
    /// Always contains `original`
    pub styles: Vec<Style>,
    pub keep_old_files: bool,
}

impl AttachmentDefinition {
    pub fn new(name: impl Into<String>, options: AttachmentOptions) -> Self {
        let mut styles = options.styles;
        upsert_style(&mut styles, Style::original());

        Self {
            name: name.into(),
            url: options.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            default_url: options
                .default_url
                .unwrap_or_else(|| DEFAULT_MISSING_URL.to_string()),
            default_style: options
                .default_style
                .unwrap_or_else(|| ORIGINAL_STYLE.to_string()),
            styles,
            keep_old_files: options.keep_old_files.unwrap_or(false),
        }
    }

    pub fn style(&self, name: &str) -> Option<&Style> {
        self.styles.iter().find(|s| s.name == name)
    }

    /// Check the definition for problems that make its storage layout unusable
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if !references(&self.url, "id") && !references(&self.url, "id_partition") {
            errors.add("url", "must contain :id or :id_partition");
        }

        if references(&self.url, "style") && self.style(&self.default_style).is_none() {
            errors.add(
                "styles",
                format!(
                    "must declare the default style {:?} used by :style",
                    self.default_style
                ),
            );
        }

        errors
    }

    pub fn path_accessor(&self) -> String {
        format!("{}_path", self.name)
    }

    pub fn url_accessor(&self) -> String {
        format!("{}_url", self.name)
    }
}

/// Lifecycle points a record type must dispatch to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    BeforeSave,
    AfterSave,
    AfterDelete,
}

impl Hook {
    pub const ALL: [Hook; 3] = [Hook::BeforeSave, Hook::AfterSave, Hook::AfterDelete];
}

/// Everything registered for one record type
#[derive(Debug, Clone, Default)]
pub struct AttachedType {
    definitions: Vec<AttachmentDefinition>,
    hooks: Vec<Hook>,
    accessors: HashMap<String, (usize, ResourceKind)>,
}

impl AttachedType {
    pub fn definitions(&self) -> &[AttachmentDefinition] {
        &self.definitions
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }

    /// Look up a generated `{attachment}_path` / `{attachment}_url` accessor
    pub fn accessor(&self, method: &str) -> Option<(&AttachmentDefinition, ResourceKind)> {
        let (index, kind) = self.accessors.get(method)?;
        self.definitions.get(*index).map(|d| (d, *kind))
    }

    pub fn accessor_names(&self) -> impl Iterator<Item = &str> {
        self.accessors.keys().map(String::as_str)
    }

    fn insert(&mut self, definition: AttachmentDefinition) {
        for hook in Hook::ALL {
            if !self.hooks.contains(&hook) {
                self.hooks.push(hook);
            }
        }

        let index = match self
            .definitions
            .iter()
            .position(|d| d.name == definition.name)
        {
            Some(index) => {
                self.definitions[index] = definition;
                index
            }
            None => {
                self.definitions.push(definition);
                self.definitions.len() - 1
            }
        };

        let definition = &self.definitions[index];
        self.accessors
            .insert(definition.path_accessor(), (index, ResourceKind::Path));
        self.accessors
            .insert(definition.url_accessor(), (index, ResourceKind::Url));
    }
}

/// Attachment definitions keyed by record type, then attachment name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: HashMap<String, AttachedType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; registering the same name twice replaces the first
    pub fn register(&mut self, class_name: impl Into<String>, definition: AttachmentDefinition) {
        self.types
            .entry(class_name.into())
            .or_default()
            .insert(definition);
    }

    pub fn attached_type(&self, class_name: &str) -> Option<&AttachedType> {
        self.types.get(class_name)
    }

    /// Definitions of a record type in registration order
    pub fn definitions(&self, class_name: &str) -> &[AttachmentDefinition] {
        self.types
            .get(class_name)
            .map(AttachedType::definitions)
            .unwrap_or_default()
    }

    pub fn definition(&self, class_name: &str, attachment: &str) -> Option<&AttachmentDefinition> {
        self.definitions(class_name)
            .iter()
            .find(|d| d.name == attachment)
    }

    pub fn hooks(&self, class_name: &str) -> &[Hook] {
        self.types
            .get(class_name)
            .map(AttachedType::hooks)
            .unwrap_or_default()
    }

    pub fn is_registered(&self, class_name: &str) -> bool {
        self.types.contains_key(class_name)
    }
}
