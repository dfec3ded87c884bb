//! Template interpolation
//!
//! Attachment templates such as `/system/:class/:attachment/:id_partition/:style/:filename`
//! are resolved against a record. Placeholders are substituted one at a time
//! in alphabetical order, and each only matches up to a word boundary, so
//! `:id` never eats the front of `:id_partition`.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use stapler_core::Record;

use crate::partition::id_partition;
use crate::pluralize::Pluralizer;
use crate::registry::AttachmentDefinition;

/// What a template is being resolved for
#[derive(Clone, Copy)]
pub struct Subject<'a> {
    pub definition: &'a AttachmentDefinition,
    /// Requested style; empty means the definition's default style
    pub style: &'a str,
    pub record: &'a dyn Record,
}

impl Subject<'_> {
    fn file_name(&self) -> String {
        self.record
            .attribute(&format!("{}_file_name", self.definition.name))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

type Resolver = fn(&Interpolator, &Subject<'_>) -> String;

struct Placeholder {
    key: &'static str,
    pattern: Regex,
    resolve: Resolver,
}

static PLACEHOLDERS: Lazy<Vec<Placeholder>> = Lazy::new(|| {
    let mut table = vec![
        placeholder("app_root", app_root),
        placeholder("attachment", attachment),
        placeholder("basename", basename),
        placeholder("class", class),
        placeholder("extension", extension),
        placeholder("filename", filename),
        placeholder("id", id),
        placeholder("id_partition", partition),
        placeholder("style", style),
    ];
    table.sort_by_key(|p| p.key);
    table
});

fn placeholder(key: &'static str, resolve: Resolver) -> Placeholder {
    Placeholder {
        key,
        pattern: placeholder_pattern(key),
        resolve,
    }
}

fn app_root(interpolator: &Interpolator, _: &Subject<'_>) -> String {
    interpolator.app_root.clone()
}

fn attachment(interpolator: &Interpolator, subject: &Subject<'_>) -> String {
    interpolator.pluralizer.plural(&subject.definition.name)
}

fn basename(_: &Interpolator, subject: &Subject<'_>) -> String {
    let name = subject.file_name();
    Path::new(&name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn class(_: &Interpolator, subject: &Subject<'_>) -> String {
    handle_backslashes(subject.record.class_name())
}

fn extension(_: &Interpolator, subject: &Subject<'_>) -> String {
    let name = subject.file_name();
    Path::new(&name)
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn filename(_: &Interpolator, subject: &Subject<'_>) -> String {
    subject.file_name()
}

fn id(_: &Interpolator, subject: &Subject<'_>) -> String {
    subject
        .record
        .id()
        .map(|id| id.to_string())
        .unwrap_or_default()
}

fn partition(_: &Interpolator, subject: &Subject<'_>) -> String {
    id_partition(subject.record.id().as_ref()).unwrap_or_default()
}

fn style(_: &Interpolator, subject: &Subject<'_>) -> String {
    if subject.style.is_empty() {
        subject.definition.default_style.clone()
    } else {
        subject.style.to_string()
    }
}

fn placeholder_pattern(key: &str) -> Regex {
    Regex::new(&format!(r":{}\b", regex::escape(key)))
        .unwrap_or_else(|e| panic!("placeholder pattern for {} failed to compile: {}", key, e))
}

/// Whether `template` contains the placeholder `:key`
pub fn references(template: &str, key: &str) -> bool {
    match PLACEHOLDERS.iter().find(|p| p.key == key) {
        Some(p) => p.pattern.is_match(template),
        None => placeholder_pattern(key).is_match(template),
    }
}

/// Names of the recognised placeholders, in substitution order
pub fn placeholder_keys() -> impl Iterator<Item = &'static str> {
    PLACEHOLDERS.iter().map(|p| p.key)
}

/// Rewrite a namespaced type name into a path: `\App\Models\User` becomes `App/Models/User`
pub fn handle_backslashes(value: &str) -> String {
    value.trim_start_matches('\\').replace('\\', "/")
}

/// Resolves attachment templates
#[derive(Clone)]
pub struct Interpolator {
    app_root: String,
    pluralizer: Arc<dyn Pluralizer>,
}

impl Interpolator {
    pub fn new(app_root: impl Into<String>, pluralizer: Arc<dyn Pluralizer>) -> Self {
        Self {
            app_root: app_root.into().trim_end_matches('/').to_string(),
            pluralizer,
        }
    }

    pub fn app_root(&self) -> &str {
        &self.app_root
    }

    /// Substitute every placeholder present in `template`.
    ///
    /// Placeholders that do not occur are skipped; values that are missing
    /// on the record (no id yet, no stored file) become empty strings.
    pub fn interpolate(&self, template: &str, subject: &Subject<'_>) -> String {
        let mut resolved = template.to_string();

        for placeholder in PLACEHOLDERS.iter() {
            if !placeholder.pattern.is_match(&resolved) {
                continue;
            }

            let value = (placeholder.resolve)(self, subject);
            resolved = placeholder
                .pattern
                .replace_all(&resolved, NoExpand(&value))
                .into_owned();
        }

        resolved
    }
}

impl std::fmt::Debug for Interpolator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpolator")
            .field("app_root", &self.app_root)
            .finish_non_exhaustive()
    }
}
