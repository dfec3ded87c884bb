//! Traits the host application implements for its persisted records
//!
//! The attachment engine never talks to a database. It only needs to read and
//! rewrite a record's attribute map and learn its key and type name.

use serde_json::Value;

use crate::types::RecordId;

/// A persisted record that can carry file attachments.
///
/// An attribute that is present with a `Value::Null` is different from one
/// that is absent: the former is an explicit request to remove the
/// attachment, the latter means "leave it alone".
pub trait Record: Send + Sync {
    /// Fully qualified type name, e.g. `App\Models\User` or `User`
    fn class_name(&self) -> &str;

    /// Primary key, `None` until the record has been persisted
    fn id(&self) -> Option<RecordId>;

    /// Current value of an attribute
    fn attribute(&self, name: &str) -> Option<&Value>;

    /// Whether the attribute is present at all (including explicit null)
    fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Remove an attribute so the persistence layer never sees it
    fn remove_attribute(&mut self, name: &str) -> Option<Value>;

    /// Write attributes directly, bypassing change tracking and mass
    /// assignment guards
    fn fill_raw(&mut self, attributes: Vec<(String, Value)>);
}
