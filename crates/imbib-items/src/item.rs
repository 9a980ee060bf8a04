use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Library-unique item key (Zotero-style 8 character key).
pub type ItemKey = String;

/// Library an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LibraryId {
    User(i64),
    Group(i64),
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryId::User(id) => write!(f, "u{}", id),
            LibraryId::Group(id) => write!(f, "g{}", id),
        }
    }
}

/// Well-known field names.
pub mod field_keys {
    pub const URL: &str = "url";
    pub const DOI: &str = "DOI";
    pub const DATE: &str = "date";
    pub const CREATOR_SUMMARY: &str = "creatorSummary";
    pub const PUBLISHER: &str = "publisher";
    pub const PUBLICATION_TITLE: &str = "publicationTitle";
    pub const LINK_MODE: &str = "linkMode";
    pub const CONTENT_TYPE: &str = "contentType";
    pub const FILENAME: &str = "filename";
}

/// Raw item type names that the list treats specially.
pub mod item_types {
    pub const ATTACHMENT: &str = "attachment";
    pub const NOTE: &str = "note";
    pub const ANNOTATION: &str = "annotation";
}

/// Frozen snapshot of a library item.
///
/// Records handed out by a store are immutable; a later write produces a new
/// record rather than changing one a reader already holds. `children` is
/// materialized when the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub key: ItemKey,
    pub library_id: LibraryId,
    pub raw_type: String,
    pub title: String,
    pub tags: Vec<String>,
    pub parent_key: Option<ItemKey>,
    pub collection_keys: Vec<String>,
    pub fields: BTreeMap<String, String>,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub trash: bool,
    /// Local changes not yet synced.
    pub sync_dirty: bool,
    /// Attachment file is present on disk.
    pub file_downloaded: bool,
    /// Local file differs from the remote md5.
    pub changed_remotely: bool,
    /// A remote copy can be fetched (enclosure link present).
    pub has_remote_file: bool,
    #[serde(default)]
    pub children: Vec<Arc<ItemRecord>>,
}

impl ItemRecord {
    pub fn new(key: impl Into<ItemKey>, library_id: LibraryId, raw_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            library_id,
            raw_type: raw_type.into(),
            title: String::new(),
            tags: Vec::new(),
            parent_key: None,
            collection_keys: Vec::new(),
            fields: BTreeMap::new(),
            date_added: DateTime::<Utc>::default(),
            date_modified: DateTime::<Utc>::default(),
            trash: false,
            sync_dirty: false,
            file_downloaded: false,
            changed_remotely: false,
            has_remote_file: false,
            children: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent_key: impl Into<ItemKey>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_collection(mut self, collection_key: impl Into<String>) -> Self {
        self.collection_keys.push(collection_key.into());
        self
    }

    pub fn added_at(mut self, date: DateTime<Utc>) -> Self {
        self.date_added = date;
        self.date_modified = date;
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn is_attachment(&self) -> bool {
        self.raw_type == item_types::ATTACHMENT
    }

    pub fn is_note(&self) -> bool {
        self.raw_type == item_types::NOTE
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_key.is_none()
    }

    /// Copy of this record with a different child snapshot.
    pub fn with_children(&self, children: Vec<Arc<ItemRecord>>) -> ItemRecord {
        ItemRecord {
            children,
            ..self.clone()
        }
    }

    /// Title shown in lists; attachments without a title fall back to the filename.
    pub fn display_title(&self) -> &str {
        if !self.title.is_empty() {
            return &self.title;
        }
        self.field(field_keys::FILENAME).unwrap_or("")
    }

    /// First four-digit run of the `date` field.
    pub fn year(&self) -> Option<&str> {
        let date = self.field(field_keys::DATE)?;
        let bytes = date.as_bytes();
        (0..bytes.len().saturating_sub(3))
            .find(|&i| bytes[i..i + 4].iter().all(u8::is_ascii_digit))
            .map(|i| &date[i..i + 4])
    }
}
