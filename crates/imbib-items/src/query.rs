use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::item::{field_keys, ItemRecord, LibraryId};

/// Which part of a library a query covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionScope {
    #[default]
    All,
    Collection(String),
    Unfiled,
    Trash,
}

/// Extra predicates on top of scope and search text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemsFilter {
    /// Item or one of its children has a local file.
    DownloadedFiles,
    /// Item or one of its children carries every listed tag.
    Tags(BTreeSet<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Title,
    Creator,
    Date,
    DateAdded,
    DateModified,
    ItemType,
    Publisher,
    PublicationTitle,
    Year,
}

impl SortField {
    pub const ALL: [SortField; 9] = [
        SortField::Title,
        SortField::Creator,
        SortField::Date,
        SortField::DateAdded,
        SortField::DateModified,
        SortField::ItemType,
        SortField::Publisher,
        SortField::PublicationTitle,
        SortField::Year,
    ];

    /// Direction used when the user picks this field.
    pub fn default_order_ascending(self) -> bool {
        !matches!(self, SortField::DateAdded | SortField::DateModified)
    }
}

/// Sort order of the item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemsSortType {
    pub field: SortField,
    pub ascending: bool,
}

impl Default for ItemsSortType {
    fn default() -> Self {
        Self {
            field: SortField::Title,
            ascending: true,
        }
    }
}

impl ItemsSortType {
    /// Sort by `field` in that field's default direction.
    pub fn for_field(field: SortField) -> Self {
        Self {
            field,
            ascending: field.default_order_ascending(),
        }
    }

    pub fn with_ascending(self, ascending: bool) -> Self {
        Self { ascending, ..self }
    }

    /// Total order over records; ties fall back to title, then key.
    pub fn compare(&self, a: &ItemRecord, b: &ItemRecord) -> Ordering {
        let primary = match self.field {
            SortField::Title => cmp_text(a.display_title(), b.display_title()),
            SortField::Creator => cmp_field(a, b, field_keys::CREATOR_SUMMARY),
            SortField::Date => cmp_field(a, b, field_keys::DATE),
            SortField::DateAdded => a.date_added.cmp(&b.date_added),
            SortField::DateModified => a.date_modified.cmp(&b.date_modified),
            SortField::ItemType => a.raw_type.cmp(&b.raw_type),
            SortField::Publisher => cmp_field(a, b, field_keys::PUBLISHER),
            SortField::PublicationTitle => cmp_field(a, b, field_keys::PUBLICATION_TITLE),
            SortField::Year => a.year().cmp(&b.year()),
        };
        let primary = if self.ascending { primary } else { primary.reverse() };
        primary
            .then_with(|| cmp_text(a.display_title(), b.display_title()))
            .then_with(|| a.key.cmp(&b.key))
    }
}

fn cmp_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn cmp_field(a: &ItemRecord, b: &ItemRecord, name: &str) -> Ordering {
    cmp_text(a.field(name).unwrap_or(""), b.field(name).unwrap_or(""))
}

/// A live query against the item store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsQuery {
    pub library_id: LibraryId,
    pub collection: CollectionScope,
    pub filters: Vec<ItemsFilter>,
    pub sort: ItemsSortType,
    /// Every component must match somewhere in the item or its children.
    pub search_components: Vec<String>,
}

impl ItemsQuery {
    pub fn new(library_id: LibraryId, collection: CollectionScope) -> Self {
        Self {
            library_id,
            collection,
            filters: Vec::new(),
            sort: ItemsSortType::default(),
            search_components: Vec::new(),
        }
    }

    /// Whether a top-level record with its materialized children belongs in the result.
    pub fn matches(&self, record: &ItemRecord) -> bool {
        if record.library_id != self.library_id || !record.is_top_level() {
            return false;
        }
        let in_scope = match &self.collection {
            CollectionScope::All => !record.trash,
            CollectionScope::Collection(key) => {
                !record.trash && record.collection_keys.iter().any(|k| k == key)
            }
            CollectionScope::Unfiled => !record.trash && record.collection_keys.is_empty(),
            CollectionScope::Trash => record.trash,
        };
        in_scope
            && self.filters.iter().all(|f| filter_matches(f, record))
            && self
                .search_components
                .iter()
                .all(|c| search_matches(&c.to_lowercase(), record))
    }
}

fn filter_matches(filter: &ItemsFilter, record: &ItemRecord) -> bool {
    match filter {
        ItemsFilter::DownloadedFiles => {
            record.file_downloaded || record.children.iter().any(|c| c.file_downloaded)
        }
        ItemsFilter::Tags(tags) => tags.iter().all(|tag| {
            record.tags.contains(tag) || record.children.iter().any(|c| c.tags.contains(tag))
        }),
    }
}

fn search_matches(component: &str, record: &ItemRecord) -> bool {
    let hit = |r: &ItemRecord| {
        r.key.to_lowercase() == component
            || r.title.to_lowercase().contains(component)
            || r.fields.values().any(|v| v.to_lowercase().contains(component))
            || r.tags.iter().any(|t| t.to_lowercase().contains(component))
    };
    hit(record) || record.children.iter().any(|c| hit(c.as_ref()))
}
