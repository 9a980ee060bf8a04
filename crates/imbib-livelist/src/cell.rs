use imbib_items::{field_keys, ItemKey, ItemRecord};
use serde::{Deserialize, Serialize};

/// State of the attachment badge drawn in a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentBadge {
    Ready,
    NotDownloaded,
    Missing,
    InProgress(u8),
    Failed(String),
}

/// Accessory as presented in a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellAccessory {
    Attachment(AttachmentBadge),
    Url,
    Doi,
}

/// View model of one visible top-level item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCellModel {
    pub key: ItemKey,
    pub type_name: String,
    pub title: String,
    pub subtitle: String,
    pub has_note: bool,
    pub accessory: Option<CellAccessory>,
}

impl ItemCellModel {
    pub fn new(record: &ItemRecord, accessory: Option<CellAccessory>) -> Self {
        Self {
            key: record.key.clone(),
            type_name: type_name(&record.raw_type),
            title: record.display_title().to_string(),
            subtitle: subtitle(record),
            has_note: record.children.iter().any(|c| c.is_note() && !c.trash),
            accessory,
        }
    }

    pub fn with_accessory(self, accessory: Option<CellAccessory>) -> Self {
        Self { accessory, ..self }
    }
}

/// `journalArticle` -> `Journal Article`
fn type_name(raw_type: &str) -> String {
    let mut name = String::with_capacity(raw_type.len() + 4);
    for (i, c) in raw_type.chars().enumerate() {
        if i == 0 {
            name.extend(c.to_uppercase());
        } else {
            if c.is_uppercase() {
                name.push(' ');
            }
            name.push(c);
        }
    }
    name
}

fn subtitle(record: &ItemRecord) -> String {
    let creator = record.field(field_keys::CREATOR_SUMMARY);
    match (creator, record.year()) {
        (Some(creator), Some(year)) => format!("{} ({})", creator, year),
        (Some(creator), None) => creator.to_string(),
        (None, Some(year)) => format!("({})", year),
        (None, None) => String::new(),
    }
}
