//! Accessory resolution: the one attachment, URL or DOI shown beside an item

use std::cmp::Ordering;

use imbib_items::{
    field_keys, Attachment, AttachmentKind, FileLinkType, FileLocation, ItemRecord, LinkMode,
};
use serde::{Deserialize, Serialize};

use crate::identifiers::{extract_doi, is_url};

/// Content types eligible as an item's main attachment.
const MAIN_ATTACHMENT_CONTENT_TYPES: [&str; 6] = [
    "text/html",
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/gif",
    "text/plain",
];

/// Secondary object shown with an item row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemAccessory {
    Attachment(Attachment),
    Url(String),
    Doi(String),
}

impl ItemAccessory {
    pub fn attachment(&self) -> Option<&Attachment> {
        match self {
            ItemAccessory::Attachment(attachment) => Some(attachment),
            _ => None,
        }
    }
}

/// Picks the accessory for a record. Pure: the same record always yields the
/// same accessory.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessoryResolver {
    webdav_enabled: bool,
}

impl AccessoryResolver {
    pub fn new(webdav_enabled: bool) -> Self {
        Self { webdav_enabled }
    }

    pub fn resolve(&self, record: &ItemRecord) -> Option<ItemAccessory> {
        if let Some(attachment) = self.main_attachment(record) {
            return Some(ItemAccessory::Attachment(attachment));
        }
        if record.is_attachment() {
            return None;
        }
        if let Some(url) = record.field(field_keys::URL).filter(|u| is_url(u)) {
            return Some(ItemAccessory::Url(url.trim().to_string()));
        }
        record
            .field(field_keys::DOI)
            .and_then(extract_doi)
            .map(ItemAccessory::Doi)
    }

    /// The attachment the list shows for `record`, if any.
    pub fn main_attachment(&self, record: &ItemRecord) -> Option<Attachment> {
        if record.is_attachment() {
            return self.attachment(record).filter(|attachment| match &attachment.kind {
                AttachmentKind::Url(_) => true,
                AttachmentKind::File { link_type, .. } => {
                    matches!(link_type, FileLinkType::ImportedFile | FileLinkType::ImportedUrl)
                }
            });
        }

        let parent_url = record.field(field_keys::URL);
        let mut candidates: Vec<Candidate<'_>> = record
            .children
            .iter()
            .filter(|child| child.is_attachment() && !child.sync_dirty && !child.trash)
            .filter_map(|child| {
                let link_mode = child.field(field_keys::LINK_MODE).and_then(LinkMode::parse)?;
                if !link_mode.is_imported() {
                    return None;
                }
                let content_type = content_type(child)?;
                if !MAIN_ATTACHMENT_CONTENT_TYPES.contains(&content_type.as_str()) {
                    return None;
                }
                let matches_parent_url =
                    parent_url.is_some() && child.field(field_keys::URL) == parent_url;
                Some(Candidate {
                    record: child,
                    content_type,
                    link_mode,
                    matches_parent_url,
                })
            })
            .collect();

        candidates.sort_by(Candidate::compare);
        let best = candidates.into_iter().next()?;
        let link_type = if best.link_mode == LinkMode::ImportedFile {
            FileLinkType::ImportedFile
        } else {
            FileLinkType::ImportedUrl
        };
        Some(self.file_attachment(best.record, best.content_type, link_type))
    }

    /// Attachment described by an attachment record, regardless of whether
    /// it could be a main attachment.
    pub fn attachment(&self, record: &ItemRecord) -> Option<Attachment> {
        let Some(link_mode) = record.field(field_keys::LINK_MODE).and_then(LinkMode::parse) else {
            tracing::debug!(key = %record.key, "attachment without link mode");
            return None;
        };
        match link_mode {
            LinkMode::ImportedFile => {
                Some(self.file_attachment(record, content_type(record)?, FileLinkType::ImportedFile))
            }
            LinkMode::ImportedUrl => {
                Some(self.file_attachment(record, content_type(record)?, FileLinkType::ImportedUrl))
            }
            LinkMode::EmbeddedImage => Some(self.file_attachment(
                record,
                "image/png".to_string(),
                FileLinkType::EmbeddedImage,
            )),
            LinkMode::LinkedFile => {
                let content_type = content_type(record).unwrap_or_default();
                let mut attachment =
                    self.file_attachment(record, content_type, FileLinkType::LinkedFile);
                if let AttachmentKind::File { location, .. } = &mut attachment.kind {
                    *location = if record.file_downloaded {
                        FileLocation::Local
                    } else {
                        FileLocation::RemoteMissing
                    };
                }
                Some(attachment)
            }
            LinkMode::LinkedUrl => {
                let url = record.field(field_keys::URL).filter(|u| is_url(u))?;
                Some(Attachment {
                    key: record.key.clone(),
                    library_id: record.library_id,
                    title: record.display_title().to_string(),
                    url: Some(url.to_string()),
                    date_added: record.date_added,
                    kind: AttachmentKind::Url(url.trim().to_string()),
                })
            }
        }
    }

    fn file_attachment(
        &self,
        record: &ItemRecord,
        content_type: String,
        link_type: FileLinkType,
    ) -> Attachment {
        let filename = match record.field(field_keys::FILENAME) {
            Some(filename) => filename.to_string(),
            None => match extension_for(&content_type) {
                Some(ext) => format!("{}.{}", record.display_title(), ext),
                None => record.display_title().to_string(),
            },
        };
        Attachment {
            key: record.key.clone(),
            library_id: record.library_id,
            title: record.display_title().to_string(),
            url: record.field(field_keys::URL).map(str::to_string),
            date_added: record.date_added,
            kind: AttachmentKind::File {
                filename,
                content_type,
                location: self.location(record),
                link_type,
            },
        }
    }

    fn location(&self, record: &ItemRecord) -> FileLocation {
        if record.file_downloaded {
            if record.changed_remotely {
                FileLocation::LocalAndChangedRemotely
            } else {
                FileLocation::Local
            }
        } else if self.webdav_enabled || record.has_remote_file {
            FileLocation::Remote
        } else {
            FileLocation::RemoteMissing
        }
    }
}

struct Candidate<'a> {
    record: &'a ItemRecord,
    content_type: String,
    link_mode: LinkMode,
    matches_parent_url: bool,
}

impl Candidate<'_> {
    fn compare(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
        priority(&a.content_type)
            .cmp(&priority(&b.content_type))
            .then_with(|| b.matches_parent_url.cmp(&a.matches_parent_url))
            .then_with(|| a.record.date_added.cmp(&b.record.date_added))
            .then_with(|| a.record.key.cmp(&b.record.key))
    }
}

fn priority(content_type: &str) -> u8 {
    match content_type {
        "application/pdf" => 0,
        "text/html" => 1,
        "image/gif" | "image/jpeg" | "image/png" => 2,
        "text/plain" => 3,
        _ => 4,
    }
}

/// Content type from the `contentType` field, else guessed from the
/// filename or title extension.
fn content_type(record: &ItemRecord) -> Option<String> {
    if let Some(content_type) = record.field(field_keys::CONTENT_TYPE) {
        return Some(content_type.to_string());
    }
    [record.field(field_keys::FILENAME), Some(record.title.as_str())]
        .into_iter()
        .flatten()
        .filter_map(|name| name.rsplit_once('.').map(|(_, ext)| ext))
        .find_map(content_type_for)
        .map(str::to_string)
}

fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "html" | "htm" => Some("text/html"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "txt" => Some("text/plain"),
        "epub" => Some("application/epub+zip"),
        _ => None,
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "application/pdf" => Some("pdf"),
        "text/html" => Some("html"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "text/plain" => Some("txt"),
        "application/epub+zip" => Some("epub"),
        _ => None,
    }
}
