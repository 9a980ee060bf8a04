//! Attachment references resolved from item records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{ItemKey, LibraryId};

/// Where an attachment file currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileLocation {
    Local,
    LocalAndChangedRemotely,
    Remote,
    RemoteMissing,
}

impl FileLocation {
    pub fn is_local(self) -> bool {
        matches!(self, FileLocation::Local | FileLocation::LocalAndChangedRemotely)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileLinkType {
    ImportedUrl,
    ImportedFile,
    EmbeddedImage,
    LinkedFile,
}

/// Value of an attachment's `linkMode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkMode {
    ImportedFile,
    ImportedUrl,
    LinkedFile,
    LinkedUrl,
    EmbeddedImage,
}

impl LinkMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "imported_file" => Some(LinkMode::ImportedFile),
            "imported_url" => Some(LinkMode::ImportedUrl),
            "linked_file" => Some(LinkMode::LinkedFile),
            "linked_url" => Some(LinkMode::LinkedUrl),
            "embedded_image" => Some(LinkMode::EmbeddedImage),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkMode::ImportedFile => "imported_file",
            LinkMode::ImportedUrl => "imported_url",
            LinkMode::LinkedFile => "linked_file",
            LinkMode::LinkedUrl => "linked_url",
            LinkMode::EmbeddedImage => "embedded_image",
        }
    }

    /// Imported files are the only ones the downloader can fetch.
    pub fn is_imported(self) -> bool {
        matches!(self, LinkMode::ImportedFile | LinkMode::ImportedUrl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentKind {
    File {
        filename: String,
        content_type: String,
        location: FileLocation,
        link_type: FileLinkType,
    },
    Url(String),
}

/// An attachment as the item list sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub key: ItemKey,
    pub library_id: LibraryId,
    pub title: String,
    pub url: Option<String>,
    pub date_added: DateTime<Utc>,
    pub kind: AttachmentKind,
}

impl Attachment {
    pub fn location(&self) -> Option<FileLocation> {
        match &self.kind {
            AttachmentKind::File { location, .. } => Some(*location),
            AttachmentKind::Url(_) => None,
        }
    }

    /// Copy of this attachment moved to `location`.
    ///
    /// Returns `None` for URL attachments and for files already at `location`,
    /// so applying the same move twice is a no-op.
    pub fn with_location(&self, location: FileLocation) -> Option<Attachment> {
        match &self.kind {
            AttachmentKind::File {
                filename,
                content_type,
                location: current,
                link_type,
            } if *current != location => Some(Attachment {
                kind: AttachmentKind::File {
                    filename: filename.clone(),
                    content_type: content_type.clone(),
                    location,
                    link_type: *link_type,
                },
                ..self.clone()
            }),
            _ => None,
        }
    }
}
