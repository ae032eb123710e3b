/// MIME type Google Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Prefix shared by all Drive-native document types (Docs, Sheets, ...).
pub const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// Whether an item can hold children or carries content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Folder,
    File,
}

/// One node of the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Provider file ID
    pub id: String,
    /// Display name (not unique among siblings)
    pub name: String,
    /// MIME type, decides folder vs file and whether export is needed
    pub mime_type: String,
}

impl RemoteItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        if self.mime_type == FOLDER_MIME_TYPE {
            ItemKind::Folder
        } else {
            ItemKind::File
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind() == ItemKind::Folder
    }

    /// True for provider-native documents that have no binary form and must be exported.
    pub fn is_native_document(&self) -> bool {
        !self.is_folder() && self.mime_type.starts_with(NATIVE_MIME_PREFIX)
    }
}

/// A listing request against the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemQuery {
    /// Items whose name equals the given string and are not trashed.
    Named(String),
    /// Non-trashed children of the folder with the given ID.
    ChildrenOf(String),
}

impl std::fmt::Display for ItemQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemQuery::Named(name) => write!(f, "items named '{}'", name),
            ItemQuery::ChildrenOf(id) => write!(f, "children of {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mime_type() {
        let folder = RemoteItem::new("1", "Photos", FOLDER_MIME_TYPE);
        assert_eq!(folder.kind(), ItemKind::Folder);
        assert!(!folder.is_native_document());

        let doc = RemoteItem::new("2", "Notes", "application/vnd.google-apps.document");
        assert_eq!(doc.kind(), ItemKind::File);
        assert!(doc.is_native_document());

        let pdf = RemoteItem::new("3", "scan.pdf", "application/pdf");
        assert_eq!(pdf.kind(), ItemKind::File);
        assert!(!pdf.is_native_document());
    }
}
