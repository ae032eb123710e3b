//! Export formats for Drive-native documents.

/// Target family for native document exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocConversion {
    /// Word / Excel / PowerPoint formats
    MsOffice,
    #[default]
    Pdf,
}

/// Export MIME type and the extension appended to the local file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

const PDF: ExportFormat = ExportFormat {
    mime_type: "application/pdf",
    extension: ".pdf",
};

const DOCX: ExportFormat = ExportFormat {
    mime_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    extension: ".docx",
};

const XLSX: ExportFormat = ExportFormat {
    mime_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    extension: ".xlsx",
};

const PPTX: ExportFormat = ExportFormat {
    mime_type: "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    extension: ".pptx",
};

const SCRIPT_JSON: ExportFormat = ExportFormat {
    mime_type: "application/vnd.google-apps.script+json",
    extension: ".json",
};

/// Look up the export format for a native MIME type.
///
/// Returns `None` for native types Drive cannot export (forms, sites, shortcuts, ...).
pub fn export_format(mime_type: &str, conversion: DocConversion) -> Option<ExportFormat> {
    let format = match (mime_type, conversion) {
        ("application/vnd.google-apps.document", DocConversion::MsOffice) => DOCX,
        ("application/vnd.google-apps.spreadsheet", DocConversion::MsOffice) => XLSX,
        ("application/vnd.google-apps.presentation", DocConversion::MsOffice) => PPTX,
        (
            "application/vnd.google-apps.document"
            | "application/vnd.google-apps.spreadsheet"
            | "application/vnd.google-apps.presentation",
            DocConversion::Pdf,
        ) => PDF,
        // Drawings have no Office equivalent
        ("application/vnd.google-apps.drawing", _) => PDF,
        ("application/vnd.google-apps.script", _) => SCRIPT_JSON,
        _ => return None,
    };
    Some(format)
}
