//! Output formats understood by the conversion pipeline.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Target artifact format selected by the `/convert/{format}` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Epub,
    Pdf,
    Html5,
    Mobi,
    Azw3,
    Docbook5,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Epub,
        OutputFormat::Pdf,
        OutputFormat::Html5,
        OutputFormat::Mobi,
        OutputFormat::Azw3,
        OutputFormat::Docbook5,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Epub => "epub",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Html5 => "html5",
            OutputFormat::Mobi => "mobi",
            OutputFormat::Azw3 => "azw3",
            OutputFormat::Docbook5 => "docbook5",
        }
    }

    /// File extension of the final artifact.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Epub => "epub",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Html5 => "html",
            OutputFormat::Mobi => "mobi",
            OutputFormat::Azw3 => "azw3",
            OutputFormat::Docbook5 => "xml",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Epub => "application/epub+zip",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Html5 => "text/html; charset=utf-8",
            OutputFormat::Mobi => "application/x-mobipocket-ebook",
            OutputFormat::Azw3 => "application/vnd.amazon.ebook",
            OutputFormat::Docbook5 => "application/docbook+xml",
        }
    }

    /// Kindle formats are produced from an intermediate EPUB by the e-book converter.
    pub fn is_kindle(self) -> bool {
        matches!(self, OutputFormat::Mobi | OutputFormat::Azw3)
    }

    /// Format handed to the renderer. Kindle targets render EPUB first.
    pub fn render_stage(self) -> OutputFormat {
        if self.is_kindle() {
            OutputFormat::Epub
        } else {
            self
        }
    }

    /// Renderer backend selector (`-b`).
    pub fn backend(self) -> &'static str {
        match self.render_stage() {
            OutputFormat::Epub => "epub3",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Html5 => "html5",
            OutputFormat::Docbook5 => "docbook5",
            OutputFormat::Mobi | OutputFormat::Azw3 => "epub3",
        }
    }

    /// Renderer extension library that must be loaded (`-r`) for this backend.
    pub fn renderer_library(self) -> Option<&'static str> {
        match self.render_stage() {
            OutputFormat::Epub => Some("asciidoctor-epub3"),
            OutputFormat::Pdf => Some("asciidoctor-pdf"),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "epub" | "epub3" => Ok(OutputFormat::Epub),
            "pdf" => Ok(OutputFormat::Pdf),
            "html5" | "html" => Ok(OutputFormat::Html5),
            "mobi" => Ok(OutputFormat::Mobi),
            "azw3" => Ok(OutputFormat::Azw3),
            "docbook5" | "docbook" => Ok(OutputFormat::Docbook5),
            other => Err(DomainError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}
