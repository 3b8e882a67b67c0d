//! # Data Formats
//!
//! Output encodings delivered by the imagery service and the object store,
//! with parsing from file extensions and MIME strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DownloadError;

/// Encoding of a downloaded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum MimeType {
    Png,
    Jpg,
    Tiff,
    Jp2,
    Json,
    Xml,
    Gml,
    Txt,
    Csv,
    /// Sentinel SAFE manifest (XML)
    Safe,
    /// Zipped product archive
    Zip,
    /// Opaque bytes, no structural checks possible
    Raw,
}

impl MimeType {
    /// Resolve a file extension, accepting the common aliases (`tif`, `jpeg`, `j2k`...)
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        let mime = match ext.as_str() {
            "png" => MimeType::Png,
            "jpg" | "jpeg" => MimeType::Jpg,
            "tif" | "tiff" => MimeType::Tiff,
            "jp2" | "j2k" | "jpx" => MimeType::Jp2,
            "json" | "geojson" => MimeType::Json,
            "xml" => MimeType::Xml,
            "gml" => MimeType::Gml,
            "txt" | "text" => MimeType::Txt,
            "csv" => MimeType::Csv,
            "safe" => MimeType::Safe,
            "zip" => MimeType::Zip,
            "bin" | "raw" => MimeType::Raw,
            _ => return None,
        };
        Some(mime)
    }

    /// Guess the format from the extension of a file name or object key
    pub fn from_filename(name: &str) -> Option<Self> {
        let file = name.rsplit('/').next().unwrap_or(name);
        let (_, ext) = file.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Parse a MIME string such as `image/png` or `application/json;charset=utf-8`
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        let mime = match essence.to_ascii_lowercase().as_str() {
            "image/png" => MimeType::Png,
            "image/jpeg" | "image/jpg" => MimeType::Jpg,
            "image/tiff" | "image/geotiff" => MimeType::Tiff,
            "image/jp2" => MimeType::Jp2,
            "application/json" | "application/geo+json" => MimeType::Json,
            "application/xml" | "text/xml" => MimeType::Xml,
            "application/gml+xml" => MimeType::Gml,
            "text/plain" => MimeType::Txt,
            "text/csv" => MimeType::Csv,
            "application/zip" => MimeType::Zip,
            "application/octet-stream" => MimeType::Raw,
            _ => return None,
        };
        Some(mime)
    }

    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            MimeType::Png => "png",
            MimeType::Jpg => "jpg",
            MimeType::Tiff => "tiff",
            MimeType::Jp2 => "jp2",
            MimeType::Json => "json",
            MimeType::Xml => "xml",
            MimeType::Gml => "gml",
            MimeType::Txt => "txt",
            MimeType::Csv => "csv",
            MimeType::Safe => "safe",
            MimeType::Zip => "zip",
            MimeType::Raw => "bin",
        }
    }

    /// MIME string sent to OGC services in `FORMAT` parameters
    pub fn mime_str(&self) -> &'static str {
        match self {
            MimeType::Png => "image/png",
            MimeType::Jpg => "image/jpeg",
            MimeType::Tiff => "image/tiff",
            MimeType::Jp2 => "image/jp2",
            MimeType::Json => "application/json",
            MimeType::Xml | MimeType::Safe => "application/xml",
            MimeType::Gml => "application/gml+xml",
            MimeType::Txt => "text/plain",
            MimeType::Csv => "text/csv",
            MimeType::Zip => "application/zip",
            MimeType::Raw => "application/octet-stream",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            MimeType::Png | MimeType::Jpg | MimeType::Tiff | MimeType::Jp2
        )
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for MimeType {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s)
            .or_else(|| Self::from_mime(s))
            .ok_or_else(|| DownloadError::InvalidRequest(format!("unsupported data format: {s}")))
    }
}
