use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::checksum::digest_hex;
use super::{ChecksumAlgorithm, ValidationTarget, Validator};
use crate::error::ValidationError;
use crate::format::MimeType;

const MANIFEST_NAME: &str = "manifest.safe";

static DATA_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<dataObject\b.*?</dataObject>").unwrap());
static HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]+)""#).unwrap());
static MD5_CHECKSUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<checksum[^>]*checksumName="MD5"[^>]*>\s*([0-9a-f]{32})\s*</checksum>"#)
        .unwrap()
});

/// A data object listed in a SAFE manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ManifestEntry {
    pub path: String,
    pub md5: String,
}

/// Extract `(href, md5)` pairs from a `manifest.safe` document
pub(crate) fn parse_manifest(manifest: &str) -> Vec<ManifestEntry> {
    DATA_OBJECT
        .find_iter(manifest)
        .filter_map(|object| {
            let object = object.as_str();
            let path = HREF.captures(object)?.get(1)?.as_str();
            let md5 = MD5_CHECKSUM.captures(object)?.get(1)?.as_str();
            Some(ManifestEntry {
                path: path.trim_start_matches("./").to_string(),
                md5: md5.to_ascii_lowercase(),
            })
        })
        .collect()
}

/// Verifies zipped SAFE products against their own manifest.
///
/// Applies to [`MimeType::Zip`] payloads that contain a `manifest.safe`; every
/// data object the manifest lists must be present and match its MD5.
/// Other payloads pass untouched.
#[derive(Debug, Clone, Default)]
pub struct SafeArchiveValidator {
    /// Accept archives whose manifest lists files missing from the archive
    pub allow_missing: bool,
}

impl Validator for SafeArchiveValidator {
    fn validate(&self, bytes: &[u8], target: &ValidationTarget) -> Result<(), ValidationError> {
        if target.format != MimeType::Zip {
            return Ok(());
        }
        let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
            // Structural failures belong to the format check
            return Ok(());
        };

        let Some(manifest_name) = archive
            .file_names()
            .filter(|name| {
                name.rsplit('/').next() == Some(MANIFEST_NAME) && name.matches('/').count() <= 1
            })
            .min_by_key(|name| name.len())
            .map(str::to_string)
        else {
            return Ok(());
        };
        let root = &manifest_name[..manifest_name.len() - MANIFEST_NAME.len()];

        let manifest = read_entry(&mut archive, &manifest_name)?;
        let manifest = String::from_utf8(manifest)
            .map_err(|e| ValidationError::Corrupt(format!("{manifest_name}: {e}")))?;
        let entries = parse_manifest(&manifest);
        if entries.is_empty() {
            return Err(ValidationError::Corrupt(format!(
                "{manifest_name} lists no data objects"
            )));
        }

        let mut verified = 0usize;
        for entry in &entries {
            let name = format!("{root}{}", entry.path);
            if archive.index_for_name(&name).is_none() {
                if self.allow_missing {
                    continue;
                }
                return Err(ValidationError::Corrupt(format!(
                    "{name} listed in manifest but missing from archive"
                )));
            }

            let actual = digest_hex(ChecksumAlgorithm::Md5, &read_entry(&mut archive, &name)?);
            if actual != entry.md5 {
                return Err(ValidationError::ChecksumMismatch {
                    algorithm: ChecksumAlgorithm::Md5.as_str().to_string(),
                    expected: entry.md5.clone(),
                    actual,
                });
            }
            verified += 1;
        }

        debug!(
            manifest = %manifest_name,
            listed = entries.len(),
            verified,
            "SAFE archive verified"
        );
        Ok(())
    }
}

fn read_entry<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, ValidationError> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| ValidationError::Corrupt(format!("{name}: {e}")))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| ValidationError::Corrupt(format!("{name}: {e}")))?;
    Ok(buf)
}
