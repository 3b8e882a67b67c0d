use std::io::{self, Cursor};
use std::sync::LazyLock;

use regex::Regex;

use super::{ValidationTarget, Validator};
use crate::error::ValidationError;
use crate::format::MimeType;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];
const TIFF_SIGNATURES: [&[u8]; 4] = [b"II*\0", b"MM\0*", b"II+\0", b"MM\0+"];
const JP2_SIGNATURE: &[u8] = &[
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];
const J2K_CODESTREAM: &[u8] = &[0xFF, 0x4F, 0xFF, 0x51];
const JP2_BIT_DEPTHS: [u8; 3] = [8, 15, 16];

static XML_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<([A-Za-z_][\w:.\-]*)").unwrap());

fn mismatch(format: MimeType, detail: impl Into<String>) -> ValidationError {
    ValidationError::FormatMismatch {
        expected: format.to_string(),
        detail: detail.into(),
    }
}

/// Structural checks keyed on the expected [`MimeType`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatValidator;

impl Validator for FormatValidator {
    fn validate(&self, bytes: &[u8], target: &ValidationTarget) -> Result<(), ValidationError> {
        let format = target.format;
        if format == MimeType::Raw {
            return Ok(());
        }
        if bytes.is_empty() {
            return Err(ValidationError::Empty);
        }

        match format {
            MimeType::Png => require_prefix(bytes, format, &[PNG_SIGNATURE]),
            MimeType::Jpg => require_prefix(bytes, format, &[JPEG_SIGNATURE]),
            MimeType::Tiff => require_prefix(bytes, format, &TIFF_SIGNATURES),
            MimeType::Jp2 => validate_jp2(bytes),
            MimeType::Json => serde_json::from_slice::<serde::de::IgnoredAny>(bytes)
                .map(|_| ())
                .map_err(|e| mismatch(format, e.to_string())),
            MimeType::Xml | MimeType::Gml | MimeType::Safe => validate_xml(bytes, format),
            MimeType::Zip => validate_zip(bytes),
            MimeType::Txt | MimeType::Csv => std::str::from_utf8(bytes)
                .map(|_| ())
                .map_err(|e| mismatch(format, e.to_string())),
            MimeType::Raw => Ok(()),
        }
    }
}

fn require_prefix(
    bytes: &[u8],
    format: MimeType,
    signatures: &[&[u8]],
) -> Result<(), ValidationError> {
    if signatures.iter().any(|sig| bytes.starts_with(sig)) {
        Ok(())
    } else {
        Err(mismatch(format, "missing file signature"))
    }
}

fn validate_jp2(bytes: &[u8]) -> Result<(), ValidationError> {
    let depth = jp2_bit_depth(bytes).ok_or_else(|| {
        mismatch(
            MimeType::Jp2,
            "missing JPEG 2000 signature or image header",
        )
    })?;
    if !JP2_BIT_DEPTHS.contains(&depth) {
        return Err(ValidationError::Corrupt(format!(
            "unsupported JPEG 2000 bit depth {depth}"
        )));
    }
    Ok(())
}

/// Bit depth of the first component of a JPEG 2000 file.
///
/// Reads the `ihdr` box of a JP2 container, or the `SIZ` marker of a bare
/// codestream. `None` when neither is present.
pub fn jp2_bit_depth(bytes: &[u8]) -> Option<u8> {
    let bpc = if bytes.starts_with(JP2_SIGNATURE) {
        // ihdr: height(4) width(4) components(2) bpc(1)
        let at = bytes.windows(4).position(|w| w == b"ihdr")?;
        *bytes.get(at + 4 + 10)?
    } else if bytes.starts_with(J2K_CODESTREAM) {
        // SIZ: Lsiz Rsiz, 8 x 32-bit sizes, Csiz, then Ssiz per component
        *bytes.get(4 + 2 + 2 + 32 + 2)?
    } else {
        return None;
    };
    // 0xFF in ihdr means "components differ"
    if bpc == 0xFF {
        return None;
    }
    Some((bpc & 0x7F) + 1)
}

fn validate_xml(bytes: &[u8], format: MimeType) -> Result<(), ValidationError> {
    let text = std::str::from_utf8(bytes).map_err(|e| mismatch(format, e.to_string()))?;
    let body = skip_prolog(text.trim_start_matches('\u{feff}'));

    let root = XML_ROOT
        .captures(body)
        .and_then(|c| c.get(1))
        .ok_or_else(|| mismatch(format, "no root element"))?
        .as_str();

    let tail = body.trim_end();
    let closed = tail.ends_with(&format!("</{root}>"))
        || tail.ends_with(&format!("</{root} >"))
        || (tail.ends_with("/>") && !tail[1..].contains('<'));
    if !closed {
        return Err(ValidationError::Corrupt(format!(
            "XML document truncated, <{root}> is never closed"
        )));
    }
    Ok(())
}

/// Drop the XML declaration, processing instructions, comments and doctype
fn skip_prolog(mut text: &str) -> &str {
    loop {
        text = text.trim_start();
        let end = if text.starts_with("<?") {
            text.find("?>").map(|i| i + 2)
        } else if text.starts_with("<!--") {
            text.find("-->").map(|i| i + 3)
        } else if text.starts_with("<!") {
            text.find('>').map(|i| i + 1)
        } else {
            return text;
        };
        match end {
            Some(end) => text = &text[end..],
            None => return text,
        }
    }
}

/// Every member must decompress with a matching CRC
fn validate_zip(bytes: &[u8]) -> Result<(), ValidationError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| mismatch(MimeType::Zip, e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ValidationError::Corrupt(format!("zip entry {index}: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        io::copy(&mut entry, &mut io::sink())
            .map_err(|e| ValidationError::Corrupt(format!("zip entry {name}: {e}")))?;
    }
    Ok(())
}
