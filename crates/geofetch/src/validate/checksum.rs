use md5::Md5;
use sha2::{Digest, Sha256};

use super::{ChecksumAlgorithm, ValidationTarget, Validator};
use crate::error::ValidationError;

/// Lower-case hex digest of `bytes`
pub(crate) fn digest_hex(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        ChecksumAlgorithm::Md5 => hex::encode(Md5::digest(bytes)),
    }
}

/// Compares the payload digest with the one known a priori.
/// Targets without an expected checksum pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumValidator;

impl Validator for ChecksumValidator {
    fn validate(&self, bytes: &[u8], target: &ValidationTarget) -> Result<(), ValidationError> {
        let Some(expected) = &target.checksum else {
            return Ok(());
        };

        let actual = digest_hex(expected.algorithm, bytes);
        if actual != expected.hex {
            return Err(ValidationError::ChecksumMismatch {
                algorithm: expected.algorithm.as_str().to_string(),
                expected: expected.hex.clone(),
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MimeType;
    use crate::validate::Checksum;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            digest_hex(ChecksumAlgorithm::Md5, b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            digest_hex(ChecksumAlgorithm::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_mismatch_reports_both_digests() {
        let target = ValidationTarget::new(MimeType::Raw)
            .with_checksum(Checksum::md5("900150983CD24FB0D6963F7D28E17F72"));
        assert!(ChecksumValidator.validate(b"abc", &target).is_ok());

        match ChecksumValidator.validate(b"abd", &target) {
            Err(ValidationError::ChecksumMismatch {
                algorithm,
                expected,
                actual,
            }) => {
                assert_eq!(algorithm, "md5");
                assert_eq!(expected, "900150983cd24fb0d6963f7d28e17f72");
                assert_ne!(actual, expected);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_no_expected_checksum_passes() {
        let target = ValidationTarget::new(MimeType::Raw);
        assert!(ChecksumValidator.validate(b"anything", &target).is_ok());
    }
}
