//! Image format sniffing.
//!
//! Image validation proper (decode, resize, thumbnail) is an external
//! concern; the orchestrator only needs to know whether uploaded bytes look
//! like a supported still image and which mime type to record. This is a
//! pure function over the first few bytes.

/// Recognise a supported image format from magic bytes.
///
/// Returns the mime type, or `None` for anything that is not a JPEG, PNG,
/// or WebP payload.
#[must_use]
pub fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_jpeg() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some("image/jpeg"));
    }

    #[test]
    fn recognises_png() {
        assert_eq!(
            sniff_format(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00]),
            Some("image/png")
        );
    }

    #[test]
    fn recognises_webp() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"WEBP");
        assert_eq!(sniff_format(&bytes), Some("image/webp"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(sniff_format(b"hello").is_none());
        assert!(sniff_format(&[]).is_none());
    }
}
