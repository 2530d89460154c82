use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Read;
use thiserror::Error;

/// Upper bound on a decompressed body (50MB).
const MAX_DECODED_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body could not be inflated with the declared encoding
    #[error("corrupt {encoding} stream: {source}")]
    Corrupt {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// Decompression produced more than the size limit
    #[error("decoded body exceeds {0} bytes")]
    TooLarge(usize),
}

/// Reverses transfer compression according to the declared encoding.
///
/// Only `declared_encoding` is consulted, never the body's magic bytes:
///
/// - contains `gzip` (any case): gunzip; a body that fails to gunzip is
///   returned unchanged, as servers mislabel plain bodies
/// - contains `deflate`: inflate (zlib-wrapped or raw); failure is an error
/// - anything else, or no declaration: returned unchanged
pub fn decode(body: Vec<u8>, declared_encoding: Option<&str>) -> Result<Vec<u8>, DecodeError> {
    let declared = declared_encoding.unwrap_or_default().to_ascii_lowercase();

    if declared.contains("gzip") {
        match read_bounded(GzDecoder::new(body.as_slice()), "gzip") {
            Ok(decoded) => Ok(decoded),
            Err(DecodeError::Corrupt { source, .. }) => {
                tracing::warn!(error = %source, "Body declared gzip but is not, using it as-is");
                Ok(body)
            }
            Err(e) => Err(e),
        }
    } else if declared.contains("deflate") {
        match read_bounded(ZlibDecoder::new(body.as_slice()), "deflate") {
            Err(DecodeError::Corrupt { .. }) => {
                read_bounded(DeflateDecoder::new(body.as_slice()), "deflate")
            }
            other => other,
        }
    } else {
        Ok(body)
    }
}

fn read_bounded<R: Read>(reader: R, encoding: &'static str) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .take(MAX_DECODED_SIZE as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Corrupt { encoding, source })?;
    if out.len() > MAX_DECODED_SIZE {
        return Err(DecodeError::TooLarge(MAX_DECODED_SIZE));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const XML: &[u8] = b"<?xml version=\"1.0\"?><rss version=\"2.0\"><channel></channel></rss>";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_plain_body_unchanged() {
        assert_eq!(decode(XML.to_vec(), None).unwrap(), XML);
        assert_eq!(decode(XML.to_vec(), Some("identity")).unwrap(), XML);
    }

    #[test]
    fn test_decode_is_idempotent_on_plain_body() {
        let once = decode(XML.to_vec(), None).unwrap();
        let twice = decode(once.clone(), None).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_gzip_round_trip() {
        assert_eq!(decode(gzip(XML), Some("gzip")).unwrap(), XML);
        assert_eq!(decode(gzip(XML), Some("X-GZIP")).unwrap(), XML);
    }

    #[test]
    fn test_misdeclared_gzip_falls_back_to_raw() {
        assert_eq!(decode(XML.to_vec(), Some("gzip")).unwrap(), XML);
    }

    #[test]
    fn test_compressed_body_without_declaration_is_not_sniffed() {
        let compressed = gzip(XML);
        assert_eq!(decode(compressed.clone(), None).unwrap(), compressed);
    }

    #[test]
    fn test_zlib_deflate_round_trip() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(XML).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decode(compressed, Some("deflate")).unwrap(), XML);
    }

    #[test]
    fn test_raw_deflate_round_trip() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(XML).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decode(compressed, Some("Deflate")).unwrap(), XML);
    }

    #[test]
    fn test_corrupt_deflate_is_an_error() {
        let garbage = vec![0xff_u8; 64];
        let result = decode(garbage, Some("deflate"));
        assert!(matches!(
            result,
            Err(DecodeError::Corrupt {
                encoding: "deflate",
                ..
            })
        ));
    }
}
