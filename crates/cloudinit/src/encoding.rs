//! write_files content encodings

use std::io::Read;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;

use crate::error::CloudInitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    PlainText,
    Base64,
    Gzip,
    GzipBase64,
}

impl Encoding {
    /// Recognise an encoding name, `None` if unknown.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text/plain" => Some(Encoding::PlainText),
            "base64" | "b64" => Some(Encoding::Base64),
            "gzip" | "gz" => Some(Encoding::Gzip),
            "gzip+base64" | "gz+base64" | "gzip+b64" | "gz+b64" => Some(Encoding::GzipBase64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::PlainText => "text/plain",
            Encoding::Base64 => "base64",
            Encoding::Gzip => "gzip",
            Encoding::GzipBase64 => "gzip+base64",
        }
    }

    /// Decode `content` into the bytes to be written.
    pub fn decode(&self, path: &str, content: &str) -> Result<Vec<u8>, CloudInitError> {
        let fail = |reason: String| CloudInitError::Decode {
            path: path.to_string(),
            encoding: self.as_str().to_string(),
            reason,
        };
        match self {
            Encoding::PlainText => Ok(content.as_bytes().to_vec()),
            Encoding::Base64 => decode_base64(content).map_err(fail),
            Encoding::Gzip => gunzip(content.as_bytes()).map_err(fail),
            Encoding::GzipBase64 => {
                let compressed = decode_base64(content).map_err(fail)?;
                gunzip(&compressed).map_err(fail)
            }
        }
    }
}

fn decode_base64(content: &str) -> Result<Vec<u8>, String> {
    // Encoded payloads are often wrapped across lines
    let compact: String = content.split_whitespace().collect();
    STANDARD.decode(compact).map_err(|e| e.to_string())
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Encoding::parse("b64"), Some(Encoding::Base64));
        assert_eq!(Encoding::parse("gz"), Some(Encoding::Gzip));
        assert_eq!(Encoding::parse("gz+b64"), Some(Encoding::GzipBase64));
        assert_eq!(Encoding::parse("GZIP+BASE64"), Some(Encoding::GzipBase64));
        assert_eq!(Encoding::parse("rot13"), None);
    }

    #[test]
    fn test_gzip_base64_yields_original_bytes() {
        let original = b"apiVersion: kubeadm.k8s.io/v1beta3\nkind: JoinConfiguration\n";
        let encoded = STANDARD.encode(gzip(original));
        let decoded = Encoding::GzipBase64.decode("/f", &encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_base64_tolerates_line_wrapping() {
        let decoded = Encoding::Base64.decode("/f", "aGVs\nbG8=\n").unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn test_invalid_base64_is_a_decode_error() {
        let err = Encoding::Base64.decode("/f", "!!!").unwrap_err();
        assert!(matches!(err, CloudInitError::Decode { .. }));
    }
}
