//! Frame encoding
//!
//! Notifications are published as UTF-8 text when they decode cleanly and as
//! lowercase hex otherwise, so a binary frame is never lost. Frames travelling
//! from the bus to the link are not touched at all.

/// One payload unit exchanged over the link or the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
}

/// Text form of a frame as it goes out on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameText {
    Utf8(String),
    Hex(String),
}

impl FrameText {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Utf8(s) | Self::Hex(s) => s,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Self::Utf8(s) | Self::Hex(s) => s,
        }
    }

    pub fn is_hex(&self) -> bool {
        matches!(self, Self::Hex(_))
    }
}

impl Frame {
    #[cfg(test)]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode for publishing: decoded text when valid UTF-8, hex otherwise
    pub fn encode_text(&self) -> FrameText {
        match std::str::from_utf8(&self.payload) {
            Ok(text) => FrameText::Utf8(text.to_string()),
            Err(_) => FrameText::Hex(hex::encode(&self.payload)),
        }
    }

    #[cfg(test)]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl From<Vec<u8>> for Frame {
    fn from(payload: Vec<u8>) -> Self {
        Self { payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_notification_published_verbatim() {
        let frame = Frame::new(vec![0x7b, 0x22, 0x74, 0x22, 0x3a, 0x31, 0x7d]);
        assert_eq!(frame.encode_text(), FrameText::Utf8("{\"t\":1}".to_string()));
    }

    #[test]
    fn test_binary_notification_falls_back_to_hex() {
        let frame = Frame::new(vec![0xff, 0x00]);
        let text = frame.encode_text();
        assert!(text.is_hex());
        assert_eq!(text.as_str(), "ff00");
    }

    #[test]
    fn test_hex_fallback_recovers_original_bytes() {
        let payloads: [&[u8]; 4] = [
            &[0xff, 0x00],
            &[0xc3, 0x28],
            &[0x80],
            &[0x41, 0xe2, 0x82, 0x00, 0xde, 0xad, 0xbe, 0xef],
        ];
        for bytes in payloads {
            let text = Frame::new(bytes.to_vec()).encode_text();
            assert!(text.is_hex(), "{:02X?} should not decode as UTF-8", bytes);
            assert_eq!(hex::decode(text.as_str()).unwrap(), bytes);
            assert_eq!(text.as_str(), text.as_str().to_lowercase());
        }
    }

    #[test]
    fn test_text_is_not_trimmed() {
        let frame = Frame::new(b"  21.5C\r\n".to_vec());
        assert_eq!(frame.encode_text().as_str(), "  21.5C\r\n");
    }

    #[test]
    fn test_multibyte_utf8_is_text() {
        let frame = Frame::new("température 21°".as_bytes().to_vec());
        assert_eq!(
            frame.encode_text(),
            FrameText::Utf8("température 21°".to_string())
        );
    }

    #[test]
    fn test_empty_frame_is_empty_text() {
        let frame = Frame::new(Vec::new());
        assert!(frame.is_empty());
        assert_eq!(frame.encode_text(), FrameText::Utf8(String::new()));
    }
}
