use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Listing page body decoded to UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub text: String,
    pub encoding: &'static str,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("page is not valid {encoding}")]
    Malformed { encoding: &'static str },
}

/// Decodes a fetched body. Order: BOM, `charset` in the content type, then detection.
///
/// Arabic boards still serve windows-1256 now and then, so detection is allowed to
/// pick legacy encodings.
pub fn decode_page(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedPage, DecodeError> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    let declared = content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()));
    if let Some(encoding) = declared {
        return decode_with(bytes, encoding);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    decode_with(bytes, detector.guess(None, true))
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
    })
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> Result<DecodedPage, DecodeError> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(DecodeError::Malformed {
            encoding: encoding.name(),
        });
    }
    Ok(DecodedPage {
        text: text.into_owned(),
        encoding: encoding.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_header_wins_over_detection() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1256.encode("مطور");
        let page = decode_page(&bytes, Some("text/html; Charset=\"windows-1256\"")).unwrap();
        assert_eq!(page.text, "مطور");
        assert_eq!(page.encoding, "windows-1256");
    }

    #[test]
    fn bom_is_honoured() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("وظيفة".as_bytes());
        let page = decode_page(&bytes, Some("text/html; charset=iso-8859-1")).unwrap();
        assert_eq!(page.encoding, "UTF-8");
        assert_eq!(page.text, "وظيفة");
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let err = decode_page(&[0x66, 0xFF, 0xFE, 0x6F], Some("text/html; charset=utf-8"));
        assert_eq!(err, Err(DecodeError::Malformed { encoding: "UTF-8" }));
    }
}
