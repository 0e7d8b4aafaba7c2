//! Character encodings of fetched pages and stylesheets.
//!
//! Bodies are decoded with the encoding the server declared so the markup can
//! be tokenized as text, and encoded back with the same encoding before they
//! are written. Bytes outside of rewritten links come back unchanged.

use encoding_rs::{Encoding, UTF_8};
use tracing::debug;

/// How far into a document `<meta charset>` and `@charset` are looked for.
const SNIFF_LIMIT: usize = 1024;

/// Text of a fetched body together with the encoding it was decoded from.
#[derive(Debug, Clone)]
pub struct DecodedBody {
    pub text: String,
    pub encoding: &'static Encoding,
}

impl DecodedBody {
    /// Encodes `text` the way the original body was encoded. Characters the
    /// encoding cannot represent become numeric character references.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.encoding.encode(text);
        bytes.into_owned()
    }
}

pub fn decode_markup(body: &[u8], content_type: &str) -> DecodedBody {
    let label = charset_from_content_type(content_type)
        .or_else(|| find_charset_label(&sniff_prefix(body), "charset="));
    decode_with(body, label.as_deref())
}

pub fn decode_stylesheet(body: &[u8], content_type: &str) -> DecodedBody {
    let label = charset_from_content_type(content_type).or_else(|| {
        let prefix = sniff_prefix(body);
        prefix
            .trim_start_matches('\u{feff}')
            .starts_with("@charset")
            .then(|| find_charset_label(&prefix, "@charset"))
            .flatten()
    });
    decode_with(body, label.as_deref())
}

fn decode_with(body: &[u8], label: Option<&str>) -> DecodedBody {
    let declared = label.and_then(|label| Encoding::for_label(label.as_bytes()));
    let encoding = match Encoding::for_bom(body) {
        Some((encoding, _)) => encoding,
        None => declared.unwrap_or(UTF_8),
    };
    debug!("Decoding body as {}", encoding.name());

    // the BOM stays in the text and is written back with it
    let (text, _) = encoding.decode_without_bom_handling(body);
    DecodedBody {
        text: text.into_owned(),
        encoding: encoding.output_encoding(),
    }
}

pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let label = value.trim().trim_matches('"').trim_matches('\'');
        (!label.is_empty()).then(|| label.to_string())
    })
}

fn sniff_prefix(body: &[u8]) -> String {
    String::from_utf8_lossy(&body[..body.len().min(SNIFF_LIMIT)]).into_owned()
}

/// Finds the label following `marker`, as in `charset=koi8-r` or
/// `@charset "koi8-r"`.
fn find_charset_label(prefix: &str, marker: &str) -> Option<String> {
    let lower = prefix.to_ascii_lowercase();
    let mut search_start = 0;

    while let Some(relative) = lower[search_start..].find(marker) {
        let label_start = search_start + relative + marker.len();
        let label: String = prefix[label_start..]
            .trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '"' || c == '\'')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
            .collect();
        if !label.is_empty() {
            return Some(label);
        }
        search_start = label_start;
    }

    None
}
