// Lenient markup reading shared by the departures scraper and the stop feed parser.
//
// The upstream site serves loosely formed HTML for departures and plain XML for
// the stop feeds, so end tag names are not checked. HTML entities the pages use
// (&nbsp;, &pound; ...) are resolved alongside the XML ones, and a stray or unknown
// entity leaves only itself undecoded.

use quick_xml::Reader;
use quick_xml::events::{BytesCData, BytesText};

pub(crate) fn lenient_reader(document: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(document);
    reader.trim_text(false);
    reader.check_end_names(false);
    reader.expand_empty_elements(false);
    reader
}

/// Lower-cased local name of a start/end tag.
pub(crate) fn tag_name(local_name: &[u8]) -> String {
    String::from_utf8_lossy(local_name).to_ascii_lowercase()
}

const MAX_ENTITY_LEN: usize = 10;

fn html_entity(name: &str) -> Option<&'static str> {
    match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        "nbsp" => Some(" "),
        "pound" => Some("£"),
        "copy" => Some("©"),
        "middot" => Some("·"),
        "ndash" => Some("–"),
        "mdash" => Some("—"),
        "lsquo" => Some("‘"),
        "rsquo" => Some("’"),
        "eacute" => Some("é"),
        _ => None,
    }
}

fn numeric_entity(name: &str) -> Option<char> {
    let digits = name.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}

pub(crate) fn decode_text(text: &BytesText<'_>) -> String {
    match text.unescape_with(html_entity) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => decode_entities_lossy(&String::from_utf8_lossy(text)),
    }
}

/// Resolve every entity that can be resolved and keep the rest verbatim.
fn decode_entities_lossy(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];

        let entity = tail
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_LEN)
            .and_then(|end| {
                let name = &tail[..end];
                let resolved = match numeric_entity(name) {
                    Some(c) => Some(c.to_string()),
                    None => html_entity(name).map(str::to_string),
                };
                resolved.map(|text| (text, end + 1))
            });

        match entity {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

pub(crate) fn decode_cdata(data: &BytesCData<'_>) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// Collapse every run of consecutive spaces into a single space and trim.
pub(crate) fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut previous_space = false;
    for c in line.chars() {
        if c == ' ' {
            if !previous_space {
                out.push(c);
            }
            previous_space = true;
        } else {
            out.push(c);
            previous_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_space_runs() {
        assert_eq!(collapse_spaces("22  Ocean   Terminal  2 min "), "22 Ocean Terminal 2 min");
        assert_eq!(collapse_spaces("   "), "");
    }

    #[test]
    fn html_entities_do_not_fail_decoding() {
        let text = BytesText::from_escaped("Princes&nbsp;Street &amp; Leith");
        assert_eq!(decode_text(&text), "Princes Street & Leith");
    }

    #[test]
    fn unknown_entity_leaves_the_others_decoded() {
        let text = BytesText::from_escaped("Fish &amp; Chips &bogus; &#163;2&nbsp;&pound;");
        assert_eq!(decode_text(&text), "Fish & Chips &bogus; £2 £");
    }

    #[test]
    fn stray_ampersand_is_kept() {
        let text = BytesText::from_escaped("Salamander St & Baltic St &amp; more");
        assert_eq!(decode_text(&text), "Salamander St & Baltic St & more");
    }
}
