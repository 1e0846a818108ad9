//! Navigation wire format: the `<requestnavdata>` request and the
//! `<contentdataset>` responses rendered for the device.

use std::collections::HashMap;
use std::fmt::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::index::{Branch, Track};

pub use quick_xml::escape::escape;

/// Characters left alone by JavaScript's `encodeURIComponent`, which the
/// device firmware expects.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, PartialEq)]
pub enum RequestError {
    MissingEnvelope,
    Malformed(String),
    MissingField(&'static str),
    InvalidNumber(&'static str, String),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::MissingEnvelope => write!(f, "no <requestnavdata> element"),
            RequestError::Malformed(e) => write!(f, "malformed request: {}", e),
            RequestError::MissingField(name) => write!(f, "missing <{}>", name),
            RequestError::InvalidNumber(name, value) => {
                write!(f, "invalid number in <{}>: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for RequestError {}

#[derive(Debug, Clone, PartialEq)]
pub struct NavRequest {
    /// `None` requests the root listing.
    pub node_id: Option<i64>,
    pub num_elem: usize,
    pub from_index: usize,
    pub superscroll: Option<String>,
}

fn parse_number<T: std::str::FromStr>(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<Option<T>, RequestError> {
    match fields.get(name) {
        Some(value) if !value.is_empty() => value
            .parse()
            .map(Some)
            .map_err(|_| RequestError::InvalidNumber(name, value.clone())),
        _ => Ok(None),
    }
}

const ENVELOPE: &str = "<requestnavdata";

/// Text of each direct child of the envelope, keyed by local name. Nested
/// elements are skipped and reading stops at the closing envelope tag.
fn read_fields(xml: &str) -> quick_xml::Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut fields = HashMap::new();
    let mut depth = 0;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(_) => {
                depth += 1;
                text.clear();
            }
            Event::Empty(e) if depth == 1 => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                fields.insert(name, String::new());
            }
            Event::Text(t) if depth == 2 => text.push_str(&t.unescape()?),
            Event::CData(c) if depth == 2 => text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(e) => {
                if depth == 2 {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    fields.insert(name, text.trim().to_string());
                }
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(fields)
}

impl NavRequest {
    pub fn parse(body: &str) -> Result<NavRequest, RequestError> {
        let start = body
            .find(ENVELOPE)
            .ok_or(RequestError::MissingEnvelope)?;

        let mut fields = read_fields(&body[start..])
            .map_err(|e| RequestError::Malformed(e.to_string()))?;

        let node_id = parse_number::<i64>(&fields, "nodeid")?.filter(|&id| id != 0);
        let num_elem =
            parse_number(&fields, "numelem")?.ok_or(RequestError::MissingField("numelem"))?;
        let from_index = parse_number(&fields, "fromindex")?.unwrap_or(0);
        let superscroll = fields.remove("superscroll").filter(|s| !s.is_empty());

        Ok(NavRequest {
            node_id,
            num_elem,
            from_index,
            superscroll,
        })
    }
}

/// List form: `totnumelem` is the number of matches, `numelem` the number of
/// entries sent.
pub fn render_list(items: &[Branch], from_index: usize, total: usize, alphanumeric: bool) -> String {
    let mut xml = String::from("<contentdataset>");

    for item in items {
        let _ = write!(
            xml,
            "<contentdata><name>{}</name><nodeid>{}</nodeid><branch/></contentdata>",
            escape(&item.name),
            item.node_id
        );
    }

    let _ = write!(
        xml,
        "<totnumelem>{}</totnumelem><fromindex>{}</fromindex><numelem>{}</numelem>",
        total,
        from_index,
        items.len()
    );

    if alphanumeric {
        xml.push_str("<alphanumeric/>");
    }

    xml.push_str("</contentdataset>");
    xml
}

pub fn track_url(base_url: &str, root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);

    format!(
        "{}{}",
        base_url,
        percent_encode(relative.as_os_str().as_bytes(), URI_COMPONENT)
    )
}

/// Track form. Existing clients read the summary fields swapped relative to
/// the list form: `totnumelem` is the number of tracks sent and `numelem`
/// the number of matches.
pub fn render_tracks(
    tracks: &[Track],
    from_index: usize,
    total: usize,
    base_url: &str,
    root: &Path,
) -> String {
    let mut xml = String::from("<contentdataset>");

    for track in tracks {
        let year = track.year.map(|y| y.to_string()).unwrap_or_default();

        let _ = write!(
            xml,
            "<contentdata>\
            <name>{name}</name>\
            <nodeid>{node_id}</nodeid>\
            <playable/>\
            <url>{url}</url>\
            <title>{number} {name}</title>\
            <album>{album}</album>\
            <trackno>{number}</trackno>\
            <artist>{artist}</artist>\
            <genre>{genre}</genre>\
            <year>{year}</year>\
            <bitrate></bitrate>\
            <playlength>{length}</playlength>\
            </contentdata>",
            name = escape(&track.name),
            node_id = track.node_id,
            url = escape(&track_url(base_url, root, &track.file)),
            number = track.number,
            album = escape(&track.album),
            artist = escape(&track.artist),
            genre = escape(&track.genres.join(",")),
            year = year,
            length = track.duration.trunc() as i64,
        );
    }

    let _ = write!(
        xml,
        "<totnumelem>{}</totnumelem><fromindex>{}</fromindex><numelem>{}</numelem><alphanumeric/>",
        tracks.len(),
        from_index,
        total
    );

    xml.push_str("</contentdataset>");
    xml
}
