//! Generic XML reading and writing over [`Params`].
//!
//! Writing follows one rule for every dialect: a map becomes child
//! elements, a list under key `K` becomes repeated `<K>` elements, and a
//! scalar becomes text. Wrapped lists (`<Topics><member>…</member></Topics>`)
//! are expressed by nesting, see [`members`] and [`entries`].
//!
//! Reading is the inverse: an element with children becomes a map, an
//! element with only text becomes a string, and repeated siblings collapse
//! into a list.

use std::collections::BTreeMap;
use std::io::{self, Write};

use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::{Reader, Writer};

use mockstack_core::{Params, Value};

/// Errors that can occur while reading or writing XML.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// An I/O error during XML writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An error from the underlying quick-xml library.
    #[error("XML processing error: {0}")]
    QuickXml(#[from] quick_xml::Error),

    /// A required XML element was missing.
    #[error("missing required XML element: {0}")]
    MissingElement(String),

    /// The document ended in the middle of an element.
    #[error("unexpected end of document inside <{0}>")]
    UnexpectedEof(String),

    /// Text or names that could not be decoded.
    #[error("failed to parse value: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Wrap a list the way query responses expect: `<K><member>…</member></K>`.
#[must_use]
pub fn members(items: Vec<Value>) -> Value {
    Value::Map(Params::new().with("member", Value::List(items)))
}

/// Wrap a string map as `<K><entry><key/><value/></entry>…</K>`.
#[must_use]
pub fn entries(map: &BTreeMap<String, String>) -> Value {
    let items: Vec<Value> = map
        .iter()
        .map(|(k, v)| Value::Map(Params::new().with("key", k).with("value", v)))
        .collect();
    Value::Map(Params::new().with("entry", Value::List(items)))
}

/// Write every entry of `params` as child elements.
///
/// # Errors
/// Returns `io::Error` if writing to the underlying writer fails.
pub fn write_params<W: Write>(writer: &mut Writer<W>, params: &Params) -> io::Result<()> {
    for (tag, value) in params.iter() {
        write_value(writer, tag, value)?;
    }
    Ok(())
}

/// Write the content of an element holding `value`: child elements for a
/// map, text for a scalar.
///
/// # Errors
/// Returns `io::Error` if writing to the underlying writer fails.
pub fn write_content<W: Write>(writer: &mut Writer<W>, value: &Value) -> io::Result<()> {
    match value {
        Value::Map(map) => write_params(writer, map),
        Value::Null | Value::List(_) => Ok(()),
        scalar => {
            let text = scalar.to_text().unwrap_or_default();
            writer.write_event(Event::Text(BytesText::new(&text)))
        }
    }
}

fn write_value<W: Write>(writer: &mut Writer<W>, tag: &str, value: &Value) -> io::Result<()> {
    match value {
        Value::Null => {}
        Value::List(items) => {
            for item in items {
                write_value(writer, tag, item)?;
            }
        }
        Value::Map(map) => {
            writer
                .create_element(tag)
                .write_inner_content(|w| write_params(w, map))?;
        }
        scalar => {
            let text = scalar.to_text().unwrap_or_default();
            writer
                .create_element(tag)
                .write_text_content(BytesText::new(&text))?;
        }
    }
    Ok(())
}

/// Serialize a complete document: declaration plus `<root xmlns=…>` wrapping
/// the result of `content`.
#[must_use]
pub fn document<F>(root: &str, namespace: Option<&str>, content: F) -> Vec<u8>
where
    F: Fn(&mut Writer<&mut Vec<u8>>) -> io::Result<()>,
{
    let mut buf = Vec::with_capacity(512);
    if let Err(e) = write_document(&mut buf, root, namespace, content) {
        tracing::error!(error = %e, root, "failed to serialize XML document");
        buf.clear();
    }
    buf
}

fn write_document<F>(buf: &mut Vec<u8>, root: &str, namespace: Option<&str>, content: F) -> io::Result<()>
where
    F: Fn(&mut Writer<&mut Vec<u8>>) -> io::Result<()>,
{
    let mut writer = Writer::new(buf);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let element = writer.create_element(root);
    let element = match namespace {
        Some(ns) => element.with_attribute(("xmlns", ns)),
        None => element,
    };
    element.write_inner_content(|w| content(w))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse a document into its root element name and content.
///
/// # Errors
/// Returns `XmlError` if the document is malformed or has no root element.
pub fn parse_document(xml: &[u8]) -> Result<(String, Params), XmlError> {
    let mut reader = Reader::from_reader(xml);

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = decode_name(e.local_name().as_ref())?;
                let content = match read_element(&mut reader, &name)? {
                    Value::Map(params) => params,
                    _ => Params::new(),
                };
                return Ok((name, content));
            }
            Event::Empty(e) => {
                return Ok((decode_name(e.local_name().as_ref())?, Params::new()));
            }
            Event::Eof => {
                return Err(XmlError::MissingElement("root element".to_owned()));
            }
            // Skip declaration, comments, processing instructions, whitespace.
            _ => {}
        }
    }
}

/// Read the content of the element whose start tag was just consumed,
/// through its matching end tag.
fn read_element(reader: &mut Reader<&[u8]>, name: &str) -> Result<Value, XmlError> {
    let mut text = String::new();
    let mut children = Params::new();
    let mut has_children = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                has_children = true;
                let child = decode_name(e.local_name().as_ref())?;
                let value = read_element(reader, &child)?;
                push_child(&mut children, child, value);
            }
            Event::Empty(e) => {
                has_children = true;
                let child = decode_name(e.local_name().as_ref())?;
                push_child(&mut children, child, Value::String(String::new()));
            }
            Event::Text(e) => {
                let decoded = e
                    .decode()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::CData(e) => {
                text.push_str(&decode_name(&e)?);
            }
            Event::GeneralRef(e) => {
                text.push_str(&resolve_entity(&decode_name(&e)?)?);
            }
            Event::End(_) => {
                return Ok(if has_children {
                    Value::Map(children)
                } else {
                    Value::String(text)
                });
            }
            Event::Eof => return Err(XmlError::UnexpectedEof(name.to_owned())),
            _ => {}
        }
    }
}

fn push_child(children: &mut Params, name: String, value: Value) {
    let merged = match children.remove(&name) {
        None => value,
        Some(Value::List(mut items)) => {
            items.push(value);
            Value::List(items)
        }
        Some(previous) => Value::List(vec![previous, value]),
    };
    children.set(name, merged);
}

fn decode_name(raw: &[u8]) -> Result<String, XmlError> {
    std::str::from_utf8(raw)
        .map(ToOwned::to_owned)
        .map_err(|e| XmlError::ParseError(e.to_string()))
}

fn resolve_entity(name: &str) -> Result<String, XmlError> {
    let resolved = match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => name.strip_prefix('#').and_then(|num| {
            let code = match num.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse().ok(),
            };
            code.and_then(char::from_u32)
        }),
    };
    resolved
        .map(String::from)
        .ok_or_else(|| XmlError::ParseError(format!("unknown entity &{name};")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(params: &Params) -> String {
        let xml = document("Root", Some("urn:test"), |w| write_params(w, params));
        String::from_utf8(xml).unwrap()
    }

    #[test]
    fn test_should_write_declaration_and_namespace() {
        let xml = render(&Params::new().with("Name", "a"));
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Root xmlns=\"urn:test\"><Name>a</Name></Root>"));
    }

    #[test]
    fn test_should_repeat_elements_for_lists() {
        let bucket = |n: &str| Value::Map(Params::new().with("Name", n));
        let params = Params::new().with(
            "Buckets",
            Params::new().with("Bucket", vec![bucket("a"), bucket("b")]),
        );
        let xml = render(&params);
        assert!(xml.contains(
            "<Buckets><Bucket><Name>a</Name></Bucket><Bucket><Name>b</Name></Bucket></Buckets>"
        ));
    }

    #[test]
    fn test_should_wrap_members_and_entries() {
        let mut attrs = BTreeMap::new();
        attrs.insert("DisplayName".to_owned(), "x".to_owned());
        let params = Params::new()
            .with("Topics", members(vec![Value::from("t1")]))
            .with("Attributes", entries(&attrs));
        let xml = render(&params);
        assert!(xml.contains("<Topics><member>t1</member></Topics>"));
        assert!(xml.contains(
            "<Attributes><entry><key>DisplayName</key><value>x</value></entry></Attributes>"
        ));
    }

    #[test]
    fn test_should_escape_special_characters() {
        let xml = render(&Params::new().with("Message", "a < b & c"));
        assert!(xml.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn test_should_parse_nested_document() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <LocationConstraint>eu-west-1</LocationConstraint>
</CreateBucketConfiguration>"#;
        let (root, params) = parse_document(xml).unwrap();
        assert_eq!(root, "CreateBucketConfiguration");
        assert_eq!(params.str("LocationConstraint"), Some("eu-west-1"));
    }

    #[test]
    fn test_should_collapse_repeated_siblings_into_list() {
        let xml = b"<Delete><Object><Key>a</Key></Object><Object><Key>b</Key></Object></Delete>";
        let (_, params) = parse_document(xml).unwrap();
        let objects = params.list("Object").unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].as_map().unwrap().str("Key"), Some("b"));
    }

    #[test]
    fn test_should_resolve_entities_in_text() {
        let (_, params) = parse_document(b"<R><Key>a &amp; b&#65;</Key></R>").unwrap();
        assert_eq!(params.str("Key"), Some("a & bA"));
    }

    #[test]
    fn test_should_reject_truncated_document() {
        assert!(parse_document(b"<Root><Child>").is_err());
        assert!(parse_document(b"").is_err());
    }
}
