//! XML codec for configuration trees
//!
//! Encoding is deterministic: attributes and children are written in the order
//! they appear in the [`ConfigNode`], with no added whitespace. Decoding keeps
//! qualified names and namespace declarations as plain attributes so that
//! `decode(encode(tree, None))` reproduces the tree.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::{NetconfError, Result};
use crate::node::ConfigNode;

/// Encode a tree into an XML fragment.
///
/// When `namespace` is given it becomes the default namespace of the root
/// element, replacing any `xmlns` attribute the root already carries.
pub fn encode(node: &ConfigNode, namespace: Option<&str>) -> Result<String> {
    node.validate()?;

    let mut writer = Writer::new(Vec::new());
    write_node(&mut writer, node, namespace)?;

    String::from_utf8(writer.into_inner()).map_err(encode_error)
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &ConfigNode, namespace: Option<&str>) -> Result<()> {
    let mut start = BytesStart::new(node.name());
    if let Some(ns) = namespace {
        start.push_attribute(("xmlns", ns));
    }
    for (key, value) in node.attributes() {
        if namespace.is_some() && key == "xmlns" {
            continue;
        }
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if node.value().is_none() && node.children().is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(encode_error);
    }

    writer.write_event(Event::Start(start)).map_err(encode_error)?;
    if let Some(value) = node.value() {
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(encode_error)?;
    }
    for child in node.children() {
        write_node(writer, child, None)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name())))
        .map_err(encode_error)
}

/// Element being assembled while its end tag is pending
struct OpenElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<ConfigNode>,
}

impl OpenElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(malformed)?
            .to_string();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(malformed)?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(malformed)?
                .to_string();
            let value = attr.unescape_value().map_err(malformed)?.into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    /// Close an element that had separate start and end tags
    fn finish(self) -> ConfigNode {
        // Whitespace between child elements is layout, not content
        let value = if self.children.is_empty() {
            Some(self.text)
        } else if self.text.trim().is_empty() {
            None
        } else {
            Some(self.text.trim().to_string())
        };
        ConfigNode::from_parts(self.name, self.attributes, value, self.children)
    }

    fn finish_empty(self) -> ConfigNode {
        ConfigNode::from_parts(self.name, self.attributes, None, self.children)
    }
}

/// Decode an XML document (or fragment with a single root) into a tree
pub fn decode(xml: &str) -> Result<ConfigNode> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<ConfigNode> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(OpenElement::from_start(&start)?),
            Event::Empty(start) => {
                let node = OpenElement::from_start(&start)?.finish_empty();
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let open = stack
                    .pop()
                    .ok_or_else(|| NetconfError::MalformedReply("unexpected end tag".into()))?;
                attach(&mut stack, &mut root, open.finish())?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8(data.into_inner().into_owned()).map_err(malformed)?;
                push_text(&mut stack, &text)?;
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(NetconfError::MalformedReply(format!(
            "document ended inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| NetconfError::MalformedReply("no root element".into()))
}

/// Decode raw bytes, rejecting invalid UTF-8
pub fn decode_bytes(bytes: &[u8]) -> Result<ConfigNode> {
    let xml = std::str::from_utf8(bytes).map_err(malformed)?;
    decode(xml)
}

fn attach(stack: &mut [OpenElement], root: &mut Option<ConfigNode>, node: ConfigNode) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    if root.is_some() {
        return Err(NetconfError::MalformedReply(
            "multiple root elements".into(),
        ));
    }
    *root = Some(node);
    Ok(())
}

fn push_text(stack: &mut [OpenElement], text: &str) -> Result<()> {
    match stack.last_mut() {
        Some(open) => {
            open.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(NetconfError::MalformedReply(
            "text outside of root element".into(),
        )),
    }
}

fn malformed(e: impl std::fmt::Display) -> NetconfError {
    NetconfError::MalformedReply(e.to_string())
}

fn encode_error(e: impl std::fmt::Display) -> NetconfError {
    NetconfError::Encode(e.to_string())
}
