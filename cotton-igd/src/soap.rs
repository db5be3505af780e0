use crate::xml;
use xmltree::{Element, EmitterConfig, XMLNode};

pub const ENVELOPE_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Build the envelope for invoking `action` on a service
///
/// Arguments are written in the order given, with their values escaped.
///
/// # Errors
///
/// Passes on any error from the XML writer.
pub fn build_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, String)],
) -> Result<String, xmltree::Error> {
    let mut request = Element::new(&format!("u:{action}"));
    request
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());
    for (name, value) in args {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text(value.clone()));
        request.children.push(XMLNode::Element(child));
    }

    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(request));

    let mut envelope = Element::new("s:Envelope");
    envelope
        .attributes
        .insert("xmlns:s".to_string(), ENVELOPE_NAMESPACE.to_string());
    envelope
        .attributes
        .insert("s:encodingStyle".to_string(), ENCODING_STYLE.to_string());
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .normalize_empty_elements(false);
    envelope.write_with_config(&mut buf, config)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Find the `<u:ActionResponse>` element in a parsed reply
///
/// Any namespace prefixes are accepted on the envelope, body and
/// response elements.
#[must_use]
pub fn action_response<'a>(
    document: &'a Element,
    action: &str,
) -> Option<&'a Element> {
    xml::find(document, &format!("*:Envelope.*:Body.*:{action}Response"))
}
