use thiserror::Error;

/// Errors reading or writing schedule XML documents.
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("XML encoding error: {0}")]
    Encoding(#[from] quick_xml::encoding::EncodingError),

    #[error("Invalid UTF-8 in XML: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("I/O error writing XML: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed XML document: {0}")]
    Malformed(&'static str),
}

pub type XmlResult<T> = std::result::Result<T, XmlError>;
