// ABOUTME: Error types for BSON encoding, decoding, and object mapping.
// ABOUTME: Numeric conversion failures are classified as either overflow or truncation.

use std::fmt;

/// The result type for BSON operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during BSON encoding, decoding, or mapping.
#[derive(Debug)]
pub enum Error {
    /// Malformed data or a structural rule violation.
    Format(String),

    /// Unexpected end of input data.
    Truncated,

    /// Unconsumed bytes after decoding a complete document.
    TrailingBytes,

    /// Unrecognized element type byte encountered.
    InvalidElementType(u8),

    /// Invalid UTF-8 byte sequence in a string or element name.
    InvalidUtf8,

    /// A numeric conversion would change the value's magnitude.
    Overflow(String),

    /// A numeric conversion would lose precision.
    Truncation(String),

    /// An object graph contains a reference cycle.
    CircularReference,

    /// Container nesting too deep.
    MaxDepthExceeded,

    /// Document exceeds the configured size limit.
    MaxDocumentSizeExceeded,

    /// Invalid codec, class map, or discriminator registration.
    Configuration(String),

    /// A failure encoding or decoding a specific class member.
    Member {
        /// The class whose member failed.
        class: &'static str,
        /// The element name of the failing member.
        member: String,
        /// The underlying failure.
        source: Box<Error>,
    },

    /// IO error during encoding.
    Io(String),
}

impl Error {
    /// Returns a stable short name for the error category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Format(_)
            | Error::Truncated
            | Error::TrailingBytes
            | Error::InvalidElementType(_)
            | Error::InvalidUtf8 => "format",
            Error::Overflow(_) => "overflow",
            Error::Truncation(_) => "truncation",
            Error::CircularReference => "circular_reference",
            Error::MaxDepthExceeded => "max_depth_exceeded",
            Error::MaxDocumentSizeExceeded => "max_document_size_exceeded",
            Error::Configuration(_) => "configuration",
            Error::Member { source, .. } => source.kind(),
            Error::Io(_) => "io_error",
        }
    }

    /// Annotates an error with the class and member being processed.
    #[must_use]
    pub fn for_member(self, class: &'static str, member: &str) -> Self {
        // Keep the innermost annotation; it names the actual failure site.
        if matches!(self, Error::Member { .. }) {
            return self;
        }
        Error::Member {
            class,
            member: member.to_owned(),
            source: Box::new(self),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format(msg) => write!(f, "invalid BSON: {msg}"),
            Error::Truncated => write!(f, "unexpected end of input"),
            Error::TrailingBytes => write!(f, "trailing bytes after document"),
            Error::InvalidElementType(code) => write!(f, "invalid element type: 0x{code:02x}"),
            Error::InvalidUtf8 => write!(f, "invalid UTF-8 sequence"),
            Error::Overflow(msg) => write!(f, "overflow: {msg}"),
            Error::Truncation(msg) => write!(f, "truncation: {msg}"),
            Error::CircularReference => write!(f, "circular reference in object graph"),
            Error::MaxDepthExceeded => write!(f, "maximum container depth exceeded"),
            Error::MaxDocumentSizeExceeded => write!(f, "maximum document size exceeded"),
            Error::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Error::Member {
                class,
                member,
                source,
            } => write!(f, "member '{member}' of '{class}': {source}"),
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Member { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_member_source() {
        let err = Error::Overflow("70000 does not fit in i16".into()).for_member("Order", "qty");
        assert_eq!(err.kind(), "overflow");
        assert!(err.to_string().contains("'qty'"));
        assert!(err.to_string().contains("'Order'"));
    }

    #[test]
    fn member_annotation_is_not_nested() {
        let err = Error::Truncated
            .for_member("Inner", "a")
            .for_member("Outer", "b");
        match err {
            Error::Member { class, member, .. } => {
                assert_eq!(class, "Inner");
                assert_eq!(member, "a");
            }
            other => panic!("expected member error, got {other:?}"),
        }
    }
}
