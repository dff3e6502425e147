use thiserror::Error;

use crate::{
    source::{CounterPoint, CounterType},
    tags::TagSet,
};

const MEASUREMENT_SPECIAL: &[u8] = b", \\";
const TAG_SPECIAL: &[u8] = b",= \\";

/// Errors raised when a counter point or tag cannot be represented in line protocol.
///
/// These are never recoverable: a point that cannot be formatted indicates malformed counter metadata, and exporting
/// a substituted value instead would silently corrupt the series.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// The counter's declared type is not `uint64`.
    #[error("counter '{name}' has unsupported type '{declared_type}' (only uint64 is supported)")]
    UnsupportedType {
        /// Name of the offending counter.
        name: String,

        /// Declared type of the offending counter.
        declared_type: String,
    },

    /// The counter has neither a section type nor a section identifier.
    #[error("unknown field type: counter '{name}' has neither a section type nor a section identifier")]
    UnqualifiedSection {
        /// Name of the offending counter.
        name: String,
    },

    /// The counter's section or name contains a line break, which would split the message in two.
    #[error("counter '{name}' contains a line break")]
    LineBreak {
        /// Name of the offending counter.
        name: String,
    },

    /// A tag (including the `hostname` tag) has an empty key or value, or contains a line break.
    #[error("tag '{key}' cannot be written: {reason}")]
    InvalidTag {
        /// Key of the offending tag.
        key: String,

        /// Why the tag was rejected.
        reason: &'static str,
    },
}

/// Formats counter points as InfluxDB line protocol.
///
/// Each call to [`write_point`](LineWriter::write_point) produces exactly one self-contained message:
///
/// ```text
/// <measurement>,hostname=<host>[,<key>=<value>...] value=<u64> <unix nanos>\n
/// ```
///
/// The tag segment is rendered once, when the writer is created, and reused verbatim for every message.
pub struct LineWriter {
    buf: Vec<u8>,
    tag_segment: Vec<u8>,
    int_writer: itoa::Buffer,
}

impl LineWriter {
    /// Creates a new `LineWriter` for the given hostname and tags.
    ///
    /// # Errors
    ///
    /// If the hostname or any tag key or value is empty or contains a line break, an error is returned.
    pub fn new(hostname: &str, tags: &TagSet) -> Result<Self, FormatError> {
        let mut tag_segment = Vec::new();
        write_tag(&mut tag_segment, "hostname", hostname)?;
        for (key, value) in tags {
            write_tag(&mut tag_segment, key, value)?;
        }

        Ok(LineWriter { buf: Vec::with_capacity(256), tag_segment, int_writer: itoa::Buffer::new() })
    }

    /// Formats a single point with the given timestamp, in nanoseconds since the Unix epoch.
    ///
    /// The returned slice is only valid until the next call.
    ///
    /// # Errors
    ///
    /// If the point has an unsupported declared type, belongs to a section with neither a type nor an identifier, or
    /// has a line break in its section or name, an error is returned and nothing is written.
    pub fn write_point(&mut self, point: &CounterPoint, timestamp: u64) -> Result<&[u8], FormatError> {
        if point.declared_type != CounterType::Uint64 {
            return Err(FormatError::UnsupportedType {
                name: point.name.clone(),
                declared_type: point.declared_type.to_string(),
            });
        }

        let section = match (point.section_type.as_str(), point.section_ident.as_str()) {
            ("", "") => return Err(FormatError::UnqualifiedSection { name: point.name.clone() }),
            ("", ident) => ident,
            (section_type, _) => section_type,
        };
        if has_line_break(section) || has_line_break(&point.name) {
            return Err(FormatError::LineBreak { name: point.name.clone() });
        }

        self.buf.clear();

        write_escaped(&mut self.buf, section, MEASUREMENT_SPECIAL);
        self.buf.push(b'.');
        write_escaped(&mut self.buf, &point.name, MEASUREMENT_SPECIAL);

        self.buf.extend_from_slice(&self.tag_segment);

        self.buf.extend_from_slice(b" value=");
        self.buf.extend_from_slice(self.int_writer.format(point.value).as_bytes());

        self.buf.push(b' ');
        self.buf.extend_from_slice(self.int_writer.format(timestamp).as_bytes());
        self.buf.push(b'\n');

        Ok(&self.buf)
    }
}

/// Formats a single point as an owned line-protocol message.
///
/// This is a convenience wrapper around [`LineWriter`] for one-off use.
///
/// # Errors
///
/// See [`LineWriter::write_point`].
pub fn format_point(
    point: &CounterPoint,
    tags: &TagSet,
    hostname: &str,
    timestamp: u64,
) -> Result<Vec<u8>, FormatError> {
    LineWriter::new(hostname, tags)?.write_point(point, timestamp).map(<[u8]>::to_vec)
}

fn write_tag(buf: &mut Vec<u8>, key: &str, value: &str) -> Result<(), FormatError> {
    let reason = if key.is_empty() {
        "empty key"
    } else if value.is_empty() {
        "empty value"
    } else if has_line_break(key) || has_line_break(value) {
        "contains a line break"
    } else {
        buf.push(b',');
        write_escaped(buf, key, TAG_SPECIAL);
        buf.push(b'=');
        write_escaped(buf, value, TAG_SPECIAL);
        return Ok(());
    };

    Err(FormatError::InvalidTag { key: key.to_string(), reason })
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

fn write_escaped(buf: &mut Vec<u8>, s: &str, special: &[u8]) {
    for &b in s.as_bytes() {
        if special.contains(&b) {
            buf.push(b'\\');
        }
        buf.push(b);
    }
}
