use std::{fmt, io};

use thiserror::Error;

mod memory;
pub use self::memory::{MemoryHandle, MemorySource};

mod snapshot;
pub use self::snapshot::{SnapshotFile, SnapshotHandle, DEFAULT_INSTANCE_DIR, SNAPSHOT_FILE_NAME};

/// Errors that could occur while opening or enumerating a counter source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The counter source does not exist (yet), or could not be attached to.
    #[error("counter source unavailable: {reason}")]
    Unavailable {
        /// Details about why the source could not be opened.
        reason: String,
    },

    /// The counter source was replaced or abandoned by its writer, and the handle must be reopened.
    #[error("counter source handle is stale")]
    Stale,

    /// The counter source contained data that could not be interpreted.
    #[error("malformed counter data at line {line}: {reason}")]
    Malformed {
        /// Line number (1-based) of the offending entry.
        line: usize,

        /// Details about what was wrong with the entry.
        reason: String,
    },

    /// Generic I/O failure while reading the counter source.
    #[error("I/O error while reading counter source: {0}")]
    Io(#[from] io::Error),
}

/// Declared numeric kind of a counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CounterType {
    /// Unsigned 64-bit integer.
    Uint64,

    /// Any other declared kind, carried through by name.
    ///
    /// Counters of this kind cannot be exported, and attempting to format one is a fatal error.
    Other(String),
}

impl CounterType {
    /// Parses a declared type name as exposed by a counter source.
    pub fn from_name(name: &str) -> Self {
        match name {
            "uint64" | "uint64_t" => CounterType::Uint64,
            other => CounterType::Other(other.to_string()),
        }
    }

    /// Returns the canonical name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            CounterType::Uint64 => "uint64",
            CounterType::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time snapshot of a single counter.
///
/// Points are produced fresh by every enumeration of a [`CounterHandle`], and are never retained across cycles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterPoint {
    /// Category of the section the counter lives in. May be empty.
    pub section_type: String,

    /// Instance identifier of the section the counter lives in. May be empty.
    pub section_ident: String,

    /// Name of the counter, unique within its section.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// Declared numeric kind.
    pub declared_type: CounterType,

    /// Value at the time the point was read.
    pub value: u64,
}

impl CounterPoint {
    /// Creates a `uint64` point in a section identified only by its type.
    pub fn new<T, N>(section_type: T, name: N, value: u64) -> Self
    where
        T: Into<String>,
        N: Into<String>,
    {
        CounterPoint {
            section_type: section_type.into(),
            section_ident: String::new(),
            name: name.into(),
            description: String::new(),
            declared_type: CounterType::Uint64,
            value,
        }
    }

    /// Sets the section identifier.
    #[must_use]
    pub fn with_ident<I: Into<String>>(mut self, section_ident: I) -> Self {
        self.section_ident = section_ident.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description<D: Into<String>>(mut self, description: D) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the declared type.
    #[must_use]
    pub fn with_declared_type(mut self, declared_type: CounterType) -> Self {
        self.declared_type = declared_type;
        self
    }

    /// Returns the fully-qualified field name: `type.`, then `ident.`, then the counter name, skipping empty parts.
    ///
    /// This is the name shown by the field listing and matched by [`FieldFilter`](crate::FieldFilter).
    pub fn qualified_name(&self) -> String {
        let mut qualified = String::with_capacity(
            self.section_type.len() + self.section_ident.len() + self.name.len() + 2,
        );
        for part in [&self.section_type, &self.section_ident] {
            if !part.is_empty() {
                qualified.push_str(part);
                qualified.push('.');
            }
        }
        qualified.push_str(&self.name);
        qualified
    }
}

/// An opened counter source.
pub trait CounterHandle {
    /// Enumerates every currently visible counter point, in source order.
    ///
    /// # Errors
    ///
    /// Any error means the handle is no longer usable and must be reopened from its [`CounterSource`].
    fn points(&mut self) -> Result<Vec<CounterPoint>, SourceError>;
}

/// Something that can be opened to yield a [`CounterHandle`].
pub trait CounterSource {
    /// Handle type yielded by a successful open.
    type Handle: CounterHandle;

    /// Attempts to open the source once.
    ///
    /// # Errors
    ///
    /// If the source cannot be attached to right now, an error is returned. Callers are expected to retry.
    fn open(&mut self) -> Result<Self::Handle, SourceError>;

    /// Clears any transient error state left behind by a failed [`open`](CounterSource::open).
    fn reset_error(&mut self) {}
}
