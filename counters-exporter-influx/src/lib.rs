//! An exporter that polls a live counter set and ships every counter to an [InfluxDB][influx]-compatible collector,
//! as [line protocol][lp] over UDP.
//!
//! [influx]: https://docs.influxdata.com/influxdb/
//! [lp]: https://docs.influxdata.com/influxdb/v1/write_protocols/line_protocol_reference/
//!
//! # Usage
//!
//! ```no_run
//! # use counters_exporter_influx::{InfluxExporterBuilder, SnapshotFile, TagSet};
//! // First, pick a counter source. Here, the snapshot file published by the default instance.
//! let source = SnapshotFile::default();
//!
//! // Then configure the exporter. Building it resolves the destination, and then opens the counter source, retrying for
//! // a little while if it isn't there yet.
//! let forwarder = InfluxExporterBuilder::default()
//!     .with_remote_address("influx.example.com", "8089")
//!     .with_hostname("web01")
//!     .with_tags(TagSet::new().with_tag("service", "varnish"))
//!     .build(source)
//!     .expect("failed to build exporter");
//!
//! // Finally, poll forever. This only ever returns if a counter can't be represented in line protocol.
//! let error = forwarder.run().unwrap_err();
//! eprintln!("fatal: {}", error);
//! ```
//!
//! # Behavior
//!
//! ## One datagram per counter
//!
//! Every counter point is sent as its own message:
//!
//! ```text
//! varnish.client_req,hostname=web01,service=varnish value=104829 1700000000123000000
//! ```
//!
//! The measurement name is the section type and the counter name, falling back to the section identifier when the
//! section has no type. The timestamp is sampled separately for each message.
//!
//! ## Best-effort delivery
//!
//! Messages are never acknowledged, retried, buffered, or replayed. A collector that is briefly down shows up as
//! refused connections, which are ignored quietly; other send errors are logged and polling carries on.
//!
//! ## Paced sending
//!
//! A short pause follows every message, spreading a cycle's worth of messages out over a small window rather than
//! sending them in one burst.
//!
//! ## Fatal metadata errors
//!
//! Only `uint64` counters can be exported, every counter must belong to a section with a type or an identifier, and
//! no section or counter name may contain a line break. Anything else stops the exporter with a [`FormatError`] rather
//! than being skipped or coerced.
//!
//! Commas, spaces, and backslashes are escaped in measurement names, as are commas, `=`, spaces, and backslashes in tag
//! keys and values. Line protocol cannot express an empty tag value, so the hostname and every tag must be non-empty:
//! building fails otherwise.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, InfluxExporterBuilder};

mod filter;
pub use self::filter::FieldFilter;

mod forwarder;
pub use self::forwarder::{
    sync::{Forwarder, Sender, Transport},
    ForwarderConfiguration,
};

mod listing;
pub use self::listing::write_field_list;

mod retry;
pub use self::retry::{
    open_with_retry, ParseBudgetError, RetryBudget, RetryError, DEFAULT_RETRY_BUDGET, DEFAULT_RETRY_DELAY,
};

mod source;
pub use self::source::{
    CounterHandle, CounterPoint, CounterSource, CounterType, MemoryHandle, MemorySource, SnapshotFile,
    SnapshotHandle, SourceError, DEFAULT_INSTANCE_DIR, SNAPSHOT_FILE_NAME,
};

mod stats;
pub use self::stats::CycleStats;

mod tags;
pub use self::tags::{ParseTagError, TagSet};

mod timing;
pub use self::timing::{unix_nanos, Sleep, ThreadSleep};

mod writer;
pub use self::writer::{format_point, FormatError, LineWriter};
