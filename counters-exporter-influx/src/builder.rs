use std::{net::UdpSocket, time::Duration};

use quanta::Clock;
use thiserror::Error;
use tracing::info;

use crate::{
    filter::FieldFilter,
    forwarder::{
        sync::{Forwarder, Sender, Transport},
        ForwarderConfiguration, RemoteAddr,
    },
    retry::{open_with_retry, RetryBudget, RetryError, DEFAULT_RETRY_BUDGET, DEFAULT_RETRY_DELAY},
    source::CounterSource,
    tags::TagSet,
    timing::{Sleep, ThreadSleep},
    writer::{FormatError, LineWriter},
};

const DEFAULT_REMOTE_HOST: &str = "127.0.0.1";
const DEFAULT_REMOTE_PORT: &str = "8089";
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_PACING: Duration = Duration::from_millis(1);

/// Errors that could occur while building an exporter.
///
/// All of these are fatal: the exporter cannot run without a destination and a counter source.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse or resolve the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// Failed to create a socket connected to the remote address.
    #[error("could not create socket: {reason}")]
    Connect {
        /// Details about the connection failure.
        reason: String,
    },

    /// The hostname or one of the tags cannot be written in line protocol.
    #[error("invalid tags: {0}")]
    Tags(#[from] FormatError),

    /// Failed to open the counter source within the retry budget.
    #[error(transparent)]
    Source(#[from] RetryError),
}

/// Builder for an InfluxDB line-protocol exporter.
pub struct InfluxExporterBuilder {
    remote_host: String,
    remote_port: String,
    ipv4_only: bool,
    write_timeout: Duration,
    interval: Duration,
    pacing: Duration,
    retry_budget: RetryBudget,
    retry_delay: Duration,
    hostname: String,
    tags: TagSet,
    filter: FieldFilter,
    clock: Clock,
    sleeper: Box<dyn Sleep + Send>,
}

impl InfluxExporterBuilder {
    /// Set the remote address to forward metrics to.
    ///
    /// The host can be a name or a literal address. It is resolved once, when the exporter is built, and the first
    /// resolved address that accepts a connected UDP socket is used for the lifetime of the exporter.
    ///
    /// Defaults to `127.0.0.1:8089`.
    #[must_use]
    pub fn with_remote_address<H, P>(mut self, host: H, port: P) -> Self
    where
        H: Into<String>,
        P: Into<String>,
    {
        self.remote_host = host.into();
        self.remote_port = port.into();
        self
    }

    /// Sets whether or not to only consider IPv4 addresses when resolving the remote address.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_ipv4_only(mut self, ipv4_only: bool) -> Self {
        self.ipv4_only = ipv4_only;
        self
    }

    /// Set the write timeout for sending messages.
    ///
    /// When the write timeout is reached, the message being sent is dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the polling interval.
    ///
    /// This is the time between the start of two consecutive polling cycles. If a cycle takes longer than the
    /// interval, the next one starts immediately.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the pause after each message within a cycle.
    ///
    /// Spreading a cycle's messages out a little lowers the chance of the collector dropping packets from a burst.
    ///
    /// Defaults to 1 millisecond.
    #[must_use]
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set how long to keep retrying the initial connection to the counter source.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: RetryBudget) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Set the delay between initial connection attempts.
    ///
    /// Defaults to 500 milliseconds.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the value of the `hostname` tag attached to every message.
    ///
    /// There is no default: building fails until a non-empty hostname is set.
    #[must_use]
    pub fn with_hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the tags attached to every message, after the `hostname` tag.
    ///
    /// Keys and values must be non-empty. Defaults to no tags.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Set the field filter applied to the field listing and to polling.
    ///
    /// Defaults to selecting every field.
    #[must_use]
    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the clock used to measure the retry budget and the polling interval.
    ///
    /// This is mostly useful with a mocked clock in tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Set how the exporter pauses between messages, cycles, and connection attempts.
    ///
    /// Defaults to sleeping the current thread.
    #[must_use]
    pub fn with_sleeper<P>(mut self, sleeper: P) -> Self
    where
        P: Sleep + Send + 'static,
    {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Builds the exporter, sending over UDP to the configured remote address.
    ///
    /// The hostname and tags are checked first. Then the remote address is resolved and connected, and finally the
    /// counter source is opened, retrying as configured.
    ///
    /// # Errors
    ///
    /// If the hostname or tags cannot be written, the remote address cannot be resolved or connected to, or the
    /// counter source cannot be opened within the retry budget, an error is returned.
    pub fn build<S>(self, source: S) -> Result<Forwarder<S, UdpSocket>, BuildError>
    where
        S: CounterSource,
    {
        let writer = LineWriter::new(&self.hostname, &self.tags)?;

        let remote_addr = RemoteAddr::resolve(&self.remote_host, &self.remote_port, self.ipv4_only)?;
        let socket = remote_addr.connect(self.write_timeout)?;

        self.attach(source, socket, writer)
    }

    /// Builds the exporter over a caller-supplied transport.
    ///
    /// The configured remote address is ignored. The counter source is opened, retrying as configured.
    ///
    /// # Errors
    ///
    /// If the hostname or tags cannot be written, or the counter source cannot be opened within the retry budget, an
    /// error is returned.
    pub fn build_with_transport<S, T>(self, source: S, transport: T) -> Result<Forwarder<S, T>, BuildError>
    where
        S: CounterSource,
        T: Transport,
    {
        let writer = LineWriter::new(&self.hostname, &self.tags)?;
        self.attach(source, transport, writer)
    }

    fn attach<S, T>(mut self, mut source: S, transport: T, writer: LineWriter) -> Result<Forwarder<S, T>, BuildError>
    where
        S: CounterSource,
        T: Transport,
    {
        let handle =
            open_with_retry(&mut source, self.retry_budget, self.retry_delay, &self.clock, &mut self.sleeper)?;
        info!(hostname = %self.hostname, tags = self.tags.len(), "Attached to counter source.");

        let config = ForwarderConfiguration { interval: self.interval, pacing: self.pacing };

        Ok(Forwarder::new(
            source,
            handle,
            Sender::new(transport),
            writer,
            self.filter,
            config,
            self.clock,
            self.sleeper,
        ))
    }
}

impl Default for InfluxExporterBuilder {
    fn default() -> Self {
        InfluxExporterBuilder {
            remote_host: DEFAULT_REMOTE_HOST.to_string(),
            remote_port: DEFAULT_REMOTE_PORT.to_string(),
            ipv4_only: false,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            pacing: DEFAULT_PACING,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_delay: DEFAULT_RETRY_DELAY,
            hostname: String::new(),
            tags: TagSet::new(),
            filter: FieldFilter::default(),
            clock: Clock::new(),
            sleeper: Box::new(ThreadSleep),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use quanta::Clock;

    use super::{BuildError, InfluxExporterBuilder};
    use crate::{
        retry::RetryBudget, source::MemorySource, tags::TagSet, timing::test_util::MockSleep, writer::FormatError,
    };

    #[test]
    fn unresolvable_destination_fails_before_touching_source() {
        let source = MemorySource::new();
        source.set_available(false);

        let sleeper = MockSleep::default();
        let result = InfluxExporterBuilder::default()
            .with_remote_address("127.0.0.1", "not-a-port")
            .with_hostname("h1")
            .with_retry_budget(RetryBudget::Unbounded)
            .with_sleeper(sleeper.clone())
            .build(source);

        assert!(matches!(result, Err(BuildError::InvalidRemoteAddress { .. })));
        assert!(sleeper.pauses().is_empty());
    }

    #[test]
    fn unavailable_source_exhausts_budget() {
        let listener = UdpSocket::bind("127.0.0.1:0").expect("bind listener");
        let port = listener.local_addr().unwrap().port().to_string();

        let source = MemorySource::new();
        source.set_available(false);

        let (clock, mock) = Clock::mock();
        let result = InfluxExporterBuilder::default()
            .with_remote_address("127.0.0.1", port)
            .with_hostname("h1")
            .with_retry_budget(RetryBudget::Within(Duration::from_secs(2)))
            .with_clock(clock)
            .with_sleeper(MockSleep::new(mock))
            .build(source);

        match result {
            Err(BuildError::Source(e)) => assert_eq!(e.attempts(), 5),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("source should not have opened"),
        }
    }

    #[test]
    fn builds_against_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").expect("bind listener");
        let port = listener.local_addr().unwrap().port().to_string();

        let source = MemorySource::new();
        source.register("MAIN", "", "uptime", "");

        let forwarder = InfluxExporterBuilder::default()
            .with_remote_address("127.0.0.1", port)
            .with_ipv4_only(true)
            .with_hostname("h1")
            .with_sleeper(MockSleep::default())
            .build(source)
            .expect("exporter should build");

        assert!(forwarder.is_attached());
    }

    #[test]
    fn unwritable_tags_fail_before_network_and_source() {
        let source = MemorySource::new();
        source.set_available(false);

        // Neither an empty hostname nor an empty tag value can be written.
        let cases = [("", TagSet::new()), ("h1", TagSet::new().with_tag("dc", ""))];

        for (hostname, tags) in cases {
            let sleeper = MockSleep::default();
            let result = InfluxExporterBuilder::default()
                .with_remote_address("127.0.0.1", "not-a-port")
                .with_hostname(hostname)
                .with_tags(tags)
                .with_retry_budget(RetryBudget::Unbounded)
                .with_sleeper(sleeper.clone())
                .build(source.clone());

            assert!(
                matches!(result, Err(BuildError::Tags(FormatError::InvalidTag { .. }))),
                "hostname: {:?}",
                hostname
            );
            assert!(sleeper.pauses().is_empty());
        }
    }
}
