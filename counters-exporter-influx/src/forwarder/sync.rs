use std::{
    convert::Infallible,
    io::{self, Write},
    net::UdpSocket,
};

use quanta::Clock;
use tracing::{debug, error, info, trace, warn};

use crate::{
    filter::FieldFilter,
    listing::write_field_list,
    source::{CounterHandle as _, CounterPoint, CounterSource},
    stats::CycleStats,
    timing::{unix_nanos, Sleep},
    writer::{FormatError, LineWriter},
};

use super::ForwarderConfiguration;

/// A datagram transport to a fixed remote endpoint.
pub trait Transport {
    /// Sends the buffer as a single datagram, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns the underlying transport error, if any.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Transport for UdpSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf)
    }
}

/// Writes messages to a [`Transport`], one call per message.
///
/// Sends are never retried. A refused connection (the collector is briefly down) is expected and silently ignored;
/// any other failure is logged with its error code. Either way, the error is handed back to the caller, who is free to
/// carry on.
pub struct Sender<T> {
    transport: T,
}

impl<T: Transport> Sender<T> {
    /// Creates a new `Sender` over the given transport.
    pub fn new(transport: T) -> Self {
        Sender { transport }
    }

    /// Sends a single message.
    ///
    /// # Errors
    ///
    /// Returns the transport error, after logging it unless it was a refused connection.
    pub fn send(&mut self, message: &[u8]) -> io::Result<usize> {
        let result = self.transport.send(message);
        if let Err(e) = &result {
            if e.kind() != io::ErrorKind::ConnectionRefused {
                let code = e.raw_os_error().map_or_else(|| format!("{:?}", e.kind()), |c| c.to_string());
                error!(%code, error = %e, "Failed to send message.");
            }
        }
        result
    }
}

/// The polling loop.
///
/// Each cycle enumerates every visible counter point, formats each selected point and sends it as its own datagram,
/// pausing briefly after every message so that a cycle's worth of messages is spread out rather than sent in a burst.
/// Once the cycle is done, the forwarder waits out whatever is left of the configured interval.
///
/// If the counter source handle goes bad, the rest of the cycle is skipped and a single reopen is attempted at the
/// start of each following cycle.
pub struct Forwarder<S: CounterSource, T> {
    source: S,
    handle: Option<S::Handle>,
    sender: Sender<T>,
    writer: LineWriter,
    filter: FieldFilter,
    config: ForwarderConfiguration,
    clock: Clock,
    sleeper: Box<dyn Sleep + Send>,
}

impl<S, T> Forwarder<S, T>
where
    S: CounterSource,
    T: Transport,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        source: S,
        handle: S::Handle,
        sender: Sender<T>,
        writer: LineWriter,
        filter: FieldFilter,
        config: ForwarderConfiguration,
        clock: Clock,
        sleeper: Box<dyn Sleep + Send>,
    ) -> Self {
        Forwarder { source, handle: Some(handle), sender, writer, filter, config, clock, sleeper }
    }

    /// Returns `true` if the forwarder currently holds a valid counter source handle.
    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    /// Writes the field listing report for every selected point to `out`.
    ///
    /// This is a one-off side activity: it doesn't affect polling, which can start right after.
    ///
    /// # Errors
    ///
    /// If writing to `out` fails, an error is returned. A counter source failure is not an error here: it is logged,
    /// and the handle is reopened on the next cycle.
    pub fn list_fields<W: Write>(&mut self, program: &str, out: &mut W) -> io::Result<()> {
        let Some(points) = self.enumerate() else {
            return Ok(());
        };

        let filter = &self.filter;
        write_field_list(out, program, points.iter().filter(|p| filter.matches(p)))
    }

    /// Runs a single polling cycle, without waiting for the next one.
    ///
    /// # Errors
    ///
    /// If any selected point cannot be formatted, the cycle stops immediately and the error is returned. Nothing is
    /// sent for the offending point. This is always fatal.
    pub fn run_cycle(&mut self) -> Result<CycleStats, FormatError> {
        let mut stats = CycleStats::default();

        let Some(points) = self.enumerate() else {
            stats.track_source_unavailable();
            return Ok(stats);
        };

        for point in &points {
            stats.track_point();
            if !self.filter.matches(point) {
                stats.track_point_filtered();
                continue;
            }

            let message = self.writer.write_point(point, unix_nanos())?;
            match self.sender.send(message) {
                Ok(written) => stats.track_send_succeeded(written),
                Err(_) => stats.track_send_failed(message.len()),
            }
            trace!(len = message.len(), "Sent message.");

            // Smear the packet rate slightly.
            self.sleeper.sleep(self.config.pacing);
        }

        Ok(stats)
    }

    /// Runs the forwarder forever, polling at the configured interval.
    ///
    /// # Errors
    ///
    /// Only returns if a point could not be formatted. See [`run_cycle`](Forwarder::run_cycle).
    pub fn run(mut self) -> Result<Infallible, FormatError> {
        loop {
            let next_cycle = self.clock.now() + self.config.interval;

            let stats = self.run_cycle()?;
            debug!(
                points = stats.points_seen(),
                filtered = stats.points_filtered(),
                sent = stats.messages_sent(),
                dropped = stats.messages_dropped(),
                bytes_sent = stats.bytes_sent(),
                bytes_dropped = stats.bytes_dropped(),
                "Finished polling cycle."
            );

            // If the cycle took longer than the interval, start the next one right away.
            let remaining = next_cycle.saturating_duration_since(self.clock.now());
            self.sleeper.sleep(remaining);
        }
    }

    fn enumerate(&mut self) -> Option<Vec<CounterPoint>> {
        let mut handle = match self.handle.take() {
            Some(handle) => handle,
            None => self.reopen()?,
        };

        match handle.points() {
            Ok(points) => {
                self.handle = Some(handle);
                Some(points)
            }
            Err(e) => {
                warn!(error = %e, "Counter source handle is no longer valid, skipping cycle.");
                None
            }
        }
    }

    fn reopen(&mut self) -> Option<S::Handle> {
        self.source.reset_error();
        match self.source.open() {
            Ok(handle) => {
                info!("Reopened counter source.");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Failed to reopen counter source, skipping cycle.");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{atomic::Ordering, Arc},
        time::Duration,
    };

    use parking_lot::Mutex;
    use quanta::Clock;
    use tracing_subscriber::fmt::MakeWriter;

    use super::{Forwarder, Sender, Transport};
    use crate::{
        filter::FieldFilter,
        forwarder::ForwarderConfiguration,
        source::{CounterPoint, CounterSource as _, CounterType, MemorySource},
        tags::TagSet,
        timing::test_util::MockSleep,
        writer::{FormatError, LineWriter},
    };

    /// Records every message, and fails with the queued errors first.
    #[derive(Clone, Default)]
    struct StubTransport {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        errors: Arc<Mutex<Vec<io::Error>>>,
    }

    impl StubTransport {
        fn failing_with(error: io::Error) -> Self {
            let transport = StubTransport::default();
            transport.errors.lock().push(error);
            transport
        }

        fn messages(&self) -> Vec<String> {
            self.sent.lock().iter().map(|m| String::from_utf8(m.clone()).unwrap()).collect()
        }
    }

    impl Transport for StubTransport {
        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(e) = self.errors.lock().pop() {
                return Err(e);
            }
            self.sent.lock().push(buf.to_vec());
            Ok(buf.len())
        }
    }

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl CaptureWriter {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().clone()).unwrap().lines().map(str::to_string).collect()
        }
    }

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn with_captured_logs<F: FnOnce()>(f: F) -> Vec<String> {
        let capture = CaptureWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        capture.lines()
    }

    fn forwarder(
        source: &MemorySource,
        transport: StubTransport,
        filter: FieldFilter,
    ) -> (Forwarder<MemorySource, StubTransport>, MockSleep) {
        let mut source = source.clone();
        let handle = source.open().expect("source should open");
        let sleeper = MockSleep::default();
        let forwarder = Forwarder::new(
            source,
            handle,
            Sender::new(transport),
            LineWriter::new("h1", &TagSet::new().with_tag("service", "varnish")).expect("valid tags"),
            filter,
            ForwarderConfiguration { interval: Duration::from_secs(10), pacing: Duration::from_millis(1) },
            Clock::new(),
            Box::new(sleeper.clone()),
        );
        (forwarder, sleeper)
    }

    #[test]
    fn refused_connection_is_silent() {
        let lines = with_captured_logs(|| {
            let mut sender = Sender::new(StubTransport::failing_with(io::ErrorKind::ConnectionRefused.into()));
            let result = sender.send(b"x");
            assert_eq!(result.map_err(|e| e.kind()), Err(io::ErrorKind::ConnectionRefused));
        });

        assert!(lines.is_empty(), "unexpected diagnostics: {:?}", lines);
    }

    #[test]
    fn other_errors_are_logged_once_with_code() {
        let lines = with_captured_logs(|| {
            let mut sender = Sender::new(StubTransport::failing_with(io::Error::from_raw_os_error(90)));
            assert!(sender.send(b"x").is_err());

            // The next send goes through, and says nothing.
            assert_eq!(sender.send(b"xyz").expect("send"), 3);
        });

        assert_eq!(lines.len(), 1, "expected one diagnostic: {:?}", lines);
        assert!(lines[0].contains("code=90"), "{}", lines[0]);
        assert!(lines[0].contains("ERROR"), "{}", lines[0]);
    }

    #[test]
    fn cycle_sends_one_message_per_point_in_order() {
        let source = MemorySource::new();
        source.register("varnish", "", "uptime", "Child process uptime").store(42, Ordering::Relaxed);
        source.register("", "be1", "bereq", "Backend requests").store(7, Ordering::Relaxed);

        let transport = StubTransport::default();
        let (mut forwarder, sleeper) = forwarder(&source, transport.clone(), FieldFilter::default());

        let before = crate::timing::unix_nanos();
        let stats = forwarder.run_cycle().expect("cycle should succeed");
        let after = crate::timing::unix_nanos();

        assert_eq!(stats.points_seen(), 2);
        assert_eq!(stats.messages_sent(), 2);
        assert_eq!(sleeper.pauses(), vec![Duration::from_millis(1); 2]);

        let messages = transport.messages();
        let prefixes = [
            "varnish.uptime,hostname=h1,service=varnish value=42 ",
            "be1.bereq,hostname=h1,service=varnish value=7 ",
        ];
        let mut last_ts = 0;
        for (message, prefix) in messages.iter().zip(prefixes) {
            let ts = message
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix('\n'))
                .and_then(|ts| ts.parse::<u64>().ok())
                .unwrap_or_else(|| panic!("unexpected message: {:?}", message));
            assert!(ts >= before && ts <= after);
            assert!(ts >= last_ts);
            last_ts = ts;
        }
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn send_failures_do_not_stop_the_cycle() {
        let source = MemorySource::new();
        source.register("MAIN", "", "a", "");
        source.register("MAIN", "", "b", "");

        let transport = StubTransport::failing_with(io::Error::from_raw_os_error(90));
        let (mut forwarder, _) = forwarder(&source, transport.clone(), FieldFilter::default());

        let stats = forwarder.run_cycle().expect("cycle should succeed");
        assert_eq!(stats.messages_dropped(), 1);
        assert_eq!(stats.messages_sent(), 1);

        let messages = transport.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(stats.bytes_sent(), messages[0].len() as u64);
        assert!(stats.bytes_dropped() > 0);
    }

    #[test]
    fn unqualified_point_is_fatal_and_nothing_is_sent() {
        let source = MemorySource::new();
        source.insert(CounterPoint::new("", "orphan", 1));

        let transport = StubTransport::default();
        let (mut forwarder, sleeper) = forwarder(&source, transport.clone(), FieldFilter::default());

        let result = forwarder.run_cycle();
        assert_eq!(result, Err(FormatError::UnqualifiedSection { name: "orphan".to_string() }));
        assert!(transport.messages().is_empty());
        assert!(sleeper.pauses().is_empty());
    }

    #[test]
    fn unsupported_type_stops_run() {
        let source = MemorySource::new();
        source.register("MAIN", "", "uptime", "");
        source.insert(
            CounterPoint::new("MAIN", "ratio", 1).with_declared_type(CounterType::Other("double".into())),
        );

        let transport = StubTransport::default();
        let (forwarder, _) = forwarder(&source, transport.clone(), FieldFilter::default());

        let result = forwarder.run();
        assert!(matches!(result, Err(FormatError::UnsupportedType { .. })));
        assert_eq!(transport.messages().len(), 1);
    }

    #[test]
    fn filtered_points_are_not_sent() {
        let source = MemorySource::new();
        source.register("MAIN", "", "uptime", "");
        source.register("MGT", "", "uptime", "");

        let transport = StubTransport::default();
        let (mut forwarder, _) =
            forwarder(&source, transport.clone(), FieldFilter::from_patterns(["^MGT.*"]));

        let stats = forwarder.run_cycle().expect("cycle should succeed");
        assert_eq!(stats.points_filtered(), 1);
        assert_eq!(transport.messages().len(), 1);
        assert!(transport.messages()[0].starts_with("MAIN.uptime,"));
    }

    #[test]
    fn stale_handle_is_reopened_on_next_cycle() {
        let source = MemorySource::new();
        source.register("MAIN", "", "uptime", "");

        let transport = StubTransport::default();
        let (mut forwarder, _) = forwarder(&source, transport.clone(), FieldFilter::default());

        source.invalidate();
        source.set_available(false);

        let stats = forwarder.run_cycle().expect("cycle should succeed");
        assert!(stats.source_unavailable());
        assert!(!forwarder.is_attached());

        // Still unavailable: the single reopen attempt fails, and the cycle is skipped again.
        let stats = forwarder.run_cycle().expect("cycle should succeed");
        assert!(stats.source_unavailable());

        source.set_available(true);
        let stats = forwarder.run_cycle().expect("cycle should succeed");
        assert!(!stats.source_unavailable());
        assert!(forwarder.is_attached());
        assert_eq!(stats.messages_sent(), 1);
        assert_eq!(transport.messages().len(), 1);
    }

    #[test]
    fn list_fields_then_poll() {
        let source = MemorySource::new();
        source.register("MAIN", "", "uptime", "Child process uptime");
        source.register("VBE", "be1", "bereq", "Backend requests");

        let transport = StubTransport::default();
        let (mut forwarder, _) = forwarder(&source, transport.clone(), FieldFilter::from_patterns(["VBE.*"]));

        let mut out = Vec::new();
        forwarder.list_fields("counters-shipper", &mut out).expect("listing");
        let listing = String::from_utf8(out).unwrap();
        assert!(listing.contains("VBE.be1.bereq"));
        assert!(!listing.contains("MAIN.uptime"));

        let stats = forwarder.run_cycle().expect("cycle should succeed");
        assert_eq!(stats.messages_sent(), 1);
    }
}
