use std::{sync::atomic::Ordering, thread, time::Duration};

use counters_exporter_influx::{FieldFilter, InfluxExporterBuilder, MemorySource, TagSet};
use tracing::{error, info};

fn main() {
    tracing_subscriber::fmt::init();

    let source = MemorySource::new();
    let requests = source.register("MAIN", "", "client_req", "Good client requests received");
    let uptime = source.register("MAIN", "", "uptime", "Child process uptime");
    source.register("VBE", "default", "bereq", "Backend requests made");

    thread::spawn(move || {
        for tick in 1u64.. {
            requests.fetch_add(tick % 7, Ordering::Relaxed);
            uptime.store(tick, Ordering::Relaxed);
            thread::sleep(Duration::from_secs(1));
        }
    });

    let forwarder = InfluxExporterBuilder::default()
        .with_remote_address("127.0.0.1", "8089")
        .with_interval(Duration::from_secs(2))
        .with_hostname("example")
        .with_tags(TagSet::new().with_tag("service", "varnish").with_tag("env", "dev"))
        .with_filter(FieldFilter::from_patterns(["MAIN.*"]))
        .build(source);

    let mut forwarder = match forwarder {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!(error = %e, "Failed to build exporter.");
            return;
        }
    };

    let _ = forwarder.list_fields("memory_source", &mut std::io::stdout());
    info!("Shipping to 127.0.0.1:8089. Listen with `nc -ul 8089` to see the messages.");

    if let Err(e) = forwarder.run() {
        error!(error = %e, "Exporter stopped.");
    }
}
