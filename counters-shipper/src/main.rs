//! Ships a live counter set to an InfluxDB-compatible collector over UDP, one line protocol message per counter.
//!
//! Startup runs in this order: the command line is parsed, the local hostname is read, the hostname and tags are
//! checked, the destination is resolved and connected, the counter source is opened (retrying within the `-t`
//! budget), and the field listing is printed if `-l` was given. The hostname comes first because every message
//! carries it and the tag segment is rendered once, up front. A hostname failure therefore exits before any network
//! activity.
//!
//! Any startup failure, or a counter that cannot be written as line protocol, exits with status 1.

use std::{env, io, process};

use counters_exporter_influx::InfluxExporterBuilder;
use getopts::Options;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
use self::config::{opts, parse_args, Action, Config};

mod hostname;
use self::hostname::local_hostname;

/// Forces the destination to be resolved to IPv4 addresses only, when set to anything.
const NO_IPV6_ENV: &str = "NO_IPV6";

/// Name used in the field listing header, whatever the binary was invoked as.
const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options] HOST PORT", program);
    eprint!("{}", opts.usage(&brief));
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_writer(io::stderr).with_env_filter(filter).init();
}

fn run(config: Config) -> i32 {
    let hostname = match local_hostname() {
        Ok(hostname) => hostname,
        Err(e) => {
            error!(error = %e, "Failed to get local hostname.");
            return 1;
        }
    };

    info!(
        host = %config.host,
        port = %config.port,
        ipv4_only = config.ipv4_only,
        interval = ?config.interval,
        retry_budget = %config.retry_budget,
        source = %config.source.path().display(),
        "Starting counter shipper."
    );

    let list_fields = config.list_fields;
    let mut forwarder = match InfluxExporterBuilder::default()
        .with_remote_address(config.host, config.port)
        .with_ipv4_only(config.ipv4_only)
        .with_interval(config.interval)
        .with_retry_budget(config.retry_budget)
        .with_hostname(hostname)
        .with_tags(config.tags)
        .with_filter(config.filter)
        .build(config.source)
    {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!(error = %e, "Failed to start exporter.");
            return 1;
        }
    };

    if list_fields {
        if let Err(e) = forwarder.list_fields(PROGRAM_NAME, &mut io::stderr().lock()) {
            error!(error = %e, "Failed to write field listing.");
            return 1;
        }
    }

    match forwarder.run() {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, "Counter cannot be exported, stopping.");
            1
        }
    }
}

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map_or(PROGRAM_NAME, String::as_str);
    let opts = opts();

    let ipv4_only = env::var_os(NO_IPV6_ENV).is_some();
    let action = match parse_args(&opts, args.get(1..).unwrap_or_default(), ipv4_only) {
        Ok(action) => action,
        Err(e) => {
            error!("{}", e);
            print_usage(program, &opts);
            process::exit(1);
        }
    };

    match action {
        Action::Help => print_usage(program, &opts),
        Action::Version => println!("{} {}", PROGRAM_NAME, env!("CARGO_PKG_VERSION")),
        Action::Run(config) => process::exit(run(config)),
    }
}
