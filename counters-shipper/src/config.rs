use std::time::Duration;

use counters_exporter_influx::{
    FieldFilter, ParseBudgetError, ParseTagError, RetryBudget, SnapshotFile, TagSet, DEFAULT_RETRY_BUDGET,
};
use getopts::{Matches, Options};
use thiserror::Error;

const DEFAULT_INTERVAL_SECS: u64 = 10;
const DEFAULT_TAGS: &[(&str, &str)] = &[("service", "varnish")];

/// Errors in the command line. All of them end with the usage text and a failing exit status.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Options(#[from] getopts::Fail),

    #[error("-i: expected a positive number of seconds, got '{0}'")]
    Interval(String),

    #[error("-t: {0}")]
    RetryBudget(#[from] ParseBudgetError),

    #[error("-T: {0}")]
    Tag(#[from] ParseTagError),

    #[error("-n and -N cannot be used together")]
    ConflictingSource,

    #[error("expected a destination host and port, got {0} positional argument(s)")]
    Positional(usize),
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Action {
    Help,
    Version,
    Run(Config),
}

#[derive(Debug)]
pub struct Config {
    pub host: String,
    pub port: String,
    pub ipv4_only: bool,
    pub interval: Duration,
    pub retry_budget: RetryBudget,
    pub list_fields: bool,
    pub filter: FieldFilter,
    pub source: SnapshotFile,
    pub tags: TagSet,
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("i", "interval", "seconds between polling cycles (default: 10)", "SECONDS");
    opts.optopt(
        "t",
        "timeout",
        "how long to keep retrying the counter source at startup, or 'off' to retry forever (default: 5)",
        "SECONDS|off",
    );
    opts.optflag("l", "list", "list the available fields on stderr before polling");
    opts.optmulti("f", "field", "only ship fields matching GLOB; a leading '^' excludes them instead", "GLOB");
    opts.optopt("n", "name", "instance directory holding the counter snapshot", "DIR");
    opts.optopt("N", "file", "counter snapshot file to read", "FILE");
    opts.optmulti("T", "tag", "extra tag attached to every message (default: service=varnish)", "KEY=VALUE");
    opts.optflag("V", "version", "print the version and exit");
    opts.optflag("h", "help", "print this help menu");

    opts
}

/// Parses the arguments following the program name.
pub fn parse_args(opts: &Options, args: &[String], ipv4_only: bool) -> Result<Action, ConfigError> {
    let matches = opts.parse(args)?;

    if matches.opt_present("help") {
        return Ok(Action::Help);
    }
    if matches.opt_present("version") {
        return Ok(Action::Version);
    }

    from_matches(&matches, ipv4_only).map(Action::Run)
}

fn from_matches(matches: &Matches, ipv4_only: bool) -> Result<Config, ConfigError> {
    let interval = match matches.opt_str("interval") {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => return Err(ConfigError::Interval(raw)),
        },
        None => Duration::from_secs(DEFAULT_INTERVAL_SECS),
    };

    let retry_budget = match matches.opt_str("timeout") {
        Some(raw) => raw.parse()?,
        None => DEFAULT_RETRY_BUDGET,
    };

    let source = match (matches.opt_str("name"), matches.opt_str("file")) {
        (Some(_), Some(_)) => return Err(ConfigError::ConflictingSource),
        (Some(dir), None) => SnapshotFile::for_instance(dir),
        (None, Some(file)) => SnapshotFile::new(file),
        (None, None) => SnapshotFile::default(),
    };

    let mut tags = DEFAULT_TAGS.iter().copied().collect::<TagSet>();
    for raw in matches.opt_strs("tag") {
        tags.insert_parsed(&raw)?;
    }

    let [host, port] = matches.free.as_slice() else {
        return Err(ConfigError::Positional(matches.free.len()));
    };

    Ok(Config {
        host: host.clone(),
        port: port.clone(),
        ipv4_only,
        interval,
        retry_budget,
        list_fields: matches.opt_present("list"),
        filter: FieldFilter::from_patterns(matches.opt_strs("field")),
        source,
        tags,
    })
}
