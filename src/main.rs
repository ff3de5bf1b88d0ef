mod phishncd;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::phishncd::classify::{
    parse_url_request, CorpusPair, ImageClassifier, PageClassifier, UrlClassifier,
};
use crate::phishncd::fetch::{
    FetchConfig, HttpFetcher, PageFetcher, DEFAULT_MAX_BYTES, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use crate::phishncd::error::ClassifyError;
use crate::phishncd::known_phish::KnownPhishList;
use crate::phishncd::preprocess::DEFAULT_IMAGE_SIZE;
use crate::phishncd::stats::RunStats;

use atomic_counter::AtomicCounter;
use clap::{
    builder::PathBufValueParser, value_parser, Arg, ArgAction, ArgMatches, ColorChoice, Command,
};
use serde_json::{json, to_string, Value};

// Subcommands
const URL_COMMAND: &str = "url";
const PAGE_COMMAND: &str = "page";
const IMAGE_COMMAND: &str = "image";

// Argument constants for CLI flags
const URL: &str = "url";
const FILES: &str = "files";
const LEGIT_DIR: &str = "legit-dir";
const PHISH_DIR: &str = "phish-dir";
const PHISH_LIST: &str = "phish-list";
const TIMEOUT: &str = "timeout";
const MAX_BYTES: &str = "max-bytes";
const RETRIES: &str = "retries";
const USER_AGENT: &str = "user-agent";
const SIZE: &str = "size";
const THREADS: &str = "threads";
const STATS: &str = "stats";

fn main() {
    // Start execution timer
    let start = Instant::now();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = build_cli().get_matches();
    let Some((command, sub_args)) = args.subcommand() else {
        eprintln!("A subcommand is required: url, page or image.");
        std::process::exit(2);
    };

    if let Some(threads) = sub_args.get_one::<usize>(THREADS) {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(*threads)
            .build_global()
        {
            log::warn!("Unable to size the scan thread pool: {}", err);
        }
    }

    let stats = RunStats::new();
    match command {
        URL_COMMAND => run_url(sub_args, &stats),
        PAGE_COMMAND => run_page(sub_args, &stats),
        IMAGE_COMMAND => run_image(sub_args, &stats),
        other => {
            eprintln!("Unsupported subcommand '{}'", other);
            std::process::exit(2);
        }
    }

    if sub_args.get_flag(STATS) {
        emit_stats(&stats, command, start.elapsed());
    }
}

fn build_cli() -> Command {
    Command::new("phishncd")
        .about("Classifies web pages and images as legitimate or phishing by compression distance against labeled reference corpora.")
        .color(ColorChoice::Auto)
        .long_about("phishncd compares a query artifact against a directory of known legitimate references and a directory of known phishing references.\n
                  1. url: checks the known-phishing list, fetches the page, then scores it by NCD, tag-set and link-host similarity\n
                  2. page: scores a saved HTML document the same way without fetching\n
                  3. image: scores images by NCD of their grayscale canonical form\n
                  \n
                  One JSON report per request is written to STDOUT. Corpus entries are visited in file name order so ties always resolve to the same file.")
        .subcommand_required(true)
        .subcommand(common_args(
            Command::new(URL_COMMAND)
                .about("Classify URLs. Without a URL argument, reads {\"url\": ...} requests from STDIN, one per line.")
                .arg(Arg::new(URL)
                    .help("URL to classify.")
                    .index(1))
                .arg(Arg::new(PHISH_LIST)
                    .long(PHISH_LIST)
                    .value_parser(PathBufValueParser::new())
                    .help("Path to the newline-delimited list of known phishing URLs.")
                    .action(ArgAction::Set)
                    .default_value("PHISH_LIST_PATH.txt"))
                .arg(Arg::new(TIMEOUT)
                    .long(TIMEOUT)
                    .value_parser(value_parser!(u64).range(1..))
                    .help("Fetch timeout in seconds.")
                    .action(ArgAction::Set)
                    .default_value("8"))
                .arg(Arg::new(MAX_BYTES)
                    .long(MAX_BYTES)
                    .value_parser(value_parser!(u64).range(1..))
                    .help("Reject fetched pages larger than this many bytes.")
                    .action(ArgAction::Set)
                    .default_value("5242880"))
                .arg(Arg::new(RETRIES)
                    .long(RETRIES)
                    .value_parser(value_parser!(u32))
                    .help("Retries for transient fetch failures, with doubling backoff.")
                    .action(ArgAction::Set)
                    .default_value("2"))
                .arg(Arg::new(USER_AGENT)
                    .long(USER_AGENT)
                    .help("User-Agent header sent with fetches.")
                    .action(ArgAction::Set)
                    .default_value(DEFAULT_USER_AGENT)),
            "url_legit",
            "url_phished",
        ))
        .subcommand(common_args(
            Command::new(PAGE_COMMAND)
                .about("Classify saved HTML documents without fetching them.")
                .arg(Arg::new(FILES)
                    .help("HTML files to classify.")
                    .value_parser(PathBufValueParser::new())
                    .num_args(1..)
                    .required(true)
                    .index(1)),
            "url_legit",
            "url_phished",
        ))
        .subcommand(common_args(
            Command::new(IMAGE_COMMAND)
                .about("Classify images.")
                .arg(Arg::new(FILES)
                    .help("Image files to classify.")
                    .value_parser(PathBufValueParser::new())
                    .num_args(1..)
                    .required(true)
                    .index(1))
                .arg(Arg::new(SIZE)
                    .long(SIZE)
                    .value_parser(value_parser!(u32).range(1..=4096))
                    .help("Side length of the square grayscale canonical form.")
                    .action(ArgAction::Set)
                    .default_value("256")),
            "legit",
            "phished",
        ))
}

fn common_args(cmd: Command, legit_default: &'static str, phish_default: &'static str) -> Command {
    cmd.arg(Arg::new(LEGIT_DIR)
        .short('l')
        .long(LEGIT_DIR)
        .value_parser(PathBufValueParser::new())
        .help("Directory of known legitimate references.")
        .action(ArgAction::Set)
        .default_value(legit_default))
    .arg(Arg::new(PHISH_DIR)
        .short('p')
        .long(PHISH_DIR)
        .value_parser(PathBufValueParser::new())
        .help("Directory of known phishing references.")
        .action(ArgAction::Set)
        .default_value(phish_default))
    .arg(Arg::new(THREADS)
        .short('j')
        .long(THREADS)
        .value_parser(value_parser!(usize))
        .help("Number of worker threads used to scan the corpora.")
        .action(ArgAction::Set))
    .arg(Arg::new(STATS)
        .short('s')
        .long(STATS)
        .help("Output statistics report to STDERR.")
        .action(ArgAction::SetTrue))
}

fn corpus_pair(args: &ArgMatches) -> CorpusPair {
    let dir = |id: &str| {
        args.get_one::<PathBuf>(id)
            .cloned()
            .unwrap_or_default()
    };
    CorpusPair {
        legit: dir(LEGIT_DIR),
        phish: dir(PHISH_DIR),
    }
}

fn run_url(args: &ArgMatches, stats: &RunStats) {
    let known_phish = match args.get_one::<PathBuf>(PHISH_LIST) {
        Some(path) => KnownPhishList::load(path),
        None => KnownPhishList::default(),
    };
    if known_phish.is_empty() {
        log::info!("Known phishing list is empty; every URL will be fetched");
    }
    let config = FetchConfig {
        timeout: Duration::from_secs(
            args.get_one::<u64>(TIMEOUT)
                .copied()
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        ),
        max_bytes: args.get_one::<u64>(MAX_BYTES).copied().unwrap_or(DEFAULT_MAX_BYTES),
        retries: args.get_one::<u32>(RETRIES).copied().unwrap_or(DEFAULT_RETRIES),
        user_agent: args
            .get_one::<String>(USER_AGENT)
            .map_or(DEFAULT_USER_AGENT, String::as_str)
            .to_string(),
    };
    let fetcher = match HttpFetcher::new(config) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            eprintln!("Unable to initialise the page fetcher: {}", err);
            std::process::exit(2);
        }
    };
    let classifier = UrlClassifier::new(corpus_pair(args), &known_phish, fetcher, stats);

    if let Some(url) = args.get_one::<String>(URL) {
        emit_report(&classifier.classify_url(url.trim()).to_json());
        return;
    }

    let stdin = io::stdin();
    for line_result in stdin.lock().lines() {
        let line = match line_result {
            Ok(line) => line,
            Err(err) => {
                eprintln!("Unable to read line from STDIN: {}", err);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        emit_report(&classify_request(&classifier, line.as_str(), stats));
    }
}

fn classify_request<F: PageFetcher>(
    classifier: &UrlClassifier<'_, F>,
    line: &str,
    stats: &RunStats,
) -> Value {
    match parse_url_request(line) {
        Ok(url) => classifier.classify_url(url.as_str()).to_json(),
        Err(err) => {
            stats.invalid_requests.inc();
            json!({ "error": err.to_string(), "kind": err.kind() })
        }
    }
}

fn run_page(args: &ArgMatches, stats: &RunStats) {
    let classifier = PageClassifier::new(corpus_pair(args), stats);
    for path in args.get_many::<PathBuf>(FILES).into_iter().flatten() {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                emit_report(&json!({
                    "error": format!("Unable to read page: {}", err),
                    "file": path.display().to_string(),
                }));
                continue;
            }
        };
        let html = String::from_utf8_lossy(raw.as_slice());
        let label = path.display().to_string();
        emit_report(&classifier.classify(label.as_str(), html.as_ref()).to_json());
    }
}

fn run_image(args: &ArgMatches, stats: &RunStats) {
    let size = args.get_one::<u32>(SIZE).copied().unwrap_or(DEFAULT_IMAGE_SIZE);
    let classifier = ImageClassifier::new(corpus_pair(args), size, stats);
    for path in args.get_many::<PathBuf>(FILES).into_iter().flatten() {
        let report = std::fs::read(path)
            .map_err(ClassifyError::from)
            .and_then(|raw| classifier.classify(raw.as_slice()));
        match report {
            Ok(report) => emit_report(&report.to_json()),
            Err(err) => {
                log::warn!("Unable to classify {}: {}", path.display(), err);
                emit_report(&json!({
                    "error": err.to_string(),
                    "kind": err.kind(),
                    "file": path.display().to_string(),
                }));
            }
        }
    }
}

fn emit_report(report: &Value) {
    let report_json = match to_string(report) {
        Ok(serialized) => serialized,
        Err(err) => {
            eprintln!("Unable to serialize report to JSON: {}", err);
            return;
        }
    };
    let mut stdout = io::stdout();
    if let Err(err) = writeln!(&mut stdout, "{}", report_json) {
        eprintln!("Error writing report to STDOUT: {}", err);
        return;
    }
    if let Err(err) = stdout.flush() {
        eprintln!("Error flushing STDOUT buffer: {}", err);
    }
}

fn emit_stats(stats: &RunStats, command: &str, elapsed: Duration) {
    match serde_json::to_string_pretty(&stats.to_json(command, elapsed)) {
        Ok(pretty_json) => {
            let mut stderr = io::stderr();
            if let Err(err) = writeln!(&mut stderr, "{}", pretty_json) {
                eprintln!("Error printing JSON to STDERR: {}", err);
                return;
            }
            if let Err(err) = stderr.flush() {
                eprintln!("Error flushing STDERR buffer: {}", err);
            }
        }
        Err(err) => {
            eprintln!(
                "Error converting JSON object to pretty-printed String: {}",
                err
            );
        }
    }
}
