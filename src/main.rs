//! `klogg` — a terminal harness over the core data plane: open a file, print
//! index stats, optionally run a search, optionally follow growth.
//!
//! This binary is not the shell; klogg's actual desktop UI lives elsewhere.
//! It exists so the library can be exercised end-to-end from a terminal.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, LevelFilter};

use klogg_core::cli::{self, CliOptions, SessionPolicy};
use klogg_core::config::Config;
use klogg_core::log_data::{LogData, LogDataView, LogEvent};
use klogg_core::search::{SearchEngine, SearchOptions, Status};
use klogg_core::session::SessionSnapshot;

fn main() -> ExitCode {
    let opts = match cli::parse_args(std::env::args().skip(1)) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("klogg: {e}");
            return ExitCode::from(2);
        }
    };

    init_logging(&opts);

    if opts.paths.is_empty() {
        eprintln!("klogg: no file given");
        return ExitCode::from(2);
    }

    if let SessionPolicy::Load(path) = &opts.session_policy {
        match SessionSnapshot::load(path) {
            Ok(snapshot) => info!(
                "loaded session from {}: {} recent file(s), {} search(es) in history",
                path.display(),
                snapshot.recent_files.len(),
                snapshot.search_history.len()
            ),
            Err(e) => error!("could not load session from {}: {e}", path.display()),
        }
    }

    let config = Config::shared();
    let mut any_failed = false;

    for path in &opts.paths {
        if let Err(e) = run_one(path, &config, &opts) {
            error!("{}: {e}", path.display());
            any_failed = true;
        }
    }

    if let SessionPolicy::Load(path) = &opts.session_policy {
        let snapshot = SessionSnapshot {
            recent_files: opts.paths.clone(),
            search_history: opts.search_pattern.clone().into_iter().collect(),
        };
        if let Err(e) = snapshot.save(path) {
            error!("could not write session to {}: {e}", path.display());
        }
    }

    if any_failed { ExitCode::from(1) } else { ExitCode::SUCCESS }
}

fn run_one(path: &std::path::Path, config: &Arc<Config>, opts: &CliOptions) -> Result<(), klogg_core::error::KloggError> {
    let log = Arc::new(LogData::open(path, config.clone())?);

    let (tx, rx) = std::sync::mpsc::channel();
    let _reg = log.attach_listener(Box::new(move |event| {
        let _ = tx.send(event);
    }));

    // Wait for the initial scan to settle: either no further progress arrives
    // for a short quiet period, or the file stops growing between checks.
    let mut last_count = log.line_count();
    loop {
        match rx.recv_timeout(Duration::from_millis(300)) {
            Ok(LogEvent::Error(msg)) => {
                error!("{}: {msg}", path.display());
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
        let count = log.line_count();
        if count == last_count {
            break;
        }
        last_count = count;
    }

    println!("{}: {} lines, encoding {:?}", path.display(), log.line_count(), log.encoding());

    if let Some(pattern) = &opts.search_pattern {
        let engine = SearchEngine::new(config.clone());
        let search_opts = SearchOptions { auto_refresh: opts.follow, ..SearchOptions::default() };
        let handle = engine.start(&log, pattern, search_opts)?;

        loop {
            let state = handle.progress();
            if matches!(state.status, Status::Done | Status::Cancelled) && !opts.follow {
                break;
            }
            if matches!(state.status, Status::Running | Status::Paused) {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            if !opts.follow {
                break;
            }
            std::thread::sleep(Duration::from_millis(200));
        }

        let state = handle.progress();
        println!("{}: {} matches for {pattern:?}", path.display(), state.matches_count);
        for line in handle.matches(0..state.matches_count.min(20)) {
            println!("  {line}: {}", log.line_text(line)?);
        }

        if opts.follow {
            info!("following {} — press Ctrl-C to stop", path.display());
            loop {
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    } else if opts.follow {
        info!("following {} — press Ctrl-C to stop", path.display());
        loop {
            if let Ok(LogEvent::Progress(p)) = rx.recv_timeout(Duration::from_secs(1)) {
                println!("{}: {} lines indexed", path.display(), p.line_count);
            }
        }
    }

    Ok(())
}

fn init_logging(opts: &CliOptions) {
    let level = match opts.debug_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    if let Some(path) = &opts.log_path {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("klogg: could not open log file {}: {e}", path.display());
            }
        }
    }

    builder.init();
}
