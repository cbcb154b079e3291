//! Hand-rolled command-line argument parsing for the `klogg` smoke-test
//! binary. No `clap` anywhere in the retrieved corpus — grounded on
//! `bin/cmdr-mcp-stdio.rs`'s `get_port()`, which walks `env::args()` by hand.
//!
//! This binary is not a reimplementation of klogg's Qt shell: it is a
//! terminal harness that exercises the library (open a file, print index
//! stats, run a search, follow growth) since this repository has no GUI.

use std::path::PathBuf;

/// Session-restore policy. The core only records this — a future shell would
/// be the one to actually restore a session; see `SPEC_FULL.md` §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPolicy {
    Unspecified,
    New,
    Load(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CliOptions {
    pub paths: Vec<PathBuf>,
    pub follow: bool,
    pub session_policy: SessionPolicy,
    pub multi: bool,
    /// 0 = warn, 1 = info, 2 = debug, 3 = trace.
    pub debug_level: u8,
    pub log_path: Option<PathBuf>,
    pub window_width: Option<u32>,
    pub window_height: Option<u32>,
    /// Not part of the documented klogg CLI surface; a smoke-test-only
    /// addition so this harness can exercise the Search Engine without a GUI.
    pub search_pattern: Option<String>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            follow: false,
            session_policy: SessionPolicy::Unspecified,
            multi: false,
            debug_level: 0,
            log_path: None,
            window_width: None,
            window_height: None,
            search_pattern: None,
        }
    }
}

#[derive(Debug)]
pub struct ArgParseError(pub String);

impl std::fmt::Display for ArgParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses `args` (excluding the program name). Unrecognized flags are a
/// parse error; this binary isn't meant to accept the shell's GUI flags.
pub fn parse_args<I: Iterator<Item = String>>(args: I) -> Result<CliOptions, ArgParseError> {
    let mut opts = CliOptions::default();
    let mut iter = args.peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--follow" | "-f" => opts.follow = true,
            "--multi" | "-m" => opts.multi = true,
            "--new-session" | "-n" => opts.session_policy = SessionPolicy::New,
            "--load-session" | "-s" => {
                let path = take_value(&mut iter, &arg)?;
                opts.session_policy = SessionPolicy::Load(PathBuf::from(path));
            }
            "--debug" | "-d" => {
                let raw = take_value(&mut iter, &arg)?;
                opts.debug_level = raw.parse().map_err(|_| ArgParseError(format!("invalid debug level: {raw}")))?;
            }
            "--log" => opts.log_path = Some(PathBuf::from(take_value(&mut iter, &arg)?)),
            "--window-width" => {
                let raw = take_value(&mut iter, &arg)?;
                opts.window_width =
                    Some(raw.parse().map_err(|_| ArgParseError(format!("invalid window width: {raw}")))?);
            }
            "--window-height" => {
                let raw = take_value(&mut iter, &arg)?;
                opts.window_height =
                    Some(raw.parse().map_err(|_| ArgParseError(format!("invalid window height: {raw}")))?);
            }
            "--search" => opts.search_pattern = Some(take_value(&mut iter, &arg)?),
            other if other.starts_with('-') && other != "-" => {
                return Err(ArgParseError(format!("unrecognized option: {other}")));
            }
            positional => opts.paths.push(PathBuf::from(positional)),
        }
    }

    Ok(opts)
}

fn take_value<I: Iterator<Item = String>>(iter: &mut I, flag: &str) -> Result<String, ArgParseError> {
    iter.next().ok_or_else(|| ArgParseError(format!("{flag} requires a value")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions, ArgParseError> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_positional_paths() {
        let opts = parse(&["a.log", "b.log"]).unwrap();
        assert_eq!(opts.paths, vec![PathBuf::from("a.log"), PathBuf::from("b.log")]);
    }

    #[test]
    fn parses_follow_and_multi_flags() {
        let opts = parse(&["--follow", "-m", "a.log"]).unwrap();
        assert!(opts.follow);
        assert!(opts.multi);
    }

    #[test]
    fn parses_debug_level() {
        let opts = parse(&["-d", "2", "a.log"]).unwrap();
        assert_eq!(opts.debug_level, 2);
    }

    #[test]
    fn parses_load_session_path() {
        let opts = parse(&["-s", "session.json"]).unwrap();
        assert_eq!(opts.session_policy, SessionPolicy::Load(PathBuf::from("session.json")));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn rejects_flag_missing_value() {
        assert!(parse(&["--debug"]).is_err());
    }

    #[test]
    fn empty_args_is_fine_with_no_paths() {
        let opts = parse(&[]).unwrap();
        assert!(opts.paths.is_empty());
    }
}
