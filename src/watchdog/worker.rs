//! Worker side of the watchdog protocol.
//!
//! A binary that wants to isolate its own calls checks [`requested_worker`]
//! early in `main`, runs the named call and hands the result to [`serve`]
//! before exiting.
use std::io::Write;

use serde::Serialize;

use crate::errors::AnchorResult;
use crate::executor::backend::Backend;
use crate::watchdog::{WorkerReply, WORKER_FLAG};

/// Call name used for the structural window query.
pub const WINDOW_META_CALL: &str = "window_meta";

/// Returns the call name when the process was started as `--isolated-worker <name>`.
pub fn requested_worker() -> Option<String> {
    parse_worker_flag(std::env::args().skip(1))
}

fn parse_worker_flag<I>(mut args: I) -> Option<String>
where
    I: Iterator<Item = String>,
{
    while let Some(arg) = args.next() {
        if arg == WORKER_FLAG {
            return args.next();
        }
        if let Some(name) = arg.strip_prefix(WORKER_FLAG).and_then(|s| s.strip_prefix('=')) {
            return Some(name.to_string());
        }
    }
    None
}

/// Encodes `result` as one reply line.
pub fn encode_reply<T, E>(result: Result<T, E>) -> AnchorResult<String>
where
    T: Serialize,
    E: Serialize,
{
    let reply: WorkerReply<T, E> = result.into();
    Ok(serde_json::to_string(&reply)?)
}

/// Writes the reply to stdout and flushes it. Call once, right before exit.
pub fn serve<T, E>(result: Result<T, E>) -> AnchorResult<()>
where
    T: Serialize,
    E: Serialize,
{
    let line = encode_reply(result)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

/// Runs the backend's structural query in this (worker) process and serves it.
pub fn serve_window_meta(backend: &dyn Backend) -> AnchorResult<()> {
    serve(backend.window_meta())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendFailure;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn worker_flag_is_parsed_in_both_forms() {
        assert_eq!(
            parse_worker_flag(args(&["--verbose", "--isolated-worker", "window_meta"])).as_deref(),
            Some("window_meta")
        );
        assert_eq!(
            parse_worker_flag(args(&["--isolated-worker=window_meta"])).as_deref(),
            Some("window_meta")
        );
        assert_eq!(parse_worker_flag(args(&["run"])), None);
    }

    #[test]
    fn replies_use_snake_case_envelope() {
        let ok = encode_reply::<u32, BackendFailure>(Ok(7)).unwrap();
        assert_eq!(ok, r#"{"ok":7}"#);

        let err = encode_reply::<u32, _>(Err(BackendFailure::new("window_meta", "busy"))).unwrap();
        assert_eq!(err, r#"{"err":{"operation":"window_meta","message":"busy"}}"#);
    }
}
