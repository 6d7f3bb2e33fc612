//! The loop that runs inside a worker process (`cuewheel worker`).
//!
//! stdout carries protocol messages only; logs go to stderr.

use std::any::Any;
use std::io::{BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use thiserror::Error;

use super::protocol::{self, Hints, ProtocolError, Request, Response};
use crate::analyzer::{self, FeatureBackend};
use crate::config::AppConfig;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("{0}")]
    NoBackend(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Worker entry point: pick a backend, report readiness, serve requests
/// until told to exit or stdin closes.
pub fn run(config: &AppConfig) -> Result<(), WorkerError> {
    let chain = analyzer::build_backend_chain(config);
    let tried: Vec<&'static str> = chain.iter().map(|b| b.name()).collect();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let Some(backend) = analyzer::select_backend(chain) else {
        let error = format!("no analysis backend available (tried: {})", tried.join(", "));
        send(&mut out, &Response::InitError { error: error.clone() })?;
        return Err(WorkerError::NoBackend(error));
    };

    log::info!("Worker {} using {} backend", std::process::id(), backend.name());
    send(
        &mut out,
        &Response::Ready {
            backend: backend.name().to_string(),
        },
    )?;

    let handled = serve(backend.as_ref(), std::io::stdin().lock(), &mut out)?;
    log::debug!("Worker {} exiting after {} request(s)", std::process::id(), handled);
    Ok(())
}

/// Answer every analyze request on `input` with exactly one result on
/// `output`. Returns the number of requests answered.
pub fn serve<R: BufRead, W: Write>(
    backend: &dyn FeatureBackend,
    input: R,
    mut output: W,
) -> Result<u64, ProtocolError> {
    let mut handled = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request = match protocol::decode_line::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Ignoring malformed request: {}", e);
                continue;
            }
        };

        match request {
            Request::Exit => break,
            Request::Analyze {
                request_id,
                file_path,
                hints,
            } => {
                let response = analyze_guarded(backend, request_id, &file_path, &hints);
                send(&mut output, &response)?;
                handled += 1;
            }
        }
    }
    Ok(handled)
}

/// Run the backend, turning errors and panics into a failed result so the
/// coordinator never mistakes them for a crash.
fn analyze_guarded(
    backend: &dyn FeatureBackend,
    request_id: u64,
    path: &Path,
    hints: &Hints,
) -> Response {
    log::debug!("Request {}: {}", request_id, path.display());
    match catch_unwind(AssertUnwindSafe(|| backend.analyze(path, hints))) {
        Ok(Ok(features)) => Response::success(request_id, features),
        Ok(Err(e)) => {
            log::warn!("Analysis of {} failed: {}", path.display(), e);
            Response::failure(request_id, e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            log::error!("Analysis of {} panicked: {}", path.display(), message);
            Response::failure(request_id, format!("analysis panicked: {}", message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn send<W: Write>(output: &mut W, message: &Response) -> Result<(), ProtocolError> {
    output.write_all(protocol::encode_line(message)?.as_bytes())?;
    output.flush()?;
    Ok(())
}
