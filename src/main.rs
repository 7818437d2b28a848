//! `sk-manager-agent`: a privileged local process that owns direct USB
//! HID and PC/SC access to Feitian security keys and exposes it to a
//! browser extension over framed JSON-RPC on stdin/stdout (spec.md §4.1).
//! One request is handled at a time; there is no concurrency inside this
//! process beyond what `hidapi`/`pcsc` do internally.

mod dispatch;
mod error;
mod framing;
mod handlers;
mod registry;

use std::io::{self, BufReader, Write};
use std::process::ExitCode;

use log::{error, info};

use dispatch::{dispatch, error_envelope, success_envelope, Request};
use framing::FramingError;
use registry::DeviceRegistry;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let registry = DeviceRegistry::new();
    if !registry.has_any_subsystem() {
        error!("neither the HID nor the PC/SC subsystem is available on this host");
        return ExitCode::from(2);
    }

    run(registry)
}

fn run(mut registry: DeviceRegistry) -> ExitCode {
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    info!("sk-manager-agent ready");
    loop {
        let raw = match framing::read_frame(&mut reader) {
            Ok(raw) => raw,
            Err(FramingError::Eof) => {
                info!("stdin closed, shutting down");
                registry.shutdown();
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                error!("fatal framing error: {e}");
                registry.shutdown();
                return ExitCode::FAILURE;
            }
        };

        let response = match Request::parse(&raw) {
            Ok(request) => {
                let id = request.id.clone();
                match dispatch(&mut registry, &request) {
                    Ok(result) => success_envelope(id, result),
                    Err(err) => {
                        info!("request {:?} failed: {err}", request.command);
                        error_envelope(id, &err)
                    }
                }
            }
            Err(err) => {
                let id = raw.get("id").cloned().unwrap_or(serde_json::Value::Null);
                error_envelope(id, &err)
            }
        };

        if let Err(e) = framing::write_frame(&mut writer, &response) {
            error!("fatal error writing response: {e}");
            registry.shutdown();
            return ExitCode::FAILURE;
        }
        let _ = writer.flush();
    }
}
