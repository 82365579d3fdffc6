use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use denoiser_core::error::AppError;
use denoiser_core::processor::{BatchEvent, EventSink};
use denoiser_core::queue::ItemId;
use denoiser_core::sidecar_api;
use denoiser_core::{FilterPreviewParams, RunConfig};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

const LOG_TARGET_PREFIX: &str = "denoiser::";

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure<'a> {
    id: u64,
    error: RpcErrorPayload<'a>,
}

/// Either a core error (serialized as `{kind, summary, detail}`) or a protocol-level one.
#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
enum RpcErrorPayload<'a> {
    App(&'a AppError),
    Protocol {
        kind: &'static str,
        summary: &'a str,
        detail: &'a str,
    },
}

/// Failures of a single request: the engine's own errors, or a request the
/// sidecar could not interpret or answer.
#[derive(Debug)]
enum RpcError {
    App(AppError),
    Protocol {
        summary: &'static str,
        detail: String,
    },
}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        RpcError::App(err)
    }
}

impl RpcError {
    fn protocol(summary: &'static str, detail: impl ToString) -> Self {
        RpcError::Protocol {
            summary,
            detail: detail.to_string(),
        }
    }

    fn payload(&self) -> RpcErrorPayload<'_> {
        match self {
            RpcError::App(err) => RpcErrorPayload::App(err),
            RpcError::Protocol { summary, detail } => RpcErrorPayload::Protocol {
                kind: "protocol",
                summary,
                detail,
            },
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: &'static str,
    payload: Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct EnvCheckParams {
    ffmpeg_bin_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct QueueAddParams {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueSetIncludedParams {
    id: ItemId,
    included: bool,
}

#[derive(Debug, Deserialize)]
struct QueueItemParams {
    id: ItemId,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &'static str, payload: Value) {
    let _ = write_json_line_shared(writer, &RpcEvent { event, payload });
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::protocol("Failed to serialize result", e))
}

fn emit_batch_event(writer: &SharedWriter, event: BatchEvent) {
    let (name, payload) = match event {
        BatchEvent::Started { queued } => ("batch.started", json!({ "queued": queued })),
        BatchEvent::ItemStatus(item) => ("item.status", to_json(item).unwrap_or(Value::Null)),
        BatchEvent::ItemProgress { id, progress } => (
            "item.progress",
            json!({
                "id": id,
                "elapsedSecs": progress.elapsed_secs,
                "percent": progress.percent,
                "remainingSecs": progress.remaining_secs,
            }),
        ),
        BatchEvent::Finished(summary) => ("batch.finished", to_json(summary).unwrap_or(Value::Null)),
    };
    emit_rpc_event(writer, name, payload);
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::protocol("Invalid params payload", e))
}

/// Params may be omitted entirely for methods whose fields are all optional.
fn optional_params<T: serde::de::DeserializeOwned + Default>(params: Value) -> Result<T, RpcError> {
    if params.is_null() {
        Ok(T::default())
    } else {
        params_from_value(params)
    }
}

fn dispatch_sync(method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "app.capabilities" => to_json(sidecar_api::app_capabilities()),
        "env.check" => {
            let parsed: EnvCheckParams = optional_params(params)?;
            to_json(sidecar_api::env_check(parsed.ffmpeg_bin_dir)?)
        }
        "queue.add" => {
            let parsed: QueueAddParams = params_from_value(params)?;
            to_json(sidecar_api::queue_add(parsed.paths)?)
        }
        "queue.list" => to_json(sidecar_api::queue_list()),
        "queue.setIncluded" => {
            let parsed: QueueSetIncludedParams = params_from_value(params)?;
            to_json(sidecar_api::queue_set_included(parsed.id, parsed.included)?)
        }
        "queue.remove" => {
            let parsed: QueueItemParams = params_from_value(params)?;
            to_json(sidecar_api::queue_remove(parsed.id)?)
        }
        "queue.clear" => Ok(json!({ "removed": sidecar_api::queue_clear() })),
        "batch.state" => to_json(sidecar_api::batch_state()),
        "batch.cancel" => Ok(json!({ "cancelled": sidecar_api::batch_cancel() })),
        "filter.preview" => {
            let parsed: FilterPreviewParams = params_from_value(params)?;
            Ok(Value::String(sidecar_api::filter_preview(parsed)?))
        }
        _ => Err(RpcError::protocol("Unknown method", method)),
    }
}

fn write_response(writer: &SharedWriter, id: u64, result: Result<Value, RpcError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: err.payload(),
            },
        ),
    };
    if let Err(err) = written {
        log::error!(target: "denoiser::sidecar", "Failed to write response {}: {}", id, err);
    }
}

fn write_protocol_failure(writer: &SharedWriter, summary: &'static str, detail: String) {
    let err = RpcError::protocol(summary, detail);
    let failure = RpcFailure {
        id: 0,
        error: err.payload(),
    };
    let _ = write_json_line_shared(writer, &failure);
}

/// `batch.start` replies once the run ends; events stream meanwhile.
fn handle_batch_start(request: RpcRequest, writer: &SharedWriter) {
    let result = params_from_value::<RunConfig>(request.params).and_then(|config| {
        let writer_for_events = Arc::clone(writer);
        let sink: EventSink = Arc::new(move |event| emit_batch_event(&writer_for_events, event));
        Ok(sidecar_api::batch_start(config, Some(sink))?)
    });
    write_response(writer, request.id, result.and_then(to_json));
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            let target = record.target();
            let target = target.strip_prefix(LOG_TARGET_PREFIX).unwrap_or(target);
            writeln!(buf, "[{} {}] {}", record.level(), target, record.args())
        })
        .init();
}

fn main() -> io::Result<()> {
    init_logging();
    log::info!(
        target: "denoiser::sidecar",
        "Sidecar started (protocol v{})",
        sidecar_api::PROTOCOL_VERSION
    );

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                write_protocol_failure(&stdout, "Invalid input stream", err.to_string());
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_protocol_failure(&stdout, "Invalid request", err.to_string());
                continue;
            }
        };
        log::debug!(target: "denoiser::sidecar", "Request {}: {}", request.id, request.method);

        if request.method == "batch.start" {
            let writer = Arc::clone(&stdout);
            workers.push(thread::spawn(move || handle_batch_start(request, &writer)));
        } else {
            let result = dispatch_sync(&request.method, request.params);
            write_response(&stdout, request.id, result);
        }
    }

    // stdin closed: stop any run, including one whose worker has not started yet.
    log::info!(target: "denoiser::sidecar", "Input closed, shutting down");
    sidecar_api::shutdown();
    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}
