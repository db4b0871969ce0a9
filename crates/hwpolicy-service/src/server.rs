use std::collections::BTreeMap;
use std::io::{self, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use hwpolicy_core::{ResourceRequirement, RollbackSource};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::PolicyError;
use crate::framing::{
    read_http_request, write_http_response, write_stdio_reply, HttpRequest, HttpResponse, Inbound,
    StdioReader, MAX_BODY_BYTES,
};
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR, VERSION_NOT_FOUND,
};
use crate::service::{Persistence, PolicyService};

const SERVER_NAME: &str = "hwpolicyd";
const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed number of connection handler threads.
const HTTP_WORKERS: usize = 16;
/// Accepted connections waiting for a handler before accept stalls.
const HTTP_BACKLOG: usize = 64;

/// JSON-RPC front end over a shared [`PolicyService`].
#[derive(Debug, Clone)]
pub struct RpcServer {
    service: Arc<PolicyService>,
}

impl RpcServer {
    pub fn new(service: Arc<PolicyService>) -> Self {
        Self { service }
    }

    /// Parses and dispatches one raw request. Notifications yield `None`.
    pub fn handle_payload(&self, payload: &[u8]) -> Option<JsonRpcResponse> {
        match serde_json::from_slice::<JsonRpcRequest>(payload) {
            Ok(request) => self.handle_request(request),
            Err(err) => Some(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {err}"),
            )),
        }
    }

    pub fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "invalid jsonrpc version",
            ));
        }

        let is_notification = request.id.is_none();
        let id = request.id.unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "ping" => JsonRpcResponse::success(id, json!({})),
            "policy/evaluate" => self.handle_evaluate(id, request.params),
            "policy/report_outcome" => self.handle_report_outcome(id, request.params),
            "policy/get" => JsonRpcResponse::success(id, json!(self.service.policy())),
            "policy/history" => self.handle_history(id, request.params),
            "policy/rollback" => self.handle_rollback(id, request.params),
            "policy/decay" => {
                let applied = self.service.decay();
                let view = self.service.policy();
                JsonRpcResponse::success(
                    id,
                    json!({
                        "changed": applied.value,
                        "version": view.version,
                        "weights": view.weights,
                        "persistence": persistence_json(&applied.persistence),
                    }),
                )
            }
            "policy/reset" => {
                let applied = self.service.reset();
                JsonRpcResponse::success(
                    id,
                    json!({
                        "version": applied.value.version,
                        "weights": applied.value.weights,
                        "persistence": persistence_json(&applied.persistence),
                    }),
                )
            }
            other => {
                tracing::debug!(method = other, "unknown rpc method");
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, "method not found")
            }
        };

        if is_notification {
            return None;
        }
        Some(response)
    }

    fn handle_evaluate(&self, id: Value, params: Value) -> JsonRpcResponse {
        let requirement = match parse_params::<ResourceRequirement>(params) {
            Ok(v) => v,
            Err(message) => return JsonRpcResponse::error(id, INVALID_PARAMS, message),
        };
        match self.service.evaluate(&requirement) {
            Ok(decision) => JsonRpcResponse::success(id, json!(decision)),
            Err(err) => policy_error_response(id, &err),
        }
    }

    fn handle_report_outcome(&self, id: Value, params: Value) -> JsonRpcResponse {
        let input = match parse_params::<ReportOutcomeParams>(params) {
            Ok(v) => v,
            Err(message) => return JsonRpcResponse::error(id, INVALID_PARAMS, message),
        };

        let mut impact = BTreeMap::new();
        let mut rejected = Vec::new();
        for (name, value) in input.impact {
            match value.as_f64() {
                Some(v) => {
                    impact.insert(name, v);
                }
                None => rejected.push(name),
            }
        }
        if !rejected.is_empty() {
            tracing::debug!(?rejected, "non-numeric impact entries ignored");
        }

        let applied = self
            .service
            .report_outcome(input.cause.as_deref().unwrap_or_default(), &impact);
        JsonRpcResponse::success(
            id,
            json!({
                "snapshot": applied.value,
                "persistence": persistence_json(&applied.persistence),
            }),
        )
    }

    fn handle_history(&self, id: Value, params: Value) -> JsonRpcResponse {
        let input = match parse_params_optional::<HistoryParams>(params) {
            Ok(v) => v,
            Err(message) => return JsonRpcResponse::error(id, INVALID_PARAMS, message),
        };
        let mut history = self.service.history();
        if let Some(limit) = input.limit {
            history = history.split_off(history.len().saturating_sub(limit));
        }
        JsonRpcResponse::success(
            id,
            json!({
                "current_version": self.service.policy().version,
                "history": history,
            }),
        )
    }

    fn handle_rollback(&self, id: Value, params: Value) -> JsonRpcResponse {
        let input = match parse_params::<RollbackParams>(params) {
            Ok(v) => v,
            Err(message) => return JsonRpcResponse::error(id, INVALID_PARAMS, message),
        };
        match self.service.rollback(input.version) {
            Ok(applied) => {
                let outcome = applied.value;
                let source = match outcome.source {
                    RollbackSource::Snapshot => "snapshot",
                    RollbackSource::SynthesizedBaseline => "synthesized_baseline",
                };
                JsonRpcResponse::success(
                    id,
                    json!({
                        "from_version": outcome.from_version,
                        "version": outcome.to_version,
                        "weights": outcome.weights,
                        "source": source,
                        "persistence": persistence_json(&applied.persistence),
                    }),
                )
            }
            Err(err) => policy_error_response(id, &err),
        }
    }

    pub fn serve_stdio(&self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut frames = StdioReader::new(stdin.lock());
        let mut stdout = io::stdout().lock();

        while let Some(frame) = frames.next_frame()? {
            let reply = match frame.body {
                Inbound::Message(payload) => self.handle_payload(&payload),
                Inbound::TooLarge { declared } => {
                    tracing::warn!(
                        ?declared,
                        limit = MAX_BODY_BYTES,
                        "oversized stdio request skipped"
                    );
                    Some(JsonRpcResponse::error(
                        Value::Null,
                        INVALID_REQUEST,
                        format!("request exceeds {MAX_BODY_BYTES} bytes"),
                    ))
                }
                Inbound::Malformed(reason) => Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("invalid stdio frame: {reason}"),
                )),
            };
            if let Some(reply) = reply {
                write_stdio_reply(&mut stdout, frame.framing, &serde_json::to_vec(&reply)?)?;
            }
        }

        tracing::info!("stdin closed; stdio transport stopping");
        Ok(())
    }

    pub fn serve_http(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.serve_listener(&listener)
    }

    /// Accepts connections until the listener fails. Each connection carries
    /// one request. A fixed set of handler threads drains a bounded queue, so
    /// a flood of connections waits in the kernel backlog instead of
    /// spawning threads.
    pub fn serve_listener(&self, listener: &TcpListener) -> io::Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            workers = HTTP_WORKERS,
            "http transport listening"
        );
        let (queue, accepted) = mpsc::sync_channel::<TcpStream>(HTTP_BACKLOG);
        let accepted = Mutex::new(accepted);
        std::thread::scope(|scope| {
            for _ in 0..HTTP_WORKERS {
                scope.spawn(|| loop {
                    let next = accepted.lock().recv();
                    let Ok(stream) = next else {
                        break;
                    };
                    if let Err(err) = self.handle_http_connection(stream) {
                        tracing::warn!(error = %err, "http request failed");
                    }
                });
            }
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        if queue.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "http accept failed"),
                }
            }
            drop(queue);
        });
        Ok(())
    }

    fn handle_http_connection(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_read_timeout(Some(HTTP_READ_TIMEOUT))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let response = match read_http_request(&mut reader)? {
            None => return Ok(()),
            Some(Inbound::Message(req)) => {
                tracing::debug!(method = %req.method, path = %req.path, "http request");
                self.dispatch_http_request(&req)
            }
            Some(Inbound::TooLarge { declared }) => {
                tracing::warn!(
                    ?declared,
                    limit = MAX_BODY_BYTES,
                    "oversized http request refused"
                );
                HttpResponse::json(
                    413,
                    &json!({
                        "error": "payload_too_large",
                        "message": format!("request body exceeds {MAX_BODY_BYTES} bytes"),
                    }),
                )
            }
            Some(Inbound::Malformed(reason)) => {
                tracing::debug!(%reason, "malformed http request");
                HttpResponse::json(400, &json!({"error": "bad_request", "message": reason}))
            }
        };
        write_http_response(&mut stream, &response)
    }

    fn dispatch_http_request(&self, req: &HttpRequest) -> HttpResponse {
        match (req.method.as_str(), req.path.as_str()) {
            ("GET", "/health") => HttpResponse::json(
                200,
                &json!({
                    "status": "ok",
                    "server": SERVER_NAME,
                    "version": self.service.policy().version,
                }),
            ),
            ("GET", "/policy") => HttpResponse::json(200, &json!(self.service.policy())),
            ("GET", "/history") => {
                let limit = req.query.get("limit").and_then(|v| v.parse::<usize>().ok());
                let params = limit.map_or(Value::Null, |limit| json!({ "limit": limit }));
                let response = self.handle_history(Value::Null, params);
                HttpResponse::json(200, &rpc_body(&response))
            }
            ("POST", "/rpc") => match self.handle_payload(&req.body) {
                Some(response) => HttpResponse::json(200, &rpc_body(&response)),
                None => HttpResponse::empty(204),
            },
            (_, "/health" | "/policy" | "/history" | "/rpc") => HttpResponse::json(
                405,
                &json!({"error": "method_not_allowed", "message": "unsupported method"}),
            ),
            _ => HttpResponse::json(
                404,
                &json!({"error": "not_found", "message": "unknown path"}),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportOutcomeParams {
    #[serde(default)]
    cause: Option<String>,
    impact: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RollbackParams {
    version: u64,
}

pub fn persistence_json(persistence: &Persistence) -> Value {
    match persistence {
        Persistence::Durable => json!({"status": "durable"}),
        Persistence::Skipped => json!({"status": "skipped"}),
        Persistence::Degraded(err) => json!({"status": "degraded", "error": err.to_string()}),
    }
}

fn policy_error_response(id: Value, err: &PolicyError) -> JsonRpcResponse {
    match err {
        PolicyError::InvalidRequirement(_) => {
            JsonRpcResponse::error(id, INVALID_PARAMS, err.to_string())
        }
        PolicyError::VersionNotFound { requested, current } => JsonRpcResponse::error_with_data(
            id,
            VERSION_NOT_FOUND,
            err.to_string(),
            Some(json!({"requested": requested, "current": current})),
        ),
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, String> {
    if params.is_null() {
        return Err("missing params".to_string());
    }
    serde_json::from_value(params).map_err(|err| format!("invalid params: {err}"))
}

fn parse_params_optional<T: for<'de> Deserialize<'de> + Default>(
    params: Value,
) -> Result<T, String> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params).map_err(|err| format!("invalid params: {err}"))
}

fn rpc_body(response: &JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|_| json!({}))
}

#[cfg(test)]
mod tests {
    use hwpolicy_core::HardwareCatalog;
    use hwpolicy_storage::MemoryStore;

    use super::*;
    use crate::config::PolicySettings;

    fn server() -> RpcServer {
        let settings = PolicySettings {
            persist_timeout: Duration::ZERO,
            ..PolicySettings::default()
        };
        let service = PolicyService::new(
            HardwareCatalog::builtin(),
            settings,
            Arc::new(MemoryStore::new()),
        )
        .expect("service");
        RpcServer::new(Arc::new(service))
    }

    fn call(server: &RpcServer, body: &str) -> Value {
        let response = server.handle_payload(body.as_bytes()).expect("response");
        serde_json::to_value(response).expect("serialize")
    }

    #[test]
    fn notifications_get_no_response() {
        let server = server();
        assert!(server
            .handle_payload(br#"{"jsonrpc":"2.0","method":"ping"}"#)
            .is_none());
    }

    #[test]
    fn parse_and_version_errors_use_standard_codes() {
        let server = server();
        assert_eq!(call(&server, "{not json")["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(
            call(&server, r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#)["error"]["code"],
            json!(INVALID_REQUEST)
        );
        assert_eq!(
            call(&server, r#"{"jsonrpc":"2.0","id":1,"method":"policy/nope"}"#)["error"]["code"],
            json!(METHOD_NOT_FOUND)
        );
    }

    #[test]
    fn report_outcome_skips_non_numeric_impact() {
        let server = server();
        let value = call(
            &server,
            r#"{"jsonrpc":"2.0","id":7,"method":"policy/report_outcome",
                "params":{"cause":"OOM","impact":{"risk":0.6,"perf":"high","cost":-0.7}}}"#,
        );
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["result"]["snapshot"]["v"], json!(2));
        assert_eq!(value["result"]["snapshot"]["cause"], json!("OOM"));
        let risk = value["result"]["snapshot"]["weights"]["risk"].as_f64().expect("risk");
        assert!(risk > 0.6 && risk <= 0.95);
        assert_eq!(value["result"]["persistence"]["status"], json!("durable"));
    }

    #[test]
    fn missing_rollback_target_reports_versions() {
        let server = server();
        let value = call(
            &server,
            r#"{"jsonrpc":"2.0","id":"r","method":"policy/rollback","params":{"version":999}}"#,
        );
        assert_eq!(value["error"]["code"], json!(VERSION_NOT_FOUND));
        assert_eq!(value["error"]["data"]["requested"], json!(999));
        assert_eq!(value["error"]["data"]["current"], json!(1));
    }

    #[test]
    fn history_limit_keeps_newest_entries() {
        let server = server();
        for _ in 0..3 {
            call(
                &server,
                r#"{"jsonrpc":"2.0","id":1,"method":"policy/report_outcome","params":{"impact":{"risk":0.1}}}"#,
            );
        }
        let value = call(
            &server,
            r#"{"jsonrpc":"2.0","id":2,"method":"policy/history","params":{"limit":2}}"#,
        );
        let versions = value["result"]["history"]
            .as_array()
            .expect("history")
            .iter()
            .map(|s| s["v"].as_u64().expect("v"))
            .collect::<Vec<_>>();
        assert_eq!(versions, vec![3, 4]);
        assert_eq!(value["result"]["current_version"], json!(4));
    }
}
