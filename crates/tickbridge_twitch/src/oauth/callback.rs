#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tickbridge_domain::BridgeError;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DONE_HTML: &str = "<html><body><h1>Authorized</h1><p>You can close this window.</p></body></html>";
const DENIED_HTML: &str = "<html><body><h1>Authorization denied</h1><p>You can close this window.</p></body></html>";

#[derive(Debug)]
enum CallbackOutcome {
	Code(String),
	Denied(String),
}

/// Serve `GET <path>` on `listener` until a request carries `code` or `error`, then stop accepting.
pub(crate) async fn wait_for_code(listener: TcpListener, path: &str) -> Result<String, BridgeError> {
	let (tx, mut rx) = mpsc::channel::<CallbackOutcome>(1);
	let path: Arc<str> = Arc::from(path);

	if let Ok(addr) = listener.local_addr() {
		info!(%addr, path = %path, "waiting for oauth callback");
	}

	let outcome = loop {
		tokio::select! {
			accepted = listener.accept() => {
				let (stream, remote) = accepted
					.map_err(|e| BridgeError::Auth(format!("accept oauth callback connection: {e}")))?;
				debug!(%remote, "oauth callback connection");

				let io = TokioIo::new(stream);
				let tx = tx.clone();
				let path = Arc::clone(&path);
				tokio::spawn(async move {
					let service = service_fn(move |req| handle_callback(req, Arc::clone(&path), tx.clone()));
					if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
						debug!(error = %err, "oauth callback connection error");
					}
				});
			}
			Some(outcome) = rx.recv() => break outcome,
		}
	};

	match outcome {
		CallbackOutcome::Code(code) => Ok(code),
		CallbackOutcome::Denied(reason) => Err(BridgeError::Auth(format!("authorization denied: {reason}"))),
	}
}

async fn handle_callback(
	req: Request<Incoming>,
	path: Arc<str>,
	tx: mpsc::Sender<CallbackOutcome>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, ""));
	}
	if req.uri().path() != &*path {
		return Ok(respond(StatusCode::NOT_FOUND, ""));
	}

	let query = req.uri().query().unwrap_or_default();
	let mut code = None;
	let mut error = None;
	let mut error_description = None;
	for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
		match key.as_ref() {
			"code" => code = Some(value.into_owned()),
			"error" => error = Some(value.into_owned()),
			"error_description" => error_description = Some(value.into_owned()),
			_ => {}
		}
	}

	if let Some(code) = code.filter(|c| !c.trim().is_empty()) {
		if tx.try_send(CallbackOutcome::Code(code)).is_err() {
			debug!("oauth callback already completed; ignoring extra code");
		}
		return Ok(respond(StatusCode::OK, DONE_HTML));
	}

	if let Some(error) = error {
		let reason = match error_description {
			Some(desc) => format!("{error}: {desc}"),
			None => error,
		};
		warn!(%reason, "oauth callback reported an error");
		let _ = tx.try_send(CallbackOutcome::Denied(reason));
		return Ok(respond(StatusCode::OK, DENIED_HTML));
	}

	Ok(respond(StatusCode::BAD_REQUEST, "missing code"))
}

fn respond(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
	*resp.status_mut() = status;
	resp
}
