#![forbid(unsafe_code)]

use core::fmt;

use thiserror::Error;

/// Error classes of the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Missing or invalid configuration; startup aborts.
	Config,
	/// Token exchange or validation failed; the interactive flow may be retried.
	Auth,
	/// Socket dial/read failure.
	Connection,
	/// Unexpected or malformed notification shape.
	Protocol,
	/// Missing or mistyped event field.
	Data,
	/// REST call failure while enriching or registering.
	UpstreamApi,
}

impl ErrorKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::Config => "config",
			ErrorKind::Auth => "auth",
			ErrorKind::Connection => "connection",
			ErrorKind::Protocol => "protocol",
			ErrorKind::Data => "data",
			ErrorKind::UpstreamApi => "upstream_api",
		}
	}

	/// Whether an error of this kind ends the pipeline.
	pub const fn is_fatal(self) -> bool {
		matches!(self, ErrorKind::Config)
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
	#[error("config error: {0}")]
	Config(String),
	#[error("auth error: {0}")]
	Auth(String),
	#[error("connection error: {0}")]
	Connection(String),
	#[error("protocol error: {0}")]
	Protocol(String),
	#[error("data error: {0}")]
	Data(String),
	#[error("upstream api error: {0}")]
	UpstreamApi(String),
}

impl BridgeError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			BridgeError::Config(_) => ErrorKind::Config,
			BridgeError::Auth(_) => ErrorKind::Auth,
			BridgeError::Connection(_) => ErrorKind::Connection,
			BridgeError::Protocol(_) => ErrorKind::Protocol,
			BridgeError::Data(_) => ErrorKind::Data,
			BridgeError::UpstreamApi(_) => ErrorKind::UpstreamApi,
		}
	}
}
