#![forbid(unsafe_code)]

//! Routes INFO/WARN/ERROR `tracing` events to a host-provided sink.
//!
//! The host registers [`HostLogLayer`] next to its own subscriber layers; DEBUG and TRACE stay in the
//! regular `tracing` output only.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
	Info,
	Warn,
	Error,
}

impl Severity {
	pub fn from_level(level: &Level) -> Option<Self> {
		match *level {
			Level::ERROR => Some(Severity::Error),
			Level::WARN => Some(Severity::Warn),
			Level::INFO => Some(Severity::Info),
			_ => None,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Severity::Info => "info",
			Severity::Warn => "warn",
			Severity::Error => "error",
		}
	}
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Receives human-readable log lines.
pub trait LogSink: Send + Sync + 'static {
	fn log(&self, severity: Severity, line: &str);
}

impl<F> LogSink for F
where
	F: Fn(Severity, &str) + Send + Sync + 'static,
{
	fn log(&self, severity: Severity, line: &str) {
		self(severity, line)
	}
}

pub struct HostLogLayer {
	sink: Arc<dyn LogSink>,
}

impl HostLogLayer {
	pub fn new(sink: Arc<dyn LogSink>) -> Self {
		Self { sink }
	}
}

/// Collects `message` plus `key=value` pairs for the remaining fields.
#[derive(Default)]
struct LineVisitor {
	message: String,
	fields: String,
}

impl LineVisitor {
	fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
		if !self.fields.is_empty() {
			self.fields.push(' ');
		}
		let _ = write!(self.fields, "{name}={value}");
	}

	fn finish(self) -> String {
		match (self.message.is_empty(), self.fields.is_empty()) {
			(_, true) => self.message,
			(true, false) => self.fields,
			(false, false) => format!("{} {}", self.message, self.fields),
		}
	}
}

impl Visit for LineVisitor {
	fn record_str(&mut self, field: &Field, value: &str) {
		if field.name() == "message" {
			self.message = value.to_string();
		} else {
			self.push_field(field.name(), format_args!("{value}"));
		}
	}

	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		if field.name() == "message" {
			self.message = format!("{value:?}");
		} else {
			self.push_field(field.name(), format_args!("{value:?}"));
		}
	}
}

impl<S> Layer<S> for HostLogLayer
where
	S: Subscriber,
{
	fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
		let Some(severity) = Severity::from_level(event.metadata().level()) else {
			return;
		};

		let mut visitor = LineVisitor::default();
		event.record(&mut visitor);
		self.sink.log(severity, &visitor.finish());
	}
}
