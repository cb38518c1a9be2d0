#![forbid(unsafe_code)]

use serde_json::{Map, Value};
use thiserror::Error;
use tickbridge_domain::{ErrorKind, EventType};
use tracing::{error, warn};

use super::NormalizeError;

/// Problem found while coercing one field. The read still yields a zero value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldIssue {
	#[error("missing event data: {key}")]
	Missing { key: String },
	#[error("unable to read {key} as int: {value:?}")]
	NotNumeric { key: String, value: String },
	#[error("unsupported event data type for {key}: {found}")]
	UnsupportedType { key: String, found: &'static str },
	#[error("cannot read {key} ({found}) as bool")]
	NotBool { key: String, found: &'static str },
}

impl FieldIssue {
	/// Errors are logged at error level, the rest at warn.
	pub fn is_error(&self) -> bool {
		matches!(self, FieldIssue::Missing { .. } | FieldIssue::NotNumeric { .. })
	}
}

pub(crate) fn type_name(v: &Value) -> &'static str {
	match v {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

/// Any scalar as text. Integers print as-is, floats with two decimals, null as "".
pub fn read_string(map: &Map<String, Value>, key: &str) -> (String, Option<FieldIssue>) {
	let Some(val) = map.get(key) else {
		return (String::new(), Some(FieldIssue::Missing { key: key.to_string() }));
	};

	match val {
		Value::String(s) => (s.clone(), None),
		Value::Number(n) if n.is_i64() || n.is_u64() => (n.to_string(), None),
		Value::Number(n) => (format!("{:.2}", n.as_f64().unwrap_or_default()), None),
		Value::Bool(b) => (b.to_string(), None),
		Value::Null => (String::new(), None),
		other => (
			String::new(),
			Some(FieldIssue::UnsupportedType {
				key: key.to_string(),
				found: type_name(other),
			}),
		),
	}
}

/// Integer view of a scalar. Numeric strings are parsed, floats truncated, null is 0.
pub fn read_int(map: &Map<String, Value>, key: &str) -> (i64, Option<FieldIssue>) {
	let Some(val) = map.get(key) else {
		return (0, Some(FieldIssue::Missing { key: key.to_string() }));
	};

	match val {
		Value::String(s) => match s.trim().parse::<i64>() {
			Ok(n) => (n, None),
			Err(_) => (
				0,
				Some(FieldIssue::NotNumeric {
					key: key.to_string(),
					value: s.clone(),
				}),
			),
		},
		Value::Number(n) => {
			let v = n
				.as_i64()
				.or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
				.unwrap_or_else(|| n.as_f64().unwrap_or_default() as i64);
			(v, None)
		}
		Value::Bool(b) => (i64::from(*b), None),
		Value::Null => (0, None),
		other => (
			0,
			Some(FieldIssue::UnsupportedType {
				key: key.to_string(),
				found: type_name(other),
			}),
		),
	}
}

/// Only JSON booleans are accepted.
pub fn read_bool(map: &Map<String, Value>, key: &str) -> (bool, Option<FieldIssue>) {
	match map.get(key) {
		None => (false, Some(FieldIssue::Missing { key: key.to_string() })),
		Some(Value::Bool(b)) => (*b, None),
		Some(other) => (
			false,
			Some(FieldIssue::NotBool {
				key: key.to_string(),
				found: type_name(other),
			}),
		),
	}
}

pub(crate) fn object<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Map<String, Value>, NormalizeError> {
	match map.get(key) {
		Some(Value::Object(obj)) => Ok(obj),
		Some(other) => Err(NormalizeError::WrongShape {
			key: key.to_string(),
			expected: "object",
			found: type_name(other),
		}),
		None => Err(NormalizeError::MissingNested(key.to_string())),
	}
}

pub(crate) fn array<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], NormalizeError> {
	match map.get(key) {
		Some(Value::Array(items)) => Ok(items),
		Some(other) => Err(NormalizeError::WrongShape {
			key: key.to_string(),
			expected: "array",
			found: type_name(other),
		}),
		None => Err(NormalizeError::MissingNested(key.to_string())),
	}
}

pub(crate) fn element<'a>(item: &'a Value, key: &str, index: usize) -> Result<&'a Map<String, Value>, NormalizeError> {
	match item {
		Value::Object(obj) => Ok(obj),
		other => Err(NormalizeError::WrongShape {
			key: format!("{key}[{index}]"),
			expected: "object",
			found: type_name(other),
		}),
	}
}

/// Applies the coercion primitives for one event and logs every issue as it happens.
#[derive(Debug)]
pub struct FieldReader {
	event_type: EventType,
	issues: Vec<FieldIssue>,
}

impl FieldReader {
	pub fn new(event_type: EventType) -> Self {
		Self {
			event_type,
			issues: Vec::new(),
		}
	}

	pub fn issues(&self) -> &[FieldIssue] {
		&self.issues
	}

	pub fn string(&mut self, map: &Map<String, Value>, key: &str) -> String {
		let (v, issue) = read_string(map, key);
		self.note(issue);
		v
	}

	pub fn int(&mut self, map: &Map<String, Value>, key: &str) -> i64 {
		let (v, issue) = read_int(map, key);
		self.note(issue);
		v
	}

	pub fn boolean(&mut self, map: &Map<String, Value>, key: &str) -> bool {
		let (v, issue) = read_bool(map, key);
		self.note(issue);
		v
	}

	pub(crate) fn note(&mut self, issue: Option<FieldIssue>) {
		let Some(issue) = issue else { return };

		if issue.is_error() {
			error!(event_type = %self.event_type, kind = %ErrorKind::Data, %issue, "event field issue");
		} else {
			warn!(event_type = %self.event_type, kind = %ErrorKind::Data, %issue, "event field issue");
		}
		self.issues.push(issue);
	}
}
