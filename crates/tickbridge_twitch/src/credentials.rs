#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tickbridge_domain::Credential;
use tracing::{debug, info, warn};

const ACCESS_TOKEN_FILE: &str = "twitch_access_token.txt";
const REFRESH_TOKEN_FILE: &str = "twitch_refresh_token.txt";

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("create token directory {path}: {source}")]
	CreateDir { path: PathBuf, source: io::Error },
	#[error("write token file {path}: {source}")]
	Write { path: PathBuf, source: io::Error },
	#[error("refusing to persist incomplete credential")]
	Incomplete,
}

/// Plain-text token pair under an application-private directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
	dir: PathBuf,
}

impl CredentialStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn access_path(&self) -> PathBuf {
		self.dir.join(ACCESS_TOKEN_FILE)
	}

	fn refresh_path(&self) -> PathBuf {
		self.dir.join(REFRESH_TOKEN_FILE)
	}

	/// Read the persisted pair. Either half missing or empty means no credential.
	pub fn load_persisted(&self) -> Option<Credential> {
		let access = read_token(&self.access_path())?;
		let refresh = read_token(&self.refresh_path())?;

		info!(dir = %self.dir.display(), "loaded persisted twitch credential");
		Some(Credential::new(access, refresh))
	}

	pub fn persist(&self, credential: &Credential) -> Result<(), StoreError> {
		if !credential.is_complete() {
			return Err(StoreError::Incomplete);
		}

		fs::create_dir_all(&self.dir).map_err(|source| StoreError::CreateDir {
			path: self.dir.clone(),
			source,
		})?;

		write_token(&self.access_path(), credential.access_token.expose())?;
		write_token(&self.refresh_path(), credential.refresh_token.expose())?;

		info!(dir = %self.dir.display(), "persisted twitch credential");
		Ok(())
	}
}

fn read_token(path: &Path) -> Option<String> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let s = s.trim();
			if s.is_empty() {
				debug!(path = %path.display(), "token file is empty");
				None
			} else {
				Some(s.to_string())
			}
		}
		Err(e) if e.kind() == io::ErrorKind::NotFound => None,
		Err(e) => {
			warn!(path = %path.display(), error = %e, "failed to read token file");
			None
		}
	}
}

fn write_token(path: &Path, value: &str) -> Result<(), StoreError> {
	fs::write(path, value).map_err(|source| StoreError::Write {
		path: path.to_path_buf(),
		source,
	})
}
