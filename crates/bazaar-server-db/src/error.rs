// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// SQLite primary result codes that indicate lock contention.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

impl DbError {
	/// Whether retrying the same operation later could succeed.
	///
	/// Pool exhaustion, I/O failures and SQLite lock contention are transient.
	/// Constraint violations, decoding failures and missing rows are not.
	pub fn is_transient(&self) -> bool {
		match self {
			DbError::Sqlx(sqlx::Error::PoolTimedOut) | DbError::Sqlx(sqlx::Error::Io(_)) => true,
			DbError::Sqlx(sqlx::Error::Database(db)) => db
				.code()
				.and_then(|code| code.parse::<i64>().ok())
				.map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
				.unwrap_or(false),
			_ => false,
		}
	}

	/// Map a unique-constraint violation to [`DbError::Conflict`].
	pub(crate) fn from_write(err: sqlx::Error, what: impl Into<String>) -> Self {
		match &err {
			sqlx::Error::Database(db) if db.is_unique_violation() => DbError::Conflict(what.into()),
			_ => DbError::Sqlx(err),
		}
	}
}

pub type Result<T> = std::result::Result<T, DbError>;
