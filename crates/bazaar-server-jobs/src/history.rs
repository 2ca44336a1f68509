// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory record of recent job runs.
//!
//! Maintenance jobs are idempotent sweeps, so their history only has to
//! survive as long as the process; it feeds the health endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::types::{JobRun, JobStatus};

const DEFAULT_RUNS_PER_JOB: usize = 50;

pub struct RunHistory {
	capacity: usize,
	runs: Mutex<HashMap<String, VecDeque<JobRun>>>,
}

impl Default for RunHistory {
	fn default() -> Self {
		Self::with_capacity(DEFAULT_RUNS_PER_JOB)
	}
}

impl RunHistory {
	/// Keep at most `capacity` runs per job; older runs are evicted first.
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			runs: Mutex::new(HashMap::new()),
		}
	}

	pub fn record_start(&self, run: JobRun) {
		let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
		let entries = runs.entry(run.job_id.clone()).or_default();
		if entries.len() == self.capacity {
			entries.pop_front();
		}
		entries.push_back(run);
	}

	pub fn record_retry(&self, job_id: &str, run_id: &str, retry_count: u32) {
		self.update(job_id, run_id, |run| run.retry_count = retry_count);
	}

	pub fn record_complete(
		&self,
		job_id: &str,
		run_id: &str,
		status: JobStatus,
		error_message: Option<String>,
		metadata: Option<serde_json::Value>,
	) {
		let now = Utc::now();
		self.update(job_id, run_id, |run| {
			run.status = status;
			run.completed_at = Some(now);
			run.duration_ms = Some(elapsed_ms(run.started_at, now));
			run.error_message = error_message;
			run.metadata = metadata;
		});
	}

	pub fn last_run(&self, job_id: &str) -> Option<JobRun> {
		let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
		runs.get(job_id).and_then(|r| r.back().cloned())
	}

	/// Most recent first.
	pub fn recent_runs(&self, job_id: &str, limit: usize) -> Vec<JobRun> {
		let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
		runs
			.get(job_id)
			.map(|r| r.iter().rev().take(limit).cloned().collect())
			.unwrap_or_default()
	}

	/// Failed runs since the last success. Running and cancelled runs are
	/// skipped rather than counted.
	pub fn consecutive_failures(&self, job_id: &str) -> u32 {
		let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
		let Some(entries) = runs.get(job_id) else {
			return 0;
		};
		let mut failures = 0;
		for run in entries.iter().rev() {
			match run.status {
				JobStatus::Succeeded => break,
				JobStatus::Failed => failures += 1,
				JobStatus::Running | JobStatus::Cancelled => {}
			}
		}
		failures
	}

	fn update(&self, job_id: &str, run_id: &str, f: impl FnOnce(&mut JobRun)) {
		let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
		if let Some(run) = runs
			.get_mut(job_id)
			.and_then(|r| r.iter_mut().rev().find(|r| r.id == run_id))
		{
			f(run);
		}
	}
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
	(end - start).num_milliseconds().max(0)
}
