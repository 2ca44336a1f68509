// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use bazaar_server_db::Stage;

use super::{StepContext, StepExecutor};
use crate::error::StepError;
use crate::output::StepOutput;
use crate::validation::{validate_request, ValidationRules};

pub struct ValidateStep {
	rules: ValidationRules,
}

impl ValidateStep {
	pub fn new(rules: ValidationRules) -> Self {
		Self { rules }
	}
}

#[async_trait]
impl StepExecutor for ValidateStep {
	fn stage(&self) -> Stage {
		Stage::Validating
	}

	fn has_side_effects(&self) -> bool {
		false
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
		validate_request(ctx.request, &self.rules)?;
		Ok(StepOutput::Validated)
	}

	async fn undo(&self, _ctx: &StepContext<'_>, _output: Option<&StepOutput>) -> Result<(), StepError> {
		Ok(())
	}
}
