// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SMTP email client for Bazaar.
//!
//! Sends multipart (plain text + HTML) messages through a relay described by
//! [`SmtpConfig`]. The transport connects lazily, so building a client never
//! touches the network.
//!
//! # Example
//!
//! ```no_run
//! use bazaar_server_config::{SmtpConfig, TlsMode};
//! use bazaar_server_smtp::SmtpClient;
//!
//! # async fn example() -> Result<(), bazaar_server_smtp::SmtpError> {
//! let config = SmtpConfig {
//!     host: "smtp.example.com".to_string(),
//!     port: 587,
//!     username: None,
//!     password: None,
//!     from_address: "noreply@example.com".to_string(),
//!     from_name: "Bazaar".to_string(),
//!     tls_mode: TlsMode::StartTls,
//! };
//!
//! let client = SmtpClient::new(&config)?;
//! client
//!     .send_email("owner@example.com", "Hello", "<p>Hello</p>", "Hello")
//!     .await?;
//! # Ok(())
//! # }
//! ```

use bazaar_server_config::{SmtpConfig, TlsMode};
use lettre::{
	message::{header::ContentType, Mailbox, MultiPart, SinglePart},
	transport::smtp::authentication::Credentials,
	Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
	#[error("connection failed: {0}")]
	Connection(String),

	#[error("send failed: {0}")]
	Send(String),

	#[error("invalid email address: {0}")]
	Address(String),
}

/// Async SMTP client bound to one relay and one sender mailbox.
pub struct SmtpClient {
	transport: AsyncSmtpTransport<Tokio1Executor>,
	from_mailbox: Mailbox,
}

impl SmtpClient {
	/// Build the transport for the configured TLS mode.
	///
	/// # Errors
	///
	/// Returns [`SmtpError::Address`] if the sender address is invalid and
	/// [`SmtpError::Connection`] if the TLS parameters cannot be built.
	#[tracing::instrument(
		name = "smtp_client_new",
		skip(config),
		fields(host = %config.host, port = config.port, tls_mode = ?config.tls_mode)
	)]
	pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
		let address: Address = config
			.from_address
			.parse()
			.map_err(|e| SmtpError::Address(format!("{}: {e}", config.from_address)))?;
		let from_mailbox = Mailbox::new(Some(config.from_name.clone()), address);

		let builder = match config.tls_mode {
			TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
				.map_err(|e| SmtpError::Connection(format!("{e}")))?,
			TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
				.map_err(|e| SmtpError::Connection(format!("{e}")))?,
			TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
		};

		let mut builder = builder.port(config.port);
		if let Some((username, password)) = config.credentials() {
			builder = builder.credentials(Credentials::new(
				username.to_string(),
				password.to_string(),
			));
		}

		tracing::debug!("SMTP client initialized");

		Ok(Self {
			transport: builder.build(),
			from_mailbox,
		})
	}

	pub fn from_mailbox(&self) -> &Mailbox {
		&self.from_mailbox
	}

	/// Connects to the relay and issues `NOOP`.
	#[tracing::instrument(name = "smtp_check_health", skip(self))]
	pub async fn check_health(&self) -> Result<(), SmtpError> {
		let reachable = self
			.transport
			.test_connection()
			.await
			.map_err(|e| SmtpError::Connection(format!("{e}")))?;
		if !reachable {
			return Err(SmtpError::Connection("relay did not answer NOOP".to_string()));
		}
		Ok(())
	}

	/// Assemble a `multipart/alternative` message from this client's sender.
	pub fn build_message(
		&self,
		to: &str,
		subject: &str,
		body_html: &str,
		body_text: &str,
	) -> Result<Message, SmtpError> {
		let to_mailbox: Mailbox = to
			.parse()
			.map_err(|e| SmtpError::Address(format!("{to}: {e}")))?;

		Message::builder()
			.from(self.from_mailbox.clone())
			.to(to_mailbox)
			.subject(subject)
			.multipart(
				MultiPart::alternative()
					.singlepart(
						SinglePart::builder()
							.header(ContentType::TEXT_PLAIN)
							.body(body_text.to_string()),
					)
					.singlepart(
						SinglePart::builder()
							.header(ContentType::TEXT_HTML)
							.body(body_html.to_string()),
					),
			)
			.map_err(|e| SmtpError::Send(format!("failed to build message: {e}")))
	}

	#[tracing::instrument(name = "smtp_send_email", skip(self, body_html, body_text), fields(to = %to))]
	pub async fn send_email(
		&self,
		to: &str,
		subject: &str,
		body_html: &str,
		body_text: &str,
	) -> Result<(), SmtpError> {
		let message = self.build_message(to, subject, body_html, body_text)?;

		tracing::debug!("sending email");
		self
			.transport
			.send(message)
			.await
			.map_err(|e| SmtpError::Send(format!("{e}")))?;
		tracing::info!("email sent");

		Ok(())
	}
}

/// Syntactic check only; says nothing about deliverability.
pub fn is_valid_email(email: &str) -> bool {
	email.parse::<Mailbox>().is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn local_relay() -> SmtpConfig {
		SmtpConfig {
			host: "localhost".to_string(),
			port: 2525,
			username: None,
			password: None,
			from_address: "noreply@bazaar.local".to_string(),
			from_name: "Bazaar".to_string(),
			tls_mode: TlsMode::None,
		}
	}

	fn formatted(message: &Message) -> String {
		String::from_utf8(message.formatted()).unwrap()
	}

	#[tokio::test]
	async fn message_carries_sender_recipient_and_both_bodies() {
		let client = SmtpClient::new(&local_relay()).unwrap();
		let message = client
			.build_message(
				"owner@acme.example",
				"Your marketplace is ready",
				"<p>ready</p>",
				"ready",
			)
			.unwrap();

		let envelope = message.envelope();
		assert_eq!(envelope.to().len(), 1);
		assert_eq!(envelope.to()[0].to_string(), "owner@acme.example");
		assert_eq!(
			envelope.from().map(|a| a.to_string()).as_deref(),
			Some("noreply@bazaar.local")
		);

		let raw = formatted(&message);
		assert!(raw.contains("Subject: Your marketplace is ready"));
		assert!(raw.contains("multipart/alternative"));
		assert!(raw.contains("text/plain"));
		assert!(raw.contains("text/html"));
	}

	#[tokio::test]
	async fn invalid_recipient_is_an_address_error() {
		let client = SmtpClient::new(&local_relay()).unwrap();
		let result = client.build_message("not-an-email", "s", "<p>x</p>", "x");
		assert!(matches!(result, Err(SmtpError::Address(_))));
	}

	#[test]
	fn invalid_sender_is_rejected_at_construction() {
		let config = SmtpConfig {
			from_address: "nobody".to_string(),
			..local_relay()
		};
		assert!(matches!(
			SmtpClient::new(&config),
			Err(SmtpError::Address(_))
		));
	}

	#[test]
	fn sender_mailbox_uses_display_name() {
		let client = SmtpClient::new(&local_relay()).unwrap();
		assert_eq!(client.from_mailbox().name.as_deref(), Some("Bazaar"));
		assert_eq!(client.from_mailbox().email.to_string(), "noreply@bazaar.local");
	}

	#[test]
	fn email_validation() {
		assert!(is_valid_email("user@example.com"));
		assert!(is_valid_email("User Name <user@example.com>"));
		assert!(is_valid_email("user+tag@mail.example.com"));
		assert!(!is_valid_email(""));
		assert!(!is_valid_email("user@"));
		assert!(!is_valid_email("@example.com"));
		assert!(!is_valid_email("user@@example.com"));
	}

	proptest! {
		#[test]
		fn simple_addresses_are_accepted(
			local in "[a-zA-Z][a-zA-Z0-9]{0,30}",
			domain in "[a-zA-Z][a-zA-Z0-9]{0,20}",
			tld in "(com|org|net|io|dev)"
		) {
			let email = format!("{local}@{domain}.{tld}");
			prop_assert!(is_valid_email(&email), "expected valid: {}", email);
		}

		#[test]
		fn strings_without_at_are_rejected(s in "[a-zA-Z0-9._%+-]{1,50}") {
			prop_assume!(!s.contains('@'));
			prop_assert!(!is_valid_email(&s));
		}
	}
}
