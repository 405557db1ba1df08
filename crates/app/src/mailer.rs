use thiserror::Error;
use tracing::info;

use crate::telemetry;

const PRODUCT_NAME: &str = "Autism Therapy Management System";

/// Outgoing notification rendered as plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub kind: MessageKind,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ParentCredentials,
    ChildCode,
    WeeklyReport,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParentCredentials => "parent_credentials",
            Self::ChildCode => "child_code",
            Self::WeeklyReport => "weekly_report",
        }
    }
}

impl OutgoingMessage {
    /// Login details for a parent account created on a doctor's behalf.
    pub fn parent_credentials(to: &str, password: &str, child_name: &str) -> Self {
        Self {
            kind: MessageKind::ParentCredentials,
            to: to.to_string(),
            subject: format!("Welcome to {PRODUCT_NAME}"),
            body: format!(
                "Dear Parent,\n\n\
                 An account has been created for you to monitor {child_name}'s therapy progress.\n\n\
                 Email: {to}\n\
                 Password: {password}\n\n\
                 Please change your password after first login."
            ),
        }
    }

    /// Registration code that links a parent account to a child profile.
    pub fn child_code(to: &str, child_code: &str, child_name: &str) -> Self {
        Self {
            kind: MessageKind::ChildCode,
            to: to.to_string(),
            subject: "Your Child Code for Registration".to_string(),
            body: format!(
                "Use the following code to link your account with {child_name}'s profile:\n\n\
                 {child_code}\n\n\
                 Enter this code during parent registration or from your dashboard."
            ),
        }
    }

    pub fn weekly_report(to: &str, child_name: &str, summary: &str) -> Self {
        Self {
            kind: MessageKind::WeeklyReport,
            to: to.to_string(),
            subject: format!("Weekly Progress Report for {child_name}"),
            body: format!(
                "Dear Parent,\n\n\
                 The weekly progress report for {child_name} is now available.\n\n\
                 {summary}"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// Hands messages to a delivery mechanism. Returns `true` once the message is
/// accepted for delivery.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &OutgoingMessage) -> Result<bool, MailerError>;
}

/// Mailer used when no transport is configured. Messages are logged without
/// their body and reported as not sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &OutgoingMessage) -> Result<bool, MailerError> {
        info!(
            stage = "mailer",
            kind = message.kind.as_str(),
            to = %message.to,
            subject = %message.subject,
            "no mail transport configured; message not sent"
        );
        Ok(false)
    }
}

/// Sends `message` and folds failures into `false` so callers can report
/// delivery without failing the request.
pub fn deliver(mailer: &dyn Mailer, message: &OutgoingMessage) -> bool {
    let kind = message.kind.as_str();
    match mailer.send(message) {
        Ok(true) => {
            telemetry::record_mail(kind, "sent");
            true
        }
        Ok(false) => {
            telemetry::record_mail(kind, "skipped");
            false
        }
        Err(err) => {
            telemetry::record_mail(kind, "failed");
            tracing::warn!(stage = "mailer", kind, to = %message.to, error = %err, "failed to send message");
            false
        }
    }
}
