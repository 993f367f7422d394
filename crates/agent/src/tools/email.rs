//! Email reports through a mail relay

use async_trait::async_trait;
use netsage_config::EmailConfig;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::idempotency::{content_digest, IdempotencyKey, IdempotencyLedger};
use super::{str_arg, AdapterError, ArgType, ToolAdapter, ToolCategory, ToolDescriptor};

/// One message handed to the relay
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    /// RFC 5322 text with CRLF line endings and dot-stuffing applied
    pub fn to_wire(&self) -> String {
        let mut out = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n",
            self.from, self.to, self.subject
        );
        for line in self.body.lines() {
            if line.starts_with('.') {
                out.push('.');
            }
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

/// Something that accepts or rejects a message
#[async_trait]
pub trait MailRelay: Send + Sync {
    /// Returns the relay's acceptance line
    async fn submit(&self, mail: &OutgoingMail) -> Result<String, AdapterError>;
}

/// Minimal SMTP submission client
pub struct SmtpRelay {
    host: String,
    port: u16,
}

impl SmtpRelay {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), AdapterError> {
        writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| AdapterError::Backend(format!("mail relay write failed: {}", e)))
    }
}

/// Read one (possibly multi-line) reply and check its class
async fn expect_reply<R>(reader: &mut R, expected: u16) -> Result<String, AdapterError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut text = Vec::new();
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| AdapterError::Backend(format!("mail relay read failed: {}", e)))?;
        if read == 0 {
            return Err(AdapterError::Backend("mail relay closed the connection".to_string()));
        }
        let line = line.trim_end().to_string();
        if line.len() < 3 {
            return Err(AdapterError::Backend(format!("malformed relay reply: {}", line)));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| AdapterError::Backend(format!("malformed relay reply: {}", line)))?;
        let last = line.as_bytes().get(3) != Some(&b'-');
        text.push(line);
        if last {
            let joined = text.join(" ");
            if code / 100 != expected / 100 {
                return Err(AdapterError::Backend(format!("mail relay rejected: {}", joined)));
            }
            return Ok(joined);
        }
    }
}

#[async_trait]
impl MailRelay for SmtpRelay {
    async fn submit(&self, mail: &OutgoingMail) -> Result<String, AdapterError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| AdapterError::Backend(format!("mail relay {}:{} unreachable: {}", self.host, self.port, e)))?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        expect_reply(&mut reader, 220).await?;
        Self::send_line(&mut writer, "EHLO netsage").await?;
        expect_reply(&mut reader, 250).await?;
        Self::send_line(&mut writer, &format!("MAIL FROM:<{}>", mail.from)).await?;
        expect_reply(&mut reader, 250).await?;
        Self::send_line(&mut writer, &format!("RCPT TO:<{}>", mail.to)).await?;
        expect_reply(&mut reader, 250).await?;
        Self::send_line(&mut writer, "DATA").await?;
        expect_reply(&mut reader, 354).await?;
        writer
            .write_all(mail.to_wire().as_bytes())
            .await
            .map_err(|e| AdapterError::Backend(format!("mail relay write failed: {}", e)))?;
        Self::send_line(&mut writer, ".").await?;
        let accepted = expect_reply(&mut reader, 250).await?;
        // The message is already accepted; a failed QUIT changes nothing
        let _ = Self::send_line(&mut writer, "QUIT").await;

        Ok(accepted)
    }
}

fn header_safe(name: &str, value: &str) -> Result<(), AdapterError> {
    if value.contains('\r') || value.contains('\n') {
        return Err(AdapterError::Argument(format!(
            "argument '{}' must not contain line breaks",
            name
        )));
    }
    Ok(())
}

/// `email_send`: one message per idempotency key
pub struct EmailSendTool {
    relay: Arc<dyn MailRelay>,
    from: String,
    default_recipient: Option<String>,
    ledger: IdempotencyLedger<String>,
}

impl EmailSendTool {
    pub fn new(relay: Arc<dyn MailRelay>, from: impl Into<String>, default_recipient: Option<String>) -> Self {
        Self {
            relay,
            from: from.into(),
            default_recipient: default_recipient.filter(|r| !r.trim().is_empty()),
            ledger: IdempotencyLedger::new(),
        }
    }

    pub fn from_config(config: &EmailConfig) -> Self {
        Self::new(
            Arc::new(SmtpRelay::new(&config.smtp_host, config.smtp_port)),
            &config.from,
            config.default_recipient.clone(),
        )
    }

    /// Explicit key; else (device_id, fingerprint); else the message content
    pub fn key_for(args: &Map<String, Value>, recipient: &str) -> IdempotencyKey {
        if let Some(key) = str_arg(args, "idempotency_key") {
            return IdempotencyKey::from_raw(key);
        }
        match (str_arg(args, "device_id"), str_arg(args, "fingerprint")) {
            (Some(device_id), Some(fingerprint)) => IdempotencyKey::derive(device_id, fingerprint),
            _ => {
                let content = format!(
                    "{}\n{}\n{}",
                    recipient,
                    str_arg(args, "subject").unwrap_or_default(),
                    str_arg(args, "message").unwrap_or_default()
                );
                IdempotencyKey::from_raw(content_digest(&content))
            }
        }
    }
}

#[async_trait]
impl ToolAdapter for EmailSendTool {
    fn descriptor(&self) -> ToolDescriptor {
        let descriptor = ToolDescriptor::new(
            "email_send",
            "Send an email report. Pass device_id and fingerprint when reporting a discrepancy.",
            ToolCategory::Action,
        );
        let descriptor = match &self.default_recipient {
            Some(default) => descriptor.optional(
                "recipient",
                ArgType::String,
                &format!("Recipient address (default {})", default),
            ),
            None => descriptor.required("recipient", ArgType::String, "Recipient address"),
        };
        descriptor
            .required("subject", ArgType::String, "Subject line")
            .required("message", ArgType::String, "Plain-text body")
            .optional("device_id", ArgType::String, "Device the report is about")
            .optional("fingerprint", ArgType::String, "Discrepancy fingerprint")
            .optional("idempotency_key", ArgType::String, "Explicit idempotency key")
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, AdapterError> {
        let recipient = str_arg(&args, "recipient")
            .or(self.default_recipient.as_deref())
            .ok_or_else(|| AdapterError::Argument("missing required argument 'recipient'".to_string()))?
            .to_string();
        if !recipient.contains('@') {
            return Err(AdapterError::Argument(format!(
                "argument 'recipient' is not an email address: {}",
                recipient
            )));
        }
        let subject = str_arg(&args, "subject").unwrap_or_default().to_string();
        header_safe("recipient", &recipient)?;
        header_safe("subject", &subject)?;

        let key = Self::key_for(&args, &recipient);
        let mail = OutgoingMail {
            from: self.from.clone(),
            to: recipient.clone(),
            subject,
            body: str_arg(&args, "message").unwrap_or_default().to_string(),
        };

        let relay = Arc::clone(&self.relay);
        let (reply, replayed) = self
            .ledger
            .get_or_try_insert(&key, move || async move { relay.submit(&mail).await })
            .await?;

        if replayed {
            debug!("email to {} replayed for key {}", recipient, key);
        } else {
            info!("email accepted for {}", recipient);
        }

        Ok(json!({
            "accepted": true,
            "recipient": recipient,
            "relay_reply": reply,
            "idempotency_key": key.as_str(),
            "replayed": replayed,
        }))
    }
}
