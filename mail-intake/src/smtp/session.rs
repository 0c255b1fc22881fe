use crate::config::Config;
use crate::error::{IntakeError, Result};
use crate::mime;
use crate::security::AccessFilter;
use crate::smtp::commands::SmtpCommand;
use crate::storage::{AttachmentRecord, AttachmentStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum number of recipients per message
const MAX_RECIPIENTS: usize = 100;

/// Maximum command line length in SMTP protocol (RFC 5321)
const MAX_LINE_LENGTH: usize = 1000;

/// Bytes read per step while receiving DATA; longer lines are read in pieces
const DATA_CHUNK: u64 = 64 * 1024;

/// Timeout for reading a command line
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes

/// Timeout for reading DATA content
const DATA_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes

/// Syntax errors, unknown verbs and overlong lines tolerated before disconnecting.
/// Out-of-sequence commands are answered with 503 and never count.
const MAX_ERRORS: usize = 10;

/// Everything a session needs from the process, shared read-only.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub hostname: String,
    pub max_message_size: usize,
    pub filter: AccessFilter,
    pub store: AttachmentStore,
}

impl SessionContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hostname: config.server.hostname.clone(),
            max_message_size: config.smtp.max_message_size,
            filter: AccessFilter::new(config.access.whitelisted_ips.iter().cloned()),
            store: AttachmentStore::new(
                config.storage.attachments_dir.clone(),
                config.storage.on_collision,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for HELO/EHLO
    Greeting,
    /// Greeted, waiting for MAIL FROM
    AwaitingSender,
    /// Sender accepted, collecting RCPT TO
    AwaitingRecipients,
    /// Between 354 and the terminating `.`
    AwaitingData,
    Closed,
}

enum LineRead {
    Line,
    TooLong,
    Eof,
}

enum DataOutcome {
    Complete(Vec<u8>),
    TooLarge(usize),
}

/// What happened to a delivered message, for the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub saved: usize,
    pub failed: usize,
    pub parse_error: bool,
}

/// One SMTP conversation with one peer. At most one message is accepted per
/// session; the sender is authorized against the whitelist at MAIL FROM, so
/// nothing from a rejected peer is ever parsed or written.
pub struct SmtpSession {
    id: String,
    peer: SocketAddr,
    state: SessionState,
    from: Option<String>,
    to: Vec<String>,
    delivered: bool,
    error_count: usize,
    ctx: Arc<SessionContext>,
}

impl SmtpSession {
    pub fn new(peer: SocketAddr, ctx: Arc<SessionContext>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            peer,
            state: SessionState::Greeting,
            from: None,
            to: Vec::new(),
            delivered: false,
            error_count: 0,
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the dialogue to completion on `stream`.
    ///
    /// When `shutdown` fires, a session waiting for a command says goodbye
    /// with 421; a session inside DATA finishes the message first.
    pub async fn handle<S>(mut self, stream: S, shutdown: CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf_reader = BufReader::new(stream);

        buf_reader
            .write_all(format!("220 {} ESMTP mail-intake ready\r\n", self.ctx.hostname).as_bytes())
            .await?;

        let result = self.process_commands(&mut buf_reader, &shutdown).await;
        self.state = SessionState::Closed;
        let _ = buf_reader.shutdown().await;
        result
    }

    async fn process_commands<S>(
        &mut self,
        buf_reader: &mut BufReader<S>,
        shutdown: &CancellationToken,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut line = Vec::with_capacity(MAX_LINE_LENGTH);

        loop {
            if self.error_count >= MAX_ERRORS {
                warn!("Too many errors, disconnecting");
                buf_reader
                    .write_all(b"421 Too many errors, closing connection\r\n")
                    .await?;
                return Ok(());
            }

            let read = tokio::select! {
                read = timeout(COMMAND_TIMEOUT, read_line(buf_reader, &mut line, MAX_LINE_LENGTH)) => Some(read),
                _ = shutdown.cancelled() => None,
            };

            let read = match read {
                Some(Ok(read)) => read?,
                Some(Err(_)) => {
                    warn!("Command timeout, disconnecting");
                    buf_reader
                        .write_all(b"421 Timeout, closing connection\r\n")
                        .await?;
                    return Ok(());
                }
                None => {
                    debug!("Server shutting down, closing idle session");
                    buf_reader
                        .write_all(
                            format!("421 {} Service shutting down\r\n", self.ctx.hostname)
                                .as_bytes(),
                        )
                        .await?;
                    return Ok(());
                }
            };

            match read {
                LineRead::Eof => {
                    debug!("Client disconnected");
                    return Ok(());
                }
                LineRead::TooLong => {
                    error!("Command line too long");
                    buf_reader.write_all(b"500 Line too long\r\n").await?;
                    self.error_count += 1;
                    continue;
                }
                LineRead::Line => {}
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end();
            debug!("Received: {}", text);

            let cmd = match SmtpCommand::parse(text) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("Command parse error: {}", e);
                    buf_reader
                        .write_all(format!("501 Syntax error: {}\r\n", e).as_bytes())
                        .await?;
                    self.error_count += 1;
                    continue;
                }
            };

            let response = self.handle_command(cmd);
            buf_reader.write_all(response.as_bytes()).await?;

            match self.state {
                SessionState::Closed => return Ok(()),
                SessionState::AwaitingData => {
                    let response = match self.receive_data(buf_reader).await? {
                        DataOutcome::Complete(data) => {
                            let report = self.deliver(data).await;
                            debug!(?report, "Delivery finished");
                            "250 Message accepted\r\n".to_string()
                        }
                        DataOutcome::TooLarge(size) => {
                            warn!(
                                peer = %self.peer.ip(),
                                sender = self.from.as_deref().unwrap_or(""),
                                recipients = ?self.to,
                                outcome = "rejected",
                                "Rejected email of {} bytes (max {})",
                                size,
                                self.ctx.max_message_size
                            );
                            self.reset_envelope();
                            "552 Message size exceeds fixed maximum message size\r\n".to_string()
                        }
                    };
                    buf_reader.write_all(response.as_bytes()).await?;
                }
                _ => {}
            }
        }
    }

    fn handle_command(&mut self, cmd: SmtpCommand) -> String {
        match (self.state, cmd) {
            (_, SmtpCommand::Helo(domain)) => {
                info!("HELO from {}", domain);
                self.reset_envelope();
                self.state = SessionState::AwaitingSender;
                format!("250 {} Hello {}\r\n", self.ctx.hostname, domain)
            }
            (_, SmtpCommand::Ehlo(domain)) => {
                info!("EHLO from {}", domain);
                self.reset_envelope();
                self.state = SessionState::AwaitingSender;
                format!(
                    "250-{} Hello {}\r\n250-SIZE {}\r\n250-8BITMIME\r\n250 HELP\r\n",
                    self.ctx.hostname, domain, self.ctx.max_message_size
                )
            }
            (SessionState::Greeting, SmtpCommand::MailFrom(_)) => {
                "503 Send HELO/EHLO first\r\n".to_string()
            }
            (SessionState::AwaitingSender, SmtpCommand::MailFrom(_)) if self.delivered => {
                "503 Only one message per session\r\n".to_string()
            }
            (SessionState::AwaitingSender, SmtpCommand::MailFrom(from)) => {
                let ip = self.peer.ip();
                if !self.ctx.filter.is_allowed(ip) {
                    warn!(
                        peer = %ip,
                        sender = %from,
                        recipients = ?self.to,
                        outcome = "rejected",
                        "Rejected email from non-whitelisted IP: {}",
                        ip
                    );
                    self.state = SessionState::Closed;
                    return "550 IP address not allowed\r\n".to_string();
                }

                info!("MAIL FROM: {}", from);
                self.from = Some(from);
                self.to.clear();
                self.state = SessionState::AwaitingRecipients;
                "250 OK\r\n".to_string()
            }
            (SessionState::AwaitingRecipients, SmtpCommand::RcptTo(to)) => {
                if self.to.len() >= MAX_RECIPIENTS {
                    warn!("Too many recipients: {}", self.to.len());
                    return format!("452 Too many recipients (max {})\r\n", MAX_RECIPIENTS);
                }

                info!("RCPT TO: {}", to);
                self.to.push(to);
                "250 OK\r\n".to_string()
            }
            (SessionState::AwaitingRecipients, SmtpCommand::Data) if self.to.is_empty() => {
                "503 Need RCPT TO first\r\n".to_string()
            }
            (SessionState::AwaitingRecipients, SmtpCommand::Data) => {
                info!("DATA command received");
                self.state = SessionState::AwaitingData;
                "354 Start mail input; end with <CRLF>.<CRLF>\r\n".to_string()
            }
            (_, SmtpCommand::Rset) => {
                info!("RSET command");
                self.reset_envelope();
                "250 OK\r\n".to_string()
            }
            (_, SmtpCommand::Noop) => "250 OK\r\n".to_string(),
            (_, SmtpCommand::Quit) => {
                info!("QUIT command");
                self.state = SessionState::Closed;
                format!("221 {} closing connection\r\n", self.ctx.hostname)
            }
            (_, SmtpCommand::Unknown(cmd)) => {
                warn!("Unknown command: {}", cmd);
                self.error_count += 1;
                "502 Command not implemented\r\n".to_string()
            }
            (state, cmd) => {
                warn!("Invalid command sequence: {:?} in {:?}", cmd, state);
                "503 Bad sequence of commands\r\n".to_string()
            }
        }
    }

    /// Drop the envelope, keeping the greeting.
    fn reset_envelope(&mut self) {
        self.from = None;
        self.to.clear();
        if self.state != SessionState::Greeting {
            self.state = SessionState::AwaitingSender;
        }
    }

    /// Read the message up to the lone `.` line, undoing dot-stuffing.
    /// Past the size limit the rest is read and discarded so the dialogue
    /// stays in sync.
    async fn receive_data<R>(&mut self, reader: &mut R) -> Result<DataOutcome>
    where
        R: AsyncBufRead + Unpin,
    {
        let max = self.ctx.max_message_size;
        let mut data = Vec::new();
        let mut chunk = Vec::new();
        let mut received = 0usize;
        let mut too_large = false;
        let mut at_line_start = true;

        loop {
            chunk.clear();

            let read = timeout(
                DATA_TIMEOUT,
                (&mut *reader).take(DATA_CHUNK).read_until(b'\n', &mut chunk),
            )
            .await;

            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error during DATA: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("DATA timeout");
                    return Err(IntakeError::SmtpProtocol("Timeout during DATA".to_string()));
                }
            };

            if n == 0 {
                return Err(IntakeError::SmtpProtocol(
                    "Connection closed during DATA".to_string(),
                ));
            }

            let line_complete = chunk.ends_with(b"\n");
            if at_line_start && (chunk == b".\r\n" || chunk == b".\n") {
                break;
            }

            let content = if at_line_start && chunk.starts_with(b".") {
                &chunk[1..]
            } else {
                &chunk[..]
            };

            received += content.len();
            if !too_large {
                if received > max {
                    too_large = true;
                    data = Vec::new();
                } else {
                    data.extend_from_slice(content);
                }
            }

            at_line_start = line_complete;
        }

        if too_large {
            return Ok(DataOutcome::TooLarge(received));
        }

        info!("End of DATA received, total size: {} bytes", data.len());
        Ok(DataOutcome::Complete(data))
    }

    /// Log the accepted message, then extract and store its attachments.
    /// Nothing here can fail the SMTP transaction.
    async fn deliver(&mut self, data: Vec<u8>) -> DeliveryReport {
        let from = self.from.take().unwrap_or_default();
        let recipients = std::mem::take(&mut self.to);
        self.delivered = true;
        self.state = SessionState::AwaitingSender;

        info!(
            peer = %self.peer.ip(),
            sender = %from,
            recipients = ?recipients,
            size = data.len(),
            outcome = "accepted",
            "Accepted email from {} to {:?}, from IP: {}",
            from,
            recipients,
            self.peer.ip()
        );

        let mut report = DeliveryReport {
            saved: 0,
            failed: 0,
            parse_error: false,
        };

        let attachments = match mime::extract(&data) {
            Ok(attachments) => attachments,
            Err(e) => {
                error!(sender = %from, "Failed to parse message structure: {}", e);
                report.parse_error = true;
                return report;
            }
        };
        drop(data);

        if attachments.is_empty() {
            info!("No attachments found");
            return report;
        }

        for attachment in attachments {
            let saved = match AttachmentRecord::new(&self.id, &attachment.filename, attachment.data)
            {
                Ok(record) => self.ctx.store.save(record).await,
                Err(e) => Err(e),
            };

            match saved {
                Ok(_) => report.saved += 1,
                Err(e) => {
                    error!(
                        filename = %attachment.filename,
                        "Failed to save attachment: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Read one line into `buf`, reading at most `limit` bytes. An overlong
/// line is consumed up to its end and reported as [`LineRead::TooLong`].
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader).take(limit as u64).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() < limit {
        return Ok(LineRead::Line);
    }

    let mut discard = Vec::new();
    loop {
        discard.clear();
        let n = (&mut *reader)
            .take(limit as u64)
            .read_until(b'\n', &mut discard)
            .await?;
        if n == 0 || discard.ends_with(b"\n") {
            return Ok(LineRead::TooLong);
        }
    }
}
