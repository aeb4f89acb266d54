// Notification fan-out: each channel is attempted in its own task so one slow or failing
// channel cannot hold up or cancel the others.

use futures_util::future::BoxFuture;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::{EmailConfig, NotificationsConfig};
use crate::models::{AlertEvent, Severity};

/// One independent delivery mechanism for alert events.
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    fn send<'a>(&'a self, alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Outcome of one dispatch once every channel has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub alert_id: u64,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Default)]
pub struct Notifier {
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
    /// In-flight dispatches, kept so shutdown can wait for them.
    in_flight: Mutex<JoinSet<()>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every channel the config names; missing sections simply leave that channel out.
    pub fn from_config(config: &NotificationsConfig) -> anyhow::Result<Self> {
        let notifier = Self::new();
        if let Some(path) = &config.log_path {
            notifier.add_channel(Arc::new(LogFileChannel::new(path)));
        }
        if let Some(url) = &config.webhook_url {
            notifier.add_channel(Arc::new(WebhookChannel::new(
                url,
                Duration::from_secs(config.webhook_timeout_secs),
            )?));
        }
        if let Some(email) = &config.email {
            notifier.add_channel(Arc::new(EmailChannel::new(email)?));
        }
        tracing::info!(channels = ?notifier.channel_names(), "notification channels configured");
        Ok(notifier)
    }

    /// Adds `channel`, replacing any existing channel with the same name.
    pub fn add_channel(&self, channel: Arc<dyn NotificationChannel>) {
        match self.channels.write() {
            Ok(mut channels) => {
                channels.retain(|c| c.name() != channel.name());
                channels.push(channel);
            }
            Err(e) => tracing::warn!(error = %e, "notifier channels lock poisoned"),
        }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .read()
            .map(|c| c.iter().map(|ch| ch.name().to_string()).collect())
            .unwrap_or_default()
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dispatches that have not settled yet.
    pub fn pending(&self) -> usize {
        let mut in_flight = self.in_flight();
        while in_flight.try_join_next().is_some() {}
        in_flight.len()
    }

    /// Starts delivery of `alert` on every channel without waiting for it.
    /// The returned receiver yields the report once all channels have succeeded or failed;
    /// dropping it does not cancel delivery. Returns None when called outside a Tokio runtime.
    pub fn dispatch(&self, alert: AlertEvent) -> Option<oneshot::Receiver<DispatchReport>> {
        let channels: Vec<Arc<dyn NotificationChannel>> = match self.channels.read() {
            Ok(c) => c.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "notifier channels lock poisoned");
                return None;
            }
        };
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                tracing::warn!(alert_id = alert.id, "no runtime; notifications not dispatched");
                return None;
            }
        };
        let alert = Arc::new(alert);
        let (report_tx, report_rx) = oneshot::channel();
        let task = async move {
            let attempts: Vec<(String, JoinHandle<anyhow::Result<()>>)> = channels
                .into_iter()
                .map(|channel| {
                    let name = channel.name().to_string();
                    let alert = alert.clone();
                    let task = tokio::spawn(async move { channel.send(&alert).await });
                    (name, task)
                })
                .collect();

            let mut report = DispatchReport {
                alert_id: alert.id,
                ..Default::default()
            };
            for (name, task) in attempts {
                match task.await {
                    Ok(Ok(())) => {
                        tracing::debug!(alert_id = alert.id, channel = %name, "notification sent");
                        report.delivered.push(name);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            alert_id = alert.id,
                            channel = %name,
                            error = %e,
                            "notification failed"
                        );
                        report.failed.push(name);
                    }
                    Err(e) => {
                        tracing::warn!(
                            alert_id = alert.id,
                            channel = %name,
                            error = %e,
                            "notification task aborted"
                        );
                        report.failed.push(name);
                    }
                }
            }
            tracing::debug!(
                alert_id = report.alert_id,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "alert dispatch settled"
            );
            let _ = report_tx.send(report);
        };
        let mut in_flight = self.in_flight();
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn_on(task, &handle);
        Some(report_rx)
    }

    /// Waits up to `timeout` for in-flight dispatches to settle, then aborts the rest.
    /// Returns how many were still pending when the wait ended.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.in_flight());
        if pending.is_empty() {
            return 0;
        }
        tracing::info!(pending = pending.len(), "waiting for alert notifications");
        let settled = tokio::time::timeout(timeout, async {
            while let Some(result) = pending.join_next().await {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "alert dispatch task failed");
                }
            }
        })
        .await;
        if settled.is_ok() {
            return 0;
        }
        let left = pending.len();
        tracing::warn!(
            left,
            timeout_ms = timeout.as_millis() as u64,
            "alert notifications abandoned at shutdown"
        );
        left
    }
}

fn format_timestamp(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Appends one line per alert to a log file, creating parent directories on demand.
pub struct LogFileChannel {
    path: PathBuf,
}

impl LogFileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn format_line(alert: &AlertEvent) -> String {
        format!(
            "[{}] [{}] {}: {}\n",
            format_timestamp(alert.timestamp),
            alert.severity.as_str().to_uppercase(),
            alert.alert_type,
            alert.message
        )
    }
}

impl NotificationChannel for LogFileChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn send<'a>(&'a self, alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(Self::format_line(alert).as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
    }
}

/// Posts a Slack-compatible JSON message.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub fn payload(alert: &AlertEvent) -> serde_json::Value {
        let color = match alert.severity {
            Severity::Critical => "danger",
            Severity::Warning => "warning",
            Severity::Info => "good",
        };
        serde_json::json!({
            "text": "System alert",
            "attachments": [{
                "color": color,
                "fields": [
                    { "title": "Type", "value": alert.alert_type, "short": true },
                    { "title": "Severity", "value": alert.severity.as_str().to_uppercase(), "short": true },
                    { "title": "Message", "value": alert.message, "short": false },
                    { "title": "Time", "value": format_timestamp(alert.timestamp), "short": true },
                ],
            }],
        })
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send<'a>(&'a self, alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.client
                .post(&self.url)
                .json(&Self::payload(alert))
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}

/// Sends an HTML summary over SMTP (STARTTLS relay with credentials).
pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailChannel {
    pub fn new(config: &EmailConfig) -> anyhow::Result<Self> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();
        Ok(Self {
            mailer,
            from: config.from.parse()?,
            to: config.to.parse()?,
        })
    }

    pub fn subject(alert: &AlertEvent) -> String {
        format!(
            "Alert - {}: {}",
            alert.severity.as_str().to_uppercase(),
            alert.alert_type
        )
    }

    pub fn html_body(alert: &AlertEvent) -> String {
        let mut rows = String::new();
        for (key, value) in &alert.metrics_snapshot {
            rows.push_str(&format!(
                "<tr><td><b>{}</b></td><td>{}</td></tr>",
                escape_html(key),
                escape_html(value)
            ));
        }
        let host = sysinfo::System::host_name().unwrap_or_default();
        format!(
            "<h2>System alert</h2>\
             <table>\
             <tr><td><b>Type</b></td><td>{}</td></tr>\
             <tr><td><b>Severity</b></td><td>{}</td></tr>\
             <tr><td><b>Time</b></td><td>{}</td></tr>\
             <tr><td><b>Message</b></td><td>{}</td></tr>\
             </table>\
             <h3>Metrics</h3><table>{}</table>\
             <p>Server: {}</p>",
            escape_html(&alert.alert_type),
            alert.severity.as_str().to_uppercase(),
            format_timestamp(alert.timestamp),
            escape_html(&alert.message),
            rows,
            escape_html(&host)
        )
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn send<'a>(&'a self, alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let email = Message::builder()
                .from(self.from.clone())
                .to(self.to.clone())
                .subject(Self::subject(alert))
                .header(ContentType::TEXT_HTML)
                .body(Self::html_body(alert))?;
            self.mailer.send(email).await?;
            Ok(())
        })
    }
}
