//! Syslog (RFC 3164 style) layer writing datagrams to the local socket.
//!
//! Each event becomes one datagram of the form
//! `<PRI>tablecleaner: message key=value ...`, where
//! `PRI = facility * 8 + severity`. The daemon facility is used.

use std::fmt::Write as _;
use std::io;

use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

/// Default path of the local syslog socket.
pub const SYSLOG_SOCKET: &str = "/dev/log";

/// `LOG_DAEMON`
const FACILITY_DAEMON: u8 = 3;

/// Destination for formatted syslog lines.
pub trait SyslogSink: Send + Sync + 'static {
    fn send(&self, line: &str) -> io::Result<()>;
}

#[cfg(unix)]
impl SyslogSink for std::os::unix::net::UnixDatagram {
    fn send(&self, line: &str) -> io::Result<()> {
        std::os::unix::net::UnixDatagram::send(self, line.as_bytes()).map(|_| ())
    }
}

/// A tracing layer that forwards every event to a syslog sink.
pub struct SyslogLayer {
    app_name: String,
    sink: Box<dyn SyslogSink>,
}

impl SyslogLayer {
    pub fn new(app_name: impl Into<String>, sink: Box<dyn SyslogSink>) -> Self {
        Self {
            app_name: app_name.into(),
            sink,
        }
    }

    /// Connect to the syslog socket at `path`.
    #[cfg(unix)]
    pub fn connect(app_name: impl Into<String>, path: &str) -> io::Result<Self> {
        let socket = std::os::unix::net::UnixDatagram::unbound()?;
        socket.connect(path)?;
        Ok(Self::new(app_name, Box::new(socket)))
    }

    #[cfg(not(unix))]
    pub fn connect(_app_name: impl Into<String>, path: &str) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("syslog socket {path} is only available on unix"),
        ))
    }
}

impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let line = format_line(
            &self.app_name,
            event.metadata().level(),
            visitor.message.as_deref().unwrap_or_default(),
            &visitor.fields,
        );

        // Nowhere to report a failed log write.
        let _ = self.sink.send(&line);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

fn severity(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG | Level::TRACE => 7,
    }
}

/// Build the datagram payload for one event.
pub fn format_line(
    app_name: &str,
    level: &Level,
    message: &str,
    fields: &[(String, String)],
) -> String {
    let pri = u16::from(FACILITY_DAEMON) * 8 + u16::from(severity(level));
    let mut line = format!("<{pri}>{app_name}: {message}");
    for (key, value) in fields {
        let _ = write!(line, " {key}={value}");
    }
    line
}
