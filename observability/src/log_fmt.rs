use std::fmt;

use nu_ansi_term::Color;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[month]-[day]|[hour]:[minute]:[second].[subsecond digits:3]");

/// Single line log format: `[LEVEL] [timestamp] target: message key=value ...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactFormat;

impl<S, N> FormatEvent<S, N> for CompactFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let ansi = writer.has_ansi_escapes();

        write!(writer, "{} ", FmtLevel { level: meta.level(), ansi })?;

        match OffsetDateTime::now_utc().format(TIME_FORMAT) {
            Ok(now) => write!(writer, "[{now}] ")?,
            Err(_) => write!(writer, "[<unknown-timestamp>] ")?,
        }

        if ansi {
            write!(writer, "{}: ", Color::DarkGray.paint(meta.target()))?;
        } else {
            write!(writer, "{}: ", meta.target())?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}:", span.name())?;
            }
            writer.write_char(' ')?;
        }

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl fmt::Display for FmtLevel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, color) = match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => ("INFO", Color::Green),
            Level::WARN => ("WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.ansi {
            write!(f, "[{}]", color.paint(name))
        } else {
            write!(f, "[{name}]")
        }
    }
}
