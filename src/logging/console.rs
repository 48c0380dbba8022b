//! Colored console sink.

use chrono::{DateTime, Local};
use colored::Colorize;
use is_terminal::IsTerminal;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer};

use super::{debug_enabled, is_silenced, split_message, EventVisitor, Level, MAX_MESSAGE_LEN};

const DEFAULT_WIDTH: usize = 120;

/// Writes log events to a terminal-like stream.
pub struct ConsoleLayer<W = fn() -> io::Stdout> {
    make_writer: W,
    color: bool,
    width: Option<usize>,
}

impl ConsoleLayer {
    /// Console layer on stdout. Colors are used only on a terminal with `NO_COLOR` unset.
    pub fn stdout(color: bool) -> Self {
        let color = color && io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self {
            make_writer: io::stdout,
            color,
            width: None,
        }
    }
}

impl<W> ConsoleLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    /// Console layer on an arbitrary writer, without colors and with a fixed width.
    pub fn with_writer(make_writer: W, width: usize) -> Self {
        Self {
            make_writer,
            color: false,
            width: Some(width),
        }
    }

    fn width(&self) -> usize {
        self.width.unwrap_or_else(|| {
            console::Term::stdout()
                .size_checked()
                .map(|(_, cols)| cols as usize)
                .filter(|cols| *cols > 0)
                .unwrap_or(DEFAULT_WIDTH)
        })
    }
}

impl<S, W> Layer<S> for ConsoleLayer<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if is_silenced() {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let (level, message) = visitor.finish(event.metadata().level());

        if level == Level::Debug && !debug_enabled() {
            return;
        }

        let lines = format_lines(level, &message, Local::now(), self.width());
        let mut writer = self.make_writer.make_writer();
        for line in lines {
            let line = if self.color { colorize(level, &line) } else { line };
            let _ = writeln!(writer, "{}", line);
        }
        let _ = writer.flush();
    }
}

/// Render one event as console lines, before coloring.
pub fn format_lines(level: Level, message: &str, now: DateTime<Local>, width: usize) -> Vec<String> {
    match level {
        Level::Banner => {
            let frame = "=".repeat(width);
            let mut lines = vec![frame.clone()];
            lines.extend(message.lines().map(|line| center(line.trim(), width)));
            lines.push(frame);
            lines
        }
        Level::Raw | Level::Time => split_message(message, MAX_MESSAGE_LEN),
        _ => {
            let stamp = now.format("%Y-%m-%d %H:%M:%S,%3f");
            let mut lines = Vec::new();
            for text in message.lines() {
                let text = if level == Level::Step {
                    format!(">>> {}", text)
                } else {
                    text.to_string()
                };
                for chunk in split_message(&text, MAX_MESSAGE_LEN) {
                    lines.push(format!("{}: {:<7} {}", stamp, level.label(), chunk));
                }
            }
            if lines.is_empty() {
                lines.push(format!("{}: {:<7} ", stamp, level.label()));
            }
            lines
        }
    }
}

fn center(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let left = (width - len) / 2;
    format!("{}{}", " ".repeat(left), text)
}

fn colorize(level: Level, line: &str) -> String {
    match level {
        Level::Debug => line.white().to_string(),
        Level::Info | Level::Raw => line.white().bold().to_string(),
        Level::Warning => line.yellow().bold().to_string(),
        Level::Error | Level::Exception => line.red().bold().to_string(),
        Level::Pass => line.green().bold().to_string(),
        Level::Time | Level::Step => line.cyan().to_string(),
        Level::Banner => line.magenta().bold().to_string(),
    }
}

/// In-memory writer, handy for capturing console output.
#[derive(Clone, Default)]
pub struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl BufferWriter {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
