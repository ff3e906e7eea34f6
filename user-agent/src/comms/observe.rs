//! Turns decoded messages into observation lines and hands them to an
//! [`Observer`].

use serde::Serialize;
use std::io::{self, Write};

use crate::agent_log;
use crate::comms::classify::{Category, classify};
use crate::comms::events::{Event, EventKind};
use crate::comms::header::MessageHeader;
use crate::config::model::OutputFormat;

/// One decoded message, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub kind: EventKind,
    pub event: Event,
    /// Only set for free-form kernel text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub line: String,
}

impl Observation {
    pub fn new(header: MessageHeader, event: Event) -> Self {
        let category = match &event {
            Event::Text(t) => Some(classify(&t.message)),
            _ => None,
        };
        let line = render(&header, &event, category);
        Self { header, kind: event.kind(), event, category, line }
    }
}

/// Human-readable line for one message.
pub fn render(header: &MessageHeader, event: &Event, category: Option<Category>) -> String {
    let id = header.message_id;
    match event {
        Event::Process(p) => {
            let action = if p.is_create { "CREATE" } else { "EXIT" };
            let image = if p.image.is_empty() { "Unknown" } else { p.image.as_str() };
            match &p.command_line {
                Some(cmd) => format!("[PROC] {action} pid={} image={image} cmdline={cmd} msgId={id}", p.pid),
                None => format!("[PROC] {action} pid={} image={image} msgId={id}", p.pid),
            }
        }
        Event::File(f) => format!("[FILE] {} pid={} file={} msgId={id}", f.operation, f.pid, f.file_name),
        Event::Handle(h) => {
            format!("[HANDLE] {} pid={} caller={} msgId={id}", h.operation, h.pid, h.caller_pid)
        }
        Event::Text(t) => {
            let msg = t.message.trim();
            match category.unwrap_or_else(|| classify(msg)) {
                Category::NotifyPath => format!("[KERNEL] [NOTIFY] Process path: {msg}"),
                other => match other.label() {
                    Some(label) => format!("[KERNEL] [{label}] {msg}"),
                    None => format!("[KERNEL] {msg}"),
                },
            }
        }
        Event::Access(a) => format!("[KERNEL] [MINIFILTER] File access: {} msgId={id}", a.path),
    }
}

/// Receives every successfully decoded message, in arrival order.
pub trait Observer {
    fn observe(&mut self, observation: &Observation);
}

impl<O: Observer + ?Sized> Observer for &mut O {
    fn observe(&mut self, observation: &Observation) {
        (**self).observe(observation)
    }
}

/// Keeps everything; used by tests.
impl Observer for Vec<Observation> {
    fn observe(&mut self, observation: &Observation) {
        self.push(observation.clone());
    }
}

/// Writes one line per observation, as text or JSON.
pub struct ConsoleObserver<W: Write> {
    out: W,
    format: OutputFormat,
}

impl ConsoleObserver<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> ConsoleObserver<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, observation: &Observation) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "{}", observation.line)?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, observation)?;
                self.out.write_all(b"\n")?;
            }
        }
        self.out.flush()
    }
}

impl<W: Write> Observer for ConsoleObserver<W> {
    fn observe(&mut self, observation: &Observation) {
        if let Err(e) = self.write(observation) {
            agent_log!(log::Level::Warn, "observe", "Dropping observation {}: {}", observation.header.message_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::{
        AccessNotification, FileEvent, FileOperation, HandleEvent, HandleOperation, ProcessEvent,
        TextEvent,
    };

    fn header(message_id: u64) -> MessageHeader {
        MessageHeader { reply_capacity: 0, message_id }
    }

    fn line(event: Event) -> String {
        Observation::new(header(42), event).line
    }

    #[test]
    fn process_lines() {
        let create = Event::Process(ProcessEvent {
            is_create: true,
            pid: 1234,
            image: "notepad.exe".into(),
            command_line: None,
        });
        assert_eq!(line(create), "[PROC] CREATE pid=1234 image=notepad.exe msgId=42");

        let exit = Event::Process(ProcessEvent {
            is_create: false,
            pid: 1234,
            image: String::new(),
            command_line: None,
        });
        assert_eq!(line(exit), "[PROC] EXIT pid=1234 image=Unknown msgId=42");

        let with_cmd = Event::Process(ProcessEvent {
            is_create: true,
            pid: 7,
            image: "cmd.exe".into(),
            command_line: Some("cmd /c dir".into()),
        });
        assert_eq!(line(with_cmd), "[PROC] CREATE pid=7 image=cmd.exe cmdline=cmd /c dir msgId=42");
    }

    #[test]
    fn file_and_handle_lines() {
        let file = Event::File(FileEvent {
            operation: FileOperation::READ,
            pid: 1234,
            file_name: r"C:\test\file.txt".into(),
        });
        assert_eq!(line(file), r"[FILE] READ pid=1234 file=C:\test\file.txt msgId=42");

        let handle = Event::Handle(HandleEvent {
            operation: HandleOperation::Duplicate,
            pid: 4,
            caller_pid: 900,
        });
        assert_eq!(line(handle), "[HANDLE] DUPLICATE pid=4 caller=900 msgId=42");
    }

    #[test]
    fn kernel_text_lines_carry_their_category() {
        let text = |m: &str| Event::Text(TextEvent { message: m.into() });

        let obs = Observation::new(header(1), text("  Process terminated (PID: 1234)\n"));
        assert_eq!(obs.category, Some(Category::Process));
        assert_eq!(obs.line, "[KERNEL] [PROCESS] Process terminated (PID: 1234)");

        assert_eq!(
            line(text(r"C:\Windows\System32\notepad.exe")),
            r"[KERNEL] [NOTIFY] Process path: C:\Windows\System32\notepad.exe"
        );
        assert_eq!(line(text("Registered callback successfully")), "[KERNEL] Registered callback successfully");
    }

    #[test]
    fn access_line() {
        let ev = Event::Access(AccessNotification { path: r"C:\secret.txt".into() });
        assert_eq!(line(ev), r"[KERNEL] [MINIFILTER] File access: C:\secret.txt msgId=42");
    }

    #[test]
    fn console_observer_writes_text_and_json() {
        let obs = Observation::new(
            MessageHeader { reply_capacity: 4, message_id: 9 },
            Event::Access(AccessNotification { path: "x".into() }),
        );

        let mut text = ConsoleObserver::new(Vec::new(), OutputFormat::Text);
        text.observe(&obs);
        assert_eq!(String::from_utf8(text.into_inner()).unwrap(), format!("{}\n", obs.line));

        let mut json = ConsoleObserver::new(Vec::new(), OutputFormat::Json);
        json.observe(&obs);
        let out = json.into_inner();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["message_id"], 9);
        assert_eq!(value["reply_capacity"], 4);
        assert_eq!(value["kind"], "Access");
        assert_eq!(value["event"]["payload"]["path"], "x");
        assert!(value.get("category").is_none());
        assert_eq!(value["line"], obs.line);
    }
}
