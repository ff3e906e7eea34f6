/// Logs a line attributed to `component` instead of the calling module.
///
/// The component becomes the record's target, so the `fern` format installed
/// by the binary prints it in the target slot:
/// ```text
/// [2025-04-25T16:32:10+02:00][WARN ][dispatch][pid=4568][tid=ThreadId(1)] Skipping 14-byte frame: ...
/// ```
/// Usage:
/// ```ignore
/// agent_log!(Level::Info, "dispatch", "Receiving ({:?} protocol)", protocol);
/// agent_log!(Level::Error, "config", "Config load failed: {}", err);
/// ```
#[macro_export]
macro_rules! agent_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(target: $component, $level, $fmt $(, $($arg)+)?)
    };
}

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::Mutex;

    /// A tiny in-memory logger that captures up to DEBUG.
    struct MemoryLogger {
        buffer: Mutex<String>,
    }

    impl MemoryLogger {
        const fn new() -> Self {
            MemoryLogger { buffer: Mutex::new(String::new()) }
        }

        fn take(&self) -> String {
            std::mem::take(&mut *self.buffer.lock().unwrap())
        }
    }

    static LOGGER: MemoryLogger = MemoryLogger::new();

    impl Log for MemoryLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Debug
        }
        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) && record.target() == "file:function" {
                let mut buf = self.buffer.lock().unwrap();
                buf.push_str(&format!("[{}][{}] {}\n", record.level(), record.target(), record.args()));
            }
        }
        fn flush(&self) {}
    }

    #[test]
    fn agent_log_uses_component_as_target() {
        // other tests may log concurrently; only our target is captured
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Debug);
        LOGGER.take();

        agent_log!(Level::Debug, "file:function", "Answer={}!", 42);
        agent_log!(Level::Warn, "file:function", "plain");

        let output = LOGGER.take();
        assert!(output.contains("[DEBUG][file:function] Answer=42!"), "missing payload: {}", output);
        assert!(output.contains("[WARN][file:function] plain"), "missing plain line: {}", output);
    }
}
