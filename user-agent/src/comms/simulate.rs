//! Canned driver traffic for running the agent without the minifilter.
//!
//! Each [`Phase`] feeds its frames through a [`MemoryPort`] and a real
//! [`Dispatcher`], so decode errors, classification and replies behave
//! exactly as they would against the kernel port.

use log::Level;
use shared::constants::DEFAULT_BUFFER_CAPACITY;

use crate::agent_log;
use crate::comms::dispatch::{DispatchReport, Dispatcher};
use crate::comms::events::{
    AccessNotification, Event, FileEvent, FileOperation, HandleEvent, HandleOperation, ProcessEvent,
    Protocol, TextEvent,
};
use crate::comms::header::MessageHeader;
use crate::comms::memory::{MemoryPort, RecordedReply, encode_frame};
use crate::comms::observe::Observer;
use crate::comms::reply::{ReplyPayload, ReplyPolicy};

/// Lines the test driver prints while loading and running.
pub const KERNEL_LINES: &[&str] = &[
    "HelloWorld from the Kernel Land!",
    "Driver Object:\t\t0xFFFFFA8012345678",
    "Registry Path:\t\t0xFFFFFA8012345679",
    r"Process created: C:\Windows\System32\notepad.exe (PID: 1234)",
    r"C:\Windows\System32\notepad.exe",
    "Process created with unknown image name (PID: 5678)",
    "Process terminated (PID: 1234)",
    "CreateCallback called with operation 1 on process at address 0xFFFFFA8012345680 with PID 1234",
    "CreateCallback called with operation 2 on process at address 0xFFFFFA8012345681 with PID 5678",
    "ObRegisterCallbacks failed with status 0xC0000001",
    "Registered callback successfully",
    r"Matched: C:\test\file.txt",
    "FltRegisterFilter returned 0x00000000",
    "FltStartFiltering returned 0x00000000",
    "[filterport] MinifltPortNotifyRoutine User-mode application(1234) connect to this filter",
    "[filterport] MinifltPortMessageRoutine User-mode application(1234) send data to this filter",
    "[filterport] MinifltPortDisconnectRoutine User-mode application(1234) disconnect with this filter",
    "createRegistration() returned 0x00000000",
    "createRegistrationMiniFilter() returned 0x00000000",
    "registerProcessNotifyRoutine() returned 0x00000000",
    "createRegistrationComFilter() returned 0x00000000",
];

/// Frames spoken in one protocol.
#[derive(Debug, Clone)]
pub struct Phase {
    pub protocol: Protocol,
    pub frames: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub protocol: Protocol,
    pub report: DispatchReport,
    pub replies: Vec<RecordedReply>,
}

fn frame(message_id: u64, event: Event) -> Vec<u8> {
    let reply_capacity = if event.kind().requires_reply() { ReplyPayload::SIZE as u32 } else { 0 };
    encode_frame(MessageHeader { reply_capacity, message_id }, &event)
}

/// Process, file and handle events plus two frames that must be skipped.
pub fn tagged_phase() -> Phase {
    let mut frames = vec![
        frame(
            42,
            Event::Process(ProcessEvent {
                is_create: true,
                pid: 1234,
                image: "notepad.exe".into(),
                command_line: None,
            }),
        ),
        frame(
            42,
            Event::File(FileEvent {
                operation: FileOperation::READ,
                pid: 1234,
                file_name: r"C:\test\file.txt".into(),
            }),
        ),
        frame(
            43,
            Event::Handle(HandleEvent { operation: HandleOperation::Duplicate, pid: 1234, caller_pid: 5678 }),
        ),
        frame(
            44,
            Event::Process(ProcessEvent { is_create: false, pid: 1234, image: String::new(), command_line: None }),
        ),
    ];

    // Header plus two bytes: too short for any discriminator.
    let mut truncated = MessageHeader { reply_capacity: 0, message_id: 45 }.encode().to_vec();
    truncated.extend_from_slice(&[0, 0]);
    frames.push(truncated);

    let mut unknown = MessageHeader { reply_capacity: 0, message_id: 46 }.encode().to_vec();
    unknown.extend_from_slice(&99u32.to_ne_bytes());
    unknown.resize(unknown.len() + 64, 0);
    frames.push(unknown);

    Phase { protocol: Protocol::Tagged, frames }
}

pub fn legacy_text_phase() -> Phase {
    let frames = KERNEL_LINES
        .iter()
        .zip(100u64..)
        .map(|(line, id)| frame(id, Event::Text(TextEvent { message: (*line).into() })))
        .collect();
    Phase { protocol: Protocol::LegacyText, frames }
}

pub fn legacy_access_phase() -> Phase {
    let frames = [r"C:\test\file.txt", r"C:\Users\Public\Documents\report.docx"]
        .iter()
        .zip(200u64..)
        .map(|(path, id)| frame(id, Event::Access(AccessNotification { path: (*path).into() })))
        .collect();
    Phase { protocol: Protocol::LegacyAccess, frames }
}

pub fn all_phases() -> Vec<Phase> {
    vec![tagged_phase(), legacy_text_phase(), legacy_access_phase()]
}

/// Feed `phase` through a fresh in-memory port until every frame is handled.
pub fn run_phase(phase: &Phase, policy: Box<dyn ReplyPolicy>, observer: &mut dyn Observer) -> PhaseOutcome {
    let (port, driver) = MemoryPort::pair(DEFAULT_BUFFER_CAPACITY);
    for frame in &phase.frames {
        driver.send_raw(frame.clone());
    }
    driver.close();

    let mut dispatcher = Dispatcher::new(port, phase.protocol, policy, observer);
    let report = dispatcher.run();
    let replies = driver.replies();
    agent_log!(
        Level::Info,
        "simulate",
        "{:?}: {} frames, {} observed, {} skipped, {} replies",
        phase.protocol,
        phase.frames.len(),
        report.stats.observed,
        report.stats.skipped,
        replies.len()
    );
    PhaseOutcome { protocol: phase.protocol, report, replies }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::dispatch::DispatchExit;
    use crate::comms::observe::Observation;
    use crate::comms::reply::StaticPolicy;

    fn run(phase: Phase, block: bool) -> (PhaseOutcome, Vec<Observation>) {
        let mut seen = Vec::new();
        let outcome = run_phase(&phase, Box::new(StaticPolicy { block }), &mut seen);
        (outcome, seen)
    }

    #[test]
    fn tagged_phase_observes_good_frames_and_skips_bad_ones() {
        let (outcome, seen) = run(tagged_phase(), false);
        assert_eq!(outcome.report.exit, DispatchExit::Closed);
        assert_eq!(outcome.report.stats.received, 6);
        assert_eq!(outcome.report.stats.skipped, 2);

        let lines: Vec<_> = seen.iter().map(|o| o.line.as_str()).collect();
        assert_eq!(
            lines,
            [
                "[PROC] CREATE pid=1234 image=notepad.exe msgId=42",
                r"[FILE] READ pid=1234 file=C:\test\file.txt msgId=42",
                "[HANDLE] DUPLICATE pid=1234 caller=5678 msgId=43",
                "[PROC] EXIT pid=1234 image=Unknown msgId=44",
            ]
        );
        assert!(outcome.replies.is_empty());
    }

    #[test]
    fn legacy_text_phase_classifies_every_line() {
        let (outcome, seen) = run(legacy_text_phase(), false);
        assert_eq!(outcome.report.stats.observed, KERNEL_LINES.len() as u64);
        assert_eq!(seen[0].line, "[KERNEL] [MAIN] HelloWorld from the Kernel Land!");
        assert_eq!(seen[3].line, r"[KERNEL] [PROCESS] Process created: C:\Windows\System32\notepad.exe (PID: 1234)");
        assert_eq!(seen[4].line, r"[KERNEL] [NOTIFY] Process path: C:\Windows\System32\notepad.exe");
    }

    #[test]
    fn legacy_access_phase_answers_each_request() {
        let (outcome, _) = run(legacy_access_phase(), true);
        let ids: Vec<_> = outcome.replies.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, [200, 201]);
        assert!(outcome.replies.iter().all(|r| r.bytes == ReplyPayload::deny().to_bytes()));
    }
}
