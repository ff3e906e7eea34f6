//! # Dispatch Loop
//!
//! Receives one frame at a time from a [`Channel`], decodes it, hands the
//! observation to an [`Observer`] and, for kinds whose sender waits on a
//! verdict, answers before the next receive.
//!
//! Per-message failures (decode errors, failed replies, transient receive
//! errors) are logged and the loop moves on. Only a closed or lost channel
//! ends it.

use log::Level;
use metrics::counter;
use std::{thread, time::Duration};

use crate::agent_log;
use crate::comms::channel::{Channel, ReceiveError};
use crate::comms::events::{DecodeError, Event, Protocol, decode_payload};
use crate::comms::header::{MessageHeader, split_frame};
use crate::comms::observe::{Observation, Observer};
use crate::comms::reply::{ReplyPayload, ReplyPolicy, build_reply};

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub observed: u64,
    pub skipped: u64,
    pub replies_sent: u64,
    pub replies_failed: u64,
    pub receive_errors: u64,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchExit {
    /// Shutdown requested through the channel's closer.
    Closed,
    /// The channel became unusable.
    Lost(ReceiveError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub stats: DispatchStats,
    pub exit: DispatchExit,
}

/// Pause after a failed receive before trying again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A failure streak is re-reported at warn level every this many attempts.
const WARN_EVERY: u64 = 100;

pub struct Dispatcher<C: Channel, O: Observer> {
    channel: C,
    protocol: Protocol,
    policy: Box<dyn ReplyPolicy>,
    observer: O,
    retry_delay: Duration,
}

impl<C: Channel, O: Observer> Dispatcher<C, O> {
    pub fn new(channel: C, protocol: Protocol, policy: Box<dyn ReplyPolicy>, observer: O) -> Self {
        Self { channel, protocol, policy, observer, retry_delay: DEFAULT_RETRY_DELAY }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Split the dispatcher back into its channel and observer.
    pub fn into_parts(self) -> (C, O) {
        (self.channel, self.observer)
    }

    /// Run until the channel is closed or lost.
    pub fn run(&mut self) -> DispatchReport {
        agent_log!(Level::Info, "dispatch", "Receiving ({:?} protocol)", self.protocol);
        let mut stats = DispatchStats::default();
        // consecutive failed receives
        let mut failures = 0u64;

        let exit = loop {
            let decoded = match self.channel.receive() {
                Ok(frame) => {
                    stats.received += 1;
                    counter!("port_messages_received_total").increment(1);
                    if failures > 0 {
                        agent_log!(Level::Info, "dispatch", "Receive recovered after {} failed attempts", failures);
                        failures = 0;
                    }
                    decode_frame(self.protocol, frame)
                }
                Err(err) => {
                    counter!("port_receive_errors_total", "class" => err.metric_label()).increment(1);
                    if err == ReceiveError::Closed {
                        agent_log!(Level::Info, "dispatch", "Shutdown requested");
                        break DispatchExit::Closed;
                    }
                    if err.is_fatal() {
                        stats.receive_errors += 1;
                        agent_log!(Level::Error, "dispatch", "{}", err);
                        break DispatchExit::Lost(err);
                    }
                    if let ReceiveError::Transient { .. } = err {
                        stats.receive_errors += 1;
                        failures += 1;
                        if failures == 1 || failures % WARN_EVERY == 0 {
                            agent_log!(
                                Level::Warn,
                                "dispatch",
                                "{} ({} in a row, retrying every {:?})",
                                err,
                                failures,
                                self.retry_delay
                            );
                        } else {
                            agent_log!(Level::Debug, "dispatch", "{}", err);
                        }
                        thread::sleep(self.retry_delay);
                    }
                    continue;
                }
            };

            let (header, event) = match decoded {
                Ok(message) => message,
                Err(skip) => {
                    stats.skipped += 1;
                    counter!("port_messages_skipped_total", "reason" => skip.reason()).increment(1);
                    agent_log!(Level::Warn, "dispatch", "Skipping {}-byte frame: {}", skip.len, skip.error);
                    continue;
                }
            };

            let reply = build_reply(&event, self.policy.as_ref());
            let observation = Observation::new(header, event);
            self.observer.observe(&observation);
            stats.observed += 1;

            if let Some(reply) = reply {
                if self.send_reply(&header, &reply) {
                    stats.replies_sent += 1;
                } else {
                    stats.replies_failed += 1;
                }
            }
        };

        agent_log!(
            Level::Info,
            "dispatch",
            "Stopped after {} messages ({} skipped, {} replies)",
            stats.received,
            stats.skipped,
            stats.replies_sent
        );
        DispatchReport { stats, exit }
    }

    fn send_reply(&mut self, header: &MessageHeader, reply: &ReplyPayload) -> bool {
        if (header.reply_capacity as usize) < ReplyPayload::SIZE {
            counter!("port_replies_total", "result" => "no_room").increment(1);
            agent_log!(
                Level::Warn,
                "dispatch",
                "Message {} reserved {} reply bytes, need {}",
                header.message_id,
                header.reply_capacity,
                ReplyPayload::SIZE
            );
            return false;
        }
        match self.channel.reply(header.message_id, reply) {
            Ok(()) => {
                counter!("port_replies_total", "result" => "sent").increment(1);
                agent_log!(Level::Debug, "dispatch", "Replied to {} (block={})", header.message_id, reply.block);
                true
            }
            Err(err) => {
                counter!("port_replies_total", "result" => "failed").increment(1);
                agent_log!(Level::Error, "dispatch", "{}", err);
                false
            }
        }
    }
}

/// A frame that could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skipped {
    /// Delivered frame length, header included.
    pub len: usize,
    pub error: DecodeError,
}

impl Skipped {
    fn reason(&self) -> &'static str {
        match self.error {
            DecodeError::TooShort { .. } => "too_short",
            DecodeError::UnknownKind(_) => "unknown_kind",
        }
    }
}

/// Header and event of one raw frame.
pub fn decode_frame(protocol: Protocol, frame: &[u8]) -> Result<(MessageHeader, Event), Skipped> {
    let skipped = |error| Skipped { len: frame.len(), error };
    let (header, payload) = split_frame(frame).map_err(skipped)?;
    let event = decode_payload(protocol, payload).map_err(skipped)?;
    Ok((header, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::channel::{Closer, SendError};
    use crate::comms::events::{AccessNotification, HandleEvent, HandleOperation, TextEvent};
    use crate::comms::memory::MemoryPort;
    use crate::comms::reply::StaticPolicy;
    use crate::comms::status::{E_ACCESSDENIED, E_HANDLE, E_INSUFFICIENT_BUFFER};
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Replays a fixed list of receive results, then reports the port lost.
    struct Scripted {
        script: VecDeque<Result<Vec<u8>, ReceiveError>>,
        current: Vec<u8>,
        reply_status: Option<u32>,
        replies: Vec<u64>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Vec<u8>, ReceiveError>>) -> Self {
            Self { script: script.into(), current: Vec::new(), reply_status: None, replies: Vec::new() }
        }
    }

    impl Channel for Scripted {
        fn receive(&mut self) -> Result<&[u8], ReceiveError> {
            match self.script.pop_front() {
                Some(Ok(frame)) => {
                    self.current = frame;
                    Ok(&self.current)
                }
                Some(Err(e)) => Err(e),
                None => Err(ReceiveError::Fatal { status: E_HANDLE }),
            }
        }

        fn reply(&mut self, message_id: u64, _: &ReplyPayload) -> Result<(), SendError> {
            match self.reply_status {
                Some(status) => Err(SendError::Rejected { message_id, status }),
                None => {
                    self.replies.push(message_id);
                    Ok(())
                }
            }
        }

        fn closer(&self) -> Closer {
            Closer::new(|| {})
        }
    }

    fn access_frame(message_id: u64, reply_capacity: u32) -> Vec<u8> {
        let mut frame = MessageHeader { reply_capacity, message_id }.encode().to_vec();
        frame.extend(Event::Access(AccessNotification { path: "C:\\a".into() }).encode());
        frame
    }

    fn dispatcher<C: Channel>(channel: C, protocol: Protocol) -> Dispatcher<C, Vec<Observation>> {
        Dispatcher::new(channel, protocol, Box::new(StaticPolicy::default()), Vec::new())
    }

    #[test]
    fn transient_and_timeout_errors_keep_the_loop_alive() {
        let handle = Event::Handle(HandleEvent { operation: HandleOperation::Create, pid: 1, caller_pid: 2 });
        let mut frame = MessageHeader { reply_capacity: 0, message_id: 5 }.encode().to_vec();
        frame.extend(handle.encode());

        let mut d = dispatcher(
            Scripted::new(vec![
                Err(ReceiveError::Timeout),
                Err(ReceiveError::Transient { status: E_INSUFFICIENT_BUFFER }),
                Ok(frame),
            ]),
            Protocol::Tagged,
        );
        let report = d.run();

        assert_eq!(report.exit, DispatchExit::Lost(ReceiveError::Fatal { status: E_HANDLE }));
        assert_eq!(report.stats.received, 1);
        assert_eq!(report.stats.observed, 1);
        assert_eq!(report.stats.receive_errors, 2);
        assert_eq!(d.observer()[0].line, "[HANDLE] CREATE pid=1 caller=2 msgId=5");
    }

    #[test]
    fn consecutive_transient_errors_are_paced() {
        let invalid = 0x8007_0057;
        let script = (0..5).map(|_| Err(ReceiveError::Transient { status: invalid })).collect();
        let mut d = dispatcher(Scripted::new(script), Protocol::Tagged)
            .with_retry_delay(Duration::from_millis(20));

        let started = Instant::now();
        let report = d.run();
        let elapsed = started.elapsed();

        assert_eq!(report.stats.receive_errors, 6);
        assert_eq!(report.exit, DispatchExit::Lost(ReceiveError::Fatal { status: E_HANDLE }));
        assert!(elapsed >= Duration::from_millis(100), "five retries took only {elapsed:?}");
    }

    #[test]
    fn timeouts_are_not_paced() {
        let script = (0..50).map(|_| Err(ReceiveError::Timeout)).collect();
        let mut d = dispatcher(Scripted::new(script), Protocol::Tagged)
            .with_retry_delay(Duration::from_secs(10));

        let started = Instant::now();
        let report = d.run();
        assert_eq!(report.stats.receive_errors, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn failed_reply_is_counted_and_loop_continues() {
        let mut channel = Scripted::new(vec![Ok(access_frame(1, 4)), Ok(access_frame(2, 4))]);
        channel.reply_status = Some(E_ACCESSDENIED);

        let report = dispatcher(channel, Protocol::LegacyAccess).run();
        assert_eq!(report.stats.observed, 2);
        assert_eq!(report.stats.replies_failed, 2);
        assert_eq!(report.stats.replies_sent, 0);
    }

    #[test]
    fn reply_needs_reserved_room() {
        let channel = Scripted::new(vec![Ok(access_frame(1, 0)), Ok(access_frame(2, 4))]);
        let mut d = dispatcher(channel, Protocol::LegacyAccess);
        let report = d.run();

        assert_eq!(report.stats.replies_sent, 1);
        assert_eq!(report.stats.replies_failed, 1);
        let (channel, _) = d.into_parts();
        assert_eq!(channel.replies, vec![2]);
    }

    #[test]
    fn close_ends_the_loop_cleanly() {
        let (port, driver) = MemoryPort::pair(8192);
        driver.send_event(3, &Event::Text(TextEvent { message: "HelloWorld from the Kernel Land!".into() }));
        driver.close();

        let mut d = dispatcher(port, Protocol::LegacyText);
        let report = d.run();
        assert_eq!(report.exit, DispatchExit::Closed);
        assert_eq!(d.observer()[0].line, "[KERNEL] [MAIN] HelloWorld from the Kernel Land!");
    }

    #[test]
    fn decode_frame_reports_length_and_cause() {
        let short = vec![0u8; 14];
        assert_eq!(
            decode_frame(Protocol::Tagged, &short),
            Err(Skipped { len: 14, error: DecodeError::TooShort { needed: 4, actual: 2 } })
        );
        assert_eq!(
            decode_frame(Protocol::Tagged, &[0u8; 5]),
            Err(Skipped { len: 5, error: DecodeError::TooShort { needed: 12, actual: 5 } })
        );
    }
}
