//! In-process port: a crossbeam channel standing in for the minifilter.
//!
//! [`MemoryPort`] is the agent side and implements [`Channel`];
//! [`MemoryDriver`] is the kernel side. It pushes raw frames, collects
//! replies and can close the port. Frames longer than the port's capacity
//! are cut to capacity, as a fixed-size receive buffer would.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::comms::channel::{Channel, Closer, ReceiveError, SendError};
use crate::comms::events::Event;
use crate::comms::header::MessageHeader;
use crate::comms::reply::ReplyPayload;

enum Feed {
    Frame(Vec<u8>),
    Close,
}

/// A reply as the driver receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReply {
    pub message_id: u64,
    pub bytes: Vec<u8>,
}

pub struct MemoryPort {
    rx: Receiver<Feed>,
    tx: Sender<Feed>,
    replies: Sender<RecordedReply>,
    buffer: Vec<u8>,
    capacity: usize,
    timeout: Option<Duration>,
    closed: bool,
}

pub struct MemoryDriver {
    tx: Sender<Feed>,
    replies: Receiver<RecordedReply>,
}

impl MemoryPort {
    /// Create a connected port/driver pair with a receive buffer of `capacity` bytes.
    pub fn pair(capacity: usize) -> (MemoryPort, MemoryDriver) {
        let (tx, rx) = channel::unbounded();
        let (reply_tx, reply_rx) = channel::unbounded();
        let port = MemoryPort {
            rx,
            tx: tx.clone(),
            replies: reply_tx,
            buffer: Vec::with_capacity(capacity),
            capacity,
            timeout: None,
            closed: false,
        };
        (port, MemoryDriver { tx, replies: reply_rx })
    }

    /// Give up on each receive after `timeout` instead of blocking forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Channel for MemoryPort {
    fn receive(&mut self) -> Result<&[u8], ReceiveError> {
        if self.closed {
            return Err(ReceiveError::Closed);
        }
        let feed = match self.timeout {
            Some(timeout) => self.rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => ReceiveError::Timeout,
                RecvTimeoutError::Disconnected => ReceiveError::Closed,
            })?,
            // `self.tx` keeps the channel alive, so this only ends on `Feed::Close`.
            None => self.rx.recv().map_err(|_| ReceiveError::Closed)?,
        };
        match feed {
            Feed::Frame(frame) => {
                let len = frame.len().min(self.capacity);
                self.buffer.clear();
                self.buffer.extend_from_slice(&frame[..len]);
                Ok(&self.buffer)
            }
            Feed::Close => {
                self.closed = true;
                Err(ReceiveError::Closed)
            }
        }
    }

    fn reply(&mut self, message_id: u64, reply: &ReplyPayload) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed { message_id });
        }
        self.replies
            .send(RecordedReply { message_id, bytes: reply.to_bytes().to_vec() })
            .map_err(|_| SendError::Closed { message_id })
    }

    fn closer(&self) -> Closer {
        let tx = self.tx.clone();
        Closer::new(move || {
            let _ = tx.send(Feed::Close);
        })
    }
}

impl MemoryDriver {
    /// Queue a raw frame (header included) exactly as given.
    pub fn send_raw(&self, frame: Vec<u8>) {
        let _ = self.tx.send(Feed::Frame(frame));
    }

    /// Queue `event` behind a header carrying `message_id`.
    pub fn send_event(&self, message_id: u64, event: &Event) {
        let reply_capacity = if event.kind().requires_reply() { ReplyPayload::SIZE as u32 } else { 0 };
        self.send_raw(encode_frame(MessageHeader { reply_capacity, message_id }, event));
    }

    /// Ask the agent side to stop; frames already queued are still delivered.
    pub fn close(&self) {
        let _ = self.tx.send(Feed::Close);
    }

    /// Replies received so far, in arrival order.
    pub fn replies(&self) -> Vec<RecordedReply> {
        self.replies.try_iter().collect()
    }
}

/// Header followed by the event's wire payload.
pub fn encode_frame(header: MessageHeader, event: &Event) -> Vec<u8> {
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(&event.encode());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::{AccessNotification, HandleEvent, HandleOperation};

    fn handle_event() -> Event {
        Event::Handle(HandleEvent { operation: HandleOperation::Create, pid: 10, caller_pid: 20 })
    }

    #[test]
    fn frames_arrive_in_order_then_close() {
        let (mut port, driver) = MemoryPort::pair(4096);
        driver.send_event(1, &handle_event());
        driver.send_raw(vec![1, 2, 3]);
        driver.close();

        let first = port.receive().unwrap().to_vec();
        assert_eq!(MessageHeader::decode(&first).unwrap().message_id, 1);
        assert_eq!(port.receive().unwrap(), &[1, 2, 3]);
        assert_eq!(port.receive(), Err(ReceiveError::Closed));
        assert_eq!(port.receive(), Err(ReceiveError::Closed));
    }

    #[test]
    fn frames_are_cut_to_capacity() {
        let (mut port, driver) = MemoryPort::pair(16);
        driver.send_raw(vec![7; 64]);
        assert_eq!(port.receive().unwrap().len(), 16);
    }

    #[test]
    fn timeout_is_reported_when_idle() {
        let (port, _driver) = MemoryPort::pair(64);
        let mut port = port.with_timeout(Duration::from_millis(10));
        assert_eq!(port.receive(), Err(ReceiveError::Timeout));
    }

    #[test]
    fn closer_unblocks_a_waiting_receive() {
        let (mut port, _driver) = MemoryPort::pair(64);
        let closer = port.closer();
        let waiter = std::thread::spawn(move || port.receive().map(|b| b.to_vec()));
        std::thread::sleep(Duration::from_millis(20));
        closer.close();
        assert_eq!(waiter.join().unwrap(), Err(ReceiveError::Closed));
    }

    #[test]
    fn replies_reach_the_driver() {
        let (mut port, driver) = MemoryPort::pair(8192);
        driver.send_event(77, &Event::Access(AccessNotification { path: "C:\\x".into() }));
        let frame = port.receive().unwrap();
        assert_eq!(MessageHeader::decode(frame).unwrap().reply_capacity, 4);

        port.reply(77, &ReplyPayload::deny()).unwrap();
        assert_eq!(
            driver.replies(),
            vec![RecordedReply { message_id: 77, bytes: 1u32.to_ne_bytes().to_vec() }]
        );
    }
}
