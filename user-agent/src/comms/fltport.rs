//! Filter Manager communication port (`fltlib`).
//!
//! Connects to the port the minifilter created with
//! `FltCreateCommunicationPort`, receives with `FilterGetMessage` and answers
//! with `FilterReplyMessage`.
//!
//! Receives are overlapped so they can optionally give up after a timeout and
//! be cancelled from another thread (`CancelIoEx`). The OS header
//! (`FILTER_MESSAGE_HEADER`) is 8-byte aligned and therefore padded to 16
//! bytes; it is rewritten in place into the packed 12-byte header before the
//! frame is handed out, so callers only ever see the canonical layout.

use crate::comms::channel::ConnectError;
use crate::config::model::PortConfig;

#[cfg(windows)]
pub use imp::FilterPort;

#[cfg(not(windows))]
pub use unsupported::FilterPort;

/// Open the configured port.
pub fn connect(cfg: &PortConfig) -> Result<FilterPort, ConnectError> {
    FilterPort::connect(cfg)
}

#[cfg(windows)]
mod imp {
    use std::{
        ffi::OsStr,
        io, mem,
        os::windows::ffi::OsStrExt,
        ptr, slice,
        sync::{
            Arc, Mutex, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };
    use windows_sys::Win32::{
        Foundation::{CloseHandle, FALSE, GetLastError, HANDLE, TRUE, WAIT_TIMEOUT},
        Storage::InstallableFileSystems::{
            FILTER_MESSAGE_HEADER, FILTER_REPLY_HEADER, FilterConnectCommunicationPort,
            FilterGetMessage, FilterReplyMessage,
        },
        System::IO::{CancelIoEx, GetOverlappedResult, GetOverlappedResultEx, OVERLAPPED},
        System::Threading::{CreateEventW, INFINITE},
    };

    use log::Level;
    use shared::constants::HEADER_SIZE;

    use crate::agent_log;
    use crate::comms::channel::{Channel, Closer, ConnectError, ReceiveError, SendError};
    use crate::comms::reply::ReplyPayload;
    use crate::comms::status::{E_IO_PENDING, S_OK, hresult_from_win32};
    use crate::config::model::PortConfig;

    const OS_HEADER_SIZE: usize = mem::size_of::<FILTER_MESSAGE_HEADER>();
    /// Where the packed header starts once `ReplyLength` is moved next to `MessageId`.
    const FRAME_START: usize = OS_HEADER_SIZE - HEADER_SIZE;

    /// State shared with `Closer`s. `handle` is cleared before the port
    /// closes it, so a late `close()` never touches a recycled handle.
    struct Shared {
        handle: Mutex<Option<isize>>,
        closed: AtomicBool,
    }

    #[repr(C)]
    struct ReplyFrame {
        header: FILTER_REPLY_HEADER,
        payload: [u8; ReplyPayload::SIZE],
    }

    pub struct FilterPort {
        name: String,
        handle: HANDLE,
        event: HANDLE,
        overlapped: Box<OVERLAPPED>,
        /// `u64` storage keeps `FILTER_MESSAGE_HEADER` aligned.
        buffer: Box<[u64]>,
        timeout: Option<Duration>,
        /// An overlapped receive owns `buffer` until it completes.
        pending: bool,
        shared: Arc<Shared>,
    }

    // The handles are only used from the owning thread; `Closer` goes
    // through `Shared` and only ever calls `CancelIoEx`.
    unsafe impl Send for FilterPort {}

    impl FilterPort {
        pub fn connect(cfg: &PortConfig) -> Result<Self, ConnectError> {
            let wide: Vec<u16> = OsStr::new(&cfg.name).encode_wide().chain(Some(0)).collect();

            let mut handle: HANDLE = ptr::null_mut();
            let hr = unsafe {
                FilterConnectCommunicationPort(wide.as_ptr(), 0, ptr::null(), 0, ptr::null(), &mut handle)
            };
            if hr as u32 != S_OK {
                return Err(ConnectError::Port { port: cfg.name.clone(), status: hr as u32 });
            }

            // Manual-reset, non-signalled; reused by every receive.
            let event = unsafe { CreateEventW(ptr::null(), TRUE, FALSE, ptr::null()) };
            if event.is_null() {
                let err = io::Error::last_os_error();
                unsafe { CloseHandle(handle) };
                return Err(err.into());
            }

            let words = (FRAME_START + cfg.buffer_capacity).div_ceil(8);
            agent_log!(Level::Info, "port", "Connected to {} (buffer {} bytes)", cfg.name, cfg.buffer_capacity);
            Ok(Self {
                name: cfg.name.clone(),
                handle,
                event,
                overlapped: Box::new(unsafe { mem::zeroed() }),
                buffer: vec![0u64; words].into_boxed_slice(),
                timeout: cfg.receive_timeout,
                pending: false,
                shared: Arc::new(Shared {
                    handle: Mutex::new(Some(handle as isize)),
                    closed: AtomicBool::new(false),
                }),
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        fn is_closed(&self) -> bool {
            self.shared.closed.load(Ordering::Acquire)
        }

        fn receive_error(&self, status: u32) -> ReceiveError {
            if self.is_closed() { ReceiveError::Closed } else { ReceiveError::from_status(status) }
        }

        fn start_receive(&mut self) -> Result<(), ReceiveError> {
            *self.overlapped = unsafe { mem::zeroed() };
            self.overlapped.hEvent = self.event;
            let hr = unsafe {
                FilterGetMessage(
                    self.handle,
                    self.buffer.as_mut_ptr().cast::<FILTER_MESSAGE_HEADER>(),
                    (self.buffer.len() * 8) as u32,
                    &mut *self.overlapped,
                )
            };
            match hr as u32 {
                S_OK | E_IO_PENDING => {
                    self.pending = true;
                    // A close that raced with the issue above may have cancelled nothing.
                    if self.is_closed() {
                        unsafe { CancelIoEx(self.handle, &*self.overlapped) };
                    }
                    Ok(())
                }
                status => Err(self.receive_error(status)),
            }
        }

        /// Rewrite the padded OS header into the packed layout and return the frame.
        fn canonical_frame(&mut self, transferred: usize) -> &[u8] {
            let bytes = unsafe {
                slice::from_raw_parts_mut(self.buffer.as_mut_ptr().cast::<u8>(), self.buffer.len() * 8)
            };
            let end = transferred.min(bytes.len()).max(FRAME_START);
            bytes.copy_within(0..4, FRAME_START);
            &bytes[FRAME_START..end]
        }
    }

    impl Channel for FilterPort {
        fn receive(&mut self) -> Result<&[u8], ReceiveError> {
            if self.is_closed() {
                return Err(ReceiveError::Closed);
            }
            if !self.pending {
                self.start_receive()?;
            }

            let wait = self
                .timeout
                .map_or(INFINITE, |t| t.as_millis().min(u128::from(INFINITE - 1)) as u32);
            let mut transferred = 0u32;
            let ok = unsafe {
                GetOverlappedResultEx(self.handle, &*self.overlapped, &mut transferred, wait, FALSE)
            };
            if ok == 0 {
                let code = unsafe { GetLastError() };
                if code == WAIT_TIMEOUT {
                    // Still pending; the next call waits on the same request.
                    return Err(ReceiveError::Timeout);
                }
                self.pending = false;
                return Err(self.receive_error(hresult_from_win32(code)));
            }

            self.pending = false;
            Ok(self.canonical_frame(transferred as usize))
        }

        fn reply(&mut self, message_id: u64, reply: &ReplyPayload) -> Result<(), SendError> {
            if self.is_closed() {
                return Err(SendError::Closed { message_id });
            }
            let frame = ReplyFrame {
                header: FILTER_REPLY_HEADER { Status: 0, MessageId: message_id },
                payload: reply.to_bytes(),
            };
            // Header plus payload, without the struct's trailing padding.
            let size = mem::size_of::<FILTER_REPLY_HEADER>() + ReplyPayload::SIZE;
            let hr = unsafe {
                FilterReplyMessage(
                    self.handle,
                    (&frame as *const ReplyFrame).cast::<FILTER_REPLY_HEADER>(),
                    size as u32,
                )
            };
            if hr as u32 != S_OK {
                return Err(SendError::Rejected { message_id, status: hr as u32 });
            }
            Ok(())
        }

        fn closer(&self) -> Closer {
            let shared = self.shared.clone();
            Closer::new(move || {
                shared.closed.store(true, Ordering::Release);
                let guard = shared.handle.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(raw) = *guard {
                    unsafe { CancelIoEx(raw as HANDLE, ptr::null()) };
                }
            })
        }
    }

    impl Drop for FilterPort {
        fn drop(&mut self) {
            let mut guard = self.shared.handle.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = None;
            unsafe {
                if self.pending {
                    // The kernel may still write into `buffer`; wait it out.
                    CancelIoEx(self.handle, &*self.overlapped);
                    let mut n = 0u32;
                    GetOverlappedResult(self.handle, &*self.overlapped, &mut n, TRUE);
                }
                CloseHandle(self.event);
                CloseHandle(self.handle);
            }
            agent_log!(Level::Info, "port", "Released {}", self.name);
        }
    }
}

#[cfg(not(windows))]
mod unsupported {
    use crate::comms::channel::{Channel, Closer, ConnectError, ReceiveError, SendError};
    use crate::comms::reply::ReplyPayload;
    use crate::config::model::PortConfig;

    /// Uninhabited: there is no filter manager to connect to.
    pub enum FilterPort {}

    impl FilterPort {
        pub fn connect(_cfg: &PortConfig) -> Result<Self, ConnectError> {
            Err(ConnectError::Unsupported)
        }

        pub fn name(&self) -> &str {
            match *self {}
        }
    }

    impl Channel for FilterPort {
        fn receive(&mut self) -> Result<&[u8], ReceiveError> {
            match *self {}
        }

        fn reply(&mut self, _: u64, _: &ReplyPayload) -> Result<(), SendError> {
            match *self {}
        }

        fn closer(&self) -> Closer {
            match *self {}
        }
    }
}
