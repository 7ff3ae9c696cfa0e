//! Per-connection session.
//!
//! One session owns one connected socket. All mutable connection state (the
//! socket halves, the send queue, custody of the receive buffer) lives in a
//! single actor task, so per-connection work is serialized without locks.
//! External calls (`start`, `stop`, `receive`, `send`) post commands onto the
//! actor's channel.
//!
//! The read pump is application-paced: one read is armed by `start` or
//! `receive`, and the application drains every complete packet before
//! re-arming. The write pump drains the send queue concurrently, so a peer
//! that never talks cannot stall outbound traffic.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::alloc::SendChunk;
use crate::buffer::ReceiveBuffer;
use crate::error::{classify_stream_error, ErrorClass, NetError};
use crate::event::{SessionEvent, SessionEventTx};
use crate::options::NetOptions;
use crate::packet::{self, PacketHeader, PacketView, HEADER_SIZE};
use crate::pool::IoHandle;

/// Session identifier, issued from 1 and never reused within a process.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

enum SessionCmd {
    Start,
    Receive,
    Send(SendChunk),
    Stop,
}

/// Shared handle to one connection.
pub struct Session {
    id: SessionId,
    running: AtomicBool,
    cmd_tx: Sender<SessionCmd>,
    recv_buf: Mutex<ReceiveBuffer>,
    max_packet_size: usize,
}

impl Session {
    /// Wrap a connected socket and spawn its actor. The session is dormant
    /// until [`start`](Self::start).
    pub fn spawn(
        socket: TcpStream,
        event_tx: SessionEventTx,
        io: &IoHandle,
        options: &NetOptions,
    ) -> Arc<Session> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        if options.nodelay {
            if let Err(error) = socket.set_nodelay(true) {
                warn!(session = id, %error, "failed to enable TCP_NODELAY");
            }
        }
        let (reader, writer) = socket.into_split();
        let (cmd_tx, cmd_rx) = flume::unbounded();
        let session = Arc::new(Session {
            id,
            running: AtomicBool::new(false),
            cmd_tx,
            recv_buf: Mutex::new(ReceiveBuffer::new(
                options.recv_buffer_size,
                options.recv_capacity_factor,
            )),
            max_packet_size: options.max_packet_size,
        });
        debug!(session = id, "session created");
        let actor = SessionActor {
            session: session.clone(),
            reader,
            writer,
            cmd_rx,
            event_tx,
            recv_slot: None,
            read_armed: false,
            send_queue: VecDeque::new(),
            front_written: 0,
        };
        io.spawn(actor.run());
        session
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin the read loop. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session = self.id, "session started");
        let _ = self.cmd_tx.send(SessionCmd::Start);
    }

    /// Post an orderly close. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(session = self.id, "session stopping");
        let _ = self.cmd_tx.send(SessionCmd::Stop);
    }

    /// Re-arm a single read. Call after draining every complete packet.
    pub fn receive(&self) {
        if !self.is_running() {
            return;
        }
        let _ = self.cmd_tx.send(SessionCmd::Receive);
    }

    /// Enqueue a closed chunk for transmission, ordered per session.
    pub fn send(&self, chunk: SendChunk) {
        if !self.is_running() {
            return;
        }
        let _ = self.cmd_tx.send(SessionCmd::Send(chunk));
    }

    /// Zero-copy peek at the first complete packet in the receive buffer.
    ///
    /// `None` while the buffer does not yet hold a full header and a full
    /// `size`-byte packet, or once the front header fails the protocol check
    /// (which stops the session). The returned guard pins the buffer; drop it
    /// before calling [`pop_front_packet`](Self::pop_front_packet).
    #[must_use]
    pub fn front_packet(&self) -> Option<FrontPacket<'_>> {
        let guard = self.recv_buf.lock();
        if !self.front_frame_is_valid(&guard) {
            drop(guard);
            self.stop();
            return None;
        }
        packet::front_packet(guard.unread())?;
        Some(FrontPacket { guard })
    }

    /// Advance the receive buffer past the front packet.
    ///
    /// Pure buffer bookkeeping: it advances regardless of the running flag,
    /// so a drain loop keeps making progress even when the session stops
    /// underneath it. The packet that becomes front afterwards is validated;
    /// a bad boundary stops the session.
    pub fn pop_front_packet(&self) {
        let mut guard = self.recv_buf.lock();
        let Some(view) = packet::front_packet(guard.unread()) else {
            debug_assert!(false, "pop_front_packet called without a complete packet");
            warn!(session = self.id, "pop_front_packet without a complete packet");
            return;
        };
        let total = view.header.size as usize;
        guard.on_read(total);
        if !self.front_frame_is_valid(&guard) {
            drop(guard);
            self.stop();
        }
    }

    /// Protocol check applied whenever a packet boundary reaches the front of
    /// the buffer: a complete header must declare a size within
    /// `[HEADER_SIZE, max_packet_size]`. An incomplete header passes (more
    /// bytes may still arrive).
    fn front_frame_is_valid(&self, buf: &ReceiveBuffer) -> bool {
        let Some(header) = PacketHeader::decode(buf.unread()) else {
            return true;
        };
        let total = header.size as usize;
        if total < HEADER_SIZE || total > self.max_packet_size {
            let error = NetError::Frame {
                size: total,
                max: self.max_packet_size,
            };
            error!(session = self.id, %error, "malformed packet header");
            return false;
        }
        true
    }
}

/// Guard-backed view of the front packet; valid until dropped.
pub struct FrontPacket<'a> {
    guard: MutexGuard<'a, ReceiveBuffer>,
}

impl FrontPacket<'_> {
    #[must_use]
    pub fn view(&self) -> PacketView<'_> {
        packet::front_packet(self.guard.unread()).expect("front packet vanished under guard")
    }

    #[must_use]
    pub fn header(&self) -> PacketHeader {
        self.view().header
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.view().payload
    }
}

async fn read_some(
    reader: &mut OwnedReadHalf,
    slot: &mut Option<ReceiveBuffer>,
) -> io::Result<usize> {
    let buf = slot.as_mut().expect("read pump polled without buffer custody");
    reader.read(buf.unwritten_mut()).await
}

async fn write_front(
    writer: &mut OwnedWriteHalf,
    queue: &VecDeque<SendChunk>,
    offset: usize,
) -> io::Result<usize> {
    let front = queue.front().expect("write pump polled with an empty queue");
    writer.write(&front.as_slice()[offset..]).await
}

struct SessionActor {
    session: Arc<Session>,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    cmd_rx: Receiver<SessionCmd>,
    event_tx: SessionEventTx,
    /// Receive buffer while it is lent to an in-flight read.
    recv_slot: Option<ReceiveBuffer>,
    read_armed: bool,
    send_queue: VecDeque<SendChunk>,
    /// Bytes of the front chunk already on the wire.
    front_written: usize,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv_async() => match cmd {
                    Ok(SessionCmd::Start | SessionCmd::Receive) => {
                        if !self.arm_read() {
                            break;
                        }
                    }
                    Ok(SessionCmd::Send(chunk)) => {
                        if !chunk.is_empty() {
                            self.send_queue.push_back(chunk);
                        }
                    }
                    Ok(SessionCmd::Stop) | Err(_) => break,
                },
                result = read_some(&mut self.reader, &mut self.recv_slot), if self.read_armed => {
                    if !self.on_read(result) {
                        break;
                    }
                }
                result = write_front(&mut self.writer, &self.send_queue, self.front_written),
                    if !self.send_queue.is_empty() =>
                {
                    if !self.on_written(result) {
                        break;
                    }
                }
            }
        }
        self.close().await;
    }

    /// Take buffer custody and enable the read pump. False aborts the actor.
    fn arm_read(&mut self) -> bool {
        if self.read_armed {
            return true;
        }
        let mut guard = self.session.recv_buf.lock();
        if guard.unwritten_len() == 0 {
            // full buffer without a drainable packet: nothing will ever fit
            let error = NetError::ReceiveBufferExhausted {
                capacity: guard.capacity(),
            };
            error!(session = self.session.id, %error, "receive failed");
            drop(guard);
            self.session.running.store(false, Ordering::SeqCst);
            return false;
        }
        self.recv_slot = Some(std::mem::replace(&mut *guard, ReceiveBuffer::detached()));
        drop(guard);
        self.read_armed = true;
        true
    }

    /// Commit a read completion. False aborts the actor.
    fn on_read(&mut self, result: io::Result<usize>) -> bool {
        self.read_armed = false;
        let mut buf = self
            .recv_slot
            .take()
            .expect("read completed without buffer custody");
        match result {
            Ok(0) => {
                debug!(session = self.session.id, "connection closed by peer");
                *self.session.recv_buf.lock() = buf;
                self.session.running.store(false, Ordering::SeqCst);
                false
            }
            Ok(n) => {
                buf.on_written(n);
                let frame_ok = self.check_front_frame(&mut buf);
                *self.session.recv_buf.lock() = buf;
                if !frame_ok {
                    self.session.running.store(false, Ordering::SeqCst);
                    return false;
                }
                let _ = self.event_tx.send(SessionEvent::Receive(self.session.id));
                true
            }
            Err(error) => {
                *self.session.recv_buf.lock() = buf;
                self.fail(&error)
            }
        }
    }

    /// Validate the front framing header once it is complete; grows the
    /// buffer for valid packets larger than the current capacity.
    fn check_front_frame(&self, buf: &mut ReceiveBuffer) -> bool {
        if !self.session.front_frame_is_valid(buf) {
            return false;
        }
        if let Some(header) = PacketHeader::decode(buf.unread()) {
            let total = header.size as usize;
            if total > buf.capacity() {
                buf.reserve_for(total);
            }
        }
        true
    }

    /// Commit a write completion. False aborts the actor.
    fn on_written(&mut self, result: io::Result<usize>) -> bool {
        match result {
            Ok(0) => {
                debug!(session = self.session.id, "socket rejected pending write");
                self.session.running.store(false, Ordering::SeqCst);
                false
            }
            Ok(n) => {
                self.front_written += n;
                let finished = self
                    .send_queue
                    .front()
                    .is_some_and(|front| self.front_written >= front.len());
                if finished {
                    self.send_queue.pop_front();
                    self.front_written = 0;
                }
                true
            }
            Err(error) => self.fail(&error),
        }
    }

    /// Log a completion error per its class. Always stops the session.
    fn fail(&self, error: &io::Error) -> bool {
        match classify_stream_error(error.kind()) {
            ErrorClass::Transient => {
                debug!(session = self.session.id, %error, "connection error");
            }
            ErrorClass::Teardown => {
                debug!(session = self.session.id, %error, "ignoring teardown error");
            }
            ErrorClass::Fatal => {
                error!(session = self.session.id, %error, "unexpected session error");
            }
        }
        self.session.running.store(false, Ordering::SeqCst);
        false
    }

    /// Single exit path: bidirectional shutdown, then exactly one Close.
    async fn close(mut self) {
        self.session.running.store(false, Ordering::SeqCst);
        debug!(session = self.session.id, "session closing");
        if let Some(buf) = self.recv_slot.take() {
            *self.session.recv_buf.lock() = buf;
        }
        if let Err(error) = self.writer.shutdown().await {
            match classify_stream_error(error.kind()) {
                ErrorClass::Fatal => {
                    warn!(session = self.session.id, %error, "error shutting down socket");
                }
                _ => {
                    debug!(session = self.session.id, %error, "ignoring shutdown error");
                }
            }
        }
        let _ = self.event_tx.send(SessionEvent::Close(self.session.id));
        debug!(session = self.session.id, "session closed");
    }
}
