//! One logical stream carried by a [`Multiplexer`](crate::Multiplexer).
//!
//! A channel has two independent halves. The remote write side feeds the
//! inbound queue read through [`ChannelReader`]; the local write side emits
//! frames through [`ChannelWriter`]. The channel is destroyed, and leaves the
//! multiplexer's registry, once both halves have ended.

use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use plexmux_frame::{Frame, Origin, DEFAULT_MAX_PAYLOAD};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::ChannelError;
use crate::multiplexer::Shared;
use crate::registry::StreamKey;

const DEFAULT_RESET_REASON: &str = "channel reset";

/// How one direction of a channel finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum End {
    Clean,
    Error(ChannelError),
}

impl End {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn error(&self) -> Option<&ChannelError> {
        match self {
            Self::Clean => None,
            Self::Error(err) => Some(err),
        }
    }
}

impl From<Option<ChannelError>> for End {
    fn from(err: Option<ChannelError>) -> Self {
        err.map_or(Self::Clean, Self::Error)
    }
}

/// Item on a channel's inbound queue.
pub(crate) enum Inbound {
    Data(Bytes),
    End(End),
}

#[derive(Debug, Default)]
struct State {
    open: bool,
    ended_local: Option<End>,
    ended_remote: Option<End>,
    reset: Option<ChannelError>,
    released: bool,
}

impl State {
    fn destroyed(&self) -> bool {
        self.ended_local.is_some() && self.ended_remote.is_some()
    }
}

/// State shared by both halves of a channel and the multiplexer's registry.
pub(crate) struct ChannelCore {
    id: u64,
    name: Bytes,
    initiator: bool,
    state: Mutex<State>,
    inbound: mpsc::UnboundedSender<Inbound>,
    shared: Weak<Shared>,
}

impl ChannelCore {
    pub(crate) fn new(
        id: u64,
        name: Bytes,
        initiator: bool,
        open: bool,
        shared: Weak<Shared>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        let core = Arc::new(Self {
            id,
            name,
            initiator,
            state: Mutex::new(State {
                open,
                ..State::default()
            }),
            inbound,
            shared,
        });
        debug!(
            stream_id = id,
            name = %String::from_utf8_lossy(&core.name),
            initiator,
            "new channel"
        );
        (core, rx)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn key(&self) -> StreamKey {
        StreamKey {
            id: self.id,
            initiator: self.initiator,
        }
    }

    fn origin(&self) -> Origin {
        Origin::for_initiator(self.initiator)
    }

    fn emit(&self, frame: Frame) {
        trace!(
            stream_id = self.id,
            kind = %frame.kind,
            len = frame.payload.len(),
            "queue frame"
        );
        let sent = self
            .shared
            .upgrade()
            .is_some_and(|shared| shared.send(frame));
        if !sent {
            trace!(stream_id = self.id, "multiplexer gone; frame dropped");
        }
    }

    fn max_message_size(&self) -> usize {
        self.shared
            .upgrade()
            .map_or(DEFAULT_MAX_PAYLOAD, |shared| shared.config().message_limit())
    }

    /// Enqueue inbound data for the reader.
    pub(crate) fn push(&self, data: Bytes) {
        let state = self.lock();
        if state.ended_remote.is_some() {
            trace!(stream_id = self.id, len = data.len(), "data after remote end dropped");
            return;
        }
        trace!(stream_id = self.id, len = data.len(), "push");
        // A dropped reader just discards what the peer keeps sending.
        let _ = self.inbound.send(Inbound::Data(data));
    }

    /// End the remote direction. Idempotent.
    pub(crate) fn close(&self, err: Option<ChannelError>) {
        let mut state = self.lock();
        if state.ended_remote.is_some() {
            return;
        }
        let end = End::from(err);
        debug!(stream_id = self.id, initiator = self.initiator, end = ?end, "remote side ended");
        let _ = self.inbound.send(Inbound::End(end.clone()));
        state.ended_remote = Some(end);
        self.release_if_destroyed(&mut state);
    }

    /// Record an abort reason and end the remote direction with it.
    pub(crate) fn reset(&self, err: Option<ChannelError>) {
        let err = err.unwrap_or_else(|| ChannelError::Aborted(DEFAULT_RESET_REASON.to_string()));
        {
            let mut state = self.lock();
            if state.reset.is_some() {
                return;
            }
            debug!(stream_id = self.id, reason = %err, "channel reset");
            state.reset = Some(err.clone());
        }
        self.close(Some(err));
    }

    pub(crate) fn open_chan(&self) {
        let mut state = self.lock();
        self.open_locked(&mut state);
    }

    // Frames are queued while the state lock is held so that NEW always
    // precedes the stream's first MESSAGE on the wire.
    fn open_locked(&self, state: &mut State) {
        if state.open {
            return;
        }
        state.open = true;
        let name = if self.name == self.id.to_string() {
            Bytes::new()
        } else {
            self.name.clone()
        };
        debug!(stream_id = self.id, "opening stream");
        self.emit(Frame::new_stream(self.id, name));
    }

    pub(crate) fn send_msg(&self, data: Bytes) {
        let mut state = self.lock();
        self.send_locked(&mut state, data);
    }

    fn send_locked(&self, state: &mut State, mut data: Bytes) {
        self.open_locked(state);
        let max = self.max_message_size();
        let origin = self.origin();
        if data.len() <= max {
            self.emit(Frame::message(self.id, origin, data));
            return;
        }
        while !data.is_empty() {
            let chunk = data.split_to(max.min(data.len()));
            self.emit(Frame::message(self.id, origin, chunk));
        }
    }

    pub(crate) fn end_chan(&self) {
        let state = self.lock();
        self.end_locked(&state);
    }

    fn end_locked(&self, state: &State) {
        if !state.open {
            return;
        }
        debug!(stream_id = self.id, "closing local side");
        self.emit(Frame::close(self.id, self.origin()));
    }

    pub(crate) fn reset_chan(&self) {
        let state = self.lock();
        self.reset_locked(&state);
    }

    fn reset_locked(&self, state: &State) {
        if !state.open {
            return;
        }
        debug!(stream_id = self.id, "resetting stream");
        self.emit(Frame::reset(self.id, self.origin()));
    }

    fn check_writable(state: &State) -> Result<(), ChannelError> {
        match &state.ended_local {
            None => Ok(()),
            Some(End::Clean) => Err(ChannelError::WriteAfterEnd),
            Some(End::Error(err)) => Err(err.clone()),
        }
    }

    /// One chunk from the local writer.
    pub(crate) fn write(&self, data: Bytes) -> Result<(), ChannelError> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        if let Some(reset) = state.reset.clone() {
            drop(state);
            self.fail_local(reset.clone());
            return Err(reset);
        }
        self.send_locked(&mut state, data);
        Ok(())
    }

    /// The local writer's end marker.
    pub(crate) fn finish(&self, end: End) -> Result<(), ChannelError> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        match end {
            End::Clean => {
                state.ended_local = Some(End::Clean);
                if state.open {
                    self.end_locked(&state);
                    self.release_if_destroyed(&mut state);
                } else {
                    // The peer never heard of this stream; nothing can arrive.
                    drop(state);
                    debug!(stream_id = self.id, "ended before open");
                    self.close(None);
                }
            }
            End::Error(err) => {
                drop(state);
                self.fail_local(err);
            }
        }
        Ok(())
    }

    fn fail_local(&self, err: ChannelError) {
        {
            let mut state = self.lock();
            state.ended_local = Some(End::Error(err.clone()));
            self.reset_locked(&state);
        }
        warn!(stream_id = self.id, error = %err, "write side failed; stream reset");
        self.reset(Some(err));
        let mut state = self.lock();
        self.release_if_destroyed(&mut state);
    }

    /// The local writer went away without an end marker.
    fn abandon(&self) {
        let mut state = self.lock();
        if state.ended_local.is_some() {
            return;
        }
        if matches!(state.ended_remote, Some(End::Error(_))) {
            // Peer reset or connection gone: there is nobody left to tell.
            state.ended_local = Some(End::Clean);
            self.release_if_destroyed(&mut state);
            return;
        }
        drop(state);
        let _ = self.finish(End::Clean);
    }

    /// End both directions because the connection is going away.
    pub(crate) fn terminate(&self, reason: ChannelError) {
        let mut state = self.lock();
        state.released = true;
        if state.ended_local.is_none() {
            state.ended_local = Some(End::Error(reason.clone()));
        }
        if state.ended_remote.is_none() {
            if state.reset.is_none() {
                state.reset = Some(reason.clone());
            }
            let end = End::Error(reason);
            let _ = self.inbound.send(Inbound::End(end.clone()));
            state.ended_remote = Some(end);
        }
    }

    fn release_if_destroyed(&self, state: &mut State) {
        if state.released || !state.destroyed() {
            return;
        }
        state.released = true;
        debug!(stream_id = self.id, initiator = self.initiator, "channel destroyed");
        if let Some(shared) = self.shared.upgrade() {
            shared.release(self.key(), self);
        }
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn set_open(&self, open: bool) {
        self.lock().open = open;
    }

    fn is_destroyed(&self) -> bool {
        self.lock().destroyed()
    }

    fn reset_reason(&self) -> Option<ChannelError> {
        self.lock().reset.clone()
    }
}

impl fmt::Debug for ChannelCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("initiator", &self.initiator)
            .field("state", &*self.lock())
            .finish()
    }
}

/// A bidirectional logical stream.
///
/// Dropping a `Channel` (or its writer half) without ending it finishes the
/// local write side cleanly.
pub struct Channel {
    reader: ChannelReader,
    writer: ChannelWriter,
}

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>, rx: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self {
            reader: ChannelReader {
                core: Arc::clone(&core),
                rx,
                finished: false,
            },
            writer: ChannelWriter { core },
        }
    }

    fn core(&self) -> &ChannelCore {
        &self.writer.core
    }

    pub fn id(&self) -> u64 {
        self.core().id
    }

    /// Stream name; the decimal id unless one was given.
    pub fn name(&self) -> &Bytes {
        &self.core().name
    }

    /// True if this side opened the stream.
    pub fn initiator(&self) -> bool {
        self.core().initiator
    }

    /// Whether `NEW` has been sent or received for this stream.
    pub fn is_open(&self) -> bool {
        self.core().is_open()
    }

    pub fn set_open(&self, open: bool) {
        self.core().set_open(open);
    }

    /// Both directions have ended.
    pub fn is_destroyed(&self) -> bool {
        self.core().is_destroyed()
    }

    /// The recorded abort reason, if the stream was reset.
    pub fn reset_reason(&self) -> Option<ChannelError> {
        self.core().reset_reason()
    }

    /// Deliver `data` to this channel's reader as if the peer had sent it.
    pub fn push(&self, data: impl Into<Bytes>) {
        self.core().push(data.into());
    }

    /// End the inbound direction, cleanly or with `err`. Idempotent.
    pub fn close(&self, err: Option<ChannelError>) {
        self.core().close(err);
    }

    /// Record an abort and end the inbound direction with it.
    pub fn reset(&self, err: Option<ChannelError>) {
        self.core().reset(err);
    }

    /// Announce the stream to the peer. No-op once open.
    pub fn open_chan(&self) {
        self.core().open_chan();
    }

    /// Send one message frame (opening the stream first if needed).
    ///
    /// Unlike [`write`](Self::write) this bypasses local end tracking.
    pub fn send_msg(&self, data: impl Into<Bytes>) {
        self.core().send_msg(data.into());
    }

    /// Send CLOSE. No-op if the stream was never opened.
    pub fn end_chan(&self) {
        self.core().end_chan();
    }

    /// Send RESET. No-op if the stream was never opened.
    pub fn reset_chan(&self) {
        self.core().reset_chan();
    }

    pub async fn read(&mut self) -> Result<Option<Bytes>, ChannelError> {
        self.reader.read().await
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes, ChannelError> {
        self.reader.read_to_end().await
    }

    pub fn write(&mut self, data: impl Into<Bytes>) -> Result<(), ChannelError> {
        self.writer.write(data)
    }

    pub fn finish(&mut self) -> Result<(), ChannelError> {
        self.writer.finish()
    }

    pub fn abort(&mut self, err: ChannelError) -> Result<(), ChannelError> {
        self.writer.abort(err)
    }

    /// Split into independently owned read and write halves.
    pub fn split(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("initiator", &self.initiator())
            .finish_non_exhaustive()
    }
}

/// Inbound half of a [`Channel`].
///
/// Yields data chunks in wire order, then ends with `Ok(None)` on a clean
/// remote close or with the error that ended the stream.
pub struct ChannelReader {
    core: Arc<ChannelCore>,
    rx: mpsc::UnboundedReceiver<Inbound>,
    finished: bool,
}

impl ChannelReader {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Next chunk, or `Ok(None)` once the peer has ended cleanly.
    pub async fn read(&mut self) -> Result<Option<Bytes>, ChannelError> {
        poll_fn(|cx| self.poll_read(cx)).await
    }

    /// Collect everything until the remote side ends.
    pub async fn read_to_end(&mut self) -> Result<Bytes, ChannelError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.read().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    fn poll_read(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<Bytes>, ChannelError>> {
        if self.finished {
            return Poll::Ready(Ok(None));
        }
        match ready!(self.rx.poll_recv(cx)) {
            Some(Inbound::Data(data)) => Poll::Ready(Ok(Some(data))),
            Some(Inbound::End(End::Clean)) | None => {
                self.finished = true;
                Poll::Ready(Ok(None))
            }
            Some(Inbound::End(End::Error(err))) => {
                self.finished = true;
                Poll::Ready(Err(err))
            }
        }
    }
}

impl Stream for ChannelReader {
    type Item = Result<Bytes, ChannelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_read(cx).map(Result::transpose)
    }
}

impl fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("id", &self.core.id)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Outbound half of a [`Channel`].
pub struct ChannelWriter {
    core: Arc<ChannelCore>,
}

impl ChannelWriter {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Queue `data` for the peer. Never waits on the transport.
    ///
    /// Fails once the local side has ended. If the stream has been reset,
    /// the write resets the peer and ends the local side instead.
    pub fn write(&mut self, data: impl Into<Bytes>) -> Result<(), ChannelError> {
        self.core.write(data.into())
    }

    /// End the local side cleanly (half-close).
    pub fn finish(&mut self) -> Result<(), ChannelError> {
        self.core.finish(End::Clean)
    }

    /// End the local side with an error: the peer gets RESET and the local
    /// reader ends with `err`.
    pub fn abort(&mut self, err: ChannelError) -> Result<(), ChannelError> {
        self.core.finish(End::Error(err))
    }

    /// Write every chunk of `source`, then finish. An error item aborts the
    /// stream with that error.
    pub async fn send_all<S>(&mut self, mut source: S) -> Result<(), ChannelError>
    where
        S: Stream<Item = Result<Bytes, ChannelError>> + Unpin,
    {
        while let Some(item) = poll_fn(|cx| Pin::new(&mut source).poll_next(cx)).await {
            match item {
                Ok(chunk) => self.write(chunk)?,
                Err(err) => {
                    self.abort(err.clone())?;
                    return Err(err);
                }
            }
        }
        self.finish()
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.core.abandon();
    }
}

impl fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("id", &self.core.id)
            .finish()
    }
}
