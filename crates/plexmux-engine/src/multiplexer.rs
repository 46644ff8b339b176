use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use plexmux_frame::{Frame, FrameKind, PlexCodec, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use crate::channel::{Channel, ChannelCore};
use crate::config::MuxConfig;
use crate::error::{ChannelError, MuxError, Result};
use crate::registry::{Registry, StreamKey};

/// Final state of a multiplexer's connection.
pub type Outcome = std::result::Result<(), Arc<MuxError>>;

/// State reachable from every channel of one multiplexer.
pub(crate) struct Shared {
    registry: Mutex<Registry<ChannelCore>>,
    outbound: mpsc::UnboundedSender<Frame>,
    accepting: AtomicBool,
    config: MuxConfig,
}

impl Shared {
    pub(crate) fn new(config: MuxConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Self {
            registry: Mutex::new(Registry::new()),
            outbound,
            accepting: AtomicBool::new(true),
            config,
        });
        (shared, rx)
    }

    fn registry(&self) -> MutexGuard<'_, Registry<ChannelCore>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Queue a frame for the transport. False once the connection is gone.
    pub(crate) fn send(&self, frame: Frame) -> bool {
        self.accepting.load(Ordering::Acquire) && self.outbound.send(frame).is_ok()
    }

    pub(crate) fn release(&self, key: StreamKey, core: &ChannelCore) {
        let mut registry = self.registry();
        if registry.remove_if(&key, core) {
            trace!(stream_id = key.id, active = registry.len(), "channel released");
        }
    }

    pub(crate) fn active_channels(&self) -> usize {
        self.registry().len()
    }

    /// Register a locally opened channel.
    pub(crate) fn create(
        self: &Arc<Self>,
        id: Option<u64>,
        name: Option<Bytes>,
    ) -> Result<Channel> {
        let mut registry = self.registry();
        if registry.is_closed() {
            return Err(MuxError::Closed);
        }
        let id = match id {
            Some(id) => id,
            None => registry.allocate()?,
        };
        let default_name = Bytes::from(id.to_string());
        let name = name.unwrap_or_else(|| default_name.clone());
        // A non-default name travels in NEW, so it must fit one frame.
        let max = self.config.message_limit();
        if name != default_name && name.len() > max {
            return Err(ProtocolError::Oversize {
                size: name.len(),
                max,
            }
            .into());
        }
        let (core, rx) = ChannelCore::new(id, name, true, false, Arc::downgrade(self));
        registry.insert(core.key(), Arc::clone(&core))?;
        Ok(Channel::new(core, rx))
    }

    fn lookup(&self, key: &StreamKey) -> Option<Arc<ChannelCore>> {
        self.registry().get(key)
    }

    /// Apply one inbound frame.
    fn route(self: &Arc<Self>, frame: Frame, acceptor: &mut Acceptor) -> Result<()> {
        let key = StreamKey::for_inbound(&frame);
        trace!(
            stream_id = frame.stream_id,
            kind = %frame.kind,
            origin = ?frame.origin,
            len = frame.payload.len(),
            "frame received"
        );

        match frame.kind {
            FrameKind::New => {
                let name = if frame.payload.is_empty() {
                    Bytes::from(frame.stream_id.to_string())
                } else {
                    frame.payload
                };
                let (core, rx) =
                    ChannelCore::new(frame.stream_id, name, false, true, Arc::downgrade(self));
                self.registry().insert(key, Arc::clone(&core))?;
                acceptor.deliver(Channel::new(core, rx));
            }
            FrameKind::Message => match self.lookup(&key) {
                Some(core) => core.push(frame.payload),
                None => warn!(
                    stream_id = key.id,
                    initiator = key.initiator,
                    len = frame.payload.len(),
                    "{}",
                    ProtocolError::UnknownStream(key.id)
                ),
            },
            FrameKind::Close => match self.lookup(&key) {
                Some(core) => core.close(None),
                None => warn!(
                    stream_id = key.id,
                    initiator = key.initiator,
                    "close for {}",
                    ProtocolError::UnknownStream(key.id)
                ),
            },
            FrameKind::Reset => match self.lookup(&key) {
                Some(core) => core.close(Some(ChannelError::Reset)),
                None => trace!(stream_id = key.id, "late reset ignored"),
            },
        }
        Ok(())
    }

    /// End every live channel and refuse new work. First reason wins.
    pub(crate) fn shutdown(&self, reason: ChannelError) {
        self.accepting.store(false, Ordering::Release);
        let cores = {
            let mut registry = self.registry();
            if registry.is_closed() {
                return;
            }
            registry.close()
        };
        debug!(channels = cores.len(), %reason, "terminating channels");
        for core in cores {
            core.terminate(reason.clone());
        }
    }
}

/// Where remotely opened channels go.
enum Acceptor {
    Queue(mpsc::UnboundedSender<Channel>),
    Handler(Box<dyn FnMut(Channel) + Send>),
}

impl Acceptor {
    fn deliver(&mut self, channel: Channel) {
        debug!(stream_id = channel.id(), "accepted channel");
        match self {
            Self::Queue(tx) => {
                if tx.send(channel).is_err() {
                    trace!("accept queue dropped; channel discarded");
                }
            }
            Self::Handler(handler) => handler(channel),
        }
    }
}

/// Why the inbound side stopped without an error.
enum Ending {
    /// `Multiplexer::close` was called.
    Cancelled,
    /// The peer closed its write side.
    Eof,
    /// The outbound side failed first.
    Halted,
}

/// Runs many [`Channel`]s over one duplex byte stream.
///
/// Construction spawns a driver task onto the current tokio runtime; it
/// reads frames from the transport, routes them to channels, and writes
/// every channel's outbound frames in the order they were queued.
/// Dropping the handle closes the connection gracefully.
pub struct Multiplexer {
    shared: Arc<Shared>,
    incoming: Option<mpsc::UnboundedReceiver<Channel>>,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl Multiplexer {
    /// Start a multiplexer whose accepted channels are read with
    /// [`accept`](Self::accept).
    pub fn new<T>(io: T, config: MuxConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut mux = Self::start(io, config, Acceptor::Queue(tx));
        mux.incoming = Some(rx);
        mux
    }

    /// Start a multiplexer that hands each accepted channel to `handler`.
    ///
    /// The handler runs on the driver task and must not block.
    pub fn with_handler<T, F>(io: T, config: MuxConfig, handler: F) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        F: FnMut(Channel) + Send + 'static,
    {
        Self::start(io, config, Acceptor::Handler(Box::new(handler)))
    }

    fn start<T>(io: T, config: MuxConfig, acceptor: Acceptor) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let span = info_span!("mux", label = %config.label, initiator = config.initiator);
        let (shared, outbound) = Shared::new(config);
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome) = watch::channel(None);

        let driver = Driver {
            shared: Arc::clone(&shared),
            acceptor,
            cancel: cancel.clone(),
            halt: CancellationToken::new(),
        };
        tokio::spawn(
            async move {
                let result = driver.run(io, outbound).await;
                outcome_tx.send_replace(Some(result));
            }
            .instrument(span),
        );

        Self {
            shared,
            incoming: None,
            cancel,
            outcome,
        }
    }

    /// Open a new outbound channel. The peer learns about it on first write.
    ///
    /// `id` must not collide with another live channel this side opened;
    /// `None` allocates the next free id. `name` defaults to the decimal id.
    pub fn create_stream(&self, id: Option<u64>, name: Option<Bytes>) -> Result<Channel> {
        let channel = self.shared.create(id, name)?;
        debug!(stream_id = channel.id(), "created channel");
        Ok(channel)
    }

    /// Open a new outbound channel with an allocated id and default name.
    pub fn new_stream(&self) -> Result<Channel> {
        self.create_stream(None, None)
    }

    /// Next channel opened by the peer.
    ///
    /// Returns `None` once the connection has ended, or always when the
    /// multiplexer was built with a handler.
    pub async fn accept(&mut self) -> Option<Channel> {
        self.incoming.as_mut()?.recv().await
    }

    /// Stop the connection. Frames already queued are still written.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait for the connection to end and report why.
    ///
    /// `Ok(())` covers a local `close` and a clean EOF from the peer.
    pub async fn closed(&self) -> Outcome {
        let mut outcome = self.outcome.clone();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Ok(())),
            // The driver task went away without reporting (runtime shutdown).
            Err(_) => Err(Arc::new(MuxError::Closed)),
        };
        result
    }

    /// Whether the connection has already ended.
    pub fn is_closed(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn label(&self) -> &str {
        &self.shared.config().label
    }

    pub fn is_initiator(&self) -> bool {
        self.shared.config().initiator
    }

    pub fn config(&self) -> &MuxConfig {
        self.shared.config()
    }

    /// Channels currently registered (not yet destroyed).
    pub fn active_channels(&self) -> usize {
        self.shared.active_channels()
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer").finish_non_exhaustive()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    shared: Arc<Shared>,
    acceptor: Acceptor,
    cancel: CancellationToken,
    /// Stops whichever loop is still running once the other one ends.
    halt: CancellationToken,
}

impl Driver {
    async fn run<T>(mut self, io: T, mut outbound: mpsc::UnboundedReceiver<Frame>) -> Outcome
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = PlexCodec::new(self.shared.config().frame_config());
        let (read_half, write_half) = tokio::io::split(io);
        let mut frames = FramedRead::new(read_half, codec.clone());
        let mut sink = FramedWrite::new(write_half, codec);

        let shared = Arc::clone(&self.shared);
        let halt = self.halt.clone();
        let reader = async {
            let result = self.read_loop(&mut frames).await;
            let reason = match &result {
                Ok(Ending::Cancelled) => ChannelError::MuxClosed,
                Ok(Ending::Eof | Ending::Halted) => ChannelError::ConnectionClosed,
                Err(err) => ChannelError::from(err),
            };
            shared.shutdown(reason);
            halt.cancel();
            result
        };
        let writer = write_loop(&shared, &mut sink, &mut outbound, &halt);
        let (read_result, write_result) = tokio::join!(reader, writer);

        if let Err(err) = sink.close().await {
            debug!(error = %err, "transport shutdown failed");
        }

        match (read_result, write_result) {
            (Err(err), _) | (Ok(_), Err(err)) => {
                error!(error = %err, "multiplexer failed");
                Err(Arc::new(err))
            }
            (Ok(ending), Ok(())) => {
                match ending {
                    Ending::Cancelled => debug!("multiplexer closed locally"),
                    Ending::Eof => debug!("peer closed connection"),
                    Ending::Halted => debug!("multiplexer halted"),
                }
                Ok(())
            }
        }
    }

    async fn read_loop<R>(
        &mut self,
        frames: &mut FramedRead<ReadHalf<R>, PlexCodec>,
    ) -> Result<Ending>
    where
        R: AsyncRead,
    {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(Ending::Cancelled),
                _ = self.halt.cancelled() => return Ok(Ending::Halted),
                next = frames.next() => next,
            };
            match next {
                None => return Ok(Ending::Eof),
                Some(Err(err)) => return Err(MuxError::from_codec(err)),
                Some(Ok(frame)) => self.shared.route(frame, &mut self.acceptor)?,
            }
        }
    }
}

/// Write queued frames until halted, then flush whatever is still queued.
async fn write_loop<W>(
    shared: &Shared,
    sink: &mut FramedWrite<WriteHalf<W>, PlexCodec>,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
    halt: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite,
{
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
            _ = halt.cancelled() => return Ok(()),
        };
        if let Err(err) = write_batch(sink, outbound, frame).await {
            shared.shutdown(ChannelError::from(&err));
            halt.cancel();
            return Err(err);
        }
    }
}

async fn write_batch<W>(
    sink: &mut FramedWrite<WriteHalf<W>, PlexCodec>,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
    first: Frame,
) -> Result<()>
where
    W: AsyncWrite,
{
    sink.feed(first).await.map_err(MuxError::from_codec)?;
    while let Ok(frame) = outbound.try_recv() {
        sink.feed(frame).await.map_err(MuxError::from_codec)?;
    }
    sink.flush().await.map_err(MuxError::from_codec)
}

#[cfg(test)]
mod tests {
    use plexmux_frame::Origin;

    use super::*;

    fn queue() -> (Acceptor, mpsc::UnboundedReceiver<Channel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Acceptor::Queue(tx), rx)
    }

    #[tokio::test]
    async fn new_frame_registers_remote_channel() {
        let (shared, mut out) = Shared::new(MuxConfig::default());
        let (mut acceptor, mut accepted) = queue();

        shared
            .route(Frame::new_stream(0, Bytes::new()), &mut acceptor)
            .unwrap();
        let mut chan = accepted.try_recv().unwrap();
        assert_eq!(chan.id(), 0);
        assert_eq!(chan.name().as_ref(), b"0");
        assert!(!chan.initiator());
        assert!(chan.is_open());

        shared
            .route(
                Frame::message(0, Origin::Opener, Bytes::from_static(b"hi")),
                &mut acceptor,
            )
            .unwrap();
        assert_eq!(chan.read().await.unwrap().unwrap().as_ref(), b"hi");

        chan.write(Bytes::from_static(b"back")).unwrap();
        let reply = out.try_recv().unwrap();
        assert_eq!(reply.kind, FrameKind::Message);
        assert_eq!(reply.origin, Origin::Acceptor);
    }

    #[tokio::test]
    async fn duplicate_new_is_fatal() {
        let (shared, _out) = Shared::new(MuxConfig::default());
        let (mut acceptor, _accepted) = queue();
        shared
            .route(Frame::new_stream(4, Bytes::new()), &mut acceptor)
            .unwrap();
        let err = shared
            .route(Frame::new_stream(4, Bytes::new()), &mut acceptor)
            .unwrap_err();
        assert!(matches!(
            err,
            MuxError::Protocol(ProtocolError::DuplicateStream(4))
        ));
    }

    #[tokio::test]
    async fn same_id_both_directions() {
        let (shared, _out) = Shared::new(MuxConfig::default());
        let (mut acceptor, mut accepted) = queue();
        let mut local = shared.create(Some(0), None).unwrap();
        shared
            .route(Frame::new_stream(0, Bytes::new()), &mut acceptor)
            .unwrap();
        let mut remote = accepted.try_recv().unwrap();

        shared
            .route(
                Frame::message(0, Origin::Acceptor, Bytes::from_static(b"to-local")),
                &mut acceptor,
            )
            .unwrap();
        shared
            .route(
                Frame::message(0, Origin::Opener, Bytes::from_static(b"to-remote")),
                &mut acceptor,
            )
            .unwrap();

        assert_eq!(local.read().await.unwrap().unwrap().as_ref(), b"to-local");
        assert_eq!(remote.read().await.unwrap().unwrap().as_ref(), b"to-remote");
        assert_eq!(shared.active_channels(), 2);
    }

    #[tokio::test]
    async fn unknown_stream_frames_are_dropped() {
        let (shared, _out) = Shared::new(MuxConfig::default());
        let (mut acceptor, _accepted) = queue();
        for frame in [
            Frame::message(42, Origin::Opener, Bytes::from_static(b"x")),
            Frame::close(42, Origin::Acceptor),
            Frame::reset(42, Origin::Opener),
        ] {
            shared.route(frame, &mut acceptor).unwrap();
        }
        assert_eq!(shared.active_channels(), 0);
    }

    #[tokio::test]
    async fn remote_reset_ends_reader_with_reset() {
        let (shared, _out) = Shared::new(MuxConfig::default());
        let (mut acceptor, _accepted) = queue();
        let mut chan = shared.create(None, None).unwrap();
        chan.write(Bytes::from_static(b"x")).unwrap();

        shared
            .route(Frame::reset(chan.id(), Origin::Acceptor), &mut acceptor)
            .unwrap();
        assert_eq!(chan.read().await, Err(ChannelError::Reset));
        // A second reset for the same stream is a no-op.
        shared
            .route(Frame::reset(chan.id(), Origin::Acceptor), &mut acceptor)
            .unwrap();
    }

    #[tokio::test]
    async fn create_after_shutdown_fails() {
        let (shared, _out) = Shared::new(MuxConfig::default());
        shared.shutdown(ChannelError::MuxClosed);
        assert!(matches!(shared.create(None, None), Err(MuxError::Closed)));
        assert!(!shared.send(Frame::reset(0, Origin::Opener)));
    }

    #[tokio::test]
    async fn caller_ids_must_be_unique() {
        let (shared, _out) = Shared::new(MuxConfig::default());
        let _first = shared.create(Some(7), None).unwrap();
        let err = shared.create(Some(7), None).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Protocol(ProtocolError::DuplicateStream(7))
        ));
        let allocated = shared.create(None, None).unwrap();
        assert_eq!(allocated.id(), 0);
    }

    #[tokio::test]
    async fn names_must_fit_one_frame() {
        let (shared, mut out) = Shared::new(MuxConfig::default().with_max_message_size(1));

        // Default names never reach the wire, whatever their length.
        let _long_id = shared.create(Some(1234), None).unwrap();

        let err = shared.create(None, Some(Bytes::from_static(b"ab"))).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Protocol(ProtocolError::Oversize { size: 2, max: 1 })
        ));
        assert_eq!(shared.active_channels(), 1);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn handler_receives_accepted_channels() {
        let (shared, _out) = Shared::new(MuxConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut acceptor = Acceptor::Handler(Box::new(move |chan: Channel| {
            let _ = tx.send(chan.id());
        }));
        shared
            .route(Frame::new_stream(3, Bytes::from_static(b"x")), &mut acceptor)
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), 3);
    }
}
