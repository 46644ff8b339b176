use std::collections::HashMap;
use std::sync::Arc;

use plexmux_frame::{Frame, FrameKind, ProtocolError, MAX_STREAM_ID};

/// Registry key: a stream id plus which side opened it.
///
/// Both sides allocate ids from the same numeric range, so `id` alone is
/// ambiguous; `initiator` is true for streams this side opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StreamKey {
    pub id: u64,
    pub initiator: bool,
}

impl StreamKey {
    pub fn local(id: u64) -> Self {
        Self {
            id,
            initiator: true,
        }
    }

    pub fn remote(id: u64) -> Self {
        Self {
            id,
            initiator: false,
        }
    }

    /// The local key an inbound frame addresses.
    ///
    /// Frames written by the opener of a stream (including `NEW`) target a
    /// stream the peer opened; frames written by the acceptor answer one we
    /// opened.
    pub fn for_inbound(frame: &Frame) -> Self {
        if frame.kind == FrameKind::New || frame.origin.is_opener() {
            Self::remote(frame.stream_id)
        } else {
            Self::local(frame.stream_id)
        }
    }
}

/// Live streams of one multiplexer plus the local id allocator.
pub(crate) struct Registry<T> {
    streams: HashMap<StreamKey, Arc<T>>,
    next_id: u64,
    closed: bool,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Next unused local id, counting up from 0.
    pub fn allocate(&mut self) -> Result<u64, ProtocolError> {
        loop {
            let id = self.next_id;
            if id > MAX_STREAM_ID {
                return Err(ProtocolError::StreamIdOverflow(id));
            }
            self.next_id += 1;
            if !self.streams.contains_key(&StreamKey::local(id)) {
                return Ok(id);
            }
        }
    }

    pub fn insert(&mut self, key: StreamKey, value: Arc<T>) -> Result<(), ProtocolError> {
        if key.id > MAX_STREAM_ID {
            return Err(ProtocolError::StreamIdOverflow(key.id));
        }
        if self.streams.contains_key(&key) {
            return Err(ProtocolError::DuplicateStream(key.id));
        }
        self.streams.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &StreamKey) -> Option<Arc<T>> {
        self.streams.get(key).cloned()
    }

    /// Remove `key` only if it still maps to `value`.
    ///
    /// A destroyed stream's id may already have been reused by a new stream;
    /// that entry must survive the old stream's release.
    pub fn remove_if(&mut self, key: &StreamKey, value: &T) -> bool {
        match self.streams.get(key) {
            Some(existing) if std::ptr::eq(Arc::as_ptr(existing), value) => {
                self.streams.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Mark the registry closed and hand back every live stream.
    pub fn close(&mut self) -> Vec<Arc<T>> {
        self.closed = true;
        self.streams.drain().map(|(_, value)| value).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }
}
