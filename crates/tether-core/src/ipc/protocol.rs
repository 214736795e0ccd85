//! Frame protocol between a process host and a worker process.
//!
//! Each frame on stdin/stdout is a little-endian `u32` body length followed by
//! an rkyv-encoded [`HostCommand`] or [`WorkerEvent`]. Application messages
//! travel inside frames as JSON bytes (see [`Message::to_bytes`]).
//!
//! [`Message::to_bytes`]: crate::Message::to_bytes

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// Frames larger than this are rejected on read (100 MiB).
pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Command sent from the host to the worker process.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum HostCommand {
    /// Check that the worker is alive.
    Ping,

    /// Start the named entry. Sent at most once per process.
    Start {
        /// Registered entry name.
        entry: String,
    },

    /// Deliver a message into the running entry.
    Deliver {
        /// JSON-encoded message.
        payload: Vec<u8>,
    },

    /// Ask the worker to exit.
    Shutdown,
}

/// Event sent from the worker process to the host.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// Response to `Ping`.
    Pong,

    /// The entry is running.
    Started {
        entry: String,
    },

    /// A message posted by the entry.
    Message {
        /// JSON-encoded message.
        payload: Vec<u8>,
    },

    /// A command could not be honoured (unknown entry, bad payload, ...).
    Error {
        message: String,
    },

    /// The entry panicked.
    Panic {
        message: String,
    },

    /// The worker is about to exit.
    Exited,
}

/// Serializer strategy used for frame bodies.
type FrameSerializer<'a> = rkyv::rancor::Strategy<
    rkyv::ser::Serializer<
        rkyv::util::AlignedVec,
        rkyv::ser::allocator::ArenaHandle<'a>,
        rkyv::ser::sharing::Share,
    >,
    rkyv::rancor::Error,
>;

/// Deserializer strategy used for frame bodies.
type FrameDeserializer = rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>;

/// Encode `frame` and write it with its length prefix, then flush.
pub fn write_message<W: Write>(
    writer: &mut W,
    frame: &impl for<'a> Serialize<FrameSerializer<'a>>,
) -> Result<()> {
    let body = rkyv::to_bytes::<rkyv::rancor::Error>(frame)
        .map_err(|e| Error::Serialization(format!("frame encode: {}", e)))?;
    let prefix = u32::try_from(body.len())
        .ok()
        .filter(|&len| len as usize <= MAX_FRAME_BYTES)
        .ok_or_else(|| Error::Ipc(format!("frame of {} bytes exceeds limit", body.len())))?
        .to_le_bytes();

    writer
        .write_all(&prefix)
        .and_then(|()| writer.write_all(&body))
        .and_then(|()| writer.flush())
        .map_err(|e| Error::Ipc(format!("frame write: {}", e)))
}

/// Read one length-prefixed frame and decode it.
///
/// Decoding skips validation, so the stream must come from a peer we trust:
/// the worker we spawned, or the host that spawned us.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, FrameDeserializer>,
{
    let mut prefix = [0u8; 4];
    reader
        .read_exact(&mut prefix)
        .map_err(|e| Error::Ipc(format!("frame length read: {}", e)))?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Ipc(format!("frame of {} bytes exceeds limit", len)));
    }

    // Archived data is accessed in place and needs aligned storage.
    let mut body = rkyv::util::AlignedVec::<16>::with_capacity(len);
    body.resize(len, 0);
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::Ipc(format!("frame body read: {}", e)))?;

    // SAFETY: frames are produced by our own peer process (see above).
    unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&body) }
        .map_err(|e| Error::Deserialization(format!("frame decode: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_start_command_roundtrip() {
        let cmd = HostCommand::Start { entry: "double".to_string() };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: HostCommand = read_message(&mut cursor).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_frames_are_read_in_order() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerEvent::Pong).unwrap();
        write_message(&mut buf, &WorkerEvent::Message { payload: b"42".to_vec() }).unwrap();
        write_message(&mut buf, &WorkerEvent::Exited).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_message::<_, WorkerEvent>(&mut cursor).unwrap(), WorkerEvent::Pong);
        assert_eq!(
            read_message::<_, WorkerEvent>(&mut cursor).unwrap(),
            WorkerEvent::Message { payload: b"42".to_vec() }
        );
        assert_eq!(read_message::<_, WorkerEvent>(&mut cursor).unwrap(), WorkerEvent::Exited);
    }

    #[test]
    fn test_length_prefix_is_little_endian() {
        let mut buf = Vec::new();
        write_message(&mut buf, &HostCommand::Deliver { payload: vec![1, 2, 3] }).unwrap();
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_BYTES as u32) + 1).to_le_bytes());

        let mut cursor = Cursor::new(buf);
        let err = read_message::<_, HostCommand>(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &HostCommand::Ping).unwrap();
        buf.truncate(buf.len() - 1);

        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            read_message::<_, HostCommand>(&mut cursor),
            Err(Error::Ipc(_))
        ));
    }
}
