use crate::DataLinkError;
use modwire_core::frame::{Frame, FrameBuffer, Framing, TcpFraming};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

const READ_CHUNK: usize = 512;

/// Hands out 16-bit transaction ids, starting at 1 and wrapping.
#[derive(Debug, Clone)]
pub struct TransactionIds {
    next: u16,
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl TransactionIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for which `in_use` is false, or `None` when every id is taken.
    pub fn next_free(&mut self, mut in_use: impl FnMut(u16) -> bool) -> Option<u16> {
        for _ in 0..=u32::from(u16::MAX) {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if !in_use(id) {
                return Some(id);
            }
        }
        None
    }
}

/// Write half of a connection. Each frame goes out in one `write_all`.
#[derive(Debug)]
pub struct FrameWriter<W, F = TcpFraming> {
    inner: W,
    framing: F,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W, TcpFraming> {
    pub fn new(inner: W) -> Self {
        Self::with_framing(inner, TcpFraming)
    }
}

impl<W: AsyncWrite + Unpin, F: Framing> FrameWriter<W, F> {
    pub fn with_framing(inner: W, framing: F) -> Self {
        Self { inner, framing }
    }

    pub async fn send(
        &mut self,
        transaction_id: u16,
        unit_id: u8,
        pdu: &[u8],
    ) -> Result<(), DataLinkError> {
        let frame = self.framing.encode(transaction_id, unit_id, pdu)?;
        trace!(transaction_id, unit_id, pdu_len = pdu.len(), "sending modbus frame");
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DataLinkError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// What the reader task observed on the stream.
#[derive(Debug)]
pub enum LinkEvent {
    Frame(Frame),
    /// Orderly end of stream.
    Closed,
    /// I/O failure, malformed framing, or end of stream in the middle of a
    /// frame; the stream is unusable afterwards.
    Failed(DataLinkError),
}

/// A [`LinkEvent`] tagged with the connection it came from, so events of a
/// torn-down connection can be told apart from the current one.
#[derive(Debug)]
pub struct LinkMessage {
    pub generation: u64,
    pub event: LinkEvent,
}

/// Spawn a task that reads `reader` until it ends and forwards every
/// complete frame, followed by exactly one `Closed` or `Failed`.
pub fn spawn_reader<R>(
    reader: R,
    generation: u64,
    events: mpsc::UnboundedSender<LinkMessage>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_frames(reader, generation, events))
}

async fn read_frames<R: AsyncRead + Unpin>(
    mut reader: R,
    generation: u64,
    events: mpsc::UnboundedSender<LinkMessage>,
) {
    let emit = |event| events.send(LinkMessage { generation, event }).is_ok();
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) if frames.buffered() > 0 => {
                emit(LinkEvent::Failed(DataLinkError::ConnectionClosed));
                return;
            }
            Ok(0) => {
                emit(LinkEvent::Closed);
                return;
            }
            Ok(read) => read,
            Err(err) => {
                emit(LinkEvent::Failed(err.into()));
                return;
            }
        };
        frames.extend(&chunk[..read]);

        loop {
            match frames.next_frame() {
                Ok(Some(frame)) => {
                    trace!(
                        generation,
                        transaction_id = frame.transaction_id,
                        unit_id = frame.unit_id,
                        pdu_len = frame.pdu.len(),
                        "received modbus frame"
                    );
                    if !emit(LinkEvent::Frame(frame)) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    emit(LinkEvent::Failed(err.into()));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameWriter, LinkEvent, TransactionIds, spawn_reader};
    use crate::DataLinkError;
    use modwire_core::DecodeError;
    use modwire_core::frame::{Framing, TcpFraming};
    use std::collections::HashSet;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    #[test]
    fn ids_start_at_one_and_wrap() {
        let mut ids = TransactionIds::new();
        assert_eq!(ids.next_free(|_| false), Some(1));
        assert_eq!(ids.next_free(|_| false), Some(2));

        let mut ids = TransactionIds { next: u16::MAX };
        assert_eq!(ids.next_free(|_| false), Some(u16::MAX));
        assert_eq!(ids.next_free(|_| false), Some(0));
    }

    #[test]
    fn ids_skip_pending_entries() {
        let busy: HashSet<u16> = [1, 2, 4].into_iter().collect();
        let mut ids = TransactionIds::new();
        assert_eq!(ids.next_free(|id| busy.contains(&id)), Some(3));
        assert_eq!(ids.next_free(|id| busy.contains(&id)), Some(5));
    }

    #[test]
    fn ids_exhausted_when_all_pending() {
        let mut ids = TransactionIds::new();
        assert_eq!(ids.next_free(|_| true), None);
    }

    #[tokio::test]
    async fn writer_emits_whole_frame() {
        let (client, mut peer) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        writer.send(9, 1, &[0x05, 0x00, 0x0A, 0xFF, 0x00]).await.unwrap();

        let mut buf = [0u8; 12];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            [0x00, 0x09, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x0A, 0xFF, 0x00]
        );
    }

    #[tokio::test]
    async fn reader_reassembles_split_frames() {
        let (reader, mut peer) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_reader(reader, 3, tx);

        let mut bytes = TcpFraming.encode(1, 1, &[0x06, 0x00, 0x01, 0x00, 0x03]).unwrap();
        bytes.extend(TcpFraming.encode(2, 1, &[0x83, 0x02]).unwrap());
        peer.write_all(&bytes[..4]).await.unwrap();
        peer.flush().await.unwrap();
        tokio::task::yield_now().await;
        peer.write_all(&bytes[4..]).await.unwrap();
        drop(peer);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.generation, 3);
        match first.event {
            LinkEvent::Frame(frame) => assert_eq!(frame.transaction_id, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap().event {
            LinkEvent::Frame(frame) => assert_eq!(frame.pdu, [0x83, 0x02]),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap().event, LinkEvent::Closed));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn hang_up_mid_frame_is_a_failure() {
        let (reader, mut peer) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_reader(reader, 1, tx);

        let frame = TcpFraming.encode(4, 1, &[0x03, 0x02, 0x00, 0x01]).unwrap();
        peer.write_all(&frame[..9]).await.unwrap();
        drop(peer);

        match rx.recv().await.unwrap().event {
            LinkEvent::Failed(DataLinkError::ConnectionClosed) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        task.await.unwrap();
    }

    #[tokio::test]
    async fn reader_reports_bad_protocol_id() {
        let (reader, mut peer) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_reader(reader, 0, tx);

        peer.write_all(&[0x00, 0x01, 0x00, 0x07, 0x00, 0x02, 0x01, 0x03])
            .await
            .unwrap();

        match rx.recv().await.unwrap().event {
            LinkEvent::Failed(DataLinkError::Decode(DecodeError::InvalidProtocolId)) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
