//! Streaming SHA-256 hashing of upload bodies.
//!
//! Bodies are hashed in fixed windows so memory stays bounded regardless of
//! the payload size, and the source is rewound afterwards because the same
//! bytes are read a second time by the upload pass. Non-seekable request
//! streams are first spooled to an anonymous temporary file.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use std::{
    io::{self, SeekFrom},
    path::Path,
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt},
};

use crate::models::digest::ContentDigest;

/// Read window used while hashing (8 KiB).
pub const HASH_WINDOW: usize = 8 * 1024;

/// Hash a seekable source from its start and leave it positioned at the start.
pub async fn hash_reader<R>(reader: &mut R) -> io::Result<ContentDigest>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    hash_reader_with_window(reader, HASH_WINDOW).await
}

/// Same as [`hash_reader`] with an explicit window size.
pub async fn hash_reader_with_window<R>(reader: &mut R, window: usize) -> io::Result<ContentDigest>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    reader.seek(SeekFrom::Start(0)).await?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; window.max(1)];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    reader.seek(SeekFrom::Start(0)).await?;
    Ok(ContentDigest::from_bytes(hasher.finalize().into()))
}

/// Hash an in-memory slice.
pub fn hash_bytes(data: &[u8]) -> ContentDigest {
    ContentDigest::from_bytes(Sha256::digest(data).into())
}

/// A request body buffered to a temporary file.
///
/// The file is anonymous: it is removed by the OS once the handle is dropped.
#[derive(Debug)]
pub struct SpooledUpload {
    pub file: File,
    pub size: u64,
}

/// Tee a byte stream into an anonymous temporary file under `dir`.
///
/// Writes each chunk as it arrives, flushes, and rewinds the file so it can be
/// hashed and uploaded. A stream error drops the partial file.
pub async fn spool_stream<S>(stream: S, dir: &Path) -> io::Result<SpooledUpload>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let std_file = tempfile::tempfile_in(dir)?;
    let mut file = File::from_std(std_file);

    let mut size: u64 = 0;
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;

    Ok(SpooledUpload { file, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Cursor,
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::ReadBuf;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    /// Yields a few bytes, then fails every subsequent read.
    struct FailingReader {
        served: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "boom")));
            }
            self.served = true;
            buf.put_slice(b"partial");
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncSeek for FailingReader {
        fn start_seek(self: Pin<&mut Self>, _position: SeekFrom) -> io::Result<()> {
            Ok(())
        }

        fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
            Poll::Ready(Ok(0))
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn known_vector() {
        let mut reader = Cursor::new(b"abc".to_vec());
        let digest = hash_reader(&mut reader).await.unwrap();
        assert_eq!(digest.to_hex(), ABC_SHA256);
        assert_eq!(hash_bytes(b"abc"), digest);
    }

    #[tokio::test]
    async fn digest_is_independent_of_window_size() {
        let data = sample(100_003);
        let expected = hash_bytes(&data);
        for window in [1, 7, 4096, HASH_WINDOW, 1 << 20] {
            let mut reader = Cursor::new(data.clone());
            let digest = hash_reader_with_window(&mut reader, window).await.unwrap();
            assert_eq!(digest, expected, "window {}", window);
        }
    }

    #[tokio::test]
    async fn repeated_calls_are_stable_and_source_is_rewound() {
        let data = sample(20_000);
        let mut reader = Cursor::new(data.clone());

        let first = hash_reader(&mut reader).await.unwrap();
        assert_eq!(reader.position(), 0);

        let mut reread = Vec::new();
        reader.read_to_end(&mut reread).await.unwrap();
        assert_eq!(reread, data);

        let second = hash_reader(&mut reader).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hashing_starts_from_the_beginning() {
        let data = sample(1_000);
        let mut reader = Cursor::new(data.clone());
        reader.set_position(500);
        assert_eq!(hash_reader(&mut reader).await.unwrap(), hash_bytes(&data));
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let mut reader = FailingReader { served: false };
        let err = hash_reader(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn spool_buffers_and_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];

        let mut spooled = spool_stream(futures::stream::iter(chunks), dir.path())
            .await
            .unwrap();
        assert_eq!(spooled.size, 11);

        let digest = hash_reader(&mut spooled.file).await.unwrap();
        assert_eq!(digest, hash_bytes(b"hello world"));

        let mut contents = Vec::new();
        spooled.file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[tokio::test]
    async fn spool_surfaces_stream_errors() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            Ok(Bytes::from_static(b"hello")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];

        let err = spool_stream(futures::stream::iter(chunks), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
