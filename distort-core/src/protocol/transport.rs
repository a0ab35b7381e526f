//! Frame transport over byte streams
//!
//! Sends and receives exactly one fixed-size frame at a time. Reads loop
//! until the whole frame is buffered, since a single read may return fewer
//! bytes than requested.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::codec::WireProfile;
use super::frame::WireFrame;
use crate::error::{DistortError, Result};

/// Write one frame to `writer`
pub async fn write_frame<W>(writer: &mut W, profile: WireProfile, frame: &WireFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = profile.encode(frame)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream before sending any byte
/// of a new frame, and [`DistortError::UnexpectedEof`] when it closed part way
/// through one. Decode errors leave the stream positioned at the next frame.
pub async fn read_frame<R>(
    reader: &mut R,
    profile: WireProfile,
    buf: &mut Vec<u8>,
) -> Result<Option<WireFrame>>
where
    R: AsyncRead + Unpin,
{
    let size = profile.frame_size();
    buf.resize(size, 0);

    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(DistortError::UnexpectedEof {
                received: filled,
                expected: size,
            });
        }
        filled += n;
    }

    profile.decode(buf).map(Some)
}

/// Receiving half of a frame connection
pub struct FrameReader<R> {
    inner: R,
    profile: WireProfile,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, profile: WireProfile) -> Self {
        Self {
            inner,
            profile,
            buf: Vec::with_capacity(profile.frame_size()),
        }
    }

    /// Block until a full frame arrives or the peer disconnects
    pub async fn receive_frame(&mut self) -> Result<Option<WireFrame>> {
        read_frame(&mut self.inner, self.profile, &mut self.buf).await
    }
}

/// Sending half of a frame connection
pub struct FrameWriter<W> {
    inner: W,
    profile: WireProfile,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, profile: WireProfile) -> Self {
        Self { inner, profile }
    }

    pub async fn send_frame(&mut self, frame: &WireFrame) -> Result<()> {
        write_frame(&mut self.inner, self.profile, frame).await
    }
}

/// Bidirectional frame connection over a single stream
pub struct FrameTransport<S> {
    stream: S,
    profile: WireProfile,
    buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameTransport<S> {
    pub fn new(stream: S, profile: WireProfile) -> Self {
        Self {
            stream,
            profile,
            buf: Vec::with_capacity(profile.frame_size()),
        }
    }

    pub async fn send_frame(&mut self, frame: &WireFrame) -> Result<()> {
        write_frame(&mut self.stream, self.profile, frame).await
    }

    pub async fn receive_frame(&mut self) -> Result<Option<WireFrame>> {
        read_frame(&mut self.stream, self.profile, &mut self.buf).await
    }

    /// Send `frame` and wait for exactly one reply; a clean close is an error
    pub async fn request(&mut self, frame: &WireFrame) -> Result<WireFrame> {
        self.send_frame(frame).await?;
        match self.receive_frame().await? {
            Some(reply) => Ok(reply),
            None => Err(DistortError::UnexpectedEof {
                received: 0,
                expected: self.profile.frame_size(),
            }),
        }
    }
}

impl FrameTransport<TcpStream> {
    /// Connect to `addr` over TCP
    pub async fn connect(addr: &str, profile: WireProfile) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| DistortError::ConnectionFailed {
                endpoint: addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);
        Ok(Self::new(stream, profile))
    }
}
