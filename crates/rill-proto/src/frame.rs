//! Length-prefixed frame codec for the architect stream: a `u32`
//! little-endian byte count followed by a postcard-encoded body.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtoError;

/// Sanity cap on a single frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = postcard::to_stdvec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(body.len()));
    }
    let len = body.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtoError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(postcard::from_bytes(&body)?)
}

#[cfg(test)]
mod tests {
    use super::{read_frame, write_frame};
    use crate::{AnyPayload, Event, EventType};

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let event = Event::tagged(
            EventType::ClientRegisterWorkers,
            42,
            AnyPayload {
                type_url: "rill.test".to_string(),
                bytes: vec![1, 2, 3],
            },
        );
        write_frame(&mut client, &event).await.expect("write frame");
        let back: Event = read_frame(&mut server).await.expect("read frame");
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn a_closed_stream_surfaces_as_an_io_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_frame::<_, Event>(&mut server)
            .await
            .expect_err("closed stream must error");
        assert!(matches!(err, crate::ProtoError::Io(_)));
    }
}
