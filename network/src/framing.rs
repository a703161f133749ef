use crate::messages::Envelope;
use crate::NetworkError;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// Hidden data frames carry several megabyte-sized ciphertexts plus the
// relinearization key; anything past this is not ours.
const MAX_FRAME_BYTES: u64 = 1 << 30;

/// Write one `[u64 LE length][payload]` frame.
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), NetworkError> {
    stream
        .write_all(&(payload.len() as u64).to_le_bytes())
        .await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Zero-length frame: the acknowledgement.
pub async fn write_empty(stream: &mut TcpStream) -> Result<(), NetworkError> {
    write_frame(stream, &[]).await
}

/// Read one frame; `None` is an empty (acknowledgement) frame.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>, NetworkError> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await?;
    let len = u64::from_le_bytes(header);
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// One request/reply round-trip against `target`.
pub async fn request(
    target: SocketAddr,
    envelope: &Envelope,
) -> Result<Option<Envelope>, NetworkError> {
    let mut stream = TcpStream::connect(target).await?;
    write_frame(&mut stream, &envelope.to_bytes()?).await?;
    match read_frame(&mut stream).await? {
        None => Ok(None),
        Some(bytes) => Ok(Some(Envelope::from_bytes(&bytes)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let payload = read_frame(&mut stream).await.unwrap().unwrap();
            write_frame(&mut stream, &payload).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, b"echo me").await.unwrap();
        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(reply, b"echo me");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_frame_reads_as_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            write_empty(&mut stream).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert!(read_frame(&mut stream).await.unwrap().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // a header promising more than the limit
            stream.write_all(&u64::MAX.to_le_bytes()).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            read_frame(&mut stream).await,
            Err(NetworkError::FrameTooLarge(_))
        ));
        server.await.unwrap();
    }
}
