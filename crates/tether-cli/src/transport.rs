//! Framed transport over any async byte stream.
//!
//! Every frame is a one-byte kind followed by a packet:
//!
//! ```text
//! 0x00 control: tag || payload           (setup messages, plaintext)
//!               tag || sealed packet      (auth and rekey messages)
//! 0x01 data:    sealed packet
//! ```
//!
//! Frames carry no length of their own. The reader sizes plaintext setup
//! messages from their tag and sealed packets from the masked header via
//! [`Connection::decode_expected_size`].

use std::time::Duration;
use tether_core::{Connection, Event, LENGTH_PREFIX_SIZE, MessageType, size_for_type};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Control message frame kind
pub const KIND_CONTROL: u8 = 0x00;
/// Application data frame kind
pub const KIND_DATA: u8 = 0x01;

/// One frame read from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Tagged message for [`Connection::process_message`]
    Control(Vec<u8>),
    /// Sealed packet for [`Connection::decrypt`]
    Data(Vec<u8>),
}

/// Read the next frame, or `None` if the peer closed cleanly between frames.
///
/// # Errors
///
/// Returns an error on I/O failure, an unknown kind or tag, or a header
/// the connection cannot decode.
pub async fn read_frame<R>(reader: &mut R, conn: &mut Connection) -> anyhow::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut kind = [0u8; 1];
    match reader.read_exact(&mut kind).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    match kind[0] {
        KIND_CONTROL => {
            let mut tag = [0u8; 1];
            reader.read_exact(&mut tag).await?;

            let mut message = vec![tag[0]];
            if MessageType::try_from(tag[0])?.is_sealed() {
                message.extend(read_sealed(reader, conn).await?);
            } else {
                let mut payload = vec![0u8; size_for_type(tag[0])?];
                reader.read_exact(&mut payload).await?;
                message.extend(payload);
            }
            Ok(Some(Frame::Control(message)))
        }
        KIND_DATA => Ok(Some(Frame::Data(read_sealed(reader, conn).await?))),
        other => anyhow::bail!("Unknown frame kind 0x{other:02X}"),
    }
}

async fn read_sealed<R>(reader: &mut R, conn: &mut Connection) -> anyhow::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut packet = vec![0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut packet).await?;

    let size = conn.decode_expected_size(&packet)?;
    packet.resize(size, 0);
    reader.read_exact(&mut packet[LENGTH_PREFIX_SIZE..]).await?;
    Ok(packet)
}

/// Write one frame.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub async fn write_frame<W>(writer: &mut W, kind: u8, packet: &[u8]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[kind]).await?;
    writer.write_all(packet).await?;
    writer.flush().await?;
    Ok(())
}

/// Drain queued connection events onto the wire.
///
/// Returns true if the connection reported `Ready`.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub async fn flush_events<W>(conn: &mut Connection, writer: &mut W) -> anyhow::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let mut ready = false;
    while let Some(event) = conn.poll_event() {
        match event {
            Event::Send(message) => write_frame(writer, KIND_CONTROL, &message).await?,
            Event::Ready => ready = true,
        }
    }
    Ok(ready)
}

/// Run the handshake to completion within `timeout`.
///
/// # Errors
///
/// Returns an error if the peer fails authentication, closes early, sends
/// data before the handshake ends, or the deadline passes.
pub async fn handshake<S>(conn: &mut Connection, stream: &mut S, timeout: Duration) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = match tokio::time::timeout(timeout, drive_handshake(conn, stream)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("Handshake timed out after {timeout:?}")),
    };

    if result.is_err() {
        conn.close();
    }
    result
}

async fn drive_handshake<S>(conn: &mut Connection, stream: &mut S) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.start()?;
    loop {
        if flush_events(conn, stream).await? {
            info!(
                "{:?} handshake complete, peer {}",
                conn.role(),
                hex::encode(conn.peer_identity().as_bytes())
            );
            return Ok(());
        }

        match read_frame(stream, conn).await? {
            Some(Frame::Control(message)) => conn.process_message(&message)?,
            Some(Frame::Data(_)) => anyhow::bail!("Peer sent data before the handshake completed"),
            None => anyhow::bail!("Peer closed the connection during the handshake"),
        }
    }
}

/// Encrypt and send one application message, rekeying first if due.
///
/// # Errors
///
/// Returns an error if the connection is not ready or on I/O failure.
pub async fn send_data<W>(conn: &mut Connection, writer: &mut W, plaintext: &[u8]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if conn.needs_rekey(plaintext.len()) {
        let rekey = conn.build_rekey_payload()?;
        write_frame(writer, KIND_CONTROL, &rekey).await?;
        debug!("sent rekey before {} byte message", plaintext.len());
    }

    let packet = conn.encrypt(plaintext)?;
    write_frame(writer, KIND_DATA, &packet).await
}

/// Receive the next application message, applying any rekeys on the way.
///
/// Returns `None` once the peer closes.
///
/// # Errors
///
/// Returns an error if a packet fails to decrypt, the framing is corrupt,
/// or on I/O failure. The connection is closed on any error.
pub async fn recv_data<R>(conn: &mut Connection, reader: &mut R) -> anyhow::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let result = next_message(conn, reader).await;
    if result.is_err() {
        conn.close();
    }
    result
}

async fn next_message<R>(conn: &mut Connection, reader: &mut R) -> anyhow::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(reader, conn).await? {
            Some(Frame::Control(message)) => conn.process_message(&message)?,
            Some(Frame::Data(packet)) => return Ok(Some(conn.decrypt(&packet)?)),
            None => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use tether_core::{ConnectionConfig, ConnectionState, Role};
    use tether_crypto::{IdentityKeyPair, PinnedPeerKey};
    use tokio::io::{DuplexStream, duplex};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn connections(config: &ConnectionConfig) -> (Connection, Connection) {
        let wallet = IdentityKeyPair::generate(&mut OsRng).unwrap();
        let bridge = IdentityKeyPair::generate(&mut OsRng).unwrap();
        let wallet_pin = PinnedPeerKey::new(*wallet.public_key());
        let bridge_pin = PinnedPeerKey::new(*bridge.public_key());

        (
            Connection::new(Role::Initiator, wallet, bridge_pin, config).unwrap(),
            Connection::new(Role::Responder, bridge, wallet_pin, config).unwrap(),
        )
    }

    async fn connected(config: &ConnectionConfig) -> (Connection, DuplexStream, Connection, DuplexStream) {
        let (mut wallet, mut bridge) = connections(config);
        let (mut a, mut b) = duplex(64 * 1024);

        let (wr, br) = tokio::join!(
            handshake(&mut wallet, &mut a, TIMEOUT),
            handshake(&mut bridge, &mut b, TIMEOUT)
        );
        wr.unwrap();
        br.unwrap();
        (wallet, a, bridge, b)
    }

    #[tokio::test]
    async fn test_handshake_over_stream() {
        let (wallet, _a, bridge, _b) = connected(&ConnectionConfig::default()).await;
        assert!(wallet.is_ready());
        assert!(bridge.is_ready());
    }

    #[tokio::test]
    async fn test_data_roundtrip() {
        let (mut wallet, mut a, mut bridge, mut b) = connected(&ConnectionConfig::default()).await;

        send_data(&mut wallet, &mut a, b"get balance").await.unwrap();
        let received = recv_data(&mut bridge, &mut b).await.unwrap().unwrap();
        assert_eq!(received, b"get balance");

        send_data(&mut bridge, &mut b, &received).await.unwrap();
        let echoed = recv_data(&mut wallet, &mut a).await.unwrap().unwrap();
        assert_eq!(echoed, b"get balance");
    }

    #[tokio::test]
    async fn test_rekey_inline_with_data() {
        let config = ConnectionConfig::with_rekey_threshold(256);
        let (mut wallet, mut a, mut bridge, mut b) = connected(&config).await;

        for i in 0..10u8 {
            let message = vec![i; 100];
            send_data(&mut wallet, &mut a, &message).await.unwrap();
            assert_eq!(recv_data(&mut bridge, &mut b).await.unwrap().unwrap(), message);
        }

        assert!(wallet.stats().sent > 0);
        assert_eq!(wallet.stats().sent, bridge.stats().received);
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (_wallet, a, mut bridge, mut b) = connected(&ConnectionConfig::default()).await;
        drop(a);
        assert!(recv_data(&mut bridge, &mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_pin_fails_both_sides() {
        let config = ConnectionConfig::default();
        let wallet = IdentityKeyPair::generate(&mut OsRng).unwrap();
        let bridge = IdentityKeyPair::generate(&mut OsRng).unwrap();
        let stranger = IdentityKeyPair::generate(&mut OsRng).unwrap();

        let mut wallet_conn = Connection::new(
            Role::Initiator,
            wallet,
            PinnedPeerKey::new(*bridge.public_key()),
            &config,
        )
        .unwrap();
        let mut bridge_conn = Connection::new(
            Role::Responder,
            bridge,
            PinnedPeerKey::new(*stranger.public_key()),
            &config,
        )
        .unwrap();

        let (mut a, mut b) = duplex(64 * 1024);
        let (wr, br) = tokio::join!(
            async {
                let result = handshake(&mut wallet_conn, &mut a, TIMEOUT).await;
                drop(a);
                result
            },
            async {
                let result = handshake(&mut bridge_conn, &mut b, TIMEOUT).await;
                drop(b);
                result
            }
        );

        assert!(wr.is_err());
        assert!(br.is_err());
        assert_eq!(wallet_conn.state(), ConnectionState::Failed);
        assert_eq!(bridge_conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_tampered_header_fails_receiver() {
        let (mut wallet, mut a, mut bridge, mut b) = connected(&ConnectionConfig::default()).await;

        let mut packet = wallet.encrypt(b"hello").unwrap();
        packet[3] ^= 0x80;
        write_frame(&mut a, KIND_DATA, &packet).await.unwrap();

        assert!(recv_data(&mut bridge, &mut b).await.is_err());
        assert_eq!(bridge.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_corrupt_framing_closes_connection() {
        let (_wallet, mut a, mut bridge, mut b) = connected(&ConnectionConfig::default()).await;

        write_frame(&mut a, 0x07, b"junk").await.unwrap();
        assert!(recv_data(&mut bridge, &mut b).await.is_err());
        assert_eq!(bridge.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected() {
        let (_wallet, mut a, mut bridge, mut b) = connected(&ConnectionConfig::default()).await;
        write_frame(&mut a, 0x07, b"junk").await.unwrap();
        assert!(read_frame(&mut b, &mut bridge).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_silence_times_out() {
        let (mut wallet, _) = connections(&ConnectionConfig::default());
        let (mut a, _b) = duplex(1024);

        let result = handshake(&mut wallet, &mut a, Duration::from_millis(50)).await;
        assert!(result.is_err());
        assert_eq!(wallet.state(), ConnectionState::Failed);
    }
}
