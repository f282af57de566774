//! Key exchange at the start of every connection.
//!
//! The server sends its PEM public key first, then waits for the client's.
//! Nothing is encrypted yet. The exchange authenticates neither side; it only
//! gives each end a key to encrypt against.

use shared::crypto::{decode_public_key, KeyPair, RsaPublicKey};
use shared::framing::read_frame;
use shared::ProtocolError;
use tokio::io::AsyncRead;

use crate::registry::ConnectionHandle;

pub async fn handshake<R>(
    reader: &mut R,
    connection: &ConnectionHandle,
    keys: &KeyPair,
    max_frame_bytes: u32,
) -> Result<RsaPublicKey, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let pem = keys.public_pem()?;
    connection
        .send(pem.as_bytes())
        .await
        .map_err(|e| ProtocolError::Handshake(format!("cannot send server key: {e}")))?;

    let peer_pem = read_frame(reader, max_frame_bytes)
        .await
        .map_err(|e| ProtocolError::Handshake(format!("cannot read peer key: {e}")))?
        .ok_or_else(|| ProtocolError::Handshake("stream closed before peer key".into()))?;

    decode_public_key(&peer_pem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keys, server_keys};
    use shared::MAX_FRAME_BYTES;
    use tokio_test::io::Builder;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn scripted_writer(server: &KeyPair) -> ConnectionHandle {
        let pem = server.public_pem().unwrap();
        let writer = Builder::new().write(&frame(pem.as_bytes())).build();
        ConnectionHandle::new("mock", Box::new(writer), MAX_FRAME_BYTES)
    }

    #[tokio::test]
    async fn test_exchanges_keys_server_first() {
        let server = server_keys();
        let client_pem = keys()[0].public_pem().unwrap();
        let connection = scripted_writer(&server);
        let mut reader = Builder::new().read(&frame(client_pem.as_bytes())).build();

        let peer = handshake(&mut reader, &connection, &server, MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert_eq!(&peer, keys()[0].public_key());
    }

    #[tokio::test]
    async fn test_stream_closed_before_peer_key() {
        let server = server_keys();
        let connection = scripted_writer(&server);
        let mut reader = Builder::new().build();

        let result = handshake(&mut reader, &connection, &server, MAX_FRAME_BYTES).await;
        assert!(matches!(result, Err(ProtocolError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_garbage_peer_key() {
        let server = server_keys();
        let connection = scripted_writer(&server);
        let mut reader = Builder::new().read(&frame(b"not a key")).build();

        let result = handshake(&mut reader, &connection, &server, MAX_FRAME_BYTES).await;
        assert!(matches!(result, Err(ProtocolError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_oversized_key_frame() {
        let server = server_keys();
        let connection = scripted_writer(&server);
        let mut reader = Builder::new().read(&u32::MAX.to_be_bytes()).build();

        let result = handshake(&mut reader, &connection, &server, MAX_FRAME_BYTES).await;
        assert!(matches!(result, Err(ProtocolError::Handshake(_))));
    }
}
