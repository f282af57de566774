//! Fan-out of announcements to every registered session.

use log::{debug, warn};
use shared::crypto::encrypt;
use shared::{Identity, ServerPush};

use crate::context::ArenaContext;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<Identity>,
}

/// Encrypts `message` separately for each registered session and sends it
/// as a `msg:<identity>:<ciphertext>` envelope. A failing recipient is
/// logged and skipped.
pub async fn broadcast(context: &ArenaContext, message: &str) -> BroadcastReport {
    let recipients = context.sessions().await;
    let mut report = BroadcastReport::default();

    for (identity, record) in recipients {
        let ciphertext = match encrypt(message.as_bytes(), &record.public_key) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                warn!("Cannot encrypt broadcast for {}: {}", identity, e);
                report.failed.push(identity);
                continue;
            }
        };

        let envelope = ServerPush::Broadcast {
            identity,
            ciphertext,
        }
        .encode();

        match record.connection.send(&envelope).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("Broadcast to {} failed: {}", identity, e);
                report.failed.push(identity);
            }
        }
    }

    debug!(
        "Broadcast {:?} delivered to {}, failed for {}",
        message,
        report.delivered,
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::{ConnectionHandle, SessionRecord};
    use crate::test_support::{keys, test_context};
    use shared::framing::read_frame;
    use shared::{Color, MAX_FRAME_BYTES};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::io::DuplexStream;

    fn duplex_record(key_index: usize) -> (SessionRecord, DuplexStream) {
        let (server_side, client_side) = tokio::io::duplex(4096);
        let record = SessionRecord {
            identity: Identity::mint(),
            connection: Arc::new(ConnectionHandle::new(
                format!("peer-{key_index}"),
                Box::new(server_side),
                MAX_FRAME_BYTES,
            )),
            public_key: keys()[key_index].public_key().clone(),
            color: Color::GREEN,
        };
        (record, client_side)
    }

    #[tokio::test]
    async fn test_each_recipient_gets_own_envelope() {
        let context = test_context(ServerConfig::default());
        let mut clients = Vec::new();
        for key_index in 0..3 {
            let (record, stream) = duplex_record(key_index);
            clients.push((record.identity, key_index, stream));
            context.join(record).await.unwrap();
        }

        let report = broadcast(&context, "Congratulations!").await;
        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());

        for (identity, key_index, mut stream) in clients {
            let frame = read_frame(&mut stream, MAX_FRAME_BYTES)
                .await
                .unwrap()
                .unwrap();
            let ServerPush::Broadcast {
                identity: tagged,
                ciphertext,
            } = ServerPush::decode(&frame).unwrap()
            else {
                panic!("expected a broadcast envelope");
            };
            assert_eq!(tagged, identity);
            assert_eq!(keys()[key_index].decrypt(&ciphertext).unwrap(), b"Congratulations!");
            let other = (key_index + 1) % 3;
            assert!(keys()[other].decrypt(&ciphertext).is_err());
        }
    }

    #[tokio::test]
    async fn test_dead_recipient_does_not_block_others() {
        let context = test_context(ServerConfig::default());
        let (alive, mut alive_stream) = duplex_record(0);
        let (dead, dead_stream) = duplex_record(1);
        let dead_identity = dead.identity;
        drop(dead_stream);
        context.join(alive).await.unwrap();
        context.join(dead).await.unwrap();

        let report = broadcast(&context, "Ready?").await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![dead_identity]);

        let frame = read_frame(&mut alive_stream, MAX_FRAME_BYTES)
            .await
            .unwrap()
            .unwrap();
        assert!(frame.starts_with(b"msg:"));
    }

    #[tokio::test]
    async fn test_stalled_recipient_times_out() {
        let context = test_context(ServerConfig::default());
        let (reading, mut reading_stream) = duplex_record(0);
        let (server_side, _stalled_stream) = tokio::io::duplex(64);
        let stalled = SessionRecord {
            identity: Identity::mint(),
            connection: Arc::new(
                ConnectionHandle::new("stalled", Box::new(server_side), MAX_FRAME_BYTES)
                    .with_write_timeout(Duration::from_millis(100)),
            ),
            public_key: keys()[1].public_key().clone(),
            color: Color::BLUE,
        };
        let stalled_identity = stalled.identity;
        context.join(reading).await.unwrap();
        context.join(stalled).await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), broadcast(&context, "Ready?"))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![stalled_identity]);

        let frame = read_frame(&mut reading_stream, MAX_FRAME_BYTES)
            .await
            .unwrap()
            .unwrap();
        assert!(frame.starts_with(b"msg:"));

        // The broken handle fails at once instead of waiting out the timeout.
        let started = Instant::now();
        let report = broadcast(&context, "Ready?").await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(report.failed, vec![stalled_identity]);
    }

    #[tokio::test]
    async fn test_oversized_message_is_not_truncated() {
        let context = test_context(ServerConfig::default());
        let (record, _stream) = duplex_record(0);
        let identity = record.identity;
        context.join(record).await.unwrap();

        let report = broadcast(&context, &"x".repeat(191)).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, vec![identity]);
    }

    #[tokio::test]
    async fn test_no_sessions_no_envelopes() {
        let context = test_context(ServerConfig::default());
        let report = broadcast(&context, "It works!").await;
        assert_eq!(report, BroadcastReport::default());
    }
}
