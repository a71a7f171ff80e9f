//! Integration tests for stream framing and unit detection

use autocut_proxy::protocol::{FrameError, FrameReader, Unit};
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

const PRINT_JOB: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
    <print>\n\
    <speed>3</speed>\n\
    <width>1280</width>\n\
    <height>1860</height>\n\
    <dataformat>rgb</dataformat>\n\
    <datasize>4096</datasize>\n\
    <quality>1</quality>\n\
    <copies>1</copies>\n\
    </print>\n\n";

const STATUS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
    <status>\n\
    <code>0</code>\n\
    <comment>ready to receive</comment>\n\
    </status>\n\n";

#[tokio::test]
async fn extracts_control_message_without_overreading_into_payload() {
    let (mut tx, rx) = tokio::io::duplex(64 * 1024);
    let mut reader = FrameReader::new(rx, 50_000, 4096);

    // Control message and the start of its payload arrive in a single write,
    // so the reader buffers past the delimiter before the payload is armed.
    let mut wire = Vec::from(PRINT_JOB.as_bytes());
    wire.extend_from_slice(&[0xAB; 4096]);
    tx.write_all(&wire).await.unwrap();

    match reader.read_unit().await.unwrap() {
        Unit::Control(raw) => assert_eq!(&raw[..], PRINT_JOB.as_bytes()),
        other => panic!("expected control message, got {:?}", other),
    }

    reader.set_pending_payload(4096).unwrap();

    let mut payload = Vec::new();
    while payload.len() < 4096 {
        match reader.read_unit().await.unwrap() {
            Unit::Payload(chunk) => payload.extend_from_slice(&chunk),
            other => panic!("expected payload chunk, got {:?}", other),
        }
    }
    assert_eq!(payload.len(), 4096);
    assert!(payload.iter().all(|&b| b == 0xAB));
    assert_eq!(reader.pending_payload(), 0);
}

#[tokio::test]
async fn payload_is_exact_across_partial_writes() {
    let (mut tx, rx) = tokio::io::duplex(256);
    let mut reader = FrameReader::new(rx, 50_000, 128);

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let writer = tokio::spawn(async move {
        tx.write_all(STATUS.as_bytes()).await.unwrap();
        // Dribble the payload out in uneven pieces.
        for piece in payload.chunks(97) {
            tx.write_all(piece).await.unwrap();
        }
        tx
    });

    match reader.read_unit().await.unwrap() {
        Unit::Control(raw) => assert_eq!(&raw[..], STATUS.as_bytes()),
        other => panic!("expected control message, got {:?}", other),
    }

    reader.set_pending_payload(expected.len() as u64).unwrap();

    let mut received = Vec::new();
    while received.len() < expected.len() {
        match reader.read_unit().await.unwrap() {
            Unit::Payload(chunk) => received.extend_from_slice(&chunk),
            other => panic!("expected payload chunk, got {:?}", other),
        }
    }

    assert_eq!(received, expected);
    drop(writer.await.unwrap());
}

#[tokio::test]
async fn back_to_back_messages_keep_framing() {
    let (mut tx, rx) = tokio::io::duplex(64 * 1024);
    let mut reader = FrameReader::new(rx, 50_000, 4096);

    let mut wire = Vec::from(STATUS.as_bytes());
    wire.extend_from_slice(STATUS.as_bytes());
    tx.write_all(&wire).await.unwrap();
    drop(tx);

    for _ in 0..2 {
        match reader.read_unit().await.unwrap() {
            Unit::Control(raw) => assert_eq!(&raw[..], STATUS.as_bytes()),
            other => panic!("expected control message, got {:?}", other),
        }
    }

    assert!(matches!(reader.read_unit().await.unwrap(), Unit::Eof));
}

#[tokio::test]
async fn clean_eof_at_unit_boundary() {
    let (tx, rx) = tokio::io::duplex(1024);
    let mut reader = FrameReader::new(rx, 50_000, 1024);
    drop(tx);

    assert!(matches!(reader.read_unit().await.unwrap(), Unit::Eof));
}

#[tokio::test]
async fn eof_mid_message_is_a_framing_error() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let mut reader = FrameReader::new(rx, 50_000, 1024);

    tx.write_all(b"<print>\n<speed>3</speed>\n").await.unwrap();
    drop(tx);

    match reader.read_unit().await {
        Err(FrameError::TruncatedMessage { buffered }) => assert!(buffered > 0),
        other => panic!("expected TruncatedMessage, got {:?}", other),
    }
}

#[tokio::test]
async fn short_payload_is_a_transport_error() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let mut reader = FrameReader::new(rx, 50_000, 1024);
    reader.set_pending_payload(100).unwrap();

    tx.write_all(&[0u8; 40]).await.unwrap();
    drop(tx);

    let mut remaining = 100u64;
    loop {
        match reader.read_unit().await {
            Ok(Unit::Payload(chunk)) => remaining -= chunk.len() as u64,
            Err(FrameError::PayloadTruncated { remaining: left }) => {
                assert_eq!(left, remaining);
                break;
            }
            other => panic!("expected payload or PayloadTruncated, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn oversized_declared_payload_is_rejected() {
    let (_tx, rx) = tokio::io::duplex(64);
    let mut reader = FrameReader::new(rx, 50_000, 1024);

    match reader.set_pending_payload(20_000_001) {
        Err(FrameError::PayloadTooLarge { declared, limit }) => {
            assert_eq!(declared, 20_000_001);
            assert_eq!(limit, 20_000_000);
        }
        other => panic!("expected PayloadTooLarge, got {:?}", other),
    }

    // The counter must stay disarmed after the rejection.
    assert_eq!(reader.pending_payload(), 0);
}

#[tokio::test]
async fn runaway_message_without_delimiter_is_rejected() {
    let (mut tx, rx) = tokio::io::duplex(4096);
    let mut reader = FrameReader::new(rx, 512, 256);

    let writer = tokio::spawn(async move {
        let garbage = vec![b'a'; 2048];
        let _ = tx.write_all(&garbage).await;
        tx
    });

    let result = timeout(Duration::from_secs(2), reader.read_unit()).await.unwrap();
    match result {
        Err(FrameError::MessageTooLarge { limit }) => assert_eq!(limit, 512),
        other => panic!("expected MessageTooLarge, got {:?}", other),
    }

    drop(writer);
}
