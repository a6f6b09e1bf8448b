//! End-to-end scenario: a stream of HEADERS, DATA, and SETTINGS-ack frames
//! dispatched through the decoder and the connection layer.

use h2_mux::{
    Connection, ConnectionEvent, Frame, FrameDecoder, HeaderField, Region, Role, Settings,
    SliceMemory,
};

/// HEADERS for stream 3: three static-table pseudo-headers plus one
/// literal-with-incremental-indexing :authority, then 31 bytes of DATA for
/// stream 5, then a SETTINGS ack.
fn scenario_bytes() -> Vec<u8> {
    let mut fragment = vec![0x82, 0x86, 0x84]; // :method GET, :scheme http, :path /
    fragment.extend_from_slice(&[0x41, 0x0f]); // incremental literal, name index 1
    fragment.extend_from_slice(b"www.example.com");

    let mut bytes = Vec::new();
    Frame::Headers {
        stream_id: 3,
        fragment,
        end_stream: false,
        end_headers: true,
        priority: None,
    }
    .encode(&mut bytes);
    Frame::Data {
        stream_id: 5,
        payload: vec![0x42; 31],
        end_stream: false,
    }
    .encode(&mut bytes);
    Frame::Settings {
        ack: true,
        settings: None,
    }
    .encode(&mut bytes);
    bytes
}

#[test]
fn test_three_events_in_order_for_any_chunking() {
    let bytes = scenario_bytes();
    for chunk in 1..=bytes.len() {
        let mut decoder = FrameDecoder::without_preface(16_384);
        let mut mem = SliceMemory::new(bytes.clone());
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let n = chunk.min(bytes.len() - pos);
            frames.extend(
                decoder
                    .decode(&[Region::new(pos as u64, n as u32, 1)], &mut mem)
                    .unwrap(),
            );
            pos += n;
        }
        assert_eq!(frames.len(), 3, "chunk size {chunk}");
        assert!(matches!(frames[0], Frame::Headers { stream_id: 3, .. }));
        match &frames[1] {
            Frame::Data {
                stream_id, payload, ..
            } => {
                assert_eq!(*stream_id, 5);
                assert_eq!(payload.len(), 31);
            }
            other => panic!("expected DATA, got {other:?}"),
        }
        assert!(matches!(frames[2], Frame::Settings { ack: true, .. }));
    }
}

#[test]
fn test_connection_decompresses_the_header_block() {
    // Same HEADERS block folded through a server connection: the literal
    // :authority decodes and the three pseudo-headers resolve from the
    // static table.
    let mut fragment = vec![0x82, 0x86, 0x84, 0x41, 0x0f];
    fragment.extend_from_slice(b"www.example.com");
    let mut bytes = h2_mux::frame::CONNECTION_PREFACE.to_vec();
    Frame::Headers {
        stream_id: 3,
        fragment,
        end_stream: false,
        end_headers: true,
        priority: None,
    }
    .encode(&mut bytes);
    Frame::Data {
        stream_id: 3,
        payload: vec![0x42; 31],
        end_stream: true,
    }
    .encode(&mut bytes);

    let mut conn = Connection::new(Role::Server, Settings::default());
    let mut mem = SliceMemory::new(bytes.clone());
    let events = conn
        .receive(&[Region::new(0, bytes.len() as u32, 1)], &mut mem)
        .unwrap();

    assert_eq!(events.len(), 2);
    match &events[0] {
        ConnectionEvent::Headers {
            stream_id, headers, ..
        } => {
            assert_eq!(*stream_id, 3);
            assert_eq!(
                headers,
                &[
                    HeaderField::new(":method", "GET"),
                    HeaderField::new(":scheme", "http"),
                    HeaderField::new(":path", "/"),
                    HeaderField::new(":authority", "www.example.com"),
                ]
            );
        }
        other => panic!("expected Headers, got {other:?}"),
    }
    assert!(matches!(
        events[1],
        ConnectionEvent::Data {
            stream_id: 3,
            end_stream: true,
            ..
        }
    ));
}
