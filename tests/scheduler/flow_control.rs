//! Window accounting, deferral, and resumption behavior.

use h2_mux::{
    Connection, Frame, HeaderField, Role, Settings, VecSink, WriteScheduler,
};

use crate::{data_frames, frames_on_wire};

fn setup() -> (Connection, WriteScheduler<VecSink>) {
    (
        Connection::new(Role::Client, Settings::default()),
        WriteScheduler::new(VecSink::default()),
    )
}

/// Apply peer SETTINGS directly, as if a SETTINGS frame had been decoded.
fn peer_settings(conn: &mut Connection, settings: Settings) {
    let mut events = Vec::new();
    conn.handle_frame(
        Frame::Settings {
            ack: false,
            settings: Some(settings),
        },
        &mut events,
    )
    .unwrap();
}

fn peer_window_update(conn: &mut Connection, stream_id: u32, increment: u32) {
    let mut events = Vec::new();
    conn.handle_frame(
        Frame::WindowUpdate {
            stream_id,
            increment,
        },
        &mut events,
    )
    .unwrap();
}

#[test]
fn test_no_data_while_window_negative_after_settings_decrease() {
    let (mut conn, mut sched) = setup();
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    assert!(sched.data(&mut conn, 1, &[1u8; 10], false).unwrap());

    // The peer shrinks the initial window to zero: 10 bytes already spent
    // leaves the stream at -10.
    peer_settings(
        &mut conn,
        Settings {
            initial_window_size: 0,
            ..Settings::default()
        },
    );
    assert_eq!(conn.stream(1).unwrap().send_window.available(), -10);

    let before = data_frames(&sched.sink().written).len();
    assert!(!sched.data(&mut conn, 1, &[2u8; 100], false).unwrap());
    assert_eq!(data_frames(&sched.sink().written).len(), before);

    // Back to zero: still nothing may go out.
    peer_window_update(&mut conn, 1, 10);
    assert_eq!(sched.on_stream_window(&mut conn, 1).unwrap(), 0);
    assert_eq!(data_frames(&sched.sink().written).len(), before);

    // Positive credit releases the queue.
    peer_window_update(&mut conn, 1, 100);
    assert!(sched.on_stream_window(&mut conn, 1).unwrap() > 0);
    let frames = data_frames(&sched.sink().written);
    let sent: usize = frames[before..].iter().map(|(_, p, _)| p.len()).sum();
    assert_eq!(sent, 100);
    assert!(!sched.has_pending(1));
}

#[test]
fn test_partial_send_respects_connection_window() {
    let (mut conn, mut sched) = setup();
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    // Drain the connection window down to 1000 while the stream window
    // stays full.
    conn.consume_send(1, 64_535).unwrap();
    peer_window_update(&mut conn, 1, 64_535);

    assert!(!sched.data(&mut conn, 1, &[3u8; 5000], true).unwrap());
    let frames = data_frames(&sched.sink().written);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1.len(), 1000);
    assert!(!frames[0].2, "END_STREAM only on the final chunk");
    assert_eq!(sched.pending_bytes(1), 4000);

    peer_window_update(&mut conn, 0, 4000);
    sched.on_window(&mut conn).unwrap();
    let frames = data_frames(&sched.sink().written);
    let total: usize = frames.iter().map(|(_, p, _)| p.len()).sum();
    assert_eq!(total, 5000);
    assert!(frames.last().unwrap().2, "END_STREAM on the final chunk");
}

#[test]
fn test_emission_chunked_by_max_frame_size() {
    let (mut conn, mut sched) = setup();
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    peer_window_update(&mut conn, 0, 100_000);
    peer_window_update(&mut conn, 1, 100_000);

    assert!(sched.data(&mut conn, 1, &[4u8; 40_000], true).unwrap());
    let frames = data_frames(&sched.sink().written);
    assert!(frames.len() >= 3);
    for (_, payload, _) in &frames {
        assert!(payload.len() <= 16_384);
    }
    let total: usize = frames.iter().map(|(_, p, _)| p.len()).sum();
    assert_eq!(total, 40_000);
}

#[test]
fn test_round_robin_across_blocked_streams() {
    let (mut conn, mut sched) = setup();
    // Streams start with zero credit so everything defers.
    peer_settings(
        &mut conn,
        Settings {
            initial_window_size: 0,
            ..Settings::default()
        },
    );
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    sched
        .headers(&mut conn, 3, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    assert!(!sched.data(&mut conn, 1, &[0x11; 50], false).unwrap());
    assert!(!sched.data(&mut conn, 3, &[0x33; 50], false).unwrap());

    peer_window_update(&mut conn, 1, 20);
    peer_window_update(&mut conn, 3, 20);
    sched.on_window(&mut conn).unwrap();

    let frames = data_frames(&sched.sink().written);
    assert_eq!(frames.len(), 2);
    // Round-robin serves stream 1 first, then stream 3; each emits exactly
    // its 20 bytes of credit.
    assert_eq!(frames[0].0, 1);
    assert_eq!(frames[0].1, vec![0x11; 20]);
    assert_eq!(frames[1].0, 3);
    assert_eq!(frames[1].1, vec![0x33; 20]);
    assert_eq!(sched.pending_bytes(1), 30);
    assert_eq!(sched.pending_bytes(3), 30);
}

#[test]
fn test_deferred_payload_survives_staging_spill() {
    let (mut conn, mut sched) = setup();
    peer_settings(
        &mut conn,
        Settings {
            initial_window_size: 0,
            ..Settings::default()
        },
    );
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();

    // 100_000 bytes exceed the staging ring; the overflow spills to the
    // heap but must come back out in order.
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    assert!(!sched.data(&mut conn, 1, &payload, true).unwrap());
    assert_eq!(sched.pending_bytes(1), payload.len());

    peer_window_update(&mut conn, 0, 100_000);
    peer_window_update(&mut conn, 1, 100_000);
    sched.on_window(&mut conn).unwrap();

    let frames = data_frames(&sched.sink().written);
    let mut reassembled = Vec::new();
    for (stream_id, chunk, _) in &frames {
        assert_eq!(*stream_id, 1);
        reassembled.extend_from_slice(chunk);
    }
    assert_eq!(reassembled, payload);
    assert!(frames.last().unwrap().2);
    assert!(!sched.has_pending(1));
}

#[test]
fn test_drained_entry_ends_stream_without_empty_tail_frame() {
    let (mut conn, mut sched) = setup();
    peer_settings(
        &mut conn,
        Settings {
            initial_window_size: 0,
            ..Settings::default()
        },
    );
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    assert!(!sched.data(&mut conn, 1, &[9u8; 500], true).unwrap());

    // Enough credit to drain the whole entry in one frame.
    peer_window_update(&mut conn, 1, 1000);
    sched.on_window(&mut conn).unwrap();

    let frames = data_frames(&sched.sink().written);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1.len(), 500);
    assert!(frames[0].2, "END_STREAM rides the final data frame");
    assert!(!sched.has_pending(1));
}

#[test]
fn test_trailers_queued_behind_data_keep_issue_order() {
    let (mut conn, mut sched) = setup();
    peer_settings(
        &mut conn,
        Settings {
            initial_window_size: 0,
            ..Settings::default()
        },
    );
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "POST")], false)
        .unwrap();
    assert!(!sched.data(&mut conn, 1, &[5u8; 40], false).unwrap());
    // Trailers issued while DATA is still queued must not overtake it.
    assert!(!sched
        .headers(
            &mut conn,
            1,
            vec![HeaderField::new("grpc-status", "0")],
            true,
        )
        .unwrap());

    peer_window_update(&mut conn, 1, 40);
    sched.on_window(&mut conn).unwrap();

    let kinds: Vec<&'static str> = frames_on_wire(&sched.sink().written)
        .iter()
        .map(|f| match f {
            Frame::Headers { .. } => "headers",
            Frame::Data { .. } => "data",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["headers", "data", "headers"]);
}

#[test]
fn test_rst_cancels_one_stream_only() {
    let (mut conn, mut sched) = setup();
    peer_settings(
        &mut conn,
        Settings {
            initial_window_size: 0,
            ..Settings::default()
        },
    );
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    sched
        .headers(&mut conn, 3, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    sched.data(&mut conn, 1, &[0x11; 500], false).unwrap();
    sched.data(&mut conn, 3, &[0x33; 500], true).unwrap();

    sched
        .rst(&mut conn, 1, h2_mux::ErrorCode::Cancel)
        .unwrap();
    assert!(!sched.has_pending(1));
    assert!(sched.has_pending(3));

    peer_window_update(&mut conn, 0, 1000);
    peer_window_update(&mut conn, 3, 1000);
    sched.on_window(&mut conn).unwrap();

    let frames = data_frames(&sched.sink().written);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, 3);
    assert_eq!(frames[0].1, vec![0x33; 500]);
}
