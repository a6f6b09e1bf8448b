//! One-shot teardown: flush what credit allows, report the rest loudly.

use h2_mux::scheduler::{Abandoned, AbandonedKind};
use h2_mux::{
    Connection, ErrorCode, Frame, HeaderField, Http2Error, Role, Settings, VecSink,
    WriteScheduler,
};

use crate::data_frames;

fn setup_blocked() -> (Connection, WriteScheduler<VecSink>) {
    let mut conn = Connection::new(Role::Client, Settings::default());
    let mut events = Vec::new();
    conn.handle_frame(
        Frame::Settings {
            ack: false,
            settings: Some(Settings {
                initial_window_size: 0,
                ..Settings::default()
            }),
        },
        &mut events,
    )
    .unwrap();
    (conn, WriteScheduler::new(VecSink::default()))
}

#[test]
fn test_do_end_flushes_what_credit_allows() {
    let (mut conn, mut sched) = setup_blocked();
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    sched.data(&mut conn, 1, &[7u8; 100], false).unwrap();

    // 40 bytes of credit arrive before teardown.
    let mut events = Vec::new();
    conn.handle_frame(
        Frame::WindowUpdate {
            stream_id: 1,
            increment: 40,
        },
        &mut events,
    )
    .unwrap();

    let report = sched.do_end(&mut conn).unwrap();
    assert_eq!(report.flushed_frames, 1);
    assert_eq!(
        report.abandoned,
        vec![Abandoned {
            stream_id: 1,
            kind: AbandonedKind::Data,
            bytes: 60,
        }]
    );
    let frames = data_frames(&sched.sink().written);
    assert_eq!(frames.last().unwrap().1.len(), 40);
    assert!(sched.sink().closed);
}

#[test]
fn test_do_end_reports_every_queued_entry() {
    let (mut conn, mut sched) = setup_blocked();
    sched
        .headers(&mut conn, 1, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    sched.data(&mut conn, 1, &[1u8; 30], false).unwrap();
    // Trailers stuck behind blocked DATA.
    sched
        .headers(&mut conn, 1, vec![HeaderField::new("x-trailer", "1")], true)
        .unwrap();
    sched
        .headers(&mut conn, 3, vec![HeaderField::new(":method", "GET")], false)
        .unwrap();
    sched.data(&mut conn, 3, &[3u8; 20], true).unwrap();

    let report = sched.do_end(&mut conn).unwrap();
    assert_eq!(
        report.abandoned,
        vec![
            Abandoned {
                stream_id: 1,
                kind: AbandonedKind::Data,
                bytes: 30,
            },
            Abandoned {
                stream_id: 1,
                kind: AbandonedKind::Headers,
                bytes: 0,
            },
            Abandoned {
                stream_id: 3,
                kind: AbandonedKind::Data,
                bytes: 20,
            },
        ]
    );
}

#[test]
fn test_do_end_is_strictly_one_shot() {
    let (mut conn, mut sched) = setup_blocked();
    sched.do_end(&mut conn).unwrap();
    assert!(matches!(
        sched.do_end(&mut conn),
        Err(Http2Error::SchedulerClosed)
    ));
    // Every operation after teardown fails the same way.
    assert!(matches!(
        sched.ping_ack([0; 8]),
        Err(Http2Error::SchedulerClosed)
    ));
    assert!(matches!(
        sched.data(&mut conn, 1, b"x", false),
        Err(Http2Error::SchedulerClosed)
    ));
    assert!(matches!(
        sched.rst(&mut conn, 1, ErrorCode::Cancel),
        Err(Http2Error::SchedulerClosed)
    ));
}

#[test]
fn test_goaway_then_teardown() {
    let (mut conn, mut sched) = setup_blocked();
    sched
        .goaway(&mut conn, ErrorCode::NoError, b"shutting down".to_vec())
        .unwrap();
    assert!(conn.is_closing());

    let report = sched.do_end(&mut conn).unwrap();
    assert!(report.abandoned.is_empty());

    let frames = crate::frames_on_wire(&sched.sink().written);
    match frames.last().unwrap() {
        Frame::GoAway {
            error_code,
            debug_data,
            ..
        } => {
            assert_eq!(*error_code, ErrorCode::NoError);
            assert_eq!(debug_data, b"shutting down");
        }
        other => panic!("expected GOAWAY, got {other:?}"),
    }
}
