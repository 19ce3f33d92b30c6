//! Chunking invariance of the frame reassembler.

use proptest::prelude::*;

use peer_review_chat::protocol::StreamEvent;
use peer_review_chat::reassembler::FrameReassembler;

/// Frames covering ASCII, multi-byte text, emoji, a comment line, a frame
/// without the data prefix and a payload that is not JSON.
fn sample_body() -> Vec<u8> {
    [
        ": keep-alive\n\n",
        "data: {\"type\":\"status\",\"data\":\"Collecting initial answers\"}\n\n",
        "data: {\"type\":\"status\",\"data\":\"正在进行交叉评审 🔍\"}\n\n",
        "event: ping\n\n",
        "data: {not json}\n\n",
        "data: {\"type\":\"initial_answer_complete\",\"model_name\":\"acme::m1\",\"answer\":\"ça va\"}\n\n",
        "data: {\"type\":\"heartbeat\"}\n\n",
        "data: {\"type\":\"final_result\",\"data\":{\"best_answer\":\"答案：42 ✅\",\"process_details\":null}}\n\n",
    ]
    .concat()
    .into_bytes()
}

fn decode_whole(body: &[u8]) -> Vec<StreamEvent> {
    let mut r = FrameReassembler::new();
    r.feed(body)
}

fn decode_split(body: &[u8], cuts: &[usize]) -> (Vec<StreamEvent>, usize) {
    let mut r = FrameReassembler::new();
    let mut events = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        events.extend(r.feed(&body[start..cut]));
        start = cut;
    }
    events.extend(r.feed(&body[start..]));
    (events, r.malformed_frames())
}

#[test]
fn test_sample_body_decodes_expected_sequence() {
    let events = decode_whole(&sample_body());
    assert_eq!(events.len(), 5);
    assert_eq!(
        events[1],
        StreamEvent::Status {
            data: "正在进行交叉评审 🔍".to_string()
        }
    );
    assert_eq!(events[3], StreamEvent::Unknown);
    match &events[4] {
        StreamEvent::FinalResult { data } => {
            assert_eq!(data.best_answer, "答案：42 ✅");
            assert!(data.process_details.is_empty());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_byte_at_a_time_matches_whole() {
    let body = sample_body();
    let cuts: Vec<usize> = (1..body.len()).collect();
    let (events, malformed) = decode_split(&body, &cuts);
    assert_eq!(events, decode_whole(&body));
    assert_eq!(malformed, 1);
}

proptest! {
    #[test]
    fn prop_any_chunking_yields_same_events(raw_cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..24)) {
        let body = sample_body();
        let mut cuts: Vec<usize> = raw_cuts.iter().map(|i| i.index(body.len())).collect();
        cuts.sort_unstable();
        cuts.dedup();

        let (events, malformed) = decode_split(&body, &cuts);
        prop_assert_eq!(events, decode_whole(&body));
        prop_assert_eq!(malformed, 1);
    }

    #[test]
    fn prop_status_text_survives_splitting(text in "[a-z0-9 ä漢字🙂]{0,40}", cut in any::<prop::sample::Index>()) {
        let payload = serde_json::json!({ "type": "status", "data": &text }).to_string();
        let body = format!("data: {payload}\n\n").into_bytes();
        let (events, _) = decode_split(&body, &[cut.index(body.len())]);
        prop_assert_eq!(events, vec![StreamEvent::Status { data: text }]);
    }
}
