use telepack::ObjectId;
use telepack::RemoteFault;
use telepack::Value;

use crate::*;

// ============================================================================
//  ACTION VOCABULARY
// ============================================================================

const ALL_ACTIONS: [Action; 15] = [
    Action::Test,
    Action::Initiate,
    Action::Getattr,
    Action::Setattr,
    Action::Getitem,
    Action::Setitem,
    Action::Call,
    Action::Len,
    Action::Str,
    Action::Repr,
    Action::Del,
    Action::Isinstance,
    Action::Issubclass,
    Action::Import,
    Action::Shutdown,
];

#[test]
fn test_action_tags_roundtrip() -> Result<()> {
    for action in ALL_ACTIONS {
        assert_eq!(Action::parse(action.as_str())?, action);
    }
    Ok(())
}

#[test]
fn test_unknown_action_rejected() {
    match Action::parse("teleport") {
        Err(Error::UnknownAction(name)) => assert_eq!(name, "teleport"),
        other => panic!("Expected UnknownAction, got {:?}", other),
    }
}

// ============================================================================
//  FRAMES
// ============================================================================

fn frame_roundtrip(frame: Frame) -> Result<()> {
    let bytes = frame.encode()?;
    assert_eq!(Frame::decode(&bytes)?, frame);
    Ok(())
}

#[test]
fn test_request_roundtrip() -> Result<()> {
    frame_roundtrip(Frame::Request(Request::new(
        Action::Getattr,
        ObjectId(3),
        Some(Value::Text("width".into())),
    )))
}

#[test]
fn test_request_without_parameters() -> Result<()> {
    frame_roundtrip(Frame::Request(Request::new(Action::Len, ObjectId(0), None)))
}

#[test]
fn test_request_against_globals() -> Result<()> {
    frame_roundtrip(Frame::Request(Request::new(
        Action::Getitem,
        ObjectId::GLOBALS,
        Some(Value::Text("app".into())),
    )))
}

#[test]
fn test_response_roundtrip() -> Result<()> {
    frame_roundtrip(Frame::Response(Value::List(vec![
        Value::Int(1),
        Value::Ref(ObjectId(12)),
    ])))
}

#[test]
fn test_fault_response_is_a_plain_response() -> Result<()> {
    frame_roundtrip(Frame::Response(Value::Fault(RemoteFault::new(
        "RuntimeError",
        "boom",
    ))))
}

#[test]
fn test_part_frames_roundtrip() -> Result<()> {
    frame_roundtrip(Frame::Part { part: 2, part_count: 5, data: vec![9; 64] })?;
    frame_roundtrip(Frame::PartRequest { part: 3 })
}

#[test]
fn test_unknown_frame_byte() {
    match Frame::decode(&[0x7F]) {
        Err(Error::UnknownFrame(0x7F)) => {}
        other => panic!("Expected UnknownFrame, got {:?}", other),
    }
}

#[test]
fn test_frame_rejects_trailing_bytes() {
    let mut bytes = Frame::PartRequest { part: 1 }.encode().unwrap();
    bytes.push(0xAA);
    match Frame::decode(&bytes) {
        Err(Error::Pack(telepack::Error::TrailingBytes(1))) => {}
        other => panic!("Expected TrailingBytes, got {:?}", other),
    }
}

#[test]
fn test_part_index_out_of_range() {
    let bytes = Frame::Part { part: 5, part_count: 5, data: vec![] }
        .encode()
        .unwrap();
    match Frame::decode(&bytes) {
        Err(Error::ProtocolViolation(_)) => {}
        other => panic!("Expected ProtocolViolation, got {:?}", other),
    }
}

// ============================================================================
//  CHUNK SPLITTING + REASSEMBLY
// ============================================================================

fn drive(parts: Vec<Frame>) -> Result<Vec<u8>> {
    let mut assembly = Reassembly::new();
    let mut result = None;
    for frame in parts {
        let Frame::Part { part, part_count, data } = frame else {
            panic!("split_frame produced a non-part frame");
        };
        match assembly.offer(part, part_count, &data)? {
            Progress::Complete(bytes) => result = Some(bytes),
            Progress::Expect(next) => assert_eq!(next, part + 1),
        }
    }
    Ok(result.expect("transfer never completed"))
}

#[test]
fn test_split_exact_multiple() -> Result<()> {
    let payload = vec![7u8; 4 * 100];
    let parts = split_frame(&payload, 100);
    assert_eq!(parts.len(), 4);
    assert_eq!(drive(parts)?, payload);
    Ok(())
}

#[test]
fn test_split_with_remainder() -> Result<()> {
    // k * limit + r bytes split into k + 1 parts.
    let payload: Vec<u8> = (0..(3 * 64 + 17)).map(|i| i as u8).collect();
    let parts = split_frame(&payload, 64);
    assert_eq!(parts.len(), 4);
    assert_eq!(drive(parts)?, payload);
    Ok(())
}

#[test]
fn test_split_small_payload_is_one_part() -> Result<()> {
    let payload = vec![1u8, 2, 3];
    let parts = split_frame(&payload, 64);
    assert_eq!(parts.len(), 1);
    assert_eq!(drive(parts)?, payload);
    Ok(())
}

#[test]
fn test_split_large_random_payload() -> Result<()> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let payload: Vec<u8> = (0..20_000).map(|_| rng.r#gen()).collect();
    let parts = split_frame(&payload, 2048);
    assert_eq!(parts.len(), 10);
    assert_eq!(drive(parts)?, payload);
    Ok(())
}

#[test]
fn test_reassembly_rejects_out_of_order_part() {
    let mut assembly = Reassembly::new();
    assembly.offer(0, 3, &[1]).unwrap();
    match assembly.offer(2, 3, &[3]) {
        Err(Error::UnexpectedPart { expected: 1, got: 2 }) => {}
        other => panic!("Expected UnexpectedPart, got {:?}", other),
    }
}

#[test]
fn test_reassembly_rejects_tail_without_head() {
    let mut assembly = Reassembly::new();
    match assembly.offer(1, 3, &[1]) {
        Err(Error::UnexpectedPart { expected: 0, got: 1 }) => {}
        other => panic!("Expected UnexpectedPart, got {:?}", other),
    }
}

#[test]
fn test_reassembly_restart_discards_partial_buffer() -> Result<()> {
    let mut assembly = Reassembly::new();
    assembly.offer(0, 3, &[0xDE, 0xAD])?;
    // A fresh part 0 abandons the old transfer entirely.
    assembly.offer(0, 2, &[1, 2])?;
    match assembly.offer(1, 2, &[3])? {
        Progress::Complete(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
        other => panic!("Expected Complete, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_reassembly_rejects_changed_part_count() {
    let mut assembly = Reassembly::new();
    assembly.offer(0, 3, &[1]).unwrap();
    match assembly.offer(1, 4, &[2]) {
        Err(Error::ProtocolViolation(_)) => {}
        other => panic!("Expected ProtocolViolation, got {:?}", other),
    }
}

// ============================================================================
//  PART STORE
// ============================================================================

#[test]
fn test_part_store_serves_in_any_order() -> Result<()> {
    let payload = vec![5u8; 300];
    let parts = split_frame(&payload, 100);
    let mut store = PartStore::new();

    let first = store.load(parts)?;
    assert!(matches!(first, Frame::Part { part: 0, .. }));

    let second = store.take(1)?;
    assert!(matches!(second, Frame::Part { part: 1, .. }));
    let third = store.take(2)?;
    assert!(matches!(third, Frame::Part { part: 2, .. }));
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn test_part_store_consumes_served_parts() {
    let parts = split_frame(&[0u8; 200], 100);
    let mut store = PartStore::new();
    store.load(parts).unwrap();
    store.take(1).unwrap();
    match store.take(1) {
        Err(Error::PartNotStored(1)) => {}
        other => panic!("Expected PartNotStored, got {:?}", other),
    }
}

#[test]
fn test_part_store_rejects_unknown_index() {
    let mut store = PartStore::new();
    match store.take(7) {
        Err(Error::PartNotStored(7)) => {}
        other => panic!("Expected PartNotStored, got {:?}", other),
    }
}
