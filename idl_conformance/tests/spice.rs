use idl_conformance::spice::server_messages::*;
use idl_conformance::spice::{client_messages, ids};
use std::rc::Rc;

fn rect_bytes(rect: [i32; 4]) -> Vec<u8> {
    rect.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/* draw_fill whose clip points at two rects stored after the 29 byte root */
fn draw_fill_with_rects(num_rects: u32, rects: &[[i32; 4]]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&7u32.to_le_bytes());
    buf.extend(rect_bytes([0, 0, 10, 20]));
    buf.push(ids::SPICE_CLIP_TYPE_RECTS);
    buf.extend_from_slice(&29u32.to_le_bytes());
    buf.extend_from_slice(&0x00ff_00ffu32.to_le_bytes());
    buf.extend_from_slice(&num_rects.to_le_bytes());
    for rect in rects {
        buf.extend(rect_bytes(*rect));
    }
    buf
}

fn unclipped_draw_fill() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&7u32.to_le_bytes());
    buf.extend(rect_bytes([1, 2, 3, 4]));
    buf.push(ids::SPICE_CLIP_TYPE_NONE);
    buf.extend_from_slice(&9u32.to_le_bytes());
    buf
}

const RECTS: [[i32; 4]; 2] = [[0, 0, 5, 5], [5, 5, 10, 20]];

#[test]
fn identifiers() {
    assert_eq!(ids::SPICE_CHANNEL_MAIN, 1);
    assert_eq!(ids::SPICE_CHANNEL_DISPLAY, 2);
    assert_eq!(ids::SPICE_MSG_SET_ACK, 3);
    assert_eq!(ids::SPICE_MSG_DISPLAY_COPY_BITS, ids::SPICE_MSG_DISPLAY_DRAW_FILL + 1);
    assert_eq!(ids::SPICE_MSG_END_DISPLAY, 304);
    assert_eq!(ids::SPICE_MSGC_DISPLAY_INIT, 101);
    assert_eq!(ids::SPICE_MOUSE_MODE_MASK, 3);
}

#[test]
fn decodes_unclipped_draw() {
    let msg = parse_msg_display_draw_fill(&unclipped_draw_fill()).expect("decode");
    assert_eq!(msg.base.surface_id, 7);
    assert_eq!(
        msg.base.r#box,
        Rect {
            top: 1,
            left: 2,
            bottom: 3,
            right: 4
        }
    );
    assert_eq!(msg.base.clip.data, ClipData::None);
    assert_eq!(msg.color, 9);
}

#[test]
fn follows_clip_rects() {
    let msg = parse_msg_display_draw_fill(&draw_fill_with_rects(2, &RECTS)).expect("decode");
    let ClipData::Rects(Some(clip)) = &msg.base.clip.data else {
        panic!("expected clip rects, got {:?}", msg.base.clip.data);
    };
    assert_eq!(clip.num_rects, 2);
    assert_eq!(clip.rects[1].right, 20);
    assert_eq!(msg.color, 0x00ff_00ff);
}

#[test]
fn every_strict_prefix_is_truncated() {
    let full = draw_fill_with_rects(2, &RECTS);
    for len in 0..full.len() {
        assert_eq!(
            parse_msg_display_draw_fill(&full[..len]),
            Err(DemarshalError::Truncated),
            "prefix of {len} bytes"
        );
    }
}

#[test]
fn rect_count_past_end_is_truncated() {
    let buf = draw_fill_with_rects(3, &RECTS);
    assert_eq!(parse_msg_display_draw_fill(&buf), Err(DemarshalError::Truncated));
}

#[test]
fn bad_clip_type_and_offsets() {
    let mut buf = unclipped_draw_fill();
    buf[20] = 2;
    assert_eq!(parse_msg_display_draw_fill(&buf), Err(DemarshalError::InvalidEnumValue));

    /* clip rects pointing into the fixed part of the message */
    let mut buf = draw_fill_with_rects(2, &RECTS);
    buf[21..25].copy_from_slice(&4u32.to_le_bytes());
    assert_eq!(parse_msg_display_draw_fill(&buf), Err(DemarshalError::InvalidOffset));

    buf[21..25].copy_from_slice(&0u32.to_le_bytes());
    let msg = parse_msg_display_draw_fill(&buf).expect("null clip");
    assert_eq!(msg.base.clip.data, ClipData::Rects(None));
}

#[test]
fn mouse_mode_flags() {
    let mut buf = 3u32.to_le_bytes().to_vec();
    buf.extend_from_slice(&ids::SPICE_MOUSE_MODE_CLIENT.to_le_bytes());
    let msg = parse_msg_main_mouse_mode(&buf).expect("decode");
    assert_eq!(msg.current_mode, 2);

    buf[0] = 4;
    assert_eq!(parse_msg_main_mouse_mode(&buf), Err(DemarshalError::InvalidEnumValue));
}

#[test]
fn inherited_messages_dispatch_on_every_channel() {
    let mut set_ack = 5u32.to_le_bytes().to_vec();
    set_ack.extend_from_slice(&40u32.to_le_bytes());
    let expected = ServerMessage::BaseSetAck(MsgBaseSetAck {
        generation: 5,
        window: 40,
    });
    for channel in [ids::SPICE_CHANNEL_BASE, ids::SPICE_CHANNEL_MAIN, ids::SPICE_CHANNEL_DISPLAY] {
        assert_eq!(
            parse_server_message(channel, ids::SPICE_MSG_SET_ACK, &set_ack),
            Ok(expected.clone())
        );
    }
    assert_eq!(
        parse_server_message(ids::SPICE_CHANNEL_BASE, ids::SPICE_MSG_DISPLAY_DRAW_FILL, &[]),
        Err(DemarshalError::UnknownMessage)
    );
    assert_eq!(server_message_types(ids::SPICE_CHANNEL_DISPLAY), &[3, 302, 303]);
    assert_eq!(server_message_types(ids::SPICE_CHANNEL_MAIN), &[3, 103]);
}

#[test]
fn client_messages_decode_on_the_server_side() {
    let mut buf = vec![4u8];
    buf.extend_from_slice(&(-1i32).to_le_bytes());
    let decoded = client_messages::parse_client_message(
        ids::SPICE_CHANNEL_DISPLAY,
        ids::SPICE_MSGC_DISPLAY_INIT,
        &buf,
    );
    assert_eq!(
        decoded,
        Ok(client_messages::ClientMessage::DisplayInit(
            client_messages::MsgcDisplayInit {
                pixmap_cache_id: 4,
                glz_dictionary_window_size: -1,
            }
        ))
    );
    assert_eq!(client_messages::client_message_types(ids::SPICE_CHANNEL_DISPLAY), &[1, 101]);
}

#[test]
fn decoded_pointees_are_reference_counted() {
    let msg = parse_msg_display_draw_fill(&draw_fill_with_rects(1, &RECTS[..1])).expect("decode");
    let ClipData::Rects(Some(clip)) = msg.base.clip.data.clone() else {
        panic!("expected clip rects");
    };
    assert_eq!(Rc::strong_count(&clip), 2);
}
