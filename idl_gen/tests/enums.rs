use idl_gen::codegen::enums::Enumerator;
use idl_gen::codegen::{GeneratorOptions, generate};
use idl_gen::model::{self, Direction};

const SPICE: &str = include_str!("data/spice.yaml");

fn enum_text() -> String {
    let model = model::load(SPICE).expect("load");
    let options = GeneratorOptions {
        generate_enums: true,
        ..Default::default()
    };
    generate(&model, &options, "spice.yaml").expect("generate")
}

#[test]
fn channels_and_end_marker() {
    let text = enum_text();
    assert!(text.contains("pub const SPICE_CHANNEL_BASE: u32 = 0;"));
    assert!(text.contains("pub const SPICE_CHANNEL_MAIN: u32 = 1;"));
    assert!(text.contains("pub const SPICE_CHANNEL_DISPLAY: u32 = 2;"));
    assert!(text.contains("pub const SPICE_END_CHANNEL: u32 = 3;"));
}

#[test]
fn member_prefixed_messages_follow_explicit_value() {
    let text = enum_text();
    assert!(text.contains("pub const SPICE_MSG_DISPLAY_DRAW_FILL: u32 = 302;"));
    assert!(text.contains("pub const SPICE_MSG_DISPLAY_COPY_BITS: u32 = 303;"));
    assert!(text.contains("pub const SPICE_MSG_END_DISPLAY: u32 = 304;"));
    assert!(text.contains("pub const SPICE_MSGC_DISPLAY_INIT: u32 = 101;"));
    assert!(text.contains("pub const SPICE_MSGC_END_DISPLAY: u32 = 102;"));
}

#[test]
fn inherited_messages_stay_with_their_channel() {
    let text = enum_text();
    assert_eq!(text.matches("SPICE_MSG_SET_ACK").count(), 1);
    assert!(!text.contains("SPICE_MSG_DISPLAY_SET_ACK"));
    assert!(text.contains("pub const SPICE_MSGC_ACK_SYNC: u32 = 1;"));
}

#[test]
fn named_enums_and_flag_masks() {
    let text = enum_text();
    assert!(text.contains("pub const SPICE_CLIP_TYPE_RECTS: u8 = 1;"));
    assert!(text.contains("pub const SPICE_CLIP_TYPE_ENUM_END: u8 = 2;"));
    assert!(text.contains("pub const SPICE_MOUSE_MODE_CLIENT: u32 = 2;"));
    assert!(text.contains("pub const SPICE_MOUSE_MODE_MASK: u32 = 3;"));
}

#[test]
fn tables_cover_every_channel_direction_with_messages() {
    let model = model::load(SPICE).expect("load");
    let enumerator = Enumerator::new(&model);
    let main = model.channel("main").expect("main");
    assert!(enumerator.messages(main, Direction::Client).is_none());
    let titles: Vec<String> = enumerator.tables().into_iter().map(|t| t.title).collect();
    assert_eq!(
        titles,
        vec![
            "ClipType",
            "MouseMode",
            "channels",
            "base server messages",
            "base client messages",
            "main server messages",
            "display server messages",
            "display client messages",
        ]
    );
}
