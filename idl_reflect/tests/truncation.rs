use idl_gen::model::Direction;
use idl_reflect::{DecodeErrorKind, ReflectError, Reflector};

const WIRE: &str = include_str!("data/wire.yaml");

fn valid_encodings() -> Vec<(&'static str, Vec<u8>)> {
    let mut pair = Vec::new();
    for word in [8u32, 8, 5, 6] {
        pair.extend_from_slice(&word.to_le_bytes());
    }
    let mut chain = Vec::new();
    for word in [4u32, 9, 12, 10, 0] {
        chain.extend_from_slice(&word.to_le_bytes());
    }
    vec![
        ("list", vec![2, 0, 0, 0, 1, 0, 2, 0]),
        ("tagged", vec![0, 7, 0]),
        ("shaped", vec![0, 4, 0, 1, 0, 0, 0, 2, 0, 0, 0]),
        ("pair", pair),
        ("chain", chain),
        ("signed", vec![1, 0, 0, 0, 9, 0, 0, 0, 0]),
        ("huge", vec![1, 0, 0, 0, 0, 0, 0, 0, 3, 0]),
        ("big_endian", vec![0, 0, 1, 2]),
    ]
}

#[test]
fn every_strict_prefix_is_truncated() {
    let reflector = Reflector::from_yaml(WIRE).expect("load protocol");
    for (message, bytes) in valid_encodings() {
        reflector
            .decode("main", Direction::Server, message, &bytes)
            .unwrap_or_else(|err| panic!("{message} should decode: {err}"));
        for len in 0..bytes.len() {
            match reflector.decode("main", Direction::Server, message, &bytes[..len]) {
                Err(ReflectError::Decode(err)) => assert_eq!(
                    err.kind(),
                    DecodeErrorKind::Truncated,
                    "{message} prefix of {len} bytes: {err}"
                ),
                other => panic!("{message} prefix of {len} bytes: {other:?}"),
            }
        }
    }
}

#[test]
fn arbitrary_bytes_never_panic() {
    let reflector = Reflector::from_yaml(WIRE).expect("load protocol");
    let plans: Vec<_> = reflector.ir().messages.iter().collect();
    /* deterministic byte soup */
    let mut state = 0x2545_f491_u32;
    for round in 0..512usize {
        let len = round % 40;
        let buf: Vec<u8> = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            })
            .collect();
        for plan in &plans {
            let _ = reflector.demarshaller().decode_message(plan, &buf);
        }
    }
}
