use idl_gen::codegen::ErrorPolicy;
use idl_gen::model::Direction;
use idl_reflect::{DecodeErrorKind, DecodeOptions, ReflectError, Reflector};

const WIRE: &str = include_str!("data/wire.yaml");

fn reflector(policy: ErrorPolicy) -> Reflector {
    let mut reflector = Reflector::from_yaml(WIRE).expect("load protocol");
    reflector.set_options(DecodeOptions {
        policy,
        ..Default::default()
    });
    reflector
}

#[test]
fn silent_and_report_return_the_error() {
    for policy in [ErrorPolicy::Silent, ErrorPolicy::Report] {
        match reflector(policy).decode("main", Direction::Server, "tagged", &[2]) {
            Err(ReflectError::Decode(err)) => {
                assert_eq!(err.kind(), DecodeErrorKind::InvalidDiscriminant);
                assert_eq!(err.to_string(), "invalid discriminant at main.tagged.body");
            }
            other => panic!("{policy:?}: {other:?}"),
        }
    }
}

#[test]
#[should_panic(expected = "demarshal error: invalid discriminant at main.tagged.body")]
fn abort_panics() {
    let _ = reflector(ErrorPolicy::Abort).decode("main", Direction::Server, "tagged", &[2]);
}

#[test]
fn abort_is_quiet_on_valid_input() {
    let value = reflector(ErrorPolicy::Abort)
        .decode("main", Direction::Server, "tagged", &[1])
        .expect("valid");
    assert!(value.get("body").is_some());
}
