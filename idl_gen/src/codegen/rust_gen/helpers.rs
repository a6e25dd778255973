/* Helper utilities for Rust code generation */

use heck::{ToSnakeCase, ToUpperCamelCase};
use idl_types::{ByteOrder, IntegralType};

/* Escape Rust keywords to valid identifiers */
pub fn escape_rust_keyword(name: &str) -> String {
    const RUST_KEYWORDS: &[&str] = &[
        "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn",
        "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
        "return", "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe",
        "use", "where", "while", "async", "await", "dyn", "abstract", "become", "box", "do",
        "final", "macro", "override", "priv", "typeof", "unsized", "virtual", "yield", "try",
    ];

    if RUST_KEYWORDS.contains(&name) {
        format!("r#{}", name)
    } else {
        name.to_string()
    }
}

/* Struct field name */
pub fn field_ident(name: &str) -> String {
    escape_rust_keyword(&name.to_snake_case())
}

/* Local holding a decoded field; siblings refer to it by the same rule */
pub fn local_ident(name: &str) -> String {
    format!("f_{}", name.to_snake_case())
}

pub fn type_ident(name: &str) -> String {
    name.to_upper_camel_case()
}

pub fn fn_ident(name: &str) -> String {
    name.to_snake_case()
}

/* Unsigned type of the same width, used to compare raw bit patterns */
pub fn unsigned_name(int_type: IntegralType) -> &'static str {
    match int_type.width() {
        1 => "u8",
        2 => "u16",
        4 => "u32",
        _ => "u64",
    }
}

pub fn from_bytes_fn(int_type: IntegralType) -> &'static str {
    match int_type.byte_order() {
        ByteOrder::Little => "from_le_bytes",
        ByteOrder::Big => "from_be_bytes",
    }
}

/* Expression giving the zero-extended bits of an integer local as u64 */
pub fn bits_expr(var: &str, int_type: IntegralType) -> String {
    if int_type.is_signed() {
        format!("{var} as {} as u64", unsigned_name(int_type))
    } else if int_type == IntegralType::U64 || int_type == IntegralType::U64Be {
        var.to_string()
    } else {
        format!("{var} as u64")
    }
}

/* Match pattern for a set of values, `0 | 1 | 5` */
pub fn pattern(values: &[u64]) -> String {
    values
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}
