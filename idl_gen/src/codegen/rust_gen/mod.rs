pub mod demarshal;
pub mod helpers;
pub mod runtime;

use super::shared::ir::DemarshalIr;
use super::writer::CodeWriter;
use super::{ErrorPolicy, GenerateError};
use crate::model::Direction;
use demarshal::{DemarshalEmitter, MessageEntry};
use std::collections::BTreeMap;

/// Writes the decoder module for every message of `directions`.
///
/// Layout: runtime prelude, then types and readers, then one dispatch
/// function and one message-type table per direction.
pub fn emit_demarshallers(
    ir: &DemarshalIr,
    directions: &[Direction],
    policy: ErrorPolicy,
    w: &mut CodeWriter,
) -> Result<(), GenerateError> {
    let mut emitter = DemarshalEmitter::new(ir);
    let mut dispatch = CodeWriter::new();

    for &direction in directions {
        let mut routes = Vec::new();
        for message in ir.messages.iter().filter(|m| m.direction == direction) {
            let entry = emitter.emit_message(message)?;
            for &channel in &message.channel_values {
                routes.push(Route {
                    channel: u32_value(channel, &message.channel)?,
                    message: u32_value(message.value, &message.name)?,
                    entry: entry_ref(&entry),
                });
            }
        }
        emit_dispatch(&mut dispatch, direction, &routes)?;
    }

    let (items, caches) = emitter.finish();
    runtime::emit_prelude(w, policy, &caches)?;
    w.append(&items)?;
    w.append(&dispatch)?;
    Ok(())
}

struct Route {
    channel: u32,
    message: u32,
    entry: (String, String, String),
}

fn entry_ref(entry: &MessageEntry) -> (String, String, String) {
    (
        entry.variant.clone(),
        entry.type_name.clone(),
        entry.parse_fn.clone(),
    )
}

fn u32_value(value: u64, symbol: &str) -> Result<u32, GenerateError> {
    u32::try_from(value).map_err(|_| GenerateError::ValueTooLarge {
        symbol: symbol.to_string(),
        value,
        int_type: "u32".to_string(),
    })
}

fn emit_dispatch(
    w: &mut CodeWriter,
    direction: Direction,
    routes: &[Route],
) -> Result<(), GenerateError> {
    let (enum_name, parse_fn, types_fn) = match direction {
        Direction::Server => (
            "ServerMessage",
            "parse_server_message",
            "server_message_types",
        ),
        Direction::Client => (
            "ClientMessage",
            "parse_client_message",
            "client_message_types",
        ),
    };

    // Variants are keyed by the declaring channel, so inherited messages
    // share one variant across carriers.
    let mut variants: BTreeMap<&str, &str> = BTreeMap::new();
    for route in routes {
        variants.insert(&route.entry.0, &route.entry.1);
    }

    w.line(format!("/// Any decoded {direction} message."))?;
    w.line("#[derive(Debug, Clone, PartialEq, Eq)]")?;
    w.open(format!("pub enum {enum_name}"))?;
    for (variant, ty) in &variants {
        w.line(format!("{variant}({ty}),"))?;
    }
    w.close("")?;
    w.blank()?;

    w.line("#[allow(unreachable_patterns)]")?;
    w.open(format!(
        "pub fn {parse_fn}(channel: u32, msg_type: u32, buf: &[u8]) -> Result<{enum_name}, DemarshalError>"
    ))?;
    w.open("match (channel, msg_type)")?;
    for route in routes {
        let (variant, _, parse) = &route.entry;
        w.line(format!(
            "({}, {}) => {parse}(buf).map({enum_name}::{variant}),",
            route.channel, route.message
        ))?;
    }
    w.line("_ => Err(DemarshalError::UnknownMessage),")?;
    w.close("")?;
    w.close("")?;
    w.blank()?;

    let mut by_channel: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for route in routes {
        by_channel.entry(route.channel).or_default().push(route.message);
    }
    w.line("/// Message types decodable on a channel, ascending.")?;
    w.open(format!("pub fn {types_fn}(channel: u32) -> &'static [u32]"))?;
    w.open("match channel")?;
    for (channel, mut values) in by_channel {
        values.sort_unstable();
        values.dedup();
        let list: Vec<String> = values.iter().map(u32::to_string).collect();
        w.line(format!("{channel} => &[{}],", list.join(", ")))?;
    }
    w.line("_ => &[],")?;
    w.close("")?;
    w.close("")?;
    w.blank()?;
    Ok(())
}
