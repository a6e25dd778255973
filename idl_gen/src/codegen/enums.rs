//! Enumerator: stable symbolic identifiers for channels, messages and named
//! enums.
//!
//! Symbols are the protocol name, a kind marker, the channel member name and
//! the entry name, upper snake case, joined with `_`. Server messages use the
//! `MSG` marker and client messages `MSGC`, so both directions may reuse a
//! name. Only a channel's own messages are listed; inherited ones keep the
//! symbols of the channel that declares them.

use super::writer::CodeWriter;
use super::GenerateError;
use crate::model::{Channel, Direction, NamedKind, ProtocolModel};
use heck::ToShoutySnakeCase;
use idl_types::IntegralType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    pub symbol: String,
    pub value: u64,
}

/// One block of related constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumTable {
    pub title: String,
    pub int_type: IntegralType,
    pub entries: Vec<EnumEntry>,
}

pub struct Enumerator<'a> {
    model: &'a ProtocolModel,
    prefix: String,
}

impl<'a> Enumerator<'a> {
    pub fn new(model: &'a ProtocolModel) -> Self {
        Self {
            model,
            prefix: model.name.to_shouty_snake_case(),
        }
    }

    /// Joins the protocol prefix and `parts` into one upper snake symbol.
    pub fn symbol(&self, parts: &[&str]) -> String {
        std::iter::once(self.prefix.clone())
            .chain(
                parts
                    .iter()
                    .filter(|p| !p.is_empty())
                    .map(|p| p.to_shouty_snake_case()),
            )
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Channel identifiers followed by the end marker.
    pub fn channels(&self) -> EnumTable {
        let mut entries: Vec<EnumEntry> = self
            .model
            .channels
            .iter()
            .map(|c| EnumEntry {
                symbol: self.symbol(&["CHANNEL", &c.name]),
                value: c.value,
            })
            .collect();
        let end = entries.last().map_or(0, |e| e.value.saturating_add(1));
        entries.push(EnumEntry {
            symbol: self.symbol(&["END_CHANNEL"]),
            value: end,
        });
        EnumTable {
            title: "channels".to_string(),
            int_type: IntegralType::U32,
            entries,
        }
    }

    /// Message identifiers of one channel and direction; `None` when the
    /// channel declares no messages in that direction.
    pub fn messages(&self, channel: &Channel, direction: Direction) -> Option<EnumTable> {
        let own = channel.own_messages(direction);
        if own.is_empty() {
            return None;
        }
        let marker = match direction {
            Direction::Server => "MSG",
            Direction::Client => "MSGC",
        };
        let member = channel.member_name.as_deref().unwrap_or("");
        let mut entries: Vec<EnumEntry> = own
            .iter()
            .map(|m| EnumEntry {
                symbol: self.symbol(&[marker, member, &m.name]),
                value: m.value,
            })
            .collect();
        if !member.is_empty() {
            let end = entries.last().map_or(0, |e| e.value.saturating_add(1));
            entries.push(EnumEntry {
                symbol: self.symbol(&[marker, "END", member]),
                value: end,
            });
        }
        Some(EnumTable {
            title: format!("{} {direction} messages", channel.name),
            int_type: IntegralType::U32,
            entries,
        })
    }

    /// Members of every named enum, with an end marker (or mask for flag sets).
    pub fn named_enums(&self) -> Vec<EnumTable> {
        self.model
            .types
            .values()
            .filter_map(|named| {
                let NamedKind::Enum(def) = &named.kind else {
                    return None;
                };
                let mut entries: Vec<EnumEntry> = def
                    .members
                    .iter()
                    .map(|m| EnumEntry {
                        symbol: self.symbol(&[&named.name, &m.name]),
                        value: m.value,
                    })
                    .collect();
                if def.flags {
                    entries.push(EnumEntry {
                        symbol: self.symbol(&[&named.name, "MASK"]),
                        value: def.mask(),
                    });
                } else {
                    let end = entries.last().map_or(0, |e| e.value.saturating_add(1));
                    entries.push(EnumEntry {
                        symbol: self.symbol(&[&named.name, "ENUM_END"]),
                        value: end,
                    });
                }
                Some(EnumTable {
                    title: named.name.clone(),
                    int_type: def.base,
                    entries,
                })
            })
            .collect()
    }

    /// Every table in output order: named enums, channels, then each
    /// channel's server and client messages.
    pub fn tables(&self) -> Vec<EnumTable> {
        let mut tables = self.named_enums();
        tables.push(self.channels());
        for channel in &self.model.channels {
            for direction in [Direction::Server, Direction::Client] {
                tables.extend(self.messages(channel, direction));
            }
        }
        tables
    }
}

/// Renders tables as Rust constants.
pub fn emit_enums(tables: &[EnumTable], w: &mut CodeWriter) -> Result<(), GenerateError> {
    for table in tables {
        w.comment(&table.title)?;
        let ty = table.int_type.rust_name();
        for entry in &table.entries {
            w.line(format!(
                "pub const {}: {ty} = {};",
                entry.symbol,
                const_literal(table.int_type, &entry.symbol, entry.value)?
            ))?;
        }
        w.blank()?;
    }
    Ok(())
}

/// Literal for `value` in the given integer type. Values above the signed
/// maximum are written as their bit pattern.
fn const_literal(int_type: IntegralType, symbol: &str, value: u64) -> Result<String, GenerateError> {
    if value > int_type.max_unsigned() {
        return Err(GenerateError::ValueTooLarge {
            symbol: symbol.to_string(),
            value,
            int_type: int_type.rust_name().to_string(),
        });
    }
    let signed_max = int_type.max_unsigned() >> 1;
    if int_type.is_signed() && value > signed_max {
        Ok(format!("{value}_u64 as {}", int_type.rust_name()))
    } else {
        Ok(value.to_string())
    }
}
