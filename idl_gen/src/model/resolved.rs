use crate::model::types::{CaseValue, IntegralType};
use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};

/// Size facts attached to every named type, struct and field by the layout pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Layout {
    /// Bytes present in every validly-shaped instance.
    pub min_size: u64,
    /// Exact size when it is statically known.
    pub fixed_size: Option<u64>,
    /// Path of the field that makes the size variable.
    pub variable_cause: Option<String>,
    /// Consumes every byte up to the end of the buffer.
    pub open_ended: bool,
}

impl Layout {
    pub fn fixed(size: u64) -> Self {
        Self {
            min_size: size,
            fixed_size: Some(size),
            variable_cause: None,
            open_ended: false,
        }
    }

    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Server to client.
    Server,
    /// Client to server.
    Client,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Server => "server",
            Direction::Client => "client",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-owning reference into the model's name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub name: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMemberDef {
    pub name: String,
    pub value: u64,
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub base: IntegralType,
    pub members: Vec<EnumMemberDef>,
    pub flags: bool,
}

impl EnumDef {
    pub fn member_value(&self, name: &str) -> Option<u64> {
        self.members.iter().find(|m| m.name == name).map(|m| m.value)
    }

    /// Union of every member's bits.
    pub fn mask(&self) -> u64 {
        self.members.iter().fold(0, |acc, m| acc | m.value)
    }

    pub fn accepts(&self, value: u64) -> bool {
        if self.flags {
            value & !self.mask() == 0
        } else {
            self.members.iter().any(|m| m.value == value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructDef {
    pub fields: Vec<Field>,
    pub layout: Layout,
}

impl StructDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLength {
    Literal(u64),
    /// Count held by an earlier sibling field.
    Field(String),
    /// Every byte left in the buffer.
    Remaining,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDef {
    pub length: ArrayLength,
    pub element: FieldType,
    pub element_layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchArm {
    pub name: String,
    pub labels: Vec<CaseValue>,
    pub arm: Option<FieldType>,
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchDef {
    pub discriminant: String,
    pub cases: Vec<SwitchArm>,
    pub default: Option<SwitchArm>,
}

impl SwitchDef {
    pub fn arms(&self) -> impl Iterator<Item = &SwitchArm> {
        self.cases.iter().chain(self.default.iter())
    }

    pub fn arms_mut(&mut self) -> impl Iterator<Item = &mut SwitchArm> {
        self.cases.iter_mut().chain(self.default.iter_mut())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerDef {
    pub offset_type: IntegralType,
    pub target: TypeRef,
}

/// Type of a field. Closed so every pass handles each kind explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(IntegralType),
    Enum(Box<EnumDef>),
    Named(TypeRef),
    Struct(Box<StructDef>),
    Switch(Box<SwitchDef>),
    Array(Box<ArrayDef>),
    Pointer(PointerDef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamedKind {
    Scalar(IntegralType),
    Enum(EnumDef),
    Struct(StructDef),
    Switch(SwitchDef),
    Alias(FieldType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedType {
    pub name: String,
    pub kind: NamedKind,
    pub layout: Layout,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub name: String,
    pub value: u64,
    pub explicit_value: bool,
    pub channel: String,
    pub direction: Direction,
    /// Named struct the body was copied from, if any.
    pub body_type: Option<String>,
    pub body: StructDef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub value: u64,
    pub explicit_value: bool,
    pub member_name: Option<String>,
    pub base: Option<String>,
    pub server_messages: Vec<Message>,
    pub client_messages: Vec<Message>,
}

impl Channel {
    /// Messages declared by this channel itself.
    pub fn own_messages(&self, direction: Direction) -> &[Message] {
        match direction {
            Direction::Server => &self.server_messages,
            Direction::Client => &self.client_messages,
        }
    }
}

/// The annotated type model for one interface description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolModel {
    pub name: String,
    pub types: IndexMap<String, NamedType>,
    pub channels: Vec<Channel>,
}

/// Integer view of a field used as a count or discriminant.
#[derive(Debug, Clone, Copy)]
pub struct IntegralView<'a> {
    pub int_type: IntegralType,
    pub enum_def: Option<&'a EnumDef>,
}

impl ProtocolModel {
    pub fn named(&self, name: &str) -> Option<&NamedType> {
        self.types.get(name)
    }

    pub fn type_at(&self, index: usize) -> Option<&NamedType> {
        self.types.get_index(index).map(|(_, ty)| ty)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Effective messages of a channel: inherited ones first, then its own.
    pub fn messages<'m>(&'m self, channel: &'m Channel, direction: Direction) -> Vec<&'m Message> {
        let mut chain = vec![channel];
        let mut current = channel;
        while let Some(base) = current.base.as_deref().and_then(|b| self.channel(b)) {
            if chain.iter().any(|c| c.name == base.name) {
                break;
            }
            chain.push(base);
            current = base;
        }
        chain
            .iter()
            .rev()
            .flat_map(|c| c.own_messages(direction).iter())
            .collect()
    }

    /// Follows aliases to the integer type behind a field, if there is one.
    /// Alias chains longer than the type table are cycles and yield `None`.
    pub fn integral_view<'a>(&'a self, ty: &'a FieldType) -> Option<IntegralView<'a>> {
        let mut ty = ty;
        for _ in 0..=self.types.len() {
            match ty {
                FieldType::Scalar(int_type) => {
                    return Some(IntegralView {
                        int_type: *int_type,
                        enum_def: None,
                    });
                }
                FieldType::Enum(def) => {
                    return Some(IntegralView {
                        int_type: def.base,
                        enum_def: Some(def),
                    });
                }
                FieldType::Named(r) => match &self.type_at(r.index)?.kind {
                    NamedKind::Scalar(int_type) => {
                        return Some(IntegralView {
                            int_type: *int_type,
                            enum_def: None,
                        });
                    }
                    NamedKind::Enum(def) => {
                        return Some(IntegralView {
                            int_type: def.base,
                            enum_def: Some(def),
                        });
                    }
                    NamedKind::Alias(inner) => ty = inner,
                    NamedKind::Struct(_) | NamedKind::Switch(_) => return None,
                },
                FieldType::Struct(_)
                | FieldType::Switch(_)
                | FieldType::Array(_)
                | FieldType::Pointer(_) => return None,
            }
        }
        None
    }

    /// Follows aliases to a named struct.
    pub fn struct_target(&self, index: usize) -> Option<(&NamedType, &StructDef)> {
        let mut index = index;
        for _ in 0..=self.types.len() {
            let named = self.type_at(index)?;
            match &named.kind {
                NamedKind::Struct(def) => return Some((named, def)),
                NamedKind::Alias(FieldType::Named(r)) => index = r.index,
                _ => return None,
            }
        }
        None
    }
}

/// Resolves switch labels to numeric values against the discriminant type.
pub fn resolve_labels(
    labels: &[CaseValue],
    discriminant: &IntegralView<'_>,
) -> Result<Vec<u64>, String> {
    labels
        .iter()
        .map(|label| match label {
            CaseValue::Number(n) => Ok(*n),
            CaseValue::Name(name) => discriminant
                .enum_def
                .and_then(|def| def.member_value(name))
                .ok_or_else(|| format!("has no member named '{name}'")),
        })
        .collect()
}
