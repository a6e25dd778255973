//! Interface Parser: interface description text to [`ProtocolModel`].
//!
//! Name resolution is two-pass. Every declared type name is registered in
//! the name table first; field, pointer and message references are resolved
//! against that table afterwards, so a declaration may refer to a type
//! declared later in the file. A third pass checks the constraints that
//! depend on resolved types (count fields, discriminants, pointer targets).

use crate::model::error::{ModelError, ModelErrorKind};
use crate::model::numbering::{assign_flag_bits, assign_sequential, find_duplicate};
use crate::model::resolved::{
    resolve_labels, ArrayDef, ArrayLength, Channel, Direction, EnumDef, EnumMemberDef, Field,
    FieldType, Layout, Message, NamedKind, NamedType, PointerDef, ProtocolModel, StructDef,
    SwitchArm, SwitchDef, TypeRef,
};
use crate::model::types::{
    ArraySize, ChannelDef, EnumType, MessageDef, ProtocolFile, StructField, SwitchCase,
    SwitchType, TypeKind,
};
use heck::ToShoutySnakeCase;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::debug;

/// Parses YAML interface description text into an unannotated model.
pub fn parse_protocol(source: &str) -> Result<ProtocolModel, ModelError> {
    let file = ProtocolFile::from_yaml(source).map_err(|err| {
        let location = err
            .location()
            .map(|loc| format!("line {}, column {}", loc.line(), loc.column()))
            .unwrap_or_else(|| "input".to_string());
        ModelError::new(location, ModelErrorKind::Syntax(err.to_string()))
    })?;
    build_model(&file)
}

/// Builds the model from already-deserialized declarations.
pub fn build_model(file: &ProtocolFile) -> Result<ProtocolModel, ModelError> {
    let names = register_names(file)?;
    debug!(types = names.len(), "registered type names");

    let builder = ModelBuilder { names: &names };
    let mut types = IndexMap::with_capacity(file.types.len());
    for typedef in &file.types {
        let location = format!("type {}", typedef.name);
        let kind = builder.resolve_named(&typedef.kind, &location)?;
        types.insert(
            typedef.name.clone(),
            NamedType {
                name: typedef.name.clone(),
                kind,
                layout: Layout::default(),
                comment: type_comment(&typedef.kind),
            },
        );
    }

    let mut model = ProtocolModel {
        name: file.name.clone(),
        types,
        channels: Vec::new(),
    };
    model.channels = resolve_channels(&builder, &model, &file.channels)?;
    check_inheritance(&model)?;
    check_message_symbols(&model)?;
    debug!(channels = model.channels.len(), "resolved channels");

    Validator { model: &model }.validate()?;
    Ok(model)
}

fn register_names(file: &ProtocolFile) -> Result<IndexMap<String, usize>, ModelError> {
    let mut names = IndexMap::with_capacity(file.types.len());
    for (idx, typedef) in file.types.iter().enumerate() {
        if names.insert(typedef.name.clone(), idx).is_some() {
            return Err(ModelError::new(
                format!("type {}", typedef.name),
                ModelErrorKind::DuplicateType(typedef.name.clone()),
            ));
        }
    }
    Ok(names)
}

fn type_comment(kind: &TypeKind) -> Option<String> {
    match kind {
        TypeKind::Struct(s) => s.comment.clone(),
        TypeKind::Enum(e) => e.comment.clone(),
        _ => None,
    }
}

struct ModelBuilder<'a> {
    names: &'a IndexMap<String, usize>,
}

impl ModelBuilder<'_> {
    fn lookup(&self, name: &str, location: &str) -> Result<TypeRef, ModelError> {
        self.names
            .get(name)
            .map(|index| TypeRef {
                name: name.to_string(),
                index: *index,
            })
            .ok_or_else(|| ModelError::new(location, ModelErrorKind::UnknownType(name.to_string())))
    }

    fn resolve_named(&self, kind: &TypeKind, location: &str) -> Result<NamedKind, ModelError> {
        Ok(match kind {
            TypeKind::Primitive(int_type) => NamedKind::Scalar(*int_type),
            TypeKind::Enum(e) => NamedKind::Enum(resolve_enum(e, location)?),
            TypeKind::Struct(s) => NamedKind::Struct(self.resolve_struct(&s.fields, location)?),
            TypeKind::Switch(sw) => NamedKind::Switch(self.resolve_switch(sw, location)?),
            TypeKind::TypeRef(_) | TypeKind::Array(_) | TypeKind::Pointer(_) => {
                NamedKind::Alias(self.resolve_kind(kind, location)?)
            }
        })
    }

    fn resolve_kind(&self, kind: &TypeKind, location: &str) -> Result<FieldType, ModelError> {
        Ok(match kind {
            TypeKind::Primitive(int_type) => FieldType::Scalar(*int_type),
            TypeKind::TypeRef(r) => FieldType::Named(self.lookup(&r.name, location)?),
            TypeKind::Struct(s) => {
                FieldType::Struct(Box::new(self.resolve_struct(&s.fields, location)?))
            }
            TypeKind::Enum(e) => FieldType::Enum(Box::new(resolve_enum(e, location)?)),
            TypeKind::Switch(sw) => FieldType::Switch(Box::new(self.resolve_switch(sw, location)?)),
            TypeKind::Array(a) => {
                let length = match &a.size {
                    ArraySize::Literal(n) => ArrayLength::Literal(*n),
                    ArraySize::Field(name) => ArrayLength::Field(name.clone()),
                    ArraySize::Remaining => ArrayLength::Remaining,
                };
                FieldType::Array(Box::new(ArrayDef {
                    length,
                    element: self.resolve_kind(&a.element_type, &format!("{location}[]"))?,
                    element_layout: Layout::default(),
                }))
            }
            TypeKind::Pointer(p) => FieldType::Pointer(PointerDef {
                offset_type: p.offset_type,
                target: self.lookup(&p.target, location)?,
            }),
        })
    }

    fn resolve_struct(
        &self,
        fields: &[StructField],
        location: &str,
    ) -> Result<StructDef, ModelError> {
        let mut resolved: Vec<Field> = Vec::with_capacity(fields.len());
        for field in fields {
            if resolved.iter().any(|f| f.name == field.name) {
                return Err(ModelError::new(
                    location,
                    ModelErrorKind::DuplicateField(field.name.clone()),
                ));
            }
            let field_location = format!("{location}, field {}", field.name);
            resolved.push(Field {
                name: field.name.clone(),
                ty: self.resolve_kind(&field.field_type, &field_location)?,
                layout: Layout::default(),
            });
        }
        Ok(StructDef {
            fields: resolved,
            layout: Layout::default(),
        })
    }

    fn resolve_switch(&self, sw: &SwitchType, location: &str) -> Result<SwitchDef, ModelError> {
        if sw.cases.is_empty() && sw.default.is_none() {
            return Err(ModelError::new(location, ModelErrorKind::EmptySwitch));
        }
        let resolve_arm = |case: &SwitchCase| -> Result<SwitchArm, ModelError> {
            let arm_location = format!("{location}, case {}", case.name);
            Ok(SwitchArm {
                name: case.name.clone(),
                labels: case.values.clone(),
                arm: case
                    .arm_type
                    .as_ref()
                    .map(|kind| self.resolve_kind(kind, &arm_location))
                    .transpose()?,
                layout: Layout::default(),
            })
        };
        let cases = sw.cases.iter().map(resolve_arm).collect::<Result<Vec<_>, _>>()?;
        let default = sw.default.as_deref().map(resolve_arm).transpose()?;
        Ok(SwitchDef {
            discriminant: sw.discriminant.clone(),
            cases,
            default,
        })
    }

    fn resolve_body(
        &self,
        model: &ProtocolModel,
        message: &MessageDef,
        location: &str,
    ) -> Result<(Option<String>, StructDef), ModelError> {
        match &message.body {
            Some(_) if !message.fields.is_empty() => {
                Err(ModelError::new(location, ModelErrorKind::ConflictingBody))
            }
            Some(name) => {
                let target = self.lookup(name, location)?;
                let (named, def) = model.struct_target(target.index).ok_or_else(|| {
                    ModelError::new(location, ModelErrorKind::NotAStruct(name.clone()))
                })?;
                Ok((Some(named.name.clone()), def.clone()))
            }
            None => Ok((None, self.resolve_struct(&message.fields, location)?)),
        }
    }
}

fn resolve_enum(e: &EnumType, location: &str) -> Result<EnumDef, ModelError> {
    let explicit = e.members.iter().map(|m| m.value);
    let assigned = if e.flags {
        assign_flag_bits(explicit)
    } else {
        assign_sequential(explicit)
    };
    let values = assigned.map_err(|idx| {
        ModelError::new(
            format!("{location}, member {}", e.members[idx].name),
            ModelErrorKind::SizeOverflow,
        )
    })?;

    let max = e.base.max_unsigned();
    for (member, value) in e.members.iter().zip(&values) {
        if *value > max {
            return Err(ModelError::new(
                format!("{location}, member {}", member.name),
                ModelErrorKind::ValueOutOfRange {
                    value: *value,
                    base: e.base.rust_name().to_string(),
                },
            ));
        }
    }
    if let Some((first, second)) = find_duplicate(&values) {
        return Err(ModelError::new(
            location,
            ModelErrorKind::DuplicateValue {
                name: e.members[second].name.clone(),
                other: e.members[first].name.clone(),
                value: values[second],
            },
        ));
    }

    Ok(EnumDef {
        base: e.base,
        members: e
            .members
            .iter()
            .zip(values)
            .map(|(member, value)| EnumMemberDef {
                name: member.name.clone(),
                value,
                explicit: member.value.is_some(),
            })
            .collect(),
        flags: e.flags,
    })
}

fn resolve_channels(
    builder: &ModelBuilder<'_>,
    model: &ProtocolModel,
    channels: &[ChannelDef],
) -> Result<Vec<Channel>, ModelError> {
    let values = assign_sequential(channels.iter().map(|c| c.value)).map_err(|idx| {
        ModelError::new(
            format!("channel {}", channels[idx].name),
            ModelErrorKind::SizeOverflow,
        )
    })?;
    if let Some((first, second)) = find_duplicate(&values) {
        return Err(ModelError::new(
            format!("channel {}", channels[second].name),
            ModelErrorKind::DuplicateValue {
                name: channels[second].name.clone(),
                other: channels[first].name.clone(),
                value: values[second],
            },
        ));
    }

    let mut resolved: Vec<Channel> = Vec::with_capacity(channels.len());
    for (def, value) in channels.iter().zip(values) {
        let location = format!("channel {}", def.name);
        if resolved.iter().any(|c| c.name == def.name) {
            return Err(ModelError::new(
                location,
                ModelErrorKind::DuplicateChannel(def.name.clone()),
            ));
        }
        if let Some(base) = &def.base {
            if !channels.iter().any(|c| &c.name == base) {
                return Err(ModelError::new(
                    location,
                    ModelErrorKind::UnknownChannel(base.clone()),
                ));
            }
        }
        resolved.push(Channel {
            name: def.name.clone(),
            value,
            explicit_value: def.value.is_some(),
            member_name: def.member_name.clone(),
            base: def.base.clone(),
            server_messages: resolve_messages(
                builder,
                model,
                def,
                Direction::Server,
                &def.server_messages,
            )?,
            client_messages: resolve_messages(
                builder,
                model,
                def,
                Direction::Client,
                &def.client_messages,
            )?,
        });
    }
    Ok(resolved)
}

fn resolve_messages(
    builder: &ModelBuilder<'_>,
    model: &ProtocolModel,
    channel: &ChannelDef,
    direction: Direction,
    messages: &[MessageDef],
) -> Result<Vec<Message>, ModelError> {
    let values = assign_sequential(messages.iter().map(|m| m.value)).map_err(|idx| {
        ModelError::new(
            message_location(&channel.name, direction, &messages[idx].name),
            ModelErrorKind::SizeOverflow,
        )
    })?;

    let mut resolved: Vec<Message> = Vec::with_capacity(messages.len());
    for (def, value) in messages.iter().zip(values) {
        let location = message_location(&channel.name, direction, &def.name);
        if resolved.iter().any(|m| m.name == def.name) {
            return Err(ModelError::new(
                location,
                ModelErrorKind::DuplicateMessage(def.name.clone()),
            ));
        }
        let (body_type, body) = builder.resolve_body(model, def, &location)?;
        resolved.push(Message {
            name: def.name.clone(),
            value,
            explicit_value: def.value.is_some(),
            channel: channel.name.clone(),
            direction,
            body_type,
            body,
        });
    }
    Ok(resolved)
}

pub(crate) fn message_location(channel: &str, direction: Direction, message: &str) -> String {
    format!("channel {channel}, {direction} message {message}")
}

/// Message identifiers are built from the direction, the channel member name
/// and the message name only. Channels sharing a member name, or declaring
/// none, therefore share one identifier namespace per direction.
fn check_message_symbols(model: &ProtocolModel) -> Result<(), ModelError> {
    for direction in [Direction::Server, Direction::Client] {
        let mut seen: BTreeMap<(String, String), String> = BTreeMap::new();
        for channel in &model.channels {
            let member = channel
                .member_name
                .as_deref()
                .unwrap_or("")
                .to_shouty_snake_case();
            for message in channel.own_messages(direction) {
                let key = (member.clone(), message.name.to_shouty_snake_case());
                let here = format!("{}.{}", channel.name, message.name);
                if let Some(first) = seen.insert(key, here.clone()) {
                    return Err(ModelError::new(
                        message_location(&channel.name, direction, &message.name),
                        ModelErrorKind::DuplicateSymbol {
                            name: here,
                            other: first,
                        },
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Rejects inheritance cycles and message value collisions across the
/// effective (inherited + own) message set.
fn check_inheritance(model: &ProtocolModel) -> Result<(), ModelError> {
    for channel in &model.channels {
        let mut chain = vec![channel.name.clone()];
        let mut current = channel;
        while let Some(base) = current.base.as_deref() {
            chain.push(base.to_string());
            if base == channel.name {
                return Err(ModelError::new(
                    format!("channel {}", channel.name),
                    ModelErrorKind::InheritanceCycle(chain),
                ));
            }
            match model.channel(base) {
                Some(next) if chain[..chain.len() - 1].iter().all(|c| c != base) => current = next,
                // a cycle that does not pass through this channel is reported by its members
                _ => break,
            }
        }

        for direction in [Direction::Server, Direction::Client] {
            let messages = model.messages(channel, direction);
            let values: Vec<u64> = messages.iter().map(|m| m.value).collect();
            if let Some((first, second)) = find_duplicate(&values) {
                return Err(ModelError::new(
                    message_location(&channel.name, direction, &messages[second].name),
                    ModelErrorKind::DuplicateValue {
                        name: messages[second].name.clone(),
                        other: messages[first].name.clone(),
                        value: values[second],
                    },
                ));
            }
        }
    }
    Ok(())
}

/// Third pass: constraints that need the resolved name table.
struct Validator<'a> {
    model: &'a ProtocolModel,
}

/// Struct a field lives in, and the field's position, for sibling lookups.
type Scope<'a> = Option<(&'a StructDef, usize)>;

impl<'a> Validator<'a> {
    fn validate(&self) -> Result<(), ModelError> {
        for named in self.model.types.values() {
            // Switches and aliases depend on their siblings; they are checked where used.
            if let NamedKind::Struct(def) = &named.kind {
                self.validate_struct(def, &format!("type {}", named.name))?;
            }
        }
        for channel in &self.model.channels {
            for direction in [Direction::Server, Direction::Client] {
                for message in channel.own_messages(direction) {
                    let location = message_location(&channel.name, direction, &message.name);
                    self.validate_struct(&message.body, &location)?;
                }
            }
        }
        Ok(())
    }

    fn validate_struct(&self, def: &StructDef, location: &str) -> Result<(), ModelError> {
        for (idx, field) in def.fields.iter().enumerate() {
            let field_location = format!("{location}, field {}", field.name);
            self.validate_field_type(&field.ty, &field_location, Some((def, idx)), &mut Vec::new())?;
        }
        Ok(())
    }

    fn validate_field_type(
        &self,
        ty: &FieldType,
        location: &str,
        scope: Scope<'_>,
        aliases: &mut Vec<usize>,
    ) -> Result<(), ModelError> {
        match ty {
            FieldType::Scalar(_) | FieldType::Enum(_) => Ok(()),
            FieldType::Named(r) => {
                if aliases.contains(&r.index) {
                    // by-value cycle, reported by the layout pass
                    return Ok(());
                }
                let Some(named) = self.model.type_at(r.index) else {
                    return Err(ModelError::new(
                        location,
                        ModelErrorKind::UnknownType(r.name.clone()),
                    ));
                };
                aliases.push(r.index);
                let result = match &named.kind {
                    NamedKind::Alias(inner) => self.validate_field_type(inner, location, scope, aliases),
                    NamedKind::Switch(sw) => self.validate_switch(sw, location, scope),
                    NamedKind::Scalar(_) | NamedKind::Enum(_) | NamedKind::Struct(_) => Ok(()),
                };
                aliases.pop();
                result
            }
            FieldType::Struct(def) => self.validate_struct(def, location),
            FieldType::Switch(sw) => self.validate_switch(sw, location, scope),
            FieldType::Array(array) => {
                if let ArrayLength::Field(count) = &array.length {
                    self.check_sibling(count, location, scope, |field, reason| {
                        ModelErrorKind::BadLengthField { field, reason }
                    })?;
                }
                self.validate_field_type(&array.element, &format!("{location}[]"), None, aliases)
            }
            FieldType::Pointer(ptr) => {
                if self.model.struct_target(ptr.target.index).is_none() {
                    return Err(ModelError::new(
                        location,
                        ModelErrorKind::InvalidPointerTarget {
                            target: ptr.target.name.clone(),
                            reason: "pointer targets must be named structs".to_string(),
                        },
                    ));
                }
                Ok(())
            }
        }
    }

    /// Looks up an earlier integer sibling and returns its position.
    fn check_sibling(
        &self,
        name: &str,
        location: &str,
        scope: Scope<'_>,
        make_error: impl Fn(String, String) -> ModelErrorKind,
    ) -> Result<usize, ModelError> {
        let fail = |reason: &str| {
            ModelError::new(location, make_error(name.to_string(), reason.to_string()))
        };
        let Some((owner, position)) = scope else {
            return Err(fail("can only be used by a direct struct field"));
        };
        let sibling = owner
            .field_index(name)
            .ok_or_else(|| fail("is not a field of the enclosing struct"))?;
        if sibling >= position {
            return Err(fail("must be declared before the field that uses it"));
        }
        if self.model.integral_view(&owner.fields[sibling].ty).is_none() {
            return Err(fail("is not an integer field"));
        }
        Ok(sibling)
    }

    fn validate_switch(
        &self,
        sw: &SwitchDef,
        location: &str,
        scope: Scope<'_>,
    ) -> Result<(), ModelError> {
        let sibling = self.check_sibling(&sw.discriminant, location, scope, |field, reason| {
            ModelErrorKind::BadDiscriminant { field, reason }
        })?;
        let Some((owner, _)) = scope else {
            return Ok(());
        };
        let Some(view) = self.model.integral_view(&owner.fields[sibling].ty) else {
            return Ok(());
        };

        let mut seen: Vec<(u64, &str)> = Vec::new();
        for case in &sw.cases {
            let values = resolve_labels(&case.labels, &view).map_err(|reason| {
                ModelError::new(
                    format!("{location}, case {}", case.name),
                    ModelErrorKind::BadDiscriminant {
                        field: sw.discriminant.clone(),
                        reason,
                    },
                )
            })?;
            for value in values {
                if value > view.int_type.max_unsigned() {
                    return Err(ModelError::new(
                        format!("{location}, case {}", case.name),
                        ModelErrorKind::ValueOutOfRange {
                            value,
                            base: view.int_type.rust_name().to_string(),
                        },
                    ));
                }
                if let Some((_, other)) = seen.iter().find(|(v, _)| *v == value) {
                    return Err(ModelError::new(
                        location,
                        ModelErrorKind::DuplicateValue {
                            name: case.name.clone(),
                            other: other.to_string(),
                            value,
                        },
                    ));
                }
                seen.push((value, &case.name));
            }
        }

        for arm in sw.arms() {
            if let Some(ty) = &arm.arm {
                let arm_location = format!("{location}, case {}", arm.name);
                self.validate_field_type(ty, &arm_location, None, &mut Vec::new())?;
            }
        }
        Ok(())
    }
}
