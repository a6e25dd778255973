use super::ir::*;
use crate::model::{
    resolve_labels, ArrayLength, Direction, EnumDef, FieldType, Message, NamedKind,
    ProtocolModel, StructDef, SwitchArm, SwitchDef,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanBuildError {
    #[error("type index {0} is not in the model")]
    UnknownType(usize),
    #[error("field '{field}' refers to missing sibling '{sibling}'")]
    MissingSibling { field: String, sibling: String },
    #[error("field '{field}' needs an integer sibling for '{sibling}'")]
    NotIntegral { field: String, sibling: String },
    #[error("switch '{field}': {reason}")]
    BadLabel { field: String, reason: String },
    #[error("alias chain through '{0}' does not end")]
    AliasCycle(String),
    #[error("'{0}' is not a struct")]
    NotAStruct(String),
}

/// Struct a node is a direct field of, with the field's position.
type Scope<'a> = Option<(&'a StructDef, usize)>;

/// Lowers the annotated model into decode plans.
pub struct PlanBuilder<'a> {
    model: &'a ProtocolModel,
    /* model type index -> plan type index, for every named struct */
    struct_slots: BTreeMap<usize, usize>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(model: &'a ProtocolModel) -> Self {
        let struct_slots = model
            .types
            .values()
            .enumerate()
            .filter(|(_, named)| matches!(named.kind, NamedKind::Struct(_)))
            .enumerate()
            .map(|(plan_idx, (model_idx, _))| (model_idx, plan_idx))
            .collect();
        Self {
            model,
            struct_slots,
        }
    }

    /// Builds plans for every named struct and for the messages of the given
    /// directions.
    pub fn build(&self, directions: &[Direction]) -> Result<DemarshalIr, PlanBuildError> {
        let mut types = Vec::with_capacity(self.struct_slots.len());
        for model_idx in self.struct_slots.keys() {
            let named = self
                .model
                .type_at(*model_idx)
                .ok_or(PlanBuildError::UnknownType(*model_idx))?;
            let NamedKind::Struct(def) = &named.kind else {
                return Err(PlanBuildError::NotAStruct(named.name.clone()));
            };
            types.push(TypePlan {
                type_name: named.name.clone(),
                root: self.build_struct(def)?,
            });
        }

        let mut messages = Vec::new();
        for channel in &self.model.channels {
            for direction in directions {
                for message in channel.own_messages(*direction) {
                    messages.push(self.build_message(message)?);
                }
            }
        }
        debug!(
            types = types.len(),
            messages = messages.len(),
            "built decode plan"
        );
        Ok(DemarshalIr::new(self.model.name.clone(), types, messages))
    }

    pub fn build_message(&self, message: &Message) -> Result<MessagePlan, PlanBuildError> {
        /* the declaring channel plus every channel that inherits the message */
        let carriers: Vec<_> = self
            .model
            .channels
            .iter()
            .filter(|channel| {
                self.model
                    .messages(channel, message.direction)
                    .iter()
                    .any(|m| std::ptr::eq(*m, message))
            })
            .collect();
        Ok(MessagePlan {
            channel: message.channel.clone(),
            channels: carriers.iter().map(|c| c.name.clone()).collect(),
            channel_values: carriers.iter().map(|c| c.value).collect(),
            direction: message.direction,
            name: message.name.clone(),
            value: message.value,
            body_type: message.body_type.clone(),
            body: self.build_struct(&message.body)?,
        })
    }

    fn build_struct(&self, def: &StructDef) -> Result<StructPlan, PlanBuildError> {
        let fields = def
            .fields
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                Ok(FieldPlan::new(
                    field.name.clone(),
                    self.build_node(&field.ty, &field.name, Some((def, idx)), 0)?,
                ))
            })
            .collect::<Result<Vec<_>, PlanBuildError>>()?;
        Ok(StructPlan {
            min_size: def.layout.min_size,
            fixed_size: def.layout.fixed_size,
            fields,
        })
    }

    fn build_node(
        &self,
        ty: &FieldType,
        field: &str,
        scope: Scope<'_>,
        depth: usize,
    ) -> Result<PlanNode, PlanBuildError> {
        Ok(match ty {
            FieldType::Scalar(int_type) => PlanNode::Scalar {
                int_type: *int_type,
            },
            FieldType::Enum(def) => PlanNode::Enum(enum_plan(None, def)),
            FieldType::Named(r) => {
                let named = self
                    .model
                    .type_at(r.index)
                    .ok_or(PlanBuildError::UnknownType(r.index))?;
                match &named.kind {
                    NamedKind::Scalar(int_type) => PlanNode::Scalar {
                        int_type: *int_type,
                    },
                    NamedKind::Enum(def) => PlanNode::Enum(enum_plan(Some(&named.name), def)),
                    NamedKind::Struct(_) => PlanNode::Nested {
                        type_index: self.plan_index(r.index, &named.name)?,
                        type_name: named.name.clone(),
                    },
                    NamedKind::Switch(sw) => {
                        PlanNode::Switch(self.build_switch(Some(&named.name), sw, field, scope)?)
                    }
                    NamedKind::Alias(inner) => {
                        if depth > self.model.types.len() {
                            return Err(PlanBuildError::AliasCycle(named.name.clone()));
                        }
                        self.build_node(inner, field, scope, depth + 1)?
                    }
                }
            }
            FieldType::Struct(def) => PlanNode::Struct(self.build_struct(def)?),
            FieldType::Switch(sw) => PlanNode::Switch(self.build_switch(None, sw, field, scope)?),
            FieldType::Array(array) => {
                let length = match &array.length {
                    ArrayLength::Literal(count) => LengthPlan::Literal { count: *count },
                    ArrayLength::Remaining => LengthPlan::Remaining,
                    ArrayLength::Field(sibling) => {
                        let (slot, view) = self.sibling(sibling, field, scope)?;
                        LengthPlan::Sibling {
                            name: sibling.clone(),
                            slot,
                            int_type: view,
                        }
                    }
                };
                PlanNode::Array(ArrayPlan {
                    length,
                    element: Box::new(self.build_node(&array.element, field, None, depth)?),
                    element_min: array.element_layout.min_size,
                    element_fixed: array.element_layout.fixed_size,
                })
            }
            FieldType::Pointer(ptr) => {
                let (target, _) = self
                    .model
                    .struct_target(ptr.target.index)
                    .ok_or_else(|| PlanBuildError::NotAStruct(ptr.target.name.clone()))?;
                let model_idx = self
                    .model
                    .types
                    .get_index_of(&target.name)
                    .ok_or(PlanBuildError::UnknownType(ptr.target.index))?;
                PlanNode::Pointer(PointerPlan {
                    offset_type: ptr.offset_type,
                    target_index: self.plan_index(model_idx, &target.name)?,
                    target_name: target.name.clone(),
                    target_min: target.layout.min_size,
                })
            }
        })
    }

    fn build_switch(
        &self,
        type_name: Option<&str>,
        sw: &SwitchDef,
        field: &str,
        scope: Scope<'_>,
    ) -> Result<SwitchPlan, PlanBuildError> {
        let (slot, int_type) = self.sibling(&sw.discriminant, field, scope)?;
        let Some((owner, _)) = scope else {
            return Err(PlanBuildError::MissingSibling {
                field: field.to_string(),
                sibling: sw.discriminant.clone(),
            });
        };
        let view = self
            .model
            .integral_view(&owner.fields[slot].ty)
            .ok_or_else(|| PlanBuildError::NotIntegral {
                field: field.to_string(),
                sibling: sw.discriminant.clone(),
            })?;

        let case = |arm: &SwitchArm| -> Result<CasePlan, PlanBuildError> {
            let values = resolve_labels(&arm.labels, &view).map_err(|reason| {
                PlanBuildError::BadLabel {
                    field: field.to_string(),
                    reason,
                }
            })?;
            let node = arm
                .arm
                .as_ref()
                .map(|ty| self.build_node(ty, &arm.name, None, 0).map(Box::new))
                .transpose()?;
            Ok(CasePlan {
                name: arm.name.clone(),
                values,
                node,
            })
        };

        Ok(SwitchPlan {
            type_name: type_name.map(str::to_string),
            discriminant: sw.discriminant.clone(),
            slot,
            int_type,
            cases: sw.cases.iter().map(&case).collect::<Result<_, _>>()?,
            default: sw.default.as_ref().map(&case).transpose()?,
        })
    }

    /// Resolves an earlier sibling to its slot and integer type.
    fn sibling(
        &self,
        sibling: &str,
        field: &str,
        scope: Scope<'_>,
    ) -> Result<(usize, idl_types::IntegralType), PlanBuildError> {
        let missing = || PlanBuildError::MissingSibling {
            field: field.to_string(),
            sibling: sibling.to_string(),
        };
        let (owner, position) = scope.ok_or_else(missing)?;
        let slot = owner
            .field_index(sibling)
            .filter(|slot| *slot < position)
            .ok_or_else(missing)?;
        let view = self
            .model
            .integral_view(&owner.fields[slot].ty)
            .ok_or_else(|| PlanBuildError::NotIntegral {
                field: field.to_string(),
                sibling: sibling.to_string(),
            })?;
        Ok((slot, view.int_type))
    }

    fn plan_index(&self, model_idx: usize, name: &str) -> Result<usize, PlanBuildError> {
        self.struct_slots
            .get(&model_idx)
            .copied()
            .ok_or_else(|| PlanBuildError::NotAStruct(name.to_string()))
    }
}

fn enum_plan(type_name: Option<&str>, def: &EnumDef) -> EnumPlan {
    EnumPlan {
        type_name: type_name.map(str::to_string),
        int_type: def.base,
        members: def
            .members
            .iter()
            .map(|m| EnumMemberPlan {
                name: m.name.clone(),
                value: m.value,
            })
            .collect(),
        flags: def.flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::load;
    use idl_types::IntegralType;

    const SOURCE: &str = r#"
name: spice
types:
  - name: Kind
    kind:
      enum:
        base: u8
        members:
          - { name: fill, value: 1 }
          - { name: copy }
  - name: Point
    kind:
      struct:
        fields:
          - { name: x, field-type: { primitive: i32 } }
          - { name: y, field-type: { primitive: i32 } }
  - name: Points
    kind:
      array:
        size: { field: count }
        element-type: { type-ref: { name: Point } }
channels:
  - name: base
    value: 1
    server-messages:
      - name: ping
        value: 4
  - name: display
    value: 2
    base: base
    server-messages:
      - name: draw
        value: 1
        fields:
          - { name: kind, field-type: { type-ref: { name: Kind } } }
          - { name: count, field-type: { primitive: u16 } }
          - { name: points, field-type: { type-ref: { name: Points } } }
          - name: body
            field-type:
              switch:
                discriminant: kind
                cases:
                  - { name: filled, values: [fill], arm-type: { primitive: u32 } }
                  - { name: copied, values: [copy] }
          - name: origin
            field-type:
              pointer: { target: Point }
    client-messages:
      - name: ack
"#;

    #[test]
    fn resolves_slots_and_labels() {
        let model = load(SOURCE).expect("load");
        let ir = PlanBuilder::new(&model).build(&[Direction::Server]).expect("plan");

        assert_eq!(ir.types.len(), 1);
        assert_eq!(ir.types[0].type_name, "Point");
        assert_eq!(ir.types[0].root.fixed_size, Some(8));

        let draw = ir
            .message_by_name("display", Direction::Server, "draw")
            .expect("draw");
        assert_eq!(draw.body.min_size, 1 + 2 + 0 + 0 + 4);

        let PlanNode::Array(points) = &draw.body.fields[2].node else {
            panic!("expected array");
        };
        assert_eq!(
            points.length,
            LengthPlan::Sibling {
                name: "count".into(),
                slot: 1,
                int_type: IntegralType::U16,
            }
        );
        assert_eq!(points.element_min, 8);
        assert!(matches!(*points.element, PlanNode::Nested { type_index: 0, .. }));

        let PlanNode::Switch(body) = &draw.body.fields[3].node else {
            panic!("expected switch");
        };
        assert_eq!(body.slot, 0);
        assert_eq!(body.cases[0].values, vec![1]);
        assert_eq!(body.cases[1].values, vec![2]);
        assert!(body.cases[1].node.is_none());

        let PlanNode::Pointer(origin) = &draw.body.fields[4].node else {
            panic!("expected pointer");
        };
        assert_eq!(origin.target_index, 0);
        assert_eq!(origin.target_min, 8);
    }

    #[test]
    fn inherited_messages_list_every_carrier() {
        let model = load(SOURCE).expect("load");
        let ir = PlanBuilder::new(&model).build(&[Direction::Server]).expect("plan");
        let ping = ir.message_by_name("base", Direction::Server, "ping").expect("ping");
        assert_eq!(ping.channels, vec!["base".to_string(), "display".to_string()]);
        assert_eq!(ping.channel_values, vec![1, 2]);
        assert!(ir.message(2, Direction::Server, 4).is_some());
    }

    #[test]
    fn only_selected_directions_are_planned() {
        let model = load(SOURCE).expect("load");
        let ir = PlanBuilder::new(&model).build(&[Direction::Client]).expect("plan");
        assert_eq!(ir.messages.len(), 1);
        assert_eq!(ir.messages[0].name, "ack");
    }
}
