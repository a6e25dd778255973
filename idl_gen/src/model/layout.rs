//! Layout & Size Analyzer.
//!
//! Named types are sized bottom-up in containment order, so every by-value
//! reference finds its target's layout already computed. Message bodies are
//! sized last. Variable-size causes are paths relative to the type that owns
//! the layout (`items`, `header.data`, `rects[].points`).

use crate::model::error::{ModelError, ModelErrorKind};
use crate::model::layout_graph::{LayoutGraph, LayoutGraphError};
use crate::model::parser::message_location;
use crate::model::resolved::{
    ArrayLength, Direction, FieldType, Layout, NamedKind, ProtocolModel, StructDef, SwitchDef,
};
use tracing::debug;

/// Annotates every named type, field and message body with its layout.
pub fn analyze(model: &mut ProtocolModel) -> Result<(), ModelError> {
    let order = LayoutGraph::build(model).topo_order().map_err(|err| {
        let LayoutGraphError::ContainmentCycle { cycle, .. } = err;
        ModelError::new("types", ModelErrorKind::ContainmentCycle(cycle))
    })?;

    let mut table: Vec<Option<Layout>> = vec![None; model.types.len()];
    for name in order {
        let Some((idx, _, named)) = model.types.get_full_mut(&name) else {
            continue;
        };
        let location = format!("type {name}");
        let sizer = Sizer {
            table: &table,
            location: &location,
        };
        let layout = match &mut named.kind {
            NamedKind::Scalar(int_type) => Layout::fixed(int_type.width()),
            NamedKind::Enum(def) => Layout::fixed(def.base.width()),
            NamedKind::Struct(def) => sizer.layout_struct(def)?,
            NamedKind::Switch(sw) => sizer.layout_switch(sw)?,
            NamedKind::Alias(ty) => sizer.layout_type(ty)?,
        };
        debug!(
            name = %name,
            min_size = layout.min_size,
            fixed = ?layout.fixed_size,
            "laid out type"
        );
        named.layout = Layout {
            variable_cause: layout
                .variable_cause
                .as_ref()
                .map(|cause| if cause.is_empty() { name.clone() } else { cause.clone() }),
            ..layout.clone()
        };
        table[idx] = Some(layout);
    }

    for channel in &mut model.channels {
        for direction in [Direction::Server, Direction::Client] {
            let messages = match direction {
                Direction::Server => &mut channel.server_messages,
                Direction::Client => &mut channel.client_messages,
            };
            for message in messages {
                let location = message_location(&channel.name, direction, &message.name);
                Sizer {
                    table: &table,
                    location: &location,
                }
                .layout_struct(&mut message.body)?;
            }
        }
    }

    check_pointer_targets(model)
}

struct Sizer<'a> {
    table: &'a [Option<Layout>],
    location: &'a str,
}

impl Sizer<'_> {
    fn error(&self, suffix: &str, kind: ModelErrorKind) -> ModelError {
        ModelError::new(format!("{}{suffix}", self.location), kind)
    }

    fn layout_type(&self, ty: &mut FieldType) -> Result<Layout, ModelError> {
        match ty {
            FieldType::Scalar(int_type) => Ok(Layout::fixed(int_type.width())),
            FieldType::Enum(def) => Ok(Layout::fixed(def.base.width())),
            FieldType::Pointer(ptr) => Ok(Layout::fixed(ptr.offset_type.width())),
            FieldType::Named(r) => self
                .table
                .get(r.index)
                .cloned()
                .flatten()
                .ok_or_else(|| self.error("", ModelErrorKind::ContainmentCycle(vec![r.name.clone()]))),
            FieldType::Struct(def) => self.layout_struct(def),
            FieldType::Switch(sw) => self.layout_switch(sw),
            FieldType::Array(array) => {
                let element = self.layout_type(&mut array.element)?;
                if element.open_ended {
                    return Err(self.error("", ModelErrorKind::MisplacedRemainingArray));
                }
                array.element_layout = element.clone();
                match array.length {
                    ArrayLength::Literal(count) => {
                        let min_size = count
                            .checked_mul(element.min_size)
                            .ok_or_else(|| self.error("", ModelErrorKind::SizeOverflow))?;
                        Ok(match element.fixed_size {
                            Some(_) => Layout::fixed(min_size),
                            None => Layout {
                                min_size,
                                fixed_size: None,
                                variable_cause: element
                                    .variable_cause
                                    .map(|cause| join_cause("[]", &cause)),
                                open_ended: false,
                            },
                        })
                    }
                    ArrayLength::Field(_) => Ok(Layout {
                        min_size: 0,
                        fixed_size: None,
                        variable_cause: Some(String::new()),
                        open_ended: false,
                    }),
                    ArrayLength::Remaining => Ok(Layout {
                        min_size: 0,
                        fixed_size: None,
                        variable_cause: Some(String::new()),
                        open_ended: true,
                    }),
                }
            }
        }
    }

    fn layout_struct(&self, def: &mut StructDef) -> Result<Layout, ModelError> {
        let mut min_size: u64 = 0;
        let mut fixed = true;
        let mut cause = None;
        let mut open_ended = false;
        let last = def.fields.len().saturating_sub(1);

        for (idx, field) in def.fields.iter_mut().enumerate() {
            let layout = self.layout_type(&mut field.ty)?;
            if layout.open_ended && idx != last {
                return Err(self.error(
                    &format!(", field {}", field.name),
                    ModelErrorKind::MisplacedRemainingArray,
                ));
            }
            min_size = min_size
                .checked_add(layout.min_size)
                .ok_or_else(|| self.error("", ModelErrorKind::SizeOverflow))?;
            let field_cause = layout
                .variable_cause
                .as_ref()
                .map(|inner| join_cause(&field.name, inner));
            if layout.fixed_size.is_none() {
                fixed = false;
                if cause.is_none() {
                    cause = field_cause.clone();
                }
            }
            open_ended |= layout.open_ended;
            field.layout = Layout {
                variable_cause: field_cause,
                ..layout
            };
        }

        let layout = Layout {
            min_size,
            fixed_size: fixed.then_some(min_size),
            variable_cause: cause,
            open_ended,
        };
        def.layout = layout.clone();
        Ok(layout)
    }

    fn layout_switch(&self, sw: &mut SwitchDef) -> Result<Layout, ModelError> {
        let mut min_size: Option<u64> = None;
        let mut sizes = Vec::new();
        let mut open_ended = false;
        for arm in sw.arms_mut() {
            let layout = match &mut arm.arm {
                Some(ty) => self.layout_type(ty)?,
                None => Layout::fixed(0),
            };
            min_size = Some(min_size.map_or(layout.min_size, |m| m.min(layout.min_size)));
            sizes.push(layout.fixed_size);
            open_ended |= layout.open_ended;
            arm.layout = layout;
        }

        let min_size = min_size.unwrap_or(0);
        let fixed_size = match sizes.first() {
            Some(Some(first)) if sizes.iter().all(|s| *s == Some(*first)) => Some(*first),
            _ => None,
        };
        Ok(Layout {
            min_size,
            fixed_size,
            variable_cause: fixed_size.is_none().then(String::new),
            open_ended,
        })
    }
}

/// Joins a field name with the cause found inside its type.
fn join_cause(prefix: &str, inner: &str) -> String {
    if inner.is_empty() {
        prefix.to_string()
    } else if inner.starts_with('[') {
        format!("{prefix}{inner}")
    } else {
        format!("{prefix}.{inner}")
    }
}

fn check_pointer_targets(model: &ProtocolModel) -> Result<(), ModelError> {
    for named in model.types.values() {
        let location = format!("type {}", named.name);
        match &named.kind {
            NamedKind::Struct(def) => check_struct(model, def, &location)?,
            NamedKind::Switch(sw) => check_switch(model, sw, &location)?,
            NamedKind::Alias(ty) => check_type(model, ty, &location)?,
            NamedKind::Scalar(_) | NamedKind::Enum(_) => {}
        }
    }
    for channel in &model.channels {
        for direction in [Direction::Server, Direction::Client] {
            for message in channel.own_messages(direction) {
                let location = message_location(&channel.name, direction, &message.name);
                check_struct(model, &message.body, &location)?;
            }
        }
    }
    Ok(())
}

fn check_struct(model: &ProtocolModel, def: &StructDef, location: &str) -> Result<(), ModelError> {
    for field in &def.fields {
        check_type(model, &field.ty, &format!("{location}, field {}", field.name))?;
    }
    Ok(())
}

fn check_switch(model: &ProtocolModel, sw: &SwitchDef, location: &str) -> Result<(), ModelError> {
    for arm in sw.arms() {
        if let Some(ty) = &arm.arm {
            check_type(model, ty, location)?;
        }
    }
    Ok(())
}

fn check_type(model: &ProtocolModel, ty: &FieldType, location: &str) -> Result<(), ModelError> {
    match ty {
        FieldType::Scalar(_) | FieldType::Enum(_) | FieldType::Named(_) => Ok(()),
        FieldType::Struct(def) => check_struct(model, def, location),
        FieldType::Switch(sw) => check_switch(model, sw, location),
        FieldType::Array(array) => check_type(model, &array.element, location),
        FieldType::Pointer(ptr) => {
            let target = model
                .struct_target(ptr.target.index)
                .map(|(named, _)| named.layout.min_size);
            match target {
                Some(min_size) if min_size > 0 => Ok(()),
                Some(_) => Err(ModelError::new(
                    location,
                    ModelErrorKind::InvalidPointerTarget {
                        target: ptr.target.name.clone(),
                        reason: "target has a minimum size of zero".to_string(),
                    },
                )),
                None => Err(ModelError::new(
                    location,
                    ModelErrorKind::InvalidPointerTarget {
                        target: ptr.target.name.clone(),
                        reason: "pointer targets must be named structs".to_string(),
                    },
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::load;

    fn model(source: &str) -> ProtocolModel {
        load(source).expect("load")
    }

    fn layout_of<'a>(model: &'a ProtocolModel, name: &str) -> &'a Layout {
        &model.types[name].layout
    }

    #[test]
    fn struct_of_scalars_is_fixed() {
        let model = model(
            r#"
name: test
types:
  - name: Rect
    kind:
      struct:
        fields:
          - { name: top, field-type: { primitive: i32 } }
          - { name: left, field-type: { primitive: i32 } }
          - { name: bottom, field-type: { primitive: i32 } }
          - { name: right, field-type: { primitive: i32 } }
  - name: Pair
    kind:
      struct:
        fields:
          - { name: flag, field-type: { primitive: u8 } }
          - { name: rect, field-type: { type-ref: { name: Rect } } }
"#,
        );
        assert_eq!(layout_of(&model, "Rect"), &Layout::fixed(16));
        assert_eq!(layout_of(&model, "Pair"), &Layout::fixed(17));
    }

    #[test]
    fn counted_array_makes_struct_variable() {
        let model = model(
            r#"
name: test
types:
  - name: Items
    kind:
      struct:
        fields:
          - { name: count, field-type: { primitive: u32 } }
          - name: items
            field-type:
              array:
                size: { field: count }
                element-type: { primitive: u16 }
  - name: Outer
    kind:
      struct:
        fields:
          - { name: header, field-type: { type-ref: { name: Items } } }
          - { name: tail, field-type: { primitive: u8 } }
"#,
        );
        let items = layout_of(&model, "Items");
        assert_eq!(items.min_size, 4);
        assert!(!items.is_fixed_size());
        assert_eq!(items.variable_cause.as_deref(), Some("items"));
        assert!(!items.open_ended);

        let outer = layout_of(&model, "Outer");
        assert_eq!(outer.min_size, 5);
        assert_eq!(outer.variable_cause.as_deref(), Some("header.items"));

        let NamedKind::Struct(def) = &model.types["Items"].kind else {
            panic!("expected struct");
        };
        assert_eq!(def.fields[0].layout, Layout::fixed(4));
        assert_eq!(def.fields[1].layout.min_size, 0);
    }

    #[test]
    fn literal_array_of_variable_elements() {
        let model = model(
            r#"
name: test
types:
  - name: Chunk
    kind:
      struct:
        fields:
          - { name: len, field-type: { primitive: u8 } }
          - name: data
            field-type:
              array:
                size: { field: len }
                element-type: { primitive: u8 }
  - name: Chunks
    kind:
      struct:
        fields:
          - name: chunks
            field-type:
              array:
                size: { literal: 3 }
                element-type: { type-ref: { name: Chunk } }
"#,
        );
        let chunks = layout_of(&model, "Chunks");
        assert_eq!(chunks.min_size, 3);
        assert_eq!(chunks.variable_cause.as_deref(), Some("chunks[].data"));
    }

    #[test]
    fn switch_takes_smallest_arm() {
        let model = model(
            r#"
name: test
types:
  - name: Shape
    kind:
      struct:
        fields:
          - { name: kind, field-type: { primitive: u8 } }
          - name: body
            field-type:
              switch:
                discriminant: kind
                cases:
                  - { name: point, values: [0], arm-type: { primitive: u32 } }
                  - { name: wide, values: [1], arm-type: { primitive: u64 } }
                  - { name: none, values: [2] }
  - name: Same
    kind:
      struct:
        fields:
          - { name: kind, field-type: { primitive: u8 } }
          - name: body
            field-type:
              switch:
                discriminant: kind
                cases:
                  - { name: a, values: [0], arm-type: { primitive: u32 } }
                  - { name: b, values: [1], arm-type: { primitive: i32 } }
"#,
        );
        let shape = layout_of(&model, "Shape");
        assert_eq!(shape.min_size, 1);
        assert!(!shape.is_fixed_size());
        assert_eq!(shape.variable_cause.as_deref(), Some("body"));
        assert_eq!(layout_of(&model, "Same"), &Layout::fixed(5));
    }

    #[test]
    fn pointer_contributes_offset_width() {
        let model = model(
            r#"
name: test
types:
  - name: Node
    kind:
      struct:
        fields:
          - { name: value, field-type: { primitive: u32 } }
          - name: next
            field-type:
              pointer: { target: Node, offset-type: u16 }
"#,
        );
        assert_eq!(layout_of(&model, "Node"), &Layout::fixed(6));
    }

    #[test]
    fn remaining_array_must_be_last() {
        let err = load(
            r#"
name: test
types:
  - name: Bad
    kind:
      struct:
        fields:
          - name: rest
            field-type:
              array:
                size: remaining
                element-type: { primitive: u8 }
          - { name: tail, field-type: { primitive: u8 } }
"#,
        )
        .unwrap_err();
        assert_eq!(err.location, "type Bad, field rest");
        assert_eq!(err.kind, ModelErrorKind::MisplacedRemainingArray);
    }

    #[test]
    fn open_ended_propagates_through_nesting() {
        let model = model(
            r#"
name: test
types:
  - name: Tail
    kind:
      struct:
        fields:
          - { name: kind, field-type: { primitive: u8 } }
          - name: rest
            field-type:
              array:
                size: remaining
                element-type: { primitive: u8 }
  - name: Wrapper
    kind:
      struct:
        fields:
          - { name: id, field-type: { primitive: u32 } }
          - { name: tail, field-type: { type-ref: { name: Tail } } }
"#,
        );
        let wrapper = layout_of(&model, "Wrapper");
        assert!(wrapper.open_ended);
        assert_eq!(wrapper.min_size, 5);
        assert_eq!(wrapper.variable_cause.as_deref(), Some("tail.rest"));
    }

    #[test]
    fn containment_cycle_is_fatal() {
        let err = load(
            r#"
name: test
types:
  - name: A
    kind:
      struct:
        fields:
          - { name: b, field-type: { type-ref: { name: B } } }
  - name: B
    kind:
      struct:
        fields:
          - { name: a, field-type: { type-ref: { name: A } } }
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.kind,
            ModelErrorKind::ContainmentCycle(vec![
                "A".to_string(),
                "B".to_string(),
                "A".to_string()
            ])
        );
    }

    #[test]
    fn zero_sized_pointer_target_is_rejected() {
        let err = load(
            r#"
name: test
types:
  - name: Empty
    kind:
      struct: {}
  - name: Holder
    kind:
      struct:
        fields:
          - name: ptr
            field-type:
              pointer: { target: Empty }
"#,
        )
        .unwrap_err();
        assert_eq!(err.location, "type Holder, field ptr");
        assert!(matches!(err.kind, ModelErrorKind::InvalidPointerTarget { .. }));
    }

    #[test]
    fn huge_literal_array_overflows() {
        let err = load(
            r#"
name: test
types:
  - name: Huge
    kind:
      array:
        size: { literal: 4611686018427387904 }
        element-type: { primitive: u64 }
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ModelErrorKind::SizeOverflow);
    }

    #[test]
    fn minimum_size_never_exceeds_sum_of_children() {
        let model = model(
            r#"
name: test
types:
  - name: Inner
    kind:
      struct:
        fields:
          - { name: n, field-type: { primitive: u16 } }
          - name: v
            field-type:
              array:
                size: { field: n }
                element-type: { primitive: u32 }
  - name: Outer
    kind:
      struct:
        fields:
          - { name: a, field-type: { type-ref: { name: Inner } } }
          - { name: b, field-type: { type-ref: { name: Inner } } }
"#,
        );
        let NamedKind::Struct(outer) = &model.types["Outer"].kind else {
            panic!("expected struct");
        };
        let sum: u64 = outer.fields.iter().map(|f| f.layout.min_size).sum();
        assert_eq!(layout_of(&model, "Outer").min_size, sum);
        for field in &outer.fields {
            assert!(field.layout.min_size <= layout_of(&model, "Outer").min_size);
        }
    }

    #[test]
    fn message_bodies_are_annotated() {
        let model = model(
            r#"
name: spice
channels:
  - name: display
    server-messages:
      - name: draw
        fields:
          - { name: surface, field-type: { primitive: u32 } }
          - { name: count, field-type: { primitive: u32 } }
          - name: items
            field-type:
              array:
                size: { field: count }
                element-type: { primitive: u16 }
"#,
        );
        let body = &model.channels[0].server_messages[0].body;
        assert_eq!(body.layout.min_size, 8);
        assert_eq!(body.layout.variable_cause.as_deref(), Some("items"));
    }
}
