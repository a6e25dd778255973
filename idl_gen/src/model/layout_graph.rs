use crate::model::resolved::{FieldType, NamedKind, ProtocolModel, StructDef};
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "layout_graph_trace")]
fn trace_log(msg: impl AsRef<str>) {
    eprintln!("[layout_graph] {}", msg.as_ref());
}

#[cfg(not(feature = "layout_graph_trace"))]
fn trace_log(_msg: impl AsRef<str>) {}

/// Containment graph of named types, used to lay them out in dependency order.
///
/// Only by-value containment is an edge. A pointer target is sized on its own,
/// so recursion through pointers is legal.
#[derive(Debug)]
pub struct LayoutGraph {
    nodes: BTreeMap<String, LayoutGraphNode>,
}

#[derive(Debug, Clone)]
pub struct LayoutGraphNode {
    pub id: usize,
    pub name: String,
    pub deps: BTreeSet<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutGraphError {
    /// `cycle` is one concrete loop, first name repeated at the end. `blocked`
    /// lists every type that cannot be sized because it is on or depends on
    /// a loop.
    #[error("types contain each other by value: {}; cannot lay out {}", .cycle.join(" -> "), .blocked.join(", "))]
    ContainmentCycle {
        cycle: Vec<String>,
        blocked: Vec<String>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Placed,
    Blocked,
}

struct OrderWalk<'g> {
    nodes: &'g BTreeMap<String, LayoutGraphNode>,
    marks: BTreeMap<&'g str, Mark>,
    path: Vec<&'g str>,
    order: Vec<String>,
    cycle: Option<Vec<String>>,
}

impl<'g> OrderWalk<'g> {
    /// Places `name` after everything it contains. Returns false when a
    /// containment loop is reachable from it.
    fn visit(&mut self, name: &'g str) -> bool {
        match self.marks.get(name) {
            Some(Mark::Placed) => return true,
            Some(Mark::Blocked) => return false,
            Some(Mark::OnPath) => {
                if self.cycle.is_none() {
                    let from = self.path.iter().rposition(|n| *n == name).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        self.path[from..].iter().map(|n| n.to_string()).collect();
                    cycle.push(name.to_string());
                    self.cycle = Some(cycle);
                }
                return false;
            }
            None => {}
        }
        let nodes = self.nodes;
        let Some(node) = nodes.get(name) else {
            // Unknown names are reported by the parser.
            return true;
        };

        self.marks.insert(name, Mark::OnPath);
        self.path.push(name);
        let mut placeable = true;
        for dep in &node.deps {
            placeable &= self.visit(dep);
        }
        self.path.pop();

        if placeable {
            trace_log(format!("placed {name}"));
            self.marks.insert(name, Mark::Placed);
            self.order.push(name.to_string());
        } else {
            trace_log(format!("blocked {name}"));
            self.marks.insert(name, Mark::Blocked);
        }
        placeable
    }
}

impl LayoutGraph {
    pub fn build(model: &ProtocolModel) -> Self {
        let mut nodes = BTreeMap::new();
        for (idx, named) in model.types.values().enumerate() {
            let mut deps = BTreeSet::new();
            match &named.kind {
                NamedKind::Scalar(_) | NamedKind::Enum(_) => {}
                NamedKind::Struct(def) => collect_struct(def, &mut deps),
                NamedKind::Switch(sw) => {
                    for arm in sw.arms() {
                        if let Some(ty) = &arm.arm {
                            collect_dependencies(ty, &mut deps);
                        }
                    }
                }
                NamedKind::Alias(ty) => collect_dependencies(ty, &mut deps),
            }
            // A self edge stays: containing yourself by value has no finite size.
            nodes.insert(
                named.name.clone(),
                LayoutGraphNode {
                    id: idx,
                    name: named.name.clone(),
                    deps,
                },
            );
        }
        Self { nodes }
    }

    /// Orders types so every type follows the types it contains by value.
    ///
    /// Depth-first over names in sorted order, which keeps the result stable
    /// across runs and independent of declaration order.
    pub fn topo_order(&self) -> Result<Vec<String>, LayoutGraphError> {
        let mut walk = OrderWalk {
            nodes: &self.nodes,
            marks: BTreeMap::new(),
            path: Vec::new(),
            order: Vec::with_capacity(self.nodes.len()),
            cycle: None,
        };
        for name in self.nodes.keys() {
            walk.visit(name);
        }

        match walk.cycle {
            None => Ok(walk.order),
            Some(cycle) => {
                let blocked = walk
                    .marks
                    .iter()
                    .filter(|(_, mark)| **mark == Mark::Blocked)
                    .map(|(name, _)| name.to_string())
                    .collect();
                Err(LayoutGraphError::ContainmentCycle { cycle, blocked })
            }
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LayoutGraphNode> {
        self.nodes.values()
    }
}

fn collect_struct(def: &StructDef, deps: &mut BTreeSet<String>) {
    for field in &def.fields {
        collect_dependencies(&field.ty, deps);
    }
}

fn collect_dependencies(ty: &FieldType, deps: &mut BTreeSet<String>) {
    match ty {
        FieldType::Scalar(_) | FieldType::Enum(_) | FieldType::Pointer(_) => {}
        FieldType::Named(r) => {
            deps.insert(r.name.clone());
        }
        FieldType::Struct(def) => collect_struct(def, deps),
        FieldType::Switch(sw) => {
            for arm in sw.arms() {
                if let Some(ty) = &arm.arm {
                    collect_dependencies(ty, deps);
                }
            }
        }
        FieldType::Array(array) => collect_dependencies(&array.element, deps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parser::parse_protocol;

    fn graph(source: &str) -> LayoutGraph {
        LayoutGraph::build(&parse_protocol(source).expect("parse"))
    }

    #[test]
    fn layout_graph_topological_order() {
        let graph = graph(
            r#"
name: test
types:
  - name: B
    kind:
      primitive: u32
  - name: A
    kind:
      struct:
        fields:
          - name: field_b
            field-type:
              type-ref:
                name: B
"#,
        );
        let order = graph.topo_order().unwrap();
        assert_eq!(order, vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn layout_graph_detects_cycle() {
        let graph = graph(
            r#"
name: test
types:
  - name: X
    kind:
      struct:
        fields:
          - name: y
            field-type:
              type-ref:
                name: Y
  - name: Y
    kind:
      struct:
        fields:
          - name: x
            field-type:
              type-ref:
                name: X
"#,
        );
        let err = graph.topo_order().unwrap_err();
        assert_eq!(
            err,
            LayoutGraphError::ContainmentCycle {
                cycle: vec!["X".to_string(), "Y".to_string(), "X".to_string()],
                blocked: vec!["X".to_string(), "Y".to_string()],
            }
        );
    }

    #[test]
    fn dependents_of_a_cycle_are_blocked() {
        let graph = graph(
            r#"
name: test
types:
  - name: Leaf
    kind:
      primitive: u8
  - name: Outer
    kind:
      struct:
        fields:
          - { name: leaf, field-type: { type-ref: { name: Leaf } } }
          - { name: loop, field-type: { type-ref: { name: Ring } } }
  - name: Ring
    kind:
      struct:
        fields:
          - { name: again, field-type: { type-ref: { name: Ring } } }
"#,
        );
        let LayoutGraphError::ContainmentCycle { cycle, blocked } = graph.topo_order().unwrap_err();
        assert_eq!(cycle, vec!["Ring".to_string(), "Ring".to_string()]);
        assert_eq!(blocked, vec!["Outer".to_string(), "Ring".to_string()]);
    }

    #[test]
    fn self_containment_is_a_cycle() {
        let graph = graph(
            r#"
name: test
types:
  - name: Node
    kind:
      struct:
        fields:
          - name: child
            field-type:
              struct:
                fields:
                  - name: again
                    field-type:
                      type-ref:
                        name: Node
"#,
        );
        assert!(graph.topo_order().is_err());
    }

    #[test]
    fn pointers_do_not_create_edges() {
        let graph = graph(
            r#"
name: test
types:
  - name: Node
    kind:
      struct:
        fields:
          - name: value
            field-type:
              primitive: u8
          - name: next
            field-type:
              pointer:
                target: Node
"#,
        );
        assert_eq!(graph.topo_order().unwrap(), vec!["Node".to_string()]);
        assert!(graph.nodes().all(|node| node.deps.is_empty()));
    }

    #[test]
    fn collects_nested_dependencies() {
        let graph = graph(
            r#"
name: test
types:
  - name: Node
    kind:
      struct:
        fields:
          - name: tag
            field-type:
              primitive: u8
          - name: body
            field-type:
              switch:
                discriminant: tag
                cases:
                  - name: leaves
                    values: [0]
                    arm-type:
                      array:
                        size:
                          literal: 2
                        element-type:
                          type-ref:
                            name: Leaf
  - name: Leaf
    kind:
      primitive: u8
"#,
        );
        let order = graph.topo_order().unwrap();
        assert_eq!(order, vec!["Leaf".to_string(), "Node".to_string()]);
    }

    #[test]
    fn deterministic_order_with_multiple_roots() {
        let graph = graph(
            r#"
name: test
types:
  - name: C
    kind:
      primitive: u8
  - name: A
    kind:
      primitive: u8
  - name: B
    kind:
      primitive: u8
"#,
        );
        let order = graph.topo_order().unwrap();
        assert_eq!(
            order,
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }
}
