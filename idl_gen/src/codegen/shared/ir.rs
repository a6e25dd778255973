//! Decode plan IR shared by the Rust emitter and the runtime demarshaller.
//!
//! The plan is built once from the annotated model. Every sibling reference
//! is already a slot index, every switch label a number and every size a
//! constant, so consumers never look anything up by name while decoding.
//!
//! # Example
//! ```
//! use idl_gen::codegen::shared::ir::*;
//! use idl_types::IntegralType;
//!
//! let plan = DemarshalIr::new(
//!     "demo".into(),
//!     vec![TypePlan {
//!         type_name: "Point".into(),
//!         root: StructPlan {
//!             min_size: 8,
//!             fixed_size: Some(8),
//!             fields: vec![
//!                 FieldPlan::new("x", PlanNode::Scalar { int_type: IntegralType::I32 }),
//!                 FieldPlan::new("y", PlanNode::Scalar { int_type: IntegralType::I32 }),
//!             ],
//!         },
//!     }],
//!     vec![],
//! );
//!
//! assert_eq!(plan.version, IR_SCHEMA_VERSION);
//! assert_eq!(plan.type_index("Point"), Some(0));
//! ```

use crate::model::Direction;
use idl_types::IntegralType;
use serde_derive::{Deserialize, Serialize};

/// Schema version used for every serialized plan.
pub const IR_SCHEMA_VERSION: u32 = 1;

/// Container for every plan of one protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemarshalIr {
    /// Plan schema version (mirrors `IR_SCHEMA_VERSION`).
    pub version: u32,
    pub protocol: String,
    /// Named structs, referenced by index from `Nested` and `Pointer` nodes.
    pub types: Vec<TypePlan>,
    pub messages: Vec<MessagePlan>,
}

impl DemarshalIr {
    pub fn new(protocol: String, types: Vec<TypePlan>, messages: Vec<MessagePlan>) -> Self {
        Self {
            version: IR_SCHEMA_VERSION,
            protocol,
            types,
            messages,
        }
    }

    pub fn type_index(&self, name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.type_name == name)
    }

    /// Finds the plan for a message as seen on a channel, including inherited ones.
    pub fn message(
        &self,
        channel_value: u64,
        direction: Direction,
        message_value: u64,
    ) -> Option<&MessagePlan> {
        self.messages.iter().find(|m| {
            m.direction == direction
                && m.value == message_value
                && m.channel_values.contains(&channel_value)
        })
    }

    pub fn message_by_name(
        &self,
        channel: &str,
        direction: Direction,
        name: &str,
    ) -> Option<&MessagePlan> {
        self.messages
            .iter()
            .find(|m| m.direction == direction && m.name == name && m.channels.iter().any(|c| c == channel))
    }
}

/// Plan for one named struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypePlan {
    pub type_name: String,
    pub root: StructPlan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePlan {
    /// Channel that declares the message.
    pub channel: String,
    /// Every channel the message is valid on: the declaring channel and the
    /// channels inheriting from it.
    pub channels: Vec<String>,
    /// Numeric values of `channels`, in the same order.
    pub channel_values: Vec<u64>,
    pub direction: Direction,
    pub name: String,
    pub value: u64,
    /// Named struct used as the body, if the message declares one.
    #[serde(default)]
    pub body_type: Option<String>,
    pub body: StructPlan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructPlan {
    /// Checked against the remaining bytes before the first field is read.
    pub min_size: u64,
    #[serde(default)]
    pub fixed_size: Option<u64>,
    pub fields: Vec<FieldPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldPlan {
    pub name: String,
    pub node: PlanNode,
}

impl FieldPlan {
    pub fn new(name: impl Into<String>, node: PlanNode) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum PlanNode {
    Scalar { int_type: IntegralType },
    Enum(EnumPlan),
    /// Anonymous struct declared in place.
    Struct(StructPlan),
    /// By-value use of a named struct.
    Nested { type_index: usize, type_name: String },
    Array(ArrayPlan),
    Switch(SwitchPlan),
    Pointer(PointerPlan),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnumPlan {
    #[serde(default)]
    pub type_name: Option<String>,
    pub int_type: IntegralType,
    pub members: Vec<EnumMemberPlan>,
    pub flags: bool,
}

impl EnumPlan {
    pub fn mask(&self) -> u64 {
        self.members.iter().fold(0, |acc, m| acc | m.value)
    }

    /// True when `bits` (zero-extended from the encoded width) is a valid value.
    pub fn accepts(&self, bits: u64) -> bool {
        if self.flags {
            bits & !self.mask() == 0
        } else {
            self.members.iter().any(|m| m.value == bits)
        }
    }

    pub fn member_name(&self, bits: u64) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.value == bits)
            .map(|m| m.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnumMemberPlan {
    pub name: String,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArrayPlan {
    pub length: LengthPlan,
    pub element: Box<PlanNode>,
    pub element_min: u64,
    #[serde(default)]
    pub element_fixed: Option<u64>,
}

impl ArrayPlan {
    /// Per-element lower bound used to reject impossible counts. Never zero,
    /// so a count can not exceed the bytes left even for empty elements.
    pub fn element_bound(&self) -> u64 {
        self.element_min.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LengthPlan {
    Literal { count: u64 },
    /// Count read from an earlier field of the same struct.
    Sibling {
        name: String,
        slot: usize,
        int_type: IntegralType,
    },
    /// Every byte left in the buffer.
    Remaining,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchPlan {
    #[serde(default)]
    pub type_name: Option<String>,
    pub discriminant: String,
    /// Slot of the discriminant in the enclosing struct.
    pub slot: usize,
    pub int_type: IntegralType,
    pub cases: Vec<CasePlan>,
    #[serde(default)]
    pub default: Option<CasePlan>,
}

impl SwitchPlan {
    /// Selects the arm for a discriminant value.
    pub fn select(&self, bits: u64) -> Option<&CasePlan> {
        self.cases
            .iter()
            .find(|c| c.values.contains(&bits))
            .or(self.default.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CasePlan {
    pub name: String,
    pub values: Vec<u64>,
    /// `None` for an empty arm.
    #[serde(default)]
    pub node: Option<Box<PlanNode>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointerPlan {
    pub offset_type: IntegralType,
    pub target_index: usize,
    pub target_name: String,
    pub target_min: u64,
}
