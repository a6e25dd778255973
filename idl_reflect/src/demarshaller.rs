/* Runtime demarshaller - executes decode plans against untrusted bytes */

use crate::errors::{DecodeError, DecodeErrorKind};
use crate::value::Value;
use idl_gen::codegen::ErrorPolicy;
use idl_gen::codegen::shared::ir::{
    ArrayPlan, DemarshalIr, EnumPlan, LengthPlan, MessagePlan, PlanNode, PointerPlan, StructPlan,
    SwitchPlan,
};
use idl_types::{ByteOrder, IntegralType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runtime switches for one demarshaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    pub policy: ErrorPolicy,
    /// Deepest pointer chain followed before failing with `DepthExceeded`.
    pub max_pointer_depth: Option<usize>,
}

/// Counters collected during one decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub pointers_followed: usize,
    /// Pointers resolved from an already decoded target.
    pub cache_hits: usize,
}

/// Decodes messages and named structs of one plan.
///
/// Every read is bounds-checked. Malformed input never reads outside the
/// buffer and never panics unless the abort policy asks for it.
pub struct Demarshaller<'a> {
    ir: &'a DemarshalIr,
    options: DecodeOptions,
}

impl<'a> Demarshaller<'a> {
    pub fn new(ir: &'a DemarshalIr) -> Self {
        Self::with_options(ir, DecodeOptions::default())
    }

    pub fn with_options(ir: &'a DemarshalIr, options: DecodeOptions) -> Self {
        Self { ir, options }
    }

    pub fn ir(&self) -> &'a DemarshalIr {
        self.ir
    }

    pub fn decode_message(&self, plan: &MessagePlan, buf: &[u8]) -> Result<Value, DecodeError> {
        self.decode_message_with_stats(plan, buf).map(|(value, _)| value)
    }

    pub fn decode_message_with_stats(
        &self,
        plan: &MessagePlan,
        buf: &[u8],
    ) -> Result<(Value, DecodeStats), DecodeError> {
        let path = format!("{}.{}", plan.channel, plan.name);
        self.run(&plan.body, buf, path)
    }

    /// Looks the message up by channel and message value, as a receiver would.
    pub fn decode_by_value(
        &self,
        channel: u64,
        direction: idl_gen::model::Direction,
        msg_type: u64,
        buf: &[u8],
    ) -> Result<Value, DecodeError> {
        match self.ir.message(channel, direction, msg_type) {
            Some(plan) => self.decode_message(plan, buf),
            None => Err(self.report(DecodeError::new(
                DecodeErrorKind::UnknownMessage,
                format!("channel {channel}, {direction} message {msg_type}"),
            ))),
        }
    }

    /// Decodes a buffer holding one named struct at offset zero.
    pub fn decode_type(&self, type_index: usize, buf: &[u8]) -> Option<Result<Value, DecodeError>> {
        let plan = self.ir.types.get(type_index)?;
        Some(
            self.run(&plan.root, buf, plan.type_name.clone())
                .map(|(value, _)| value),
        )
    }

    fn run(
        &self,
        root: &StructPlan,
        buf: &[u8],
        path: String,
    ) -> Result<(Value, DecodeStats), DecodeError> {
        let mut run = Run::new(self.ir, buf, root.min_size, self.options.max_pointer_depth);
        let mut pos = 0usize;
        let mut path = path;
        match run.read_struct(root, &mut pos, &mut path) {
            Ok(value) => {
                debug!(
                    consumed = pos,
                    len = buf.len(),
                    pointers = run.stats.pointers_followed,
                    cache_hits = run.stats.cache_hits,
                    "decoded"
                );
                Ok((value, run.stats))
            }
            Err(err) => Err(self.report(err)),
        }
    }

    fn report(&self, err: DecodeError) -> DecodeError {
        match self.options.policy {
            ErrorPolicy::Silent => err,
            ErrorPolicy::Report => {
                warn!(path = err.path(), kind = err.kind().as_str(), "demarshal error");
                err
            }
            ErrorPolicy::Abort => panic!("demarshal error: {err}"),
        }
    }
}

/// State of one decode: the buffer, the pointee ranges in progress and the
/// cache of finished pointees.
struct Run<'a> {
    ir: &'a DemarshalIr,
    buf: &'a [u8],
    active: Vec<(u64, u64)>,
    cache: HashMap<(usize, u64), Arc<Value>>,
    max_depth: Option<usize>,
    stats: DecodeStats,
}

fn fail<T>(kind: DecodeErrorKind, path: &str) -> Result<T, DecodeError> {
    Err(DecodeError::new(kind, path))
}

impl<'a> Run<'a> {
    fn new(ir: &'a DemarshalIr, buf: &'a [u8], root_min: u64, max_depth: Option<usize>) -> Self {
        Self {
            ir,
            buf,
            active: vec![(0, root_min.min(buf.len() as u64))],
            cache: HashMap::new(),
            max_depth,
            stats: DecodeStats::default(),
        }
    }

    fn remaining(&self, pos: usize) -> u64 {
        self.buf.len().saturating_sub(pos) as u64
    }

    /* `path` is extended in place while a child is decoded and restored after */
    fn read_struct(
        &mut self,
        plan: &StructPlan,
        pos: &mut usize,
        path: &mut String,
    ) -> Result<Value, DecodeError> {
        if self.remaining(*pos) < plan.min_size {
            return fail(DecodeErrorKind::Truncated, path);
        }
        let mut fields: Vec<(String, Value)> = Vec::with_capacity(plan.fields.len());
        for field in &plan.fields {
            let mark = path.len();
            path.push('.');
            path.push_str(&field.name);
            let value = self.read_node(&field.node, &fields, pos, path)?;
            path.truncate(mark);
            fields.push((field.name.clone(), value));
        }
        Ok(Value::Struct { fields })
    }

    fn read_node(
        &mut self,
        node: &PlanNode,
        siblings: &[(String, Value)],
        pos: &mut usize,
        path: &mut String,
    ) -> Result<Value, DecodeError> {
        match node {
            PlanNode::Scalar { int_type } => self.read_int(*int_type, pos, path),
            PlanNode::Enum(plan) => self.read_enum(plan, pos, path),
            PlanNode::Struct(plan) => self.read_struct(plan, pos, path),
            PlanNode::Nested { type_index, .. } => {
                let ir = self.ir;
                // only reachable with a plan assembled by hand
                let Some(target) = ir.types.get(*type_index) else {
                    return fail(DecodeErrorKind::UnknownMessage, path);
                };
                self.read_struct(&target.root, pos, path)
            }
            PlanNode::Array(array) => self.read_array(array, siblings, pos, path),
            PlanNode::Switch(switch) => self.read_switch(switch, siblings, pos, path),
            PlanNode::Pointer(ptr) => self.read_pointer(ptr, pos, path),
        }
    }

    fn read_int(
        &mut self,
        int_type: IntegralType,
        pos: &mut usize,
        path: &str,
    ) -> Result<Value, DecodeError> {
        let bits = self.read_bits(int_type, pos, path)?;
        Ok(int_value(int_type, bits))
    }

    /* Zero-extended raw bits of an integer at `pos` */
    fn read_bits(
        &mut self,
        int_type: IntegralType,
        pos: &mut usize,
        path: &str,
    ) -> Result<u64, DecodeError> {
        let width = int_type.width() as usize;
        let Some(bytes) = pos
            .checked_add(width)
            .and_then(|end| self.buf.get(*pos..end))
        else {
            return fail(DecodeErrorKind::Truncated, path);
        };
        let mut raw = [0u8; 8];
        let bits = match int_type.byte_order() {
            ByteOrder::Little => {
                raw[..width].copy_from_slice(bytes);
                u64::from_le_bytes(raw)
            }
            ByteOrder::Big => {
                raw[8 - width..].copy_from_slice(bytes);
                u64::from_be_bytes(raw)
            }
        };
        *pos += width;
        Ok(bits)
    }

    fn read_enum(
        &mut self,
        plan: &EnumPlan,
        pos: &mut usize,
        path: &str,
    ) -> Result<Value, DecodeError> {
        let bits = self.read_bits(plan.int_type, pos, path)?;
        if !plan.accepts(bits) {
            return fail(DecodeErrorKind::InvalidEnumValue, path);
        }
        Ok(Value::Enum {
            bits,
            member: plan.member_name(bits).map(str::to_string),
        })
    }

    fn read_array(
        &mut self,
        array: &ArrayPlan,
        siblings: &[(String, Value)],
        pos: &mut usize,
        path: &mut String,
    ) -> Result<Value, DecodeError> {
        let bound = array.element_bound();
        let count = match &array.length {
            LengthPlan::Literal { count } => {
                let Some(need) = count.checked_mul(bound) else {
                    return fail(DecodeErrorKind::Overflow, path);
                };
                if need > self.remaining(*pos) {
                    return fail(DecodeErrorKind::Truncated, path);
                }
                *count
            }
            LengthPlan::Sibling { slot, int_type, .. } => {
                let Some(bits) = siblings
                    .get(*slot)
                    .and_then(|(_, v)| raw_bits(v, *int_type))
                else {
                    return fail(DecodeErrorKind::InvalidCount, path);
                };
                // Enum-typed lengths carry raw bits, so sign comes from the field type.
                let count = match int_value(*int_type, bits) {
                    Value::Signed { value } if value < 0 => {
                        return fail(DecodeErrorKind::InvalidCount, path);
                    }
                    _ => bits,
                };
                let Some(need) = count.checked_mul(bound) else {
                    return fail(DecodeErrorKind::Overflow, path);
                };
                if need > self.remaining(*pos) {
                    return fail(DecodeErrorKind::Truncated, path);
                }
                count
            }
            LengthPlan::Remaining => match array.element_fixed {
                Some(0) => 0,
                Some(size) => self.remaining(*pos) / size,
                None => return self.read_open_ended(array, pos, path),
            },
        };

        // count * bound <= remaining, so the allocation is bounded by the input
        let mut elements = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mark = path.len();
            path.push_str(&format!("[{index}]"));
            elements.push(self.read_node(&array.element, &[], pos, path)?);
            path.truncate(mark);
        }
        Ok(Value::Array { elements })
    }

    fn read_open_ended(
        &mut self,
        array: &ArrayPlan,
        pos: &mut usize,
        path: &mut String,
    ) -> Result<Value, DecodeError> {
        let mut elements = Vec::new();
        while *pos < self.buf.len() {
            let start = *pos;
            let mark = path.len();
            path.push_str(&format!("[{}]", elements.len()));
            elements.push(self.read_node(&array.element, &[], pos, path)?);
            path.truncate(mark);
            if *pos == start {
                break;
            }
        }
        Ok(Value::Array { elements })
    }

    fn read_switch(
        &mut self,
        switch: &SwitchPlan,
        siblings: &[(String, Value)],
        pos: &mut usize,
        path: &mut String,
    ) -> Result<Value, DecodeError> {
        let Some(bits) = siblings
            .get(switch.slot)
            .and_then(|(_, v)| raw_bits(v, switch.int_type))
        else {
            return fail(DecodeErrorKind::InvalidDiscriminant, path);
        };
        let Some(case) = switch.select(bits) else {
            return fail(DecodeErrorKind::InvalidDiscriminant, path);
        };
        let value = match &case.node {
            Some(node) => {
                let mark = path.len();
                path.push('.');
                path.push_str(&case.name);
                let value = self.read_node(node, &[], pos, path)?;
                path.truncate(mark);
                Some(Box::new(value))
            }
            None => None,
        };
        Ok(Value::Switch {
            case: case.name.clone(),
            value,
        })
    }

    fn read_pointer(
        &mut self,
        ptr: &PointerPlan,
        pos: &mut usize,
        path: &mut String,
    ) -> Result<Value, DecodeError> {
        let bits = self.read_bits(ptr.offset_type, pos, path)?;
        let offset = match int_value(ptr.offset_type, bits) {
            Value::Signed { value } if value < 0 => {
                return fail(DecodeErrorKind::InvalidOffset, path);
            }
            _ => bits,
        };
        if offset == 0 {
            return Ok(Value::Pointer {
                offset,
                target: None,
            });
        }
        let target = self.follow(ptr, offset, path)?;
        Ok(Value::Pointer {
            offset,
            target: Some(target),
        })
    }

    fn follow(
        &mut self,
        ptr: &PointerPlan,
        offset: u64,
        path: &mut String,
    ) -> Result<Arc<Value>, DecodeError> {
        if let Some(hit) = self.cache.get(&(ptr.target_index, offset)) {
            self.stats.cache_hits += 1;
            return Ok(Arc::clone(hit));
        }
        /* the root range is always on the stack */
        let depth = self.active.len();
        if self.max_depth.is_some_and(|max| depth > max) {
            return fail(DecodeErrorKind::DepthExceeded, path);
        }
        let Some(end) = offset.checked_add(ptr.target_min) else {
            return fail(DecodeErrorKind::Overflow, path);
        };
        if end > self.buf.len() as u64 {
            return fail(DecodeErrorKind::Truncated, path);
        }
        if self.active.iter().any(|&(s, e)| offset < e && s < end) {
            return fail(DecodeErrorKind::InvalidOffset, path);
        }

        let ir = self.ir;
        let Some(target) = ir.types.get(ptr.target_index) else {
            return fail(DecodeErrorKind::InvalidOffset, path);
        };
        self.active.push((offset, end));
        self.stats.pointers_followed += 1;
        let mut target_pos = offset as usize;
        let value = self.read_struct(&target.root, &mut target_pos, path);
        self.active.pop();

        let value = Arc::new(value?);
        self.cache
            .insert((ptr.target_index, offset), Arc::clone(&value));
        Ok(value)
    }
}

/* Zero-extended wire bits of an already decoded integer or enum */
fn raw_bits(value: &Value, int_type: IntegralType) -> Option<u64> {
    match value {
        Value::Unsigned { value } => Some(*value),
        Value::Signed { value } => Some((*value as u64) & int_type.max_unsigned()),
        Value::Enum { bits, .. } => Some(*bits),
        _ => None,
    }
}

fn int_value(int_type: IntegralType, bits: u64) -> Value {
    if !int_type.is_signed() {
        return Value::Unsigned { value: bits };
    }
    let shift = 64 - int_type.width() * 8;
    Value::Signed {
        value: ((bits << shift) as i64) >> shift,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension() {
        assert_eq!(int_value(IntegralType::I8, 0xff), Value::Signed { value: -1 });
        assert_eq!(int_value(IntegralType::I16, 0x7fff), Value::Signed { value: 32767 });
        assert_eq!(
            int_value(IntegralType::I64, u64::MAX),
            Value::Signed { value: -1 }
        );
        assert_eq!(int_value(IntegralType::U8, 0xff), Value::Unsigned { value: 255 });
    }

    #[test]
    fn raw_bits_of_signed_values() {
        assert_eq!(raw_bits(&Value::Signed { value: -1 }, IntegralType::I8), Some(0xff));
        assert_eq!(
            raw_bits(&Value::Enum { bits: 0xff, member: None }, IntegralType::I8),
            Some(0xff)
        );
        assert_eq!(raw_bits(&Value::Array { elements: vec![] }, IntegralType::U8), None);
    }

    #[test]
    fn big_endian_reads() {
        let ir = DemarshalIr::new("t".into(), vec![], vec![]);
        let mut run = Run::new(&ir, &[0x01, 0x02, 0x03], 0, None);
        let mut pos = 0;
        assert_eq!(run.read_bits(IntegralType::U16Be, &mut pos, "x"), Ok(0x0102));
        assert_eq!(pos, 2);
        assert_eq!(
            run.read_bits(IntegralType::U16, &mut pos, "x").map_err(|e| e.kind()),
            Err(DecodeErrorKind::Truncated)
        );
        assert_eq!(pos, 2);
    }
}
