use super::helpers::{
    bits_expr, field_ident, fn_ident, from_bytes_fn, local_ident, pattern, type_ident,
};
use super::runtime::CacheField;
use crate::codegen::shared::builder::PlanBuildError;
use crate::codegen::shared::ir::{
    ArrayPlan, DemarshalIr, EnumPlan, LengthPlan, MessagePlan, PlanNode, PointerPlan, StructPlan,
    SwitchPlan,
};
use crate::codegen::writer::CodeWriter;
use crate::codegen::GenerateError;
use crate::model::Direction;
use idl_types::IntegralType;
use std::collections::BTreeSet;

/// Public entry point generated for one message.
pub struct MessageEntry {
    pub variant: String,
    pub type_name: String,
    pub parse_fn: String,
}

/// Emits types and reader functions for decode plans.
///
/// Every struct plan becomes a `pub struct` plus a `read_*` function taking
/// the decode context and a cursor. Items are written children first, and a
/// name is only ever emitted once, so recursion through pointers terminates.
pub struct DemarshalEmitter<'a> {
    ir: &'a DemarshalIr,
    items: CodeWriter,
    emitted: BTreeSet<String>,
    caches: Vec<CacheField>,
}

impl<'a> DemarshalEmitter<'a> {
    pub fn new(ir: &'a DemarshalIr) -> Self {
        Self {
            ir,
            items: CodeWriter::new(),
            emitted: BTreeSet::new(),
            caches: Vec::new(),
        }
    }

    pub fn finish(self) -> (CodeWriter, Vec<CacheField>) {
        (self.items, self.caches)
    }

    pub fn emit_message(&mut self, message: &MessagePlan) -> Result<MessageEntry, GenerateError> {
        let marker = match message.direction {
            Direction::Server => "msg",
            Direction::Client => "msgc",
        };
        let qualified = format!("{marker}_{}_{}", message.channel, message.name);
        let path = format!("{}.{}", message.channel, message.name);

        let type_name = match &message.body_type {
            Some(body) => {
                let index = self
                    .ir
                    .type_index(body)
                    .ok_or_else(|| PlanBuildError::NotAStruct(body.clone()))?;
                self.emit_named_struct(index)?;
                type_ident(body)
            }
            None => {
                let name = type_ident(&qualified);
                self.emit_struct(&name, &message.body, &path)?;
                name
            }
        };

        let parse_fn = format!("parse_{}", fn_ident(&qualified));
        let w = &mut self.items;
        w.line(format!(
            "/// Decodes {} message `{}` of channel `{}`.",
            message.direction, message.name, message.channel
        ))?;
        w.open(format!(
            "pub fn {parse_fn}(buf: &[u8]) -> Result<{type_name}, DemarshalError>"
        ))?;
        w.line(format!(
            "let mut ctx = Ctx::new(buf, {});",
            message.body.min_size
        ))?;
        w.line("let mut pos = 0usize;")?;
        w.line(format!("read_{}(&mut ctx, &mut pos)", fn_ident(&type_name)))?;
        w.close("")?;
        w.blank()?;

        Ok(MessageEntry {
            variant: type_ident(&format!("{}_{}", message.channel, message.name)),
            type_name,
            parse_fn,
        })
    }

    fn emit_named_struct(&mut self, index: usize) -> Result<(), GenerateError> {
        let ir = self.ir;
        let plan = ir
            .types
            .get(index)
            .ok_or(PlanBuildError::UnknownType(index))?;
        self.emit_struct(&type_ident(&plan.type_name), &plan.root, &plan.type_name)
    }

    fn emit_struct(
        &mut self,
        name: &str,
        plan: &StructPlan,
        path: &str,
    ) -> Result<(), GenerateError> {
        if !self.emitted.insert(name.to_string()) {
            return Ok(());
        }

        let mut body = CodeWriter::new();
        if plan.min_size > 0 {
            body.open(format!("if ctx.remaining(*pos) < {}", plan.min_size))?;
            body.line(format!(
                "demarshal_fail!(DemarshalError::Truncated, {path:?})"
            ))?;
            body.close("")?;
        }

        // Leading integers lie inside the checked minimum and are read from
        // one slice without further bounds checks.
        let head: Vec<(IntegralType, Option<&EnumPlan>)> = plan
            .fields
            .iter()
            .map_while(|field| match &field.node {
                PlanNode::Scalar { int_type } => Some((*int_type, None)),
                PlanNode::Enum(e) => Some((e.int_type, Some(e))),
                _ => None,
            })
            .collect();
        let head_len: u64 = head.iter().map(|(t, _)| t.width()).sum();
        if head_len > 0 {
            body.line(format!("let head = ctx.head::<{head_len}>(pos);"))?;
        }

        let mut members = Vec::with_capacity(plan.fields.len());
        let mut at = 0u64;
        for (index, field) in plan.fields.iter().enumerate() {
            let local = local_ident(&field.name);
            let field_path = format!("{path}.{}", field.name);
            let ty = match head.get(index) {
                Some(&(int_type, enum_plan)) => {
                    emit_head_read(&mut body, int_type, &local, at)?;
                    at += int_type.width();
                    if let Some(enum_plan) = enum_plan {
                        emit_enum_check(&mut body, enum_plan, &local, &field_path)?;
                    }
                    int_type.rust_name().to_string()
                }
                None => {
                    let hint = format!("{name}_{}", field.name);
                    self.emit_node(&mut body, &field.node, &local, &field_path, &hint)?
                }
            };
            members.push((field_ident(&field.name), local, ty));
        }

        let w = &mut self.items;
        w.line("#[derive(Debug, Clone, PartialEq, Eq)]")?;
        w.open(format!("pub struct {name}"))?;
        for (ident, _, ty) in &members {
            w.line(format!("pub {ident}: {ty},"))?;
        }
        w.close("")?;
        w.blank()?;

        w.open(format!(
            "fn read_{}(ctx: &mut Ctx<'_>, pos: &mut usize) -> Result<{name}, DemarshalError>",
            fn_ident(name)
        ))?;
        w.append(&body)?;
        if members.is_empty() {
            w.line(format!("Ok({name} {{}})"))?;
        } else {
            w.open(format!("Ok({name}"))?;
            for (ident, local, _) in &members {
                w.line(format!("{ident}: {local},"))?;
            }
            w.close(")")?;
        }
        w.close("")?;
        w.blank()?;
        Ok(())
    }

    /// Writes statements binding `var`, returns its Rust type.
    fn emit_node(
        &mut self,
        w: &mut CodeWriter,
        node: &PlanNode,
        var: &str,
        path: &str,
        hint: &str,
    ) -> Result<String, GenerateError> {
        match node {
            PlanNode::Scalar { int_type } => {
                emit_read(w, *int_type, var, path)?;
                Ok(int_type.rust_name().to_string())
            }
            PlanNode::Enum(plan) => {
                emit_read(w, plan.int_type, var, path)?;
                emit_enum_check(w, plan, var, path)?;
                Ok(plan.int_type.rust_name().to_string())
            }
            PlanNode::Nested {
                type_index,
                type_name,
            } => {
                self.emit_named_struct(*type_index)?;
                let name = type_ident(type_name);
                w.line(format!("let {var} = read_{}(ctx, pos)?;", fn_ident(&name)))?;
                Ok(name)
            }
            PlanNode::Struct(plan) => {
                let name = type_ident(hint);
                self.emit_struct(&name, plan, path)?;
                w.line(format!("let {var} = read_{}(ctx, pos)?;", fn_ident(&name)))?;
                Ok(name)
            }
            PlanNode::Array(array) => self.emit_array(w, array, var, path, hint),
            PlanNode::Switch(switch) => self.emit_switch(w, switch, var, path, hint),
            PlanNode::Pointer(ptr) => self.emit_pointer(w, ptr, var, path),
        }
    }

    fn emit_array(
        &mut self,
        w: &mut CodeWriter,
        array: &ArrayPlan,
        var: &str,
        path: &str,
        hint: &str,
    ) -> Result<String, GenerateError> {
        let count = format!("{var}_count");
        let bound = array.element_bound();
        let element_path = format!("{path}[]");

        match &array.length {
            LengthPlan::Literal { count: n } => match n.checked_mul(bound) {
                Some(need) => {
                    w.open(format!("if ctx.remaining(*pos) < {need}"))?;
                    w.line(format!("demarshal_fail!(DemarshalError::Truncated, {path:?})"))?;
                    w.close("")?;
                    w.line(format!("let {count} = {n}usize;"))?;
                }
                None => {
                    w.line(format!("demarshal_fail!(DemarshalError::Overflow, {path:?});"))?;
                    w.line(format!("let {count} = 0usize;"))?;
                }
            },
            LengthPlan::Sibling { name, int_type, .. } => {
                let sibling = local_ident(name);
                if int_type.is_signed() {
                    w.open(format!("if {sibling} < 0"))?;
                    w.line(format!(
                        "demarshal_fail!(DemarshalError::InvalidCount, {path:?})"
                    ))?;
                    w.close("")?;
                }
                w.line(format!("let {count} = {sibling} as u64;"))?;
                w.open(format!("let Some(need) = {count}.checked_mul({bound}) else"))?;
                w.line(format!("demarshal_fail!(DemarshalError::Overflow, {path:?})"))?;
                w.close(";")?;
                w.open("if need > ctx.remaining(*pos)")?;
                w.line(format!("demarshal_fail!(DemarshalError::Truncated, {path:?})"))?;
                w.close("")?;
                w.line(format!("let {count} = {count} as usize;"))?;
            }
            LengthPlan::Remaining => match array.element_fixed {
                Some(0) => w.line(format!("let {count} = 0usize;"))?,
                Some(size) => w.line(format!(
                    "let {count} = (ctx.remaining(*pos) / {size}) as usize;"
                ))?,
                None => return self.emit_open_ended(w, array, var, &element_path, hint),
            },
        }

        if matches!(*array.element, PlanNode::Scalar { int_type: IntegralType::U8 }) {
            w.open(format!("let Some({var}) = ctx.take_bytes(pos, {count}) else"))?;
            w.line(format!("demarshal_fail!(DemarshalError::Truncated, {path:?})"))?;
            w.close(";")?;
            w.line(format!("let {var} = {var}.to_vec();"))?;
            return Ok("Vec<u8>".to_string());
        }

        let item = format!("{var}_item");
        w.line(format!("let mut {var} = Vec::with_capacity({count});"))?;
        w.open(format!("for _ in 0..{count}"))?;
        let element = self.emit_node(w, &array.element, &item, &element_path, &format!("{hint}_item"))?;
        w.line(format!("{var}.push({item});"))?;
        w.close("")?;
        Ok(format!("Vec<{element}>"))
    }

    /// Trailing array of variable-size elements: decode until the buffer ends.
    fn emit_open_ended(
        &mut self,
        w: &mut CodeWriter,
        array: &ArrayPlan,
        var: &str,
        element_path: &str,
        hint: &str,
    ) -> Result<String, GenerateError> {
        let item = format!("{var}_item");
        w.line(format!("let mut {var} = Vec::new();"))?;
        w.open("while *pos < ctx.buf.len()")?;
        w.line("let start = *pos;")?;
        let element = self.emit_node(w, &array.element, &item, element_path, &format!("{hint}_item"))?;
        w.line(format!("{var}.push({item});"))?;
        w.open("if *pos == start")?;
        w.line("break;")?;
        w.close("")?;
        w.close("")?;
        Ok(format!("Vec<{element}>"))
    }

    fn emit_switch(
        &mut self,
        w: &mut CodeWriter,
        switch: &SwitchPlan,
        var: &str,
        path: &str,
        hint: &str,
    ) -> Result<String, GenerateError> {
        let enum_name = type_ident(switch.type_name.as_deref().unwrap_or(hint));
        let read_fn = format!("read_{}", fn_ident(hint));
        let call = format!(
            "let {var} = {read_fn}(ctx, pos, {})?;",
            bits_expr(&local_ident(&switch.discriminant), switch.int_type)
        );
        if self.emitted.contains(&read_fn) {
            w.line(call)?;
            return Ok(enum_name);
        }
        self.emitted.insert(read_fn.clone());

        let mut arms = CodeWriter::new();
        let mut variants = Vec::new();
        for case in &switch.cases {
            if case.values.is_empty() {
                continue;
            }
            let variant = type_ident(&case.name);
            let payload = self.emit_arm(&mut arms, &pattern(&case.values), &enum_name, &variant, case.node.as_deref(), path)?;
            variants.push((variant, payload));
        }
        match &switch.default {
            Some(case) => {
                let variant = type_ident(&case.name);
                let payload = self.emit_arm(&mut arms, "_", &enum_name, &variant, case.node.as_deref(), path)?;
                variants.push((variant, payload));
            }
            None => arms.line(format!(
                "_ => demarshal_fail!(DemarshalError::InvalidDiscriminant, {path:?}),"
            ))?,
        }

        let out = &mut self.items;
        if self.emitted.insert(enum_name.clone()) {
            out.line("#[derive(Debug, Clone, PartialEq, Eq)]")?;
            out.open(format!("pub enum {enum_name}"))?;
            for (variant, payload) in &variants {
                match payload {
                    Some(ty) => out.line(format!("{variant}({ty}),"))?,
                    None => out.line(format!("{variant},"))?,
                }
            }
            out.close("")?;
            out.blank()?;
        }
        out.open(format!(
            "fn {read_fn}(ctx: &mut Ctx<'_>, pos: &mut usize, disc: u64) -> Result<{enum_name}, DemarshalError>"
        ))?;
        out.open("match disc")?;
        out.append(&arms)?;
        out.close("")?;
        out.close("")?;
        out.blank()?;

        w.line(call)?;
        Ok(enum_name)
    }

    fn emit_arm(
        &mut self,
        arms: &mut CodeWriter,
        pattern: &str,
        enum_name: &str,
        variant: &str,
        node: Option<&PlanNode>,
        path: &str,
    ) -> Result<Option<String>, GenerateError> {
        let Some(node) = node else {
            arms.line(format!("{pattern} => Ok({enum_name}::{variant}),"))?;
            return Ok(None);
        };
        arms.open(format!("{pattern} =>"))?;
        let ty = self.emit_node(
            arms,
            node,
            "arm",
            &format!("{path}.{variant}"),
            &format!("{enum_name}_{variant}"),
        )?;
        arms.line(format!("Ok({enum_name}::{variant}(arm))"))?;
        arms.close("")?;
        Ok(Some(ty))
    }

    fn emit_pointer(
        &mut self,
        w: &mut CodeWriter,
        ptr: &PointerPlan,
        var: &str,
        path: &str,
    ) -> Result<String, GenerateError> {
        self.emit_named_struct(ptr.target_index)?;
        let follow = self.emit_follow(ptr)?;
        let offset = format!("{var}_offset");
        emit_read(w, ptr.offset_type, &offset, path)?;
        if ptr.offset_type.is_signed() {
            w.open(format!("if {offset} < 0"))?;
            w.line(format!("demarshal_fail!(DemarshalError::InvalidOffset, {path:?})"))?;
            w.close("")?;
        }
        w.open(format!("let {var} = match {offset}"))?;
        w.line("0 => None,")?;
        w.line(format!("off => Some({follow}(ctx, off as u64, {path:?})?),"))?;
        w.close(";")?;
        Ok(format!("Option<Rc<{}>>", type_ident(&ptr.target_name)))
    }

    /// Emits the cached pointee reader for a target type once.
    fn emit_follow(&mut self, ptr: &PointerPlan) -> Result<String, GenerateError> {
        let type_name = type_ident(&ptr.target_name);
        let snake = fn_ident(&type_name);
        let follow = format!("follow_{snake}");
        if !self.emitted.insert(follow.clone()) {
            return Ok(follow);
        }
        let cache = format!("cache_{snake}");
        self.caches.push(CacheField {
            field: cache.clone(),
            type_name: type_name.clone(),
        });

        let w = &mut self.items;
        w.open(format!(
            "fn {follow}(ctx: &mut Ctx<'_>, offset: u64, what: &str) -> Result<Rc<{type_name}>, DemarshalError>"
        ))?;
        w.open(format!("if let Some(hit) = ctx.{cache}.get(&offset)"))?;
        w.line("return Ok(Rc::clone(hit));")?;
        w.close("")?;
        w.line(format!("let mut pos = ctx.enter(offset, {}, what)?;", ptr.target_min))?;
        w.line(format!("let value = read_{snake}(ctx, &mut pos);"))?;
        w.line("ctx.leave();")?;
        w.line("let value = Rc::new(value?);")?;
        w.line(format!("ctx.{cache}.insert(offset, Rc::clone(&value));"))?;
        w.line("Ok(value)")?;
        w.close("")?;
        w.blank()?;
        Ok(follow)
    }
}

fn emit_read(
    w: &mut CodeWriter,
    int_type: IntegralType,
    var: &str,
    path: &str,
) -> Result<(), GenerateError> {
    w.open(format!(
        "let Some(raw) = ctx.take::<{}>(pos) else",
        int_type.width()
    ))?;
    w.line(format!("demarshal_fail!(DemarshalError::Truncated, {path:?})"))?;
    w.close(";")?;
    w.line(format!(
        "let {var} = {}::{}(raw);",
        int_type.rust_name(),
        from_bytes_fn(int_type)
    ))?;
    Ok(())
}

/* Integer at byte `at` of the struct's checked prefix */
fn emit_head_read(
    w: &mut CodeWriter,
    int_type: IntegralType,
    var: &str,
    at: u64,
) -> Result<(), GenerateError> {
    let bytes: Vec<String> = (at..at + int_type.width())
        .map(|i| format!("head[{i}]"))
        .collect();
    w.line(format!(
        "let {var} = {}::{}([{}]);",
        int_type.rust_name(),
        from_bytes_fn(int_type),
        bytes.join(", ")
    ))?;
    Ok(())
}

fn emit_enum_check(
    w: &mut CodeWriter,
    plan: &EnumPlan,
    var: &str,
    path: &str,
) -> Result<(), GenerateError> {
    let bits = bits_expr(var, plan.int_type);
    let condition = if plan.flags {
        format!("({bits}) & !{:#x} != 0", plan.mask())
    } else if plan.members.is_empty() {
        "true".to_string()
    } else {
        let values: Vec<u64> = plan.members.iter().map(|m| m.value).collect();
        format!("!matches!({bits}, {})", pattern(&values))
    };
    w.open(format!("if {condition}"))?;
    w.line(format!(
        "demarshal_fail!(DemarshalError::InvalidEnumValue, {path:?})"
    ))?;
    w.close("")?;
    Ok(())
}
