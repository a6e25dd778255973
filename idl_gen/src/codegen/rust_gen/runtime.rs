//! Fixed support code placed ahead of the generated demarshallers: the error
//! type, the failure macro for the selected policy and the decode context.

use crate::codegen::writer::CodeWriter;
use crate::codegen::ErrorPolicy;
use std::fmt;

/// Pointer target cache kept in the decode context.
pub struct CacheField {
    pub field: String,
    pub type_name: String,
}

pub fn emit_prelude(
    w: &mut CodeWriter,
    policy: ErrorPolicy,
    caches: &[CacheField],
) -> fmt::Result {
    if !caches.is_empty() {
        w.line("use std::collections::HashMap;")?;
        w.line("use std::rc::Rc;")?;
        w.blank()?;
    }

    w.line("/// Why a buffer was rejected.")?;
    w.line("#[derive(Debug, Clone, Copy, PartialEq, Eq)]")?;
    w.open("pub enum DemarshalError")?;
    for kind in [
        "Truncated",
        "InvalidDiscriminant",
        "InvalidEnumValue",
        "InvalidCount",
        "InvalidOffset",
        "Overflow",
        "UnknownMessage",
    ] {
        w.line(format!("{kind},"))?;
    }
    w.close("")?;
    w.blank()?;

    emit_fail_macro(w, policy)?;
    w.blank()?;

    w.line("#[allow(dead_code)]")?;
    w.open("struct Ctx<'a>")?;
    w.line("buf: &'a [u8],")?;
    w.comment("Byte ranges of the root and of every pointee still being decoded.")?;
    w.line("active: Vec<(usize, usize)>,")?;
    for cache in caches {
        w.line(format!("{}: HashMap<u64, Rc<{}>>,", cache.field, cache.type_name))?;
    }
    w.close("")?;
    w.blank()?;

    w.line("#[allow(dead_code)]")?;
    w.open("impl<'a> Ctx<'a>")?;
    w.open("fn new(buf: &'a [u8], root_min: u64) -> Self")?;
    w.line("let root_end = root_min.min(buf.len() as u64) as usize;")?;
    w.open("Self")?;
    w.line("buf,")?;
    w.line("active: vec![(0, root_end)],")?;
    for cache in caches {
        w.line(format!("{}: HashMap::new(),", cache.field))?;
    }
    w.close("")?;
    w.close("")?;
    w.blank()?;

    w.open("fn remaining(&self, pos: usize) -> u64")?;
    w.line("self.buf.len().saturating_sub(pos) as u64")?;
    w.close("")?;
    w.blank()?;

    w.open("fn take<const N: usize>(&self, pos: &mut usize) -> Option<[u8; N]>")?;
    w.line("let end = pos.checked_add(N)?;")?;
    w.line("let bytes: [u8; N] = self.buf.get(*pos..end)?.try_into().ok()?;")?;
    w.line("*pos = end;")?;
    w.line("Some(bytes)")?;
    w.close("")?;
    w.blank()?;

    w.comment("Fixed prefix of a struct whose minimum size was already checked.")?;
    w.open("fn head<const N: usize>(&self, pos: &mut usize) -> [u8; N]")?;
    w.line("let mut out = [0u8; N];")?;
    w.line("out.copy_from_slice(&self.buf[*pos..*pos + N]);")?;
    w.line("*pos += N;")?;
    w.line("out")?;
    w.close("")?;
    w.blank()?;

    w.open("fn take_bytes(&self, pos: &mut usize, len: usize) -> Option<&'a [u8]>")?;
    w.line("let end = pos.checked_add(len)?;")?;
    w.line("let bytes = self.buf.get(*pos..end)?;")?;
    w.line("*pos = end;")?;
    w.line("Some(bytes)")?;
    w.close("")?;
    w.blank()?;

    w.comment("Range-checks a pointee and marks it as being decoded.")?;
    w.open("fn enter(&mut self, offset: u64, min: u64, what: &str) -> Result<usize, DemarshalError>")?;
    w.open("let Some(end) = offset.checked_add(min) else")?;
    w.line("demarshal_fail!(DemarshalError::Overflow, what)")?;
    w.close(";")?;
    w.open("if end > self.buf.len() as u64")?;
    w.line("demarshal_fail!(DemarshalError::Truncated, what)")?;
    w.close("")?;
    w.line("let (start, end) = (offset as usize, end as usize);")?;
    w.open("if self.active.iter().any(|&(s, e)| start < e && s < end)")?;
    w.line("demarshal_fail!(DemarshalError::InvalidOffset, what)")?;
    w.close("")?;
    w.line("self.active.push((start, end));")?;
    w.line("Ok(start)")?;
    w.close("")?;
    w.blank()?;

    w.open("fn leave(&mut self)")?;
    w.line("self.active.pop();")?;
    w.close("")?;
    w.close("")?;
    w.blank()
}

fn emit_fail_macro(w: &mut CodeWriter, policy: ErrorPolicy) -> fmt::Result {
    w.open("macro_rules! demarshal_fail")?;
    // The extra block lets the macro stand in expression position.
    w.open("($err:expr, $what:expr) => {")?;
    w.line("{")?;
    match policy {
        ErrorPolicy::Silent => {
            w.line("let _ = $what;")?;
            w.line("return Err($err);")?;
        }
        ErrorPolicy::Report => {
            w.line("eprintln!(\"demarshal error: {:?} at {}\", $err, $what);")?;
            w.line("return Err($err);")?;
        }
        ErrorPolicy::Abort => {
            w.line("panic!(\"demarshal error: {:?} at {}\", $err, $what)")?;
        }
    }
    w.line("}")?;
    w.close("};")?;
    w.close("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prelude(policy: ErrorPolicy, caches: &[CacheField]) -> String {
        let mut w = CodeWriter::new();
        emit_prelude(&mut w, policy, caches).unwrap();
        w.finish()
    }

    #[test]
    fn macro_body_follows_policy() {
        assert!(prelude(ErrorPolicy::Silent, &[]).contains("let _ = $what;"));
        assert!(prelude(ErrorPolicy::Report, &[]).contains("eprintln!"));
        let abort = prelude(ErrorPolicy::Abort, &[]);
        assert!(abort.contains("panic!"));
        assert!(!abort.contains("return Err($err);"));
    }

    #[test]
    fn caches_only_when_pointers_exist() {
        assert!(!prelude(ErrorPolicy::Silent, &[]).contains("HashMap"));
        let text = prelude(
            ErrorPolicy::Silent,
            &[CacheField {
                field: "cache_point".into(),
                type_name: "Point".into(),
            }],
        );
        assert!(text.contains("cache_point: HashMap<u64, Rc<Point>>,"));
        assert!(text.contains("cache_point: HashMap::new(),"));
    }
}
