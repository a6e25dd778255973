use std::fmt::{self, Write};

const INDENT: &str = "    ";

/// Indentation-aware text sink used by every emitter.
#[derive(Debug, Default)]
pub struct CodeWriter {
    out: String,
    level: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: impl AsRef<str>) -> fmt::Result {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.level {
                self.out.write_str(INDENT)?;
            }
            self.out.write_str(text)?;
        }
        self.out.write_char('\n')
    }

    pub fn blank(&mut self) -> fmt::Result {
        self.line("")
    }

    pub fn comment(&mut self, text: impl AsRef<str>) -> fmt::Result {
        for line in text.as_ref().lines() {
            self.line(format!("// {line}").trim_end())?;
        }
        Ok(())
    }

    /// Writes `header {` and indents what follows.
    pub fn open(&mut self, header: impl AsRef<str>) -> fmt::Result {
        self.line(format!("{} {{", header.as_ref()))?;
        self.level += 1;
        Ok(())
    }

    /// Dedents and writes `}` followed by `tail` (`;`, `,` or nothing).
    pub fn close(&mut self, tail: &str) -> fmt::Result {
        self.level = self.level.saturating_sub(1);
        self.line(format!("}}{tail}"))
    }

    /// Appends another writer's output at this writer's indentation.
    pub fn append(&mut self, other: &CodeWriter) -> fmt::Result {
        for line in other.out.lines() {
            self.line(line)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nests_blocks() {
        let mut w = CodeWriter::new();
        w.open("fn demo()").unwrap();
        w.open("if x").unwrap();
        w.line("y();").unwrap();
        w.close("").unwrap();
        w.blank().unwrap();
        w.close("").unwrap();
        assert_eq!(w.finish(), "fn demo() {\n    if x {\n        y();\n    }\n\n}\n");
    }

    #[test]
    fn append_reindents() {
        let mut inner = CodeWriter::new();
        inner.line("a;").unwrap();
        let mut outer = CodeWriter::new();
        outer.open("mod m").unwrap();
        outer.append(&inner).unwrap();
        outer.close("").unwrap();
        assert_eq!(outer.finish(), "mod m {\n    a;\n}\n");
    }
}
