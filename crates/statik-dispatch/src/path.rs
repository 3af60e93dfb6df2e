//! Qualified names used by compiled code to refer to classes and members
//!
//! ```text
//! path   := name ('.' name | '[' descr (',' descr)* ']')*
//! descr  := '?'? path '!'?
//! ```
//!
//! `?` marks an optional type, a trailing `!` an exact one. For example
//! `shapes.Box[builtins.int, ?builtins.str].get`.

use crate::error::{DispatchError, DispatchResult};
use std::fmt;
use std::sync::Arc;

/// One step of a path
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Module, class or member name
    Name(Arc<str>),
    /// Generic arguments applied to the preceding class
    Args(Vec<TypeDescr>),
}

/// Dotted path with optional generic arguments
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QualifiedPath {
    segments: Vec<Segment>,
}

/// Type reference: a path plus the optional and exact markers
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeDescr {
    /// Class path
    pub path: QualifiedPath,
    /// `None` is also accepted
    pub optional: bool,
    /// Subclasses are rejected
    pub exact: bool,
}

impl QualifiedPath {
    /// Parse `text`
    pub fn parse(text: &str) -> DispatchResult<Self> {
        let mut parser = Parser::new(text);
        let path = parser.path()?;
        parser.finish()?;
        Ok(path)
    }

    /// Path of plain names
    pub fn from_names(names: &[&str]) -> Self {
        Self {
            segments: names.iter().map(|n| Segment::Name(Arc::from(*n))).collect(),
        }
    }

    /// Segments in order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Leading module name
    pub fn module(&self) -> Option<&Arc<str>> {
        match self.segments.first()? {
            Segment::Name(name) => Some(name),
            Segment::Args(_) => None,
        }
    }

    /// Container path and final name, if the path ends in a name
    pub fn split_last(&self) -> Option<(QualifiedPath, &Arc<str>)> {
        match self.segments.split_last()? {
            (Segment::Name(name), rest) if !rest.is_empty() => Some((
                QualifiedPath {
                    segments: rest.to_vec(),
                },
                name,
            )),
            _ => None,
        }
    }

    /// This path extended by `name`
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Name(Arc::from(name)));
        Self { segments }
    }

    /// Whether resolving this path reads `module.name`, including through
    /// generic arguments
    pub fn references(&self, module: &str, name: &str) -> bool {
        let top_level = matches!(
            self.segments.as_slice(),
            [Segment::Name(m), Segment::Name(n), ..] if &**m == module && &**n == name
        );
        top_level
            || self.segments.iter().any(|segment| match segment {
                Segment::Args(args) => args.iter().any(|d| d.path.references(module, name)),
                Segment::Name(_) => false,
            })
    }
}

impl fmt::Display for QualifiedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Name(name) => {
                    if index > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                Segment::Args(args) => {
                    f.write_str("[")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    f.write_str("]")?;
                }
            }
        }
        Ok(())
    }
}

impl TypeDescr {
    /// Parse a type descriptor such as `?builtins.int`
    pub fn parse(text: &str) -> DispatchResult<Self> {
        let mut parser = Parser::new(text);
        let descr = parser.descr()?;
        parser.finish()?;
        Ok(descr)
    }

    /// Descriptor for `path`, neither optional nor exact
    pub fn of(path: QualifiedPath) -> Self {
        Self {
            path,
            optional: false,
            exact: false,
        }
    }
}

impl fmt::Display for TypeDescr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            f.write_str("?")?;
        }
        write!(f, "{}", self.path)?;
        if self.exact {
            f.write_str("!")?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, reason: &str) -> DispatchError {
        DispatchError::MalformedPath {
            path: self.text.to_string(),
            reason: format!("{} at offset {}", reason, self.pos),
        }
    }

    fn ident(&mut self) -> DispatchResult<Arc<str>> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a name"));
        }
        Ok(Arc::from(&self.text[start..self.pos]))
    }

    fn path(&mut self) -> DispatchResult<QualifiedPath> {
        let mut segments = vec![Segment::Name(self.ident()?)];
        loop {
            if self.eat(b'.') {
                segments.push(Segment::Name(self.ident()?));
            } else if self.eat(b'[') {
                let mut args = vec![self.descr()?];
                loop {
                    if self.eat(b',') {
                        args.push(self.descr()?);
                    } else if self.eat(b']') {
                        break;
                    } else {
                        return Err(self.error("expected ',' or ']'"));
                    }
                }
                segments.push(Segment::Args(args));
            } else {
                break;
            }
        }
        Ok(QualifiedPath { segments })
    }

    fn descr(&mut self) -> DispatchResult<TypeDescr> {
        let optional = self.eat(b'?');
        let path = self.path()?;
        let exact = self.eat(b'!');
        Ok(TypeDescr {
            path,
            optional,
            exact,
        })
    }

    fn finish(&mut self) -> DispatchResult<()> {
        self.skip_ws();
        if self.pos < self.text.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generic_member() {
        let path = QualifiedPath::parse("shapes.Box[builtins.int, ?builtins.str].get").unwrap();
        assert_eq!(path.segments().len(), 4);
        match &path.segments()[2] {
            Segment::Args(args) => {
                assert_eq!(args.len(), 2);
                assert!(!args[0].optional);
                assert!(args[1].optional);
                assert_eq!(args[1].path, QualifiedPath::from_names(&["builtins", "str"]));
            }
            other => panic!("unexpected segment {:?}", other),
        }
        assert_eq!(path.to_string(), "shapes.Box[builtins.int, ?builtins.str].get");
    }

    #[test]
    fn test_exact_marker() {
        let descr = TypeDescr::parse("?m.C!").unwrap();
        assert!(descr.optional);
        assert!(descr.exact);
        assert_eq!(descr.to_string(), "?m.C!");
    }

    #[test]
    fn test_split_last() {
        let path = QualifiedPath::parse("m.C.f").unwrap();
        let (container, name) = path.split_last().unwrap();
        assert_eq!(container, QualifiedPath::from_names(&["m", "C"]));
        assert_eq!(&**name, "f");
        assert!(QualifiedPath::parse("m").unwrap().split_last().is_none());
    }

    #[test]
    fn test_malformed() {
        for text in ["", "m.", "m.C[", "m.C[int", "m.C]", "m..C", "m C"] {
            let err = QualifiedPath::parse(text).unwrap_err();
            assert!(matches!(err, DispatchError::MalformedPath { .. }), "{}", text);
        }
    }

    #[test]
    fn test_references() {
        let path = QualifiedPath::parse("m.Box[other.T].get").unwrap();
        assert!(path.references("m", "Box"));
        assert!(path.references("other", "T"));
        assert!(!path.references("m", "get"));
    }
}
