//! Per-call codec state: cycle tables, string interning, depth accounting.
//!
//! A context is created at the start of one top-level encode or decode and
//! dropped at its end; reference ids and string ids never outlive the call.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{CodecError, ErrorSite, Result};
use crate::value::Value;

/// Outcome of a cycle-table or intern-table probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// First appearance; the payload is written in full under this id.
    New(u64),
    /// Already written under this id; emit a reference instead.
    Seen(u64),
}

/// One step of the field path used in encode-side error reporting.
#[derive(Debug, Clone)]
pub(crate) enum PathSeg {
    Field(Arc<str>),
    Index(usize),
    Key(usize),
    MapValue(usize),
}

/// Encode-side state: identity table, string intern table, depth, path.
pub(crate) struct SerialContext {
    identities: HashMap<usize, u64>,
    open: HashSet<u64>,
    strings: HashMap<Rc<str>, u64>,
    next_ref_id: u64,
    next_string_id: u64,
    depth: usize,
    max_depth: usize,
    path: Vec<PathSeg>,
}

impl SerialContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            identities: HashMap::new(),
            open: HashSet::new(),
            strings: HashMap::new(),
            next_ref_id: 1,
            next_string_id: 1,
            depth: 0,
            max_depth,
            path: Vec::new(),
        }
    }

    /// Probe the cycle table by composite identity, assigning the next
    /// reference id and marking it open on first appearance.
    pub fn track(&mut self, identity: usize) -> Probe {
        if let Some(id) = self.identities.get(&identity) {
            return Probe::Seen(*id);
        }
        let id = self.next_ref_id;
        self.next_ref_id += 1;
        self.identities.insert(identity, id);
        self.open.insert(id);
        Probe::New(id)
    }

    /// Mark a composite as fully written.
    pub fn seal(&mut self, id: u64) {
        self.open.remove(&id);
    }

    /// True while the composite's payload is still being written.
    pub fn is_open(&self, id: u64) -> bool {
        self.open.contains(&id)
    }

    /// Probe the intern table by string content, assigning the next string
    /// id on first appearance.
    pub fn intern(&mut self, s: &Rc<str>) -> Probe {
        if let Some(id) = self.strings.get(s.as_ref()) {
            return Probe::Seen(*id);
        }
        let id = self.next_string_id;
        self.next_string_id += 1;
        self.strings.insert(Rc::clone(s), id);
        Probe::New(id)
    }

    /// Enter a composite; fails once nesting passes the configured limit.
    pub fn enter(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthLimitExceeded {
                limit: self.max_depth,
                site: self.site(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth -= 1;
    }

    pub fn push(&mut self, seg: PathSeg) {
        self.path.push(seg);
    }

    pub fn pop(&mut self) {
        self.path.pop();
    }

    /// The current field path as an error site.
    pub fn site(&self) -> ErrorSite {
        let mut rendered = String::new();
        for seg in &self.path {
            match seg {
                PathSeg::Field(name) => {
                    let _ = write!(rendered, ".{name}");
                }
                PathSeg::Index(i) => {
                    let _ = write!(rendered, "[{i}]");
                }
                PathSeg::Key(i) => {
                    let _ = write!(rendered, ".keys[{i}]");
                }
                PathSeg::MapValue(i) => {
                    let _ = write!(rendered, ".values[{i}]");
                }
            }
        }
        ErrorSite::Path(rendered)
    }
}

/// Decode-side state: reference table, under-construction set, string
/// table, depth.
pub(crate) struct DeserialContext {
    refs: Vec<Value>,
    open: HashSet<u64>,
    strings: Vec<Rc<str>>,
    depth: usize,
    max_depth: usize,
}

impl DeserialContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            refs: Vec::new(),
            open: HashSet::new(),
            strings: Vec::new(),
            depth: 0,
            max_depth,
        }
    }

    /// Insert a composite handle before its children are filled, so inner
    /// references resolve to the enclosing instance. Returns its id.
    pub fn open_ref(&mut self, handle: Value) -> u64 {
        self.refs.push(handle);
        let id = self.refs.len() as u64;
        self.open.insert(id);
        id
    }

    /// Mark a composite as fully constructed.
    pub fn seal_ref(&mut self, id: u64) {
        self.open.remove(&id);
    }

    /// True while the composite's children are still being filled.
    pub fn is_open(&self, id: u64) -> bool {
        self.open.contains(&id)
    }

    /// Resolve a wire reference id to its handle.
    pub fn resolve_ref(&self, id: u64, offset: usize) -> Result<Value> {
        if id == 0 || id > self.refs.len() as u64 {
            return Err(CodecError::TypeMismatch {
                site: ErrorSite::Offset(offset),
                detail: format!("unknown reference id {id}"),
            });
        }
        Ok(self.refs[(id - 1) as usize].clone())
    }

    /// Record a newly read string under the next string id.
    pub fn intern_string(&mut self, s: Rc<str>) -> u64 {
        self.strings.push(s);
        self.strings.len() as u64
    }

    /// Resolve a wire string id.
    pub fn resolve_string(&self, id: u64, offset: usize) -> Result<Rc<str>> {
        if id == 0 || id > self.strings.len() as u64 {
            return Err(CodecError::TypeMismatch {
                site: ErrorSite::Offset(offset),
                detail: format!("unknown string id {id}"),
            });
        }
        Ok(Rc::clone(&self.strings[(id - 1) as usize]))
    }

    /// Enter a composite; fails once nesting passes the configured limit.
    pub fn enter(&mut self, offset: usize) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthLimitExceeded {
                limit: self.max_depth,
                site: ErrorSite::Offset(offset),
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_ids_start_at_one_and_are_stable() {
        let mut ctx = SerialContext::new(8);
        assert_eq!(ctx.track(100), Probe::New(1));
        assert_eq!(ctx.track(200), Probe::New(2));
        assert_eq!(ctx.track(100), Probe::Seen(1));
    }

    #[test]
    fn encode_side_open_tracking() {
        let mut ctx = SerialContext::new(8);
        let id = match ctx.track(100) {
            Probe::New(id) => id,
            Probe::Seen(_) => unreachable!("first appearance"),
        };

        assert!(ctx.is_open(id));
        ctx.seal(id);
        assert!(!ctx.is_open(id));
        assert_eq!(ctx.track(100), Probe::Seen(id));
    }

    #[test]
    fn string_ids_key_by_content() {
        let mut ctx = SerialContext::new(8);
        let a: Rc<str> = Rc::from("jake");
        let b: Rc<str> = Rc::from("jake");
        let c: Rc<str> = Rc::from("other");

        assert_eq!(ctx.intern(&a), Probe::New(1));
        assert_eq!(ctx.intern(&b), Probe::Seen(1));
        assert_eq!(ctx.intern(&c), Probe::New(2));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut ctx = SerialContext::new(2);
        ctx.enter().unwrap();
        ctx.enter().unwrap();
        assert!(matches!(
            ctx.enter(),
            Err(CodecError::DepthLimitExceeded { limit: 2, .. })
        ));
        ctx.leave();
        ctx.enter().unwrap();
    }

    #[test]
    fn path_renders_segment_by_segment() {
        let mut ctx = SerialContext::new(8);
        ctx.push(PathSeg::Field(Arc::from("friends")));
        ctx.push(PathSeg::Index(2));
        assert_eq!(ctx.site().to_string(), "root.friends[2]");
        ctx.pop();
        ctx.push(PathSeg::Key(0));
        assert_eq!(ctx.site().to_string(), "root.friends.keys[0]");
    }

    #[test]
    fn decode_refs_open_and_seal() {
        let mut ctx = DeserialContext::new(8);
        let handle = Value::list(vec![]);
        let id = ctx.open_ref(handle.clone());

        assert_eq!(id, 1);
        assert!(ctx.is_open(1));
        assert!(ctx.resolve_ref(1, 0).unwrap().deep_eq(&handle));

        ctx.seal_ref(1);
        assert!(!ctx.is_open(1));
    }

    #[test]
    fn unknown_ids_are_rejected_with_offset() {
        let ctx = DeserialContext::new(8);
        assert!(matches!(
            ctx.resolve_ref(0, 9),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ctx.resolve_ref(3, 9),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ctx.resolve_string(1, 9),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn decode_strings_resolve_in_appearance_order() {
        let mut ctx = DeserialContext::new(8);
        assert_eq!(ctx.intern_string(Rc::from("a")), 1);
        assert_eq!(ctx.intern_string(Rc::from("b")), 2);
        assert_eq!(ctx.resolve_string(2, 0).unwrap().as_ref(), "b");
    }
}
