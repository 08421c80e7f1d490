//! Value cells addressed by stable integer locations.
//!
//! The heap is a growable `Vec` of tagged values; allocation appends and
//! returns the new index. Compaction slides surviving cells down over the
//! reclaimed ones, truncates, and reports a relocation table so every
//! surviving reference can be rewritten. Locations are stable between
//! collections and only between collections: nothing outside the collector
//! may hold a raw cell reference across one.
//!
//! Marking lives with the evaluator, which owns the root set; this module
//! only knows how to slide cells and repair the references stored inside
//! them (closure environments).

use std::fmt;

use crate::ast::Lambda;

/// Index of a cell in the heap.
pub type Location = usize;

/// An ordered list of bindings; lookup scans rightmost-first, so the most
/// recent binding of a name wins.
pub type Env = Vec<(String, Location)>;

/// Rightmost-first lookup of `name`, used for layer environments and for
/// captured closure environments alike.
pub fn lookup(name: &str, env: &Env) -> Option<Location> {
    env.iter()
        .rev()
        .find(|(bound, _)| bound == name)
        .map(|(_, loc)| *loc)
}

/// A closure value: a snapshot of the environment at capture time plus the
/// lambda node it closes over. The binding list is a fresh copy but the
/// locations are shared, which is what makes `&` aliasing work.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure<'ast> {
    pub env: Env,
    pub lambda: &'ast Lambda,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'ast> {
    Void,
    Integer(i64),
    Str(String),
    Closure(Closure<'ast>),
}

impl Value<'_> {
    /// The `.type` label: 0 Void, 1 Integer, 2 String, 3 Closure.
    pub fn type_label(&self) -> i64 {
        match self {
            Value::Void => 0,
            Value::Integer(_) => 1,
            Value::Str(_) => 2,
            Value::Closure(_) => 3,
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "<void>"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Closure(c) => write!(f, "<closure evaluated at {}>", c.lambda.sl),
        }
    }
}

pub struct Heap<'ast> {
    cells: Vec<Value<'ast>>,
}

impl<'ast> Heap<'ast> {
    pub fn new() -> Self {
        Heap {
            cells: Vec::with_capacity(1024),
        }
    }

    pub fn alloc(&mut self, value: Value<'ast>) -> Location {
        self.cells.push(value);
        self.cells.len() - 1
    }

    /// Callers must pass a live location; the evaluator's root invariant
    /// guarantees this.
    #[inline]
    pub fn get(&self, loc: Location) -> &Value<'ast> {
        &self.cells[loc]
    }

    #[inline]
    pub fn get_mut(&mut self, loc: Location) -> &mut Value<'ast> {
        &mut self.cells[loc]
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Slide marked cells down over unmarked ones and truncate. Returns the
    /// number of reclaimed cells and the relocation table mapping each
    /// surviving old location to its new one (dead slots are left as
    /// `usize::MAX` and must never be consulted).
    pub fn compact(&mut self, marked: &[bool]) -> (usize, Vec<Location>) {
        let n = self.cells.len();
        let mut relocation = vec![usize::MAX; n];
        let mut removed = 0;
        let mut i = 0;
        for j in 0..n {
            if marked[j] {
                if i < j {
                    self.cells.swap(i, j);
                }
                relocation[j] = i;
                i += 1;
            } else {
                removed += 1;
            }
        }
        self.cells.truncate(i);
        (removed, relocation)
    }

    /// Rewrite the captured environments of every surviving closure through
    /// the relocation table. Root references are the evaluator's to repair.
    pub fn relocate_closures(&mut self, relocation: &[Location]) {
        for cell in &mut self.cells {
            if let Value::Closure(closure) = cell {
                for (_, loc) in &mut closure.env {
                    *loc = relocation[*loc];
                }
            }
        }
    }
}

impl Default for Heap<'_> {
    fn default() -> Self {
        Heap::new()
    }
}
