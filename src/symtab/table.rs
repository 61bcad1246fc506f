//! Symbol table implementation.

use crate::error::CompileError;
use crate::types::Ty;

/// Bucket count of each scope's hash table.
const HASH_BUCKETS: usize = 257;

/// Index of a symbol record, stable for the whole compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a scope frame in the scope pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(u32);

impl ScopeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One declared identifier.
#[derive(Debug)]
pub struct Symbol<'a> {
    pub name: &'a str,
    pub ty: Ty,
    /// Byte offset from `$sp`, always a multiple of 4.
    pub offset: i32,
    pub is_array: bool,
    /// Element count; 0 for scalars.
    pub len: u32,
}

impl Symbol<'_> {
    /// Bytes this symbol occupies in the frame.
    pub fn size(&self) -> i32 {
        if self.is_array { self.len as i32 * 4 } else { 4 }
    }
}

/// One level of the scope stack: a bucket table over the symbols declared
/// at this level, plus a link to the enclosing frame.
struct ScopeFrame<'a> {
    name: &'a str,
    buckets: Vec<Vec<SymbolId>>,
    parent: Option<ScopeId>,
}

impl<'a> ScopeFrame<'a> {
    fn new(name: &'a str, parent: Option<ScopeId>) -> Self {
        Self {
            name,
            buckets: vec![Vec::new(); HASH_BUCKETS],
            parent,
        }
    }
}

/// The symbol table: a pool of scope frames, an active-scope stack, and a
/// flat offset allocator.
pub struct SymbolTable<'a> {
    symbols: Vec<Symbol<'a>>,
    scopes: Vec<ScopeFrame<'a>>,
    /// Active chain, innermost last. Never empty: the root scope stays.
    stack: Vec<ScopeId>,
    next_offset: i32,
}

impl<'a> SymbolTable<'a> {
    /// Fresh table with counters reset and a single `global` root scope.
    pub fn new() -> Self {
        let mut table = Self {
            symbols: Vec::new(),
            scopes: Vec::new(),
            stack: Vec::new(),
            next_offset: 0,
        };
        let root = table.alloc_scope("global", None);
        table.stack.push(root);
        table
    }

    /// Enter a new lexical scope (e.g. a function body).
    pub fn push_scope(&mut self, name: &'a str) {
        let frame = self.alloc_scope(name, Some(self.current()));
        self.stack.push(frame);
    }

    /// Leave the current scope. The root scope is never popped; the frame
    /// itself stays in the pool and its symbols stay addressable by id.
    pub fn pop_scope(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Declare a scalar variable in the current scope.
    ///
    /// Fails only if the name already exists in the *current* scope;
    /// shadowing an outer scope is allowed. Allocates 4 bytes.
    pub fn declare_var(&mut self, name: &'a str, ty: Ty) -> Result<SymbolId, CompileError> {
        self.declare(name, ty, false, 0)
    }

    /// Declare a one-dimensional array in the current scope.
    ///
    /// Allocates `len * 4` bytes.
    pub fn declare_array(
        &mut self,
        name: &'a str,
        ty: Ty,
        len: u32,
    ) -> Result<SymbolId, CompileError> {
        self.declare(name, ty, true, len)
    }

    /// Resolve a name, walking the active scope chain innermost-outward.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        let mut scope = Some(self.current());
        while let Some(id) = scope {
            let frame = &self.scopes[id.index()];
            if let Some(sym) = self.lookup_in(frame, name) {
                return Some(sym);
            }
            scope = frame.parent;
        }
        None
    }

    /// Indexed access; ids are handed out by this table and stay valid.
    pub fn symbol(&self, id: SymbolId) -> &Symbol<'a> {
        &self.symbols[id.index()]
    }

    pub fn type_of(&self, name: &str) -> Option<Ty> {
        self.lookup(name).map(|id| self.symbol(id).ty)
    }

    pub fn offset_of(&self, name: &str) -> Option<i32> {
        self.lookup(name).map(|id| self.symbol(id).offset)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Bytes occupied by all declared symbols, a multiple of 4. The code
    /// generator places temporary slots above this watermark.
    pub fn frame_size(&self) -> i32 {
        self.next_offset
    }

    /// All symbol records, in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol<'a>> {
        self.symbols.iter()
    }

    fn current(&self) -> ScopeId {
        self.stack.last().copied().unwrap_or(ScopeId(0))
    }

    fn alloc_scope(&mut self, name: &'a str, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeFrame::new(name, parent));
        id
    }

    fn lookup_in(&self, frame: &ScopeFrame<'a>, name: &str) -> Option<SymbolId> {
        frame.buckets[hash(name)]
            .iter()
            .copied()
            .find(|&id| self.symbol(id).name == name)
    }

    fn declare(
        &mut self,
        name: &'a str,
        ty: Ty,
        is_array: bool,
        len: u32,
    ) -> Result<SymbolId, CompileError> {
        let scope = self.current();
        if self.lookup_in(&self.scopes[scope.index()], name).is_some() {
            return Err(CompileError::DuplicateDeclaration {
                name: name.to_string(),
                scope: self.scopes[scope.index()].name.to_string(),
            });
        }
        let id = SymbolId(self.symbols.len() as u32);
        let symbol = Symbol {
            name,
            ty,
            offset: self.next_offset,
            is_array,
            len,
        };
        self.next_offset += symbol.size();
        self.symbols.push(symbol);
        self.scopes[scope.index()].buckets[hash(name)].push(id);
        Ok(id)
    }
}

impl Default for SymbolTable<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// djb2 over the identifier bytes, reduced to the bucket count.
fn hash(name: &str) -> usize {
    let mut h: u64 = 5381;
    for &byte in name.as_bytes() {
        h = h.wrapping_mul(33).wrapping_add(byte as u64);
    }
    (h % HASH_BUCKETS as u64) as usize
}
