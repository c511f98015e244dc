//! Stack and symbol resolution for parsed traces.
//!
//! Stack ids on the wire restart at zero after every sequence point, so
//! [`StackTable`] keeps an epoch offset that turns raw ids into globally
//! unique indices. [`MethodMap`] collects address ranges from rundown events
//! and resolves instruction addresses into shared [`MethodDescription`]s.
//! [`StringPool`] bounds allocation by handing out one `Arc<str>` per
//! distinct string.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use trace_model::{MethodDescription, StackFrame, StackTrace};

/// Deduplicating string interner. At most one allocation per distinct
/// string; handles outlive the pool's users via `Arc`.
#[derive(Default)]
pub struct StringPool {
    strings: HashSet<Arc<str>>,
}

impl StringPool {
    pub fn new() -> Self {
        StringPool::default()
    }

    pub fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        let interned: Arc<str> = Arc::from(s);
        self.strings.insert(interned.clone());
        interned
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Stack-id table with the sequence-point reset protocol.
///
/// Raw ids are per-epoch; the effective index of any stack is
/// `stack_index_offset + raw_id`. A sequence point advances the offset past
/// every index of the previous epoch, so ids that restart at zero cannot
/// collide with it.
#[derive(Default)]
pub struct StackTable {
    stacks: HashMap<u64, Vec<u64>>,
    stack_index_offset: u64,
    // one past the highest index registered so far
    last_stack_index: u64,
}

impl StackTable {
    pub fn new() -> Self {
        StackTable::default()
    }

    /// Register the stacks of one stack block, `first_id` onwards.
    pub fn register_block<I>(&mut self, first_id: u32, stacks: I)
    where
        I: IntoIterator<Item = Vec<u64>>,
    {
        let mut end = self.stack_index_offset + first_id as u64;
        for addresses in stacks {
            self.stacks.insert(end, addresses);
            end += 1;
        }
        self.last_stack_index = self.last_stack_index.max(end);
    }

    /// Start a new epoch: raw ids seen from now on restart at zero.
    pub fn sequence_point(&mut self) {
        self.stack_index_offset = self.last_stack_index;
    }

    /// Effective index for a raw stack id referenced by an event.
    pub fn event_stack_index(&self, raw_id: u32) -> u64 {
        self.stack_index_offset + raw_id as u64
    }

    pub fn addresses(&self, index: u64) -> Option<&[u64]> {
        self.stacks.get(&index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

/// Address-range to method mapping built from rundown events.
pub struct MethodMap {
    by_start: BTreeMap<u64, (u64, Arc<MethodDescription>)>,
    unknown: HashMap<u64, Arc<MethodDescription>>,
    empty: Arc<str>,
}

impl MethodMap {
    pub fn new() -> Self {
        MethodMap {
            by_start: BTreeMap::new(),
            unknown: HashMap::new(),
            empty: Arc::from(""),
        }
    }

    /// Insert a method keyed by `[start, start + size)`. Descriptions
    /// without a range are ignored; later inserts win on identical starts.
    pub fn insert(&mut self, method: Arc<MethodDescription>) {
        if let (Some(start), Some(size)) = (method.start_address, method.size) {
            self.by_start.insert(start, (start.saturating_add(size), method));
        }
    }

    /// Resolve the method containing `address`; unknown addresses get a
    /// synthetic description named after the raw hex address, one per
    /// distinct address.
    pub fn lookup(&mut self, address: u64) -> Arc<MethodDescription> {
        if let Some((_, (end, method))) = self.by_start.range(..=address).next_back() {
            if address < *end {
                return method.clone();
            }
        }
        let empty = self.empty.clone();
        self.unknown
            .entry(address)
            .or_insert_with(|| {
                Arc::new(MethodDescription {
                    name: Arc::from(format!("0x{address:x}")),
                    namespace: empty,
                    signature: None,
                    start_address: None,
                    size: None,
                })
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }
}

impl Default for MethodMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined resolver state owned by the parser.
#[derive(Default)]
pub struct StackResolver {
    pub stacks: StackTable,
    pub methods: MethodMap,
}

impl StackResolver {
    pub fn new() -> Self {
        StackResolver::default()
    }

    /// Build the stack trace for an effective stack index, if registered.
    pub fn resolve(&mut self, stack_index: u64) -> Option<StackTrace> {
        let addresses = self.stacks.stacks.get(&stack_index)?;
        let frames = addresses
            .iter()
            .map(|&address| StackFrame {
                address,
                method: self.methods.lookup(address),
            })
            .collect();
        Some(StackTrace { frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_identity() {
        let mut pool = StringPool::new();
        let a = pool.intern("TaskID");
        let b = pool.intern("TaskID");
        let c = pool.intern("Behavior");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_sequence_point_reset() {
        let mut table = StackTable::new();
        table.register_block(0, vec![vec![0xaaaa]]);
        table.sequence_point();
        table.register_block(0, vec![vec![0xbbbb]]);

        // both epochs used firstId=0 yet land on distinct indices
        assert_eq!(table.addresses(0), Some(&[0xaaaa][..]));
        assert_eq!(table.addresses(table.event_stack_index(0)), Some(&[0xbbbb][..]));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_event_index_follows_epoch() {
        let mut table = StackTable::new();
        table.register_block(1, vec![vec![0x1], vec![0x2], vec![0x3]]);
        assert_eq!(table.event_stack_index(2), 2);

        table.sequence_point();
        assert_eq!(table.event_stack_index(1), 5);
    }

    #[test]
    fn test_method_range_lookup() {
        let mut methods = MethodMap::new();
        methods.insert(Arc::new(MethodDescription {
            name: Arc::from("M"),
            namespace: Arc::from("N"),
            signature: Some(Arc::from("()")),
            start_address: Some(0x1000),
            size: Some(0x100),
        }));

        assert_eq!(methods.lookup(0x1000).name.as_ref(), "M");
        assert_eq!(methods.lookup(0x1050).namespace.as_ref(), "N");
        assert_eq!(methods.lookup(0x10ff).name.as_ref(), "M");
        // one past the end falls out of the range
        assert_eq!(methods.lookup(0x1100).name.as_ref(), "0x1100");
    }

    #[test]
    fn test_unknown_addresses_are_deduplicated() {
        let mut methods = MethodMap::new();
        let a = methods.lookup(0xdead);
        let b = methods.lookup(0xdead);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name.as_ref(), "0xdead");
        assert_eq!(a.start_address, None);
    }

    #[test]
    fn test_resolver_attaches_methods() {
        let mut resolver = StackResolver::new();
        resolver.stacks.register_block(1, vec![vec![0x1050, 0x9999]]);
        resolver.methods.insert(Arc::new(MethodDescription {
            name: Arc::from("M"),
            namespace: Arc::from("N"),
            signature: None,
            start_address: Some(0x1000),
            size: Some(0x100),
        }));

        let trace = resolver.resolve(1).unwrap();
        assert_eq!(trace.frames.len(), 2);
        assert_eq!(trace.frames[0].method.name.as_ref(), "M");
        assert_eq!(trace.frames[1].method.name.as_ref(), "0x9999");

        assert!(resolver.resolve(42).is_none());
    }
}
