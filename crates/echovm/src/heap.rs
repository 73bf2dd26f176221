//! Arena storage for every heap-resident guest object.
//!
//! Objects never own each other directly: containers, closures, classes and
//! modules hold [`HeapId`] handles, so arbitrary reference cycles are just
//! cycles of integers. Slots are reclaimed only by [`Heap::collect_garbage`].

use crate::{
    builtins::BoundBuiltin,
    bytecode::CallFrame,
    resource::ResourceError,
    types::{
        BoundMethod, ClassObject, Dict, Function, Generator, Instance, Module, Range, Set, SuperProxy, Type,
        ValueIter,
    },
    value::Value,
};

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct HeapId(usize);

impl HeapId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Every kind of object that lives in the arena.
#[derive(Debug)]
pub(crate) enum HeapData {
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Dict),
    Set(Set),
    Range(Range),
    Iter(ValueIter),
    Module(Module),
    Class(ClassObject),
    Instance(Instance),
    Function(Function),
    BoundMethod(BoundMethod),
    BuiltinMethod(BoundBuiltin),
    /// Closure cell; `Value::Undefined` while empty.
    Cell(Value),
    Generator(Generator),
    Super(SuperProxy),
    StaticMethod(Value),
    ClassMethod(Value),
    /// Read-only property wrapping its getter.
    Property(Value),
}

impl HeapData {
    pub fn py_type(&self) -> Type {
        match self {
            Self::List(_) => Type::List,
            Self::Tuple(_) => Type::Tuple,
            Self::Dict(_) => Type::Dict,
            Self::Set(_) => Type::Set,
            Self::Range(_) => Type::Range,
            Self::Iter(_) => Type::Iterator,
            Self::Module(_) => Type::Module,
            Self::Class(_) => Type::Type,
            Self::Instance(_) => Type::Object,
            Self::Function(_) => Type::Function,
            Self::BoundMethod(_) => Type::Method,
            Self::BuiltinMethod(_) => Type::BuiltinFunction,
            Self::Cell(_) => Type::Cell,
            Self::Generator(_) => Type::Generator,
            Self::Super(_) => Type::Super,
            Self::StaticMethod(_) => Type::StaticMethod,
            Self::ClassMethod(_) => Type::ClassMethod,
            Self::Property(_) => Type::Property,
        }
    }
}

/// Snapshot of arena occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Live objects.
    pub live: usize,
    /// Slots ever created (live plus free).
    pub capacity: usize,
    /// Objects reclaimed by the most recent collection.
    pub last_collected: usize,
}

/// The arena.
#[derive(Debug)]
pub(crate) struct Heap {
    entries: Vec<Option<HeapData>>,
    free_list: Vec<HeapId>,
    allocation_limit: Option<usize>,
    live: usize,
    last_collected: usize,
}

impl Heap {
    pub fn new(allocation_limit: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            allocation_limit,
            live: 0,
            last_collected: 0,
        }
    }

    /// Allocates a new heap entry, reusing a freed slot when one is available.
    ///
    /// Fails with [`ResourceError::Allocation`] when the configured limit on
    /// live objects would be exceeded.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        if let Some(limit) = self.allocation_limit
            && self.live >= limit
        {
            return Err(ResourceError::Allocation {
                limit,
                count: self.live + 1,
            });
        }
        self.live += 1;
        if let Some(id) = self.free_list.pop() {
            self.entries[id.0] = Some(data);
            Ok(id)
        } else {
            self.entries.push(Some(data));
            Ok(HeapId(self.entries.len() - 1))
        }
    }

    /// Allocates outside the limit; used only for the builtin classes created
    /// with the interpreter.
    pub fn allocate_builtin(&mut self, data: HeapData) -> HeapId {
        self.live += 1;
        self.entries.push(Some(data));
        HeapId(self.entries.len() - 1)
    }

    /// Returns the data stored at `id`.
    ///
    /// # Panics
    /// Panics if the slot was reclaimed: the collector only frees objects that
    /// no root can reach, so a live handle to a freed slot is an interpreter bug.
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.0)
            .and_then(Option::as_ref)
            .expect("Heap::get: object already freed")
    }

    /// Mutable access to the data stored at `id`. Panics like [`Heap::get`].
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .expect("Heap::get_mut: object already freed")
    }

    #[cfg(test)]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.0).is_some_and(Option::is_some)
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live: self.live,
            capacity: self.entries.len(),
            last_collected: self.last_collected,
        }
    }

    /// Allocates a tuple.
    pub fn tuple(&mut self, items: Vec<Value>) -> Result<Value, ResourceError> {
        Ok(Value::Ref(self.allocate(HeapData::Tuple(items))?))
    }

    /// Allocates a list.
    pub fn list(&mut self, items: Vec<Value>) -> Result<Value, ResourceError> {
        Ok(Value::Ref(self.allocate(HeapData::List(items))?))
    }

    /// Runs mark-sweep garbage collection to free unreachable objects, cycles included.
    ///
    /// Every object reachable from `roots` through the handles stored in
    /// [`HeapData`] survives; everything else is freed and its slot recycled.
    pub fn collect_garbage(&mut self, roots: Vec<HeapId>) -> usize {
        let mut reachable = vec![false; self.entries.len()];
        let mut work_list = roots;

        while let Some(id) = work_list.pop() {
            let idx = id.0;
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(data)) = self.entries.get(idx) {
                collect_child_ids(data, &mut work_list);
            }
        }

        let mut freed = 0;
        for (idx, slot) in self.entries.iter_mut().enumerate() {
            if reachable[idx] || slot.is_none() {
                continue;
            }
            *slot = None;
            self.free_list.push(HeapId(idx));
            freed += 1;
        }
        self.live -= freed;
        self.last_collected = freed;
        freed
    }
}

fn push_value(value: &Value, work_list: &mut Vec<HeapId>) {
    if let Value::Ref(id) = value {
        work_list.push(*id);
    }
}

fn push_values<'a>(values: impl IntoIterator<Item = &'a Value>, work_list: &mut Vec<HeapId>) {
    for value in values {
        push_value(value, work_list);
    }
}

/// Collects child HeapIds from a HeapData value for GC traversal.
fn collect_child_ids(data: &HeapData, work_list: &mut Vec<HeapId>) {
    match data {
        HeapData::Range(_) => {}
        HeapData::List(items) | HeapData::Tuple(items) => push_values(items, work_list),
        HeapData::Dict(dict) => {
            for (k, v) in dict.iter() {
                push_value(k, work_list);
                push_value(v, work_list);
            }
        }
        HeapData::Set(set) => push_values(set.iter(), work_list),
        HeapData::Iter(iter) => match iter {
            ValueIter::Seq { source, .. } | ValueIter::Keys { source, .. } => work_list.push(*source),
            ValueIter::Snapshot { items, .. } => push_values(items, work_list),
            ValueIter::Enumerate { inner, .. } => push_value(inner, work_list),
            ValueIter::Zip { inners } => push_values(inners, work_list),
            ValueIter::Str { .. } | ValueIter::Bytes { .. } | ValueIter::Range { .. } => {}
        },
        HeapData::Module(module) => push_values(module.globals.values(), work_list),
        HeapData::Class(cls) => {
            work_list.extend(&cls.bases);
            work_list.extend(&cls.mro);
            work_list.extend(cls.metaclass);
            push_values(cls.namespace.values(), work_list);
        }
        HeapData::Instance(inst) => {
            work_list.push(inst.class);
            push_values(inst.attrs.values(), work_list);
        }
        HeapData::Function(func) => {
            work_list.push(func.globals);
            work_list.extend(&func.closure);
            push_values(&func.defaults, work_list);
            push_values(func.kwdefaults.iter().map(|(_, v)| v), work_list);
        }
        HeapData::BoundMethod(bound) => {
            push_value(&bound.func, work_list);
            push_value(&bound.receiver, work_list);
        }
        HeapData::BuiltinMethod(bound) => push_value(&bound.receiver, work_list),
        HeapData::Cell(value) | HeapData::StaticMethod(value) | HeapData::ClassMethod(value) | HeapData::Property(value) => {
            push_value(value, work_list);
        }
        HeapData::Generator(generator) => {
            if let Some(frame) = &generator.frame {
                collect_frame_ids(frame, work_list);
            }
        }
        HeapData::Super(proxy) => {
            work_list.push(proxy.this_class);
            work_list.push(proxy.mro_source);
            push_value(&proxy.receiver, work_list);
        }
    }
}

/// Collects the handles a suspended or running frame keeps alive.
pub(crate) fn collect_frame_ids(frame: &CallFrame, work_list: &mut Vec<HeapId>) {
    work_list.push(frame.globals);
    work_list.extend(frame.namespace);
    work_list.extend(&frame.cells);
    push_values(&frame.stack, work_list);
    push_values(&frame.locals, work_list);
    work_list.extend(frame.suspended_handling.iter().map(|caught| caught.value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_unreachable_cycles_and_recycles_slots() {
        let mut heap = Heap::new(None);
        let root = heap.allocate(HeapData::List(vec![])).unwrap();
        let a = heap.allocate(HeapData::List(vec![])).unwrap();
        let b = heap.allocate(HeapData::List(vec![Value::Ref(a)])).unwrap();
        if let HeapData::List(items) = heap.get_mut(a) {
            items.push(Value::Ref(b));
        }
        assert_eq!(heap.collect_garbage(vec![root]), 2);
        assert!(heap.is_live(root));
        assert!(!heap.is_live(a));
        let reused = heap.allocate(HeapData::Tuple(vec![])).unwrap();
        assert!(reused == a || reused == b);
        assert_eq!(heap.stats().live, 2);
    }

    #[test]
    fn allocation_limit_is_enforced() {
        let mut heap = Heap::new(Some(1));
        heap.allocate(HeapData::List(vec![])).unwrap();
        let err = heap.allocate(HeapData::List(vec![])).unwrap_err();
        assert!(matches!(err, ResourceError::Allocation { limit: 1, .. }));
    }
}
