//! Classes, instances and `super()` proxies.

use super::Namespace;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

/// A guest class.
///
/// The method resolution order is linearized once, when the class is created,
/// and stored with the class itself at position 0.
#[derive(Debug)]
pub(crate) struct ClassObject {
    pub name: String,
    pub qualname: String,
    /// `__name__` of the defining module, empty for builtin classes.
    pub module: String,
    pub bases: Vec<HeapId>,
    pub mro: Vec<HeapId>,
    pub namespace: Namespace,
    /// Explicit or inherited metaclass; `None` means plain `type`.
    pub metaclass: Option<HeapId>,
    /// Nearest builtin exception class in the MRO, if this is an exception class.
    pub exc_type: Option<ExcType>,
}

impl ClassObject {
    /// Creates a builtin class with a precomputed MRO (the class id is filled in by the caller).
    pub fn builtin(name: &str, bases: Vec<HeapId>, exc_type: Option<ExcType>) -> Self {
        Self {
            name: name.to_owned(),
            qualname: name.to_owned(),
            module: String::new(),
            bases,
            mro: Vec::new(),
            namespace: super::new_namespace(),
            metaclass: None,
            exc_type,
        }
    }

    /// `module.qualname`, or just the name for builtin classes.
    pub fn display_name(&self) -> String {
        if self.module.is_empty() || self.module == "builtins" {
            self.qualname.clone()
        } else {
            format!("{}.{}", self.module, self.qualname)
        }
    }
}

/// An instance of a guest class.
#[derive(Debug)]
pub(crate) struct Instance {
    pub class: HeapId,
    pub attrs: Namespace,
}

impl Instance {
    pub fn new(class: HeapId) -> Self {
        Self {
            class,
            attrs: super::new_namespace(),
        }
    }
}

/// Result of `super(cls, obj)`: attribute lookups start after `cls` in the
/// MRO of `obj`'s class (or of `obj` itself when it is a class).
#[derive(Debug)]
pub(crate) struct SuperProxy {
    pub this_class: HeapId,
    /// Class whose MRO is searched.
    pub mro_source: HeapId,
    /// Object that found methods are bound to.
    pub receiver: Value,
}

/// Computes the C3 linearization for a new class.
///
/// `bases` must already be non-empty; an implicit `object` base is supplied by
/// the caller.
pub(crate) fn compute_c3_mro(self_id: HeapId, bases: &[HeapId], heap: &Heap) -> RunResult<Vec<HeapId>> {
    if bases.contains(&self_id) {
        return Err(ExcType::type_error("a class cannot inherit from itself"));
    }
    let mut linearizations: Vec<Vec<HeapId>> = Vec::with_capacity(bases.len() + 1);
    for &base_id in bases {
        match heap.get(base_id) {
            HeapData::Class(cls) => linearizations.push(cls.mro.clone()),
            _ => return Err(ExcType::type_error("bases must be classes")),
        }
    }
    linearizations.push(bases.to_vec());

    let mut result = vec![self_id];
    loop {
        linearizations.retain(|l| !l.is_empty());
        if linearizations.is_empty() {
            return Ok(result);
        }
        // a good head appears in no list's tail
        let found = linearizations
            .iter()
            .map(|lin| lin[0])
            .find(|candidate| !linearizations.iter().any(|other| other[1..].contains(candidate)));
        let Some(next) = found else {
            let names: Vec<_> = bases.iter().map(|id| class_name(heap, *id)).collect();
            return Err(ExcType::type_error(format!(
                "Cannot create a consistent method resolution order (MRO) for bases {}",
                names.join(", ")
            )));
        };
        result.push(next);
        for lin in &mut linearizations {
            if lin.first() == Some(&next) {
                lin.remove(0);
            }
        }
    }
}

/// Name of a heap class, or `?` if the id is not a class.
pub(crate) fn class_name(heap: &Heap, id: HeapId) -> String {
    match heap.get(id) {
        HeapData::Class(cls) => cls.name.clone(),
        _ => "?".to_owned(),
    }
}

/// Searches a class's MRO for `name`, returning the first hit.
pub(crate) fn lookup_in_mro(heap: &Heap, class_id: HeapId, name: &str) -> Option<Value> {
    let HeapData::Class(cls) = heap.get(class_id) else {
        return None;
    };
    cls.mro.iter().find_map(|id| match heap.get(*id) {
        HeapData::Class(c) => c.namespace.get(name).cloned(),
        _ => None,
    })
}

/// Like [`lookup_in_mro`] but only considers classes after `after` in `class_id`'s MRO.
pub(crate) fn lookup_after(heap: &Heap, class_id: HeapId, after: HeapId, name: &str) -> Option<Value> {
    let HeapData::Class(cls) = heap.get(class_id) else {
        return None;
    };
    cls.mro
        .iter()
        .skip_while(|id| **id != after)
        .skip(1)
        .find_map(|id| match heap.get(*id) {
            HeapData::Class(c) => c.namespace.get(name).cloned(),
            _ => None,
        })
}

/// Whether `class_id` has `base_id` in its MRO.
pub(crate) fn is_subclass(heap: &Heap, class_id: HeapId, base_id: HeapId) -> bool {
    match heap.get(class_id) {
        HeapData::Class(cls) => cls.mro.contains(&base_id),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_namespace;

    fn class(heap: &mut Heap, name: &str, bases: &[HeapId]) -> HeapId {
        let id = heap
            .allocate(HeapData::Class(ClassObject {
                name: name.to_owned(),
                qualname: name.to_owned(),
                module: "m".to_owned(),
                bases: bases.to_vec(),
                mro: Vec::new(),
                namespace: new_namespace(),
                metaclass: None,
                exc_type: None,
            }))
            .unwrap();
        let mro = if bases.is_empty() {
            vec![id]
        } else {
            compute_c3_mro(id, bases, heap).unwrap()
        };
        if let HeapData::Class(cls) = heap.get_mut(id) {
            cls.mro = mro;
        }
        id
    }

    #[test]
    fn diamond_linearizes_depth_first_left_to_right() {
        let mut heap = Heap::new(None);
        let o = class(&mut heap, "O", &[]);
        let a = class(&mut heap, "A", &[o]);
        let b = class(&mut heap, "B", &[o]);
        let d = class(&mut heap, "D", &[a, b]);
        let HeapData::Class(cls) = heap.get(d) else { unreachable!() };
        assert_eq!(cls.mro, vec![d, a, b, o]);
    }

    #[test]
    fn inconsistent_hierarchy_is_a_type_error() {
        let mut heap = Heap::new(None);
        let o = class(&mut heap, "O", &[]);
        let a = class(&mut heap, "A", &[o]);
        let b = class(&mut heap, "B", &[a]);
        let bad = heap.allocate(HeapData::Instance(Instance::new(o))).unwrap();
        assert!(compute_c3_mro(bad, &[a, b], &heap).is_err());
    }
}
