//! The canonical type store.

use fnv::FnvHashMap;

use crate::arena::Handle;
use crate::ty::{Type, TypeInner};

/// An arena of types that deduplicates by structural identity.
///
/// Inserting a type whose [`TypeInner`] is already present returns the
/// existing handle; the name recorded at first insertion wins. Handles are
/// stable for the lifetime of the module.
#[derive(Clone, Debug, Default)]
pub struct TypeArena {
    types: Vec<Type>,
    lookup: FnvHashMap<TypeInner, Handle<Type>>,
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Register a type, returning the handle of its canonical entry.
    pub fn insert(&mut self, ty: Type) -> Handle<Type> {
        if let Some(&handle) = self.lookup.get(&ty.inner) {
            return handle;
        }
        let handle = Handle::from_usize(self.types.len());
        self.lookup.insert(ty.inner.clone(), handle);
        self.types.push(ty);
        handle
    }

    /// Find the canonical handle for a structural description, if one has
    /// been registered.
    pub fn find(&self, inner: &TypeInner) -> Option<Handle<Type>> {
        self.lookup.get(inner).copied()
    }

    pub fn try_get(&self, handle: Handle<Type>) -> Option<&Type> {
        self.types.get(handle.index())
    }

    pub fn check_contains(&self, handle: Handle<Type>) -> bool {
        handle.index() < self.types.len()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Handle<Type>, &Type)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, ty)| (Handle::from_usize(i), ty))
    }
}

impl std::ops::Index<Handle<Type>> for TypeArena {
    type Output = Type;
    fn index(&self, handle: Handle<Type>) -> &Type {
        &self.types[handle.index()]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ty::{Scalar, TypeInner, VectorSize};

    fn vec3f() -> Type {
        Type {
            name: None,
            inner: TypeInner::Vector {
                size: VectorSize::Tri,
                scalar: Scalar::F32,
            },
        }
    }

    #[test]
    fn structurally_equal_types_share_a_handle() {
        let mut arena = TypeArena::new();
        let a = arena.insert(vec3f());
        let b = arena.insert(vec3f());
        assert_eq!(a, b);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn first_name_wins() {
        let mut arena = TypeArena::new();
        let named = Type {
            name: Some("Color".to_string()),
            ..vec3f()
        };
        let a = arena.insert(named);
        let b = arena.insert(vec3f());
        assert_eq!(a, b);
        assert_eq!(arena[a].name.as_deref(), Some("Color"));
    }

    #[test]
    fn distinct_types_get_distinct_handles() {
        let mut arena = TypeArena::new();
        let a = arena.insert(vec3f());
        let b = arena.insert(Type {
            name: None,
            inner: TypeInner::Scalar(Scalar::U32),
        });
        assert_ne!(a, b);
        assert_eq!(arena.find(&TypeInner::Scalar(Scalar::U32)), Some(b));
        assert_eq!(
            arena.find(&TypeInner::Scalar(Scalar::I32)),
            None,
        );
    }
}
