//! A map of dense integer key to value.

use std::marker::PhantomData;

pub trait Index: From<usize> {
    fn index(&self) -> usize;
}

/// A map of a dense integer key to value, implemented as a vector.
/// Effectively wraps Vec<V> to provide typed keys.
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn new() -> Self {
        DenseMap {
            vec: Vec::new(),
            key_type: PhantomData,
        }
    }

    pub fn get(&self, k: K) -> &V {
        &self.vec[k.index()]
    }

    pub fn get_mut(&mut self, k: K) -> &mut V {
        &mut self.vec[k.index()]
    }

    pub fn next_id(&self) -> K {
        K::from(self.vec.len())
    }

    pub fn push(&mut self, val: V) -> K {
        let id = self.next_id();
        self.vec.push(val);
        id
    }

    pub fn values(&self) -> std::slice::Iter<V> {
        self.vec.iter()
    }

    pub fn values_mut(&mut self) -> std::slice::IterMut<V> {
        self.vec.iter_mut()
    }
}

impl<K: Index, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap::new()
    }
}
