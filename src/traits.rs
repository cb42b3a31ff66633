//! Key equality functors and pair-like inputs.

use core::borrow::Borrow;

/// Key equality used by the map. Must agree with the hash builder: keys
/// that compare equal must hash equally.
pub trait KeyEq<K: ?Sized, Q: ?Sized = K> {
    fn key_eq(&self, stored: &K, probe: &Q) -> bool;
}

/// `Eq` through `Borrow`, so a `String` key can be probed with `&str`.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultEq;

impl<K, Q> KeyEq<K, Q> for DefaultEq
where
    K: Borrow<Q> + ?Sized,
    Q: Eq + ?Sized,
{
    #[inline]
    fn key_eq(&self, stored: &K, probe: &Q) -> bool {
        stored.borrow() == probe
    }
}

/// Adapts a closure `Fn(&K, &K) -> bool` into a [`KeyEq`].
#[derive(Copy, Clone, Debug, Default)]
pub struct EqFn<F>(pub F);

impl<K: ?Sized, F> KeyEq<K, K> for EqFn<F>
where
    F: Fn(&K, &K) -> bool,
{
    #[inline]
    fn key_eq(&self, stored: &K, probe: &K) -> bool {
        (self.0)(stored, probe)
    }
}

/// Anything that can be turned into an owned `(key, value)` pair for
/// insertion.
pub trait KeyValue<K, V> {
    fn into_key_value(self) -> (K, V);
}

impl<K, V> KeyValue<K, V> for (K, V) {
    #[inline]
    fn into_key_value(self) -> (K, V) {
        self
    }
}

impl<'a, K: Clone, V: Clone> KeyValue<K, V> for &'a (K, V) {
    #[inline]
    fn into_key_value(self) -> (K, V) {
        (self.0.clone(), self.1.clone())
    }
}

impl<'a, K: Clone, V: Clone> KeyValue<K, V> for (&'a K, &'a V) {
    #[inline]
    fn into_key_value(self) -> (K, V) {
        (self.0.clone(), self.1.clone())
    }
}
