//! Container shapes: how nested Rust containers map to n-dimensional
//! extents and a flat, row-major element order.
//!
//! [`H5Data`] describes a value that can be written: its [`Shape`] and a
//! walk over its elements. [`H5DataRead`] adds construction from, and
//! refilling with, a flat element stream. Both are implemented for every
//! [`H5Type`] scalar (rank 0), `Vec`, `VecDeque`, fixed-size arrays and
//! slices (one dimension per nesting level), and with the `ndarray` feature
//! for `ndarray` arrays. `BTreeMap` values can be written in key order.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{FixedString, H5Type, ObjectRef};

/// Extents of an n-dimensional value; rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<u64>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<u64>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Product of the extents; 1 for a scalar.
    pub fn num_elements(&self) -> u64 {
        self.dims.iter().fold(1u64, |n, &d| n.saturating_mul(d))
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> Vec<u64> {
        let mut strides = vec![1u64; self.dims.len()];
        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1].saturating_mul(self.dims[i + 1]);
        }
        strides
    }

    /// The extents other than 1.
    pub fn squeezed(&self) -> Vec<u64> {
        self.dims.iter().copied().filter(|&d| d != 1).collect()
    }

    /// Whether a value of this shape can be stored in `stored` extents:
    /// identical after dropping extent-1 dimensions, or both empty.
    pub fn is_compatible_with(&self, stored: &[u64]) -> bool {
        let stored = Shape::new(stored);
        if self.num_elements() == 0 && stored.num_elements() == 0 {
            return true;
        }
        self.squeezed() == stored.squeezed()
    }

    pub fn into_dims(self) -> Vec<u64> {
        self.dims
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

impl From<Vec<u64>> for Shape {
    fn from(dims: Vec<u64>) -> Self {
        Self { dims }
    }
}

impl From<&[u64]> for Shape {
    fn from(dims: &[u64]) -> Self {
        Self { dims: dims.to_vec() }
    }
}

impl<const N: usize> From<[u64; N]> for Shape {
    fn from(dims: [u64; N]) -> Self {
        Self { dims: dims.to_vec() }
    }
}

/// Adapt stored extents to a container accepting ranks `min..=max`.
///
/// Extra dimensions are dropped only when their extent is 1, leading ones
/// first; missing dimensions are appended with extent 1.
pub fn fit_rank(dims: &[u64], min: usize, max: usize) -> Option<Vec<u64>> {
    if (min..=max).contains(&dims.len()) {
        return Some(dims.to_vec());
    }
    if dims.len() < min {
        let mut out = dims.to_vec();
        out.resize(min, 1);
        return Some(out);
    }
    let mut excess = dims.len() - max;
    let out: Vec<u64> = dims
        .iter()
        .copied()
        .filter(|&d| {
            if excess > 0 && d == 1 {
                excess -= 1;
                false
            } else {
                true
            }
        })
        .collect();
    (excess == 0).then_some(out)
}

/// A value that can be written as an n-dimensional array of `Element`s.
pub trait H5Data {
    /// The scalar element type.
    type Element: H5Type;

    /// Smallest and largest rank a value of this type can have.
    const MIN_RANK: usize;
    const MAX_RANK: usize;

    /// Extents of this value, which sits at nesting level `depth`.
    ///
    /// Fails with [`Error::RaggedShape`] when siblings disagree; the
    /// reported depth is absolute.
    fn extents_at(&self, depth: usize) -> Result<Vec<u64>>;

    /// The shape of this value.
    fn shape(&self) -> Result<Shape> {
        Ok(Shape::new(self.extents_at(0)?))
    }

    /// Visit every element in row-major order.
    fn for_each_element<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Self::Element) -> Result<()>,
    ) -> Result<()>;

    /// The elements as one contiguous slice, when stored that way.
    fn as_contiguous(&self) -> Option<&[Self::Element]> {
        None
    }

    /// The elements of a slice of values as one contiguous slice, when the
    /// values store their elements inline.
    fn as_element_slice(items: &[Self]) -> Option<&[Self::Element]>
    where
        Self: Sized,
    {
        let _ = items;
        None
    }
}

/// A value that can be built from, or refilled with, a row-major element
/// stream.
pub trait H5DataRead: H5Data + Sized {
    /// Build a value with extents `dims`, which has a rank in
    /// `MIN_RANK..=MAX_RANK`.
    fn from_elements(dims: &[u64], elements: &mut dyn Iterator<Item = Self::Element>)
        -> Result<Self>;

    /// Overwrite the elements in place, keeping the current shape.
    fn fill_from(&mut self, elements: &mut dyn Iterator<Item = Self::Element>) -> Result<()>;

    fn as_contiguous_mut(&mut self) -> Option<&mut [Self::Element]> {
        None
    }

    fn as_element_slice_mut(items: &mut [Self]) -> Option<&mut [Self::Element]> {
        let _ = items;
        None
    }
}

/// Pull one element, failing if the stream is exhausted.
#[doc(hidden)]
pub fn next_element<T>(elements: &mut dyn Iterator<Item = T>) -> Result<T> {
    elements
        .next()
        .ok_or_else(|| Error::UnsupportedLayout("element stream ended early".into()))
}

/// Implements [`H5Data`] and [`H5DataRead`] for a rank-0 element type.
#[doc(hidden)]
#[macro_export]
macro_rules! __impl_scalar_data {
    ($ty:ty) => {
        impl $crate::H5Data for $ty {
            type Element = $ty;
            const MIN_RANK: usize = 0;
            const MAX_RANK: usize = 0;

            fn extents_at(&self, _: usize) -> $crate::Result<::std::vec::Vec<u64>> {
                ::core::result::Result::Ok(::std::vec::Vec::new())
            }

            fn for_each_element<'a>(
                &'a self,
                f: &mut dyn FnMut(&'a Self::Element) -> $crate::Result<()>,
            ) -> $crate::Result<()> {
                f(self)
            }

            fn as_contiguous(&self) -> ::core::option::Option<&[Self::Element]> {
                ::core::option::Option::Some(::core::slice::from_ref(self))
            }

            fn as_element_slice(items: &[Self]) -> ::core::option::Option<&[Self::Element]> {
                ::core::option::Option::Some(items)
            }
        }

        impl $crate::H5DataRead for $ty {
            fn from_elements(
                _: &[u64],
                elements: &mut dyn ::core::iter::Iterator<Item = Self>,
            ) -> $crate::Result<Self> {
                $crate::shape::next_element(elements)
            }

            fn fill_from(
                &mut self,
                elements: &mut dyn ::core::iter::Iterator<Item = Self>,
            ) -> $crate::Result<()> {
                *self = $crate::shape::next_element(elements)?;
                ::core::result::Result::Ok(())
            }

            fn as_contiguous_mut(&mut self) -> ::core::option::Option<&mut [Self]> {
                ::core::option::Option::Some(::core::slice::from_mut(self))
            }

            fn as_element_slice_mut(items: &mut [Self]) -> ::core::option::Option<&mut [Self]> {
                ::core::option::Option::Some(items)
            }
        }
    };
}

__impl_scalar_data!(i8);
__impl_scalar_data!(i16);
__impl_scalar_data!(i32);
__impl_scalar_data!(i64);
__impl_scalar_data!(u8);
__impl_scalar_data!(u16);
__impl_scalar_data!(u32);
__impl_scalar_data!(u64);
#[cfg(target_pointer_width = "64")]
__impl_scalar_data!(isize);
#[cfg(target_pointer_width = "64")]
__impl_scalar_data!(usize);
__impl_scalar_data!(f32);
__impl_scalar_data!(f64);
__impl_scalar_data!(bool);
__impl_scalar_data!(String);
__impl_scalar_data!(ObjectRef);
#[cfg(feature = "float16")]
__impl_scalar_data!(half::f16);

impl<const N: usize> H5Data for FixedString<N> {
    type Element = Self;
    const MIN_RANK: usize = 0;
    const MAX_RANK: usize = 0;

    fn extents_at(&self, _: usize) -> Result<Vec<u64>> {
        Ok(Vec::new())
    }

    fn for_each_element<'a>(&'a self, f: &mut dyn FnMut(&'a Self) -> Result<()>) -> Result<()> {
        f(self)
    }

    fn as_contiguous(&self) -> Option<&[Self]> {
        Some(std::slice::from_ref(self))
    }

    fn as_element_slice(items: &[Self]) -> Option<&[Self]> {
        Some(items)
    }
}

impl<const N: usize> H5DataRead for FixedString<N> {
    fn from_elements(_: &[u64], elements: &mut dyn Iterator<Item = Self>) -> Result<Self> {
        next_element(elements)
    }

    fn fill_from(&mut self, elements: &mut dyn Iterator<Item = Self>) -> Result<()> {
        *self = next_element(elements)?;
        Ok(())
    }

    fn as_contiguous_mut(&mut self) -> Option<&mut [Self]> {
        Some(std::slice::from_mut(self))
    }

    fn as_element_slice_mut(items: &mut [Self]) -> Option<&mut [Self]> {
        Some(items)
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Extents of a sequence whose items sit at `depth + 1`.
fn sequence_extents<'a, T: H5Data + 'a>(
    mut items: impl ExactSizeIterator<Item = &'a T>,
    depth: usize,
) -> Result<Vec<u64>> {
    let mut dims = vec![items.len() as u64];
    let Some(first) = items.next() else {
        dims.resize(1 + T::MIN_RANK, 0);
        return Ok(dims);
    };
    let inner = first.extents_at(depth + 1)?;
    for item in items {
        let other = item.extents_at(depth + 1)?;
        if other != inner {
            let at = inner
                .iter()
                .zip(&other)
                .position(|(a, b)| a != b)
                .unwrap_or(inner.len().min(other.len()));
            return Err(Error::RaggedShape {
                depth: depth + 1 + at,
                expected: inner.get(at).copied().unwrap_or(0),
                found: other.get(at).copied().unwrap_or(0),
            });
        }
    }
    dims.extend(inner);
    Ok(dims)
}

fn sequence_from_elements<T: H5DataRead>(
    dims: &[u64],
    elements: &mut dyn Iterator<Item = T::Element>,
) -> Result<Vec<T>> {
    let (&len, inner) = dims
        .split_first()
        .ok_or_else(|| Error::UnsupportedLayout("sequence needs at least one dimension".into()))?;
    (0..len).map(|_| T::from_elements(inner, elements)).collect()
}

impl<T: H5Data> H5Data for Vec<T> {
    type Element = T::Element;
    const MIN_RANK: usize = 1 + T::MIN_RANK;
    const MAX_RANK: usize = 1 + T::MAX_RANK;

    fn extents_at(&self, depth: usize) -> Result<Vec<u64>> {
        sequence_extents(self.iter(), depth)
    }

    fn for_each_element<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Self::Element) -> Result<()>,
    ) -> Result<()> {
        self.iter().try_for_each(|item| item.for_each_element(f))
    }

    fn as_contiguous(&self) -> Option<&[Self::Element]> {
        T::as_element_slice(self)
    }
}

impl<T: H5DataRead> H5DataRead for Vec<T> {
    fn from_elements(
        dims: &[u64],
        elements: &mut dyn Iterator<Item = Self::Element>,
    ) -> Result<Self> {
        sequence_from_elements(dims, elements)
    }

    fn fill_from(&mut self, elements: &mut dyn Iterator<Item = Self::Element>) -> Result<()> {
        self.iter_mut().try_for_each(|item| item.fill_from(elements))
    }

    fn as_contiguous_mut(&mut self) -> Option<&mut [Self::Element]> {
        T::as_element_slice_mut(self)
    }
}

impl<T: H5Data> H5Data for VecDeque<T> {
    type Element = T::Element;
    const MIN_RANK: usize = 1 + T::MIN_RANK;
    const MAX_RANK: usize = 1 + T::MAX_RANK;

    fn extents_at(&self, depth: usize) -> Result<Vec<u64>> {
        sequence_extents(self.iter(), depth)
    }

    fn for_each_element<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Self::Element) -> Result<()>,
    ) -> Result<()> {
        self.iter().try_for_each(|item| item.for_each_element(f))
    }

    fn as_contiguous(&self) -> Option<&[Self::Element]> {
        match self.as_slices() {
            (front, []) => T::as_element_slice(front),
            _ => None,
        }
    }
}

impl<T: H5DataRead> H5DataRead for VecDeque<T> {
    fn from_elements(
        dims: &[u64],
        elements: &mut dyn Iterator<Item = Self::Element>,
    ) -> Result<Self> {
        Ok(sequence_from_elements(dims, elements)?.into())
    }

    fn fill_from(&mut self, elements: &mut dyn Iterator<Item = Self::Element>) -> Result<()> {
        self.iter_mut().try_for_each(|item| item.fill_from(elements))
    }
}

impl<T: H5Data, const N: usize> H5Data for [T; N] {
    type Element = T::Element;
    const MIN_RANK: usize = 1 + T::MIN_RANK;
    const MAX_RANK: usize = 1 + T::MAX_RANK;

    fn extents_at(&self, depth: usize) -> Result<Vec<u64>> {
        sequence_extents(self.iter(), depth)
    }

    fn for_each_element<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Self::Element) -> Result<()>,
    ) -> Result<()> {
        self.iter().try_for_each(|item| item.for_each_element(f))
    }

    fn as_contiguous(&self) -> Option<&[Self::Element]> {
        T::as_element_slice(self)
    }

    fn as_element_slice(items: &[Self]) -> Option<&[Self::Element]> {
        T::as_element_slice(items.as_flattened())
    }
}

impl<T: H5DataRead, const N: usize> H5DataRead for [T; N] {
    fn from_elements(
        dims: &[u64],
        elements: &mut dyn Iterator<Item = Self::Element>,
    ) -> Result<Self> {
        if dims.first() != Some(&(N as u64)) {
            return Err(Error::shape_mismatch(
                format!("reading into [_; {N}]"),
                &[N as u64],
                &dims[..dims.len().min(1)],
            ));
        }
        sequence_from_elements::<T>(dims, elements)?
            .try_into()
            .map_err(|_| Error::UnsupportedLayout(format!("expected {N} items")))
    }

    fn fill_from(&mut self, elements: &mut dyn Iterator<Item = Self::Element>) -> Result<()> {
        self.iter_mut().try_for_each(|item| item.fill_from(elements))
    }

    fn as_contiguous_mut(&mut self) -> Option<&mut [Self::Element]> {
        T::as_element_slice_mut(self)
    }

    fn as_element_slice_mut(items: &mut [Self]) -> Option<&mut [Self::Element]> {
        T::as_element_slice_mut(items.as_flattened_mut())
    }
}

impl<T: H5Data> H5Data for [T] {
    type Element = T::Element;
    const MIN_RANK: usize = 1 + T::MIN_RANK;
    const MAX_RANK: usize = 1 + T::MAX_RANK;

    fn extents_at(&self, depth: usize) -> Result<Vec<u64>> {
        sequence_extents(self.iter(), depth)
    }

    fn for_each_element<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Self::Element) -> Result<()>,
    ) -> Result<()> {
        self.iter().try_for_each(|item| item.for_each_element(f))
    }

    fn as_contiguous(&self) -> Option<&[Self::Element]> {
        T::as_element_slice(self)
    }
}

impl<T: H5Data + ?Sized> H5Data for &T {
    type Element = T::Element;
    const MIN_RANK: usize = T::MIN_RANK;
    const MAX_RANK: usize = T::MAX_RANK;

    fn extents_at(&self, depth: usize) -> Result<Vec<u64>> {
        (**self).extents_at(depth)
    }

    fn for_each_element<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Self::Element) -> Result<()>,
    ) -> Result<()> {
        (**self).for_each_element(f)
    }

    fn as_contiguous(&self) -> Option<&[Self::Element]> {
        (**self).as_contiguous()
    }
}

/// Map values are written in key order, as a sequence.
impl<K, V: H5Data> H5Data for BTreeMap<K, V> {
    type Element = V::Element;
    const MIN_RANK: usize = 1 + V::MIN_RANK;
    const MAX_RANK: usize = 1 + V::MAX_RANK;

    fn extents_at(&self, depth: usize) -> Result<Vec<u64>> {
        sequence_extents(self.values(), depth)
    }

    fn for_each_element<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Self::Element) -> Result<()>,
    ) -> Result<()> {
        self.values().try_for_each(|item| item.for_each_element(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn elements<T: H5Data>(value: &T) -> Vec<T::Element>
    where
        T::Element: Clone,
    {
        let mut out = Vec::new();
        value
            .for_each_element(&mut |e| {
                out.push(e.clone());
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn nested_vectors() {
        let v = vec![vec![1.0f64, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        assert_eq!(v.shape().unwrap().dims(), &[2, 3]);
        assert_eq!(elements(&v), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(v.as_contiguous().is_none());

        let flat = vec![1u32, 2, 3];
        assert_eq!(flat.as_contiguous(), Some(&[1u32, 2, 3][..]));
    }

    #[test]
    fn ragged_vectors_are_rejected() {
        let v = vec![vec![1, 2], vec![3]];
        match v.shape() {
            Err(Error::RaggedShape {
                depth,
                expected,
                found,
            }) => assert_eq!((depth, expected, found), (1, 2, 1)),
            other => panic!("unexpected {other:?}"),
        }

        let deep = vec![vec![vec![1u8; 2]; 2], vec![vec![1u8; 3]; 2]];
        assert!(matches!(deep.shape(), Err(Error::RaggedShape { depth: 2, .. })));
    }

    #[test]
    fn empty_sequences_keep_their_rank() {
        assert_eq!(Vec::<f64>::new().shape().unwrap().dims(), &[0]);
        assert_eq!(Vec::<Vec<i32>>::new().shape().unwrap().dims(), &[0, 0]);
        assert_eq!(vec![Vec::<i32>::new(); 2].shape().unwrap().dims(), &[2, 0]);
    }

    #[test]
    fn arrays_add_a_dimension_and_stay_contiguous() {
        let v = vec![[1i16, 2, 3], [4, 5, 6]];
        assert_eq!(v.shape().unwrap().dims(), &[2, 3]);
        assert_eq!(v.as_contiguous().map(<[i16]>::len), Some(6));
        assert_eq!(42i64.shape().unwrap(), Shape::scalar());
    }

    #[test]
    fn maps_and_deques_write_in_order() {
        let map: BTreeMap<&str, f32> = [("b", 2.0), ("a", 1.0)].into_iter().collect();
        assert_eq!(elements(&map), vec![1.0, 2.0]);

        let mut deque: VecDeque<u8> = VecDeque::with_capacity(4);
        deque.push_back(2);
        deque.push_front(1);
        assert_eq!(elements(&deque), vec![1, 2]);
        let rebuilt = VecDeque::<u8>::from_elements(&[2], &mut vec![7, 8].into_iter()).unwrap();
        assert_eq!(rebuilt, VecDeque::from(vec![7, 8]));
    }

    #[test]
    fn rebuild_from_elements() {
        let dims = [2u64, 2];
        let v = Vec::<Vec<i32>>::from_elements(&dims, &mut (1..=4)).unwrap();
        assert_eq!(v, vec![vec![1, 2], vec![3, 4]]);

        let mut target = vec![[0u8; 2]; 2];
        target.fill_from(&mut (10..14)).unwrap();
        assert_eq!(target, vec![[10, 11], [12, 13]]);

        let short = Vec::<i32>::from_elements(&[3], &mut (0..2));
        assert!(short.is_err());
        assert!(<[u8; 3]>::from_elements(&[2], &mut (0..2)).is_err());
    }

    #[test]
    fn rank_fitting() {
        // scalar dataset read into a vector
        assert_eq!(fit_rank(&[], 1, 1), Some(vec![1]));
        // [1, 3] read into Vec<f64>
        assert_eq!(fit_rank(&[1, 3], 1, 1), Some(vec![3]));
        // leading unit extents go first
        assert_eq!(fit_rank(&[1, 1, 4], 2, 2), Some(vec![1, 4]));
        assert_eq!(fit_rank(&[2, 3], 1, 1), None);
        assert_eq!(fit_rank(&[1], 0, 0), Some(vec![]));
    }

    #[test]
    fn write_compatibility_ignores_unit_extents() {
        let value = Shape::from([3]);
        assert!(value.is_compatible_with(&[1, 3]));
        assert!(value.is_compatible_with(&[3, 1]));
        assert!(!value.is_compatible_with(&[2]));
        assert!(Shape::from([0, 0]).is_compatible_with(&[0, 5]));
        assert_eq!(Shape::from([2, 3, 4]).strides(), vec![12, 4, 1]);
        assert_eq!(Shape::from([2, 3]).to_string(), "[2, 3]");
    }

    proptest! {
        #[test]
        fn rectangular_shapes_roundtrip(rows in 0usize..6, cols in 1usize..6) {
            let v: Vec<Vec<u16>> = (0..rows)
                .map(|r| (0..cols).map(|c| (r * cols + c) as u16).collect())
                .collect();
            let shape = v.shape().unwrap();
            let expected_cols = if rows == 0 { 0 } else { cols as u64 };
            prop_assert_eq!(shape.dims(), &[rows as u64, expected_cols][..]);
            let flat = elements(&v);
            prop_assert_eq!(flat.len() as u64, shape.num_elements());
            let back = Vec::<Vec<u16>>::from_elements(shape.dims(), &mut flat.into_iter()).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}
