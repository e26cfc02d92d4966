//! `ndarray` arrays as datasets and attributes.
//!
//! Any `ArrayBase` whose elements are scalar element types can be written;
//! owned arrays can be read. A fixed-dimension array reads datasets of its
//! own rank (after dropping or adding extents of 1), an `ArrayD` reads any
//! rank. Arrays in standard layout are transferred without copying, others
//! are gathered in logical order.

use ndarray::{ArrayBase, Data, DataMut, DataOwned, Dimension, IxDyn};

use crate::error::{Error, Result};
use crate::shape::{next_element, H5Data, H5DataRead};
use crate::types::H5Type;

/// Largest rank a dynamic-dimension array reads.
const MAX_DYN_RANK: usize = 32;

impl<A, S, D> H5Data for ArrayBase<S, D>
where
    A: H5Type + H5Data<Element = A>,
    S: Data<Elem = A>,
    D: Dimension,
{
    type Element = A;

    const MIN_RANK: usize = match D::NDIM {
        Some(n) => n,
        None => 0,
    };
    const MAX_RANK: usize = match D::NDIM {
        Some(n) => n,
        None => MAX_DYN_RANK,
    };

    fn extents_at(&self, _: usize) -> Result<Vec<u64>> {
        Ok(ArrayBase::shape(self).iter().map(|&d| d as u64).collect())
    }

    fn for_each_element<'a>(&'a self, f: &mut dyn FnMut(&'a A) -> Result<()>) -> Result<()> {
        self.iter().try_for_each(f)
    }

    fn as_contiguous(&self) -> Option<&[A]> {
        self.as_slice()
    }
}

impl<A, S, D> H5DataRead for ArrayBase<S, D>
where
    A: H5Type + H5DataRead<Element = A>,
    S: DataOwned<Elem = A> + DataMut,
    D: Dimension,
{
    fn from_elements(dims: &[u64], elements: &mut dyn Iterator<Item = A>) -> Result<Self> {
        let shape = dims
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<std::result::Result<Vec<usize>, _>>()
            .map_err(|_| Error::UnsupportedLayout(format!("extents {dims:?} do not fit in memory")))?;
        let count: usize = shape.iter().product();
        let data = (0..count)
            .map(|_| next_element(elements))
            .collect::<Result<Vec<A>>>()?;
        let array = ArrayBase::<S, IxDyn>::from_shape_vec(IxDyn(&shape), data)
            .map_err(|e| Error::UnsupportedLayout(format!("building an array of {dims:?}: {e}")))?;
        array
            .into_dimensionality::<D>()
            .map_err(|e| Error::UnsupportedLayout(format!("array of {dims:?} has the wrong rank: {e}")))
    }

    fn fill_from(&mut self, elements: &mut dyn Iterator<Item = A>) -> Result<()> {
        for slot in self.iter_mut() {
            *slot = next_element(elements)?;
        }
        Ok(())
    }

    fn as_contiguous_mut(&mut self) -> Option<&mut [A]> {
        self.as_slice_mut()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{arr2, Array1, Array2, ArrayD, ShapeBuilder};

    use crate::{Engine, Error, File, Location, MemEngine, OpenMode};

    fn file() -> File {
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
        File::open_in(&engine, "nd.h5", OpenMode::Truncate).unwrap()
    }

    #[test]
    fn standard_layout_round_trips() {
        let file = file();
        let grid = arr2(&[[1.0f64, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let ds = file.create_dataset_from("grid", &grid).unwrap();
        assert_eq!(ds.shape().unwrap(), [2, 3]);
        let back: Array2<f64> = ds.read().unwrap();
        assert_eq!(back, grid);
    }

    #[test]
    fn transposed_views_are_written_in_logical_order() {
        let file = file();
        let grid = arr2(&[[1i32, 2], [3, 4], [5, 6]]);
        let ds = file.create_dataset_from("t", &grid.t()).unwrap();
        assert_eq!(ds.shape().unwrap(), [2, 3]);
        let rows: Vec<Vec<i32>> = ds.read().unwrap();
        assert_eq!(rows, [vec![1, 3, 5], vec![2, 4, 6]]);
    }

    #[test]
    fn dynamic_rank_reads_any_shape() {
        let file = file();
        let ds = file
            .create_dataset_from("cube", &vec![vec![vec![7u8; 4]; 3]; 2])
            .unwrap();
        let cube: ArrayD<u8> = ds.read().unwrap();
        assert_eq!(cube.shape(), &[2, 3, 4]);
        assert!(cube.iter().all(|&v| v == 7));
    }

    #[test]
    fn unit_extents_fit_the_array_rank() {
        let file = file();
        let ds = file.create_dataset_from("row", &vec![vec![1u16, 2, 3]]).unwrap();
        let row: Array1<u16> = ds.read().unwrap();
        assert_eq!(row.to_vec(), [1, 2, 3]);
        let err = file
            .create_dataset_from("plane", &arr2(&[[1u16, 2], [3, 4]]))
            .unwrap()
            .read::<Array1<u16>>()
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    }

    #[test]
    fn read_into_fills_column_major_arrays() {
        let file = file();
        let ds = file
            .create_dataset_from("m", &arr2(&[[1i64, 2], [3, 4]]))
            .unwrap();
        let mut fortran = Array2::<i64>::zeros((2, 2).f());
        ds.read_into(&mut fortran).unwrap();
        assert_eq!(fortran, arr2(&[[1, 2], [3, 4]]));
    }
}
