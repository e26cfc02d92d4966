//! Dataspace descriptors: the n-dimensional extent of a dataset or attribute.

/// Marker for an unlimited maximum dimension.
pub const UNLIMITED: u64 = u64::MAX;

/// Type of dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// Scalar (single element).
    Scalar,
    /// Simple (N-dimensional array).
    Simple,
    /// Null (no data).
    Null,
}

/// Dataspace: current and maximum extents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    /// The type of this dataspace.
    pub space_type: DataspaceType,
    /// Current dimension sizes.
    pub dimensions: Vec<u64>,
    /// Maximum dimension sizes, if present. [`UNLIMITED`] means unlimited.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    /// A scalar dataspace holding exactly one element.
    pub fn scalar() -> Self {
        Self {
            space_type: DataspaceType::Scalar,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    /// A null dataspace holding no elements.
    pub fn null() -> Self {
        Self {
            space_type: DataspaceType::Null,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    /// A simple dataspace with fixed extents. An empty `dims` yields a scalar.
    pub fn simple(dims: &[u64]) -> Self {
        if dims.is_empty() {
            return Self::scalar();
        }
        Self {
            space_type: DataspaceType::Simple,
            dimensions: dims.to_vec(),
            max_dimensions: None,
        }
    }

    /// Set maximum extents (use [`UNLIMITED`] for growable dimensions).
    pub fn with_max_dims(mut self, max_dims: &[u64]) -> Self {
        self.max_dimensions = Some(max_dims.to_vec());
        self
    }

    /// Number of dimensions (0 for scalar and null).
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Total number of elements.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self
                .dimensions
                .iter()
                .fold(1u64, |n, &d| n.saturating_mul(d)),
        }
    }

    /// Total number of elements, or `None` when the extents are too large
    /// to address. Zero extents do not hide an overflow of the others.
    pub fn checked_num_elements(&self) -> Option<u64> {
        match self.space_type {
            DataspaceType::Null => Some(0),
            DataspaceType::Scalar => Some(1),
            DataspaceType::Simple => {
                let mut count = 1u64;
                let mut span = 1u64;
                for &d in &self.dimensions {
                    count = count.checked_mul(d)?;
                    span = span.checked_mul(d.max(1))?;
                }
                Some(count)
            }
        }
    }

    /// Bytes needed to hold every element at `elem_size` bytes each.
    pub fn byte_len(&self, elem_size: u32) -> Option<usize> {
        let bytes = self.checked_num_elements()?.checked_mul(u64::from(elem_size))?;
        usize::try_from(bytes).ok().filter(|&n| n <= isize::MAX as usize)
    }

    /// Maximum extents, defaulting to the current extents.
    pub fn max_dims(&self) -> &[u64] {
        self.max_dimensions.as_deref().unwrap_or(&self.dimensions)
    }

    /// Whether any dimension may grow beyond its current extent.
    pub fn is_extendible(&self) -> bool {
        self.max_dims()
            .iter()
            .zip(&self.dimensions)
            .any(|(&max, &cur)| max == UNLIMITED || max > cur)
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<u64> {
        let mut strides = vec![1u64; self.dimensions.len()];
        for i in (0..self.dimensions.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1].saturating_mul(self.dimensions[i + 1]);
        }
        strides
    }

    /// Check that current extents respect rank and maximum extents.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = &self.max_dimensions {
            if max.len() != self.dimensions.len() {
                return Err(format!(
                    "max dims rank {} differs from rank {}",
                    max.len(),
                    self.dimensions.len()
                ));
            }
            for (i, (&cur, &m)) in self.dimensions.iter().zip(max).enumerate() {
                if m != UNLIMITED && cur > m {
                    return Err(format!("dimension {i}: extent {cur} exceeds maximum {m}"));
                }
            }
        }
        if self.checked_num_elements().is_none() {
            return Err(format!("extents {:?} overflow the element count", self.dimensions));
        }
        Ok(())
    }

    /// Replace the current extents, checking them against the maximum.
    pub fn set_extent(&mut self, dims: &[u64]) -> Result<(), String> {
        if dims.len() != self.dimensions.len() {
            return Err(format!(
                "cannot change rank from {} to {}",
                self.dimensions.len(),
                dims.len()
            ));
        }
        let max = self.max_dims().to_vec();
        for (i, (&new, &m)) in dims.iter().zip(&max).enumerate() {
            if m != UNLIMITED && new > m {
                return Err(format!("dimension {i}: extent {new} exceeds maximum {m}"));
            }
        }
        let resized = Self {
            dimensions: dims.to_vec(),
            ..self.clone()
        };
        if resized.checked_num_elements().is_none() {
            return Err(format!("extents {dims:?} overflow the element count"));
        }
        if self.max_dimensions.is_none() {
            self.max_dimensions = Some(max);
        }
        self.dimensions = dims.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_counts() {
        assert_eq!(Dataspace::scalar().num_elements(), 1);
        assert_eq!(Dataspace::null().num_elements(), 0);
        assert_eq!(Dataspace::simple(&[2, 3, 4]).num_elements(), 24);
        assert_eq!(Dataspace::simple(&[0, 5]).num_elements(), 0);
        assert_eq!(Dataspace::simple(&[]).space_type, DataspaceType::Scalar);
    }

    #[test]
    fn strides_row_major() {
        assert_eq!(Dataspace::simple(&[2, 3, 4]).strides(), vec![12, 4, 1]);
        assert!(Dataspace::scalar().strides().is_empty());
    }

    #[test]
    fn extent_limits() {
        let mut space = Dataspace::simple(&[2, 3]).with_max_dims(&[UNLIMITED, 3]);
        assert!(space.is_extendible());
        space.set_extent(&[10, 3]).unwrap();
        assert_eq!(space.dimensions, vec![10, 3]);
        assert!(space.set_extent(&[10, 4]).is_err());
        assert!(space.set_extent(&[10]).is_err());
        assert!(!Dataspace::simple(&[2]).is_extendible());
    }

    #[test]
    fn validate_max_dims() {
        assert!(Dataspace::simple(&[5]).with_max_dims(&[4]).validate().is_err());
        assert!(Dataspace::simple(&[5]).with_max_dims(&[5, 1]).validate().is_err());
        assert!(Dataspace::simple(&[5]).with_max_dims(&[UNLIMITED]).validate().is_ok());
    }

    #[test]
    fn overflowing_extents_are_invalid() {
        let huge = Dataspace::simple(&[1 << 62, 8]);
        assert_eq!(huge.checked_num_elements(), None);
        assert_eq!(huge.num_elements(), u64::MAX);
        assert!(huge.validate().is_err());
        // an empty dimension must not mask the others
        assert!(Dataspace::simple(&[0, 1 << 40, 1 << 40]).validate().is_err());
        assert_eq!(Dataspace::simple(&[1 << 61]).byte_len(8), None);
        assert_eq!(Dataspace::simple(&[3, 4]).byte_len(2), Some(24));

        let mut space = Dataspace::simple(&[1, 1]).with_max_dims(&[UNLIMITED, UNLIMITED]);
        assert!(space.set_extent(&[u64::MAX, 2]).is_err());
        assert_eq!(space.dimensions, vec![1, 1]);
    }
}
