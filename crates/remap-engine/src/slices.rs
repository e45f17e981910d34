//! Partitioning of N-dimensional index domains into chunk-aligned regions.

use std::ops::Range;

use crate::error::{RemapError, Result};

/// A half-open index range per axis.
pub type Region = Vec<Range<u64>>;

/// The region covering a whole array of the given shape.
pub fn whole_domain(shape: &[u64]) -> Region {
    shape.iter().map(|&s| 0..s).collect()
}

/// Number of elements in a region.
pub fn region_len(region: &[Range<u64>]) -> u64 {
    region.iter().map(|r| r.end.saturating_sub(r.start)).product()
}

/// Shape of a region.
pub fn region_shape(region: &[Range<u64>]) -> Vec<u64> {
    region.iter().map(|r| r.end.saturating_sub(r.start)).collect()
}

/// Elementwise maximum of several chunk grids of equal rank.
pub fn tuple_max(grids: &[&[u64]]) -> Result<Vec<u64>> {
    let Some(first) = grids.first() else {
        return Ok(vec![]);
    };
    if let Some(bad) = grids.iter().find(|g| g.len() != first.len()) {
        return Err(RemapError::RankMismatch(format!(
            "cannot combine chunk grids of rank {} and {}",
            first.len(),
            bad.len()
        )));
    }
    Ok((0..first.len())
        .map(|axis| grids.iter().map(|g| g[axis]).max().unwrap_or(1))
        .collect())
}

/// Round every axis of `grid` up to a multiple of `align` on that axis.
///
/// Used so that concurrently executed units never share an output chunk.
pub fn align_up(grid: &[u64], align: &[u64]) -> Result<Vec<u64>> {
    if grid.len() != align.len() {
        return Err(RemapError::RankMismatch(format!(
            "cannot align grid of rank {} to rank {}",
            grid.len(),
            align.len()
        )));
    }
    Ok(grid
        .iter()
        .zip(align)
        .map(|(&g, &a)| {
            let a = a.max(1);
            g.div_ceil(a) * a
        })
        .collect())
}

/// Iterate over `domain` in steps of `grid`, first axis outermost.
///
/// Fails if the ranks differ or any step is zero.
pub fn iter_slices(domain: &[Range<u64>], grid: &[u64]) -> Result<SliceIter> {
    if domain.len() != grid.len() {
        return Err(RemapError::RankMismatch(format!(
            "domain has rank {} but chunk grid has rank {}",
            domain.len(),
            grid.len()
        )));
    }
    if grid.contains(&0) {
        return Err(RemapError::config(format!(
            "chunk grid {grid:?} contains a zero step"
        )));
    }
    Ok(SliceIter::new(domain.to_vec(), grid.to_vec()))
}

/// Lazy, restartable walk over the regions of a domain.
///
/// The sequence is a proper partition: regions do not overlap and their
/// union is the domain. The last region on each axis is clipped to the
/// domain bound.
#[derive(Debug, Clone)]
pub struct SliceIter {
    domain: Region,
    grid: Vec<u64>,
    /// Start index of the next region per axis; `None` once exhausted.
    cursor: Option<Vec<u64>>,
}

impl SliceIter {
    fn new(domain: Region, grid: Vec<u64>) -> Self {
        let empty = domain.iter().any(|r| r.start >= r.end);
        let cursor = if empty {
            None
        } else {
            Some(domain.iter().map(|r| r.start).collect())
        };
        Self {
            domain,
            grid,
            cursor,
        }
    }

    /// Number of regions the full walk produces.
    pub fn total(&self) -> u64 {
        self.domain
            .iter()
            .zip(&self.grid)
            .map(|(r, &g)| r.end.saturating_sub(r.start).div_ceil(g))
            .product()
    }
}

impl Iterator for SliceIter {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        let cursor = self.cursor.as_mut()?;

        let region: Region = cursor
            .iter()
            .zip(&self.domain)
            .zip(&self.grid)
            .map(|((&start, bound), &step)| start..(start + step).min(bound.end))
            .collect();

        // Odometer advance, innermost axis first.
        let mut axis = cursor.len();
        loop {
            if axis == 0 {
                self.cursor = None;
                break;
            }
            axis -= 1;
            cursor[axis] += self.grid[axis];
            if cursor[axis] < self.domain[axis].end {
                break;
            }
            cursor[axis] = self.domain[axis].start;
        }

        Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_indices(domain: &[Range<u64>], regions: &[Region]) -> Vec<u32> {
        // Count how often each cell of a 2-D domain is covered.
        let h = (domain[0].end - domain[0].start) as usize;
        let w = (domain[1].end - domain[1].start) as usize;
        let mut counts = vec![0u32; h * w];
        for region in regions {
            for r in region[0].clone() {
                for c in region[1].clone() {
                    let idx = (r - domain[0].start) as usize * w + (c - domain[1].start) as usize;
                    counts[idx] += 1;
                }
            }
        }
        counts
    }

    #[test]
    fn test_uneven_one_dimensional() {
        let regions: Vec<Region> = iter_slices(&[0..10], &[4]).unwrap().collect();
        assert_eq!(regions, vec![vec![0..4], vec![4..8], vec![8..10]]);
    }

    #[test]
    fn test_axis_major_order() {
        let regions: Vec<Region> = iter_slices(&[0..4, 0..6], &[2, 3]).unwrap().collect();
        assert_eq!(
            regions,
            vec![
                vec![0..2, 0..3],
                vec![0..2, 3..6],
                vec![2..4, 0..3],
                vec![2..4, 3..6],
            ]
        );
    }

    #[test]
    fn test_partition_is_exact() {
        for (domain, grid) in [
            (vec![0..17, 0..9], vec![4, 2]),
            (vec![3..20, 5..6], vec![7, 1]),
            (vec![0..8, 0..8], vec![8, 8]),
            (vec![0..5, 0..31], vec![10, 3]),
        ] {
            let regions: Vec<Region> = iter_slices(&domain, &grid).unwrap().collect();
            let counts = covered_indices(&domain, &regions);
            assert!(counts.iter().all(|&c| c == 1), "{domain:?} / {grid:?}");
            for region in &regions {
                for (r, &g) in region.iter().zip(&grid) {
                    assert!(r.end - r.start <= g);
                }
            }
            let iter = iter_slices(&domain, &grid).unwrap();
            assert_eq!(iter.total(), regions.len() as u64);
        }
    }

    #[test]
    fn test_restartable() {
        let iter = iter_slices(&[0..9, 2..11, 0..3], &[2, 4, 3]).unwrap();
        let first: Vec<Region> = iter.clone().collect();
        let second: Vec<Region> = iter.collect();
        let third: Vec<Region> = iter_slices(&[0..9, 2..11, 0..3], &[2, 4, 3])
            .unwrap()
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_empty_and_scalar_domains() {
        assert_eq!(iter_slices(&[0..0, 0..5], &[1, 1]).unwrap().count(), 0);
        let scalar: Vec<Region> = iter_slices(&[], &[]).unwrap().collect();
        assert_eq!(scalar, vec![Vec::<Range<u64>>::new()]);
    }

    #[test]
    fn test_invalid_grids() {
        assert!(matches!(
            iter_slices(&[0..4], &[0]),
            Err(RemapError::ConfigError(_))
        ));
        assert!(matches!(
            iter_slices(&[0..4], &[1, 1]),
            Err(RemapError::RankMismatch(_))
        ));
    }

    #[test]
    fn test_tuple_max() {
        assert_eq!(
            tuple_max(&[&[24, 1, 4096], &[1, 5, 1024], &[6, 5, 16384]]).unwrap(),
            vec![24, 5, 16384]
        );
        assert!(tuple_max(&[&[1, 2], &[1, 2, 3]]).is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(&[6000, 5], &[4096, 5]).unwrap(), vec![8192, 5]);
        assert_eq!(align_up(&[4096], &[4096]).unwrap(), vec![4096]);
    }

    #[test]
    fn test_region_helpers() {
        let region = vec![2..5, 0..4];
        assert_eq!(region_len(&region), 12);
        assert_eq!(region_shape(&region), vec![3, 4]);
        assert_eq!(whole_domain(&[3, 7]), vec![0..3, 0..7]);
        assert_eq!(region_len(&[]), 1);
    }
}
