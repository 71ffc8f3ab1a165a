//! Fields over every level of a hierarchy

use super::hierarchy::MultiResGrid;
use super::lattice::Lattice;
use crate::core_types::{BlockShape, Index3};
use crate::error::GridResult;
use crate::field::{Field, FieldOptions, FieldValue};
use num_traits::Float;

/// One [`Field`] per level, sharing name, cardinality and layout
#[derive(Debug)]
pub struct MultiResField<'g, T, S: BlockShape> {
    name: String,
    levels: Vec<Field<'g, T, S>>,
}

impl<'g, T: FieldValue, S: BlockShape> MultiResField<'g, T, S> {
    /// Allocate a field on every level; level fields are named `name@level`
    pub fn new(
        grid: &'g MultiResGrid<S>,
        name: impl Into<String>,
        cardinality: usize,
        outside: T,
        options: FieldOptions,
    ) -> GridResult<Self> {
        let name = name.into();
        let levels = (0..grid.depth())
            .map(|level| {
                Field::new(
                    grid.level(level),
                    format!("{name}@{level}"),
                    cardinality,
                    outside,
                    options,
                )
            })
            .collect::<GridResult<Vec<_>>>()?;
        Ok(Self { name, levels })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn level(&self, level: usize) -> &Field<'g, T, S> {
        &self.levels[level]
    }

    pub fn cardinality(&self) -> usize {
        self.levels[0].cardinality()
    }

    pub fn get(&self, level: usize, global: &Index3, comp: usize) -> GridResult<T> {
        self.levels[level].get(global, comp)
    }

    pub fn set(&self, level: usize, global: &Index3, comp: usize, value: T) -> GridResult<()> {
        self.levels[level].set(global, comp, value)
    }

    pub fn fill(&self, value: T) -> GridResult<()> {
        self.levels.iter().try_for_each(|f| f.fill(value))
    }

    /// Initialise every level from `(level, global, comp)`
    pub fn init_with<F>(&self, init: F) -> GridResult<()>
    where
        F: Fn(usize, &Index3, usize) -> T + Sync + Send,
    {
        for (level, field) in self.levels.iter().enumerate() {
            field.init_with(|g, comp| init(level, g, comp))?;
        }
        Ok(())
    }
}

/// Auxiliary storage of the coarse-fine interface.
///
/// `accumulator` component 0 is the store cycle counter and components
/// `1..Q` the accumulated populations; `contributors` holds, per direction,
/// how many fine cells feed the slot (used by initial-store coalescence).
#[derive(Debug)]
pub struct StoreBuffer<'g, T, S: BlockShape> {
    pub accumulator: MultiResField<'g, T, S>,
    pub contributors: MultiResField<'g, T, S>,
}

impl<'g, T: FieldValue + Float, S: BlockShape> StoreBuffer<'g, T, S> {
    pub fn new(grid: &'g MultiResGrid<S>, lattice: &Lattice, name: &str) -> GridResult<Self> {
        Ok(Self {
            accumulator: MultiResField::new(
                grid,
                format!("{name}_accumulator"),
                lattice.q(),
                T::zero(),
                FieldOptions::default(),
            )?,
            contributors: MultiResField::new(
                grid,
                format!("{name}_contributors"),
                lattice.q(),
                T::zero(),
                FieldOptions::default(),
            )?,
        })
    }
}
