//! Multi-device fields
//!
//! A field stores `cardinality` values of type `T` for every active cell of a
//! [`BlockGrid`], one buffer per device. Ghost sectors are refreshed by halo
//! exchange, either directly or as a container inside an operation graph.

use super::halo::{HaloTable, TransferMode};
use super::layout::{FieldOptions, MemoryLayout};
use super::partition::{Partition, PartitionMut};
use crate::core_types::{BlockShape, Index3};
use crate::error::{GridError, GridResult};
use crate::grid::{BlockGrid, DataView};
use crate::index::DeviceIdx;
use crate::scheduler::{Container, FieldRef};
use num_traits::Float;
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Values a field can store
pub trait FieldValue: Copy + Send + Sync + fmt::Debug + PartialEq + 'static {}

impl<T> FieldValue for T where T: Copy + Send + Sync + fmt::Debug + PartialEq + 'static {}

static NEXT_FIELD_UID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique field identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldUid(u64);

impl FieldUid {
    fn next() -> Self {
        Self(NEXT_FIELD_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FieldUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Multi-component field over a block grid
pub struct Field<'g, T, S: BlockShape> {
    uid: FieldUid,
    name: String,
    grid: &'g BlockGrid<S>,
    cardinality: usize,
    layout: MemoryLayout,
    outside: T,
    memory: Vec<RwLock<Vec<T>>>,
    halo: HaloTable,
}

impl<'g, T: FieldValue, S: BlockShape> Field<'g, T, S> {
    /// Allocate a field with every value set to `outside`.
    ///
    /// # Arguments
    /// * `grid` - Grid providing the active cells and device partitions
    /// * `name` - Name used in logs and errors
    /// * `cardinality` - Components per cell (at least 1)
    /// * `outside` - Value returned for reads outside the domain
    /// * `options` - Memory layout
    pub fn new(
        grid: &'g BlockGrid<S>,
        name: impl Into<String>,
        cardinality: usize,
        outside: T,
        options: FieldOptions,
    ) -> GridResult<Self> {
        let name = name.into();
        if cardinality == 0 {
            return Err(GridError::incompatible(&name, "cardinality must be at least 1"));
        }
        let memory = grid
            .partitions()
            .iter()
            .map(|p| RwLock::new(vec![outside; p.num_blocks() * S::VOLUME * cardinality]))
            .collect();
        let halo = HaloTable::build(grid, options.layout, cardinality, std::mem::size_of::<T>())?;
        let uid = FieldUid::next();
        debug!(
            field = %name,
            uid = %uid,
            cardinality,
            layout = ?options.layout,
            transfers = halo.len(TransferMode::Put),
            "field allocated"
        );
        Ok(Self {
            uid,
            name,
            grid,
            cardinality,
            layout: options.layout,
            outside,
            memory,
            halo,
        })
    }

    pub fn uid(&self) -> FieldUid {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> &'g BlockGrid<S> {
        self.grid
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn layout(&self) -> MemoryLayout {
        self.layout
    }

    pub fn outside(&self) -> T {
        self.outside
    }

    pub fn devices(&self) -> usize {
        self.memory.len()
    }

    pub fn halo_table(&self) -> &HaloTable {
        &self.halo
    }

    fn busy(&self, device: DeviceIdx) -> GridError {
        GridError::FieldBusy {
            field: self.name.clone(),
            device,
        }
    }

    /// Read view of one device partition
    pub fn partition(&self, device: DeviceIdx) -> GridResult<Partition<'_, T, S>> {
        let data = self.memory[device]
            .try_read()
            .ok_or_else(|| self.busy(device))?;
        Ok(Partition::new(
            data,
            self.grid.partition(device),
            self.cardinality,
            self.layout,
            self.outside,
            device,
        ))
    }

    /// Exclusive view of one device partition
    pub fn partition_mut(&self, device: DeviceIdx) -> GridResult<PartitionMut<'_, T, S>> {
        let data = self.memory[device]
            .try_write()
            .ok_or_else(|| self.busy(device))?;
        Ok(PartitionMut::new(
            data,
            self.grid.partition(device),
            self.cardinality,
            self.layout,
            device,
        ))
    }

    fn check_component(&self, comp: usize) -> GridResult<()> {
        if comp >= self.cardinality {
            return Err(GridError::ComponentOutOfRange {
                field: self.name.clone(),
                component: comp,
                cardinality: self.cardinality,
            });
        }
        Ok(())
    }

    /// Host read of an owned cell by global coordinate
    pub fn get(&self, global: &Index3, comp: usize) -> GridResult<T> {
        self.check_component(comp)?;
        let (device, cell) = self.grid.locate(global).ok_or_else(|| GridError::InactiveCell {
            field: self.name.clone(),
            index: *global,
        })?;
        Ok(self.partition(device)?.get(&cell, comp))
    }

    /// Host write of an owned cell. Ghost copies are refreshed by the next
    /// halo update.
    pub fn set(&self, global: &Index3, comp: usize, value: T) -> GridResult<()> {
        self.check_component(comp)?;
        let (device, cell) = self.grid.locate(global).ok_or_else(|| GridError::InactiveCell {
            field: self.name.clone(),
            index: *global,
        })?;
        self.partition_mut(device)?.set(&cell, comp, value);
        Ok(())
    }

    /// Set every value, ghost copies included
    pub fn fill(&self, value: T) -> GridResult<()> {
        for device in 0..self.devices() {
            let mut data = self.memory[device]
                .try_write()
                .ok_or_else(|| self.busy(device))?;
            data.fill(value);
        }
        Ok(())
    }

    /// Initialise every active cell (ghost copies included) from its global
    /// coordinate and component.
    pub fn init_with<F>(&self, init: F) -> GridResult<()>
    where
        F: Fn(&Index3, usize) -> T + Sync + Send,
    {
        let card = self.cardinality;
        for device in 0..self.devices() {
            let index = self.grid.partition(device);
            let mut part = self.partition_mut(device)?;
            part.for_each_local_cell(|cell, out| {
                let global = index.global_index(&cell);
                for comp in 0..card {
                    out.set(comp, init(&global, comp));
                }
            });
        }
        Ok(())
    }

    /// Visit every owned active cell on the host, devices in order
    pub fn for_each_active<F>(&self, mut visit: F) -> GridResult<()>
    where
        F: FnMut(&Index3, &[T]),
    {
        let mut values = Vec::with_capacity(self.cardinality);
        for device in 0..self.devices() {
            let part = self.partition(device)?;
            let index = part.index();
            for cell in index.view_cells(DataView::Standard) {
                values.clear();
                values.extend((0..self.cardinality).map(|comp| part.get(&cell, comp)));
                visit(&index.global_index(&cell), &values);
            }
        }
        Ok(())
    }

    /// Run the halo exchange immediately, transfers in device order
    pub fn update_halo(&self, mode: TransferMode) -> GridResult<()> {
        let elem = std::mem::size_of::<T>();
        for transfer in self.halo.transfers(mode) {
            let src = self.memory[transfer.src.device]
                .try_read()
                .ok_or_else(|| self.busy(transfer.src.device))?;
            let mut dst = self.memory[transfer.dst.device]
                .try_write()
                .ok_or_else(|| self.busy(transfer.dst.device))?;
            let count = transfer.bytes / elem;
            let s = transfer.src.offset / elem;
            let d = transfer.dst.offset / elem;
            dst[d..d + count].copy_from_slice(&src[s..s + count]);
        }
        trace!(field = %self.name, mode = ?mode, "halo exchanged");
        Ok(())
    }

    /// Halo exchange as a schedulable container (transfer plus barrier)
    pub fn new_halo_update(&self, mode: TransferMode) -> Container<'_> {
        Container::halo_update(self, mode)
    }

    fn check_compatible(&self, other: &Field<'_, T, S>) -> GridResult<()> {
        if !std::ptr::eq(self.grid, other.grid) || self.cardinality != other.cardinality {
            return Err(GridError::incompatible(
                &self.name,
                format!("'{}' lives on another grid or has another cardinality", other.name),
            ));
        }
        Ok(())
    }
}

impl<T: FieldValue + Float, S: BlockShape> Field<'_, T, S> {
    /// Dot product over the owned cells of a view, all components
    pub fn dot(&self, other: &Field<'_, T, S>, view: DataView) -> GridResult<T> {
        if view != DataView::Standard && self.devices() > 1 {
            return Err(GridError::UnsupportedDataView {
                operation: "dot",
                view: view.to_string(),
                devices: self.devices(),
            });
        }
        self.check_compatible(other)?;

        let card = self.cardinality;
        let mut total = T::zero();
        for device in 0..self.devices() {
            let a = self.partition(device)?;
            let b = other.partition(device)?;
            let index = a.index();
            let blocks: Vec<u32> = index.sectors().view_ranges(view).into_iter().flatten().collect();
            let partial = blocks
                .into_par_iter()
                .map(|block| {
                    let mut sum = T::zero();
                    for cell in index.active_cells(block) {
                        for comp in 0..card {
                            sum = sum + a.get(&cell, comp) * b.get(&cell, comp);
                        }
                    }
                    sum
                })
                .reduce(T::zero, |x, y| x + y);
            total = total + partial;
        }
        Ok(total)
    }

    /// Euclidean norm over the owned cells of a view
    pub fn norm2(&self, view: DataView) -> GridResult<T> {
        Ok(self.dot(self, view)?.sqrt())
    }
}

impl<T: FieldValue, S: BlockShape> FieldRef for Field<'_, T, S> {
    fn uid(&self) -> FieldUid {
        self.uid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn devices(&self) -> usize {
        self.memory.len()
    }

    fn run_halo(&self, mode: TransferMode) -> GridResult<()> {
        self.update_halo(mode)
    }
}

impl<T, S: BlockShape> fmt::Debug for Field<'_, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("layout", &self.layout)
            .field("devices", &self.memory.len())
            .finish_non_exhaustive()
    }
}
