//! Coarse-fine interface protocol on small hierarchies
//!
//! Two-level cases check the store/coalesce/explode arithmetic on a single
//! interface; the three-level chain runs a full recursive step and checks
//! that a uniform state is preserved for every fusion and coalescence mode.

use approx::assert_abs_diff_eq;
use stencil_sim_core::{
    Access, Block4, CoalescenceMode, Container, DataView, FieldOptions, GridConfig, GridError,
    GridResult, Index3, Lattice, MultiResDescriptor, MultiResField, MultiResGrid,
    MultiResProtocol, MultiResStep, SkeletonOptions, StoreBuffer, StreamFusion,
};

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const Q: usize = 19;
const UNSET: f64 = -7.0;

/// Level 0 is `(16, 2, 2)` and active for `x >= 8`; level 1 is `(8, 1, 1)`
/// and fully active, so coarse cells `x = 4..8` are refined and the
/// interface sits between coarse cells 3 and 4.
fn two_level() -> MultiResGrid<Block4> {
    MultiResGrid::new(
        Index3::new(16, 2, 2),
        MultiResDescriptor::new(2, 2),
        Lattice::D3Q19.stencil(),
        GridConfig::default(),
        |level, g| level == 1 || g.x >= 8,
    )
    .unwrap()
}

struct Fields<'g> {
    fout: MultiResField<'g, f64, Block4>,
    fin: MultiResField<'g, f64, Block4>,
    buffer: StoreBuffer<'g, f64, Block4>,
}

fn fields(grid: &MultiResGrid<Block4>) -> Fields<'_> {
    let fields = Fields {
        fout: MultiResField::new(grid, "fout", Q, 0.0, FieldOptions::default()).unwrap(),
        fin: MultiResField::new(grid, "fin", Q, 0.0, FieldOptions::default()).unwrap(),
        buffer: StoreBuffer::new(grid, &Lattice::D3Q19, "store").unwrap(),
    };
    fields.fin.fill(UNSET).unwrap();
    fields
}

fn protocol<'a>(
    grid: &'a MultiResGrid<Block4>,
    f: &'a Fields<'a>,
    mode: CoalescenceMode,
) -> MultiResProtocol<'a, f64, Block4> {
    MultiResProtocol {
        grid,
        lattice: &Lattice::D3Q19,
        fout: &f.fout,
        fin: &f.fin,
        buffer: &f.buffer,
        mode,
    }
}

/// Fine populations leaving towards the coarse side (direction 2, -x) vary
/// over the four interface children; `shift` changes them between sub-steps.
fn init_fine_outflow(f: &Fields<'_>, shift: f64) {
    f.fout
        .init_with(|level, g, q| {
            if level == 0 && q == 2 {
                f64::from(g.y * 2 + g.z + 1) + shift
            } else {
                0.0
            }
        })
        .unwrap();
}

#[test]
fn test_hierarchy_closure() {
    let grid = two_level();
    assert_eq!(grid.active_count(0), 8 * 2 * 2);
    assert_eq!(grid.active_count(1), 8);
    assert_eq!(grid.refined_count(1), 4);
    assert_eq!(grid.refined_count(0), 0);

    let index = grid.index(1);
    let refined = index.locate(&Index3::new(4, 0, 0)).unwrap();
    let plain = index.locate(&Index3::new(3, 0, 0)).unwrap();
    assert!(grid.has_children(1, &refined));
    assert!(!grid.has_children(1, &plain));
    assert!(grid.has_children_dir(1, &plain, &Index3::new(1, 0, 0)));
}

#[test]
fn test_store_then_coalesce_averages_over_substeps() {
    let grid = two_level();
    let f = fields(&grid);
    let p = protocol(&grid, &f, CoalescenceMode::Averaging);

    init_fine_outflow(&f, 0.0);
    p.store(1).unwrap().run().unwrap();
    assert_abs_diff_eq!(
        f.buffer.accumulator.get(1, &Index3::new(4, 0, 0), 2).unwrap(),
        2.5,
        epsilon = 1e-12
    );
    // Counter advanced to the second sub-step
    assert_eq!(f.buffer.accumulator.get(1, &Index3::new(4, 0, 0), 0).unwrap(), 1.0);

    init_fine_outflow(&f, 2.0);
    p.store(1).unwrap().run().unwrap();
    assert_abs_diff_eq!(
        f.buffer.accumulator.get(1, &Index3::new(4, 0, 0), 2).unwrap(),
        2.5 + 4.5,
        epsilon = 1e-12
    );
    assert_eq!(f.buffer.accumulator.get(1, &Index3::new(4, 0, 0), 0).unwrap(), 0.0);

    p.coalesce(1).unwrap().run().unwrap();
    assert_abs_diff_eq!(f.fin.get(1, &Index3::new(3, 0, 0), 2).unwrap(), 3.5, epsilon = 1e-12);
    // Cells away from the interface are untouched
    assert_eq!(f.fin.get(1, &Index3::new(2, 0, 0), 2).unwrap(), UNSET);
    assert_eq!(f.fin.get(1, &Index3::new(3, 0, 0), 1).unwrap(), UNSET);
}

#[test]
fn test_initial_store_matches_averaging() {
    let grid = two_level();
    let f = fields(&grid);
    let p = protocol(&grid, &f, CoalescenceMode::InitialStore);

    p.sum_store(1).unwrap().run().unwrap();
    assert_eq!(f.buffer.contributors.get(1, &Index3::new(4, 0, 0), 2).unwrap(), 4.0);
    assert_eq!(f.buffer.contributors.get(1, &Index3::new(5, 0, 0), 2).unwrap(), 0.0);

    init_fine_outflow(&f, 0.0);
    p.store(1).unwrap().run().unwrap();
    init_fine_outflow(&f, 2.0);
    p.store(1).unwrap().run().unwrap();
    assert_abs_diff_eq!(
        f.buffer.accumulator.get(1, &Index3::new(4, 0, 0), 2).unwrap(),
        10.0 + 18.0,
        epsilon = 1e-12
    );

    p.coalesce(1).unwrap().run().unwrap();
    assert_abs_diff_eq!(f.fin.get(1, &Index3::new(3, 0, 0), 2).unwrap(), 3.5, epsilon = 1e-12);
}

#[test]
#[should_panic(expected = "zero contributor count")]
fn test_initial_store_without_counts_panics() {
    let grid = two_level();
    let f = fields(&grid);
    let p = protocol(&grid, &f, CoalescenceMode::InitialStore);

    init_fine_outflow(&f, 0.0);
    p.store(1).unwrap().run().unwrap();
    p.store(1).unwrap().run().unwrap();
    let _ = p.coalesce(1).unwrap().run();
}

#[test]
fn test_explode_reads_uncle() {
    let grid = two_level();
    let f = fields(&grid);
    let p = protocol(&grid, &f, CoalescenceMode::Averaging);
    f.fout
        .init_with(|level, g, q| if level == 1 { f64::from(100 * g.x) + q as f64 } else { 0.0 })
        .unwrap();

    p.explode(0).unwrap().run().unwrap();

    // +x population of the first fine column comes from coarse cell 3
    for (y, z) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        assert_eq!(f.fin.get(0, &Index3::new(8, y, z), 1).unwrap(), 301.0);
    }
    // Diagonal (1, 1, 0): the uncle of (8, 1, 0) is still coarse cell 3 ...
    assert_eq!(f.fin.get(0, &Index3::new(8, 1, 0), 7).unwrap(), 307.0);
    // ... but for (8, 0, 0) it lies outside the coarse domain
    assert_eq!(f.fin.get(0, &Index3::new(8, 0, 0), 7).unwrap(), UNSET);
    // Fine cells with a fine upstream neighbor are left to stream
    assert_eq!(f.fin.get(0, &Index3::new(9, 0, 0), 1).unwrap(), UNSET);
}

#[test]
fn test_stream_skips_refined_neighbors() {
    let grid = two_level();
    let f = fields(&grid);
    let p = protocol(&grid, &f, CoalescenceMode::Averaging);
    f.fout
        .init_with(|level, g, q| if level == 1 { f64::from(100 * g.x) + q as f64 } else { 0.0 })
        .unwrap();

    p.stream(1).unwrap().run().unwrap();

    assert_eq!(f.fin.get(1, &Index3::new(3, 0, 0), 0).unwrap(), 300.0);
    assert_eq!(f.fin.get(1, &Index3::new(3, 0, 0), 1).unwrap(), 201.0);
    // Upstream of direction 2 is refined: left for coalescence
    assert_eq!(f.fin.get(1, &Index3::new(3, 0, 0), 2).unwrap(), UNSET);
    // Refined cells are never streamed
    assert_eq!(f.fin.get(1, &Index3::new(5, 0, 0), 1).unwrap(), UNSET);
}

#[test]
fn test_protocol_rejects_missing_levels() {
    let grid = two_level();
    let f = fields(&grid);
    let p = protocol(&grid, &f, CoalescenceMode::Averaging);

    assert!(matches!(p.store(0), Err(GridError::Protocol { level: 0, .. })));
    assert!(matches!(p.coalesce(0), Err(GridError::Protocol { .. })));
    assert!(matches!(p.explode(1), Err(GridError::Protocol { level: 1, .. })));
    assert!(matches!(p.stream(2), Err(GridError::Protocol { .. })));
    assert!(p.stream_fused_explosion(1).is_ok());
    assert!(p.stream_fused_coalescence(0).is_ok());
}

#[test]
fn test_multires_rejects_several_devices() {
    let result = MultiResGrid::<Block4>::new(
        Index3::new(16, 16, 16),
        MultiResDescriptor::default(),
        Lattice::D3Q19.stencil(),
        GridConfig::with_devices(2),
        |_, _| true,
    );
    assert!(matches!(result, Err(GridError::Unsupported(_))));
}

/// Level 0 active for `x >= 24`, level 1 for `x >= 8`, level 2 everywhere
fn three_level() -> MultiResGrid<Block4> {
    MultiResGrid::new(
        Index3::new(32, 4, 4),
        MultiResDescriptor::new(3, 2),
        Lattice::D3Q19.stencil(),
        GridConfig::default(),
        |level, g| match level {
            0 => g.x >= 24,
            1 => g.x >= 8,
            _ => true,
        },
    )
    .unwrap()
}

/// Collision that writes `value` into every population of unrefined cells
fn constant_collide<'a>(
    grid: &'a MultiResGrid<Block4>,
    f: &'a Fields<'a>,
    value: f64,
) -> impl Fn(usize) -> GridResult<Container<'a>> {
    move |level| {
        let dst = f.fout.level(level);
        Ok(Container::compute(
            format!("collide_{level}"),
            grid.level(level).launch(DataView::Standard),
            vec![Access::write(dst)],
            move |ctx| {
                let mut pout = dst.partition_mut(ctx.device)?;
                pout.for_each_cell(ctx.view, |cell, out| {
                    if grid.has_children(level, &cell) {
                        return;
                    }
                    for q in 0..Q {
                        out.set(q, value);
                    }
                });
                Ok(())
            },
        ))
    }
}

/// 1D chain of 8 coarse cells: level 2 is `(8, 1, 1)` and fully active,
/// level 1 is active for `x >= 8` and level 0 for `x >= 24`, so both
/// coarse-fine interfaces face in the +x direction.
fn chain() -> MultiResGrid<Block4> {
    MultiResGrid::new(
        Index3::new(32, 1, 1),
        MultiResDescriptor::new(3, 2),
        Lattice::D3Q19.stencil(),
        GridConfig::default(),
        |level, g| match level {
            0 => g.x >= 24,
            1 => g.x >= 8,
            _ => true,
        },
    )
    .unwrap()
}

/// Starts from `fin = UNSET`, so every x population read back after one
/// step was written by stream, explode or coalesce.
fn uniform_state_is_preserved(fusion: StreamFusion, mode: CoalescenceMode) {
    let grid = chain();
    assert_eq!(grid.active_count(2), 8);
    let f = fields(&grid);
    f.fout.fill(1.0).unwrap();

    let step = MultiResStep::new(protocol(&grid, &f, mode), fusion);
    for container in step.setup().unwrap() {
        container.run().unwrap();
    }
    let skeleton = step
        .skeleton("lbm", constant_collide(&grid, &f, 1.0), SkeletonOptions::default())
        .unwrap();
    skeleton.run().unwrap();
    assert_eq!(skeleton.timer().runs(), 1);

    let lattice = Lattice::D3Q19;
    let mut checked = 0;
    let mut wrong = Vec::new();
    for level in 0..grid.depth() {
        let part = f.fin.level(level).partition(0).unwrap();
        let index = grid.index(level);
        let dim = grid.level(level).dim();
        for block in 0..index.num_blocks() as u32 {
            for cell in index.active_cells(block) {
                if grid.has_children(level, &cell) {
                    continue;
                }
                let g = index.global_index(&cell);
                for q in [1, 2] {
                    let upstream = g - lattice.dir(q);
                    if upstream.x < 0 || upstream.x >= dim.x {
                        continue;
                    }
                    checked += 1;
                    let value = part.get(&cell, q);
                    if (value - 1.0).abs() > 1e-12 {
                        wrong.push((level, g.x, q, value));
                    }
                }
            }
        }
    }
    assert!(wrong.is_empty(), "{fusion:?}/{mode:?}: {wrong:?}");
    // Level 0: 8 cells less the +x domain edge; level 1: 4 cells; level 2: 4 cells less x = 0
    assert_eq!(checked, 15 + 8 + 7);
}

#[test]
fn test_uniform_state_no_fusion() {
    uniform_state_is_preserved(StreamFusion::None, CoalescenceMode::Averaging);
}

#[test]
fn test_uniform_state_fused_explosion() {
    uniform_state_is_preserved(StreamFusion::Explosion, CoalescenceMode::Averaging);
}

#[test]
fn test_uniform_state_fused_coalescence() {
    uniform_state_is_preserved(StreamFusion::Coalescence, CoalescenceMode::Averaging);
}

#[test]
fn test_uniform_state_initial_store() {
    uniform_state_is_preserved(StreamFusion::None, CoalescenceMode::InitialStore);
}

#[test]
fn test_uniform_state_initial_store_fused_explosion() {
    uniform_state_is_preserved(StreamFusion::Explosion, CoalescenceMode::InitialStore);
}

#[test]
fn test_uniform_state_initial_store_fused_coalescence() {
    uniform_state_is_preserved(StreamFusion::Coalescence, CoalescenceMode::InitialStore);
}

#[test]
fn test_step_container_counts() {
    let grid = three_level();
    let f = fields(&grid);
    let count = |fusion| {
        MultiResStep::new(protocol(&grid, &f, CoalescenceMode::Averaging), fusion)
            .containers(constant_collide(&grid, &f, 1.0))
            .unwrap()
            .len()
    };
    assert_eq!(count(StreamFusion::None), 29);
    assert_eq!(count(StreamFusion::Explosion), 23);
    assert_eq!(count(StreamFusion::Coalescence), 26);

    let setup = MultiResStep::new(protocol(&grid, &f, CoalescenceMode::InitialStore), StreamFusion::None)
        .setup()
        .unwrap();
    assert_eq!(setup.len(), 2);
}
