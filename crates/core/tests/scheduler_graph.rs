//! Dependency inference and execution order of operation graphs

use parking_lot::Mutex;
use stencil_sim_core::scheduler::{ContainerType, Dependency, Hazard};
use stencil_sim_core::{
    Access, Block2, BlockGrid, Container, DataView, Field, FieldOptions, GridConfig, GridError,
    Index3, OperationGraph, Pattern, Skeleton, SkeletonOptions, Stencil, TransferMode,
};

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn small_grid(devices: usize) -> BlockGrid<Block2> {
    BlockGrid::new(
        Index3::new(2, 2, 4 * devices as i32),
        Stencil::s7_laplace(),
        GridConfig::with_devices(devices),
        |_| true,
    )
    .unwrap()
}

/// Compute container that only records its name when it runs
fn recorder<'a>(
    name: &str,
    grid: &BlockGrid<Block2>,
    log: &'a Mutex<Vec<String>>,
    accesses: Vec<Access<'a>>,
) -> Container<'a> {
    let label = name.to_string();
    Container::compute(name, grid.launch(DataView::Standard), accesses, move |ctx| {
        if ctx.device == 0 {
            log.lock().push(label.clone());
        }
        Ok(())
    })
}

#[test]
fn test_hazards_inferred_from_accesses() {
    let grid = small_grid(1);
    let x: Field<'_, f32, Block2> = Field::new(&grid, "x", 1, 0.0, FieldOptions::default()).unwrap();
    let y: Field<'_, f32, Block2> = Field::new(&grid, "y", 1, 0.0, FieldOptions::default()).unwrap();
    let log = Mutex::new(Vec::new());

    let graph = OperationGraph::from_sequence(
        "hazards",
        vec![
            recorder("a", &grid, &log, vec![Access::write(&x)]),
            recorder("b", &grid, &log, vec![Access::read(&x, Pattern::Map), Access::write(&y)]),
            recorder("c", &grid, &log, vec![Access::read(&y, Pattern::Map)]),
            recorder("d", &grid, &log, vec![Access::write(&x)]),
        ],
    );

    assert_eq!(graph.dependency(0, 1), Some(Dependency::Data(Hazard::ReadAfterWrite)));
    assert_eq!(graph.dependency(1, 2), Some(Dependency::Data(Hazard::ReadAfterWrite)));
    assert_eq!(graph.dependency(0, 3), Some(Dependency::Data(Hazard::WriteAfterWrite)));
    assert_eq!(graph.dependency(1, 3), Some(Dependency::Data(Hazard::WriteAfterRead)));
    assert_eq!(graph.dependency(2, 3), None);
    assert_eq!(graph.edge_count(), 4);
}

#[test]
fn test_redundant_dependencies_removed_by_skeleton() {
    let grid = small_grid(1);
    let x: Field<'_, f32, Block2> = Field::new(&grid, "x", 1, 0.0, FieldOptions::default()).unwrap();
    let y: Field<'_, f32, Block2> = Field::new(&grid, "y", 1, 0.0, FieldOptions::default()).unwrap();
    let log = Mutex::new(Vec::new());

    let containers = vec![
        recorder("a", &grid, &log, vec![Access::write(&x)]),
        recorder("b", &grid, &log, vec![Access::read(&x, Pattern::Map), Access::write(&y)]),
        recorder("d", &grid, &log, vec![Access::write(&x)]),
    ];
    let skeleton = Skeleton::sequence("reduced", containers, SkeletonOptions::default()).unwrap();
    let graph = skeleton.graph();
    // a -> d is implied by a -> b -> d
    assert!(graph.dependency(0, 2).is_none());
    assert_eq!(graph.edge_count(), 2);

    skeleton.run().unwrap();
    assert_eq!(*log.lock(), ["a", "b", "d"]);
}

#[test]
fn test_independent_containers_run_in_program_order() {
    let grid = small_grid(1);
    let x: Field<'_, f32, Block2> = Field::new(&grid, "x", 1, 0.0, FieldOptions::default()).unwrap();
    let y: Field<'_, f32, Block2> = Field::new(&grid, "y", 1, 0.0, FieldOptions::default()).unwrap();
    let z: Field<'_, f32, Block2> = Field::new(&grid, "z", 1, 0.0, FieldOptions::default()).unwrap();
    let log = Mutex::new(Vec::new());

    let containers = vec![
        recorder("write_y", &grid, &log, vec![Access::write(&y)]),
        recorder("write_x", &grid, &log, vec![Access::write(&x)]),
        recorder("x_to_z", &grid, &log, vec![Access::read(&x, Pattern::Map), Access::write(&z)]),
        recorder("read_y", &grid, &log, vec![Access::read(&y, Pattern::Map)]),
    ];
    let skeleton = Skeleton::sequence("order", containers, SkeletonOptions::default()).unwrap();
    assert_eq!(skeleton.graph().sources(), vec![0, 1]);
    skeleton.run().unwrap();
    assert_eq!(*log.lock(), ["write_y", "write_x", "x_to_z", "read_y"]);
}

#[test]
fn test_cycle_is_rejected() {
    let grid = small_grid(1);
    let log = Mutex::new(Vec::new());
    let mut graph = OperationGraph::new("loop");
    let a = graph.add_node(recorder("a", &grid, &log, Vec::new()));
    let b = graph.add_node(recorder("b", &grid, &log, Vec::new()));
    graph.add_dependency(a, b, Dependency::Ordering).unwrap();
    graph.add_dependency(b, a, Dependency::Ordering).unwrap();

    assert!(matches!(graph.topological_order(), Err(GridError::CyclicDependency { .. })));
    assert!(matches!(Container::graph(graph), Err(GridError::CyclicDependency { .. })));
    assert!(log.lock().is_empty());
}

#[test]
fn test_nested_skeleton_is_flattened() {
    let grid = small_grid(2);
    let x: Field<'_, f64, Block2> = Field::new(&grid, "x", 1, 0.0, FieldOptions::default()).unwrap();
    let log = Mutex::new(Vec::new());

    let inner = Skeleton::sequence(
        "inner",
        vec![
            recorder("produce", &grid, &log, vec![Access::write(&x)]),
            recorder("smooth", &grid, &log, vec![Access::read(&x, Pattern::Stencil)]),
        ],
        SkeletonOptions::default(),
    )
    .unwrap();
    assert!(inner.graph().find("halo_transfer_x").is_some());

    let outer = Skeleton::sequence(
        "outer",
        vec![
            inner.into_container(),
            recorder("consume", &grid, &log, vec![Access::read(&x, Pattern::Map)]),
        ],
        SkeletonOptions::default(),
    )
    .unwrap();
    let graph = outer.graph();
    assert!(graph.is_flat());
    assert_eq!(graph.node_count(), 5);

    let order = graph.topological_order().unwrap();
    let names: Vec<&str> = order.iter().map(|&n| graph.node(n).name()).collect();
    let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
    assert!(position("produce") < position("halo_transfer_x"));
    assert!(position("halo_transfer_x") < position("halo_sync_x"));
    assert!(position("halo_sync_x") < position("smooth"));
    assert!(position("produce") < position("consume"));

    outer.run().unwrap();
    assert_eq!(log.lock().len(), 3);
}

#[test]
fn test_get_mode_barrier_precedes_transfer() {
    let grid = small_grid(2);
    let x: Field<'_, f64, Block2> = Field::new(&grid, "x", 1, 0.0, FieldOptions::default()).unwrap();
    let halo = x.new_halo_update(TransferMode::Get);
    assert_eq!(halo.container_type(), ContainerType::Graph);

    let graph = OperationGraph::from_sequence("halo", vec![halo]).flatten();
    let sync = graph.find("halo_sync_x").unwrap();
    let transfer = graph.find("halo_transfer_x").unwrap();
    assert_eq!(graph.dependency(sync, transfer), Some(Dependency::Ordering));
    assert_eq!(graph.node(transfer).container_type(), ContainerType::Transfer);
    graph.run().unwrap();
}

#[test]
fn test_conflicting_partition_locks_report_busy() {
    let grid = small_grid(1);
    let x: Field<'_, f64, Block2> = Field::new(&grid, "x", 1, 0.0, FieldOptions::default()).unwrap();

    // Reading and writing the same field in one body is a declaration bug
    let bad = Container::compute(
        "self_copy",
        grid.launch(DataView::Standard),
        vec![Access::read_write(&x, Pattern::Map)],
        |ctx| {
            let _read = x.partition(ctx.device)?;
            let _write = x.partition_mut(ctx.device)?;
            Ok(())
        },
    );
    assert!(matches!(bad.run(), Err(GridError::FieldBusy { device: 0, .. })));

    // Shared reads are fine
    let reads = x.partition(0).unwrap();
    let again = x.partition(0).unwrap();
    assert_eq!(reads.cardinality(), again.cardinality());
}

/// `a = 1; b = a + 1; a = b * 3; c = a + b` over every cell
fn arithmetic_chain<'a>(
    grid: &'a BlockGrid<Block2>,
    a: &'a Field<'a, f64, Block2>,
    b: &'a Field<'a, f64, Block2>,
    c: &'a Field<'a, f64, Block2>,
) -> Vec<Container<'a>> {
    let launch = grid.launch(DataView::Standard);
    vec![
        Container::compute("a_init", launch, vec![Access::write(a)], move |ctx| {
            a.partition_mut(ctx.device)?
                .for_each_cell(ctx.view, |_, out| out.set(0, 1.0));
            Ok(())
        }),
        Container::compute(
            "b_from_a",
            launch,
            vec![Access::read(a, Pattern::Map), Access::write(b)],
            move |ctx| {
                let pa = a.partition(ctx.device)?;
                b.partition_mut(ctx.device)?
                    .for_each_cell(ctx.view, |cell, out| out.set(0, pa.get(&cell, 0) + 1.0));
                Ok(())
            },
        ),
        Container::compute(
            "a_from_b",
            launch,
            vec![Access::read(b, Pattern::Map), Access::write(a)],
            move |ctx| {
                let pb = b.partition(ctx.device)?;
                a.partition_mut(ctx.device)?
                    .for_each_cell(ctx.view, |cell, out| out.set(0, pb.get(&cell, 0) * 3.0));
                Ok(())
            },
        ),
        Container::compute(
            "c_from_ab",
            launch,
            vec![
                Access::read(a, Pattern::Map),
                Access::read(b, Pattern::Map),
                Access::write(c),
            ],
            move |ctx| {
                let pa = a.partition(ctx.device)?;
                let pb = b.partition(ctx.device)?;
                c.partition_mut(ctx.device)?.for_each_cell(ctx.view, |cell, out| {
                    out.set(0, pa.get(&cell, 0) + pb.get(&cell, 0));
                });
                Ok(())
            },
        ),
    ]
}

#[test]
fn test_reduction_keeps_results() {
    let grid = small_grid(1);
    let mut results = Vec::new();
    for reduce in [false, true] {
        let a = Field::new(&grid, "a", 1, 0.0, FieldOptions::default()).unwrap();
        let b = Field::new(&grid, "b", 1, 0.0, FieldOptions::default()).unwrap();
        let c = Field::new(&grid, "c", 1, 0.0, FieldOptions::default()).unwrap();
        let options = SkeletonOptions {
            remove_redundant_dependencies: reduce,
            ..SkeletonOptions::default()
        };
        let skeleton =
            Skeleton::sequence("chain", arithmetic_chain(&grid, &a, &b, &c), options).unwrap();
        skeleton.run().unwrap();
        let mut values = Vec::new();
        c.for_each_active(|_, v| values.push(v[0])).unwrap();
        results.push((skeleton.graph().edge_count(), values));
    }

    let (full_edges, full) = &results[0];
    let (reduced_edges, reduced) = &results[1];
    assert!(reduced_edges < full_edges);
    assert_eq!(full, reduced);
    assert!(full.iter().all(|&v| v == 6.0 + 2.0));
}
