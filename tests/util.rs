#![allow(dead_code)]
use halo_da::{
    algs::communicator::RayonComm,
    da::{
        DistributedArray,
        options::{DaOptions, PartitionKind},
    },
    data::grid::{GridSpec, Periodicity},
};

/// Run `f` once per rank of a fresh `size`-rank threaded world and collect the
/// results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(RayonComm) -> T + Sync,
{
    let world = RayonComm::world(size);
    std::thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

pub fn spec(m: usize, w: usize, s: usize, periodicity: Periodicity) -> GridSpec {
    GridSpec::new(m, w, s, periodicity).unwrap()
}

/// Create a distributed array with default options on every rank of `size`
/// and run `f` on each.
pub fn with_arrays<T, F>(size: usize, grid: GridSpec, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(DistributedArray<RayonComm>) -> T + Sync,
{
    with_arrays_opts(size, grid, DaOptions::default(), f)
}

/// Like [`with_arrays`] but with explicit creation options.
pub fn with_arrays_opts<T, F>(size: usize, grid: GridSpec, opts: DaOptions, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(DistributedArray<RayonComm>) -> T + Sync,
{
    run_ranks(size, |comm| {
        let da = DistributedArray::create(comm, grid, opts.clone())
            .expect("create distributed array");
        f(da)
    })
}

/// Every partition policy for `m` nodes over `size` ranks: the three named
/// ones plus an uneven explicit split (one node per rank, the rest on the last).
pub fn all_partitions(m: usize, size: usize) -> Vec<DaOptions> {
    let uneven = (0..size)
        .map(|r| if r + 1 == size { m + 1 - size } else { 1 })
        .collect();
    vec![
        DaOptions::default().with_partition(PartitionKind::NodesAtStart),
        DaOptions::default().with_partition(PartitionKind::Block),
        DaOptions::default().with_partition(PartitionKind::NodesAtEnd),
        DaOptions::default().with_explicit_sizes(uneven),
    ]
}

/// Value stored at global scalar index `g` in test vectors.
pub fn tag_value(g: usize) -> f64 {
    1000.0 + g as f64
}
