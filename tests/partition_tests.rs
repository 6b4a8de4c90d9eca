mod util;
use halo_da::algs::partition::{
    BlockPartition, ExplicitSizes, NodesAtEnd, NodesAtStart, OwnedRange, OwnershipLayout,
    PartitionPolicy, partition,
};
use halo_da::da_error::DaError;
use halo_da::data::grid::Periodicity;
use proptest::prelude::*;
use util::*;

fn policies() -> Vec<Box<dyn PartitionPolicy>> {
    vec![
        Box::new(NodesAtStart),
        Box::new(BlockPartition),
        Box::new(NodesAtEnd),
    ]
}

#[test]
fn seven_nodes_over_three_ranks_default_policy() {
    let grid = spec(7, 1, 1, Periodicity::Clamped);
    let ranges: Vec<_> = (0..3)
        .map(|r| partition(&grid, 3, r, &NodesAtStart).unwrap())
        .collect();
    assert_eq!(
        ranges,
        vec![
            OwnedRange::new(0, 3),
            OwnedRange::new(3, 2),
            OwnedRange::new(5, 2)
        ]
    );
}

#[test]
fn nodes_at_end_puts_remainder_last() {
    let grid = spec(7, 1, 1, Periodicity::Clamped);
    let layout = OwnershipLayout::new(&grid, 3, &NodesAtEnd).unwrap();
    let lens: Vec<_> = layout.ranges().map(|r| r.len).collect();
    assert_eq!(lens, vec![2, 2, 3]);
}

#[test]
fn ranges_scale_with_dof() {
    let grid = spec(7, 3, 1, Periodicity::Clamped);
    let r1 = partition(&grid, 3, 1, &NodesAtStart).unwrap();
    assert_eq!(r1, OwnedRange::new(9, 6));
}

#[test]
fn explicit_sizes_accept_and_reject() {
    let grid = spec(8, 1, 1, Periodicity::Clamped);
    let layout = OwnershipLayout::new(&grid, 4, &ExplicitSizes(vec![2, 2, 2, 2])).unwrap();
    assert_eq!(layout.range(3), OwnedRange::new(6, 2));

    let err = OwnershipLayout::new(&grid, 4, &ExplicitSizes(vec![2, 2, 2, 3])).unwrap_err();
    assert!(matches!(err, DaError::ArgumentOutOfRange(_)), "{err:?}");
    let err = partition(&grid, 3, 0, &ExplicitSizes(vec![4, 4])).unwrap_err();
    assert!(matches!(err, DaError::ArgumentOutOfRange(_)), "{err:?}");
}

#[test]
fn invalid_configurations_are_rejected() {
    // more ranks than nodes
    let grid = spec(3, 1, 0, Periodicity::Clamped);
    assert!(matches!(
        partition(&grid, 4, 0, &NodesAtStart),
        Err(DaError::ArgumentOutOfRange(_))
    ));
    // stencil wider than M - 1
    let grid = spec(3, 1, 3, Periodicity::Periodic);
    assert!(matches!(
        partition(&grid, 1, 0, &NodesAtStart),
        Err(DaError::ArgumentOutOfRange(_))
    ));
    // zero dof
    assert!(halo_da::data::grid::GridSpec::new(4, 0, 1, Periodicity::Clamped).is_err());
}

#[test]
fn owner_lookup_matches_ranges() {
    let grid = spec(10, 2, 1, Periodicity::Clamped);
    let layout = OwnershipLayout::new(&grid, 3, &BlockPartition).unwrap();
    for g in 0..layout.total() {
        let owner = layout.owner_of(g).unwrap();
        assert!(layout.range(owner).contains(g));
    }
    assert_eq!(layout.owner_of(20), None);
}

proptest! {
    #[test]
    fn every_policy_tiles_the_grid(m in 1usize..200, w in 1usize..4, size in 1usize..16) {
        prop_assume!(size <= m);
        let grid = spec(m, w, 0, Periodicity::Clamped);
        for policy in policies() {
            let mut next = 0;
            for rank in 0..size {
                let r = partition(&grid, size, rank, policy.as_ref()).unwrap();
                prop_assert_eq!(r.start, next, "policy {} rank {}", policy.name(), rank);
                prop_assert_eq!(r.len % w, 0);
                next = r.end();
            }
            prop_assert_eq!(next, m * w);
        }
    }

    #[test]
    fn default_policy_is_balanced(m in 1usize..500, size in 1usize..32) {
        prop_assume!(size <= m);
        let grid = spec(m, 1, 0, Periodicity::Clamped);
        let layout = OwnershipLayout::new(&grid, size, &NodesAtStart).unwrap();
        let lens: Vec<_> = layout.ranges().map(|r| r.len).collect();
        let (lo, hi) = (*lens.iter().min().unwrap(), *lens.iter().max().unwrap());
        prop_assert!(hi - lo <= 1);
        prop_assert!(lens.windows(2).all(|p| p[0] >= p[1]));
    }
}
