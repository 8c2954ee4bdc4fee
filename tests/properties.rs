use std::sync::Arc;

use approx::assert_relative_eq;
use proptest::prelude::*;
use stospa::{
    connect_chain, AdvanceOutcome, Reaction, Selection, Simulator, StepOutcome, Trajectory, Voxel,
};

fn growing_chain(n_voxels: usize, first: u32, rate: f64) -> Vec<Voxel> {
    let mut voxels: Vec<Voxel> = (0..n_voxels)
        .map(|i| {
            let count = if i == 0 { first } else { 0 };
            Voxel::with_growth(vec![count], 1.0, |t| 1.0 + 0.1 * t).unwrap()
        })
        .collect();
    connect_chain(
        &mut voxels,
        rate,
        Arc::new(|c: &[u32], size: f64| c[0] as f64 / (size * size)),
        &[-1],
    )
    .unwrap();
    voxels
}

fn birth_death() -> Voxel {
    let mut v = Voxel::new(vec![3], 1.0).unwrap();
    v.add_reaction(Reaction::new(5.0, |_: &[u32], size: f64| size, vec![1]).unwrap())
        .unwrap();
    v.add_reaction(Reaction::new(0.7, |c: &[u32], _: f64| c[0] as f64, vec![-1]).unwrap())
        .unwrap();
    v
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn diffusion_on_growing_chain_conserves_molecules(
        n_voxels in 2usize..6,
        first in 0u32..200,
        seed in any::<u64>(),
        steps in 0usize..300,
    ) {
        let mut sim = Simulator::with_seed(growing_chain(n_voxels, first, 1.5), seed).unwrap();
        let mut last_time = 0.0;
        for _ in 0..steps {
            match sim.step().unwrap() {
                StepOutcome::Fired(event) => {
                    prop_assert!(event.time >= last_time);
                    prop_assert!(sim.voxels()[event.voxel].reactions()[event.reaction].is_transfer());
                    last_time = event.time;
                }
                // Propensities decay as 1/t^2, so a long run can underflow to zero.
                StepOutcome::Absorbing => {
                    prop_assert_eq!(sim.total_propensity().unwrap(), 0.0);
                    break;
                }
            }
            prop_assert_eq!(sim.molecules().iter().sum::<u32>(), first);
        }
    }

    #[test]
    fn same_seed_same_state(seed in any::<u64>(), target in 0.1f64..5.0) {
        let mut a = Simulator::with_seed(vec![birth_death()], seed).unwrap();
        let mut b = Simulator::with_seed(vec![birth_death()], seed).unwrap();
        prop_assert_eq!(a.advance(target).unwrap(), AdvanceOutcome::Reached);
        prop_assert_eq!(b.advance(target).unwrap(), AdvanceOutcome::Reached);
        prop_assert!(a.time() >= target);
        prop_assert_eq!(a.time(), b.time());
        prop_assert_eq!(a.molecules(), b.molecules());
        prop_assert_eq!(a.events_fired(), b.events_fired());
    }

    #[test]
    fn selection_strategies_agree_on_integer_propensities(
        n_voxels in 2usize..8,
        first in 1u32..100,
        seed in any::<u64>(),
    ) {
        let build = |selection| {
            let mut voxels: Vec<Voxel> = (0..n_voxels)
                .map(|i| Voxel::new(vec![if i == 0 { first } else { 0 }], 1.0).unwrap())
                .collect();
            connect_chain(&mut voxels, 2.0, Arc::new(|c: &[u32], _: f64| c[0] as f64), &[-1]).unwrap();
            Simulator::with_seed(voxels, seed).unwrap().with_selection(selection)
        };
        let mut linear = build(Selection::Linear);
        let mut indexed = build(Selection::Indexed);
        for _ in 0..100 {
            prop_assert_eq!(linear.step().unwrap(), indexed.step().unwrap());
        }
        prop_assert_eq!(linear.molecules(), indexed.molecules());
    }

    #[test]
    fn propensity_scales_with_domain_size(
        growth_rate in 0.0f64..2.0,
        t1 in 0.0f64..10.0,
        t2 in 0.0f64..10.0,
        count in 1u32..1000,
    ) {
        let mut v = Voxel::with_growth(vec![count], 0.5, move |t| 1.0 + growth_rate * t).unwrap();
        v.add_reaction(Reaction::new(0.25, |c: &[u32], size: f64| c[0] as f64 * size, vec![0]).unwrap())
            .unwrap();
        let p1 = v.total_propensity(t1).unwrap();
        let p2 = v.total_propensity(t2).unwrap();
        let s1 = v.size_at(t1).unwrap();
        let s2 = v.size_at(t2).unwrap();
        assert_relative_eq!(p2 / p1, s2 / s1, max_relative = 1e-12);
        assert_relative_eq!(s1, 0.5 * (1.0 + growth_rate * t1), max_relative = 1e-12);
    }
}

#[test]
fn trajectory_file_round_trips_through_reader() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("growing_chain.dat");
    let mut sim = Simulator::with_seed(growing_chain(4, 80, 1.0), 2024).unwrap();
    let summary = sim.run(&path, 0.25, 41).unwrap();
    assert!(!summary.absorbed);
    assert!(summary.events > 0);

    let header: Vec<String> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .take(2)
        .map(str::to_owned)
        .collect();
    assert_eq!(header[0], "# seed = 2024");
    assert_eq!(header[1], "# time voxels (4) species (1)");

    let traj = Trajectory::from_path(&path).unwrap();
    assert_eq!(traj.len(), 41);
    assert_eq!(traj.n_columns, 4);
    assert_eq!(traj.row(0), &[80, 0, 0, 0]);
    for (i, &t) in traj.times.iter().enumerate() {
        assert!(t >= 0.25 * i as f64);
        assert_eq!(traj.row(i).iter().sum::<u32>(), 80);
    }
    assert_eq!(*traj.times.last().unwrap(), sim.time());
    assert_eq!(traj.row(40), sim.molecules().as_slice());
}

#[test]
fn diffusion_ensemble_mean_flattens() {
    let mut voxels: Vec<Voxel> = (0..3)
        .map(|i| Voxel::new(vec![if i == 0 { 90 } else { 0 }], 1.0).unwrap())
        .collect();
    connect_chain(&mut voxels, 1.0, Arc::new(|c: &[u32], _: f64| c[0] as f64), &[-1]).unwrap();
    let config = stospa::EnsembleConfig {
        n_replicates: 200,
        seed: Some(99),
        t_end: 20.0,
        ..Default::default()
    };
    let out = stospa::run_ensemble(&voxels, &config).unwrap();
    let mean = out.mean(0);
    for m in mean {
        assert!((m - 30.0).abs() < 3.0, "mean {} far from 30", m);
    }
}
