use nbody_collective::{
    Body, DeviceSolver, DistributedSolver, Error, ForceModel, PartitionPlan, Residency,
    SequentialSolver, SimulationConfig, Solver, Task, Vector3,
};

/// Two unit masses one unit apart, the textbook one-step case.
pub fn two_body_task() -> Task {
    Task::parse(
        "1 0 0.01 2 1\n\
         1 0 0 0 0 0 0\n\
         1 1 0 0 0 0 0\n",
    )
    .unwrap()
}

/// A small deterministic cluster with mixed masses and velocities.
pub fn cluster(body_count: usize, step_count: usize) -> (SimulationConfig, Vec<Body>) {
    let config = SimulationConfig {
        gravitation_constant: 1.0,
        softening_radius: 0.05,
        time_step: 0.001,
        body_count,
        step_count,
    };
    let bodies = (0..body_count)
        .map(|i| {
            let t = i as f64;
            Body::new(
                1.0 + (i % 3) as f64,
                Vector3::new(2.0 * t.cos(), 2.0 * t.sin(), 0.5 * (t - 2.0)),
                Vector3::new(-0.1 * t.sin(), 0.1 * t.cos(), 0.0),
            )
        })
        .collect();
    (config, bodies)
}

pub fn assert_close(actual: &[Body], expected: &[Body], tolerance: f64) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        for (got, want) in [(a.position, e.position), (a.velocity, e.velocity)] {
            let error = (got - want).magnitude();
            let scale = want.magnitude().max(1.0);
            assert!(
                error <= tolerance * scale,
                "body {i}: {got} vs {want} (relative error {})",
                error / scale
            );
        }
        assert_eq!(a.mass, e.mass, "body {i} mass changed");
    }
}

/// Runs the device backend, or returns `None` when this machine has no adapter.
fn run_on_device(
    residency: Residency,
    config: &SimulationConfig,
    bodies: Vec<Body>,
) -> Option<Vec<Body>> {
    match DeviceSolver::new(residency).simulate(config, bodies) {
        Ok(bodies) => Some(bodies),
        Err(Error::Gpu(reason)) => {
            eprintln!("skipping device run: {reason}");
            None
        }
        Err(Error::Resource { .. }) => {
            eprintln!("skipping device run: grid does not fit this adapter");
            None
        }
        Err(err) => panic!("device run failed: {err}"),
    }
}

// ==================================================================================
// Concrete scenario
// ==================================================================================

#[test]
fn two_bodies_one_step_sequential() {
    let task = two_body_task();
    let out = SequentialSolver::new().simulate(&task.config, task.bodies).unwrap();

    assert_eq!(out[0].velocity, Vector3::new(0.01, 0.0, 0.0));
    assert_eq!(out[1].velocity, Vector3::new(-0.01, 0.0, 0.0));
    assert!((out[0].position - Vector3::new(0.0001, 0.0, 0.0)).magnitude() < 1e-15);
    assert!((out[1].position - Vector3::new(0.9999, 0.0, 0.0)).magnitude() < 1e-15);
}

#[test]
fn two_bodies_one_step_distributed() {
    let task = two_body_task();
    let expected = SequentialSolver::new()
        .simulate(&task.config, task.bodies.clone())
        .unwrap();
    let out = DistributedSolver::new(2)
        .unwrap()
        .simulate(&task.config, task.bodies)
        .unwrap();
    assert_eq!(out, expected);
}

#[test]
fn two_bodies_one_step_device() {
    let task = two_body_task();
    let expected = SequentialSolver::new()
        .simulate(&task.config, task.bodies.clone())
        .unwrap();
    if let Some(out) = run_on_device(Residency::Resident, &task.config, task.bodies) {
        assert_close(&out, &expected, 1e-5);
    }
}

// ==================================================================================
// Determinism and idempotence
// ==================================================================================

#[test]
fn sequential_is_bit_identical_across_runs() {
    let (config, bodies) = cluster(6, 50);
    let first = SequentialSolver::new().simulate(&config, bodies.clone()).unwrap();
    let second = SequentialSolver::new().simulate(&config, bodies).unwrap();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.position.x.to_bits(), b.position.x.to_bits());
        assert_eq!(a.velocity.z.to_bits(), b.velocity.z.to_bits());
    }
    assert_eq!(first, second);
}

#[test]
fn zero_steps_change_nothing() {
    let (config, bodies) = cluster(4, 0);
    let sequential = SequentialSolver::new().simulate(&config, bodies.clone()).unwrap();
    let distributed = DistributedSolver::new(2)
        .unwrap()
        .simulate(&config, bodies.clone())
        .unwrap();
    assert_eq!(sequential, bodies);
    assert_eq!(distributed, bodies);
    if let Some(device) = run_on_device(Residency::Resident, &config, bodies.clone()) {
        assert_eq!(device, bodies);
    }
}

// ==================================================================================
// Cross-backend equivalence
// ==================================================================================

#[test]
fn backends_agree_after_one_step() {
    let (config, bodies) = cluster(4, 1);
    let reference = SequentialSolver::new().simulate(&config, bodies.clone()).unwrap();
    let distributed = DistributedSolver::new(2)
        .unwrap()
        .simulate(&config, bodies.clone())
        .unwrap();
    assert_close(&distributed, &reference, 1e-12);

    for residency in [Residency::Resident, Residency::PerStep] {
        if let Some(device) = run_on_device(residency, &config, bodies.clone()) {
            assert_close(&device, &reference, 1e-5);
        }
    }
}

#[test]
fn device_residency_modes_agree_over_many_steps() {
    let (config, bodies) = cluster(4, 20);
    let reference = SequentialSolver::new().simulate(&config, bodies.clone()).unwrap();
    let Some(resident) = run_on_device(Residency::Resident, &config, bodies.clone()) else {
        return;
    };
    let Some(per_step) = run_on_device(Residency::PerStep, &config, bodies) else {
        return;
    };
    assert_close(&resident, &per_step, 1e-6);
    assert_close(&resident, &reference, 1e-4);
}

#[test]
fn oversized_grid_is_refused_by_the_device() {
    // 64 x 64 invocations exceeds every adapter's per-workgroup limit
    let (config, bodies) = cluster(64, 1);
    match DeviceSolver::default().simulate(&config, bodies) {
        Err(Error::Resource { body_count, .. }) => assert_eq!(body_count, 64),
        Err(Error::Gpu(reason)) => eprintln!("skipping device run: {reason}"),
        other => panic!("expected a resource error, got {other:?}"),
    }
}

// ==================================================================================
// Partitioning
// ==================================================================================

#[test]
fn remainder_bodies_are_untouched_by_distributed_run() {
    let (config, bodies) = cluster(10, 25);
    let plan = PartitionPlan::new(config.body_count, 4).unwrap();
    assert_eq!(plan.unassigned(), 8..10);

    let out = DistributedSolver::new(4)
        .unwrap()
        .simulate(&config, bodies.clone())
        .unwrap();
    for i in plan.unassigned() {
        assert_eq!(out[i], bodies[i], "unassigned body {i} moved");
    }
    for partition in plan.partitions() {
        for i in partition.range() {
            assert_ne!(out[i].position, bodies[i].position, "body {i} never moved");
        }
    }
}

#[test]
fn mismatched_body_count_is_rejected_by_every_backend() {
    let (config, mut bodies) = cluster(4, 1);
    bodies.pop();
    assert!(matches!(
        SequentialSolver::new().simulate(&config, bodies.clone()),
        Err(Error::Domain(_))
    ));
    assert!(matches!(
        DistributedSolver::new(2).unwrap().simulate(&config, bodies.clone()),
        Err(Error::Domain(_))
    ));
    assert!(matches!(
        DeviceSolver::default().simulate(&config, bodies),
        Err(Error::Domain(_))
    ));
}

// ==================================================================================
// Force law
// ==================================================================================

#[test]
fn force_is_antisymmetric_outside_softening() {
    let (config, bodies) = cluster(5, 0);
    let model = ForceModel::from(&config);
    for (i, a) in bodies.iter().enumerate() {
        for b in &bodies[i + 1..] {
            let on_a = model.induced_acceleration(a, b) * a.mass;
            let on_b = model.induced_acceleration(b, a) * b.mass;
            assert!((on_a + on_b).magnitude() <= 1e-12 * on_a.magnitude().max(1.0));
        }
    }
}
