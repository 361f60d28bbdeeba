use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{DMat3, DVec2, DVec3};
use kornia_sfm::camera::Pose;
use kornia_sfm::triangulation::triangulate_nview;

fn look_at(center: DVec3, target: DVec3) -> Pose {
    let z = (target - center).normalize();
    let x = DVec3::Y.cross(z).normalize();
    let y = z.cross(x);
    Pose::new(DMat3::from_cols(x, y, z).transpose(), center)
}

/// Cameras on a circle around the origin, all observing the same point.
fn generate_views(n: usize) -> (Vec<Pose>, Vec<DVec2>) {
    let point = DVec3::new(0.1, -0.2, 0.3);
    let poses = (0..n)
        .map(|i| {
            let angle = i as f64 * 0.3;
            look_at(
                DVec3::new(5.0 * angle.sin(), 0.5, -5.0 * angle.cos()),
                DVec3::ZERO,
            )
        })
        .collect::<Vec<_>>();
    let observations = poses
        .iter()
        .map(|pose| {
            let p = pose.transform(point);
            p.truncate() / p.z
        })
        .collect();
    (poses, observations)
}

fn bench_triangulate_nview(c: &mut Criterion) {
    let mut group = c.benchmark_group("triangulate_nview");
    for &n in &[2, 5, 20] {
        let (poses, observations) = generate_views(n);
        let poses = poses.iter().collect::<Vec<_>>();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = std::hint::black_box(triangulate_nview(&poses, &observations));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_triangulate_nview);
criterion_main!(benches);
