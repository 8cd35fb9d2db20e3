use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use panelmap::{
    AssignmentConfig, BoundingBox, CoordinateTransformer, Crs, Defect, DefectAssigner, GpsImageIndex, LatLon,
    PanelGridIndex, PanelLayout, RawImageRecord, UniformGridSpec,
};

/// 40 trackers of 4x30 panels at 5 cm ground sampling in UTM 21S.
fn plant() -> (CoordinateTransformer, PanelGridIndex) {
    let transformer = CoordinateTransformer::new(
        [0.05, 0.0, 745_000.0, 0.0, -0.05, 7_733_000.0],
        0.25,
        Crs::Utm {
            zone: 21,
            north: false,
        },
    )
    .expect("valid transform");
    let spec = UniformGridSpec {
        origin: [745_000.0, 7_733_000.0],
        trackers: 40,
        rows: 4,
        cols: 30,
        col_gap: 0.02,
        row_gap: 0.02,
        tracker_gap: 5.0,
    };
    let layout = PanelLayout::uniform(&spec, 1.13, 2.28).expect("valid grid");
    let index = PanelGridIndex::build(layout, 2.28).expect("valid pitch");
    (transformer, index)
}

fn random_defects(seed: u64, n: usize) -> Vec<Defect> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|index| Defect {
            index,
            bbox: BoundingBox::new(
                rng.gen_range(0.0..4_000.0),
                rng.gen_range(0.0..50.0),
                rng.gen_range(2.0..12.0),
                rng.gen_range(2.0..12.0),
            ),
            label: "hotspots".to_string(),
            confidence: Some(rng.gen_range(0.3..1.0)),
        })
        .collect()
}

fn bench_assignment(c: &mut Criterion) {
    let (transformer, index) = plant();
    let defects = random_defects(7, 2_000);
    let assigner = DefectAssigner::new(&transformer, &index, &AssignmentConfig::default());

    c.bench_function("nearest_cell_4800_panels", |b| {
        let mut rng = StdRng::seed_from_u64(11);
        b.iter(|| {
            let p = [
                745_000.0 + rng.gen_range(0.0..1_600.0),
                7_733_000.0 - rng.gen_range(0.0..10.0),
            ];
            black_box(index.nearest_cell(black_box(p), 5.0).map(|hit| hit.cell.key))
        })
    });

    c.bench_function("assign_2000_sequential", |b| {
        b.iter(|| black_box(assigner.assign_all(black_box(&defects), false).len()))
    });

    c.bench_function("assign_2000_parallel", |b| {
        b.iter(|| black_box(assigner.assign_all(black_box(&defects), true).len()))
    });
}

fn bench_gps(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(23);
    let records: Vec<RawImageRecord> = (0..5_000)
        .map(|i| RawImageRecord {
            path: format!("DJI_{i:04}.JPG"),
            latitude: Some(-20.47 + rng.gen_range(-0.01..0.01)),
            longitude: Some(-54.62 + rng.gen_range(-0.01..0.01)),
            altitude: Some(60.0),
            timestamp: None,
        })
        .collect();
    let index = GpsImageIndex::build(&records, 50.0);

    c.bench_function("gps_nearest_5000_images", |b| {
        let mut rng = StdRng::seed_from_u64(29);
        b.iter(|| {
            let anchor = LatLon::new(
                -20.47 + rng.gen_range(-0.01..0.01),
                -54.62 + rng.gen_range(-0.01..0.01),
            );
            black_box(index.nearest(black_box(anchor)).map(|(img, d)| (img.index, d)))
        })
    });
}

criterion_group!(benches, bench_assignment, bench_gps);
criterion_main!(benches);
