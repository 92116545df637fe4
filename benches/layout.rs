use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use widget_grid::dashboard::config::{DashboardConfig, GridConfig, WidgetConfig, WidgetLayout};
use widget_grid::dashboard::instance::WidgetInstance;
use widget_grid::dashboard::layout::LayoutEngine;
use widget_grid::dashboard::registry::WidgetMetadata;

fn scattered(count: usize) -> LayoutEngine {
    let config = DashboardConfig::new("bench", "Bench", GridConfig::default());
    let mut engine = LayoutEngine::new(config);
    for i in 0..count {
        let cols = (i % 4) as i32 + 1;
        let rows = (i % 3) as i32 + 1;
        let instance = WidgetInstance::new(
            format!("w{i}"),
            WidgetMetadata::new("tile", "Tile", "bench"),
            WidgetConfig::new("tile", "Tile", WidgetLayout::sized(cols, rows)),
        );
        let x = (i * 7 % 12) as i32;
        let y = (i * 3) as i32;
        engine.add_widget(instance, Some((x, y)));
    }
    engine
}

fn bench_find_optimal_position(c: &mut Criterion) {
    let engine = scattered(500);
    let wanted = WidgetLayout::sized(3, 2);
    c.bench_function("find_optimal_position_500", |b| {
        b.iter(|| engine.find_optimal_position(&wanted, None))
    });
}

/// Compaction of a sparse layout; each iteration starts from a fresh copy.
fn bench_compact_layout(c: &mut Criterion) {
    let config = scattered(500).config().clone();
    c.bench_function("compact_layout_500", |b| {
        b.iter_batched(
            || LayoutEngine::new(config.clone()),
            |mut engine| engine.compact_layout(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_find_optimal_position, bench_compact_layout);
criterion_main!(benches);
