//! Performance benchmarks for the knitting store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use knit_store::{
    Model, NewCalculation, NewNote, NewProject, ProjectSort, ProjectStatus, Store, StoreConfig,
    StructuredMap,
};
use tempfile::TempDir;

fn create_store(dir: &TempDir) -> Store {
    Store::create(StoreConfig {
        sync_on_commit: false,
        ..StoreConfig::at(dir.path().join("store"))
    })
    .unwrap()
}

fn fill(store: &Store, projects: usize) {
    store
        .write(|w| {
            for i in 0..projects {
                w.create(NewProject::new(&format!("project {}", i), ProjectStatus::InProgress))?;
            }
            Ok(())
        })
        .unwrap();
}

/// Benchmark single-row transactions
fn bench_create_project(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir);

    c.bench_function("create_project", |b| {
        b.iter(|| {
            black_box(
                store
                    .create_project(NewProject::new("Светр", ProjectStatus::Planned))
                    .unwrap(),
            );
        });
    });
}

/// Benchmark saving calculator results with structured maps
fn bench_add_calculation(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir);
    let project = store
        .create_project(NewProject::new("Светр", ProjectStatus::InProgress))
        .unwrap();

    c.bench_function("add_calculation", |b| {
        b.iter(|| {
            let calculation = NewCalculation {
                input_values: StructuredMap::new().with("width", 50).with("height", 60),
                results: StructuredMap::new().with("yarnNeeded", 450),
                ..NewCalculation::new("yarn", "Yarn amount")
            };
            black_box(
                store
                    .add_calculation_to_project(project.id(), calculation)
                    .unwrap(),
            );
        });
    });
}

/// Benchmark the project list at growing sizes
fn bench_list_projects(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_projects");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("projects", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = create_store(&dir);
            fill(&store, size);

            b.iter(|| {
                black_box(store.list_projects(ProjectSort::RecentlyUpdated).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark child lookups through the foreign key index
fn bench_list_children(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_notes");

    for other_projects in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("other_projects", other_projects),
            &other_projects,
            |b, &others| {
                let dir = TempDir::new().unwrap();
                let store = create_store(&dir);
                fill(&store, others);
                let project = store
                    .create_project(NewProject::new("target", ProjectStatus::InProgress))
                    .unwrap();
                for i in 0..20 {
                    store
                        .add_note(project.id(), NewNote::new(&format!("row {}", i), "k2p2"))
                        .unwrap();
                }

                b.iter(|| {
                    black_box(store.list_notes(project.id()).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark commit-to-snapshot latency with live queries attached
fn bench_commit_with_observers(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_with_observers");

    for observers in [1, 10, 50] {
        group.bench_with_input(
            BenchmarkId::new("observers", observers),
            &observers,
            |b, &observers| {
                let dir = TempDir::new().unwrap();
                let store = create_store(&dir);
                let project = store
                    .create_project(NewProject::new("watched", ProjectStatus::InProgress))
                    .unwrap();
                let live: Vec<_> = (0..observers)
                    .map(|_| store.observe_notes(project.id()).unwrap())
                    .collect();
                for query in &live {
                    query.recv().unwrap();
                }

                b.iter(|| {
                    store
                        .add_note(project.id(), NewNote::new("row", "k1p1"))
                        .unwrap();
                    for query in &live {
                        black_box(query.recv().unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_create_project,
    bench_add_calculation,
    bench_list_projects,
    bench_list_children,
    bench_commit_with_observers,
);

criterion_main!(benches);
