use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mfs::mfs::path;
use mfs::prelude::*;
use rand::Rng;
use tokio::runtime::Runtime;

struct FileSpec {
    dir: String,
    name: String,
    link: NodeLink,
}

async fn random_link(store: &MemoryStore, len: usize) -> NodeLink {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    store_file(store, data).await.unwrap()
}

async fn single(store: &MemoryStore, dir: &str) -> Vec<FileSpec> {
    vec![FileSpec {
        dir: dir.to_string(),
        name: "afile".to_string(),
        link: random_link(store, 1000).await,
    }]
}

/// `fanout^depth` leaf directories with `files` files each
async fn generated(store: &MemoryStore, depth: u32, fanout: usize, files: usize) -> Vec<FileSpec> {
    let mut dirs: Vec<String> = (0..fanout).map(|i| i.to_string()).collect();
    for _ in 1..depth {
        dirs = dirs
            .iter()
            .flat_map(|dir| (0..fanout).map(move |i| format!("{dir}/{i}")))
            .collect();
    }
    let mut specs = Vec::with_capacity(dirs.len() * files);
    for dir in dirs {
        for k in 0..files {
            specs.push(FileSpec {
                dir: dir.clone(),
                name: format!("file{k}"),
                link: random_link(store, 512).await,
            });
        }
    }
    specs
}

async fn add_tree(store: &MemoryStore, specs: &[FileSpec]) {
    let cancel = CancellationToken::new();
    let root = Root::empty(Arc::new(store.clone()), None, MfsConfig::default(), &cancel)
        .await
        .unwrap();
    for spec in specs {
        path::put_node(root.directory(), &spec.dir, &spec.name, spec.link, &cancel)
            .await
            .unwrap();
    }
}

fn bench_add_file_tree(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let store = MemoryStore::new();

    let shapes: Vec<(&str, Vec<FileSpec>)> = runtime.block_on(async {
        vec![
            ("onefile", single(&store, "").await),
            ("onefilepath", single(&store, "a/b/c/d").await),
            (
                "onefiledeeppath",
                single(&store, "a/b/c/d/e/f/g/h/i/j/k/l/m/n").await,
            ),
            // 2^14 * 2 = 32768 files
            ("deeptree", generated(&store, 14, 2, 2).await),
            // 16^3 * 8 = 32768 files
            ("widetree", generated(&store, 3, 16, 8).await),
            // 128^2 * 2 = 32768 files
            ("superwidetree", generated(&store, 2, 128, 2).await),
            // 16 * 2048 = 32768 files
            ("flatheavy", generated(&store, 1, 16, 2048).await),
            // 2^4 * 2048 = 32768 files
            ("deepheavy", generated(&store, 4, 2, 2048).await),
        ]
    });

    let mut group = c.benchmark_group("add_file_tree");
    group.sample_size(10);
    for (name, specs) in &shapes {
        group.bench_with_input(BenchmarkId::from_parameter(name), specs, |b, specs| {
            b.to_async(&runtime).iter(|| add_tree(&store, specs));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add_file_tree);
criterion_main!(benches);
