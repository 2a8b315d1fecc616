use criterion::{criterion_group, criterion_main, Criterion};
use std::process::Command;

fn benchmark_cluctl_startup(c: &mut Criterion) {
    c.bench_function("cluctl --version", |b| {
        b.iter(|| {
            Command::new("./target/release/cluctl")
                .arg("--version")
                .output()
                .expect("Failed to execute cluctl --version")
        })
    });
}

fn benchmark_cluctl_help(c: &mut Criterion) {
    c.bench_function("cluctl help", |b| {
        b.iter(|| {
            Command::new("./target/release/cluctl")
                .arg("--help")
                .output()
                .expect("Failed to execute cluctl --help")
        })
    });
}

criterion_group!(benches, benchmark_cluctl_startup, benchmark_cluctl_help);
criterion_main!(benches);
