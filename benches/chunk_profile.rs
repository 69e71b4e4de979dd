use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use tempfile::TempDir;

use csv_refinery::config::CleanConfig;
use csv_refinery::profile::StreamingProfiler;
use csv_refinery::reader::{ChunkedTableReader, ReaderOptions};
use csv_refinery::source::SourceLocator;

fn generate_readings(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let csv_path = temp_dir.path().join("readings.csv");
    let mut file = File::create(&csv_path).expect("create csv");
    writeln!(file, "id,value,noise,label").expect("header");
    for i in 0..rows {
        let value = (i % 997) as f64 * 0.5;
        let noise = ((i * 31) % 113) as f64;
        writeln!(file, "{i},{value},{noise},item_{}", i % 7).expect("row");
    }
    (temp_dir, csv_path)
}

fn profile_with_chunk_size(source: &SourceLocator, chunk_size: usize) -> usize {
    let config = CleanConfig {
        chunk_size,
        ..CleanConfig::default()
    };
    let options = ReaderOptions {
        chunk_size,
        ..ReaderOptions::default()
    };
    let mut reader = ChunkedTableReader::open(source, &options).expect("open");
    let mut profiler = StreamingProfiler::new(&config, Vec::new());
    while let Some(chunk) = reader.next_chunk().expect("chunk") {
        profiler.observe_chunk(&chunk);
    }
    profiler.finalize().len()
}

fn bench_streaming_profile(c: &mut Criterion) {
    let (_guard, csv_path) = generate_readings(50_000);
    let source = SourceLocator::LocalPath(csv_path);

    let mut group = c.benchmark_group("streaming_profile");
    for chunk_size in [1_000usize, 10_000, 100_000] {
        group.bench_function(format!("chunk_{chunk_size}"), |b| {
            b.iter_batched(
                || source.clone(),
                |source| profile_with_chunk_size(&source, chunk_size),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_streaming_profile);
criterion_main!(benches);
