//! Alignment and pipeline benchmarks
//!
//! Reads of 150bp against 160bp references with a few random edits, full and
//! banded, plus a small end-to-end pipeline run.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ngsflow::engines::storage::formats::encode_stream;
use ngsflow::{
    align, run_pipeline, Alphabet, AlignmentMode, EncodedSequence, MemorySink, PipelineConfig,
    PipelineRecord,
    QualifiedSequence, ReadSource, ReferenceAligner, ScoringScheme,
};
use rand::Rng;

/// Generate random DNA sequence of given length
fn generate_sequence(len: usize) -> Vec<u8> {
    let bases = b"ACGT";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| bases[rng.gen_range(0..4)]).collect()
}

/// Copy `reference[5..5 + len]` with a handful of substitutions
fn mutated_read(reference: &[u8], len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut read = reference[5..5 + len].to_vec();
    for _ in 0..4 {
        let at = rng.gen_range(0..read.len());
        read[at] = b"ACGT"[rng.gen_range(0..4)];
    }
    read
}

fn bench_single_alignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("align_150bp");
    let scoring = ScoringScheme::default();
    let reference_symbols = generate_sequence(160);
    let reference = EncodedSequence::nucleotide(&reference_symbols).unwrap();
    let query = EncodedSequence::nucleotide(&mutated_read(&reference_symbols, 150)).unwrap();

    group.throughput(Throughput::Elements(1));
    for mode in [AlignmentMode::Global, AlignmentMode::Local, AlignmentMode::SemiGlobal] {
        for band in [None, Some(16)] {
            let width = band.map_or("full".to_string(), |w| format!("band{}", w));
            let label = format!("{:?}/{}", mode, width);
            group.bench_with_input(BenchmarkId::from_parameter(label), &band, |b, &band| {
                b.iter(|| {
                    black_box(align(
                        black_box(&query),
                        black_box(&reference),
                        &scoring,
                        mode,
                        band,
                    ))
                })
            });
        }
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    let reference_symbols = generate_sequence(160);
    let records: Vec<PipelineRecord> = (0..1000)
        .map(|i| {
            let symbols = mutated_read(&reference_symbols, 150);
            let read =
                QualifiedSequence::from_fastq_parts(Alphabet::Nucleotide, &symbols, &[b'I'; 150])
                    .unwrap();
            PipelineRecord::new(format!("read{}", i), read)
        })
        .collect();

    for compressed in [false, true] {
        let stream = encode_stream(&records, compressed.then_some(64 * 1024)).unwrap();
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(if compressed { "deflate" } else { "plain" }),
            &stream,
            |b, stream| {
                b.iter(|| {
                    let config = PipelineConfig::default()
                        .with_mode(AlignmentMode::SemiGlobal)
                        .with_band_width(Some(16))
                        .with_scoring(Arc::new(ScoringScheme::default()))
                        .with_compressed(compressed);
                    let processor = ReferenceAligner::new(config.aligner())
                        .with_default_reference(
                            EncodedSequence::nucleotide(&reference_symbols).unwrap(),
                        )
                        .unwrap();
                    let source = ReadSource::from_bytes(stream.clone());
                    black_box(run_pipeline(config, source, MemorySink::new(), processor).unwrap())
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_alignment, bench_pipeline);
criterion_main!(benches);
