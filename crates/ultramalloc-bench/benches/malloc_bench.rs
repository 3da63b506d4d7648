//! Allocator benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ultramalloc_core::{Allocator, AllocatorConfig, CallSite, SafetyLevel};

fn quiet(mode: SafetyLevel) -> Allocator {
    Allocator::new(
        AllocatorConfig::default()
            .with_mode(mode)
            .with_report_on_shutdown(false),
    )
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
    let mut group = c.benchmark_group("alloc_free_cycle");
    let site = CallSite::caller();

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                // SAFETY: plain malloc/free pair on the host allocator.
                unsafe {
                    let p = libc::malloc(sz);
                    criterion::black_box(p);
                    libc::free(p);
                }
            });
        });
        for mode in [SafetyLevel::Off, SafetyLevel::Strict, SafetyLevel::Hardened] {
            let alloc = quiet(mode);
            let id = BenchmarkId::new(format!("ultramalloc_{}", mode.as_str()), size);
            group.bench_with_input(id, &size, |b, &sz| {
                b.iter(|| {
                    let p = alloc.allocate(sz, site).expect("allocation");
                    criterion::black_box(p);
                    // SAFETY: `p` was just returned by `alloc`.
                    unsafe { alloc.release(p.as_ptr(), site) }.expect("release");
                    alloc.clear_records();
                });
            });
        }
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");
    let site = CallSite::caller();

    group.bench_function("1000x64B", |b| {
        let alloc = quiet(SafetyLevel::Strict);
        b.iter(|| {
            let ptrs: Vec<_> = (0..1000)
                .map(|_| alloc.allocate(64, site).expect("allocation"))
                .collect();
            for p in ptrs.into_iter().rev() {
                // SAFETY: each pointer is released once.
                unsafe { alloc.release(p.as_ptr(), site) }.expect("release");
            }
            alloc.clear_records();
        });
    });

    group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("realloc_growth");
    let site = CallSite::caller();

    group.bench_function("16B_to_16KiB", |b| {
        let alloc = quiet(SafetyLevel::Strict);
        b.iter(|| {
            let mut p = alloc.allocate(16, site).expect("allocation").as_ptr();
            let mut size = 16;
            while size < 16 * 1024 {
                size *= 2;
                // SAFETY: `p` is live and replaced by the result.
                p = unsafe { alloc.reallocate(p, size, site) }
                    .expect("reallocation")
                    .as_ptr();
            }
            // SAFETY: final pointer released once.
            unsafe { alloc.release(p, site) }.expect("release");
            alloc.clear_records();
        });
    });

    group.finish();
}

fn bench_abi_malloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("abi_malloc_free");

    group.bench_function("64B", |b| {
        b.iter(|| {
            // SAFETY: pointer comes from ultramalloc_malloc and is freed once.
            unsafe {
                let p = ultramalloc_abi::ultramalloc_malloc(64, std::ptr::null(), 0);
                criterion::black_box(p);
                ultramalloc_abi::ultramalloc_free(p, std::ptr::null(), 0);
            }
            if let Some(alloc) = ultramalloc_core::lifecycle::global() {
                alloc.clear_records();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_realloc_growth,
    bench_abi_malloc_free
);
criterion_main!(benches);
