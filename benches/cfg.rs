//! Build/linearize throughput over synthetic method bodies.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dexflow::ir::{BranchTarget, Instruction, Item, ItemList, Opcode};
use dexflow::ControlFlowGraph;

/// A ladder of `n` conditional rungs: `n` blocks of a constant load plus a
/// conditional branch to the next rung.
fn ladder(n: usize) -> ItemList {
    let mut ir = ItemList::new();
    for _ in 0..n {
        let cond = Instruction::new(Opcode::IfEqz).with_srcs(vec![0]);
        let cond_id = cond.id();
        ir.push(Item::Insn(Instruction::new(Opcode::Const).with_dest(0)));
        ir.push(Item::Insn(cond));
        ir.push(Item::Target(BranchTarget {
            branch: cond_id,
            case_key: None,
        }));
    }
    ir.push(Item::Insn(Instruction::new(Opcode::ReturnVoid)));
    ir
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for size in [64, 512, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || ladder(size),
                |ir| ControlFlowGraph::build(black_box(ir), 1).unwrap(),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_linearize");
    for size in [64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || ladder(size),
                |ir| {
                    let cfg = ControlFlowGraph::build(black_box(ir), 1).unwrap();
                    black_box(cfg.linearize())
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_dominators(c: &mut Criterion) {
    let cfg = ControlFlowGraph::build(ladder(1024), 1).unwrap();
    c.bench_function("immediate_dominators/1024", |b| {
        b.iter(|| black_box(cfg.immediate_dominators()));
    });
}

criterion_group!(benches, bench_build, bench_roundtrip, bench_dominators);
criterion_main!(benches);
