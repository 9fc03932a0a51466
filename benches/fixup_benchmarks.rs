//! Performance benchmarks for relationship fixup
//!
//! These benchmarks measure:
//! - Bulk attach of parents and children arriving in either order
//! - Foreign key rewrites that move children between parents
//! - Parent key changes propagating to many children
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use entity_cache::{
    cache::EntityGraph,
    metadata::{Association, AutoGeneratedKeyType, EntityTypeBuilder, MetadataStore},
    properties::{DataType, EntityId, ManagerId},
    state::EntityState,
};
use std::sync::Arc;

const PARENTS: i32 = 100;
const CHILDREN_PER_PARENT: i32 = 20;

fn metadata() -> Arc<MetadataStore> {
    let metadata = MetadataStore::builder()
        .entity_type(
            EntityTypeBuilder::new("Customer")
                .key("customerID", DataType::Int32)
                .auto_generated(AutoGeneratedKeyType::Identity),
        )
        .entity_type(
            EntityTypeBuilder::new("Order")
                .key("orderID", DataType::Int32)
                .auto_generated(AutoGeneratedKeyType::Identity)
                .nullable("customerID", DataType::Int32),
        )
        .association(
            Association::new("Customer_Orders", "Customer", "Order", ["customerID"])
                .parent_navigation("orders")
                .child_navigation("customer"),
        )
        .build()
        .unwrap();
    Arc::new(metadata)
}

fn attach_parents(graph: &mut EntityGraph, cache: ManagerId) -> Vec<EntityId> {
    (1..=PARENTS)
        .map(|p| {
            graph
                .create_attached(
                    cache,
                    "Customer",
                    vec![("customerID", p.into())],
                    EntityState::Unchanged,
                )
                .unwrap()
        })
        .collect()
}

fn attach_children(graph: &mut EntityGraph, cache: ManagerId) -> Vec<EntityId> {
    (0..PARENTS * CHILDREN_PER_PARENT)
        .map(|o| {
            graph
                .create_attached(
                    cache,
                    "Order",
                    vec![
                        ("orderID", (o + 1).into()),
                        ("customerID", (o % PARENTS + 1).into()),
                    ],
                    EntityState::Unchanged,
                )
                .unwrap()
        })
        .collect()
}

fn loaded_graph() -> (EntityGraph, ManagerId, Vec<EntityId>, Vec<EntityId>) {
    let mut graph = EntityGraph::new(metadata());
    let cache = graph.new_manager();
    let parents = attach_parents(&mut graph, cache);
    let children = attach_children(&mut graph, cache);
    (graph, cache, parents, children)
}

// Benchmark: parents first, every child links on arrival
fn bench_attach_parents_first(c: &mut Criterion) {
    c.bench_function("attach_parents_first", |b| {
        b.iter(|| {
            let mut graph = EntityGraph::new(metadata());
            let cache = graph.new_manager();
            attach_parents(&mut graph, cache);
            black_box(attach_children(&mut graph, cache));
        })
    });
}

// Benchmark: children first, every parent resolves its pending children
fn bench_attach_children_first(c: &mut Criterion) {
    c.bench_function("attach_children_first", |b| {
        b.iter(|| {
            let mut graph = EntityGraph::new(metadata());
            let cache = graph.new_manager();
            attach_children(&mut graph, cache);
            black_box(attach_parents(&mut graph, cache));
        })
    });
}

// Benchmark: rewrite every child's foreign key to the next parent
fn bench_foreign_key_moves(c: &mut Criterion) {
    c.bench_function("foreign_key_moves", |b| {
        b.iter_batched(
            loaded_graph,
            |(mut graph, _, _, children)| {
                for (i, child) in children.iter().enumerate() {
                    let target = (i as i32 + 1) % PARENTS + 1;
                    graph.set_value(*child, "customerID", target).unwrap();
                }
                black_box(graph)
            },
            BatchSize::LargeInput,
        )
    });
}

// Benchmark: change every parent key, re-pointing all of its children
fn bench_key_propagation(c: &mut Criterion) {
    c.bench_function("key_propagation", |b| {
        b.iter_batched(
            loaded_graph,
            |(mut graph, _, parents, _)| {
                for (i, parent) in parents.iter().enumerate() {
                    graph
                        .set_value(*parent, "customerID", 10_000 + i as i32)
                        .unwrap();
                }
                black_box(graph)
            },
            BatchSize::LargeInput,
        )
    });
}

// Benchmark: detach and re-attach a whole cache
fn bench_clear_and_reload(c: &mut Criterion) {
    c.bench_function("clear_and_reload", |b| {
        b.iter_batched(
            loaded_graph,
            |(mut graph, cache, parents, children)| {
                graph.clear(cache).unwrap();
                for id in parents.iter().chain(children.iter()) {
                    graph
                        .attach_entity(cache, *id, EntityState::Unchanged)
                        .unwrap();
                }
                black_box(graph)
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(
    benches,
    bench_attach_parents_first,
    bench_attach_children_first,
    bench_foreign_key_moves,
    bench_key_propagation,
    bench_clear_and_reload
);
criterion_main!(benches);
