//! Benchmark: resolution hot path (cache hit vs construction)

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use lattice_di::{Binding, Container, Injectable, Key, Scope, ScopeRegistry, Store, Type, instance};

// Benchmark fixture: leaf of a dependency chain
struct Link;

fn chain(depth: usize, scope: Scope) -> Vec<Injectable> {
	(0..depth)
		.map(|index| {
			let mut builder = Injectable::builder(
				Type::of::<Link>(),
				lattice_di::Discriminator::Named(format!("link{index}").into()),
			)
			.qualifier(format!("l{index}"))
			.scope(scope.clone());
			if index + 1 < depth {
				builder =
					builder.binding(Binding::required(Key::of::<Link>().qualified(format!("l{}", index + 1))));
			}
			builder.build(|_| Ok(instance(Link))).unwrap()
		})
		.collect()
}

fn benchmark_singleton_cache_hit(c: &mut Criterion) {
	let container = Container::new();
	container
		.register_injectables(&chain(1, Scope::SINGLETON))
		.unwrap();
	let key = Key::of::<Link>().qualified("l0");
	container.get_instance(&key).unwrap();

	c.bench_function("singleton_cache_hit", |b| {
		b.iter(|| black_box(container.get_instance(black_box(&key)).unwrap()));
	});
}

fn benchmark_dependent_chain(c: &mut Criterion) {
	let mut group = c.benchmark_group("dependent_chain");
	for depth in [1usize, 8, 32] {
		let container = Container::new();
		container
			.register_injectables(&chain(depth, Scope::DEPENDENT))
			.unwrap();
		let key = Key::of::<Link>().qualified("l0");
		group.bench_with_input(BenchmarkId::from_parameter(depth), &key, |b, key| {
			b.iter(|| {
				let value = container.get_instance(key).unwrap();
				container.destroy_instance(&value);
			});
		});
	}
	group.finish();
}

fn benchmark_store_put_remove(c: &mut Criterion) {
	let scopes = ScopeRegistry::new();
	let batch = chain(32, Scope::DEPENDENT);

	c.bench_function("store_put_remove_32", |b| {
		b.iter(|| {
			let mut store = Store::new();
			store.put(black_box(&batch), &scopes).unwrap();
			store.remove(&batch).unwrap();
		});
	});
}

criterion_group!(
	benches,
	benchmark_singleton_cache_hit,
	benchmark_dependent_chain,
	benchmark_store_put_remove
);
criterion_main!(benches);
