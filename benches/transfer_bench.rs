use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use minibank::storage::{DurableStore, InMemoryStore};
use minibank::{AccountQueries, ExecutionMode, LedgerRepository, TransferOrchestrator};
use minibank_core::{Account, AccountStatus, Currency, TransferRequest};
use minibank_sqlite::SqliteStore;
use rust_decimal_macros::dec;

fn setup(store: Arc<dyn DurableStore>) -> Arc<LedgerRepository> {
    for account_id in 1..=100 {
        store
            .provision_account(&Account {
                account_id,
                currency: Currency::Gbp,
                balance: dec!(1000000000.00),
                status: AccountStatus::Active,
            })
            .unwrap();
    }
    let repository = Arc::new(LedgerRepository::new(store));
    repository.warm_up().unwrap();
    repository
}

fn bench_cached_reads(c: &mut Criterion) {
    let repository = setup(Arc::new(InMemoryStore::new()));
    let queries = AccountQueries::new(repository.clone());

    c.bench_function("cached_account_balance", |b| {
        b.iter(|| queries.account_balance(black_box(42)).unwrap())
    });
    c.bench_function("cached_list_accounts", |b| {
        b.iter(|| queries.list_accounts().unwrap())
    });
}

fn bench_transfers(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer");

    for (name, store) in [
        ("memory", Arc::new(InMemoryStore::new()) as Arc<dyn DurableStore>),
        ("sqlite", Arc::new(SqliteStore::new(":memory:").unwrap()) as Arc<dyn DurableStore>),
    ] {
        let orchestrator = TransferOrchestrator::new(setup(store), ExecutionMode::Serialized);
        let mut n: u64 = 0;
        group.bench_function(name, |b| {
            b.iter(|| {
                n += 1;
                let request = TransferRequest {
                    sender: (n % 100 + 1) as i64,
                    receiver: ((n + 1) % 100 + 1) as i64,
                    amount: dec!(0.01),
                    currency: Currency::Gbp,
                    idempotency_key: format!("{}-{}", name, n),
                    reference_id: "bench".to_string(),
                };
                orchestrator.transfer(black_box(&request)).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cached_reads, bench_transfers);
criterion_main!(benches);
