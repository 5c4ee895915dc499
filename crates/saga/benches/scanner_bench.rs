use broker::{InMemoryBroker, MessageBroker};
use common::{CorrelationKey, Money};
use criterion::{Criterion, criterion_group, criterion_main};
use ledger::{InMemoryLedger, Ledger, ParentRecord};
use saga::{
    RetryPolicy, SagaScanner, ScanBuffer, ScanConfig, ScanTarget, StageConfig, StageRequest,
    WorkItem,
};
use tokio_util::sync::CancellationToken;

fn make_item(key: usize) -> WorkItem {
    let parent = ParentRecord::pending(
        CorrelationKey::from(key as u64),
        "ada@example.com",
        "u-1",
        Money::from_cents(1299),
    )
    .with_item("SKU-1", "Widget");
    WorkItem::from_parent(&parent, "order-confirmation")
}

fn bench_classify_200(c: &mut Criterion) {
    let payloads: Vec<Vec<u8>> = (0..200).map(|k| make_item(k).encode().unwrap()).collect();

    c.bench_function("scan/classify_200_no_match", |b| {
        b.iter(|| {
            let mut buffer = ScanBuffer::new(ScanTarget::key("missing"));
            for p in &payloads {
                buffer.offer(p);
            }
            buffer.drain()
        });
    });
}

fn bench_not_found_scan_200(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let broker = InMemoryBroker::new();

    // Pre-populate with 200 pending work items
    rt.block_on(async {
        broker.declare_queue("OrderQueue").await.unwrap();
        for k in 0..200 {
            broker
                .publish("OrderQueue", &make_item(k).encode().unwrap())
                .await
                .unwrap();
        }
    });

    let scanner = SagaScanner::new(
        broker,
        InMemoryLedger::new(),
        StageConfig::order_confirmation("OrderQueue", "ShippingQueue"),
        RetryPolicy::none(),
        ScanConfig { timeout: None },
    );
    let request = StageRequest::new(ScanTarget::key("missing"));
    let cancel = CancellationToken::new();

    c.bench_function("scan/not_found_200", |b| {
        b.iter(|| {
            rt.block_on(async { scanner.confirm(&request, &cancel).await.unwrap() });
        });
    });
}

fn bench_confirm_last_of_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("scan/confirm_last_of_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let broker = InMemoryBroker::new();
                let ledger = InMemoryLedger::new();
                broker.declare_queue("OrderQueue").await.unwrap();
                for k in 0..100 {
                    let item = make_item(k);
                    ledger
                        .create_with_shadow(item.to_parent(), "placement")
                        .await
                        .unwrap();
                    broker
                        .publish("OrderQueue", &item.encode().unwrap())
                        .await
                        .unwrap();
                }

                let scanner = SagaScanner::new(
                    broker,
                    ledger,
                    StageConfig::order_confirmation("OrderQueue", "ShippingQueue"),
                    RetryPolicy::none(),
                    ScanConfig { timeout: None },
                );
                scanner
                    .confirm(
                        &StageRequest::new(ScanTarget::key(99_u64)),
                        &CancellationToken::new(),
                    )
                    .await
                    .unwrap()
            });
        });
    });
}

criterion_group!(
    benches,
    bench_classify_200,
    bench_not_found_scan_200,
    bench_confirm_last_of_100
);
criterion_main!(benches);
