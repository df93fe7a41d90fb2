use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use lpnflow_core::{ActorId, ExpectedVersion, LocationId, LpnId, Sku};
use lpnflow_events::StreamId;
use lpnflow_infra::config::EngineConfig;
use lpnflow_infra::erp::LoggingErpAdapter;
use lpnflow_infra::event_store::{InMemoryEventLog, UncommittedEvent};
use lpnflow_infra::orchestration::{
    BatchTaskRequest, CountReport, TargetKind, TaskOrchestrationService,
};
use lpnflow_infra::repository::InMemoryRepository;
use lpnflow_inventory::{
    ContainerType, LpnCommand, LpnEvent, PhysicalAttributes, ReceiveUnit, UnitMadeAvailable,
};
use lpnflow_tasks::{TaskPriority, TaskType};
use tokio::runtime::Runtime;

type Service = TaskOrchestrationService<InMemoryRepository, LoggingErpAdapter>;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn actor() -> ActorId {
    ActorId::parse("bench").unwrap()
}

fn lpn(i: usize) -> LpnId {
    LpnId::parse(format!("LPN-{i:06}")).unwrap()
}

/// Service with `units` received units of one SKU, ERP pushes disabled.
async fn seeded_service(units: usize) -> Service {
    let config = EngineConfig {
        erp_enabled: false,
        ..EngineConfig::default()
    };
    let service = TaskOrchestrationService::new(
        InMemoryRepository::new(),
        LoggingErpAdapter::new("1"),
        config,
    );
    for i in 0..units {
        service
            .dispatch_unit_command(LpnCommand::Receive(ReceiveUnit {
                lpn_id: lpn(i),
                sku: Sku::parse("SKU-BENCH").unwrap(),
                quantity: 10,
                container_type: ContainerType::Pack,
                attributes: PhysicalAttributes::default(),
                location: LocationId::parse(format!("A-{:03}", i % 50)).unwrap(),
                origin_order: None,
                actor: actor(),
                occurred_at: Utc::now(),
            }))
            .await
            .unwrap();
    }
    service
}

fn sku_batch() -> BatchTaskRequest {
    BatchTaskRequest {
        targets: vec!["SKU-BENCH".to_string()],
        kind: TargetKind::Sku,
        task_type: TaskType::CycleCount,
        priority: TaskPriority::Normal,
        created_by: actor(),
    }
}

/// Batch creation latency: resolve, lock and commit N units in one unit of work.
fn bench_batch_creation(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("batch_creation");

    for units in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(units as u64));
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, &units| {
            b.iter_batched(
                || rt.block_on(seeded_service(units)),
                |service| {
                    let outcome = rt.block_on(service.create_batch_task(sku_batch())).unwrap();
                    black_box(outcome);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Full count cycle: every line reported, task settles and releases its units.
fn bench_count_settlement(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("count_settlement");

    for units in [10usize, 100] {
        group.throughput(Throughput::Elements(units as u64));
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, &units| {
            b.iter_batched(
                || {
                    rt.block_on(async {
                        let service = seeded_service(units).await;
                        let outcome = service.create_batch_task(sku_batch()).await.unwrap();
                        let task = service.get_task(outcome.task_id).await.unwrap();
                        let lines: Vec<_> = task.lines().iter().map(|l| l.id).collect();
                        (service, outcome.task_id, lines)
                    })
                },
                |(service, task_id, lines)| {
                    rt.block_on(async {
                        for line_id in lines {
                            service
                                .report_line_count(CountReport {
                                    task_id,
                                    line_id,
                                    counted: 10,
                                    actor: actor(),
                                    station: None,
                                })
                                .await
                                .unwrap();
                        }
                    });
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Raw append throughput of the in-memory event log.
fn bench_event_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append");

    for batch in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let stream = StreamId::new("inventory.lpn", "LPN-BENCH");
            let events: Vec<UncommittedEvent> = (0..batch)
                .map(|_| {
                    let event = LpnEvent::MadeAvailable(UnitMadeAvailable {
                        lpn_id: LpnId::parse("LPN-BENCH").unwrap(),
                        occurred_at: Utc::now(),
                    });
                    UncommittedEvent::from_typed(&stream, &event).unwrap()
                })
                .collect();

            b.iter_batched(
                || (InMemoryEventLog::new(), events.clone()),
                |(mut log, events)| {
                    let committed = log
                        .append(&stream, events, ExpectedVersion::NoStream)
                        .unwrap();
                    black_box(committed);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_batch_creation,
    bench_count_settlement,
    bench_event_append
);
criterion_main!(benches);
