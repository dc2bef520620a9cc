//! Criterion benchmarks for hot paths in the collabd daemon.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - JSON-RPC request parsing (serde_json)
//!   - Authorization decision functions (pure, snapshot-based)
//!   - Fan-out subscriber snapshot + delivery

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::Value;

use collabd::authz;
use collabd::events::DomainEvent;
use collabd::identity::ActorId;
use collabd::membership::{ProjectAccess, ProjectId, Role};
use collabd::rooms::{dispatch::EventDispatcher, Channel, ConnectionId, RoomRegistry};

// ─── JSON-RPC parsing ────────────────────────────────────────────────────────

static TASK_CREATE: &str = r#"{
    "jsonrpc": "2.0",
    "id": 42,
    "method": "task.create",
    "params": {
        "projectId": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
        "title": "Wire up the review flow",
        "priority": "high",
        "assigneeId": "bob"
    }
}"#;

fn bench_rpc_parse(c: &mut Criterion) {
    c.bench_function("rpc_parse_task_create", |b| {
        b.iter(|| {
            let v: Value = serde_json::from_str(black_box(TASK_CREATE)).unwrap();
            black_box(v);
        });
    });
}

// ─── Authorization decisions ─────────────────────────────────────────────────

fn bench_authz(c: &mut Criterion) {
    let member = ProjectAccess {
        is_owner: false,
        role: Some(Role::Member),
    };
    let outsider = ProjectAccess::NONE;
    let carol = ActorId::from("carol");
    let dave = ActorId::from("dave");

    c.bench_function("authz_project_read", |b| {
        b.iter(|| {
            black_box(authz::project::read(black_box(member)));
            black_box(authz::project::read(black_box(outsider)));
        });
    });

    c.bench_function("authz_comment_delete_three_paths", |b| {
        b.iter(|| {
            black_box(authz::comment::delete(
                black_box(&carol),
                black_box(&carol),
                black_box(outsider),
            ));
            black_box(authz::comment::delete(
                black_box(&dave),
                black_box(&carol),
                black_box(member),
            ));
        });
    });
}

// ─── Fan-out ─────────────────────────────────────────────────────────────────

fn bench_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let registry = std::sync::Arc::new(RoomRegistry::new());
    let dispatcher = EventDispatcher::new(registry.clone());
    let project = ProjectId::from("p1");
    let mut receivers = Vec::new();

    rt.block_on(async {
        for i in 0..100 {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            receivers.push(rx);
            registry
                .connect(
                    ConnectionId::generate(),
                    ActorId::new(format!("user-{i}")),
                    tx,
                    std::slice::from_ref(&project),
                )
                .await;
        }
    });

    let scope = Channel::Project(project);
    let event = DomainEvent::TaskCreated {
        task: serde_json::json!({ "id": "t1", "projectId": "p1", "title": "bench" }),
    };

    c.bench_function("fanout_publish_100_subscribers", |b| {
        b.iter(|| {
            let delivered = rt.block_on(dispatcher.publish(black_box(&scope), black_box(&event)));
            black_box(delivered);
            // Drain so queues don't grow across iterations.
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
        });
    });
}

criterion_group!(benches, bench_rpc_parse, bench_authz, bench_fanout);
criterion_main!(benches);
