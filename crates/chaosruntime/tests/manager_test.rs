mod common;

use chaoscore::{
    BranchCondition, ConditionalBranch, EngineError, Event, EventBus, EventType, FaultSpec,
    NodePhase, Repository, Template, TemplateKind, WorkflowNotification, WorkflowPhase,
    WorkflowSpec, WorkflowStatus,
};
use chaosruntime::scheduler::is_no_need_schedule;
use chaosruntime::statemachine::allowed_transitions;
use chaosruntime::{
    ChaosRuntime, FailurePolicy, InMemoryRepository, RuntimeConfig, SequentialNameGenerator,
    Trigger, WorkflowManager,
};
use common::{drain, init_tracing, Call, RecordingPlayground};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn runtime_with(playground: &Arc<RecordingPlayground>, config: RuntimeConfig) -> ChaosRuntime {
    ChaosRuntime::builder(playground.clone())
        .config(config)
        .name_generator(Arc::new(SequentialNameGenerator::new()))
        .build()
        .unwrap()
}

async fn started(playground: &Arc<RecordingPlayground>) -> ChaosRuntime {
    init_tracing();
    let runtime = runtime_with(playground, RuntimeConfig::default());
    runtime.start().await;
    runtime
}

fn manager_for(repo: &Arc<InMemoryRepository>, playground: &Arc<RecordingPlayground>, config: RuntimeConfig) -> WorkflowManager {
    WorkflowManager::builder(repo.clone(), playground.clone())
        .config(config)
        .name_generator(Arc::new(SequentialNameGenerator::new()))
        .build()
        .unwrap()
}

fn phase_changes(seen: &[WorkflowNotification]) -> Vec<(String, NodePhase, NodePhase)> {
    seen.iter()
        .filter_map(|n| match n {
            WorkflowNotification::NodePhaseChanged { node, from, to, .. } => {
                Some((node.clone(), *from, *to))
            }
            _ => None,
        })
        .collect()
}

fn created(seen: &[WorkflowNotification]) -> Vec<(String, String, TemplateKind)> {
    seen.iter()
        .filter_map(|n| match n {
            WorkflowNotification::NodeCreated { node, template, kind, .. } => {
                Some((node.clone(), template.clone(), *kind))
            }
            _ => None,
        })
        .collect()
}

fn position(seen: &[WorkflowNotification], wanted: impl Fn(&WorkflowNotification) -> bool) -> usize {
    seen.iter().position(wanted).unwrap()
}

async fn wait_phase(repo: &InMemoryRepository, workflow: &str, phase: WorkflowPhase) -> WorkflowStatus {
    tokio::time::timeout(WAIT, async {
        loop {
            let status = repo.status(workflow).await.unwrap();
            if status.phase == phase {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_singleton_chaos() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;
    let mut rx = runtime.subscribe();

    let spec = WorkflowSpec::new("s1", "e").with_template(Template::chaos(
        "e",
        FaultSpec::new("log"),
        Duration::from_millis(50),
    ));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("s1", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Succeed);
    assert_eq!(
        phase_changes(&drain(&mut rx)),
        vec![
            ("e-0000".to_string(), NodePhase::Init, NodePhase::Running),
            ("e-0000".to_string(), NodePhase::Running, NodePhase::Holding),
            ("e-0000".to_string(), NodePhase::Holding, NodePhase::Succeed),
        ]
    );
    assert_eq!(playground.injects_for("e-0000"), 1);
    assert_eq!(playground.reverts_for("e-0000"), 1);
    assert!(matches!(
        &playground.calls()[1],
        Call::Revert { target: chaoscore::RevertTarget::Injection(id), .. } if id == "e-0000-ref"
    ));
    assert!(status.leaked_injections().is_empty());

    // the same NodeCreated again changes nothing
    let revision = runtime.repository().revision("s1").await.unwrap();
    for event_type in [EventType::NodeCreated, EventType::NodeHoldingAwake] {
        runtime
            .manager()
            .consume(&Event::new("s1", "e-0000", event_type))
            .await
            .unwrap();
    }
    assert_eq!(playground.calls().len(), 2);
    assert_eq!(runtime.repository().revision("s1").await.unwrap(), revision);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_serial_of_suspends() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;
    let mut rx = runtime.subscribe();

    let spec = WorkflowSpec::new("s2", "s")
        .with_template(Template::serial("s", ["a", "b", "c"]))
        .with_template(Template::suspend("a", Duration::from_millis(10)))
        .with_template(Template::suspend("b", Duration::from_millis(10)))
        .with_template(Template::suspend("c", Duration::from_millis(10)));

    let start = Instant::now();
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("s2", WAIT).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(status.phase, WorkflowPhase::Succeed);

    let seen = drain(&mut rx);
    let templates: Vec<String> = created(&seen).into_iter().map(|(_, t, _)| t).collect();
    assert_eq!(templates, vec!["s", "a", "b", "c"]);

    // each child starts only after the previous one finished
    for (done, next) in [("a-0001", "b-0002"), ("b-0002", "c-0003")] {
        let finished = position(&seen, |n| {
            matches!(n, WorkflowNotification::NodePhaseChanged { node, to: NodePhase::Succeed, .. } if node == done)
        });
        let started = position(&seen, |n| {
            matches!(n, WorkflowNotification::NodeCreated { node, .. } if node == next)
        });
        assert!(finished < started, "{} started before {} finished", next, done);
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_serial_with_repeated_template() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("s3", "s")
        .with_template(Template::serial("s", ["x", "x"]))
        .with_template(Template::suspend("x", Duration::from_millis(5)));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("s3", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Succeed);
    let children = status.tree.children("s-0000").unwrap();
    assert_eq!(children, &["x-0001".to_string(), "x-0002".to_string()][..]);
    for child in children {
        let node = status.node_by_name(child).unwrap();
        assert_eq!(node.template_name, "x");
        assert_eq!(node.phase, NodePhase::Succeed);
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_parallel_fan_out() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;
    let mut rx = runtime.subscribe();

    let spec = WorkflowSpec::new("s4", "p")
        .with_template(Template::parallel("p", ["a", "b", "c"]))
        .with_template(Template::suspend("a", Duration::from_millis(10)))
        .with_template(Template::suspend("b", Duration::from_millis(10)))
        .with_template(Template::suspend("c", Duration::from_millis(10)));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("s4", WAIT).await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Succeed);

    let seen = drain(&mut rx);
    let first_child = position(&seen, |n| {
        matches!(n, WorkflowNotification::NodeCreated { parent: Some(_), .. })
    });
    // all three exist before any of them moves
    for (offset, name) in ["a-0001", "b-0002", "c-0003"].iter().enumerate() {
        assert!(matches!(
            &seen[first_child + offset],
            WorkflowNotification::NodeCreated { node, .. } if node == name
        ));
    }

    let changes = phase_changes(&seen);
    assert_eq!(
        changes.last().unwrap(),
        &("p-0000".to_string(), NodePhase::WaitingForChild, NodePhase::Succeed)
    );
    assert_eq!(changes.iter().filter(|(n, _, _)| n == "p-0000").count(), 2);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failed_injection_fails_the_workflow() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("s5", "main")
        .with_template(Template::serial("main", ["boom", "after"]))
        .with_template(Template::chaos("boom", FaultSpec::new("fail"), Duration::from_millis(10)))
        .with_template(Template::suspend("after", Duration::from_millis(1)));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("s5", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Failed);
    let boom = status.node_by_name("boom-0001").unwrap();
    assert_eq!(boom.phase, NodePhase::Failed);
    assert!(boom.reason.as_deref().unwrap().contains("boom-0001 refused"));

    let entry = status.entry().unwrap();
    assert_eq!(entry.phase, NodePhase::Failed);
    assert_eq!(entry.reason.as_deref(), Some("child node boom-0001 failed"));
    assert_eq!(status.reason, entry.reason);

    assert_eq!(playground.injects_for("boom-0001"), 1);
    assert_eq!(playground.reverts_for("boom-0001"), 0);
    assert!(!status.tree_node("main-0000").unwrap().contains_template("after"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_deadline_fails_a_running_workflow() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("slow", "pause")
        .with_template(Template::suspend("pause", Duration::from_secs(10)))
        .with_deadline(Duration::from_millis(50));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("slow", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.reason.as_deref(), Some("deadline exceeded"));
    let entry = status.entry().unwrap();
    assert_eq!(entry.phase, NodePhase::Failed);
    assert_eq!(entry.reason.as_deref(), Some("deadline exceeded"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_deadline_stops_the_tree_and_reverts_held_faults() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;
    let mut rx = runtime.subscribe();

    let spec = WorkflowSpec::new("cut", "main")
        .with_template(Template::serial("main", ["fan", "after"]))
        .with_template(Template::parallel("fan", ["hold", "pause"]))
        .with_template(Template::chaos("hold", FaultSpec::new("log"), Duration::from_secs(10)))
        .with_template(Template::suspend("pause", Duration::from_secs(10)))
        .with_template(Template::suspend("after", Duration::from_millis(1)))
        .with_deadline(Duration::from_millis(80));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("cut", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.nodes.len(), 4);
    for node in status.nodes.values() {
        assert_eq!(node.phase, NodePhase::Failed, "{} still {}", node.name, node.phase);
        assert_eq!(node.reason.as_deref(), Some("deadline exceeded"));
    }
    assert_eq!(playground.injects_for("hold-0002"), 1);
    assert_eq!(playground.reverts_for("hold-0002"), 1);
    assert!(status.leaked_injections().is_empty());
    assert!(!status.nodes.values().any(|n| n.template_name == "after"));

    // every node leaves the tree through an allowed move, before the workflow does
    let seen = drain(&mut rx);
    for (node, from, to) in phase_changes(&seen) {
        let kind = status.node_by_name(&node).unwrap().kind;
        assert!(allowed_transitions(kind).contains(&(from, to)), "{} moved {} -> {}", node, from, to);
    }
    let last_node_change = seen
        .iter()
        .rposition(|n| matches!(n, WorkflowNotification::NodePhaseChanged { .. }))
        .unwrap();
    let workflow_failed = position(&seen, |n| {
        matches!(n, WorkflowNotification::WorkflowPhaseChanged { to: WorkflowPhase::Failed, .. })
    });
    assert!(last_node_change < workflow_failed);

    // nothing moves once the workflow is cancelled
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.status("cut").await.unwrap(), status);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_abort_cancels_a_running_workflow() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("stop", "fan")
        .with_template(Template::parallel("fan", ["hold", "pause"]))
        .with_template(Template::chaos("hold", FaultSpec::new("log"), Duration::from_secs(10)))
        .with_template(Template::suspend("pause", Duration::from_secs(10)));
    runtime.submit(spec).await.unwrap();

    let holding = tokio::time::timeout(WAIT, async {
        loop {
            let status = runtime.status("stop").await.unwrap();
            if status.node_by_name("hold-0001").map(|n| n.phase) == Some(NodePhase::Holding) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    holding.await.unwrap();

    runtime.abort("stop").unwrap();
    let status = runtime.wait_for("stop", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.reason.as_deref(), Some("aborted"));
    assert!(status.nodes.values().all(|n| n.phase == NodePhase::Failed));
    assert_eq!(playground.reverts_for("hold-0001"), 1);
    assert!(status.leaked_injections().is_empty());

    // a second abort is a no-op
    runtime.abort("stop").unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(playground.reverts_for("hold-0001"), 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_deadline_after_success_is_harmless() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("quick", "pause")
        .with_template(Template::suspend("pause", Duration::from_millis(1)))
        .with_deadline(Duration::from_millis(30));
    runtime.submit(spec).await.unwrap();
    assert_eq!(runtime.wait_for("quick", WAIT).await.unwrap().phase, WorkflowPhase::Succeed);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let status = runtime.status("quick").await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Succeed);
    assert_eq!(status.reason, None);

    runtime.shutdown().await;
}

fn fan_spec(name: &str, slow: Duration) -> WorkflowSpec {
    WorkflowSpec::new(name, "fan")
        .with_template(Template::parallel("fan", ["slow", "boom"]))
        .with_template(Template::suspend("slow", slow))
        .with_template(Template::chaos("boom", FaultSpec::new("fail"), Duration::from_millis(10)))
}

#[tokio::test]
async fn test_fail_fast_does_not_wait_for_siblings() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    runtime.submit(fan_spec("ff", Duration::from_millis(500))).await.unwrap();
    let status = runtime.wait_for("ff", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.node_by_name("slow-0001").unwrap().phase, NodePhase::Holding);
    assert_eq!(
        status.entry().unwrap().reason.as_deref(),
        Some("child node boom-0002 failed")
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_wait_for_all_lets_siblings_finish() {
    init_tracing();
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = runtime_with(
        &playground,
        RuntimeConfig {
            failure_policy: FailurePolicy::WaitForAll,
            ..Default::default()
        },
    );
    runtime.start().await;

    runtime.submit(fan_spec("wfa", Duration::from_millis(50))).await.unwrap();
    let status = runtime.wait_for("wfa", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.node_by_name("slow-0001").unwrap().phase, NodePhase::Succeed);
    assert_eq!(status.node_by_name("boom-0002").unwrap().phase, NodePhase::Failed);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_held_fault_is_reverted_after_the_workflow_failed() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("held", "fan")
        .with_template(Template::parallel("fan", ["hold", "boom"]))
        .with_template(Template::chaos("hold", FaultSpec::new("log"), Duration::from_millis(60)))
        .with_template(Template::chaos("boom", FaultSpec::new("fail"), Duration::from_millis(10)));
    runtime.submit(spec).await.unwrap();

    let status = runtime.wait_for("held", WAIT).await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.node_by_name("hold-0001").unwrap().phase, NodePhase::Holding);
    assert_eq!(status.leaked_injections().len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = runtime.status("held").await.unwrap();
    assert_eq!(status.node_by_name("hold-0001").unwrap().phase, NodePhase::Succeed);
    assert_eq!(playground.reverts_for("hold-0001"), 1);
    assert!(status.leaked_injections().is_empty());
    assert_eq!(status.phase, WorkflowPhase::Failed);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_fault_injected_after_the_workflow_failed_is_reverted() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("late", "fan")
        .with_template(Template::parallel("fan", ["boom", "seq"]))
        .with_template(Template::chaos("boom", FaultSpec::new("fail"), Duration::from_millis(10)))
        .with_template(Template::serial("seq", ["x"]))
        .with_template(Template::chaos("x", FaultSpec::new("log"), Duration::from_millis(20)));
    runtime.submit(spec).await.unwrap();

    let status = runtime.wait_for("late", WAIT).await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Failed);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = runtime.status("late").await.unwrap();
    let x = status.nodes.values().find(|n| n.template_name == "x").unwrap();
    assert_eq!(x.phase, NodePhase::Succeed);
    assert_eq!(playground.injects_for(&x.name), 1);
    assert_eq!(playground.reverts_for(&x.name), 1);
    assert!(status.leaked_injections().is_empty());
    assert_eq!(status.phase, WorkflowPhase::Failed);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failed_revert_is_left_for_garbage_collection() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("stuck", "e").with_template(Template::chaos(
        "e",
        FaultSpec::new("stuck"),
        Duration::from_millis(10),
    ));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("stuck", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Succeed);
    let entry = status.entry().unwrap();
    assert_eq!(entry.phase, NodePhase::Succeed);
    assert_eq!(playground.reverts_for("e-0000"), 1);

    let leaked = status.leaked_injections();
    assert_eq!(leaked.len(), 1);
    assert_eq!(leaked[0].name, "e-0000");
    assert_eq!(leaked[0].injection(), Some("e-0000-ref"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_task_runs_only_chosen_branches() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let spec = WorkflowSpec::new("task", "pick")
        .with_param("environment", "staging")
        .with_template(
            Template::task("pick", ["prod", "stage"])
                .with_branch(ConditionalBranch::new(
                    "prod",
                    BranchCondition::Equals {
                        param: "environment".to_string(),
                        value: json!("production"),
                    },
                ))
                .with_branch(ConditionalBranch::new(
                    "stage",
                    BranchCondition::Equals {
                        param: "environment".to_string(),
                        value: json!("staging"),
                    },
                )),
        )
        .with_template(Template::chaos("prod", FaultSpec::new("log"), Duration::from_millis(5)))
        .with_template(Template::suspend("stage", Duration::from_millis(5)));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("task", WAIT).await.unwrap();

    assert_eq!(status.phase, WorkflowPhase::Succeed);
    let entry = status.entry().unwrap();
    assert_eq!(entry.task_branches(), Some(&["stage".to_string()][..]));
    let tree_node = status.tree_node(&entry.name).unwrap();
    assert_eq!(tree_node.len(), 1);
    assert!(tree_node.contains_template("stage"));
    assert!(playground.calls().is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_phases_only_move_forward_and_tree_is_consistent() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;
    let mut rx = runtime.subscribe();

    let spec = WorkflowSpec::new("mixed", "main")
        .with_template(Template::serial("main", ["fan", "pick", "pause"]))
        .with_template(Template::parallel("fan", ["fault", "pause", "empty"]))
        .with_template(Template::task("pick", ["fault", "pause"]))
        .with_template(Template::serial("empty", Vec::<String>::new()))
        .with_template(Template::chaos("fault", FaultSpec::new("log"), Duration::from_millis(15)))
        .with_template(Template::suspend("pause", Duration::from_millis(5)));
    runtime.submit(spec).await.unwrap();
    let status = runtime.wait_for("mixed", WAIT).await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Succeed);

    let seen = drain(&mut rx);
    let kinds: HashMap<String, TemplateKind> = created(&seen)
        .into_iter()
        .map(|(node, _, kind)| (node, kind))
        .collect();
    assert_eq!(kinds.len(), status.nodes.len());

    let mut current: HashMap<String, NodePhase> = HashMap::new();
    for (node, from, to) in phase_changes(&seen) {
        let kind = kinds[&node];
        assert!(
            allowed_transitions(kind).contains(&(from, to)),
            "{} ({}) moved {} -> {}",
            node,
            kind,
            from,
            to
        );
        let previous = current.insert(node.clone(), to).unwrap_or(NodePhase::Init);
        assert_eq!(previous, from, "{} skipped a phase", node);
    }

    for node in status.nodes.values() {
        assert_eq!(node.phase, NodePhase::Succeed, "{} did not finish", node.name);
        match &node.parent {
            Some(parent) => {
                assert!(status.tree.children(parent).unwrap().contains(&node.name));
            }
            None => assert_eq!(status.entry_node.as_deref(), Some(node.name.as_str())),
        }
    }
    let fault_nodes = status.nodes.values().filter(|n| n.kind == TemplateKind::Chaos).count();
    assert_eq!(fault_nodes, 2);
    assert_eq!(
        playground.calls().len(),
        2 * fault_nodes,
        "every fault injected and reverted exactly once"
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_suspend_never_wakes_early() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;
    let mut rx = runtime.subscribe();

    let spec = WorkflowSpec::new("nap", "pause")
        .with_template(Template::suspend("pause", Duration::from_millis(40)));
    runtime.submit(spec).await.unwrap();
    runtime.wait_for("nap", WAIT).await.unwrap();

    let stamps: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|n| match n {
            WorkflowNotification::NodePhaseChanged { to, timestamp, .. } => Some((to, timestamp)),
            _ => None,
        })
        .collect();
    let held = stamps.iter().find(|(to, _)| *to == NodePhase::Holding).unwrap().1;
    let woke = stamps.iter().find(|(to, _)| *to == NodePhase::Succeed).unwrap().1;
    assert!(woke - held >= chrono::Duration::milliseconds(40));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_submit_rejects_invalid_specs() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    let err = runtime
        .submit(WorkflowSpec::new("nothing", "main"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Workflow(_)));
    assert!(runtime.status("nothing").await.is_err());

    let err = runtime.wait_for("nothing", Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(err, EngineError::Repo(_)));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_wait_for_times_out() {
    let playground = Arc::new(RecordingPlayground::new());
    let runtime = started(&playground).await;

    runtime
        .submit(WorkflowSpec::new("long", "pause").with_template(Template::suspend("pause", Duration::from_secs(10))))
        .await
        .unwrap();
    let err = runtime.wait_for("long", Duration::from_millis(30)).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));

    runtime.shutdown().await;
}

// Driving the manager directly, without the controller

async fn registered(spec: WorkflowSpec) -> Arc<InMemoryRepository> {
    let repo = Arc::new(InMemoryRepository::new(EventBus::new(64)));
    repo.register_workflow(spec).await.unwrap();
    repo
}

async fn next_event(manager: &WorkflowManager) -> Event {
    let cancel = CancellationToken::new();
    tokio::time::timeout(WAIT, manager.trigger().acquire(&cancel))
        .await
        .unwrap()
        .unwrap()
}

async fn nothing_queued(manager: &WorkflowManager) -> bool {
    let cancel = CancellationToken::new();
    tokio::time::timeout(Duration::from_millis(20), manager.trigger().acquire(&cancel))
        .await
        .is_err()
}

fn serial_spec(name: &str) -> WorkflowSpec {
    WorkflowSpec::new(name, "main")
        .with_template(Template::serial("main", ["x", "y"]))
        .with_template(Template::suspend("x", Duration::from_millis(40)))
        .with_template(Template::suspend("y", Duration::from_millis(1)))
}

#[tokio::test]
async fn test_workflow_created_starts_the_entry() {
    let repo = registered(serial_spec("wf")).await;
    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap();

    let status = repo.status("wf").await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Running);
    assert!(status.started_at.is_some());
    assert_eq!(status.entry().unwrap().name, "main-0000");
    assert_eq!(status.entry().unwrap().phase, NodePhase::Init);

    let event = next_event(&manager).await;
    assert_eq!(event, Event::new("wf", "main-0000", EventType::NodeCreated));
}

#[tokio::test]
async fn test_workflow_created_recovers_a_waiting_node() {
    let repo = registered(serial_spec("wf")).await;
    repo.update_workflow_phase("wf", WorkflowPhase::Init, WorkflowPhase::Running, None)
        .await
        .unwrap();
    repo.create_node("wf", None, "main-0", "main", TemplateKind::Serial, NodePhase::WaitingForSchedule)
        .await
        .unwrap();

    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap();
    let pick = next_event(&manager).await;
    assert_eq!(pick, Event::new("wf", "main-0", EventType::NodePickChildToSchedule));

    manager.consume(&pick).await.unwrap();
    let status = repo.status("wf").await.unwrap();
    assert_eq!(status.node_by_name("main-0").unwrap().phase, NodePhase::WaitingForChild);
    assert_eq!(next_event(&manager).await, Event::new("wf", "x-0000", EventType::NodeCreated));
}

#[tokio::test]
async fn test_workflow_created_rearms_holding_nodes() {
    let repo = registered(serial_spec("wf")).await;
    repo.update_workflow_phase("wf", WorkflowPhase::Init, WorkflowPhase::Running, None)
        .await
        .unwrap();
    repo.create_node("wf", None, "main-0", "main", TemplateKind::Serial, NodePhase::WaitingForChild)
        .await
        .unwrap();
    repo.create_node("wf", Some("main-0"), "x-0", "x", TemplateKind::Suspend, NodePhase::Holding)
        .await
        .unwrap();

    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    let start = Instant::now();
    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap();
    let awake = next_event(&manager).await;
    assert_eq!(awake, Event::new("wf", "x-0", EventType::NodeHoldingAwake));
    // only the remainder of the 40ms is waited for
    assert!(start.elapsed() >= Duration::from_millis(20));
}

async fn lost_child_report(repo: &InMemoryRepository) {
    repo.update_workflow_phase("wf", WorkflowPhase::Init, WorkflowPhase::Running, None)
        .await
        .unwrap();
    repo.create_node("wf", None, "main-0", "main", TemplateKind::Serial, NodePhase::WaitingForChild)
        .await
        .unwrap();
    repo.create_node("wf", Some("main-0"), "x-0", "x", TemplateKind::Suspend, NodePhase::Succeed)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_workflow_created_replays_a_lost_child_report() {
    let repo = registered(serial_spec("wf")).await;
    lost_child_report(&repo).await;

    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap();
    assert_eq!(
        next_event(&manager).await,
        Event::new("wf", "main-0", EventType::ChildNodeSucceed)
    );
    assert!(nothing_queued(&manager).await);
}

#[tokio::test]
async fn test_recovered_workflow_runs_to_completion() {
    init_tracing();
    let repo = registered(serial_spec("wf")).await;
    lost_child_report(&repo).await;

    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());
    let cancel = CancellationToken::new();
    let handle = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    manager
        .trigger()
        .notify(Event::for_workflow("wf", EventType::WorkflowCreated))
        .unwrap();
    let status = wait_phase(&repo, "wf", WorkflowPhase::Succeed).await;

    let tree_node = status.tree_node("main-0").unwrap();
    assert_eq!(tree_node.len(), 2);
    assert_eq!(tree_node.children()[1].template_name, "y");
    assert!(tree_node.all_in_phase(NodePhase::Succeed));
    assert_eq!(status.entry().unwrap().phase, NodePhase::Succeed);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_workflow_created_replays_a_finished_entry() {
    let repo = registered(serial_spec("wf")).await;
    repo.update_workflow_phase("wf", WorkflowPhase::Init, WorkflowPhase::Running, None)
        .await
        .unwrap();
    repo.create_node("wf", None, "main-0", "main", TemplateKind::Serial, NodePhase::Init)
        .await
        .unwrap();
    repo.update_node_phase(
        "wf",
        "main-0",
        NodePhase::Init,
        NodePhase::Failed,
        Some("child node x-0 failed".to_string()),
    )
    .await
    .unwrap();

    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap();
    let report = next_event(&manager).await;
    assert_eq!(report, Event::for_workflow("wf", EventType::ChildNodeFailed));

    manager.consume(&report).await.unwrap();
    let status = repo.status("wf").await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.reason.as_deref(), Some("child node x-0 failed"));
}

#[tokio::test]
async fn test_workflow_created_with_nothing_to_do() {
    let spec = WorkflowSpec::new("wf", "main")
        .with_template(Template::serial("main", ["c"]))
        .with_template(Template::chaos("c", FaultSpec::new("fail"), Duration::from_millis(5)));
    let repo = registered(spec).await;
    repo.update_workflow_phase("wf", WorkflowPhase::Init, WorkflowPhase::Running, None)
        .await
        .unwrap();
    repo.create_node("wf", None, "main-0", "main", TemplateKind::Serial, NodePhase::WaitingForChild)
        .await
        .unwrap();
    // injection refused, its report is still in flight
    repo.create_node("wf", Some("main-0"), "c-0", "c", TemplateKind::Chaos, NodePhase::Running)
        .await
        .unwrap();

    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    let err = manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap_err();
    assert!(is_no_need_schedule(&err));

    repo.update_workflow_phase("wf", WorkflowPhase::Running, WorkflowPhase::Succeed, None)
        .await
        .unwrap();
    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap();
    assert!(nothing_queued(&manager).await);
}

#[tokio::test]
async fn test_abort_before_start() {
    let repo = registered(serial_spec("wf")).await;
    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowAborted))
        .await
        .unwrap();
    let status = repo.status("wf").await.unwrap();
    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert_eq!(status.reason.as_deref(), Some("aborted"));

    // the late WorkflowCreated starts nothing
    manager
        .consume(&Event::for_workflow("wf", EventType::WorkflowCreated))
        .await
        .unwrap();
    assert!(repo.status("wf").await.unwrap().nodes.is_empty());
    assert!(nothing_queued(&manager).await);
}

#[tokio::test]
async fn test_unknown_workflow_is_an_error() {
    let repo = Arc::new(InMemoryRepository::new(EventBus::new(8)));
    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());

    let err = manager
        .consume(&Event::new("ghost", "n", EventType::NodeCreated))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Repo(chaoscore::RepoError::WorkflowNotFound(_))));
}

#[tokio::test]
async fn test_impossible_event_fails_the_workflow() {
    init_tracing();
    let spec = WorkflowSpec::new("wf", "e")
        .with_template(Template::chaos("e", FaultSpec::new("log"), Duration::from_millis(5)));
    let repo = registered(spec).await;
    repo.update_workflow_phase("wf", WorkflowPhase::Init, WorkflowPhase::Running, None)
        .await
        .unwrap();
    repo.create_node("wf", None, "e-0", "e", TemplateKind::Chaos, NodePhase::Init)
        .await
        .unwrap();

    let playground = Arc::new(RecordingPlayground::new());
    let manager = manager_for(&repo, &playground, RuntimeConfig::default());
    let cancel = CancellationToken::new();
    let handle = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    manager
        .trigger()
        .notify(Event::new("wf", "e-0", EventType::NodeHoldingAwake))
        .unwrap();
    let status = wait_phase(&repo, "wf", WorkflowPhase::Failed).await;
    assert!(status.reason.unwrap().contains("can not handle event NodeHoldingAwake"));
    assert!(playground.calls().is_empty());

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_retry_catches_up_with_the_repository() {
    init_tracing();
    let spec = WorkflowSpec::new("wf", "pause")
        .with_template(Template::suspend("pause", Duration::from_millis(1)));
    let repo = registered(spec).await;
    repo.update_workflow_phase("wf", WorkflowPhase::Init, WorkflowPhase::Running, None)
        .await
        .unwrap();

    let playground = Arc::new(RecordingPlayground::new());
    let config = RuntimeConfig {
        max_redeliveries: 3,
        redelivery_backoff_ms: 20,
        ..Default::default()
    };
    let manager = manager_for(&repo, &playground, config);
    let cancel = CancellationToken::new();
    let handle = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    // the event arrives before the node it names is visible
    manager
        .trigger()
        .notify(Event::new("wf", "pause-0", EventType::NodeCreated))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    repo.create_node("wf", None, "pause-0", "pause", TemplateKind::Suspend, NodePhase::Init)
        .await
        .unwrap();

    let status = wait_phase(&repo, "wf", WorkflowPhase::Succeed).await;
    assert_eq!(status.entry().unwrap().phase, NodePhase::Succeed);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}
