//! End-to-end runs of the research pipeline against in-memory collaborators.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{
    encyclopedia_result, slug, test_config, web_result, FakeConnector, FakeFetcher, FakeModel,
    Harness,
};
use deep_search::assistant::configuration::Configuration;
use deep_search::{
    ChatError, ExtractionStatus, FailureReason, ModelError, Origin, Phase, Role,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const QUANTUM_PLAN: &str = "1. quantum entanglement explained\n2. quantum entanglement for beginners\n3. history of quantum entanglement";
const PAGE: &str = "<html><body><article><p>Entangled particles share one quantum state.</p></article></body></html>";

fn quantum_harness() -> Harness {
    let web = FakeConnector::new(Origin::Web, |q| {
        vec![web_result(q, &format!("https://web.example/{}", slug(q)))]
    });
    let encyclopedia = FakeConnector::new(Origin::Encyclopedia, |q| {
        if q.starts_with("history") {
            vec![encyclopedia_result(q, "Quantum entanglement", "Quantum entanglement is a physical phenomenon.")]
        } else {
            Vec::new()
        }
    });
    let fetcher = FakeFetcher::new()
        .with_page("https://web.example/quantum-entanglement-explained", PAGE)
        .with_page("https://web.example/quantum-entanglement-for-beginners", PAGE);
    let model = FakeModel::new(Ok(QUANTUM_PLAN), Ok("# Quantum Entanglement\n\nA report."));

    Harness::new(model, web, encyclopedia, fetcher)
}

#[tokio::test]
async fn successful_run_produces_report_from_ok_documents() {
    let harness = quantum_harness();
    let graph = harness.graph(test_config());

    let ctx = graph.research("Quantum entanglement basics").await;

    assert_eq!(ctx.phase, Phase::Done);
    assert_eq!(
        ctx.queries,
        vec![
            "quantum entanglement explained",
            "quantum entanglement for beginners",
            "history of quantum entanglement",
        ]
    );
    assert_eq!(harness.web.calls(), 3);
    assert_eq!(harness.encyclopedia.calls(), 3);

    // One web hit per query plus one encyclopedia article.
    assert_eq!(ctx.documents.len(), 4);
    let counts = ctx.counts();
    assert_eq!((counts.ok, counts.failed, counts.skipped), (3, 1, 0));

    let report = ctx.report.as_ref().expect("report");
    assert!(!report.body.is_empty());
    assert!(!report.sources.is_empty());

    let ok_urls: HashSet<&str> = ctx.ok_documents().map(|d| d.source.url.as_str()).collect();
    let unique: HashSet<&String> = report.sources.iter().collect();
    assert_eq!(unique.len(), report.sources.len());
    assert!(report.sources.iter().all(|url| ok_urls.contains(url.as_str())));
    assert!(!report.sources.contains(&"https://web.example/history-of-quantum-entanglement".to_string()));
    assert_eq!(ctx.sources, report.sources);
}

#[tokio::test]
async fn report_prompt_contains_topic_queries_and_ok_text_only() {
    let harness = quantum_harness();
    let graph = harness.graph(test_config());

    graph.research("Quantum entanglement basics").await;

    let prompts = harness.model.prompts();
    let report_prompt = prompts
        .iter()
        .find(|p| p.contains("Write the report now"))
        .expect("report prompt");
    assert!(report_prompt.contains("Quantum entanglement basics"));
    assert!(report_prompt.contains("- history of quantum entanglement"));
    assert!(report_prompt.contains("Entangled particles share one quantum state."));
    assert!(report_prompt.contains("Quantum entanglement is a physical phenomenon."));
    assert!(!report_prompt.contains("Source: https://web.example/history-of-quantum-entanglement"));
}

#[tokio::test]
async fn empty_connectors_fail_with_no_usable_content() {
    let harness = Harness::new(
        FakeModel::new(Ok(QUANTUM_PLAN), Ok("unused")),
        FakeConnector::empty(Origin::Web),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new(),
    );
    let graph = harness.graph(test_config());

    let ctx = graph.research("Quantum entanglement basics").await;

    assert_eq!(ctx.phase, Phase::Failed(FailureReason::NoUsableContent));
    assert_eq!(ctx.failure().unwrap().to_string(), "no usable content retrieved");
    assert!(ctx.report.is_none());
    assert!(ctx.documents.is_empty());
    assert_eq!(harness.fetcher.calls(), 0);
    // The report model is never asked.
    assert_eq!(harness.model.calls(), 1);
}

#[tokio::test]
async fn all_failed_extractions_fail_the_run_but_keep_documents() {
    let harness = Harness::new(
        FakeModel::new(Ok("only query"), Ok("unused")),
        FakeConnector::new(Origin::Web, |q| {
            vec![
                web_result(q, "https://down.example/a"),
                web_result(q, "https://down.example/b"),
            ]
        }),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new(),
    );
    let graph = harness.graph(test_config());

    let ctx = graph.research("anything").await;

    assert_eq!(ctx.failure(), Some(&FailureReason::NoUsableContent));
    assert_eq!(ctx.documents.len(), 2);
    assert!(ctx
        .documents
        .iter()
        .all(|d| d.status == ExtractionStatus::Failed && d.text.is_none()));
    assert_eq!(ctx.documents[0].source.url, "https://down.example/a");
    assert_eq!(ctx.documents[1].source.url, "https://down.example/b");
}

#[tokio::test]
async fn planning_model_error_fails_before_searching() {
    let harness = Harness::new(
        FakeModel::new(
            Err(ModelError::Status {
                status: 401,
                body: "bad key".into(),
            }),
            Ok("unused"),
        ),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://web.example/x")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new(),
    );
    let graph = harness.graph(test_config());

    let ctx = graph.research("Quantum entanglement basics").await;

    assert!(matches!(ctx.failure(), Some(FailureReason::ModelUnavailable(_))));
    assert!(ctx.queries.is_empty());
    assert_eq!(harness.web.calls(), 0);
    assert_eq!(harness.encyclopedia.calls(), 0);
    assert_eq!(harness.fetcher.calls(), 0);
}

#[tokio::test]
async fn unusable_plan_falls_back_to_topic() {
    let harness = Harness::new(
        FakeModel::new(Ok("<think>nothing useful</think>"), Ok("report")),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://web.example/page")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new().with_page("https://web.example/page", PAGE),
    );
    let graph = harness.graph(test_config());

    let ctx = graph.research("  solar power  ").await;

    assert_eq!(ctx.queries, vec!["solar power"]);
    assert_eq!(harness.web.queries(), vec!["solar power"]);
    assert!(ctx.is_done());
}

#[tokio::test]
async fn synthesis_failure_keeps_partial_context() {
    let harness = Harness::new(
        FakeModel::new(Ok("q1"), Err(ModelError::Request("connection reset".into()))),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://web.example/page")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new().with_page("https://web.example/page", PAGE),
    );
    let graph = harness.graph(test_config());

    let ctx = graph.research("topic").await;

    assert!(matches!(ctx.failure(), Some(FailureReason::ModelUnavailable(msg)) if msg.contains("connection reset")));
    assert!(ctx.report.is_none());
    assert_eq!(ctx.queries, vec!["q1"]);
    assert_eq!(ctx.counts().ok, 1);
}

#[tokio::test]
async fn empty_topic_is_rejected_without_model_calls() {
    let harness = quantum_harness();
    let graph = harness.graph(test_config());

    let ctx = graph.research("   ").await;

    assert_eq!(ctx.failure(), Some(&FailureReason::InvalidTopic));
    assert_eq!(harness.model.calls(), 0);
}

#[tokio::test]
async fn every_pool_entry_yields_one_document() {
    let harness = Harness::new(
        FakeModel::new(Ok("a\nb"), Ok("report")),
        FakeConnector::new(Origin::Web, |q| {
            vec![
                web_result(q, &format!("https://ok.example/{}", q)),
                web_result(q, &format!("https://missing.example/{}", q)),
            ]
        }),
        FakeConnector::new(Origin::Encyclopedia, |q| {
            vec![encyclopedia_result(q, &format!("Article {}", q), "")]
        }),
        FakeFetcher::new()
            .with_page("https://ok.example/a", PAGE)
            .with_page("https://ok.example/b", PAGE),
    );
    let graph = harness.graph(test_config());

    let ctx = graph.research("topic").await;

    // 2 queries x (2 web + 1 encyclopedia), all distinct.
    assert_eq!(ctx.documents.len(), 6);
    let urls: Vec<&str> = ctx.documents.iter().map(|d| d.source.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://ok.example/a",
            "https://missing.example/a",
            "https://en.wikipedia.org/wiki/Article_a",
            "https://ok.example/b",
            "https://missing.example/b",
            "https://en.wikipedia.org/wiki/Article_b",
        ]
    );
    // Encyclopedia entries with no summary fall back to fetching, which 404s here.
    assert_eq!(harness.fetcher.calls(), 6);
    assert_eq!(ctx.counts().ok, 2);
    assert!(ctx.is_done());
}

#[tokio::test]
async fn duplicate_urls_across_queries_are_extracted_once() {
    let harness = Harness::new(
        FakeModel::new(Ok("first\nsecond"), Ok("report")),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://shared.example/page")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new().with_page("https://shared.example/page", PAGE),
    );
    let graph = harness.graph(test_config());

    let ctx = graph.research("topic").await;

    assert_eq!(ctx.documents.len(), 1);
    assert_eq!(ctx.documents[0].source.query, "first");
    assert_eq!(harness.fetcher.calls(), 1);
    assert_eq!(ctx.report.unwrap().sources, vec!["https://shared.example/page"]);
}

#[tokio::test]
async fn extraction_budget_marks_excess_as_skipped() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("report")),
        FakeConnector::new(Origin::Web, |q| {
            (0..5)
                .map(|i| web_result(q, &format!("https://web.example/{}", i)))
                .collect()
        }),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new()
            .with_page("https://web.example/0", PAGE)
            .with_page("https://web.example/1", PAGE),
    );
    let config = Configuration {
        max_extractions: 2,
        ..test_config()
    };
    let graph = harness.graph(config);

    let ctx = graph.research("topic").await;

    assert_eq!(ctx.documents.len(), 5);
    assert_eq!(harness.fetcher.calls(), 2);
    let statuses: Vec<ExtractionStatus> = ctx.documents.iter().map(|d| d.status).collect();
    assert_eq!(
        statuses,
        vec![
            ExtractionStatus::Ok,
            ExtractionStatus::Ok,
            ExtractionStatus::Skipped,
            ExtractionStatus::Skipped,
            ExtractionStatus::Skipped,
        ]
    );
    assert_eq!(ctx.counts().skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn slow_connector_times_out_without_failing_the_run() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("report")),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://slow.example/")])
            .with_delay(Duration::from_secs(600)),
        FakeConnector::new(Origin::Encyclopedia, |q| {
            vec![encyclopedia_result(q, "Fast article", "Fast encyclopedia text.")]
        }),
        FakeFetcher::new(),
    );
    let config = Configuration {
        call_timeout_secs: 5,
        ..test_config()
    };
    let graph = harness.graph(config);

    let ctx = graph.research("topic").await;

    assert!(ctx.is_done());
    assert_eq!(ctx.documents.len(), 1);
    assert_eq!(ctx.documents[0].source.origin, Origin::Encyclopedia);
}

#[tokio::test]
async fn cancelled_run_stops_at_first_boundary() {
    let harness = quantum_harness();
    let graph = harness.graph(test_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let ctx = graph.research_with_cancel("Quantum entanglement basics", &cancel).await;

    assert_eq!(ctx.failure(), Some(&FailureReason::Cancelled));
    assert_eq!(harness.model.calls(), 0);
    assert_eq!(harness.web.calls(), 0);
}

#[tokio::test]
async fn phase_events_are_emitted_in_order() {
    let harness = quantum_harness();
    let mut graph = harness.graph(test_config());
    let (tx, mut rx) = broadcast::channel(32);
    graph.set_status_sender(tx);

    graph.research("Quantum entanglement basics").await;

    let mut phases = Vec::new();
    while let Ok(update) = rx.try_recv() {
        phases.push(update.phase);
    }
    assert_eq!(phases, vec!["planning", "searching", "extracting", "synthesizing", "done"]);
}

#[tokio::test]
async fn failed_run_emits_failed_event() {
    let harness = Harness::new(
        FakeModel::new(Err(ModelError::Timeout(30)), Ok("unused")),
        FakeConnector::empty(Origin::Web),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new(),
    );
    let mut graph = harness.graph(test_config());
    let (tx, mut rx) = broadcast::channel(32);
    graph.set_status_sender(tx);

    graph.research("topic").await;

    let mut phases = Vec::new();
    while let Ok(update) = rx.try_recv() {
        phases.push(update.phase);
    }
    assert_eq!(phases, vec!["planning", "failed"]);
}

#[tokio::test]
async fn second_follow_up_sees_first_exchange() {
    let harness = Harness::new(
        FakeModel::new(Ok(QUANTUM_PLAN), Ok("# Report\n\nEntanglement links particles."))
            .with_answers(vec![Ok("It links particles."), Ok("Einstein called it spooky.")]),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://web.example/page")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new().with_page("https://web.example/page", PAGE),
    );
    let graph = harness.graph(test_config());
    let ctx = graph.research("Quantum entanglement basics").await;
    assert!(ctx.is_done());

    let mut history = Vec::new();
    let first = graph
        .continue_chat(&ctx, &mut history, "What does it do?")
        .await
        .unwrap();
    assert_eq!(first.role, Role::Assistant);
    assert_eq!(first.text, "It links particles.");

    let second = graph
        .continue_chat(&ctx, &mut history, "Who named it?")
        .await
        .unwrap();
    assert_eq!(second.text, "Einstein called it spooky.");

    let prompts = harness.model.prompts();
    let last = prompts.last().unwrap();
    assert!(last.contains("Entanglement links particles."));
    assert!(last.contains("User: What does it do?"));
    assert!(last.contains("Assistant: It links particles."));
    assert!(last.contains("Who named it?"));

    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[3].text, "Einstein called it spooky.");
}

#[tokio::test]
async fn follow_up_failure_leaves_session_untouched() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("The report."))
            .with_answers(vec![Ok("First answer."), Err(ModelError::Timeout(30)), Ok("Retried answer.")]),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://web.example/page")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new().with_page("https://web.example/page", PAGE),
    );
    let graph = harness.graph(test_config());
    let ctx = graph.research("topic").await;
    let report_before = ctx.report.clone();

    let mut history = Vec::new();
    graph.continue_chat(&ctx, &mut history, "one").await.unwrap();
    let history_before = history.clone();

    let err = graph.continue_chat(&ctx, &mut history, "two").await.unwrap_err();
    assert!(matches!(err, ChatError::Model(ModelError::Timeout(_))));
    assert_eq!(history, history_before);
    assert_eq!(ctx.report, report_before);

    // The same question can be retried.
    let retried = graph.continue_chat(&ctx, &mut history, "two").await.unwrap();
    assert_eq!(retried.text, "Retried answer.");
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn follow_up_requires_a_report() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("unused")),
        FakeConnector::empty(Origin::Web),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new(),
    );
    let graph = harness.graph(test_config());
    let ctx = graph.research("topic").await;

    let mut history = Vec::new();
    let err = graph.continue_chat(&ctx, &mut history, "why?").await.unwrap_err();
    assert_eq!(err, ChatError::NoReport);
    assert!(history.is_empty());
}

#[tokio::test]
async fn encyclopedia_summaries_do_not_use_the_fetch_budget() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("report")),
        FakeConnector::new(Origin::Web, |q| {
            vec![
                web_result(q, "https://web.example/first"),
                web_result(q, "https://web.example/second"),
            ]
        }),
        FakeConnector::new(Origin::Encyclopedia, |q| {
            vec![encyclopedia_result(q, "Some article", "Article text.")]
        }),
        FakeFetcher::new().with_page("https://web.example/first", PAGE),
    );
    let config = Configuration {
        max_extractions: 1,
        ..test_config()
    };
    let graph = harness.graph(config);

    let ctx = graph.research("topic").await;

    let statuses: Vec<(Origin, ExtractionStatus)> = ctx
        .documents
        .iter()
        .map(|d| (d.source.origin, d.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (Origin::Web, ExtractionStatus::Ok),
            (Origin::Web, ExtractionStatus::Skipped),
            (Origin::Encyclopedia, ExtractionStatus::Ok),
        ]
    );
    assert_eq!(harness.fetcher.calls(), 1);
    assert_eq!(ctx.documents[2].text.as_deref(), Some("Article text."));
}

#[tokio::test]
async fn concurrent_runs_tag_their_own_events() {
    let harness = quantum_harness();
    let mut graph = harness.graph(test_config());
    let (tx, mut rx) = broadcast::channel(64);
    graph.set_status_sender(tx);

    let chosen = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(
        graph.research_with_id(chosen, "Quantum entanglement basics", &cancel),
        graph.research("Quantum tunnelling"),
    );
    assert_eq!(first.id, chosen);
    assert_ne!(first.id, second.id);

    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    assert_eq!(updates.len(), 10);
    for ctx in [&first, &second] {
        let phases: Vec<&str> = updates
            .iter()
            .filter(|u| u.run_id == ctx.id)
            .map(|u| u.phase.as_str())
            .collect();
        assert_eq!(phases, vec!["planning", "searching", "extracting", "synthesizing", "done"]);
    }
}

#[tokio::test(start_paused = true)]
async fn hung_synthesis_times_out_and_keeps_documents() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("never delivered")).with_report_delay(Duration::from_secs(600)),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://web.example/page")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new().with_page("https://web.example/page", PAGE),
    );
    let config = Configuration {
        call_timeout_secs: 5,
        ..test_config()
    };
    let graph = harness.graph(config);

    let ctx = graph.research("topic").await;

    assert!(matches!(
        ctx.failure(),
        Some(FailureReason::ModelUnavailable(msg)) if msg == "model call timed out after 5s"
    ));
    assert!(ctx.report.is_none());
    assert_eq!(ctx.documents.len(), 1);
    assert!(ctx.documents[0].is_ok());
}

#[tokio::test(start_paused = true)]
async fn hung_fetch_fails_only_that_document() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("report")),
        FakeConnector::new(Origin::Web, |q| {
            vec![
                web_result(q, "https://slow.example/page"),
                web_result(q, "https://web.example/page"),
            ]
        }),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new()
            .with_page("https://slow.example/page", PAGE)
            .with_delay("https://slow.example/page", Duration::from_secs(600))
            .with_page("https://web.example/page", PAGE),
    );
    let config = Configuration {
        call_timeout_secs: 5,
        ..test_config()
    };
    let graph = harness.graph(config);

    let ctx = graph.research("topic").await;

    assert!(ctx.is_done());
    assert_eq!(ctx.documents[0].status, ExtractionStatus::Failed);
    assert_eq!(ctx.documents[0].reason.as_deref(), Some("fetch timed out after 5s"));
    assert_eq!(ctx.documents[1].status, ExtractionStatus::Ok);
    assert_eq!(ctx.sources, vec!["https://web.example/page"]);
}

#[tokio::test(start_paused = true)]
async fn hung_follow_up_times_out_without_touching_history() {
    let harness = Harness::new(
        FakeModel::new(Ok("q"), Ok("The report."))
            .with_answers(vec![Ok("too late")])
            .with_answer_delay(Duration::from_secs(600)),
        FakeConnector::new(Origin::Web, |q| vec![web_result(q, "https://web.example/page")]),
        FakeConnector::empty(Origin::Encyclopedia),
        FakeFetcher::new().with_page("https://web.example/page", PAGE),
    );
    let config = Configuration {
        call_timeout_secs: 5,
        ..test_config()
    };
    let graph = harness.graph(config);
    let ctx = graph.research("topic").await;
    assert!(ctx.is_done());

    let mut history = Vec::new();
    let err = graph.continue_chat(&ctx, &mut history, "why?").await.unwrap_err();

    assert_eq!(err, ChatError::Model(ModelError::Timeout(5)));
    assert!(history.is_empty());
}
