//! Capture and compare runs against the scripted engine

mod support;

use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::layer::SubscriberExt;

use snapgate_runner::engine::CaptureRegion;
use snapgate_runner::{PixelDiff, Placeholder, PlaceholderSet, RunLog, Runner};

use support::{config, scenario, viewport, PageScript, ScriptedEngine};

fn runner(config: snapgate_common::RunConfig, engine: Arc<ScriptedEngine>) -> Runner {
    Runner::new(config, engine, Arc::new(PixelDiff))
}

#[tokio::test]
async fn test_selectors_times_viewports_pairs() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript::default()
        .with_element("h1", true, true)
        .with_element(".nav", true, true)
        .with_element("footer", true, true);
    let engine = Arc::new(ScriptedEngine::new(script));
    let cfg = config(
        &tmp,
        vec![scenario("home", &["h1", ".nav", "footer"])],
        vec![viewport("desktop", 1280, 800), viewport("phone", 320, 480)],
    );
    let runner = runner(cfg, engine.clone());

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;

    assert_eq!(summary.sessions, 2);
    assert_eq!(summary.errored, 0);
    assert_eq!(summary.pairs.len(), 6);
    let names: HashSet<_> = summary.pairs.iter().map(|p| p.file_name.clone()).collect();
    assert_eq!(names.len(), 6);
    assert!(summary.pairs.iter().all(|p| p.test.exists()));

    let viewports: Vec<_> = summary.pairs.iter().map(|p| p.viewport_label.as_str()).collect();
    assert_eq!(viewports, vec!["desktop", "desktop", "desktop", "phone", "phone", "phone"]);
    assert_eq!(engine.log.launches.load(Ordering::SeqCst), 2);
    assert_eq!(engine.log.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reference_then_test_with_missing_selector() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript::default().with_element("h1", true, true);
    let engine = Arc::new(ScriptedEngine::new(script));
    let cfg = config(
        &tmp,
        vec![scenario("home", &["h1", ".missing"])],
        vec![viewport("desktop", 1280, 800)],
    );
    let runner = runner(cfg, engine.clone());

    let reference = runner.reference(false).await.unwrap();
    assert!(reference.pairs.is_empty());
    assert_eq!(reference.errored, 0);

    let report = runner.test().await.unwrap();
    assert_eq!(report.total(), 2);
    assert_eq!(report.passed(), 2, "{:#?}", report.tests());

    let missing = report
        .tests()
        .iter()
        .find(|t| t.pair.selector == ".missing")
        .unwrap();
    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let not_found = std::fs::read(placeholders.path(Placeholder::NotFound)).unwrap();
    assert_eq!(std::fs::read(&missing.pair.test).unwrap(), not_found);
    assert_eq!(std::fs::read(&missing.pair.reference).unwrap(), not_found);

    let groups = report.groups();
    assert_eq!(groups.len(), 1);
    assert_eq!((groups[0].label, groups[0].viewport_label), ("home", "desktop"));

    // only h1 was ever screenshotted: once for reference, once for test
    let shots = engine.log.screenshots.lock().unwrap().clone();
    assert_eq!(shots, vec![CaptureRegion::Element("h1".into()); 2]);
}

#[tokio::test]
async fn test_changed_viewport_fails_against_reference() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(PageScript::default()));
    let reference_cfg = config(&tmp, vec![scenario("home", &[])], vec![viewport("desktop", 1280, 800)]);
    runner(reference_cfg, engine.clone())
        .reference(false)
        .await
        .unwrap();

    // same label, different size: the scripted engine paints a different colour
    let test_cfg = config(&tmp, vec![scenario("home", &[])], vec![viewport("desktop", 1024, 768)]);
    let report = runner(test_cfg, engine.clone()).test().await.unwrap();

    assert_eq!(report.total(), 1);
    let result = &report.tests()[0];
    assert!(!result.passed());
    assert_eq!(result.pair.selector, "document");
    assert_eq!(result.mismatch_percent, Some(100.0));
    assert!(result.diff_image.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_engine_error_becomes_single_failed_pair() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript {
        failing_urls: vec!["/broken".into()],
        ..Default::default()
    }
    .with_element("h1", true, true);
    let engine = Arc::new(ScriptedEngine::new(script));
    let cfg = config(
        &tmp,
        vec![scenario("broken", &["h1", ".nav"]), scenario("fine", &["h1"])],
        vec![viewport("desktop", 1280, 800)],
    );
    let runner = runner(cfg, engine.clone());

    let report = runner.test().await.unwrap();
    assert_eq!(report.total(), 2);

    let broken = &report.tests()[0];
    assert_eq!(broken.pair.label, "broken");
    assert_eq!(broken.pair.selector, "h1__.nav");
    assert!(!broken.passed());
    let message = broken.error.as_deref().unwrap();
    assert!(message.starts_with("navigate failed:"), "{}", message);

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    assert_eq!(
        std::fs::read(&broken.pair.test).unwrap(),
        std::fs::read(placeholders.path(Placeholder::Error)).unwrap()
    );

    // no reference was captured for the healthy scenario either
    let fine = &report.tests()[1];
    assert!(fine.error.as_deref().unwrap().contains("Reference file not found"));
    assert_eq!(engine.log.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_ready_event_timeout_fails_session() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript {
        console: vec!["booting".into()],
        ..Default::default()
    };
    let engine = Arc::new(ScriptedEngine::new(script));
    let mut home = scenario("home", &[]);
    home.ready_event = Some("app ready".into());
    let mut cfg = config(&tmp, vec![home], vec![viewport("desktop", 1280, 800)]);
    cfg.engine_options.wait_timeout_ms = 200;

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine)
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;

    assert_eq!(summary.errored, 1);
    let message = summary.pairs[0].engine_error.as_deref().unwrap();
    assert!(message.starts_with("wait-ready-event failed:"), "{}", message);
}

#[tokio::test]
async fn test_ready_event_seen_before_subscription_counts() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript {
        console: vec!["booting".into(), "app ready in 12ms".into()],
        ..Default::default()
    };
    let engine = Arc::new(ScriptedEngine::new(script));
    let mut cfg = config(&tmp, vec![scenario("home", &[])], vec![viewport("desktop", 1280, 800)]);
    cfg.ready_event = Some("app ready".into());
    cfg.engine_options.wait_timeout_ms = 2_000;

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine)
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;
    assert_eq!(summary.errored, 0);
    assert!(summary.pairs[0].engine_error.is_none());
}

#[tokio::test]
async fn test_scripts_resolve_against_engine_scripts_dir() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(PageScript::default()));
    let mut home = scenario("home", &[]);
    home.on_before_script = Some("missing.js".into());
    let mut cfg = config(&tmp, vec![home], vec![viewport("desktop", 1280, 800)]);
    cfg.on_ready_script = Some("onReady.js".into());
    std::fs::create_dir_all(&cfg.paths.engine_scripts).unwrap();
    std::fs::write(cfg.paths.engine_scripts.join("onReady.js"), "module.exports = () => {};").unwrap();
    let scripts_dir = cfg.paths.engine_scripts.clone();

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine.clone())
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;

    // a missing script only warns
    assert_eq!(summary.errored, 0);
    let scripts = engine.log.scripts.lock().unwrap().clone();
    assert_eq!(scripts, vec![scripts_dir.join("onReady.js")]);
}

#[tokio::test]
async fn test_reference_url_used_in_reference_mode_and_window_size_flag() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript {
        failing_urls: vec!["/live".into()],
        ..Default::default()
    };
    let engine = Arc::new(ScriptedEngine::new(script));
    let mut home = scenario("home", &[]);
    home.url = "http://localhost/live".into();
    home.reference_url = Some("http://localhost/staging".into());
    let cfg = config(&tmp, vec![home], vec![viewport("desktop", 1280, 800)]);

    let summary = runner(cfg, engine.clone()).reference(false).await.unwrap();
    assert_eq!(summary.errored, 0);

    let options = engine.log.launch_options.lock().unwrap().clone();
    assert!(options[0].flags.contains(&"--window-size=1280,800".to_string()));
}

#[tokio::test]
async fn test_selector_expansion_keeps_page_order() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript::default()
        .with_element("h1", true, true)
        .with_repeated(".card", 3);
    let engine = Arc::new(ScriptedEngine::new(script));
    let mut cards = scenario("cards", &["h1", ".card"]);
    cards.selector_expansion = true;
    let cfg = config(&tmp, vec![cards], vec![viewport("desktop", 1280, 800)]);

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine.clone())
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;

    let selectors: Vec<_> = summary.pairs.iter().map(|p| p.selector.as_str()).collect();
    assert_eq!(selectors, vec!["h1", ".card", ".card.__n1", ".card.__n2"]);
    let names: HashSet<_> = summary.pairs.iter().map(|p| p.file_name.clone()).collect();
    assert_eq!(names.len(), 4);
    assert!(summary.pairs.iter().all(|p| p.test.exists()));

    let resolve = engine
        .log
        .evaluation_index(|e| e.arg.get("expand").is_some())
        .unwrap();
    let evaluations = engine.log.evaluations.lock().unwrap();
    assert_eq!(evaluations[resolve].arg, json!({"selectors": ["h1", ".card"], "expand": true}));
}

#[tokio::test]
async fn test_without_expansion_repeated_selector_is_captured_once() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(PageScript::default().with_repeated(".card", 3)));
    let cfg = config(&tmp, vec![scenario("cards", &[".card"])], vec![viewport("desktop", 1280, 800)]);

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine)
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;
    let selectors: Vec<_> = summary.pairs.iter().map(|p| p.selector.as_str()).collect();
    assert_eq!(selectors, vec![".card"]);
}

#[tokio::test]
async fn test_remove_and_hide_reach_the_page_before_resolving() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(PageScript::default().with_element("h1", true, true)));
    let mut home = scenario("home", &["h1"]);
    home.remove_selectors = vec![".ad".into(), "#cookie-banner".into()];
    home.hide_selectors = vec![".clock".into()];
    let cfg = config(&tmp, vec![home], vec![viewport("desktop", 1280, 800)]);

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine.clone())
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;
    assert_eq!(summary.errored, 0);

    let log = &engine.log;
    let remove = log
        .evaluation_index(|e| e.arg == json!({"selectors": [".ad", "#cookie-banner"]}))
        .unwrap();
    let hide = log
        .evaluation_index(|e| e.arg == json!({"selectors": [".clock"]}))
        .unwrap();
    let resolve = log.evaluation_index(|e| e.arg.get("expand").is_some()).unwrap();
    assert!(remove < hide, "remove at {}, hide at {}", remove, hide);
    assert!(hide < resolve, "hide at {}, resolve at {}", hide, resolve);

    let evaluations = log.evaluations.lock().unwrap();
    assert!(evaluations[remove].function.contains("display: none"));
    assert!(evaluations[hide].function.contains("visibility = 'hidden'"));
}

#[tokio::test]
async fn test_hidden_element_gets_not_visible_placeholder() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript::default()
        .with_element("h1", true, true)
        .with_element(".modal", true, false);
    let engine = Arc::new(ScriptedEngine::new(script));
    let cfg = config(&tmp, vec![scenario("home", &["h1", ".modal"])], vec![viewport("desktop", 1280, 800)]);

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine.clone())
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;

    let modal = summary.pairs.iter().find(|p| p.selector == ".modal").unwrap();
    assert_eq!(
        std::fs::read(&modal.test).unwrap(),
        std::fs::read(placeholders.path(Placeholder::NotVisible)).unwrap()
    );
    let shots = engine.log.screenshots.lock().unwrap().clone();
    assert_eq!(shots, vec![CaptureRegion::Element("h1".into())]);
}

#[tokio::test]
async fn test_element_screenshot_error_spares_siblings() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript::default()
        .with_element("h1", true, true)
        .with_element(".flaky", true, true)
        .with_element("footer", true, true)
        .with_failing_screenshot(".flaky");
    let engine = Arc::new(ScriptedEngine::new(script));
    let cfg = config(
        &tmp,
        vec![scenario("home", &["h1", ".flaky", "footer"])],
        vec![viewport("desktop", 1280, 800)],
    );

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine.clone())
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;

    assert_eq!(summary.errored, 0);
    assert_eq!(summary.pairs.len(), 3);
    let error_bitmap = std::fs::read(placeholders.path(Placeholder::Error)).unwrap();
    for pair in &summary.pairs {
        let written = std::fs::read(&pair.test).unwrap();
        if pair.selector == ".flaky" {
            assert_eq!(written, error_bitmap);
        } else {
            assert_ne!(written, error_bitmap, "{} should hold a real capture", pair.selector);
        }
        assert!(pair.engine_error.is_none());
    }
    assert_eq!(engine.log.screenshots.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_capture_limit_bounds_open_sessions() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(PageScript::default()));
    let scenarios: Vec<_> = (0..6)
        .map(|i| {
            let mut s = scenario(&format!("page{}", i), &[]);
            s.delay = 30;
            s
        })
        .collect();
    let mut cfg = config(&tmp, scenarios, vec![viewport("desktop", 1280, 800)]);
    cfg.async_capture_limit = 2;

    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    let summary = runner(cfg, engine.clone())
        .capture(false, tmp.path().join("bitmaps_test/run"), &placeholders)
        .await;

    assert_eq!(summary.sessions, 6);
    assert_eq!(engine.log.launches.load(Ordering::SeqCst), 6);
    assert_eq!(engine.log.max_open_sessions.load(Ordering::SeqCst), 2);
    assert_eq!(engine.log.open_sessions.load(Ordering::SeqCst), 0);
    let labels: Vec<_> = summary.pairs.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, vec!["page0", "page1", "page2", "page3", "page4", "page5"]);
}

#[tokio::test]
async fn test_failed_reference_session_writes_error_placeholder_as_reference() {
    let tmp = TempDir::new().unwrap();
    let script = PageScript {
        failing_urls: vec!["/broken".into()],
        ..Default::default()
    };
    let engine = Arc::new(ScriptedEngine::new(script));
    let cfg = config(&tmp, vec![scenario("broken", &["h1"])], vec![viewport("desktop", 1280, 800)]);
    let reference_dir = cfg.paths.bitmaps_reference.clone();
    let test_dir = cfg.paths.bitmaps_test.clone();

    let summary = runner(cfg, engine).reference(false).await.unwrap();
    assert_eq!(summary.errored, 1);

    let written: Vec<_> = std::fs::read_dir(&reference_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(written.len(), 1);
    let placeholders = PlaceholderSet::ensure(&tmp.path().join("placeholders")).unwrap();
    assert_eq!(
        std::fs::read(&written[0]).unwrap(),
        std::fs::read(placeholders.path(Placeholder::Error)).unwrap()
    );
    assert!(!test_dir.exists());
}

#[tokio::test]
async fn test_run_log_files_session_and_compare_lines() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(PageScript::default().with_element("h1", true, true)));
    let cfg = config(&tmp, vec![scenario("home", &["h1"])], vec![viewport("phone", 320, 480)]);
    let report_dir = cfg.paths.json_report.clone();
    let runner = runner(cfg, engine);

    let run_log = RunLog::new();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(run_log.layer()));
    runner.reference(false).await.unwrap();
    let report = runner.test().await.unwrap();
    assert!(!report.has_failures());

    let rows = run_log.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].scenario, "home");
    assert_eq!(rows[0].viewport.as_deref(), Some("phone"));
    assert!(rows[0].browser.iter().any(|l| l.message.starts_with("Navigating to")));
    assert!(rows[0].compare.iter().any(|l| l.result == Some(true)));

    let path = run_log.write_html(&report_dir, "itest").await.unwrap();
    assert!(std::fs::read_to_string(path).unwrap().contains("SUCCESS"));
}
