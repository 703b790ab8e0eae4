//! Request dispatcher behaviour against real files and a tag cache.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use mimesniff_core::{MimeDatabase, RequestDispatcher, RequestState};
use mimesniff_test_utils::fixtures::{MagicDbBuilder, MagicRuleSpec, MemoryCache};
use mimesniff_test_utils::tracing_setup::init_test_tracing;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

type Results = Rc<RefCell<Vec<(u64, Option<String>)>>>;

fn database() -> Arc<MimeDatabase> {
    let mut db = MimeDatabase::new();
    db.globs_mut().parse_str("50:text/plain:*.txt\n");
    db.magic_mut()
        .parse_bytes(
            &MagicDbBuilder::new()
                .section(50, "image/png", [MagicRuleSpec::new(0, b"\x89PNG")])
                .build(),
            "test",
        )
        .unwrap();
    Arc::new(db)
}

fn collect(results: &Results) -> impl FnOnce(&mimesniff_core::Request, Option<String>) + 'static {
    let results = Rc::clone(results);
    move |req, mime| results.borrow_mut().push((req.id(), mime))
}

#[tokio::test]
async fn test_cached_tag_skips_classification() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let tagged = tmp.path().join("photo.txt");
    std::fs::write(&tagged, b"\x89PNG").unwrap();

    let cache = MemoryCache::new().with_tag(&tagged, "image/x-custom");
    let results = Results::default();
    let mut dispatcher = RequestDispatcher::new(database(), Arc::new(cache), 2);

    dispatcher.start(&tagged, collect(&results)).unwrap();
    dispatcher.run_until_idle().await;
    assert_eq!(results.borrow()[0].1.as_deref(), Some("image/x-custom"));
}

#[tokio::test]
async fn test_cache_miss_classifies_content() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let picture = tmp.path().join("picture");
    std::fs::write(&picture, b"\x89PNG\r\n").unwrap();

    let cache = MemoryCache::new().with_tag(tmp.path().join("other"), "text/x-other");
    let results = Results::default();
    let mut dispatcher = RequestDispatcher::new(database(), Arc::new(cache), 2);

    dispatcher.start(&picture, collect(&results)).unwrap();
    dispatcher.start(tmp.path().join("missing"), collect(&results)).unwrap();
    assert_eq!(dispatcher.run_until_idle().await, 2);

    let mut got = results.borrow().clone();
    got.sort();
    assert_eq!(got, vec![(1, Some("image/png".to_string())), (2, None)]);
}

#[tokio::test]
async fn test_cancel_before_dispatch_never_calls_back() {
    let tmp = TempDir::new().unwrap();
    let picture = tmp.path().join("picture");
    std::fs::write(&picture, b"\x89PNG").unwrap();

    let results = Results::default();
    let mut dispatcher = RequestDispatcher::new(database(), Arc::new(MemoryCache::new()), 1);

    let cancelled = dispatcher.start(&picture, collect(&results)).unwrap();
    let kept = dispatcher.start(&picture, collect(&results)).unwrap();
    assert!(dispatcher.cancel(&cancelled));

    dispatcher.run_until_idle().await;
    assert_eq!(*results.borrow(), vec![(kept.id(), Some("image/png".to_string()))]);
    assert_eq!(cancelled.state(), RequestState::Cancelled);
    assert_eq!(kept.state(), RequestState::Completed);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let results = Results::default();
    let mut dispatcher = RequestDispatcher::new(database(), Arc::new(MemoryCache::new()), 1);

    let req = dispatcher.start("/nonexistent/a.txt", collect(&results)).unwrap();
    dispatcher.run_until_idle().await;
    assert!(!dispatcher.cancel(&req));
    assert_eq!(*results.borrow(), vec![(req.id(), Some("text/plain".to_string()))]);
}
