//! Provider, manager and cache lifecycle through the public API.

use cachet_core::{CacheLocation, ListenerCapabilities, ScopeHandle};
use cachet_events::ListenerRegistration;
use cachet_storage::{BeanKind, BeanSnapshot, CachingProvider};
use cachet_test_utils::assertions::{assert_config_error, assert_duplicate_cache, assert_state_error};
use cachet_test_utils::fixtures::{book_key, books_config, demo_manager, provider};
use cachet_test_utils::{init_test_tracing, Book, CacheKey, EventKind, FailingCloseStore, RecordingListener};
use std::sync::Arc;

#[test]
fn independently_built_keys_hit_the_same_entry() {
    init_test_tracing();
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    let books = manager.create_cache::<CacheKey, Book>("books", books_config()).unwrap();

    let listener = Arc::new(RecordingListener::<CacheKey, Book>::new());
    books
        .register_listener(ListenerRegistration::new(listener.clone(), ListenerCapabilities::all()))
        .unwrap();

    books.put(book_key(42, None), Book::new(42, "Dune")).unwrap();
    let found = books.get(&book_key(42, None)).unwrap();
    assert_eq!(found, Some(Book::new(42, "Dune")));
    assert_eq!(books.get(&book_key(42, Some("acme"))).unwrap(), None);

    let created = listener.events_of(EventKind::Created);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].cache_name(), "books");
    assert_eq!(created[0].key(), &book_key(42, None));
}

#[test]
fn typed_lookup_returns_the_created_cache() {
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    let created = manager.create_cache::<CacheKey, Book>("books", books_config()).unwrap();

    let found = manager.get_typed_cache::<CacheKey, Book>("books").unwrap().unwrap();
    assert!(Arc::ptr_eq(&created, &found));

    assert_config_error(&manager.get_typed_cache::<String, Book>("books"));
    assert!(manager.get_typed_cache::<CacheKey, Book>("missing").unwrap().is_none());
}

#[test]
fn concurrent_requests_share_one_manager() {
    let provider = provider();
    let scope = ScopeHandle::named("shared");
    let location = CacheLocation::new("demo");

    let managers: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| provider.get_cache_manager(Some(&location), Some(&scope), None)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(managers.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(provider.manager_count(), 1);
}

#[test]
fn concurrent_creation_admits_one_cache() {
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);

    let successes = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| manager.create_cache::<CacheKey, Book>("books", books_config()).is_ok()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
    });

    assert_eq!(successes, 1);
    assert_eq!(manager.cache_names().unwrap(), vec!["books".to_string()]);
}

#[test]
fn duplicate_creation_keeps_the_original() {
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    let original = manager.create_cache::<CacheKey, Book>("books", books_config()).unwrap();
    original.put(book_key(1, None), Book::new(1, "Emma")).unwrap();

    assert_duplicate_cache(&manager.create_cache::<CacheKey, Book>("books", books_config()), "books");
    assert_eq!(original.get(&book_key(1, None)).unwrap(), Some(Book::new(1, "Emma")));
    assert!(!original.is_closed());
}

#[test]
fn destroyed_cache_is_gone_and_closed() {
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    let books = manager.create_cache::<CacheKey, Book>("books", books_config()).unwrap();

    manager.destroy_cache("books").unwrap();
    assert!(books.is_closed());
    assert!(manager.get_cache("books").unwrap().is_none());
    manager.destroy_cache("books").unwrap();

    let recreated = manager.create_cache::<CacheKey, Book>("books", books_config()).unwrap();
    assert!(!Arc::ptr_eq(&books, &recreated));
}

#[test]
fn manager_close_is_idempotent_and_cascades() {
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    let books = manager.create_cache::<CacheKey, Book>("books", books_config()).unwrap();

    manager.close();
    manager.close();

    assert!(manager.is_closed());
    assert!(books.is_closed());
    assert_eq!(provider.manager_count(), 0);
    assert_state_error(&manager.get_cache("books"));
    assert_state_error(&manager.create_cache::<CacheKey, Book>("other", books_config()));
    assert_state_error(&books.get(&book_key(1, None)));
}

#[test]
fn store_close_failure_does_not_abort_shutdown() {
    init_test_tracing();
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    let failing = Arc::new(FailingCloseStore::<CacheKey, Book>::new());
    let broken = manager
        .create_cache_with_store::<CacheKey, Book>("broken", books_config(), failing.clone())
        .unwrap();
    let healthy = manager.create_cache::<CacheKey, Book>("healthy", books_config()).unwrap();

    manager.close();

    assert_eq!(failing.close_attempts(), 1);
    assert!(broken.is_closed());
    assert!(healthy.is_closed());
    assert!(manager.is_closed());
}

#[test]
fn provider_close_reaches_every_scope() {
    let provider = CachingProvider::new();
    let a = ScopeHandle::named("a");
    let b = ScopeHandle::named("b");
    let in_a = provider.get_cache_manager(None, Some(&a), None);
    let in_b = provider.get_cache_manager(Some(&CacheLocation::new("demo")), Some(&b), None);
    let cache = in_b.create_cache::<CacheKey, Book>("books", books_config()).unwrap();

    provider.close();

    assert!(in_a.is_closed());
    assert!(in_b.is_closed());
    assert!(cache.is_closed());
    assert_eq!(provider.scope_count(), 0);

    let fresh = provider.get_cache_manager(None, Some(&a), None);
    assert!(!fresh.is_closed());
}

#[test]
fn management_beans_follow_the_cache() {
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    let registrar = provider.registrar();
    let identity = manager.identity();

    let books = manager
        .create_cache::<CacheKey, Book>("books", books_config().with_management(true).with_statistics(true))
        .unwrap();
    assert!(registrar.is_registered(&identity, "books", BeanKind::Configuration));
    assert!(registrar.is_registered(&identity, "books", BeanKind::Statistics));

    books.put(book_key(1, None), Book::new(1, "Emma")).unwrap();
    books.get(&book_key(1, None)).unwrap();
    match registrar.snapshot(&identity, "books", BeanKind::Statistics) {
        Some(BeanSnapshot::Statistics(stats)) => {
            assert_eq!(stats.hits, 1);
            assert_eq!(stats.puts, 1);
        }
        other => panic!("Expected statistics snapshot, got {:?}", other),
    }

    manager.enable_statistics("books", false).unwrap();
    assert!(!registrar.is_registered(&identity, "books", BeanKind::Statistics));
    manager.enable_management("missing", true).unwrap();

    manager.destroy_cache("books").unwrap();
    assert!(!registrar.is_registered(&identity, "books", BeanKind::Configuration));
}

#[test]
fn same_cache_name_in_two_scopes_keeps_separate_beans() {
    let provider = provider();
    let registrar = provider.registrar();
    let location = CacheLocation::new("demo");
    let (a, b) = (ScopeHandle::named("a"), ScopeHandle::named("b"));
    let config = books_config().with_management(true).with_statistics(true);

    let in_a = provider.get_cache_manager(Some(&location), Some(&a), None);
    let in_b = provider.get_cache_manager(Some(&location), Some(&b), None);
    in_a.create_cache::<CacheKey, Book>("books", config.clone()).unwrap();
    let books_b = in_b.create_cache::<CacheKey, Book>("books", config).unwrap();
    assert_ne!(in_a.identity(), in_b.identity());

    books_b.put(book_key(1, None), Book::new(1, "Emma")).unwrap();
    books_b.get(&book_key(1, None)).unwrap();
    match registrar.snapshot(&in_b.identity(), "books", BeanKind::Statistics) {
        Some(BeanSnapshot::Statistics(stats)) => assert_eq!(stats.hits, 1),
        other => panic!("Expected statistics snapshot, got {:?}", other),
    }
    match registrar.snapshot(&in_a.identity(), "books", BeanKind::Statistics) {
        Some(BeanSnapshot::Statistics(stats)) => assert_eq!(stats.hits, 0),
        other => panic!("Expected statistics snapshot, got {:?}", other),
    }

    in_a.close();
    assert!(!registrar.is_registered(&in_a.identity(), "books", BeanKind::Statistics));
    assert!(registrar.is_registered(&in_b.identity(), "books", BeanKind::Statistics));
    assert!(registrar.is_registered(&in_b.identity(), "books", BeanKind::Configuration));
}

#[test]
fn closing_while_others_fetch_never_orphans_a_manager() {
    let provider = provider();
    let scope = ScopeHandle::named("churn");
    let location = CacheLocation::new("demo");

    let handed_out: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|worker| {
                let (provider, scope, location) = (&provider, &scope, &location);
                s.spawn(move || {
                    let mut seen = Vec::new();
                    for round in 0..50 {
                        let manager = provider.get_cache_manager(Some(location), Some(scope), None);
                        if (worker + round) % 3 == 0 {
                            manager.close();
                        }
                        seen.push(manager);
                    }
                    seen
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let current = provider.get_cache_manager(Some(&location), Some(&scope), None);
    assert!(!current.is_closed());
    assert_eq!(provider.manager_count(), 1);
    for manager in handed_out.iter().filter(|m| !m.is_closed()) {
        assert!(Arc::ptr_eq(manager, &current), "an open manager must still be registered");
    }

    provider.close();
    assert!(handed_out.iter().all(|m| m.is_closed()));
    assert!(current.is_closed());
}

#[test]
fn empty_cache_name_is_rejected() {
    let provider = provider();
    let (_scope, manager) = demo_manager(&provider);
    assert_config_error(&manager.create_cache::<CacheKey, Book>("", books_config()));
}
