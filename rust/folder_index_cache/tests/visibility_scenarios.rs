//! End-to-end visibility scenarios through the public cache API.
//!
//! Run with `RUST_LOG=folder_index=debug,folder_index_cache=trace` to see
//! load and eviction events.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ahash::AHashSet;
use folder_index::types::{folder_type, module};
use folder_index::{Condition, MemoryPermissionSource, PermissionFact};
use folder_index_cache::{IndexConfig, IndexError, TenantIndexCache};
use tokio::runtime::Runtime;

const TENANT: i32 = 424;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn ids(values: &[i32]) -> AHashSet<i32> {
    values.iter().copied().collect()
}

fn cache_over(
    source: Arc<MemoryPermissionSource>,
    config: IndexConfig,
    rt: &Runtime,
) -> TenantIndexCache {
    TenantIndexCache::new(config, source, rt.handle().clone())
}

#[test]
fn group_grant_without_read_is_invisible() {
    init_tracing();
    let rt = runtime();
    let source = Arc::new(MemoryPermissionSource::new());
    source.put_tenant(
        TENANT,
        vec![
            PermissionFact::new(10, 1)
                .read()
                .module(1)
                .folder_type(folder_type::PRIVATE)
                .creator(1),
            PermissionFact::new(10, 2)
                .module(1)
                .folder_type(folder_type::PRIVATE)
                .creator(1),
        ],
    );
    let cache = cache_over(source, IndexConfig::default(), &rt);

    let map = cache.get_map_for(TENANT).unwrap();
    assert_eq!(map.visible_for_user(1, &[2], &[1], &[]), ids(&[10]));
    assert!(map.visible_for_user(3, &[2], &[1], &[]).is_empty());
}

#[test]
fn calendar_user_with_two_groups() {
    init_tracing();
    let rt = runtime();
    let source = Arc::new(MemoryPermissionSource::new());
    let user = 100;
    let (staff, board) = (500, 501);
    source.put_tenant(
        TENANT,
        vec![
            // Own calendar.
            PermissionFact::new(1, user)
                .admin()
                .module(module::CALENDAR)
                .folder_type(folder_type::PRIVATE)
                .creator(user)
                .parent(9),
            // A colleague's calendar shared with the user directly.
            PermissionFact::new(2, user)
                .read()
                .module(module::CALENDAR)
                .folder_type(folder_type::PRIVATE)
                .creator(101)
                .parent(9)
                .modified(2_000),
            // Public team calendar through the staff group.
            PermissionFact::new(3, staff)
                .read()
                .module(module::CALENDAR)
                .folder_type(folder_type::PUBLIC)
                .creator(1)
                .parent(2)
                .modified(3_000),
            // Board documents, not readable by the board group itself.
            PermissionFact::new(4, board)
                .module(module::INFOSTORE)
                .folder_type(folder_type::PUBLIC)
                .creator(1),
            // Board contacts.
            PermissionFact::new(5, board)
                .read()
                .module(module::CONTACT)
                .folder_type(folder_type::PUBLIC)
                .creator(1),
        ],
    );
    let cache = cache_over(source, IndexConfig::default(), &rt);
    let map = cache.get_map_for(TENANT).unwrap();
    let groups = [staff, board];

    assert_eq!(map.visible_for_user(user, &groups, &[], &[]), ids(&[1, 2, 3, 5]));
    assert_eq!(
        map.visible_module_for_user(user, &groups, &[], module::CALENDAR),
        ids(&[1, 2, 3])
    );
    assert!(map
        .visible_module_for_user(user, &groups, &[module::CALENDAR], module::CONTACT)
        .is_empty());
    assert_eq!(
        map.visible_type_for_user(user, &groups, &[], folder_type::SHARED),
        ids(&[2])
    );
    assert!(map.has_shared_folder(user, &groups, &[module::CALENDAR]));
    assert!(!map.has_shared_folder(user, &groups, &[module::CONTACT]));
    assert_eq!(map.visible_subfolders(user, &groups, &[], 9), ids(&[1, 2]));
    assert_eq!(map.visible_modified_since(user, &groups, &[], 2_500), ids(&[3]));
    assert_eq!(
        map.visible_for_user(user, &groups, &[], &[Condition::Admin]),
        ids(&[1])
    );
    assert!(!map.is_visible_folder(user, &groups, &[], 4));
    assert!(map.is_visible_folder(user, &groups, &[], 5));
}

#[test]
fn tenants_are_isolated() {
    let rt = runtime();
    let source = Arc::new(MemoryPermissionSource::new());
    source.put_tenant(1, vec![PermissionFact::new(10, 7).read()]);
    source.put_tenant(2, vec![PermissionFact::new(20, 7).read()]);
    let cache = cache_over(source.clone(), IndexConfig::default(), &rt);

    assert_eq!(cache.get_map_for(1).unwrap().visible_for_entity(7), ids(&[10]));
    assert_eq!(cache.get_map_for(2).unwrap().visible_for_entity(7), ids(&[20]));
    cache.drop_for(1);
    assert!(cache.opt_map_for(1, false).is_none());
    assert!(cache.opt_map_for(2, false).is_some());
}

#[test]
fn unused_index_is_evicted_after_ttl() {
    init_tracing();
    let rt = runtime();
    let source = Arc::new(MemoryPermissionSource::new());
    source.put_tenant(TENANT, vec![PermissionFact::new(10, 1).read()]);
    let config = IndexConfig {
        enabled: true,
        idle_ttl_ms: 150,
        sweep_interval_ms: 25,
    };
    let cache = cache_over(source, config, &rt);
    cache.start();

    cache.get_map_for(TENANT).unwrap();
    thread::sleep(Duration::from_millis(500));
    assert!(cache.opt_map_for(TENANT, false).is_none());
    cache.stop();
}

#[test]
fn disabled_index_reports_disabled() {
    let rt = runtime();
    let source = Arc::new(MemoryPermissionSource::new());
    let cache = cache_over(source, IndexConfig::disabled(), &rt);
    let err = cache.get_map_for(TENANT).unwrap_err();
    assert!(matches!(err, IndexError::Disabled));
    assert_eq!(err.to_string(), "permission index is disabled");
}
