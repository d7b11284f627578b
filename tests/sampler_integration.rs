//! Integration tests for the background sampler
//!
//! Uses wiremock for HTTP dependencies and real TCP listeners for TCP
//! dependencies. System resources come from a fixed source so gauge values
//! are deterministic.

use async_trait::async_trait;
use reqmeter::error::SampleError;
use reqmeter::metrics::{CacheOperation, InstrumentCatalog, MetricRegistry};
use reqmeter::sampler::{
    BackgroundSampler, DependencyProbe, HttpProbe, ProbeOutcome, SamplerState, SystemSample,
    SystemSource, TcpProbe,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedSystem;

#[async_trait]
impl SystemSource for FixedSystem {
    async fn sample(&self) -> Result<SystemSample, SampleError> {
        Ok(SystemSample {
            cpu_percent: 5.0,
            memory_percent: 50.0,
            memory_available_gb: 8.0,
            disk_percent: 70.0,
        })
    }
}

fn catalog() -> Arc<InstrumentCatalog> {
    let registry = Arc::new(MetricRegistry::new("sampler_", HashMap::new()));
    Arc::new(InstrumentCatalog::register(registry).expect("catalog"))
}

fn sampler(catalog: &Arc<InstrumentCatalog>) -> BackgroundSampler {
    BackgroundSampler::new(
        Arc::clone(catalog),
        Arc::new(FixedSystem),
        Duration::from_secs(15),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache hit ratio
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hit_ratio_is_one_without_traffic() {
    let catalog = catalog();
    let sampler = sampler(&catalog).with_cache_backends(vec!["valkey".to_string()]);

    let snapshot = sampler.tick().await;

    assert_eq!(snapshot.cache_hit_ratios["valkey"], 1.0);
    assert_eq!(
        catalog.cache_hit_ratio().value(&[("backend", "valkey")]),
        1.0
    );
}

#[tokio::test]
async fn test_hit_ratio_reflects_eighty_twenty_traffic() {
    let catalog = catalog();
    for _ in 0..80 {
        catalog.record_cache("valkey", CacheOperation::Hit).unwrap();
    }
    for _ in 0..20 {
        catalog.record_cache("valkey", CacheOperation::Miss).unwrap();
    }
    // Other backends and operations do not leak into the ratio
    catalog.record_cache("pulsar", CacheOperation::Miss).unwrap();
    catalog.record_cache("valkey", CacheOperation::Error).unwrap();

    let sampler = sampler(&catalog)
        .with_cache_backends(vec!["valkey".to_string(), "pulsar".to_string()]);
    sampler.tick().await;

    let ratio = catalog.cache_hit_ratio().value(&[("backend", "valkey")]);
    assert!((ratio - 0.8).abs() < 1e-9, "expected 0.8, got {}", ratio);
    assert_eq!(
        catalog.cache_hit_ratio().value(&[("backend", "pulsar")]),
        0.0
    );
}

#[tokio::test]
async fn test_ratio_tracks_new_traffic_between_ticks() {
    let catalog = catalog();
    let sampler = sampler(&catalog).with_cache_backends(vec!["valkey".to_string()]);

    catalog.record_cache("valkey", CacheOperation::Miss).unwrap();
    sampler.tick().await;
    assert_eq!(catalog.cache_hit_ratio().value(&[("backend", "valkey")]), 0.0);

    catalog.record_cache("valkey", CacheOperation::Hit).unwrap();
    sampler.tick().await;
    assert_eq!(catalog.cache_hit_ratio().value(&[("backend", "valkey")]), 0.5);
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP and TCP probes
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_probe_healthy_on_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let probe = HttpProbe::new(
        "search",
        format!("{}/health", server.uri()),
        Duration::from_secs(2),
    )
    .unwrap();

    assert_eq!(probe.check().await, ProbeOutcome::Healthy);
}

#[tokio::test]
async fn test_http_probe_unhealthy_on_5xx() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let probe = HttpProbe::new("search", server.uri(), Duration::from_secs(2)).unwrap();
    assert_eq!(probe.check().await, ProbeOutcome::Unhealthy);
}

#[tokio::test]
async fn test_http_probe_unhealthy_on_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let probe = HttpProbe::new("search", server.uri(), Duration::from_millis(50)).unwrap();
    assert_eq!(probe.check().await, ProbeOutcome::Unhealthy);
}

#[tokio::test]
async fn test_probe_failures_are_isolated_per_dependency() {
    let healthy = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&healthy)
        .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bus_addr = listener.local_addr().unwrap();

    let probes: Vec<Arc<dyn DependencyProbe>> = vec![
        Arc::new(HttpProbe::new("search", healthy.uri(), Duration::from_secs(1)).unwrap()),
        Arc::new(TcpProbe::new("bus", bus_addr.to_string(), Duration::from_secs(1))),
        Arc::new(TcpProbe::new("broken", "no-port-here", Duration::from_secs(1))),
    ];

    let catalog = catalog();
    let sampler = sampler(&catalog).with_probes(probes);
    let snapshot = sampler.tick().await;

    let up = catalog.dependency_health();
    assert_eq!(up.value(&[("dependency", "search")]), 1.0);
    assert_eq!(up.value(&[("dependency", "bus")]), 1.0);
    assert_eq!(up.value(&[("dependency", "broken")]), 0.0);

    assert!(matches!(snapshot.dependencies["broken"], ProbeOutcome::Error(_)));
    assert_eq!(catalog.sampler_errors().value(&[("stage", "probe")]), 1.0);

    // System gauges were still written in the same tick
    assert_eq!(catalog.system_disk_usage().value(&[]), 70.0);
    drop(listener);
}

#[tokio::test]
async fn test_dependency_recovers_on_next_tick() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let catalog = catalog();
    let probe = HttpProbe::new("search", server.uri(), Duration::from_secs(1)).unwrap();
    let sampler = sampler(&catalog).with_probes(vec![Arc::new(probe)]);

    sampler.tick().await;
    assert_eq!(catalog.dependency_health().value(&[("dependency", "search")]), 0.0);

    sampler.tick().await;
    assert_eq!(catalog.dependency_health().value(&[("dependency", "search")]), 1.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_tick_can_be_driven_without_tokio_main() {
    let catalog = catalog();
    let sampler = sampler(&catalog);

    let snapshot = tokio_test::block_on(sampler.tick());
    assert_eq!(snapshot.errors, 0);
    assert_eq!(sampler.ticks(), 1);
    assert_eq!(sampler.state(), SamplerState::Idle);
    assert_eq!(catalog.system_cpu_usage().value(&[]), 5.0);
}

#[tokio::test]
async fn test_testing_mode_never_samples() {
    let catalog = catalog();
    let sampler = Arc::new(
        BackgroundSampler::new(Arc::clone(&catalog), Arc::new(FixedSystem), Duration::from_millis(1))
            .with_testing(true),
    );

    assert!(Arc::clone(&sampler).start().is_none());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(sampler.ticks(), 0);
    assert!(catalog.registry().collect_all().is_empty());
}
