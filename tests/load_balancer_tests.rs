use std::collections::HashMap;

use lumen_photos::services::ai::ModelLoadBalancer;
use lumen_photos::services::{AiProviderConfig, AiSettings};

fn provider(name: &str, models: &[&str]) -> AiProviderConfig {
    AiProviderConfig {
        name: name.to_string(),
        base_url: format!("http://{name}.internal:9000"),
        api_key: "test-key".to_string(),
        models: models.iter().map(|m| m.to_string()).collect(),
    }
}

fn settings_with(providers: Vec<AiProviderConfig>) -> AiSettings {
    AiSettings {
        providers,
        ..AiSettings::default()
    }
}

#[test]
fn provider_order_contains_every_provider_exactly_once() {
    let balancer = ModelLoadBalancer::new();
    balancer
        .rebuild(&settings_with(vec![
            provider("p1", &["clip"]),
            provider("p2", &["clip"]),
            provider("p3", &["clip"]),
        ]))
        .expect("rebuild failed");

    let order = balancer.provider_order("clip").expect("provider order failed");
    assert_eq!(order.len(), 3);
    let mut names: Vec<&str> = order.iter().map(|p| p.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["p1", "p2", "p3"]);
}

#[test]
fn round_robin_selects_each_provider_evenly() {
    let balancer = ModelLoadBalancer::new();
    balancer
        .rebuild(&settings_with(vec![
            provider("p1", &["clip"]),
            provider("p2", &["clip"]),
            provider("p3", &["clip"]),
        ]))
        .expect("rebuild failed");

    let calls = 30usize;
    let mut first_choice_counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..calls {
        let order = balancer.provider_order("clip").expect("provider order failed");
        *first_choice_counts
            .entry(order[0].name.clone())
            .or_default() += 1;
    }

    // Over N calls against K providers each one leads ⌊N/K⌋..⌈N/K⌉ times.
    let floor = calls / 3;
    let ceiling = calls.div_ceil(3);
    for (name, count) in &first_choice_counts {
        assert!(
            (floor..=ceiling).contains(count),
            "{name} selected {count} times, expected between {floor} and {ceiling}"
        );
    }
}

#[test]
fn failover_order_is_the_rotation_starting_after_the_preferred() {
    let balancer = ModelLoadBalancer::new();
    balancer
        .rebuild(&settings_with(vec![
            provider("p1", &["clip"]),
            provider("p2", &["clip"]),
            provider("p3", &["clip"]),
        ]))
        .expect("rebuild failed");

    let first = balancer.provider_order("clip").expect("provider order failed");
    let second = balancer.provider_order("clip").expect("provider order failed");

    // Consecutive dispatches start one step apart and preserve ring order.
    let start_first = first[0].name.clone();
    let start_second = second[0].name.clone();
    assert_ne!(start_first, start_second);
    assert_eq!(first[1].name, second[0].name);
}

#[test]
fn unknown_model_yields_no_providers() {
    let balancer = ModelLoadBalancer::new();
    balancer
        .rebuild(&settings_with(vec![provider("p1", &["clip"])]))
        .expect("rebuild failed");

    assert!(
        balancer
            .provider_order("siglip")
            .expect("provider order failed")
            .is_empty()
    );
}

#[test]
fn models_served_by_a_subset_only_route_to_that_subset() {
    let balancer = ModelLoadBalancer::new();
    balancer
        .rebuild(&settings_with(vec![
            provider("p1", &["clip", "siglip"]),
            provider("p2", &["clip"]),
        ]))
        .expect("rebuild failed");

    for _ in 0..10 {
        let order = balancer
            .provider_order("siglip")
            .expect("provider order failed");
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].name, "p1");
    }
}

#[test]
fn any_provider_order_covers_all_providers_for_model_less_queues() {
    let balancer = ModelLoadBalancer::new();
    balancer
        .rebuild(&settings_with(vec![
            provider("p1", &["clip"]),
            provider("p2", &["siglip"]),
        ]))
        .expect("rebuild failed");

    let order = balancer
        .any_provider_order()
        .expect("provider order failed");
    assert_eq!(order.len(), 2);
}

#[test]
fn rebuild_drops_removed_models() {
    let balancer = ModelLoadBalancer::new();
    balancer
        .rebuild(&settings_with(vec![provider("p1", &["clip", "siglip"])]))
        .expect("rebuild failed");
    assert_eq!(
        balancer.model_names().expect("model names failed"),
        vec!["clip", "siglip"]
    );

    balancer
        .rebuild(&settings_with(vec![provider("p1", &["clip"])]))
        .expect("rebuild failed");
    assert_eq!(
        balancer.model_names().expect("model names failed"),
        vec!["clip"]
    );
    assert!(
        balancer
            .provider_order("siglip")
            .expect("provider order failed")
            .is_empty()
    );
}
