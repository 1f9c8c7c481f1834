use lumen_photos::services::{AiProviderConfig, AiSettings};

fn provider(name: &str, models: &[&str]) -> AiProviderConfig {
    AiProviderConfig {
        name: name.to_string(),
        base_url: format!("http://{name}:9000"),
        api_key: "k".to_string(),
        models: models.iter().map(|m| m.to_string()).collect(),
    }
}

#[test]
fn model_names_are_deduplicated_in_first_seen_order() {
    let settings = AiSettings {
        providers: vec![
            provider("p1", &["clip", "siglip"]),
            provider("p2", &["siglip", "aesthetic-v2"]),
        ],
        ..AiSettings::default()
    };
    assert_eq!(settings.model_names(), vec!["clip", "siglip", "aesthetic-v2"]);
}

#[test]
fn providers_for_returns_only_hosts_of_that_model() {
    let settings = AiSettings {
        providers: vec![
            provider("p1", &["clip"]),
            provider("p2", &["clip", "siglip"]),
            provider("p3", &["siglip"]),
        ],
        ..AiSettings::default()
    };

    let clip_hosts: Vec<String> = settings
        .providers_for("clip")
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(clip_hosts, vec!["p1", "p2"]);

    assert!(settings.providers_for("unknown").is_empty());
}

#[test]
fn defaults_enable_every_task_type() {
    let settings = AiSettings::default();
    assert!(settings.image_embedding_enabled);
    assert!(settings.tag_embedding_enabled);
    assert!(settings.aesthetic_enabled);
    assert!(settings.providers.is_empty());
}
