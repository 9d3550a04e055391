//! Real Docker integration tests for the runtime adapter

use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use std::collections::HashMap;
use std::time::Duration;
use updater_docker::common::{ContainerRuntime, ImageReference, LabelFilter, NoProgress};
use updater_docker::{require_docker, DockerRuntime};

const TEST_LABEL: &str = "updater.integration";

fn unique_name(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("{prefix}-{}-{nanos}", std::process::id())
}

async fn force_remove(runtime: &DockerRuntime, id: &str) {
    let _ = runtime
        .client()
        .remove_container(
            id,
            Some(RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            }),
        )
        .await;
}

#[tokio::test]
#[ignore = "Requires Docker"] // Run with: cargo test --test docker_integration -- --ignored
async fn test_replace_labeled_container() -> anyhow::Result<()> {
    require_docker!();
    let runtime = DockerRuntime::connect_with_defaults()?;
    runtime.ping().await?;

    let image = ImageReference::parse("alpine");
    runtime.pull_image(&image, "latest", &NoProgress).await?;

    let name = unique_name("updater-it");
    let created = runtime
        .client()
        .create_container(
            Some(CreateContainerOptions {
                name: name.clone(),
                platform: None,
            }),
            Config {
                image: Some("alpine:latest".to_string()),
                cmd: Some(vec!["sleep".to_string(), "300".to_string()]),
                env: Some(vec!["A=1".to_string()]),
                labels: Some(HashMap::from([(TEST_LABEL.to_string(), "true".to_string())])),
                ..Default::default()
            },
        )
        .await?;
    runtime.start_container(&created.id).await?;

    let filter = LabelFilter::new(TEST_LABEL);
    let listed = runtime.list_containers(&filter, true).await?;
    assert!(listed.iter().any(|c| c.id == created.id && c.managed));

    let spec = runtime.inspect_container(&created.id).await?;
    assert_eq!(spec.name, name);
    assert!(spec.env.contains(&"A=1".to_string()));

    runtime
        .stop_container(&created.id, Duration::from_secs(1))
        .await?;
    // Stopping twice is not an error
    runtime
        .stop_container(&created.id, Duration::from_secs(1))
        .await?;
    runtime.remove_container(&created.id, true, true).await?;

    let new_id = runtime.create_container(&spec).await?;
    runtime.start_container(&new_id).await?;
    assert_ne!(new_id, created.id);

    let recreated = runtime.inspect_container(&new_id).await?;
    assert_eq!(recreated.name, name);
    assert_eq!(recreated.cmd, spec.cmd);
    assert_eq!(recreated.labels.get(TEST_LABEL).map(String::as_str), Some("true"));

    force_remove(&runtime, &new_id).await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_pull_unknown_image_fails() -> anyhow::Result<()> {
    require_docker!();
    let runtime = DockerRuntime::connect_with_defaults()?;

    let image = ImageReference::parse("docker.io/library/this-image-definitely-does-not-exist-ever");
    let result = runtime.pull_image(&image, "latest", &NoProgress).await;
    assert!(result.is_err(), "Expected pull of a missing image to fail");
    Ok(())
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_inspect_missing_container_is_not_found() -> anyhow::Result<()> {
    require_docker!();
    let runtime = DockerRuntime::connect_with_defaults()?;

    let err = runtime
        .inspect_container("updater-no-such-container")
        .await
        .unwrap_err();
    assert!(matches!(err, updater_docker::common::RuntimeError::NotFound(_)));
    Ok(())
}
