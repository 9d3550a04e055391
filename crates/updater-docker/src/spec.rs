//! Conversion between engine inspect payloads and [`ContainerSpec`].

use bollard::container::{Config, NetworkingConfig};
use bollard::models::{ContainerInspectResponse, EndpointSettings, HealthConfig, HostConfig};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use updater_common::{ContainerSpec, HealthCheck};

use crate::{EngineError, Result};

/// Builds a spec from an inspect response. The container name loses the
/// engine's leading `/`.
pub fn spec_from_inspect(inspect: ContainerInspectResponse) -> Result<ContainerSpec> {
    let name = inspect
        .name
        .as_deref()
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| EngineError::Payload("inspect response has no container name".into()))?;
    let config = inspect
        .config
        .ok_or_else(|| EngineError::Payload(format!("inspect response for {name} has no config")))?;
    let image = config
        .image
        .clone()
        .ok_or_else(|| EngineError::Payload(format!("container {name} has no image")))?;

    let host_config = inspect
        .host_config
        .map(|hc| serde_json::to_value(hc).map_err(payload_err))
        .transpose()?;

    let mut networks = BTreeMap::new();
    if let Some(endpoints) = inspect.network_settings.and_then(|ns| ns.networks) {
        for (network, endpoint) in endpoints {
            networks.insert(network, serde_json::to_value(endpoint).map_err(payload_err)?);
        }
    }

    Ok(ContainerSpec {
        name,
        image,
        env: config.env.unwrap_or_default(),
        exposed_ports: keys(config.exposed_ports),
        volumes: keys(config.volumes),
        host_config,
        networks,
        cmd: config.cmd,
        entrypoint: config.entrypoint,
        shell: config.shell,
        working_dir: config.working_dir,
        hostname: config.hostname,
        domainname: config.domainname,
        user: config.user,
        attach_stdin: config.attach_stdin,
        attach_stdout: config.attach_stdout,
        attach_stderr: config.attach_stderr,
        tty: config.tty,
        open_stdin: config.open_stdin,
        stdin_once: config.stdin_once,
        args_escaped: config.args_escaped,
        network_disabled: config.network_disabled,
        mac_address: config.mac_address,
        on_build: config.on_build,
        labels: config.labels.unwrap_or_default().into_iter().collect(),
        healthcheck: config.healthcheck.map(|hc| HealthCheck {
            test: hc.test,
            interval: hc.interval,
            timeout: hc.timeout,
            retries: hc.retries,
            start_period: hc.start_period,
            start_interval: hc.start_interval,
        }),
        stop_signal: config.stop_signal,
        stop_timeout: config.stop_timeout,
        platform: inspect.platform.filter(|p| !p.is_empty()),
    })
}

/// Builds the create body for `spec`, network attachments included.
pub fn config_from_spec(spec: &ContainerSpec) -> Result<Config<String>> {
    let host_config = spec
        .host_config
        .clone()
        .map(serde_json::from_value::<HostConfig>)
        .transpose()
        .map_err(payload_err)?;

    let networking_config = if spec.networks.is_empty() {
        None
    } else {
        let mut endpoints_config = HashMap::new();
        for (network, endpoint) in &spec.networks {
            let settings: EndpointSettings =
                serde_json::from_value(endpoint.clone()).map_err(payload_err)?;
            endpoints_config.insert(network.clone(), settings);
        }
        Some(NetworkingConfig { endpoints_config })
    };

    Ok(Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports: empty_object_map(&spec.exposed_ports),
        volumes: empty_object_map(&spec.volumes),
        host_config,
        networking_config,
        cmd: spec.cmd.clone(),
        entrypoint: spec.entrypoint.clone(),
        shell: spec.shell.clone(),
        working_dir: spec.working_dir.clone(),
        hostname: spec.hostname.clone(),
        domainname: spec.domainname.clone(),
        user: spec.user.clone(),
        attach_stdin: spec.attach_stdin,
        attach_stdout: spec.attach_stdout,
        attach_stderr: spec.attach_stderr,
        tty: spec.tty,
        open_stdin: spec.open_stdin,
        stdin_once: spec.stdin_once,
        args_escaped: spec.args_escaped,
        network_disabled: spec.network_disabled,
        mac_address: spec.mac_address.clone(),
        on_build: spec.on_build.clone(),
        labels: Some(spec.labels.clone().into_iter().collect()),
        healthcheck: spec.healthcheck.as_ref().map(|hc| HealthConfig {
            test: hc.test.clone(),
            interval: hc.interval,
            timeout: hc.timeout,
            retries: hc.retries,
            start_period: hc.start_period,
            start_interval: hc.start_interval,
        }),
        stop_signal: spec.stop_signal.clone(),
        stop_timeout: spec.stop_timeout,
        ..Default::default()
    })
}

fn keys(map: Option<HashMap<String, HashMap<(), ()>>>) -> BTreeSet<String> {
    map.map(|m| m.into_keys().collect()).unwrap_or_default()
}

// The engine encodes port and volume sets as objects with empty values.
fn empty_object_map(set: &BTreeSet<String>) -> Option<HashMap<String, HashMap<(), ()>>> {
    if set.is_empty() {
        None
    } else {
        Some(set.iter().map(|k| (k.clone(), HashMap::new())).collect())
    }
}

fn payload_err(err: serde_json::Error) -> EngineError {
    EngineError::Payload(err.to_string())
}
