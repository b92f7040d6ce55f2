//! Pod specification builder for Kubernetes.
//!
//! One pod is one compute unit: it runs a single game server with its
//! console enabled and never restarts on its own. Restarts go through the
//! control plane so the record store stays the source of truth.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, Probe, ResourceRequirements, SecretKeySelector, TCPSocketAction, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use lodestone_core::ServerId;

use crate::types::{ContainerSpec, LauncherConfig, GAME_PORT, RCON_PORT};

/// Label selecting every game server pod.
pub const APP_LABEL: &str = "game-server";
/// Label and annotation carrying the server ID.
pub const SERVER_ID_KEY: &str = "lodestone.io/server-id";

const POD_NAME_PREFIX: &str = "mc-";
const MAX_NAME_STEM: usize = 40;

/// Build a Kubernetes pod for a game server.
#[must_use]
pub fn build_pod(server_id: &ServerId, spec: &ContainerSpec, config: &LauncherConfig) -> Pod {
    let pod_name = pod_name_for_server(server_id);

    Pod {
        metadata: build_metadata(&pod_name, server_id, config),
        spec: Some(build_pod_spec(server_id, spec, config)),
        ..Default::default()
    }
}

/// Generate a fresh pod name for a server.
///
/// Names are `mc-<server id>-<8 hex>`, lowercased and with characters that
/// are not valid in DNS labels replaced by `-`. The random suffix keeps a
/// relaunch from colliding with a pod that is still terminating.
#[must_use]
pub fn pod_name_for_server(server_id: &ServerId) -> String {
    let stem: String = server_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(MAX_NAME_STEM)
        .collect();
    let stem = stem.trim_matches('-');
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{POD_NAME_PREFIX}{stem}-{}", &suffix[..8])
}

/// Label values must start and end with an alphanumeric character.
fn label_value(server_id: &ServerId) -> String {
    server_id
        .as_str()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

fn build_metadata(pod_name: &str, server_id: &ServerId, config: &LauncherConfig) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), APP_LABEL.to_string());
    labels.insert(SERVER_ID_KEY.to_string(), label_value(server_id));

    let mut annotations = BTreeMap::new();
    annotations.insert(SERVER_ID_KEY.to_string(), server_id.to_string());
    annotations.insert(
        "lodestone.io/created-at".to_string(),
        chrono::Utc::now().to_rfc3339(),
    );

    ObjectMeta {
        name: Some(pod_name.to_string()),
        namespace: Some(config.namespace.clone()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    }
}

fn build_pod_spec(server_id: &ServerId, spec: &ContainerSpec, config: &LauncherConfig) -> PodSpec {
    PodSpec {
        containers: vec![build_container(server_id, spec, config)],
        volumes: config
            .data_pvc_name
            .as_ref()
            .map(|claim| vec![build_data_volume(claim)]),
        restart_policy: Some("Never".to_string()),
        // Leave the server time to flush the world to disk.
        termination_grace_period_seconds: Some(60),
        ..Default::default()
    }
}

fn build_container(server_id: &ServerId, spec: &ContainerSpec, config: &LauncherConfig) -> Container {
    Container {
        name: "minecraft".to_string(),
        image: Some(spec.image.clone()),
        ports: Some(vec![
            ContainerPort {
                container_port: i32::from(GAME_PORT),
                name: Some("game".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: i32::from(RCON_PORT),
                name: Some("rcon".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(build_env_vars(server_id, spec, config)),
        resources: Some(build_resources(spec)),
        volume_mounts: config
            .data_pvc_name
            .as_ref()
            .map(|_| vec![build_data_mount(server_id)]),
        readiness_probe: Some(build_readiness_probe()),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn build_env_vars(server_id: &ServerId, spec: &ContainerSpec, config: &LauncherConfig) -> Vec<EnvVar> {
    let mut vars = vec![
        env("SERVER_ID", server_id.as_str()),
        env("CONFIG_TABLE_NAME", config.table_name.as_str()),
        env("EULA", "TRUE"),
        env("ENABLE_RCON", "true"),
        env("RCON_PORT", RCON_PORT.to_string()),
        env("SERVER_PORT", GAME_PORT.to_string()),
        env("ENABLE_WHITELIST", "true"),
    ];

    if let Some(secret) = &config.rcon_secret_name {
        vars.push(EnvVar {
            name: "RCON_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.clone(),
                    key: "password".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    vars.extend(spec.env.iter().map(|(k, v)| env(k, v.as_str())));
    vars
}

fn build_resources(spec: &ContainerSpec) -> ResourceRequirements {
    let cpu = Quantity(format!("{}m", spec.cpu_millicores));
    let memory = Quantity(format!("{}Mi", spec.memory_mb));

    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), cpu.clone());
    requests.insert("memory".to_string(), memory.clone());

    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), cpu);
    limits.insert("memory".to_string(), memory);

    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

fn build_data_volume(claim: &str) -> Volume {
    Volume {
        name: "world".to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_data_mount(server_id: &ServerId) -> VolumeMount {
    VolumeMount {
        name: "world".to_string(),
        mount_path: "/data".to_string(),
        sub_path: Some(server_id.to_string()),
        ..Default::default()
    }
}

/// Ready once the console port accepts connections; the game port opens earlier.
fn build_readiness_probe() -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(i32::from(RCON_PORT)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(20),
        period_seconds: Some(5),
        timeout_seconds: Some(3),
        failure_threshold: Some(60),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ServerId {
        ServerId::parse(s).unwrap()
    }

    #[test]
    fn pod_name_format() {
        let name = pod_name_for_server(&sid("Survival_World.2"));
        assert!(name.starts_with("mc-survival-world-2-"));
        assert_eq!(name.len(), "mc-survival-world-2-".len() + 8);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn pod_names_are_unique_per_launch() {
        let id = sid("s1");
        assert_ne!(pod_name_for_server(&id), pod_name_for_server(&id));
    }

    #[test]
    fn pod_name_is_bounded() {
        let name = pod_name_for_server(&sid(&"a".repeat(64)));
        assert!(name.len() <= 63);
    }

    #[test]
    fn build_pod_has_required_fields() {
        let config = LauncherConfig::default();
        let pod = build_pod(&sid("s1"), &config.default_spec(), &config);

        let meta = &pod.metadata;
        assert_eq!(meta.namespace.as_deref(), Some("game-servers"));
        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels.get("app"), Some(&APP_LABEL.to_string()));
        assert_eq!(labels.get(SERVER_ID_KEY), Some(&"s1".to_string()));
        let annotations = meta.annotations.as_ref().unwrap();
        assert_eq!(annotations.get(SERVER_ID_KEY), Some(&"s1".to_string()));

        let pod_spec = pod.spec.as_ref().unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        assert!(pod_spec.volumes.is_none());

        let container = &pod_spec.containers[0];
        let ports: Vec<_> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![25565, 25575]);
        assert!(container.readiness_probe.is_some());

        let env = container.env.as_ref().unwrap();
        let value = |name: &str| {
            env.iter()
                .find(|e| e.name == name)
                .and_then(|e| e.value.clone())
        };
        assert_eq!(value("SERVER_ID").as_deref(), Some("s1"));
        assert_eq!(value("CONFIG_TABLE_NAME").as_deref(), Some("server-config"));
        assert_eq!(value("ENABLE_RCON").as_deref(), Some("true"));
    }

    #[test]
    fn build_pod_uses_spec_resources() {
        let config = LauncherConfig::default();
        let pod = build_pod(&sid("s1"), &config.default_spec(), &config);
        let container = &pod.spec.as_ref().unwrap().containers[0];
        let resources = container.resources.as_ref().unwrap();

        let requests = resources.requests.as_ref().unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("1024m".to_string())));
        assert_eq!(requests.get("memory"), Some(&Quantity("6144Mi".to_string())));
    }

    #[test]
    fn build_pod_mounts_world_volume_and_secret() {
        let config = LauncherConfig {
            data_pvc_name: Some("worlds".to_string()),
            rcon_secret_name: Some("rcon".to_string()),
            ..LauncherConfig::default()
        };
        let pod = build_pod(&sid("s1"), &config.default_spec(), &config);
        let pod_spec = pod.spec.as_ref().unwrap();

        let volume = &pod_spec.volumes.as_ref().unwrap()[0];
        assert_eq!(
            volume.persistent_volume_claim.as_ref().unwrap().claim_name,
            "worlds"
        );
        let container = &pod_spec.containers[0];
        let mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.sub_path.as_deref(), Some("s1"));

        let secret_env = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "RCON_PASSWORD")
            .unwrap();
        assert!(secret_env.value_from.is_some());
    }
}
