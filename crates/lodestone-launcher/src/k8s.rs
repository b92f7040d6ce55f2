//! Kubernetes launcher implementation.
//!
//! This module provides the `K8sLauncher`, which runs each game server as a
//! single pod, and the `Launcher` trait the control plane depends on.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{info, warn};

use lodestone_core::{ServerId, TaskHandle};

use crate::pod::build_pod;
use crate::types::{ContainerSpec, LauncherConfig, TaskDescription, TaskPhase, GAME_PORT};
use crate::{LauncherError, Result};

/// Starts and stops the compute unit backing a server.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Request a new compute unit for `server_id`.
    ///
    /// # Errors
    ///
    /// Returns `LauncherError::Capacity` if the platform refuses to
    /// provision. Callers must not retry blindly.
    async fn launch(&self, server_id: &ServerId, spec: &ContainerSpec) -> Result<TaskHandle>;

    /// Request shutdown. A unit that is already gone counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails for any other reason.
    async fn terminate(&self, handle: &TaskHandle) -> Result<()>;

    /// Inspect a unit.
    ///
    /// # Errors
    ///
    /// Returns `LauncherError::TaskNotFound` if the unit does not exist.
    async fn describe(&self, handle: &TaskHandle) -> Result<TaskDescription>;
}

/// Kubernetes-based launcher for game server pods.
pub struct K8sLauncher {
    client: Client,
    config: LauncherConfig,
}

impl K8sLauncher {
    /// Create a new Kubernetes launcher.
    ///
    /// This will attempt to connect to the cluster using in-cluster config
    /// or kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn new(config: LauncherConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client, config })
    }

    /// Create a launcher with a pre-configured client.
    #[must_use]
    pub const fn with_client(client: Client, config: LauncherConfig) -> Self {
        Self { client, config }
    }

    /// Get a reference to the launcher config.
    #[must_use]
    pub const fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Get the pods API client for the configured namespace.
    fn pods_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn is_pod_ready(pod: &Pod) -> bool {
        pod.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
    }

    /// Find a failure reason in the pod's conditions or container states.
    fn extract_failure(pod: &Pod) -> Option<String> {
        let status = pod.status.as_ref()?;

        if let Some(conditions) = &status.conditions {
            for condition in conditions {
                if condition.type_ == "PodScheduled" && condition.status == "False" {
                    if let Some(msg) = &condition.message {
                        return Some(msg.clone());
                    }
                }
            }
        }

        let waiting_errors = [
            "ImagePullBackOff",
            "ErrImagePull",
            "CrashLoopBackOff",
            "CreateContainerError",
            "CreateContainerConfigError",
            "InvalidImageName",
            "RunContainerError",
        ];

        for cs in status.container_statuses.iter().flatten() {
            let Some(state) = &cs.state else {
                continue;
            };
            if let Some(reason) = state.waiting.as_ref().and_then(|w| w.reason.as_ref()) {
                if waiting_errors.contains(&reason.as_str()) {
                    return Some(reason.clone());
                }
            }
            if let Some(terminated) = &state.terminated {
                return Some(
                    terminated
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("Exit code: {}", terminated.exit_code)),
                );
            }
        }

        status.message.clone()
    }

    fn is_unschedulable(pod: &Pod) -> bool {
        pod.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions.iter().any(|c| {
                    c.type_ == "PodScheduled"
                        && c.status == "False"
                        && c.reason.as_deref() == Some("Unschedulable")
                })
            })
    }

    fn describe_pod(pod: &Pod) -> TaskDescription {
        let status = pod.status.as_ref();

        let phase = status
            .and_then(|s| s.phase.as_deref())
            .map(TaskPhase::from_k8s_phase)
            .unwrap_or_default();

        let network_address = status
            .and_then(|s| s.pod_ip.as_ref())
            .map(|ip| format!("{ip}:{GAME_PORT}"));

        TaskDescription {
            running: phase == TaskPhase::Running && Self::is_pod_ready(pod),
            phase,
            network_address,
            started_at: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
            message: Self::extract_failure(pod),
            unschedulable: Self::is_unschedulable(pod),
        }
    }
}

#[async_trait]
impl Launcher for K8sLauncher {
    async fn launch(&self, server_id: &ServerId, spec: &ContainerSpec) -> Result<TaskHandle> {
        self.config.validate_resources(spec)?;

        let pod = build_pod(server_id, spec, &self.config);
        let pod_name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| LauncherError::Config("pod built without a name".into()))?;

        match self.pods_api().create(&PostParams::default(), &pod).await {
            Ok(_) => {}
            // Quota exhaustion and admission rejections mean no capacity.
            Err(kube::Error::Api(e)) if matches!(e.code, 403 | 422 | 429) => {
                warn!(server_id = %server_id, code = e.code, reason = %e.message, "Pod rejected");
                return Err(LauncherError::Capacity(e.message));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            server_id = %server_id,
            pod_name,
            cpu = spec.cpu_millicores,
            memory = spec.memory_mb,
            "Created game server pod"
        );

        Ok(TaskHandle::new(pod_name))
    }

    async fn terminate(&self, handle: &TaskHandle) -> Result<()> {
        match self
            .pods_api()
            .delete(handle.as_str(), &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(task = %handle, "Terminated game server pod");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!(task = %handle, "Pod not found, already terminated");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn describe(&self, handle: &TaskHandle) -> Result<TaskDescription> {
        match self.pods_api().get_opt(handle.as_str()).await? {
            Some(pod) => Ok(Self::describe_pod(&pod)),
            None => Err(LauncherError::TaskNotFound(handle.to_string())),
        }
    }
}

/// A mock launcher for testing without a real Kubernetes cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// A mock launcher that keeps tasks in memory.
    ///
    /// Handles are issued as `h1`, `h2`, ... in launch order. A task becomes
    /// running after a configurable number of `describe` calls.
    #[derive(Default)]
    pub struct MockLauncher {
        inner: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        tasks: HashMap<TaskHandle, MockTask>,
        addresses: HashMap<ServerId, String>,
        launches: Vec<(ServerId, TaskHandle)>,
        terminations: Vec<TaskHandle>,
        polls_before_ready: u32,
        refuse_launches: bool,
        never_ready: bool,
        unschedulable: bool,
    }

    struct MockTask {
        server_id: ServerId,
        address: String,
        polls_left: u32,
        phase: TaskPhase,
        unschedulable: bool,
    }

    impl MockLauncher {
        /// Create a new mock launcher.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fix the address reported for tasks of `server_id`.
        pub fn set_address(&self, server_id: &ServerId, address: impl Into<String>) {
            self.inner
                .lock()
                .addresses
                .insert(server_id.clone(), address.into());
        }

        /// Number of `describe` calls before a new task reports running.
        pub fn set_polls_before_ready(&self, polls: u32) {
            self.inner.lock().polls_before_ready = polls;
        }

        /// Make every launch fail with `Capacity`.
        pub fn refuse_launches(&self, refuse: bool) {
            self.inner.lock().refuse_launches = refuse;
        }

        /// Keep new tasks pending forever.
        pub fn never_ready(&self, never: bool) {
            self.inner.lock().never_ready = never;
        }

        /// Keep new tasks pending and report that no node can take them.
        pub fn unschedulable(&self, unschedulable: bool) {
            self.inner.lock().unschedulable = unschedulable;
        }

        /// Mark a task as exited, as if the server crashed.
        pub fn kill(&self, handle: &TaskHandle) {
            if let Some(task) = self.inner.lock().tasks.get_mut(handle) {
                task.phase = TaskPhase::Failed;
            }
        }

        /// Forget a task entirely, as if the platform garbage collected it.
        pub fn forget(&self, handle: &TaskHandle) {
            self.inner.lock().tasks.remove(handle);
        }

        /// Number of launches so far.
        #[must_use]
        pub fn launch_count(&self) -> usize {
            self.inner.lock().launches.len()
        }

        /// Every handle passed to `terminate`, in order.
        #[must_use]
        pub fn terminations(&self) -> Vec<TaskHandle> {
            self.inner.lock().terminations.clone()
        }

        /// Number of tasks that are neither terminated nor exited.
        #[must_use]
        pub fn active_count(&self) -> usize {
            self.inner
                .lock()
                .tasks
                .values()
                .filter(|t| !t.phase.is_terminal())
                .count()
        }

        /// Server a task was launched for.
        #[must_use]
        pub fn server_of(&self, handle: &TaskHandle) -> Option<ServerId> {
            self.inner
                .lock()
                .tasks
                .get(handle)
                .map(|t| t.server_id.clone())
        }
    }

    #[async_trait]
    impl Launcher for MockLauncher {
        async fn launch(&self, server_id: &ServerId, _spec: &ContainerSpec) -> Result<TaskHandle> {
            let mut state = self.inner.lock();
            if state.refuse_launches {
                return Err(LauncherError::Capacity("mock capacity exhausted".into()));
            }

            let n = state.launches.len() + 1;
            let handle = TaskHandle::new(format!("h{n}"));
            let address = state
                .addresses
                .get(server_id)
                .cloned()
                .unwrap_or_else(|| format!("10.0.0.{n}:{GAME_PORT}"));
            let polls_left = if state.never_ready {
                u32::MAX
            } else {
                state.polls_before_ready
            };

            let unschedulable = state.unschedulable;
            state.tasks.insert(
                handle.clone(),
                MockTask {
                    server_id: server_id.clone(),
                    address,
                    polls_left,
                    phase: TaskPhase::Pending,
                    unschedulable,
                },
            );
            state.launches.push((server_id.clone(), handle.clone()));
            Ok(handle)
        }

        async fn terminate(&self, handle: &TaskHandle) -> Result<()> {
            let mut state = self.inner.lock();
            state.terminations.push(handle.clone());
            if let Some(task) = state.tasks.get_mut(handle) {
                task.phase = TaskPhase::Succeeded;
            }
            Ok(())
        }

        async fn describe(&self, handle: &TaskHandle) -> Result<TaskDescription> {
            let mut state = self.inner.lock();
            let task = state
                .tasks
                .get_mut(handle)
                .ok_or_else(|| LauncherError::TaskNotFound(handle.to_string()))?;

            if task.phase == TaskPhase::Pending && !task.unschedulable {
                if task.polls_left == 0 {
                    task.phase = TaskPhase::Running;
                } else if task.polls_left != u32::MAX {
                    task.polls_left -= 1;
                }
            }

            let running = task.phase == TaskPhase::Running;
            let unschedulable = task.unschedulable && task.phase == TaskPhase::Pending;
            Ok(TaskDescription {
                running,
                phase: task.phase,
                network_address: running.then(|| task.address.clone()),
                started_at: Some(Utc::now()),
                message: if task.phase.is_terminal() {
                    Some("exited".to_string())
                } else if unschedulable {
                    Some("0/1 nodes are available: insufficient memory".to_string())
                } else {
                    None
                },
                unschedulable,
            })
        }
    }
}
