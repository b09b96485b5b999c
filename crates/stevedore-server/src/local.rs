//! Deterministic in-process engine for development and tests.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use futures::StreamExt;
use stevedore_core::{
    EngineClient, EngineConnector, EngineError, EngineEvent, EngineManager, EventAction,
    EventKind,
    engine::{EventFilter, EventStream, ExecConn},
    types::{
        ContainerFilter, ContainerSpec, ContainerState, ContainerSummary, EngineInfo, ExecSpec,
        FsChange, ImageSummary, LogOptions, NetworkSummary, ProcessList, VolumeSummary,
    },
};
use stevedore_session::{StreamKind, encode_frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

const API_VERSION: &str = "1.47";

#[derive(Clone)]
struct LocalContainer {
    id: String,
    name: String,
    image: String,
    command: String,
    created: String,
    state: String,
    status: String,
}

impl LocalContainer {
    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            command: self.command.clone(),
            image: self.image.clone(),
            created: self.created.clone(),
            state: self.state.clone(),
            status: self.status.clone(),
        }
    }

    fn running(&self) -> bool {
        self.state == "running" || self.state == "paused"
    }
}

struct LocalExec {
    container_id: String,
    started: bool,
}

#[derive(Default)]
struct EngineState {
    containers: HashMap<String, LocalContainer>,
    images: Vec<ImageSummary>,
    volumes: Vec<VolumeSummary>,
    networks: Vec<NetworkSummary>,
    execs: HashMap<String, LocalExec>,
    serial: u64,
}

/// In-memory engine implementation.
///
/// Useful for development and single-process deployments without a real
/// engine socket: lifecycle verbs mutate an in-memory table and emit the
/// same out-of-band events a real engine would, and exec instances are
/// loopback streams that frame echoed input in the demux wire format.
/// State is lost on restart.
pub struct LocalEngine {
    state: Mutex<EngineState>,
    events: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEngine {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = tokio::sync::broadcast::channel(256);
        let engine = Self {
            state: Mutex::new(EngineState::default()),
            events,
        };
        engine.seed();
        engine
    }

    fn seed(&self) {
        let mut state = self.state.lock().unwrap();
        state.images.push(ImageSummary {
            id: new_id(),
            repo: "alpine:latest".to_string(),
            created: now_string(),
            size: "7.8 MB".to_string(),
        });
        state.networks.push(NetworkSummary {
            id: new_id(),
            name: "bridge".to_string(),
            created: now_string(),
            ports: vec![":80/tcp".to_string()],
        });
    }

    /// Whether anyone is currently consuming the event stream.
    #[must_use]
    pub fn has_event_listeners(&self) -> bool {
        self.events.receiver_count() > 0
    }

    fn emit(&self, kind: EventKind, action: EventAction, id: &str, name: &str) {
        let event = EngineEvent::new(kind, action, id).with_attribute("name", name);
        // No subscriber is fine; events are live-only.
        let _ = self.events.send(event);
    }

    fn with_container<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut LocalContainer) -> Result<T, EngineError>,
    ) -> Result<(T, String, String), EngineError> {
        let mut state = self.state.lock().unwrap();
        let key = resolve_container_key(&state.containers, id)
            .ok_or_else(|| EngineError::NotFound(format!("container {id}")))?;
        let container = state.containers.get_mut(&key).expect("resolved key");
        let value = f(container)?;
        Ok((value, container.id.clone(), container.name.clone()))
    }
}

fn resolve_container_key(containers: &HashMap<String, LocalContainer>, id: &str) -> Option<String> {
    if containers.contains_key(id) {
        return Some(id.to_string());
    }
    containers
        .values()
        .find(|c| c.id.starts_with(id) || c.name == id)
        .map(|c| c.id.clone())
}

fn new_id() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

fn now_string() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .to_string()
}

#[async_trait]
impl EngineClient for LocalEngine {
    async fn ping(&self) -> Result<EngineInfo, EngineError> {
        Ok(EngineInfo {
            api_version: API_VERSION.to_string(),
            os_type: "linux".to_string(),
        })
    }

    async fn events(&self, filter: EventFilter) -> Result<EventStream, EngineError> {
        let kinds = filter.kinds;
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let kinds = kinds.clone();
            async move {
                match item {
                    Ok(event) if kinds.is_empty() || kinds.contains(&event.kind) => {
                        Some(Ok(event))
                    }
                    // Lagged receivers skip ahead; dropped events are lost by design.
                    _ => None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn container_inspect(&self, id: &str) -> Result<ContainerState, EngineError> {
        let state = self.state.lock().unwrap();
        let key = resolve_container_key(&state.containers, id)
            .ok_or_else(|| EngineError::NotFound(format!("container {id}")))?;
        let container = &state.containers[&key];
        Ok(ContainerState {
            id: container.id.clone(),
            name: container.name.clone(),
            status: container.state.clone(),
        })
    }

    async fn container_list(
        &self,
        filter: ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut result: Vec<ContainerSummary> = state
            .containers
            .values()
            .filter(|c| {
                filter.ids.is_empty() || filter.ids.iter().any(|id| c.id.starts_with(id.as_str()))
            })
            .filter(|c| filter.name.as_ref().is_none_or(|name| &c.name == name))
            .filter(|c| filter.all || c.state == "running")
            .filter(|c| filter.statuses.is_empty() || filter.statuses.contains(&c.state))
            .map(LocalContainer::summary)
            .collect();
        result.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn exec_create(
        &self,
        container_id: &str,
        _spec: ExecSpec,
    ) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        let key = resolve_container_key(&state.containers, container_id)
            .ok_or_else(|| EngineError::NotFound(format!("container {container_id}")))?;
        if !state.containers[&key].running() {
            return Err(EngineError::Rejected(format!(
                "container {container_id} is not running"
            )));
        }
        let exec_id = new_id();
        state.execs.insert(
            exec_id.clone(),
            LocalExec {
                container_id: key,
                started: false,
            },
        );
        Ok(exec_id)
    }

    async fn exec_start(&self, exec_id: &str, _tty: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let exec = state
            .execs
            .get_mut(exec_id)
            .ok_or_else(|| EngineError::NotFound(format!("exec {exec_id}")))?;
        exec.started = true;
        Ok(())
    }

    async fn exec_attach(&self, exec_id: &str) -> Result<ExecConn, EngineError> {
        {
            let state = self.state.lock().unwrap();
            let exec = state
                .execs
                .get(exec_id)
                .ok_or_else(|| EngineError::NotFound(format!("exec {exec_id}")))?;
            if !exec.started {
                return Err(EngineError::Rejected(format!("exec {exec_id} not started")));
            }
            tracing::debug!(exec_id, container_id = %exec.container_id, "exec attach");
        }

        let (near, far) = tokio::io::duplex(64 * 1024);
        // Loopback process: frame every input chunk back as stdout.
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(far);
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let frame = encode_frame(StreamKind::Stdout, &chunk[..n]);
                        if writer.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(ExecConn::from_stream(near))
    }
}

#[async_trait]
impl EngineManager for LocalEngine {
    async fn container_create(&self, spec: ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.images.iter().any(|i| i.repo == spec.image) {
            return Err(EngineError::NotFound(format!("image {}", spec.image)));
        }
        let id = new_id();
        state.serial += 1;
        let name = spec
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("container-{}", state.serial));
        let command = if spec.cmd.is_empty() {
            "/bin/sh".to_string()
        } else {
            spec.cmd.join(" ")
        };
        state.containers.insert(
            id.clone(),
            LocalContainer {
                id: id.clone(),
                name,
                image: spec.image,
                command,
                created: now_string(),
                state: "created".to_string(),
                status: "Created".to_string(),
            },
        );
        Ok(id)
    }

    async fn container_start(&self, id: &str) -> Result<(), EngineError> {
        let ((), id, name) = self.with_container(id, |c| {
            if c.state == "running" {
                return Err(EngineError::Rejected(format!("container {} already started", c.id)));
            }
            c.state = "running".to_string();
            c.status = "Up less than a second".to_string();
            Ok(())
        })?;
        self.emit(EventKind::Container, EventAction::Start, &id, &name);
        Ok(())
    }

    async fn container_stop(
        &self,
        id: &str,
        _timeout_secs: Option<u32>,
    ) -> Result<(), EngineError> {
        let ((), id, name) = self.with_container(id, |c| {
            c.state = "exited".to_string();
            c.status = "Exited (0)".to_string();
            Ok(())
        })?;
        self.emit(EventKind::Container, EventAction::Die, &id, &name);
        Ok(())
    }

    async fn container_restart(&self, id: &str) -> Result<(), EngineError> {
        let ((), id, name) = self.with_container(id, |c| {
            c.state = "running".to_string();
            c.status = "Up less than a second".to_string();
            Ok(())
        })?;
        self.emit(EventKind::Container, EventAction::Restart, &id, &name);
        Ok(())
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<(), EngineError> {
        let ((), id, name) = self.with_container(id, |c| {
            if !c.running() {
                return Err(EngineError::Rejected(format!("container {} is not running", c.id)));
            }
            c.state = "exited".to_string();
            c.status = "Exited (137)".to_string();
            Ok(())
        })?;
        tracing::debug!(id = %id, signal, "container killed");
        self.emit(EventKind::Container, EventAction::Kill, &id, &name);
        self.emit(EventKind::Container, EventAction::Die, &id, &name);
        Ok(())
    }

    async fn container_pause(&self, id: &str) -> Result<(), EngineError> {
        let ((), id, name) = self.with_container(id, |c| {
            if c.state != "running" {
                return Err(EngineError::Rejected(format!("container {} is not running", c.id)));
            }
            c.state = "paused".to_string();
            c.status = "Paused".to_string();
            Ok(())
        })?;
        self.emit(EventKind::Container, EventAction::Pause, &id, &name);
        Ok(())
    }

    async fn container_unpause(&self, id: &str) -> Result<(), EngineError> {
        let ((), id, name) = self.with_container(id, |c| {
            if c.state != "paused" {
                return Err(EngineError::Rejected(format!("container {} is not paused", c.id)));
            }
            c.state = "running".to_string();
            c.status = "Up".to_string();
            Ok(())
        })?;
        self.emit(EventKind::Container, EventAction::Unpause, &id, &name);
        Ok(())
    }

    async fn container_rename(&self, id: &str, new_name: &str) -> Result<(), EngineError> {
        let new_name = new_name.to_string();
        let ((), id, name) = self.with_container(id, move |c| {
            c.name = new_name;
            Ok(())
        })?;
        self.emit(EventKind::Container, EventAction::Rename, &id, &name);
        Ok(())
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let key = resolve_container_key(&state.containers, id)
                .ok_or_else(|| EngineError::NotFound(format!("container {id}")))?;
            if state.containers[&key].running() && !force {
                return Err(EngineError::Rejected(format!(
                    "container {id} is running; stop it or force removal"
                )));
            }
            state.containers.remove(&key).expect("resolved key")
        };
        self.emit(
            EventKind::Container,
            EventAction::Destroy,
            &removed.id,
            &removed.name,
        );
        Ok(())
    }

    async fn container_logs(&self, id: &str, opts: LogOptions) -> Result<String, EngineError> {
        let (name, _, _) = self.with_container(id, |c| Ok(c.name.clone()))?;
        let mut logs = String::new();
        if opts.stdout {
            logs.push_str(&format!("{name} | started\n"));
        }
        if opts.stderr {
            logs.push_str(&format!("{name} | no errors\n"));
        }
        Ok(logs)
    }

    async fn container_processes(&self, id: &str) -> Result<ProcessList, EngineError> {
        let (command, _, _) = self.with_container(id, |c| {
            if !c.running() {
                return Err(EngineError::Rejected(format!("container {} is not running", c.id)));
            }
            Ok(c.command.clone())
        })?;
        Ok(ProcessList {
            titles: vec!["PID".to_string(), "CMD".to_string()],
            processes: vec![vec!["1".to_string(), command]],
        })
    }

    async fn container_stats(&self, id: &str) -> Result<String, EngineError> {
        let (summary, _, _) = self.with_container(id, |c| Ok(c.summary()))?;
        Ok(serde_json::json!({
            "id": summary.id,
            "name": summary.name,
            "cpu_stats": { "online_cpus": 1 },
            "memory_stats": { "usage": 0 },
        })
        .to_string())
    }

    async fn container_changes(&self, id: &str) -> Result<Vec<FsChange>, EngineError> {
        self.with_container(id, |_| Ok(()))?;
        Ok(Vec::new())
    }

    async fn container_export(&self, id: &str) -> Result<Vec<u8>, EngineError> {
        self.with_container(id, |_| Ok(()))?;
        Ok(Vec::new())
    }

    async fn image_list(&self) -> Result<Vec<ImageSummary>, EngineError> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn image_inspect(&self, id: &str) -> Result<serde_json::Value, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .images
            .iter()
            .find(|i| i.id == id || i.repo == id || i.id.starts_with(id))
            .map(|i| serde_json::json!(i))
            .ok_or_else(|| EngineError::NotFound(format!("image {id}")))
    }

    async fn image_pull(&self, repo: &str, tag: Option<&str>) -> Result<String, EngineError> {
        let reference = format!("{repo}:{}", tag.unwrap_or("latest"));
        {
            let mut state = self.state.lock().unwrap();
            if !state.images.iter().any(|i| i.repo == reference) {
                state.images.push(ImageSummary {
                    id: new_id(),
                    repo: reference.clone(),
                    created: now_string(),
                    size: "7.8 MB".to_string(),
                });
            }
        }
        self.emit(EventKind::Image, EventAction::Pull, &reference, &reference);
        Ok(serde_json::json!({ "status": format!("Pulled {reference}") }).to_string())
    }

    async fn volume_list(&self) -> Result<Vec<VolumeSummary>, EngineError> {
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    async fn volume_inspect(&self, id: &str) -> Result<serde_json::Value, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .volumes
            .iter()
            .find(|v| v.id == id || v.name == id)
            .map(|v| serde_json::json!(v))
            .ok_or_else(|| EngineError::NotFound(format!("volume {id}")))
    }

    async fn network_list(&self) -> Result<Vec<NetworkSummary>, EngineError> {
        Ok(self.state.lock().unwrap().networks.clone())
    }

    async fn network_inspect(&self, id: &str) -> Result<serde_json::Value, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .networks
            .iter()
            .find(|n| n.id == id || n.name == id || n.id.starts_with(id))
            .map(|n| serde_json::json!(n))
            .ok_or_else(|| EngineError::NotFound(format!("network {id}")))
    }
}

#[async_trait]
impl EngineConnector for LocalEngine {
    async fn probe(&self, endpoint: &str) -> Result<(), EngineError> {
        if endpoint.starts_with("local://") {
            Ok(())
        } else {
            Err(EngineError::Unreachable(format!(
                "only local:// endpoints are reachable from the development engine, got {endpoint}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(image: &str, name: &str) -> ContainerSpec {
        ContainerSpec {
            image: image.to_string(),
            name: Some(name.to_string()),
            ..ContainerSpec::default()
        }
    }

    #[tokio::test]
    async fn lifecycle_mutates_state_and_emits_events() {
        let engine = LocalEngine::new();
        let mut events = engine.events.subscribe();

        let id = engine
            .container_create(spec("alpine:latest", "web"))
            .await
            .unwrap();
        engine.container_start(&id).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.action, EventAction::Start);
        assert_eq!(event.actor_id, id);
        assert_eq!(event.attribute("name"), Some("web"));

        let inspected = engine.container_inspect(&id).await.unwrap();
        assert_eq!(inspected.status, "running");
    }

    #[tokio::test]
    async fn create_requires_a_known_image() {
        let engine = LocalEngine::new();
        let err = engine
            .container_create(spec("missing:latest", "web"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn listing_filters_running_containers() {
        let engine = LocalEngine::new();
        let a = engine
            .container_create(spec("alpine:latest", "a"))
            .await
            .unwrap();
        let _b = engine
            .container_create(spec("alpine:latest", "b"))
            .await
            .unwrap();
        engine.container_start(&a).await.unwrap();

        let running = engine
            .container_list(ContainerFilter::default())
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].name, "a");

        let all = engine
            .container_list(ContainerFilter {
                all: true,
                ..ContainerFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn inspect_resolves_prefixes_and_names() {
        let engine = LocalEngine::new();
        let id = engine
            .container_create(spec("alpine:latest", "web"))
            .await
            .unwrap();

        assert_eq!(engine.container_inspect(&id[..12]).await.unwrap().id, id);
        assert_eq!(engine.container_inspect("web").await.unwrap().id, id);
        assert!(engine.container_inspect("nope").await.is_err());
    }

    #[tokio::test]
    async fn remove_refuses_running_containers_without_force() {
        let engine = LocalEngine::new();
        let id = engine
            .container_create(spec("alpine:latest", "web"))
            .await
            .unwrap();
        engine.container_start(&id).await.unwrap();

        assert!(matches!(
            engine.container_remove(&id, false).await,
            Err(EngineError::Rejected(_))
        ));
        engine.container_remove(&id, true).await.unwrap();
        assert!(engine.container_inspect(&id).await.is_err());
    }

    #[tokio::test]
    async fn exec_requires_a_running_container() {
        let engine = LocalEngine::new();
        let id = engine
            .container_create(spec("alpine:latest", "web"))
            .await
            .unwrap();
        assert!(matches!(
            engine.exec_create(&id, ExecSpec::default()).await,
            Err(EngineError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn pull_registers_the_image_and_notifies() {
        let engine = LocalEngine::new();
        let mut events = engine.events.subscribe();

        engine.image_pull("nginx", None).await.unwrap();
        let images = engine.image_list().await.unwrap();
        assert!(images.iter().any(|i| i.repo == "nginx:latest"));

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Image);
        assert_eq!(event.action, EventAction::Pull);
    }

    #[tokio::test]
    async fn probe_accepts_only_local_endpoints() {
        let engine = LocalEngine::new();
        assert!(engine.probe("local://devel").await.is_ok());
        assert!(engine.probe("unix:///var/run/docker.sock").await.is_err());
    }
}
