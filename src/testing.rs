//! In-memory fakes shared by the unit tests

use crate::document::{matches_selector, merge_patch, name_of};
use crate::domain::ports::{
    Clock, CommandRunner, ControlPlaneClient, ExecOutput, LocalCommand, PodRef, RemoteShell,
    ResourceKind, TagResolver,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

// =============================================================================
// Fake Clock
// =============================================================================

/// Virtual clock: `sleep` advances time instantly
pub struct FakeClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    async fn sleep(&self, duration: Duration) {
        *self.offset.lock() += duration;
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Fake Control Plane
// =============================================================================

/// A recorded client call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get { kind: ResourceKind, name: String },
    List { kind: ResourceKind, selector: Option<String> },
    Create { kind: ResourceKind, name: String },
    Apply { kind: ResourceKind, name: String },
    Patch { kind: ResourceKind, name: String, patch: Value },
    Delete { kind: ResourceKind, name: String },
    Exec { pod: String, command: String },
}

impl Call {
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Call::Get { kind, .. }
            | Call::List { kind, .. }
            | Call::Create { kind, .. }
            | Call::Apply { kind, .. }
            | Call::Patch { kind, .. }
            | Call::Delete { kind, .. } => Some(*kind),
            Call::Exec { .. } => None,
        }
    }
}

type Key = (ResourceKind, String, String);
pub type Store = BTreeMap<Key, Value>;
type Hook = Box<dyn Fn(&Call, &mut Store) + Send + Sync>;

/// In-memory control plane with call recording and scripted behaviour
pub struct FakeControlPlane {
    store: Mutex<Store>,
    calls: Mutex<Vec<Call>>,
    exec_scripts: Mutex<Vec<(String, VecDeque<ExecOutput>)>>,
    hooks: Mutex<Vec<Hook>>,
    failing_creates: Mutex<Vec<ResourceKind>>,
    reachable: AtomicBool,
}

fn key_of(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Key {
    let ns = if kind.meta().namespaced {
        namespace.unwrap_or_default().to_string()
    } else {
        String::new()
    };
    (kind, ns, name.to_string())
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            exec_scripts: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
            failing_creates: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Seed an object; kind and namespace come from the manifest
    pub fn insert(&self, object: Value) {
        let kind = ResourceKind::from_manifest(&object).expect("fake object kind");
        let ns = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let key = key_of(kind, ns.as_deref(), name_of(&object));
        self.store.lock().insert(key, object);
    }

    pub fn object(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.store.lock().get(&key_of(kind, namespace, name)).cloned()
    }

    pub fn objects(&self, kind: ResourceKind) -> Vec<Value> {
        self.store
            .lock()
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, kind: ResourceKind) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.kind() == Some(kind)).collect()
    }

    pub fn created(&self, kind: ResourceKind) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create { kind: k, name } | Call::Apply { kind: k, name } if k == kind => {
                    Some(name)
                }
                _ => None,
            })
            .collect()
    }

    /// Script successive outputs for exec commands containing `needle`.
    /// The last output repeats once the queue drains.
    pub fn script_exec(&self, needle: &str, outputs: Vec<ExecOutput>) {
        self.exec_scripts
            .lock()
            .push((needle.to_string(), outputs.into_iter().collect()));
    }

    /// Run `hook` on every call, before the call reads the store
    pub fn on_call(&self, hook: impl Fn(&Call, &mut Store) + Send + Sync + 'static) {
        self.hooks.lock().push(Box::new(hook));
    }

    pub fn fail_creates_of(&self, kind: ResourceKind) {
        self.failing_creates.lock().push(kind);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call.clone());
        let hooks = self.hooks.lock();
        if !hooks.is_empty() {
            let mut store = self.store.lock();
            for hook in hooks.iter() {
                hook(&call, &mut store);
            }
        }
    }

    fn write(&self, manifest: &Value, create: bool) -> Result<Value> {
        let kind = ResourceKind::from_manifest(manifest)?;
        let name = name_of(manifest).to_string();
        if create && self.failing_creates.lock().contains(&kind) {
            self.calls.lock().push(Call::Create { kind, name: name.clone() });
            return Err(Error::command_failed(format!("create {}", kind), "admission denied"));
        }
        let ns = manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let key = key_of(kind, ns.as_deref(), &name);
        {
            let mut store = self.store.lock();
            if create && store.contains_key(&key) {
                drop(store);
                self.calls.lock().push(Call::Create { kind, name: name.clone() });
                return Err(Error::ResourceExists {
                    kind: kind.to_string(),
                    name,
                });
            }
            store.insert(key, manifest.clone());
        }
        let call = if create {
            Call::Create { kind, name }
        } else {
            Call::Apply { kind, name }
        };
        self.record(call);
        Ok(manifest.clone())
    }
}

#[async_trait]
impl ControlPlaneClient for FakeControlPlane {
    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<Value> {
        self.record(Call::Get {
            kind,
            name: name.to_string(),
        });
        self.object(kind, namespace, name)
            .ok_or_else(|| Error::not_found(kind.to_string(), name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        self.record(Call::List {
            kind,
            selector: selector.map(str::to_string),
        });
        let namespaced = kind.meta().namespaced;
        Ok(self
            .store
            .lock()
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind && (!namespaced || namespace.map_or(true, |n| n == ns))
            })
            .filter(|(_, v)| selector.map_or(true, |s| matches_selector(v, s)))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create(&self, manifest: &Value) -> Result<Value> {
        self.write(manifest, true)
    }

    async fn apply(&self, manifest: &Value) -> Result<Value> {
        self.write(manifest, false)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value> {
        let key = key_of(kind, namespace, name);
        let updated = {
            let mut store = self.store.lock();
            let object = store
                .get_mut(&key)
                .ok_or_else(|| Error::not_found(kind.to_string(), name))?;
            merge_patch(object, patch);
            object.clone()
        };
        self.record(Call::Patch {
            kind,
            name: name.to_string(),
            patch: patch.clone(),
        });
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<()> {
        let removed = self.store.lock().remove(&key_of(kind, namespace, name));
        self.record(Call::Delete {
            kind,
            name: name.to_string(),
        });
        removed
            .map(|_| ())
            .ok_or_else(|| Error::not_found(kind.to_string(), name))
    }

    async fn exec(&self, pod: &PodRef, command: &[String]) -> Result<ExecOutput> {
        let joined = command.join(" ");
        self.record(Call::Exec {
            pod: pod.name.clone(),
            command: joined.clone(),
        });
        let mut scripts = self.exec_scripts.lock();
        let script = scripts
            .iter_mut()
            .find(|(needle, _)| joined.contains(needle.as_str()));
        match script {
            Some((_, queue)) if queue.len() > 1 => Ok(queue.pop_front().unwrap_or_default()),
            Some((_, queue)) => Ok(queue.front().cloned().unwrap_or_default()),
            None => Ok(ExecOutput::ok("")),
        }
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Fake Remote Shell / Command Runner / Tag Resolver
// =============================================================================

/// Remote shell answering from a command → output table
pub struct FakeShell {
    responses: Mutex<Vec<(String, ExecOutput)>>,
    pub commands: Mutex<Vec<(String, String)>>,
    pub uploads: Mutex<Vec<(String, String, String)>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, needle: &str, output: ExecOutput) {
        self.responses.lock().push((needle.to_string(), output));
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(&self, host: &str, command: &str) -> Result<ExecOutput> {
        self.commands.lock().push((host.to_string(), command.to_string()));
        Ok(self
            .responses
            .lock()
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    async fn upload(&self, host: &str, local: &Path, remote: &str) -> Result<()> {
        let content = std::fs::read_to_string(local)?;
        self.uploads
            .lock()
            .push((host.to_string(), remote.to_string(), content));
        Ok(())
    }
}

/// Command runner that records invocations and always succeeds
pub struct FakeRunner {
    pub commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &LocalCommand) -> Result<ExecOutput> {
        self.commands.lock().push(command.display());
        Ok(ExecOutput::ok(""))
    }
}

pub struct FixedTag(pub &'static str);

#[async_trait]
impl TagResolver for FixedTag {
    async fn latest_tag(&self, _upgrade: bool, _latest_tag: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

// =============================================================================
// Object Builders
// =============================================================================

pub fn pod(namespace: &str, name: &str, labels: Value, phase: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": namespace, "labels": labels},
        "status": {"phase": phase}
    })
}

pub fn running_pods(client: &FakeControlPlane, namespace: &str, app: &str, count: usize) {
    for i in 0..count {
        client.insert(pod(
            namespace,
            &format!("{}-{}", app, i),
            json!({"app": app}),
            "Running",
        ));
    }
}
