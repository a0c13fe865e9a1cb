//! Scripted directory and remote-shell fakes for job-level tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, PathsConfig};
use crate::context::FleetContext;
use crate::directory::{
    Attributes, Credentials, DirectoryClient, DirectoryConnector, DirectoryError,
    DirectorySession, Endpoint, Modification, Scheme, SearchEntry, SearchScope,
};
use crate::domain::{NewServerNode, NodeRole, Protocol, ServerNode, TlsMaterial};
use crate::remote::{CommandOutput, RemoteClient, RemoteConnector, RemoteError, RemoteSession};
use crate::storage::test_support::memory_store;
use crate::tasks::{JobContext, MemoryTaskLogStore, TaskLogEntry, TaskLogStore, TaskLogger};

type DirResult<T> = std::result::Result<T, DirectoryError>;
type Entry = HashMap<String, Vec<String>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct DirectoryState {
    entries: HashMap<String, BTreeMap<String, Entry>>,
    down: HashSet<String>,
    down_schemes: HashSet<(String, Scheme)>,
    passwords: HashMap<(String, String), String>,
    compare_script: HashMap<String, VecDeque<bool>>,
    replicate_to: HashMap<String, Vec<String>>,
    rejected: HashSet<(String, &'static str)>,
    ops: Vec<String>,
}

impl DirectoryState {
    /// Scripted refusal of `op` on `host`, answered as insufficient access
    fn refuse(&self, host: &str, op: &'static str) -> DirResult<()> {
        if self.rejected.contains(&(host.to_string(), op)) {
            return Err(DirectoryError::Protocol { code: 50, message: "insufficient access".into() });
        }
        Ok(())
    }
}

/// In-memory directory servers keyed by host
#[derive(Clone, Default)]
pub struct ScriptedDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> DirectoryClient {
        DirectoryClient::new(Arc::new(self.clone()))
    }

    /// Every scheme to `host` reports unreachable
    pub fn down(&self, host: &str) -> &Self {
        lock(&self.state).down.insert(host.to_string());
        self
    }

    pub fn scheme_down(&self, host: &str, scheme: Scheme) -> &Self {
        lock(&self.state).down_schemes.insert((host.to_string(), scheme));
        self
    }

    /// Only `password` binds as `dn` on `host`
    pub fn require_password(&self, host: &str, dn: &str, password: &str) -> &Self {
        lock(&self.state)
            .passwords
            .insert((host.to_string(), dn.to_lowercase()), password.to_string());
        self
    }

    /// Answers for the next compares against `host`, ahead of stored entries
    pub fn script_compare(&self, host: &str, results: impl IntoIterator<Item = bool>) -> &Self {
        lock(&self.state)
            .compare_script
            .entry(host.to_string())
            .or_default()
            .extend(results);
        self
    }

    /// Adds and deletes on `provider` are applied to `consumer` as well
    pub fn replicate(&self, provider: &str, consumer: &str) -> &Self {
        lock(&self.state)
            .replicate_to
            .entry(provider.to_string())
            .or_default()
            .push(consumer.to_string());
        self
    }

    /// `op` (`search`, `modify` or `delete`) on `host` fails with a protocol error
    pub fn reject(&self, host: &str, op: &'static str) -> &Self {
        lock(&self.state).rejected.insert((host.to_string(), op));
        self
    }

    pub fn put_entry(&self, host: &str, dn: &str, attrs: &[(&str, &[&str])]) -> &Self {
        let entry = attrs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect();
        lock(&self.state)
            .entries
            .entry(host.to_string())
            .or_default()
            .insert(dn.to_lowercase(), entry);
        self
    }

    pub fn entry(&self, host: &str, dn: &str) -> Option<Entry> {
        lock(&self.state).entries.get(host).and_then(|e| e.get(&dn.to_lowercase())).cloned()
    }

    /// Operation log, e.g. `bind ldap1 cn=directory manager,o=gluu`
    pub fn ops(&self) -> Vec<String> {
        lock(&self.state).ops.clone()
    }

    pub fn ops_matching(&self, prefix: &str) -> Vec<String> {
        self.ops().into_iter().filter(|op| op.starts_with(prefix)).collect()
    }
}

#[async_trait]
impl DirectoryConnector for ScriptedDirectory {
    async fn open(
        &self,
        endpoint: &Endpoint,
        scheme: Scheme,
        credentials: &Credentials,
    ) -> DirResult<Box<dyn DirectorySession>> {
        let mut state = lock(&self.state);
        let host = endpoint.host.clone();
        state.ops.push(format!("open {} {:?}", host, scheme));
        if state.down.contains(&host) || state.down_schemes.contains(&(host.clone(), scheme)) {
            return Err(DirectoryError::unreachable(scheme.url(&host, endpoint.port), "connection refused"));
        }
        if let Some(expected) = state.passwords.get(&(host.clone(), credentials.bind_dn.to_lowercase())) {
            if expected != &credentials.password {
                return Err(DirectoryError::InvalidCredentials { dn: credentials.bind_dn.clone() });
            }
        }
        state.ops.push(format!("bind {} {}", host, credentials.bind_dn));
        Ok(Box::new(ScriptedSession { host, state: Arc::clone(&self.state) }))
    }
}

struct ScriptedSession {
    host: String,
    state: Arc<Mutex<DirectoryState>>,
}

impl ScriptedSession {
    fn targets(state: &DirectoryState, host: &str) -> Vec<String> {
        let mut hosts = vec![host.to_string()];
        hosts.extend(state.replicate_to.get(host).cloned().unwrap_or_default());
        hosts
    }
}

#[async_trait]
impl DirectorySession for ScriptedSession {
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        _filter: &str,
        _attrs: &[&str],
    ) -> DirResult<Option<SearchEntry>> {
        let mut state = lock(&self.state);
        state.ops.push(format!("search {} {}", self.host, base));
        state.refuse(&self.host, "search")?;
        let base = base.to_lowercase();
        let entries = state.entries.get(&self.host);
        let found = entries.and_then(|entries| match scope {
            SearchScope::Base => entries.get_key_value(&base),
            _ => entries.iter().find(|(dn, _)| dn.ends_with(&base)),
        });
        Ok(found.map(|(dn, attrs)| SearchEntry { dn: dn.clone(), attrs: attrs.clone() }))
    }

    async fn compare(&mut self, dn: &str, attr: &str, value: &str) -> DirResult<bool> {
        let mut state = lock(&self.state);
        state.ops.push(format!("compare {} {}", self.host, dn));
        if let Some(answer) = state.compare_script.get_mut(&self.host).and_then(VecDeque::pop_front) {
            return Ok(answer);
        }
        let entry = state
            .entries
            .get(&self.host)
            .and_then(|e| e.get(&dn.to_lowercase()))
            .ok_or_else(|| DirectoryError::NoSuchObject { dn: dn.to_string() })?;
        Ok(entry
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(attr))
            .any(|(_, values)| values.iter().any(|v| v == value)))
    }

    async fn add(&mut self, dn: &str, attrs: Attributes) -> DirResult<()> {
        let mut state = lock(&self.state);
        state.ops.push(format!("add {} {}", self.host, dn));
        let key = dn.to_lowercase();
        if state.entries.get(&self.host).is_some_and(|e| e.contains_key(&key)) {
            return Err(DirectoryError::AlreadyExists { dn: dn.to_string() });
        }
        let entry: Entry = attrs.into_iter().collect();
        for host in Self::targets(&state, &self.host) {
            state.entries.entry(host).or_default().insert(key.clone(), entry.clone());
        }
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> DirResult<()> {
        let mut state = lock(&self.state);
        state.ops.push(format!("delete {} {}", self.host, dn));
        state.refuse(&self.host, "delete")?;
        let key = dn.to_lowercase();
        if !state.entries.get(&self.host).is_some_and(|e| e.contains_key(&key)) {
            return Err(DirectoryError::NoSuchObject { dn: dn.to_string() });
        }
        for host in Self::targets(&state, &self.host) {
            if let Some(entries) = state.entries.get_mut(&host) {
                entries.remove(&key);
            }
        }
        Ok(())
    }

    async fn modify(&mut self, dn: &str, mods: Vec<Modification>) -> DirResult<()> {
        let mut state = lock(&self.state);
        state.ops.push(format!("modify {} {}", self.host, dn));
        state.refuse(&self.host, "modify")?;
        let entry = state
            .entries
            .get_mut(&self.host)
            .and_then(|e| e.get_mut(&dn.to_lowercase()))
            .ok_or_else(|| DirectoryError::NoSuchObject { dn: dn.to_string() })?;
        for m in mods {
            match m {
                Modification::Replace(attr, values) => {
                    entry.insert(attr, values);
                }
                Modification::Add(attr, values) => entry.entry(attr).or_default().extend(values),
                Modification::Delete(attr, values) if values.is_empty() => {
                    entry.remove(&attr);
                }
                Modification::Delete(attr, values) => {
                    if let Some(existing) = entry.get_mut(&attr) {
                        existing.retain(|v| !values.contains(v));
                    }
                }
            }
        }
        Ok(())
    }

    async fn unbind(&mut self) -> DirResult<()> {
        lock(&self.state).ops.push(format!("unbind {}", self.host));
        Ok(())
    }
}

#[derive(Default)]
struct ShellState {
    commands: Vec<(String, String)>,
    uploads: Vec<(String, PathBuf, String)>,
    missing: HashSet<String>,
    responses: Vec<(String, CommandOutput)>,
    unreachable: HashSet<String>,
    failing_uploads: HashSet<String>,
    closed: Vec<String>,
}

/// Remote hosts that record every command and answer from a script
#[derive(Clone, Default)]
pub struct ScriptedShell {
    state: Arc<Mutex<ShellState>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> RemoteClient {
        RemoteClient::new(Arc::new(self.clone()), "root")
    }

    /// `exists` reports false for this path; every other path exists
    pub fn missing(&self, path: &str) -> &Self {
        lock(&self.state).missing.insert(path.to_string());
        self
    }

    /// Commands containing `pattern` return `output` (first match wins)
    pub fn respond(&self, pattern: &str, output: CommandOutput) -> &Self {
        lock(&self.state).responses.push((pattern.to_string(), output));
        self
    }

    pub fn unreachable(&self, host: &str) -> &Self {
        lock(&self.state).unreachable.insert(host.to_string());
        self
    }

    /// Uploads to `host` fail
    pub fn failing_uploads(&self, host: &str) -> &Self {
        lock(&self.state).failing_uploads.insert(host.to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    /// `(host, remote path)` of every upload
    pub fn uploads(&self) -> Vec<(String, String)> {
        lock(&self.state).uploads.iter().map(|(h, _, r)| (h.clone(), r.clone())).collect()
    }

    pub fn closed(&self) -> Vec<String> {
        lock(&self.state).closed.clone()
    }
}

#[async_trait]
impl RemoteConnector for ScriptedShell {
    async fn connect(&self, host: &str, _user: &str) -> Result<Box<dyn RemoteSession>, RemoteError> {
        if lock(&self.state).unreachable.contains(host) {
            return Err(RemoteError::not_ready(host, "Connection refused"));
        }
        Ok(Box::new(ScriptedShellSession { host: host.to_string(), state: Arc::clone(&self.state) }))
    }
}

struct ScriptedShellSession {
    host: String,
    state: Arc<Mutex<ShellState>>,
}

#[async_trait]
impl RemoteSession for ScriptedShellSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut state = lock(&self.state);
        state.commands.push((self.host.clone(), command.to_string()));
        Ok(state
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let mut state = lock(&self.state);
        if state.failing_uploads.contains(&self.host) {
            return Err(RemoteError::CommandFailed {
                command: format!("scp {} {}", local.display(), remote),
                stderr: "Permission denied".to_string(),
            });
        }
        state.uploads.push((self.host.clone(), local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    async fn download(&self, _remote: &str, _local: &Path) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        Ok(!lock(&self.state).missing.contains(path))
    }

    async fn close(&self) {
        lock(&self.state).closed.push(self.host.clone());
    }
}

/// A complete context over in-memory storage and scripted fakes
pub struct TestFleet {
    pub ctx: Arc<FleetContext>,
    pub directory: ScriptedDirectory,
    pub shell: ScriptedShell,
    pub logs: Arc<MemoryTaskLogStore>,
    pub data_dir: tempfile::TempDir,
}

impl TestFleet {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let data_dir = tempfile::tempdir().expect("temp dir");
        let mut config = AppConfig {
            paths: PathsConfig::rooted_at(data_dir.path().to_path_buf()),
            ..Default::default()
        };
        config.verifier.retry_delay_ms = 1;
        adjust(&mut config);

        let directory = ScriptedDirectory::new();
        let shell = ScriptedShell::new();
        let logs = Arc::new(MemoryTaskLogStore::new());
        let store = memory_store().await;
        let ctx = FleetContext::new(
            Arc::new(config),
            store,
            directory.client(),
            shell.client(),
            logs.clone(),
        );
        Self { ctx: Arc::new(ctx), directory, shell, logs, data_dir }
    }

    pub fn job(&self, task_id: &str) -> JobContext {
        JobContext::new(TaskLogger::new(self.logs.clone(), task_id), CancellationToken::new())
    }

    pub async fn messages(&self, task_id: &str) -> Vec<TaskLogEntry> {
        self.logs.read_all(task_id).await.expect("memory log store")
    }

    pub async fn add_node(
        &self,
        hostname: &str,
        role: NodeRole,
        protocol: Protocol,
        provider_id: Option<i64>,
    ) -> ServerNode {
        let request = NewServerNode {
            hostname: hostname.to_string(),
            ip: None,
            port: 1636,
            protocol,
            role,
            admin_password: format!("{}-admin", hostname),
            tls: TlsMaterial::default(),
            containerized: false,
            container_version: None,
            provider_id,
        };
        self.ctx.store.register_node(&request).await.expect("register node")
    }

    pub async fn add_provider(&self, hostname: &str) -> ServerNode {
        self.add_node(hostname, NodeRole::Provider, Protocol::Plain, None).await
    }

    pub async fn add_consumer(&self, hostname: &str, provider_id: i64) -> ServerNode {
        self.add_node(hostname, NodeRole::Consumer, Protocol::Plain, Some(provider_id)).await
    }

    /// Write a rendered server configuration for `node_id`
    pub fn write_slapd_conf(&self, node_id: i64, contents: &str) -> PathBuf {
        let path = self.ctx.config.paths.slapd_conf_for(node_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("slapd conf dir");
        }
        std::fs::write(&path, contents).expect("write slapd conf");
        path
    }
}
