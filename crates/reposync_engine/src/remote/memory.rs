//! In-memory remote repository for testing.

use super::RemoteRepository;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use reposync_events::{
    ChangeLogEntry, ChangeLogPage, Fingerprint, ObjectKind, RemoteChangeKind, RemoteId,
    RemoteObject,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, SystemTime};

const ROOT_ID: &str = "root";

#[derive(Debug, Clone)]
struct Node {
    parent: Option<RemoteId>,
    name: String,
    kind: ObjectKind,
    content: Vec<u8>,
    token: u64,
    modified: SystemTime,
}

#[derive(Debug)]
struct RepoState {
    nodes: HashMap<RemoteId, Node>,
    next_id: u64,
    seq: u64,
    log: Vec<(u64, ChangeLogEntry)>,
    log_floor: u64,
    failures: VecDeque<SyncError>,
    denied: HashSet<RemoteId>,
    offline: bool,
    latency: Duration,
    timeout: Option<Duration>,
    mutations: u64,
    calls: u64,
}

/// An in-memory repository with a change log.
///
/// Objects get sequential identifiers (`obj-1`, `obj-2`, ...) and the root
/// folder is `root` at path `/`. Every change bumps a global sequence
/// number which doubles as the change-log token and as the object's change
/// token.
///
/// Calls made through [`RemoteRepository`] are subject to failure
/// injection and counted; the inherent helpers (`put_file`, `rename`, ...)
/// model edits made by other users and bypass both.
///
/// Latency is simulated, not slept: a call whose latency exceeds the
/// request timeout fails with [`SyncError::Timeout`] right away.
#[derive(Debug)]
pub struct MemoryRepository {
    state: Mutex<RepoState>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Creates a repository holding only the root folder.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            RemoteId::new(ROOT_ID),
            Node {
                parent: None,
                name: String::new(),
                kind: ObjectKind::Folder,
                content: Vec::new(),
                token: 0,
                modified: SystemTime::now(),
            },
        );
        Self {
            state: Mutex::new(RepoState {
                nodes,
                next_id: 1,
                seq: 0,
                log: Vec::new(),
                log_floor: 0,
                failures: VecDeque::new(),
                denied: HashSet::new(),
                offline: false,
                latency: Duration::ZERO,
                timeout: None,
                mutations: 0,
                calls: 0,
            }),
        }
    }

    /// Identifier of the root folder.
    pub fn root_id(&self) -> RemoteId {
        RemoteId::new(ROOT_ID)
    }

    /// Simulates a lost connection: every call fails with a retryable error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Sets the simulated round-trip time of every call.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: SyncError) {
        self.state.lock().failures.push_back(error);
    }

    /// Refuses every mutation of `id` (and creations inside it).
    pub fn deny(&self, id: &RemoteId) {
        self.state.lock().denied.insert(id.clone());
    }

    /// Lifts a previous [`MemoryRepository::deny`].
    pub fn allow(&self, id: &RemoteId) {
        self.state.lock().denied.remove(id);
    }

    /// Drops the retained change log; older tokens become stale.
    pub fn truncate_change_log(&self) {
        let mut state = self.state.lock();
        state.log.clear();
        state.log_floor = state.seq;
    }

    /// Number of successful mutations made through [`RemoteRepository`].
    pub fn mutation_count(&self) -> u64 {
        self.state.lock().mutations
    }

    /// Number of calls made through [`RemoteRepository`].
    pub fn call_count(&self) -> u64 {
        self.state.lock().calls
    }

    /// Current head of the change log.
    pub fn current_token(&self) -> String {
        self.state.lock().seq.to_string()
    }

    /// Creates or overwrites a file, creating missing parent folders.
    pub fn put_file(&self, path: &str, content: &[u8]) -> SyncResult<RemoteId> {
        let mut state = self.state.lock();
        let (parent_path, name) = split_path(path)?;
        let parent = state.mkdir_all(parent_path)?;
        match state.child_named(&parent, name) {
            Some(id) => {
                let node = state.node_mut(&id)?;
                if node.kind.is_folder() {
                    return Err(SyncError::conflict(path, "a folder exists at this path"));
                }
                node.content = content.to_vec();
                state.bump(&id, RemoteChangeKind::Updated);
                Ok(id)
            }
            None => Ok(state.insert(&parent, name, ObjectKind::File, content.to_vec())),
        }
    }

    /// Creates a folder and any missing parents.
    pub fn mkdir(&self, path: &str) -> SyncResult<RemoteId> {
        self.state.lock().mkdir_all(path)
    }

    /// Renames the object at `path`.
    pub fn rename(&self, path: &str, new_name: &str) -> SyncResult<()> {
        let mut state = self.state.lock();
        let id = state.resolve(path)?;
        state.rename(&id, new_name)
    }

    /// Moves the object at `path` into the folder at `new_parent`.
    pub fn move_to(&self, path: &str, new_parent: &str) -> SyncResult<()> {
        let mut state = self.state.lock();
        let id = state.resolve(path)?;
        let target = state.resolve(new_parent)?;
        state.relocate(&id, &target)
    }

    /// Deletes the object at `path` recursively.
    pub fn remove(&self, path: &str) -> SyncResult<()> {
        let mut state = self.state.lock();
        let id = state.resolve(path)?;
        state.remove_recursive(&id);
        Ok(())
    }

    /// Returns the content of the file at `path`.
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let id = state.resolve(path).ok()?;
        state
            .nodes
            .get(&id)
            .filter(|node| node.kind.is_file())
            .map(|node| node.content.clone())
    }

    /// Returns the object at `path`.
    pub fn find(&self, path: &str) -> Option<RemoteObject> {
        let state = self.state.lock();
        let id = state.resolve(path).ok()?;
        state.snapshot(&id)
    }

    /// Returns every object below the root, sorted by path.
    pub fn list_tree(&self) -> Vec<RemoteObject> {
        let state = self.state.lock();
        let mut objects: Vec<RemoteObject> = state
            .nodes
            .keys()
            .filter(|id| id.as_str() != ROOT_ID)
            .filter_map(|id| state.snapshot(id))
            .collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        objects
    }

    fn gate(&self) -> SyncResult<parking_lot::MutexGuard<'_, RepoState>> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.offline {
            return Err(SyncError::transport_retryable("repository unreachable"));
        }
        if state.timeout.is_some_and(|timeout| state.latency > timeout) {
            return Err(SyncError::Timeout);
        }
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        Ok(state)
    }
}

fn split_path(path: &str) -> SyncResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) if !name.is_empty() => {
            Ok((if parent.is_empty() { "/" } else { parent }, name))
        }
        _ => Err(SyncError::InvalidEvent(format!("not an object path: {path}"))),
    }
}

fn check_token(id: &RemoteId, node: &Node, expected: Option<&str>) -> SyncResult<()> {
    match expected {
        Some(expected) if expected != node.token.to_string() => Err(SyncError::conflict(
            id.as_str(),
            format!("expected change token {expected}, found {}", node.token),
        )),
        _ => Ok(()),
    }
}

impl RepoState {
    fn node(&self, id: &RemoteId) -> SyncResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| SyncError::not_found(id.as_str()))
    }

    fn node_mut(&mut self, id: &RemoteId) -> SyncResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found(id.as_str()))
    }

    fn path_of(&self, id: &RemoteId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(id)?;
        while let Some(parent) = &current.parent {
            names.push(current.name.as_str());
            current = self.nodes.get(parent)?;
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    fn snapshot(&self, id: &RemoteId) -> Option<RemoteObject> {
        let node = self.nodes.get(id)?;
        Some(RemoteObject {
            id: id.clone(),
            parent_id: node.parent.clone(),
            name: node.name.clone(),
            path: self.path_of(id)?,
            kind: node.kind,
            change_token: node.token.to_string(),
            fingerprint: node
                .kind
                .is_file()
                .then(|| Fingerprint::of_bytes(&node.content)),
            last_modified: node.modified,
        })
    }

    fn object(&self, id: &RemoteId) -> SyncResult<RemoteObject> {
        self.snapshot(id)
            .ok_or_else(|| SyncError::not_found(id.as_str()))
    }

    fn child_named(&self, parent: &RemoteId, name: &str) -> Option<RemoteId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.parent.as_ref() == Some(parent) && node.name == name)
            .map(|(id, _)| id.clone())
    }

    fn children(&self, parent: &RemoteId) -> Vec<RemoteId> {
        let mut ids: Vec<RemoteId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.as_ref() == Some(parent))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by_key(|id| self.nodes.get(id).map(|node| node.name.clone()));
        ids
    }

    fn resolve(&self, path: &str) -> SyncResult<RemoteId> {
        let mut current = RemoteId::new(ROOT_ID);
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            current = self
                .child_named(&current, segment)
                .ok_or_else(|| SyncError::not_found(path))?;
        }
        Ok(current)
    }

    fn is_ancestor(&self, ancestor: &RemoteId, id: &RemoteId) -> bool {
        let mut current = Some(id.clone());
        while let Some(candidate) = current {
            if &candidate == ancestor {
                return true;
            }
            current = self.nodes.get(&candidate).and_then(|node| node.parent.clone());
        }
        false
    }

    fn bump(&mut self, id: &RemoteId, kind: RemoteChangeKind) {
        self.seq += 1;
        let seq = self.seq;
        if let Some(node) = self.nodes.get_mut(id) {
            node.token = seq;
            node.modified = SystemTime::now();
        }
        self.log.push((seq, ChangeLogEntry::new(id.clone(), kind)));
    }

    fn insert(&mut self, parent: &RemoteId, name: &str, kind: ObjectKind, content: Vec<u8>) -> RemoteId {
        let id = RemoteId::new(format!("obj-{}", self.next_id));
        self.next_id += 1;
        self.nodes.insert(
            id.clone(),
            Node {
                parent: Some(parent.clone()),
                name: name.to_string(),
                kind,
                content,
                token: 0,
                modified: SystemTime::now(),
            },
        );
        self.bump(&id, RemoteChangeKind::Created);
        id
    }

    fn create(
        &mut self,
        parent: &RemoteId,
        name: &str,
        kind: ObjectKind,
        content: Vec<u8>,
    ) -> SyncResult<RemoteId> {
        if !self.node(parent)?.kind.is_folder() {
            return Err(SyncError::conflict(parent.as_str(), "parent is not a folder"));
        }
        if self.child_named(parent, name).is_some() {
            return Err(SyncError::conflict(
                parent.as_str(),
                format!("{name} already exists"),
            ));
        }
        Ok(self.insert(parent, name, kind, content))
    }

    fn mkdir_all(&mut self, path: &str) -> SyncResult<RemoteId> {
        let mut current = RemoteId::new(ROOT_ID);
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            current = match self.child_named(&current, segment) {
                Some(id) if self.node(&id)?.kind.is_folder() => id,
                Some(_) => return Err(SyncError::conflict(path, "a file exists at this path")),
                None => self.insert(&current, segment, ObjectKind::Folder, Vec::new()),
            };
        }
        Ok(current)
    }

    fn rename(&mut self, id: &RemoteId, new_name: &str) -> SyncResult<()> {
        let parent = self
            .node(id)?
            .parent
            .clone()
            .ok_or_else(|| SyncError::conflict(id.as_str(), "cannot rename the root"))?;
        if let Some(other) = self.child_named(&parent, new_name) {
            if &other != id {
                return Err(SyncError::conflict(id.as_str(), format!("{new_name} already exists")));
            }
        }
        self.node_mut(id)?.name = new_name.to_string();
        self.bump(id, RemoteChangeKind::Updated);
        Ok(())
    }

    fn relocate(&mut self, id: &RemoteId, target: &RemoteId) -> SyncResult<()> {
        if !self.node(target)?.kind.is_folder() {
            return Err(SyncError::conflict(target.as_str(), "target is not a folder"));
        }
        if self.is_ancestor(id, target) {
            return Err(SyncError::conflict(id.as_str(), "cannot move a folder into itself"));
        }
        let name = self.node(id)?.name.clone();
        if self.child_named(target, &name).is_some() {
            return Err(SyncError::conflict(id.as_str(), format!("{name} already exists in target")));
        }
        self.node_mut(id)?.parent = Some(target.clone());
        self.bump(id, RemoteChangeKind::Updated);
        Ok(())
    }

    fn remove_recursive(&mut self, id: &RemoteId) {
        for child in self.children(id) {
            self.remove_recursive(&child);
        }
        if self.nodes.remove(id).is_some() {
            self.seq += 1;
            let seq = self.seq;
            self.log
                .push((seq, ChangeLogEntry::new(id.clone(), RemoteChangeKind::Deleted)));
        }
    }

    fn check_allowed(&self, id: &RemoteId) -> SyncResult<()> {
        if self.denied.contains(id) {
            Err(SyncError::PermissionDenied {
                target: id.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl RemoteRepository for MemoryRepository {
    fn set_request_timeout(&self, timeout: Duration) {
        self.state.lock().timeout = Some(timeout);
    }

    fn latest_change_token(&self) -> SyncResult<String> {
        let state = self.gate()?;
        Ok(state.seq.to_string())
    }

    fn get_changes(&self, token: &str, max: usize) -> SyncResult<ChangeLogPage> {
        let state = self.gate()?;
        let since: u64 = token.parse().map_err(|_| SyncError::StaleChangeToken)?;
        if since < state.log_floor || since > state.seq {
            return Err(SyncError::StaleChangeToken);
        }

        let pending: Vec<&(u64, ChangeLogEntry)> =
            state.log.iter().filter(|(seq, _)| *seq > since).collect();
        let page: Vec<&(u64, ChangeLogEntry)> = pending.iter().take(max.max(1)).copied().collect();
        let next_token = page.last().map_or(since, |(seq, _)| *seq);
        let has_more = pending.len() > page.len();

        Ok(ChangeLogPage::new(
            page.into_iter().map(|(_, entry)| entry.clone()).collect(),
            next_token.to_string(),
            has_more,
        ))
    }

    fn get_object(&self, id: &RemoteId) -> SyncResult<RemoteObject> {
        self.gate()?.object(id)
    }

    fn get_object_by_path(&self, path: &str) -> SyncResult<RemoteObject> {
        let state = self.gate()?;
        let id = state.resolve(path)?;
        state.object(&id)
    }

    fn get_children(&self, id: &RemoteId) -> SyncResult<Vec<RemoteObject>> {
        let state = self.gate()?;
        state.node(id)?;
        Ok(state
            .children(id)
            .iter()
            .filter_map(|child| state.snapshot(child))
            .collect())
    }

    fn get_content(&self, id: &RemoteId) -> SyncResult<Vec<u8>> {
        let state = self.gate()?;
        let node = state.node(id)?;
        if node.kind.is_folder() {
            return Err(SyncError::InvalidEvent(format!("{id} is a folder")));
        }
        Ok(node.content.clone())
    }

    fn create_folder(&self, parent: &RemoteId, name: &str) -> SyncResult<RemoteObject> {
        let mut state = self.gate()?;
        state.check_allowed(parent)?;
        let id = state.create(parent, name, ObjectKind::Folder, Vec::new())?;
        state.mutations += 1;
        state.object(&id)
    }

    fn create_document(
        &self,
        parent: &RemoteId,
        name: &str,
        content: &[u8],
    ) -> SyncResult<RemoteObject> {
        let mut state = self.gate()?;
        state.check_allowed(parent)?;
        let id = state.create(parent, name, ObjectKind::File, content.to_vec())?;
        state.mutations += 1;
        state.object(&id)
    }

    fn set_content(
        &self,
        id: &RemoteId,
        content: &[u8],
        expected_token: Option<&str>,
    ) -> SyncResult<RemoteObject> {
        let mut state = self.gate()?;
        state.check_allowed(id)?;
        let node = state.node(id)?;
        check_token(id, node, expected_token)?;
        if node.kind.is_folder() {
            return Err(SyncError::InvalidEvent(format!("{id} is a folder")));
        }
        state.node_mut(id)?.content = content.to_vec();
        state.bump(id, RemoteChangeKind::Updated);
        state.mutations += 1;
        state.object(id)
    }

    fn update_properties(
        &self,
        id: &RemoteId,
        name: &str,
        expected_token: Option<&str>,
    ) -> SyncResult<RemoteObject> {
        let mut state = self.gate()?;
        state.check_allowed(id)?;
        check_token(id, state.node(id)?, expected_token)?;
        state.rename(id, name)?;
        state.mutations += 1;
        state.object(id)
    }

    fn move_object(
        &self,
        id: &RemoteId,
        source_parent: &RemoteId,
        target_parent: &RemoteId,
    ) -> SyncResult<RemoteObject> {
        let mut state = self.gate()?;
        state.check_allowed(id)?;
        state.check_allowed(target_parent)?;
        if state.node(id)?.parent.as_ref() != Some(source_parent) {
            return Err(SyncError::conflict(id.as_str(), "object is not in the source folder"));
        }
        state.relocate(id, target_parent)?;
        state.mutations += 1;
        state.object(id)
    }

    fn delete(&self, id: &RemoteId, expected_token: Option<&str>) -> SyncResult<()> {
        let mut state = self.gate()?;
        state.check_allowed(id)?;
        let node = state.node(id)?;
        if node.parent.is_none() {
            return Err(SyncError::conflict(id.as_str(), "cannot delete the root"));
        }
        check_token(id, node, expected_token)?;
        state.remove_recursive(id);
        state.mutations += 1;
        Ok(())
    }
}
