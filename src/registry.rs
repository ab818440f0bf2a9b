//! Schema registry: holds file descriptors, injects well-known types,
//! orders files by dependency, and indexes messages, enums, and service
//! methods for name resolution.
//!
//! The registry is append-only within a session. Registration replaces
//! same-named files and rebuilds the indices; readers always see a
//! consistent snapshot because the engine swaps whole registries behind
//! an `Arc` (decoding never takes a write lock).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::descriptor::parse::{parse_file_descriptor, parse_file_descriptor_set, ParseError};
use crate::descriptor::{
    EnumDescriptor, FileDescriptor, MessageDescriptor, MethodDescriptor, normalize_type_name,
};
use crate::wkt;

/// A service method plus the names needed to key and resolve it.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub service_full_name: String,
    pub method: MethodDescriptor,
}

impl MethodEntry {
    /// Registered path key, `/pkg.Service/Method`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service_full_name, self.method.name)
    }
}

/// A resolved method lookup: the method plus its message descriptors,
/// where resolvable.
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub entry: MethodEntry,
    pub input: Option<Arc<MessageDescriptor>>,
    pub output: Option<Arc<MessageDescriptor>>,
}

/// A field whose `type_name` does not resolve to any registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedField {
    pub message: String,
    pub field: String,
    pub type_name: String,
}

#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    /// file_name → file, iteration-ordered for deterministic walks.
    files: BTreeMap<String, FileDescriptor>,
    message_index: HashMap<String, Arc<MessageDescriptor>>,
    enum_index: HashMap<String, Arc<EnumDescriptor>>,
    /// `/pkg.Service/Method` → method entry.
    method_index: HashMap<String, MethodEntry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn file(&self, file_name: &str) -> Option<&FileDescriptor> {
        self.files.get(file_name)
    }

    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.message_index.keys().map(String::as_str)
    }

    pub fn service_paths(&self) -> impl Iterator<Item = &str> {
        self.method_index.keys().map(String::as_str)
    }

    /// Register pre-built file descriptors. Same-named files are
    /// replaced; well-known dependencies are injected; indices are
    /// rebuilt from the full file set.
    pub fn register_files(&mut self, files: Vec<FileDescriptor>) {
        for file in files {
            if file.file_name.is_empty() {
                warn!("skipping file descriptor with empty name");
                continue;
            }
            self.files.insert(file.file_name.clone(), file);
        }
        self.inject_well_known_types();
        self.rebuild_indices();
    }

    /// Register raw `FileDescriptorProto` payloads, parsing each first.
    /// Fails without mutating the registry if any payload is malformed.
    pub fn register_file_descriptor_bytes(
        &mut self,
        payloads: &[Vec<u8>],
    ) -> Result<(), ParseError> {
        let mut parsed = Vec::with_capacity(payloads.len());
        for bytes in payloads {
            parsed.push(parse_file_descriptor(bytes)?);
        }
        self.register_files(parsed);
        Ok(())
    }

    /// Register a whole `FileDescriptorSet` payload.
    pub fn register_file_descriptor_set(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        let files = parse_file_descriptor_set(bytes)?;
        self.register_files(files);
        Ok(())
    }

    /// Inject well-known-type files referenced by dependency but absent.
    fn inject_well_known_types(&mut self) {
        let needed: Vec<String> = self
            .files
            .values()
            .flat_map(|f| f.dependencies.iter())
            .filter(|dep| !self.files.contains_key(dep.as_str()))
            .filter(|dep| wkt::WELL_KNOWN_FILES.contains(&dep.as_str()))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for file_name in needed {
            if let Some(file) = wkt::well_known_file(&file_name) {
                self.files.insert(file_name, file);
            }
        }
    }

    /// Files in dependency order (imports first). Cycles are broken by
    /// skipping the edge that closes the cycle, with a warning; the
    /// cycle-closing file still appears in the order.
    pub fn ordered_files(&self) -> Vec<&FileDescriptor> {
        let mut order: Vec<&FileDescriptor> = Vec::with_capacity(self.files.len());
        let mut done: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();

        // Iterative DFS so deep import chains cannot overflow the stack.
        for root in self.files.keys() {
            if done.contains(root.as_str()) {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            in_progress.insert(root.as_str());
            while let Some((name, dep_idx)) = stack.pop() {
                let Some(file) = self.files.get(name) else {
                    in_progress.remove(name);
                    continue;
                };
                if dep_idx < file.dependencies.len() {
                    stack.push((name, dep_idx + 1));
                    let dep = file.dependencies[dep_idx].as_str();
                    if done.contains(dep) || !self.files.contains_key(dep) {
                        continue;
                    }
                    if in_progress.contains(dep) {
                        warn!(file = %name, dependency = %dep, "import cycle detected, skipping edge");
                        continue;
                    }
                    in_progress.insert(dep);
                    stack.push((dep, 0));
                } else {
                    in_progress.remove(name);
                    if done.insert(name) {
                        order.push(file);
                    }
                }
            }
        }
        order
    }

    fn rebuild_indices(&mut self) {
        let mut message_index = HashMap::new();
        let mut enum_index = HashMap::new();
        let mut method_index = HashMap::new();

        let ordered: Vec<FileDescriptor> = self.ordered_files().into_iter().cloned().collect();
        for file in &ordered {
            for message in &file.messages {
                index_message(message, &mut message_index, &mut enum_index);
            }
            for en in &file.enums {
                enum_index.insert(en.full_name.clone(), Arc::new(en.clone()));
            }
            for service in &file.services {
                for method in &service.methods {
                    let entry = MethodEntry {
                        service_full_name: service.full_name.clone(),
                        method: method.clone(),
                    };
                    method_index.insert(entry.path(), entry);
                }
            }
        }

        self.message_index = message_index;
        self.enum_index = enum_index;
        self.method_index = method_index;
    }

    /// Resolve a message by dotted name with the deterministic fallback
    /// chain: exact, segment-bounded suffix, case-insensitive suffix,
    /// unique last segment.
    pub fn find_message(&self, name: &str) -> Option<Arc<MessageDescriptor>> {
        resolve_name(&self.message_index, name).cloned()
    }

    pub fn find_enum(&self, name: &str) -> Option<Arc<EnumDescriptor>> {
        resolve_name(&self.enum_index, name).cloned()
    }

    /// Resolve a URL path to a method: exact match on the registered
    /// path first, then a case-insensitive suffix match (tolerates
    /// reverse-proxy prefixes in the captured URL).
    pub fn find_method(&self, path: &str) -> Option<ResolvedMethod> {
        let entry = self.method_index.get(path).or_else(|| {
            let query = path.to_ascii_lowercase();
            let mut candidates: Vec<(&String, &MethodEntry)> = self
                .method_index
                .iter()
                .filter(|(key, _)| {
                    let key = key.to_ascii_lowercase();
                    query.ends_with(&key)
                })
                .collect();
            // Longest registered path wins; ties break lexicographically.
            candidates.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then(a.cmp(b)));
            candidates.first().map(|(_, entry)| *entry)
        })?;

        Some(ResolvedMethod {
            entry: entry.clone(),
            input: self.find_message(&entry.method.input_type),
            output: self.find_message(&entry.method.output_type),
        })
    }

    /// Every field referencing a type name that no index entry satisfies.
    pub fn unresolved_fields(&self) -> Vec<UnresolvedField> {
        let mut out = Vec::new();
        for file in self.files.values() {
            for message in &file.messages {
                self.collect_unresolved(message, &mut out);
            }
        }
        out.sort_by(|a, b| (&a.message, &a.field).cmp(&(&b.message, &b.field)));
        out
    }

    fn collect_unresolved(&self, message: &MessageDescriptor, out: &mut Vec<UnresolvedField>) {
        for field in &message.fields {
            if let Some(type_name) = &field.type_name {
                let resolved = self.find_message(type_name).is_some()
                    || self.find_enum(type_name).is_some();
                if !resolved {
                    out.push(UnresolvedField {
                        message: message.full_name.clone(),
                        field: field.name.clone(),
                        type_name: type_name.clone(),
                    });
                }
            }
        }
        for nested in &message.nested_messages {
            self.collect_unresolved(nested, out);
        }
    }
}

fn index_message(
    message: &MessageDescriptor,
    message_index: &mut HashMap<String, Arc<MessageDescriptor>>,
    enum_index: &mut HashMap<String, Arc<EnumDescriptor>>,
) {
    message_index.insert(message.full_name.clone(), Arc::new(message.clone()));
    for nested in &message.nested_messages {
        index_message(nested, message_index, enum_index);
    }
    for en in &message.nested_enums {
        enum_index.insert(en.full_name.clone(), Arc::new(en.clone()));
    }
}

/// Shared resolution chain over an index. Every stage is deterministic:
/// within a stage, candidates are compared lexicographically.
fn resolve_name<'a, T>(index: &'a HashMap<String, T>, name: &str) -> Option<&'a T> {
    let query = normalize_type_name(name);
    if query.is_empty() {
        return None;
    }

    // Stage 1: exact.
    if let Some(found) = index.get(query) {
        return Some(found);
    }

    // Stage 2: segment-bounded suffix ("X.Y.Name" matches "Name", "Y.Name").
    if let Some(key) = best_key(index.keys().filter(|k| tail_matches(k, query, false))) {
        return index.get(key);
    }

    // Stage 3: case-insensitive tail.
    if let Some(key) = best_key(index.keys().filter(|k| tail_matches(k, query, true))) {
        return index.get(key);
    }

    // Stage 4: unique last segment.
    let last = query.rsplit('.').next()?;
    let mut with_segment = index
        .keys()
        .filter(|k| k.rsplit('.').next() == Some(last));
    let candidate = with_segment.next()?;
    if with_segment.next().is_some() {
        return None;
    }
    index.get(candidate)
}

fn best_key<'a, I: Iterator<Item = &'a String>>(keys: I) -> Option<&'a String> {
    keys.min_by(|a, b| a.len().cmp(&b.len()).then(a.cmp(b)))
}

/// True when `key` ends with `query` on a dotted segment boundary.
fn tail_matches(key: &str, query: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        segment_suffix(&key.to_ascii_lowercase(), &query.to_ascii_lowercase())
    } else {
        segment_suffix(key, query)
    }
}

fn segment_suffix(key: &str, query: &str) -> bool {
    if !key.ends_with(query) {
        return false;
    }
    let boundary = key.len() - query.len();
    boundary == 0 || key.as_bytes()[boundary - 1] == b'.'
}
