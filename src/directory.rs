//! Type Directory: named record/enum types and cached member accessors.
//!
//! Records have no runtime reflection, so the host registers every importable type as a
//! [`TypeDescriptor`] through a [`TypeSource`]. The [`TypeDirectory`] scans that source once,
//! caches lookups by simple and fully-qualified name, and hands out [`MemberAccessor`]s that read
//! and write [`Record`] members by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::{ImportError, ImportResult};
use crate::types::{DataType, Record, Value};

static NULL_VALUE: Value = Value::Null;

/// Signature of a custom keyed find method: `(table rows, key) -> matching row index`.
pub type FindFn = dyn Fn(&[Value], &Value) -> Option<usize> + Send + Sync;

/// Keyed lookup of a parent row inside a table's row collection.
#[derive(Clone)]
pub enum FindMethod {
    /// First row whose named member equals the key.
    ByMember(String),
    /// Host-supplied lookup.
    Custom(Arc<FindFn>),
}

impl FindMethod {
    pub fn by_member(member: impl Into<String>) -> Self {
        Self::ByMember(member.into())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[Value], &Value) -> Option<usize> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Index of the row matching `key`, if any.
    pub fn find(&self, rows: &[Value], key: &Value) -> Option<usize> {
        match self {
            Self::ByMember(member) => rows.iter().position(|row| {
                row.as_record()
                    .and_then(|r| r.get(member))
                    .is_some_and(|v| v == key)
            }),
            Self::Custom(f) => f(rows, key),
        }
    }
}

impl fmt::Debug for FindMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByMember(m) => f.debug_tuple("ByMember").field(m).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One declared member of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDef {
    pub name: String,
    pub data_type: DataType,
    /// Value assigned by [`TypeDescriptor::instantiate`].
    pub default: Value,
}

/// Shape of a registered type.
#[derive(Debug, Clone)]
pub enum TypeKind {
    Record {
        members: Vec<MemberDef>,
        find_methods: Vec<(String, FindMethod)>,
    },
    Enum {
        variants: Vec<(String, i64)>,
    },
}

/// A registered type: simple name, optional namespace, and its shape.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub namespace: Option<String>,
    pub kind: TypeKind,
}

impl TypeDescriptor {
    /// Start a record type with no members.
    pub fn record(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            kind: TypeKind::Record {
                members: Vec::new(),
                find_methods: Vec::new(),
            },
        }
    }

    /// Enum type whose variants take the values `0..n` in order.
    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants = variants
            .into_iter()
            .enumerate()
            .map(|(i, v)| (v.into(), i as i64))
            .collect();
        Self {
            name: name.into(),
            namespace: None,
            kind: TypeKind::Enum { variants },
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a member with the type's natural default. No-op on enum types.
    pub fn member(self, name: impl Into<String>, data_type: DataType) -> Self {
        let default = data_type.default_value();
        self.member_with_default(name, data_type, default)
    }

    pub fn member_with_default(mut self, name: impl Into<String>, data_type: DataType, default: Value) -> Self {
        if let TypeKind::Record { members, .. } = &mut self.kind {
            members.push(MemberDef {
                name: name.into(),
                data_type,
                default,
            });
        }
        self
    }

    /// Register a keyed find method. No-op on enum types.
    pub fn find_method(mut self, name: impl Into<String>, method: FindMethod) -> Self {
        if let TypeKind::Record { find_methods, .. } = &mut self.kind {
            find_methods.push((name.into(), method));
        }
        self
    }

    /// `namespace.name`, or the simple name when there is no namespace.
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self.kind, TypeKind::Record { .. })
    }

    pub fn members(&self) -> &[MemberDef] {
        match &self.kind {
            TypeKind::Record { members, .. } => members,
            TypeKind::Enum { .. } => &[],
        }
    }

    pub fn find_method_named(&self, name: &str) -> Option<&FindMethod> {
        match &self.kind {
            TypeKind::Record { find_methods, .. } => {
                find_methods.iter().find(|(n, _)| n == name).map(|(_, m)| m)
            }
            TypeKind::Enum { .. } => None,
        }
    }

    pub fn enum_variants(&self) -> Option<&[(String, i64)]> {
        match &self.kind {
            TypeKind::Enum { variants } => Some(variants),
            TypeKind::Record { .. } => None,
        }
    }

    /// A fresh record with every member at its default.
    pub fn instantiate(&self) -> Record {
        let mut record = Record::new(self.name.clone());
        for m in self.members() {
            record.members.insert(m.name.clone(), m.default.clone());
        }
        record
    }
}

/// Resolved (type, member) pair; reads and writes one member of records of that type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberAccessor {
    owner: String,
    name: String,
    data_type: DataType,
    default: Value,
}

impl MemberAccessor {
    fn from_def(owner: &str, def: &MemberDef) -> Self {
        Self {
            owner: owner.to_string(),
            name: def.name.clone(),
            data_type: def.data_type.clone(),
            default: def.default.clone(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn get<'r>(&self, record: &'r Record) -> &'r Value {
        record.members.get(&self.name).unwrap_or(&NULL_VALUE)
    }

    pub fn set(&self, record: &mut Record, value: Value) {
        record.members.insert(self.name.clone(), value);
    }

    /// Mutable member slot, inserted at the member default when absent.
    pub fn get_mut<'r>(&self, record: &'r mut Record) -> &'r mut Value {
        record
            .members
            .entry(self.name.clone())
            .or_insert_with(|| self.default.clone())
    }
}

/// Host-supplied enumeration of every loaded type definition.
pub trait TypeSource: Send + Sync {
    fn types(&self) -> Vec<Arc<TypeDescriptor>>;
}

/// In-process [`TypeSource`]; registering a type with an existing full name replaces it.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<Vec<Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: TypeDescriptor) {
        let full = descriptor.full_name();
        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);
        types.retain(|t| t.full_name() != full);
        types.push(Arc::new(descriptor));
    }
}

impl TypeSource for TypeRegistry {
    fn types(&self) -> Vec<Arc<TypeDescriptor>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Result of a type lookup.
#[derive(Debug, Clone)]
pub enum TypeLookup {
    Found(Arc<TypeDescriptor>),
    NotFound,
    /// Full names of every candidate sharing the requested simple name.
    Ambiguous(Vec<String>),
}

#[derive(Debug, Default)]
struct TypeCache {
    by_simple: HashMap<String, Vec<Arc<TypeDescriptor>>>,
    by_full: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeCache {
    fn build(types: Vec<Arc<TypeDescriptor>>) -> Self {
        let mut cache = Self::default();
        for t in types {
            let full = t.full_name();
            if cache.by_full.contains_key(&full) {
                warn!(type_name = %full, "duplicate type definition ignored");
                continue;
            }
            cache.by_full.insert(full, Arc::clone(&t));
            cache.by_simple.entry(t.name.clone()).or_default().push(t);
        }
        debug!(types = cache.by_full.len(), "type directory cache built");
        cache
    }
}

type MemberCache = HashMap<String, HashMap<String, Option<MemberAccessor>>>;

/// Cached type and member lookup over a [`TypeSource`].
///
/// Caches are filled lazily and dropped by [`TypeDirectory::invalidate`]. Reads take shared locks,
/// so one directory can serve several imports.
pub struct TypeDirectory {
    source: Arc<dyn TypeSource>,
    types: RwLock<Option<TypeCache>>,
    members: RwLock<MemberCache>,
}

impl fmt::Debug for TypeDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .types
            .read()
            .map(|g| g.is_some())
            .unwrap_or(false);
        f.debug_struct("TypeDirectory")
            .field("cached", &cached)
            .finish()
    }
}

impl TypeDirectory {
    pub fn new(source: Arc<dyn TypeSource>) -> Self {
        Self {
            source,
            types: RwLock::new(None),
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Directory over a fixed list of types.
    pub fn from_types<I>(types: I) -> Self
    where
        I: IntoIterator<Item = TypeDescriptor>,
    {
        let registry = TypeRegistry::new();
        for t in types {
            registry.register(t);
        }
        Self::new(Arc::new(registry))
    }

    /// Drop every cache; the next lookup rescans the source.
    pub fn invalidate(&self) {
        *self.types.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn with_cache<R>(&self, f: impl FnOnce(&TypeCache) -> R) -> R {
        {
            let guard = self.types.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cache) = guard.as_ref() {
                return f(cache);
            }
        }
        let mut guard = self.types.write().unwrap_or_else(PoisonError::into_inner);
        let cache = guard.get_or_insert_with(|| TypeCache::build(self.source.types()));
        f(cache)
    }

    /// Look up a type by simple name, or by `namespace.name` when `fully_qualified` is set.
    pub fn find_type(&self, name: &str, fully_qualified: bool) -> TypeLookup {
        self.with_cache(|cache| {
            if fully_qualified {
                return match cache.by_full.get(name) {
                    Some(t) => TypeLookup::Found(Arc::clone(t)),
                    None => TypeLookup::NotFound,
                };
            }
            match cache.by_simple.get(name).map(Vec::as_slice) {
                None | Some([]) => TypeLookup::NotFound,
                Some([only]) => TypeLookup::Found(Arc::clone(only)),
                Some(many) => TypeLookup::Ambiguous(many.iter().map(|t| t.full_name()).collect()),
            }
        })
    }

    /// Resolve `name` (fully qualified when it contains a `.`) or fail with a setup error.
    pub fn resolve_type(&self, name: &str) -> ImportResult<Arc<TypeDescriptor>> {
        match self.find_type(name, name.contains('.')) {
            TypeLookup::Found(t) => Ok(t),
            TypeLookup::NotFound => Err(ImportError::TypeNotFound {
                name: name.to_string(),
            }),
            TypeLookup::Ambiguous(candidates) => Err(ImportError::AmbiguousType {
                name: name.to_string(),
                candidates,
            }),
        }
    }

    /// Like [`Self::resolve_type`] but also requires a record type.
    pub fn resolve_record_type(&self, name: &str) -> ImportResult<Arc<TypeDescriptor>> {
        let t = self.resolve_type(name)?;
        if !t.is_record() {
            return Err(ImportError::NotARecordType {
                name: name.to_string(),
            });
        }
        Ok(t)
    }

    /// Enum type by name, if exactly one matches.
    pub fn find_enum(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        match self.find_type(name, name.contains('.')) {
            TypeLookup::Found(t) if t.enum_variants().is_some() => Some(t),
            _ => None,
        }
    }

    /// Accessor for `member` on `owner`, cached per type (misses are cached too).
    pub fn find_member(&self, owner: &TypeDescriptor, member: &str) -> Option<MemberAccessor> {
        let key = owner.full_name();
        {
            let guard = self.members.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = guard.get(&key).and_then(|m| m.get(member)) {
                return hit.clone();
            }
        }
        let found = owner
            .members()
            .iter()
            .find(|m| m.name == member)
            .map(|def| MemberAccessor::from_def(&owner.name, def));
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .insert(member.to_string(), found.clone());
        found
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{FindMethod, TypeDescriptor, TypeDirectory, TypeLookup, TypeRegistry};
    use crate::types::{DataType, Record, Value};

    fn item() -> TypeDescriptor {
        TypeDescriptor::record("Item")
            .in_namespace("Game")
            .member("id", DataType::Utf8)
            .member("power", DataType::Int64)
    }

    #[test]
    fn simple_name_lookup_reports_ambiguity() {
        let dir = TypeDirectory::from_types(vec![
            item(),
            TypeDescriptor::record("Item").in_namespace("Editor"),
        ]);

        match dir.find_type("Item", false) {
            TypeLookup::Ambiguous(mut names) => {
                names.sort();
                assert_eq!(names, vec!["Editor.Item".to_string(), "Game.Item".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert!(matches!(dir.find_type("Game.Item", true), TypeLookup::Found(_)));
        assert!(matches!(dir.find_type("Nope", false), TypeLookup::NotFound));
        assert!(dir.resolve_type("Item").is_err());
        assert!(dir.resolve_type("Editor.Item").is_ok());
    }

    #[test]
    fn invalidate_picks_up_regenerated_types() {
        let registry = Arc::new(TypeRegistry::new());
        registry.register(item());
        let dir = TypeDirectory::new(registry.clone());

        let t = dir.resolve_type("Item").unwrap();
        assert!(dir.find_member(&t, "rarity").is_none());

        registry.register(item().member("rarity", DataType::Utf8));
        // Stale until invalidated.
        let t = dir.resolve_type("Item").unwrap();
        assert!(dir.find_member(&t, "rarity").is_none());

        dir.invalidate();
        let t = dir.resolve_type("Item").unwrap();
        assert!(dir.find_member(&t, "rarity").is_some());
    }

    #[test]
    fn accessor_reads_and_writes_members() {
        let dir = TypeDirectory::from_types(vec![item()]);
        let t = dir.resolve_type("Item").unwrap();
        let power = dir.find_member(&t, "power").unwrap();

        let mut record = t.instantiate();
        assert_eq!(power.get(&record), &Value::Int64(0));
        power.set(&mut record, Value::Int64(7));
        assert_eq!(record.get("power"), Some(&Value::Int64(7)));

        let mut empty = Record::new("Item");
        assert_eq!(power.get(&empty), &Value::Null);
        *power.get_mut(&mut empty) = Value::Int64(3);
        assert_eq!(empty.get("power"), Some(&Value::Int64(3)));
    }

    #[test]
    fn find_method_by_member_matches_first_row() {
        let rows = vec![
            Value::Record(Record::new("P").with("id", Value::Utf8("P1".into()))),
            Value::Record(Record::new("P").with("id", Value::Utf8("P2".into()))),
        ];
        let by_id = FindMethod::by_member("id");
        assert_eq!(by_id.find(&rows, &Value::Utf8("P2".into())), Some(1));
        assert_eq!(by_id.find(&rows, &Value::Utf8("P3".into())), None);

        let last = FindMethod::custom(|rows, _| rows.len().checked_sub(1));
        assert_eq!(last.find(&rows, &Value::Null), Some(1));
    }

    #[test]
    fn find_enum_ignores_record_types() {
        let dir = TypeDirectory::from_types(vec![
            item(),
            TypeDescriptor::enumeration("Rarity", ["Common", "Rare"]),
        ]);
        assert!(dir.find_enum("Rarity").is_some());
        assert!(dir.find_enum("Item").is_none());
    }
}
