//! Destination topology: per-record persistence, a flat table, or a join into an existing table.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::directory::{FindMethod, MemberAccessor, TypeDescriptor, TypeDirectory};
use crate::error::{ImportError, ImportResult};
use crate::storage::RecordStore;
use crate::types::{DataType, Record, Value};

use super::{JoinTarget, TableTarget, Topology};

/// Where an import run put its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// One persistent record per row under `directory`.
    Records { directory: String },
    /// Rows collected into the table stored at `path`.
    Table { path: String },
    /// Rows attached to parent rows of the existing table at `path`.
    JoinedTable { path: String },
}

impl Destination {
    pub fn path(&self) -> &str {
        match self {
            Self::Records { directory } => directory,
            Self::Table { path } | Self::JoinedTable { path } => path,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Records { directory } => write!(f, "records in '{directory}'"),
            Self::Table { path } => write!(f, "table '{path}'"),
            Self::JoinedTable { path } => write!(f, "joined table '{path}'"),
        }
    }
}

/// A materialized record that could not be attached to a parent row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinFailure {
    #[error("no reference row for join key {key:?}")]
    NoReferenceRow { key: Value },
    #[error("index {found:?} does not follow parent collection length {expected}")]
    IndexMismatch { expected: usize, found: Value },
}

/// Flat-table destination state.
#[derive(Debug)]
pub(crate) struct FlatTable {
    path: String,
    table: Record,
    rows: MemberAccessor,
}

/// Join destination state.
#[derive(Debug)]
pub(crate) struct JoinTable {
    path: String,
    table: Record,
    rows: MemberAccessor,
    nested: MemberAccessor,
    join_key: MemberAccessor,
    find: FindMethod,
    index_member: Option<MemberAccessor>,
}

/// Sole writer of the destination for one run.
#[derive(Debug)]
pub(crate) enum Reconciler {
    Records { directory: String },
    Flat(FlatTable),
    Join(JoinTable),
}

/// Collection member on `owner` holding records; `element` restricts the record type.
fn collection_member(
    directory: &TypeDirectory,
    owner: &TypeDescriptor,
    explicit: Option<&str>,
    element: Option<&str>,
) -> Option<MemberAccessor> {
    let holds = |t: &DataType| match t {
        DataType::Array(inner) => match inner.as_ref() {
            DataType::Object(name) => element.is_none_or(|e| e == name),
            _ => false,
        },
        _ => false,
    };
    match explicit {
        Some(name) => directory
            .find_member(owner, name)
            .filter(|m| holds(m.data_type())),
        None => owner
            .members()
            .iter()
            .find(|m| holds(&m.data_type))
            .and_then(|m| directory.find_member(owner, &m.name)),
    }
}

fn required_member(directory: &TypeDirectory, owner: &TypeDescriptor, name: &str) -> ImportResult<MemberAccessor> {
    directory
        .find_member(owner, name)
        .ok_or_else(|| ImportError::MissingMember {
            type_name: owner.name.clone(),
            member: name.to_string(),
            message: "member not declared".to_string(),
        })
}

impl Reconciler {
    /// Validate the destination and prepare it for a run.
    ///
    /// Flat tables are loaded or created and their rows cleared. Join tables must exist; every
    /// parent row's nested collection is reset once here.
    pub(crate) fn setup(
        topology: &Topology,
        target: &TypeDescriptor,
        output_dir: &str,
        directory: &TypeDirectory,
        store: &mut dyn RecordStore,
    ) -> ImportResult<Self> {
        match topology {
            Topology::Records => Ok(Self::Records {
                directory: output_dir.to_string(),
            }),
            Topology::Table(t) => setup_flat(t, target, directory, store).map(Self::Flat),
            Topology::Join(j) => setup_join(j, target, directory, store).map(Self::Join),
        }
    }

    /// True when each row is its own persistent record.
    pub(crate) fn is_persistent(&self) -> bool {
        matches!(self, Self::Records { .. })
    }

    pub(crate) fn destination(&self) -> Destination {
        match self {
            Self::Records { directory } => Destination::Records {
                directory: directory.clone(),
            },
            Self::Flat(t) => Destination::Table { path: t.path.clone() },
            Self::Join(j) => Destination::JoinedTable { path: j.path.clone() },
        }
    }

    /// Hand a populated record to the destination.
    ///
    /// The outer `Result` carries storage errors; the inner one a per-row join failure.
    pub(crate) fn attach(
        &mut self,
        identity: &str,
        record: Record,
        store: &mut dyn RecordStore,
    ) -> ImportResult<Result<(), JoinFailure>> {
        match self {
            Self::Records { .. } => {
                store.mark_dirty(identity, record)?;
                Ok(Ok(()))
            }
            Self::Flat(t) => {
                match t.rows.get_mut(&mut t.table) {
                    Value::Array(items) => items.push(Value::Record(record)),
                    slot => *slot = Value::Array(vec![Value::Record(record)]),
                }
                Ok(Ok(()))
            }
            Self::Join(j) => Ok(j.attach(record)),
        }
    }

    /// Write the table back (mark dirty). Per-record destinations need nothing.
    pub(crate) fn finish(self, store: &mut dyn RecordStore) -> ImportResult<()> {
        match self {
            Self::Records { .. } => Ok(()),
            Self::Flat(t) => store.mark_dirty(&t.path, t.table),
            Self::Join(j) => store.mark_dirty(&j.path, j.table),
        }
    }
}

fn setup_flat(
    target_cfg: &TableTarget,
    target: &TypeDescriptor,
    directory: &TypeDirectory,
    store: &mut dyn RecordStore,
) -> ImportResult<FlatTable> {
    let table_type = directory.resolve_record_type(&target_cfg.table_type)?;
    let rows = collection_member(
        directory,
        &table_type,
        target_cfg.rows_member.as_deref(),
        Some(target.name.as_str()),
    )
    .ok_or_else(|| ImportError::MissingRowCollection {
        table_type: table_type.name.clone(),
        row_type: target.name.clone(),
    })?;

    let mut table = match store.load_by_path(&target_cfg.path, &table_type.name)? {
        Some(existing) => existing,
        None => {
            info!(path = %target_cfg.path, table_type = %table_type.name, "table created");
            store.create(&table_type, &target_cfg.path)?
        }
    };
    rows.set(&mut table, Value::Array(Vec::new()));

    Ok(FlatTable {
        path: target_cfg.path.clone(),
        table,
        rows,
    })
}

fn setup_join(
    cfg: &JoinTarget,
    target: &TypeDescriptor,
    directory: &TypeDirectory,
    store: &mut dyn RecordStore,
) -> ImportResult<JoinTable> {
    let table_type = directory.resolve_record_type(&cfg.table_type)?;
    let find = table_type
        .find_method_named(&cfg.find_method)
        .cloned()
        .ok_or_else(|| ImportError::NoFindMethod {
            table_type: table_type.name.clone(),
            method: cfg.find_method.clone(),
        })?;
    let rows = collection_member(directory, &table_type, cfg.rows_member.as_deref(), None)
        .ok_or_else(|| ImportError::MissingRowCollection {
            table_type: table_type.name.clone(),
            row_type: "*".to_string(),
        })?;
    let parent_name = rows
        .data_type()
        .element()
        .type_name()
        .unwrap_or_default()
        .to_string();
    let parent_type = directory.resolve_record_type(&parent_name)?;

    let nested = collection_member(directory, &parent_type, Some(cfg.nested_member.as_str()), Some(target.name.as_str()))
        .ok_or_else(|| ImportError::MissingMember {
            type_name: parent_type.name.clone(),
            member: cfg.nested_member.clone(),
            message: format!("expected a collection of '{}'", target.name),
        })?;
    let join_key = required_member(directory, target, &cfg.join_key)?;
    let index_member = cfg
        .index_member
        .as_deref()
        .map(|name| required_member(directory, target, name))
        .transpose()?;

    let mut table = store
        .load_by_path(&cfg.table_path, &table_type.name)?
        .ok_or_else(|| ImportError::JoinTableMissing {
            path: cfg.table_path.clone(),
        })?;

    let mut parents = 0usize;
    if let Value::Array(items) = rows.get_mut(&mut table) {
        for parent in items.iter_mut().filter_map(Value::as_record_mut) {
            match nested.get_mut(parent) {
                Value::Array(children) => children.clear(),
                slot => *slot = Value::Array(Vec::new()),
            }
            parents += 1;
        }
    }
    debug!(path = %cfg.table_path, parents, "join target prepared");

    Ok(JoinTable {
        path: cfg.table_path.clone(),
        table,
        rows,
        nested,
        join_key,
        find,
        index_member,
    })
}

impl JoinTable {
    fn attach(&mut self, record: Record) -> Result<(), JoinFailure> {
        let key = self.join_key.get(&record).clone();
        let blank = match &key {
            Value::Null => true,
            Value::Utf8(s) => s.trim().is_empty(),
            _ => false,
        };
        if blank {
            return Err(JoinFailure::NoReferenceRow { key });
        }
        let rows = self.rows.get(&self.table).as_array().unwrap_or(&[]);
        let Some(idx) = self.find.find(rows, &key) else {
            return Err(JoinFailure::NoReferenceRow { key });
        };

        let parent = match self.rows.get_mut(&mut self.table) {
            Value::Array(items) => items.get_mut(idx).and_then(Value::as_record_mut),
            _ => None,
        };
        let Some(parent) = parent else {
            return Err(JoinFailure::NoReferenceRow { key });
        };

        let slot = self.nested.get_mut(parent);
        if !matches!(slot, Value::Array(_)) {
            *slot = Value::Array(Vec::new());
        }
        let Value::Array(children) = slot else {
            return Err(JoinFailure::NoReferenceRow { key });
        };

        if let Some(index_member) = &self.index_member {
            let found = index_member.get(&record);
            let expected = children.len();
            let matches = matches!(found, Value::Int64(i) if usize::try_from(*i).is_ok_and(|i| i == expected));
            if !matches {
                return Err(JoinFailure::IndexMismatch {
                    expected,
                    found: found.clone(),
                });
            }
        }

        children.push(Value::Record(record));
        Ok(())
    }
}
