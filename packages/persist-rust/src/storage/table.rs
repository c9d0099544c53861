//! In-process table database backend.
//!
//! [`Database`] is a shared set of named tables; each table keeps its rows
//! in insertion order with a key index. [`TableStorage`] is a connection
//! handle: it stages a batch of rows and applies the whole batch under one
//! write lock on commit, or none of it.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use anyhow::Context;
use parking_lot::RwLock;
use strata_core::PropertySet;

use super::{ensure_persist, AccessMode, LogicalLocation, ReadCursor, RowStore, Storage};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<(String, PropertySet)>,
    index: AHashMap<String, usize>,
    next_id: u64,
}

impl Table {
    fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    fn next_free_key(&mut self) -> String {
        loop {
            self.next_id += 1;
            let candidate = self.next_id.to_string();
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }

    fn insert(&mut self, key: String, row: PropertySet) {
        self.index.insert(key.clone(), self.rows.len());
        self.rows.push((key, row));
    }
}

/// Shared in-process database of named tables.
#[derive(Debug, Default)]
pub struct Database {
    tables: RwLock<AHashMap<String, Table>>,
}

impl Database {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in `table`, or `None` if it does not exist.
    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.read().get(table).map(|t| t.rows.len())
    }

    /// Keys of `table` in insertion order.
    #[must_use]
    pub fn keys(&self, table: &str) -> Vec<String> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_row(&self, table: &str, key: &str) -> Option<PropertySet> {
        let tables = self.tables.read();
        let t = tables.get(table)?;
        t.index.get(key).map(|&i| t.rows[i].1.clone())
    }

    fn commit(&self, table: &str, rows: Vec<(Option<String>, PropertySet)>) -> anyhow::Result<()> {
        let mut tables = self.tables.write();

        let mut seen = AHashSet::new();
        for key in rows.iter().filter_map(|(k, _)| k.as_deref()) {
            let exists = tables.get(table).is_some_and(|t| t.contains(key));
            if exists || !seen.insert(key) {
                anyhow::bail!("duplicate key {key:?} in table {table:?}");
            }
        }

        let target = tables.entry(table.to_string()).or_default();
        for (key, row) in rows {
            let key = match key {
                Some(k) => k,
                None => target.next_free_key(),
            };
            target.insert(key, row);
        }
        Ok(())
    }

    fn update(&self, table: &str, key: &str, row: PropertySet) -> bool {
        let mut tables = self.tables.write();
        let Some(target) = tables.get_mut(table) else {
            return false;
        };
        match target.index.get(key) {
            Some(&i) => {
                target.rows[i].1 = row;
                true
            }
            None => false,
        }
    }

    fn load(&self, table: &str) -> anyhow::Result<Vec<PropertySet>> {
        let tables = self.tables.read();
        let t = tables
            .get(table)
            .with_context(|| format!("table {table:?} does not exist"))?;
        Ok(t.rows.iter().map(|(_, row)| row.clone()).collect())
    }
}

struct Batch {
    table: String,
    rows: Vec<(Option<String>, PropertySet)>,
}

/// Row-store connection to a [`Database`].
pub struct TableStorage {
    database: Arc<Database>,
    location: LogicalLocation,
    mode: AccessMode,
    batch: Option<Batch>,
    cursor: ReadCursor<PropertySet>,
}

impl TableStorage {
    pub const NAME: &'static str = "Table";

    #[must_use]
    pub fn new(database: Arc<Database>, location: LogicalLocation, mode: AccessMode) -> Self {
        Self {
            database,
            location,
            mode,
            batch: None,
            cursor: ReadCursor::new(),
        }
    }
}

impl Storage for TableStorage {
    fn storage_name(&self) -> &'static str {
        Self::NAME
    }

    fn location(&self) -> &LogicalLocation {
        &self.location
    }

    fn access_mode(&self) -> AccessMode {
        self.mode
    }

    fn as_row_store(&mut self) -> Option<&mut dyn RowStore> {
        Some(self)
    }
}

impl RowStore for TableStorage {
    fn begin_batch(&mut self, table: &str) -> anyhow::Result<()> {
        ensure_persist(self.mode, &self.location)?;
        self.batch = Some(Batch {
            table: table.to_string(),
            rows: Vec::new(),
        });
        Ok(())
    }

    fn staged_rows(&self) -> Option<usize> {
        self.batch.as_ref().map(|b| b.rows.len())
    }

    fn stage_row(&mut self, key: Option<String>, row: PropertySet) -> anyhow::Result<()> {
        let batch = self
            .batch
            .as_mut()
            .with_context(|| format!("no batch is open on {}", self.location))?;
        batch.rows.push((key, row));
        Ok(())
    }

    fn commit_batch(&mut self) -> anyhow::Result<()> {
        let batch = self
            .batch
            .take()
            .with_context(|| format!("no batch is open on {}", self.location))?;
        self.database.commit(&batch.table, batch.rows)
    }

    fn update_row(&mut self, table: &str, key: &str, row: PropertySet) -> anyhow::Result<bool> {
        ensure_persist(self.mode, &self.location)?;
        Ok(self.database.update(table, key, row))
    }

    fn load_rows(&mut self, table: &str) -> anyhow::Result<Vec<PropertySet>> {
        self.database.load(table)
    }

    fn read_cursor(&mut self) -> &mut ReadCursor<PropertySet> {
        &mut self.cursor
    }
}
