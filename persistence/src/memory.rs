// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Memory store implementation.
//!
//! Collections opened from clones of the same [`MemoryManager`] share their data, which
//! lets a journal be reopened, as after a restart of the process.
//!

use crate::{
    database::{Collection, DbManager},
    error::Error,
};

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

type MemoryData = Arc<
    RwLock<HashMap<(String, String), Arc<RwLock<BTreeMap<String, Vec<u8>>>>>>,
>;

#[derive(Default, Clone)]
pub struct MemoryManager {
    data: MemoryData,
}

impl DbManager<MemoryStore> for MemoryManager {
    fn create_collection(
        &self,
        name: &str,
        prefix: &str,
    ) -> Result<MemoryStore, Error> {
        let mut data_lock = self.data.write().map_err(|e| {
            Error::CreateStore(format!("Can not lock manager data: {}", e))
        })?;
        let data = data_lock
            .entry((name.to_owned(), prefix.to_owned()))
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
            .clone();

        Ok(MemoryStore {
            name: name.to_owned(),
            prefix: prefix.to_owned(),
            data,
        })
    }
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    name: String,
    prefix: String,
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    fn key(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }
}

impl Collection for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let lock = self
            .data
            .read()
            .map_err(|e| Error::Get(format!("Can not lock data: {}", e)))?;

        match lock.get(&self.key(key)) {
            Some(value) => Ok(value.clone()),
            None => {
                Err(Error::EntryNotFound("Query returned no rows".to_owned()))
            }
        }
    }

    fn put(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        let key = self.key(key);
        let mut lock = self
            .data
            .write()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        lock.insert(key, data.to_vec());

        Ok(())
    }

    fn del(&mut self, key: &str) -> Result<(), Error> {
        let key = self.key(key);
        let mut lock = self
            .data
            .write()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        match lock.remove(&key) {
            Some(_) => Ok(()),
            None => {
                Err(Error::EntryNotFound("Query returned no rows".to_owned()))
            }
        }
    }

    fn purge(&mut self) -> Result<(), Error> {
        let mut lock = self
            .data
            .write()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        lock.clear();
        Ok(())
    }

    fn iter<'a>(
        &'a self,
        reverse: bool,
    ) -> Box<dyn Iterator<Item = (String, Vec<u8>)> + 'a> {
        let Ok(lock) = self.data.read() else {
            return Box::new(std::iter::empty());
        };

        let start = self.prefix.len() + 1;
        let items = lock
            .iter()
            .map(|(key, value)| (key[start..].to_owned(), value.clone()));
        let items: Vec<(String, Vec<u8>)> = if reverse {
            items.rev().collect()
        } else {
            items.collect()
        };

        Box::new(items.into_iter())
    }

    fn range(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, Error> {
        if from > to {
            return Ok(Vec::new());
        }
        let lock = self
            .data
            .read()
            .map_err(|e| Error::Get(format!("Can not lock data: {}", e)))?;

        let start = self.prefix.len() + 1;
        Ok(lock
            .range(self.key(from)..=self.key(to))
            .map(|(key, value)| (key[start..].to_owned(), value.clone()))
            .collect())
    }
}
