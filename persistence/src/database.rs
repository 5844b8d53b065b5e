// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Storage backends
//!
//! Journals are written on top of two small traits:
//!
//! - **[`DbManager`]**: factory of collections, one per `(name, prefix)` pair.
//! - **[`Collection`]**: ordered key-value storage with forward and reverse iteration.
//!
//! Keys are iterated in byte order, so callers that need numeric order (sequence numbers)
//! must encode keys with a fixed width.
//!
//! A backend can be validated with the [`test_store_trait!`](crate::test_store_trait) macro:
//!
//! ```ignore
//! test_store_trait! {
//!     my_storage_tests: MyStorageManager: MyCollection
//! }
//! ```
//!

use crate::error::Error;

use tracing::debug;

/// Factory of collections.
pub trait DbManager<C>: Sync + Send + Clone
where
    C: Collection + 'static,
{
    /// Opens the collection `name` restricted to `prefix`. Opening it twice gives access to
    /// the same data.
    fn create_collection(&self, name: &str, prefix: &str) -> Result<C, Error>;

    fn stop(self) -> Result<(), Error> {
        Ok(())
    }
}

/// Ordered key-value storage.
pub trait Collection: Sync + Send + 'static {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Vec<u8>, Error>;

    fn put(&mut self, key: &str, data: &[u8]) -> Result<(), Error>;

    fn del(&mut self, key: &str) -> Result<(), Error>;

    fn last(&self) -> Option<(String, Vec<u8>)> {
        let mut iter = self.iter(true);
        let value = iter.next();
        debug!("Last value: {:?}", value);
        value
    }

    fn purge(&mut self) -> Result<(), Error>;

    fn iter<'a>(
        &'a self,
        reverse: bool,
    ) -> Box<dyn Iterator<Item = (String, Vec<u8>)> + 'a>;

    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Entries with `from <= key <= to`, in key order.
    fn range(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, Error> {
        Ok(self
            .iter(false)
            .skip_while(|(key, _)| key.as_str() < from)
            .take_while(|(key, _)| key.as_str() <= to)
            .collect())
    }
}

#[macro_export]
macro_rules! test_store_trait {
    ($name:ident: $type:ty: $type2:ty) => {
        #[cfg(test)]
        mod $name {
            use super::*;
            use $crate::error::Error;

            #[test]
            fn test_create_collection() {
                let manager = <$type>::default();
                let store: $type2 =
                    manager.create_collection("test", "test").unwrap();
                assert_eq!(Collection::name(&store), "test");
                assert!(manager.stop().is_ok())
            }

            #[test]
            fn test_put_get_del() {
                let manager = <$type>::default();
                let mut store: $type2 =
                    manager.create_collection("test", "test").unwrap();
                Collection::put(&mut store, "key", b"value").unwrap();
                assert_eq!(Collection::get(&store, "key").unwrap(), b"value");
                Collection::del(&mut store, "key").unwrap();
                assert_eq!(
                    Collection::get(&store, "key"),
                    Err(Error::EntryNotFound(
                        "Query returned no rows".to_owned()
                    ))
                );
                assert!(manager.stop().is_ok())
            }

            #[test]
            fn test_reopen_shares_data() {
                let manager = <$type>::default();
                let mut store: $type2 =
                    manager.create_collection("test", "test").unwrap();
                Collection::put(&mut store, "key", b"value").unwrap();
                let other: $type2 =
                    manager.create_collection("test", "test").unwrap();
                assert_eq!(Collection::get(&other, "key").unwrap(), b"value");
                let foreign: $type2 =
                    manager.create_collection("test", "other").unwrap();
                assert!(Collection::get(&foreign, "key").is_err());
            }

            #[test]
            fn test_iter_both_ways() {
                let manager = <$type>::default();
                let mut store: $type2 =
                    manager.create_collection("test", "test").unwrap();
                Collection::put(&mut store, "key2", b"value2").unwrap();
                Collection::put(&mut store, "key1", b"value1").unwrap();
                Collection::put(&mut store, "key3", b"value3").unwrap();
                let keys: Vec<String> =
                    store.iter(false).map(|(key, _)| key).collect();
                assert_eq!(keys, vec!["key1", "key2", "key3"]);
                let keys: Vec<String> =
                    store.iter(true).map(|(key, _)| key).collect();
                assert_eq!(keys, vec!["key3", "key2", "key1"]);
                assert_eq!(
                    store.last(),
                    Some(("key3".to_string(), b"value3".to_vec()))
                );
            }

            #[test]
            fn test_range() {
                let manager = <$type>::default();
                let mut store: $type2 =
                    manager.create_collection("test", "test").unwrap();
                for i in 1..=5 {
                    Collection::put(&mut store, &format!("{:03}", i), &[i])
                        .unwrap();
                }
                let values: Vec<Vec<u8>> = store
                    .range("002", "004")
                    .unwrap()
                    .into_iter()
                    .map(|(_, value)| value)
                    .collect();
                assert_eq!(values, vec![vec![2], vec![3], vec![4]]);
                assert!(store.range("006", "009").unwrap().is_empty());
            }

            #[test]
            fn test_purge_collection() {
                let manager = <$type>::default();
                let mut store: $type2 =
                    manager.create_collection("test", "test").unwrap();
                Collection::put(&mut store, "key1", b"value1").unwrap();
                Collection::put(&mut store, "key2", b"value2").unwrap();
                Collection::purge(&mut store).unwrap();
                assert_eq!(
                    Collection::get(&store, "key1"),
                    Err(Error::EntryNotFound(
                        "Query returned no rows".to_owned()
                    ))
                );
                assert_eq!(store.iter(false).count(), 0);
                assert!(manager.stop().is_ok())
            }
        }
    };
}
