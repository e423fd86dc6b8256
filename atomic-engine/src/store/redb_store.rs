//! Redb 操作存储实现
//!
//! 使用嵌入式 redb 数据库进行本地持久化存储

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use crate::store::{OperationStore, StoreError};

/// 操作表: operation id -> JSON payload
const OPERATIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("operations");

/// 基于 Redb 的操作存储
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// 创建或打开 Redb 数据库
    pub fn new(path: &str) -> Result<Self, StoreError> {
        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)
            .map_err(|e| StoreError::Backend(format!("Failed to create database: {}", e)))?;

        // 初始化表
        let write_txn = db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let _ = write_txn
                .open_table(OPERATIONS_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl OperationStore for RedbStore {
    fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = read_txn
            .open_table(OPERATIONS_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let value = table
            .get(id)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(value.map(|data| data.value().to_vec()))
    }

    fn put_raw(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(OPERATIONS_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            table
                .insert(id, payload)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let existed = {
            let mut table = write_txn
                .open_table(OPERATIONS_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let removed = table
                .remove(id)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            removed.is_some()
        };
        write_txn
            .commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(existed)
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = read_txn
            .open_table(OPERATIONS_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut ids = Vec::new();
        let iter = table
            .iter()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for item in iter {
            let (key, _value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}
