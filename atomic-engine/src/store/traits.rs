//! Store Trait 定义
//!
//! 操作存储是外部协作方：按 id 读写删除，载荷为不透明的序列化形式

use crate::schema::{AtomicOperation, OperationStatus};
use thiserror::Error;

/// 存储错误类型
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// 操作存储接口
pub trait OperationStore: Send + Sync {
    /// 读取原始载荷
    fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// 写入原始载荷（覆盖）
    fn put_raw(&self, id: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// 删除，返回是否存在
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// 所有 id
    fn ids(&self) -> Result<Vec<String>, StoreError>;

    // ==================== 类型化辅助方法 ====================

    fn get(&self, id: &str) -> Result<Option<AtomicOperation>, StoreError> {
        match self.get_raw(id)? {
            Some(bytes) => decode_operation(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, operation: &AtomicOperation) -> Result<(), StoreError> {
        let bytes = encode_operation(operation)?;
        self.put_raw(&operation.id, &bytes)
    }

    /// 按状态过滤，结果按创建时间排序
    fn list(&self, status: Option<OperationStatus>) -> Result<Vec<AtomicOperation>, StoreError> {
        let mut operations = Vec::new();
        for id in self.ids()? {
            if let Some(op) = self.get(&id)? {
                if status.map(|s| s == op.status).unwrap_or(true) {
                    operations.push(op);
                }
            }
        }
        operations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(operations)
    }
}

/// JSON 序列化（金额以字符串形式保存）
pub fn encode_operation(operation: &AtomicOperation) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(operation).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub fn decode_operation(bytes: &[u8]) -> Result<AtomicOperation, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
