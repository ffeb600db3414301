//! 原子 JSON 文档存储。
//!
//! 规则、插座命名与运行设置各自存成数据目录下的一个 JSON 文档，
//! 保存采用写临时文件再 rename，崩溃不会留下半截文件。文档缺失
//! 视为默认值，设备删除时直接 unlink 文档完成垃圾回收。

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::StorageError;

/// 单个 JSON 文档的原子存取。
#[derive(Debug, Clone)]
pub struct JsonDocStore {
    path: PathBuf,
}

impl JsonDocStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 读取文档；文件缺失返回默认值。
    pub fn load<T: DeserializeOwned + Default>(&self) -> Result<T, StorageError> {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 原子保存文档（写临时文件 + rename）。
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    /// 删除文档（设备移除时的垃圾回收）。文件缺失不算错误。
    pub fn delete(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "document removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_document_loads_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDocStore::new(dir.path().join("outlet_names_pdu44001.json"));
        let names: BTreeMap<String, String> = store.load().expect("load");
        assert!(names.is_empty());
    }

    #[test]
    fn save_load_roundtrip_is_atomic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDocStore::new(dir.path().join("outlet_names_pdu44001.json"));
        let mut names = BTreeMap::new();
        names.insert("3".to_string(), "Router".to_string());
        store.save(&names).expect("save");

        assert!(store.exists());
        assert!(!store.path().with_extension("tmp").exists());
        let loaded: BTreeMap<String, String> = store.load().expect("load");
        assert_eq!(loaded, names);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDocStore::new(dir.path().join("rules_pdu44001.json"));
        store.save(&vec![1, 2, 3]).expect("save");
        store.delete().expect("delete");
        assert!(!store.exists());
        store.delete().expect("second delete is a no-op");
    }
}
