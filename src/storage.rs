use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
};

use parking_lot::RwLock;
use thiserror::Error;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Not a directory: {0}")]
    NotDirectory(String),
    /// 必要的目錄或檔案不存在、或權限不正確，會在任何網路請求之前回報。
    #[error("Environment error: {0}")]
    Environment(String),
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 以 `/` 連接目錄與名稱，避免產生重複斜線。
pub fn join_key(dir: &str, name: &str) -> String {
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// 定義儲存系統所需實現的 API，支援檔案與目錄的建立、讀取、寫入及刪除等操作。
///
/// key 一律為以 `/` 分隔的路徑；相對路徑視為從根目錄開始。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 建立指定 key 所對應的目錄樹，若不存在則自動建立。
    fn create_dir_all(&self, key: &str) -> Result<()>;

    /// 讀取指定 key 所對應檔案的內容。
    fn read_file(&self, key: &str) -> Result<Vec<u8>>;

    /// 將資料寫入指定 key 所對應的檔案中，父目錄會自動建立。
    fn write_file(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 刪除指定 key 所對應的檔案或目錄，不存在時視為成功。
    fn remove(&self, key: &str) -> Result<()>;

    /// 檢查指定 key 是否存在於儲存系統中。
    fn exists(&self, key: &str) -> Result<bool>;

    /// 判斷指定 key 是否為目錄。
    fn is_dir(&self, key: &str) -> Result<bool>;

    /// 列出目錄下的檔案名稱（不含子目錄），依名稱排序。
    fn list_files(&self, dir: &str) -> Result<Vec<String>>;

    /// 將檔案由 `from` 移動至 `to`，目標已存在時覆寫。
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// 以 UTF-8 讀取檔案內容。
    fn read_to_string(&self, key: &str) -> Result<String> {
        let data = self.read_file(key)?;
        String::from_utf8(data)
            .map_err(|e| StorageError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// 確認目錄存在，否則回傳 `StorageError::Environment`。
    fn require_dir(&self, key: &str) -> Result<()> {
        if self.is_dir(key)? {
            Ok(())
        } else {
            Err(StorageError::Environment(format!(
                "Directory {} does not exist",
                key
            )))
        }
    }

    /// 確認檔案存在，否則回傳 `StorageError::Environment`。
    fn require_file(&self, key: &str) -> Result<()> {
        if self.exists(key)? && !self.is_dir(key)? {
            Ok(())
        } else {
            Err(StorageError::Environment(format!("File {} does not exist", key)))
        }
    }

    /// 刪除目錄下所有檔案，目錄本身保留。
    fn clear_dir(&self, dir: &str) -> Result<()> {
        if !self.is_dir(dir)? {
            return Ok(());
        }
        for name in self.list_files(dir)? {
            self.remove(&join_key(dir, &name))?;
        }
        Ok(())
    }
}

/// 私有工具，提供 key 正規化與驗證等輔助函式。
struct KeyUtils;

impl KeyUtils {
    /// 正規化 key 字串為絕對路徑，並檢查不合法字元與格式。
    fn normalize(key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("Empty key".to_string()));
        }
        if key.contains('\0') || key.contains('\n') || key.contains('\r') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid characters in key: {}",
                key
            )));
        }
        if key.contains("//") {
            return Err(StorageError::InvalidKey(format!(
                "Double slashes not allowed in key: {}",
                key
            )));
        }

        let mut normalized = PathBuf::from("/");
        for component in Path::new(key).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if normalized.as_os_str() == "/" {
                        return Err(StorageError::InvalidKey(format!(
                            "Cannot use '..' to escape root directory: {}",
                            key
                        )));
                    }
                    normalized.pop();
                }
                Component::Normal(name) => match name.to_str() {
                    Some(name) if !name.contains('\\') => normalized.push(name),
                    _ => {
                        return Err(StorageError::InvalidKey(format!(
                            "Invalid path component in: {}",
                            key
                        )))
                    }
                },
                Component::Prefix(_) => {
                    return Err(StorageError::InvalidKey(format!("Invalid path: {}", key)))
                }
            }
        }
        Ok(normalized)
    }

    /// 驗證檔案 key，確保格式正確且不以斜線結尾。
    fn verify_file_key(key: &str) -> Result<PathBuf> {
        if key.ends_with('/') {
            return Err(StorageError::InvalidKey(format!(
                "File key cannot end with '/': {}",
                key
            )));
        }
        let path = Self::normalize(key)?;
        if path.as_os_str() == "/" {
            return Err(StorageError::InvalidKey(format!(
                "File key cannot be the root: {}",
                key
            )));
        }
        Ok(path)
    }
}

/// 以本機檔案系統目錄為後端的儲存實作，所有 key 都相對於 `root`。
///
/// 在 Unix 上寫入的檔案權限為 `0o600`，因為其中包含私鑰。
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new("/")
    }
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, normalized: &Path) -> PathBuf {
        match normalized.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(normalized),
        }
    }

    fn file_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.resolve(&KeyUtils::verify_file_key(key)?))
    }

    fn any_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.resolve(&KeyUtils::normalize(key)?))
    }

    fn ensure_parent_directory(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if parent.exists() && !parent.is_dir() {
                return Err(StorageError::NotDirectory(
                    parent.to_string_lossy().into_owned(),
                ));
            }
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open_for_write(path: &Path) -> io::Result<fs::File> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(path)
    }
}

impl Storage for FileStorage {
    fn create_dir_all(&self, key: &str) -> Result<()> {
        let path = self.any_path(key)?;
        if path.exists() && !path.is_dir() {
            return Err(StorageError::NotDirectory(key.to_string()));
        }
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.file_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.file_path(key)?;
        Self::ensure_parent_directory(&path)?;
        let mut file = Self::open_for_write(&path)?;
        file.write_all(value)?;
        file.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.any_path(key)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StorageError::Io(e)),
            _ => Ok(()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.any_path(key)?.exists())
    }

    fn is_dir(&self, key: &str) -> Result<bool> {
        Ok(self.any_path(key)?.is_dir())
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.any_path(dir)?;
        if !path.is_dir() {
            return Err(StorageError::NotDirectory(dir.to_string()));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.file_path(from)?;
        let target = self.file_path(to)?;
        if !source.exists() {
            return Err(StorageError::NotFound(from.to_string()));
        }
        Self::ensure_parent_directory(&target)?;
        fs::rename(source, target)?;
        Ok(())
    }
}

/// 基於記憶體的儲存實作，資料與目錄結構皆保存在記憶體中。
#[derive(Debug)]
pub struct MemStorage {
    data: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: RwLock<BTreeSet<PathBuf>>,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorage {
    /// 建立一個新的記憶體儲存實例，並初始化根目錄 `/`。
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(PathBuf::from("/"));
        Self {
            data: RwLock::new(BTreeMap::new()),
            dirs: RwLock::new(dirs),
        }
    }

    fn create_dirs(&self, path: &Path) -> Result<()> {
        let data = self.data.read();
        let mut dirs = self.dirs.write();
        let mut current = PathBuf::from("/");
        // 逐層建立目錄，若同時存在檔案則回傳錯誤
        for component in path.components().skip(1) {
            current.push(component);
            if data.contains_key(&current) {
                return Err(StorageError::NotDirectory(
                    current.to_string_lossy().into_owned(),
                ));
            }
            dirs.insert(current.clone());
        }
        Ok(())
    }

    fn insert(&self, path: PathBuf, value: Vec<u8>) -> Result<()> {
        if self.dirs.read().contains(&path) {
            return Err(StorageError::InvalidKey(format!(
                "Key is a directory: {}",
                path.to_string_lossy()
            )));
        }
        if let Some(parent) = path.parent() {
            self.create_dirs(parent)?;
        }
        self.data.write().insert(path, value);
        Ok(())
    }
}

impl Storage for MemStorage {
    fn create_dir_all(&self, key: &str) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        self.create_dirs(&path)
    }

    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = KeyUtils::verify_file_key(key)?;
        self.data
            .read()
            .get(&path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = KeyUtils::verify_file_key(key)?;
        self.insert(path, value.to_vec())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        self.data.write().retain(|k, _| !k.starts_with(&path));
        self.dirs
            .write()
            .retain(|k| k.as_os_str() == "/" || !k.starts_with(&path));
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = KeyUtils::normalize(key)?;
        Ok(self.data.read().contains_key(&path) || self.dirs.read().contains(&path))
    }

    fn is_dir(&self, key: &str) -> Result<bool> {
        let path = KeyUtils::normalize(key)?;
        Ok(self.dirs.read().contains(&path))
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let path = KeyUtils::normalize(dir)?;
        if !self.dirs.read().contains(&path) {
            return Err(StorageError::NotDirectory(dir.to_string()));
        }

        Ok(self
            .data
            .read()
            .keys()
            .filter(|k| k.parent() == Some(path.as_path()))
            .filter_map(|k| k.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = KeyUtils::verify_file_key(from)?;
        let target = KeyUtils::verify_file_key(to)?;
        let value = self
            .data
            .write()
            .remove(&source)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        self.insert(target, value)
    }
}
