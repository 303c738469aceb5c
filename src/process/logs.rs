//! 启动前的文件准备：创建必需的目录和文件，按需清空日志

use crate::catalog::Preparation;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// 创建服务启动所需的目录和空文件（已存在的保持不变）
pub fn prepare(preparation: &Preparation) -> io::Result<()> {
    for dir in &preparation.dirs {
        fs::create_dir_all(dir)?;
    }

    for file in &preparation.files {
        ensure_parent(file)?;
        OpenOptions::new().create(true).append(true).open(file)?;
    }

    Ok(())
}

/// 清空已存在的日志文件，返回被清空的文件数量
pub fn clear_log_files(files: &[PathBuf]) -> io::Result<usize> {
    let mut cleared = 0;

    for file in files.iter().filter(|f| f.is_file()) {
        OpenOptions::new().write(true).truncate(true).open(file)?;
        cleared += 1;
    }

    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_dirs_and_files() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("bin/mongodb/data/db");
        let log = temp.path().join("logs/mongodb.log");

        let preparation = Preparation {
            dirs: vec![data.clone()],
            files: vec![log.clone()],
        };
        prepare(&preparation).unwrap();

        assert!(data.is_dir());
        assert!(log.is_file());

        // 已有内容不被覆盖
        fs::write(&log, "existing").unwrap();
        prepare(&preparation).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "existing");
    }

    #[test]
    fn test_clear_log_files() {
        let temp = TempDir::new().unwrap();
        let error_log = temp.path().join("error.log");
        let access_log = temp.path().join("access.log");
        fs::write(&error_log, "old errors").unwrap();

        let cleared = clear_log_files(&[error_log.clone(), access_log.clone()]).unwrap();

        assert_eq!(cleared, 1);
        assert_eq!(fs::read_to_string(&error_log).unwrap(), "");
        assert!(!access_log.exists());
    }
}
