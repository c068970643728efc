use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{create_dir_all, read_dir, remove_file, rename, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use uuid::Uuid;

pub async fn prepare_io(root: &Path, dirs: &[&str]) -> std::io::Result<()> {
    for dir in dirs {
        create_dir_all(root.join(dir)).await?;
    }
    Ok(())
}

/// Replaces the file at `path` with `bytes`. The data is written to a sibling
/// temporary file first and renamed over the target, so readers only ever see
/// the old or the new content.
pub async fn write_io_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let mut writer = BufWriter::new(File::create(&tmp).await?);
    writer.write_all(bytes).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    if let Err(err) = rename(&tmp, path).await {
        let _ = remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}

/// Reads the whole file, or `None` when it does not exist.
pub async fn read_io_file(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut bytes = Vec::new();
    BufReader::new(file).read_to_end(&mut bytes).await?;
    Ok(Some(bytes))
}

/// Removes the file, returning whether it existed.
pub async fn remove_io_file(path: &Path) -> std::io::Result<bool> {
    match remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Lists the files of `dir` carrying `extension`, sorted by path.
pub async fn list_io_files(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = match read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students").join("a.dat");

        write_io_file(&path, b"first").await.unwrap();
        write_io_file(&path, b"second").await.unwrap();

        assert_eq!(read_io_file(&path).await.unwrap().unwrap(), b"second");
        let files = list_io_files(&dir.path().join("students"), "dat").await.unwrap();
        assert_eq!(files, vec![path.clone()]);
    }

    #[tokio::test]
    async fn missing_files_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.dat");

        assert!(read_io_file(&path).await.unwrap().is_none());
        assert!(!remove_io_file(&path).await.unwrap());
        assert!(list_io_files(&dir.path().join("absent"), "dat")
            .await
            .unwrap()
            .is_empty());
    }
}
