use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::RwLock;
use tokio_util::io::{InspectReader, StreamReader};
use uuid::Uuid;

/// What the receiver hands back for each stored body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub name: String,
    pub size: u64,
    pub md5: String,
    pub received_at: u64, // Unix timestamp
}

/// Flat directory of received uploads plus the receipts issued for them.
#[derive(Debug)]
pub struct ReceiveStore {
    root: PathBuf,
    receipts: RwLock<HashMap<String, Receipt>>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

async fn write_then_rename<S>(body: S, partial: &Path, path: &Path) -> io::Result<(u64, md5::Digest)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = fs::File::create(partial).await?;
    let mut digest = md5::Context::new();
    let size = {
        let reader = InspectReader::new(StreamReader::new(body), |bytes: &[u8]| {
            digest.consume(bytes)
        });
        tokio::pin!(reader);
        tokio::io::copy(&mut reader, &mut file).await?
    };
    file.sync_all().await?;
    drop(file);
    fs::rename(partial, path).await?;
    Ok((size, digest.compute()))
}

impl ReceiveStore {
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            receipts: RwLock::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` inside the root. Anything that could escape it is `InvalidInput`.
    pub fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0']);
        if invalid {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid upload name {:?}", name),
            ));
        }
        Ok(self.root.join(name))
    }

    /// Streams `body` to `<root>/<name>`, replacing any earlier upload of the same name.
    ///
    /// Every upload writes its own `<name>.<uuid>.partial` and renames it into
    /// place once fully written, so concurrent uploads of one name never share
    /// a file; the last rename wins. The partial file is removed on any failure.
    pub async fn store<S>(&self, name: &str, body: S) -> io::Result<Receipt>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let path = self.path_for(name)?;
        let partial = self
            .root
            .join(format!("{}.{}.partial", name, Uuid::new_v4().simple()));

        let (size, digest) = match write_then_rename(body, &partial, &path).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&partial).await;
                return Err(err);
            }
        };

        let receipt = Receipt {
            name: name.to_string(),
            size,
            md5: format!("{:x}", digest),
            received_at: unix_now(),
        };
        self.receipts
            .write()
            .await
            .insert(receipt.name.clone(), receipt.clone());
        Ok(receipt)
    }

    pub async fn receipt(&self, name: &str) -> Option<Receipt> {
        self.receipts.read().await.get(name).cloned()
    }

    /// All receipts, sorted by name.
    pub async fn receipts(&self) -> Vec<Receipt> {
        let mut receipts = self
            .receipts
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        receipts.sort_by(|a, b| a.name.cmp(&b.name));
        receipts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> {
        stream::iter(
            chunks
                .iter()
                .map(|chunk| Ok::<_, io::Error>(Bytes::from_static(*chunk)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_store_writes_file_and_receipt() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReceiveStore::open(dir.path()).await?;

        let receipt = store
            .store("hello.txt", body(&[b"Hello, ", b"world"]))
            .await?;

        assert_eq!(receipt.size, 12);
        assert_eq!(receipt.md5, format!("{:x}", md5::compute(b"Hello, world")));
        assert_eq!(std::fs::read(dir.path().join("hello.txt"))?, b"Hello, world");
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        assert_eq!(store.receipt("hello.txt").await, Some(receipt));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReceiveStore::open(dir.path()).await?;

        for name in ["", ".", "..", "a/b", "..\\evil"] {
            let err = store.store(name, body(&[b"x"])).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name:?}");
        }
        assert!(store.receipts().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_body_leaves_nothing_behind() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReceiveStore::open(dir.path()).await?;

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ]);
        assert!(store.store("broken.bin", broken).await.is_err());

        assert!(!dir.path().join("broken.bin").exists());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        assert!(store.receipt("broken.bin").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_uploads_of_one_name() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReceiveStore::open(dir.path()).await?;
        let first = vec![b'a'; 64 * 1024];
        let second = vec![b'b'; 64 * 1024];

        let frames = |content: &[u8]| {
            stream::iter(
                content
                    .chunks(1024)
                    .map(|frame| Ok::<_, io::Error>(Bytes::copy_from_slice(frame)))
                    .collect::<Vec<_>>(),
            )
        };
        let (a, b) = tokio::join!(
            store.store("x", frames(&first)),
            store.store("x", frames(&second))
        );

        let (a, b) = (a?, b?);
        assert_eq!((a.size, b.size), (first.len() as u64, second.len() as u64));
        let stored = std::fs::read(dir.path().join("x"))?;
        assert!(stored == first || stored == second);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_rename_removes_partial() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReceiveStore::open(dir.path()).await?;
        // a non-empty directory at the target makes the rename fail
        std::fs::create_dir_all(dir.path().join("taken/inner"))?;

        assert!(store.store("taken", body(&[b"x"])).await.is_err());

        let names = std::fs::read_dir(dir.path())?
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<io::Result<Vec<_>>>()?;
        assert_eq!(names, vec![std::ffi::OsString::from("taken")]);
        assert!(store.receipt("taken").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_receipts_sorted() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReceiveStore::open(dir.path()).await?;

        store.store("b", body(&[b"2"])).await?;
        store.store("a", body(&[b"1"])).await?;

        let names = store
            .receipts()
            .await
            .into_iter()
            .map(|receipt| receipt.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
        Ok(())
    }
}
