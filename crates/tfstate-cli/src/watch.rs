//! Follow a provisioning engine's state file and checkpoint every rewrite

use std::path::{Path, PathBuf};

use eyre::WrapErr;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tfstate_core::{Checkpointer, ProvisioningOutputs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whether `event` may have changed `file`
pub fn is_relevant(event: &Event, file: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == file.file_name())
}

/// Take every event already queued, counting those relevant to `file`
///
/// One read after the drain covers the whole burst.
fn drain_relevant(rx: &mut mpsc::UnboundedReceiver<Event>, file: &Path) -> usize {
    let mut relevant = 0;
    while let Ok(event) = rx.try_recv() {
        if is_relevant(&event, file) {
            relevant += 1;
        }
    }
    relevant
}

/// Directory to watch for `file`
///
/// Engines replace their state file by rename, so the parent directory is
/// watched rather than the file itself.
fn watch_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Read the current snapshot, `None` while the file does not exist
async fn read_snapshot(file: &Path) -> eyre::Result<Option<ProvisioningOutputs>> {
    match tokio::fs::read(file).await {
        Ok(state) => Ok(Some(ProvisioningOutputs::new(state))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).wrap_err_with(|| format!("reading {}", file.display())),
    }
}

async fn checkpoint(
    checkpointer: &Checkpointer,
    outputs: Option<ProvisioningOutputs>,
    cloud_discovery: &[u8],
) {
    let outputs = outputs.map(|o| o.with_cloud_discovery(cloud_discovery.to_vec()));
    checkpointer.checkpoint(outputs.as_ref()).await;
}

/// Checkpoint `file` now and after every change until cancelled
///
/// Truncated (zero-sized) reads are handed over as well; sinks ignore them.
///
/// # Errors
/// Returns error if the watcher cannot be set up or the file becomes
/// unreadable
pub async fn watch_state_file(
    file: &Path,
    cloud_discovery: &[u8],
    checkpointer: &Checkpointer,
    cancel: &CancellationToken,
) -> eyre::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let _ = tx.send(event);
        }
        Err(e) => warn!(error = %e, "watch error"),
    })?;
    let dir = watch_dir(file);
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .wrap_err_with(|| format!("watching {}", dir.display()))?;
    info!(file = %file.display(), "watching state file");

    checkpoint(checkpointer, read_snapshot(file).await?, cloud_discovery).await;

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        if !is_relevant(&event, file) {
            continue;
        }
        let coalesced = drain_relevant(&mut rx, file);
        debug!(kind = ?event.kind, coalesced, "state file changed");
        checkpoint(checkpointer, read_snapshot(file).await?, cloud_discovery).await;
    }

    let stats = checkpointer.stats().await;
    info!(
        stats = %serde_json::to_string(&stats).unwrap_or_default(),
        "stopped watching state file"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tfstate_core::{StateSink, SyncError};
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ProvisioningOutputs>>,
    }

    #[async_trait]
    impl StateSink for Recorder {
        async fn save_state(&self, outputs: Option<&ProvisioningOutputs>) -> Result<(), SyncError> {
            if let Some(outputs) = outputs {
                self.seen.lock().await.push(outputs.clone());
            }
            Ok(())
        }
    }

    #[test]
    fn test_relevance() {
        let file = Path::new("/work/terraform.tfstate");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/work/terraform.tfstate"));
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/work/terraform.tfstate"));
        let other = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/work/terraform.tfstate.backup"));
        let remove = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/work/terraform.tfstate"));

        assert!(is_relevant(&modify, file));
        assert!(is_relevant(&create, file));
        assert!(!is_relevant(&other, file));
        assert!(!is_relevant(&remove, file));
    }

    #[test]
    fn test_burst_is_drained() {
        let file = Path::new("/work/terraform.tfstate");
        let (tx, mut rx) = mpsc::unbounded_channel();
        for path in [
            "/work/terraform.tfstate",
            "/work/terraform.tfstate.backup",
            "/work/terraform.tfstate",
        ] {
            tx.send(Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from(path)))
                .unwrap();
        }

        assert_eq!(drain_relevant(&mut rx, file), 2);
        assert!(rx.try_recv().is_err());
        assert_eq!(drain_relevant(&mut rx, file), 0);
    }

    #[test]
    fn test_watch_dir() {
        assert_eq!(watch_dir(Path::new("terraform.tfstate")), PathBuf::from("."));
        assert_eq!(
            watch_dir(Path::new("/work/terraform.tfstate")),
            PathBuf::from("/work")
        );
    }

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = read_snapshot(&dir.path().join("absent.tfstate")).await.unwrap();
        assert!(snapshot.is_none());
    }

    #[tokio::test]
    async fn test_existing_state_is_checkpointed_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("terraform.tfstate");
        std::fs::write(&file, b"{\"serial\":7}").unwrap();

        let recorder = Arc::new(Recorder::default());
        let checkpointer = Checkpointer::new(recorder.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        watch_state_file(&file, b"{\"zone\":\"a\"}", &checkpointer, &cancel)
            .await
            .unwrap();

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].state, b"{\"serial\":7}");
        assert_eq!(seen[0].cloud_discovery, b"{\"zone\":\"a\"}");
        assert_eq!(checkpointer.stats().await.saved, 1);
    }

    #[tokio::test]
    async fn test_truncated_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("terraform.tfstate");
        std::fs::write(&file, b"").unwrap();

        let recorder = Arc::new(Recorder::default());
        let checkpointer = Checkpointer::new(recorder.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        watch_state_file(&file, b"", &checkpointer, &cancel).await.unwrap();

        assert!(recorder.seen.lock().await.is_empty());
        assert_eq!(checkpointer.stats().await.skipped, 1);
    }
}
