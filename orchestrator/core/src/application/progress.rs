// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Image pull progress reporting.
//
// Pull streams are consumed here, outside the deployment flow, so callers
// choose how progress is rendered: tracing lines by default, a terminal
// progress bar in the CLI.

use crate::domain::runtime::{ImageRef, PullProgress, PullStream, RuntimeError};
use futures::StreamExt;
use tracing::{debug, info};

pub trait InstallProgress: Send + Sync {
    fn already_present(&self, image: &ImageRef);
    fn pull_started(&self, image: &ImageRef);
    fn pull_progress(&self, image: &ImageRef, record: &PullProgress);
    fn pull_finished(&self, image: &ImageRef);
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl InstallProgress for LogProgress {
    fn already_present(&self, image: &ImageRef) {
        info!("{} already exists", image);
    }

    fn pull_started(&self, image: &ImageRef) {
        info!("Pulling {}", image);
    }

    fn pull_progress(&self, image: &ImageRef, record: &PullProgress) {
        debug!(
            image = %image,
            layer = record.id.as_deref().unwrap_or("-"),
            "{} {}",
            record.status,
            record.progress.as_deref().unwrap_or("")
        );
    }

    fn pull_finished(&self, image: &ImageRef) {
        info!("Pulled {}", image);
    }
}

/// Consumes a pull stream to its end, forwarding every record. Returns the
/// first error the stream yields.
pub async fn drain_pull(
    image: &ImageRef,
    mut stream: PullStream,
    progress: &dyn InstallProgress,
) -> Result<(), RuntimeError> {
    progress.pull_started(image);
    while let Some(record) = stream.next().await {
        let record = record?;
        progress.pull_progress(image, &record);
    }
    progress.pull_finished(image);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    impl InstallProgress for Recorder {
        fn already_present(&self, image: &ImageRef) {
            self.lines.lock().push(format!("present {}", image));
        }
        fn pull_started(&self, image: &ImageRef) {
            self.lines.lock().push(format!("start {}", image));
        }
        fn pull_progress(&self, _image: &ImageRef, record: &PullProgress) {
            self.lines.lock().push(record.status.clone());
        }
        fn pull_finished(&self, image: &ImageRef) {
            self.lines.lock().push(format!("done {}", image));
        }
    }

    fn record(status: &str) -> PullProgress {
        PullProgress {
            id: None,
            status: status.to_string(),
            progress: None,
        }
    }

    #[tokio::test]
    async fn test_drain_forwards_every_record() {
        let image = ImageRef::parse("redis:7");
        let stream = futures::stream::iter(vec![Ok(record("Downloading")), Ok(record("Extracting"))]).boxed();
        let recorder = Recorder::default();

        drain_pull(&image, stream, &recorder).await.unwrap();

        assert_eq!(
            *recorder.lines.lock(),
            vec!["start redis:7", "Downloading", "Extracting", "done redis:7"]
        );
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_error() {
        let image = ImageRef::parse("missing:1");
        let stream = futures::stream::iter(vec![
            Ok(record("Pulling")),
            Err(RuntimeError::ImageNotFound("missing:1".into())),
            Ok(record("never")),
        ])
        .boxed();
        let recorder = Recorder::default();

        let err = drain_pull(&image, stream, &recorder).await.unwrap_err();

        assert!(matches!(err, RuntimeError::ImageNotFound(_)));
        assert_eq!(*recorder.lines.lock(), vec!["start missing:1", "Pulling"]);
    }
}
