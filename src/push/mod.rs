//! `upsync upload`: turns local files into upload requests and drives them to completion.

mod collect;

pub use collect::{SourceFile, collect};

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::transport::{HttpTransport, TransportError};
use crate::uploader::{Snapshot, UploadRequest, Uploader};
use crate::utils::multierr::MultiError;

pub struct PushArgs {
    pub paths: Vec<PathBuf>,
    /// Base URLs; a file named `name` goes to `{to}/{name}`.
    pub to: Vec<String>,
    /// Split each file across every base URL instead of sending a full copy to each.
    pub split: bool,
    pub config: Config,
}

/// One request that did not make it, labelled with where it was going.
#[derive(Debug, thiserror::Error)]
#[error("{label}: {source}")]
pub struct FailedUpload {
    pub label: String,
    #[source]
    pub source: Arc<TransportError>,
}

/// Requests for one file, each paired with a label for reporting.
///
/// Plain mode sends the whole file to every base URL. Split mode sends part
/// `i` to `{to_i}/{name}.part{i}` as one partitioned request.
pub fn plan_requests(
    name: &str,
    payload: Bytes,
    to: &[String],
    split: bool,
) -> Vec<(String, UploadRequest)> {
    let bases = to.iter().map(|base| base.trim_end_matches('/'));
    if split {
        let destinations = bases
            .enumerate()
            .map(|(i, base)| format!("{}/{}.part{}", base, name, i))
            .collect::<Vec<_>>();
        vec![(
            name.to_string(),
            UploadRequest::split(payload, destinations),
        )]
    } else {
        bases
            .map(|base| {
                let destination = format!("{}/{}", base, name);
                (
                    destination.clone(),
                    UploadRequest::new(payload.clone(), destination),
                )
            })
            .collect()
    }
}

async fn report_progress(snapshots: watch::Receiver<Snapshot>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let (loaded, total, settled, count, is_uploading) = {
            let snapshot = snapshots.borrow();
            let records = snapshot.records.values();
            (
                records.clone().map(|r| r.loaded).sum::<u64>(),
                records.clone().map(|r| r.total).sum::<u64>(),
                records.clone().filter(|r| r.status.is_terminal()).count(),
                snapshot.records.len(),
                snapshot.is_uploading,
            )
        };
        if !is_uploading {
            break;
        }
        info!(
            "{}/{} uploads settled, {}/{} bytes sent",
            settled, count, loaded, total
        );
    }
}

pub async fn push(args: PushArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if args.to.is_empty() {
        return Err("at least one --to destination is required".into());
    }

    let files = collect(&args.paths)?;
    if files.is_empty() {
        info!("nothing to upload");
        return Ok(());
    }

    let mut labels = Vec::new();
    let mut requests = Vec::new();
    for file in &files {
        let payload = Bytes::from(tokio::fs::read(&file.path).await?);
        for (label, request) in plan_requests(&file.name, payload, &args.to, args.split) {
            labels.push(label);
            requests.push(request);
        }
    }

    let transport = HttpTransport::from_config(&args.config)?;
    let uploader = Uploader::new(args.config, transport)?;
    info!(
        requests = requests.len(),
        threads = uploader.threads().get(),
        "starting uploads"
    );

    let batch = uploader.submit_batch(requests)?;
    let reporter = tokio::spawn(report_progress(
        uploader.subscribe(),
        Duration::from_millis(500),
    ));
    let settlements = batch.completion.await;
    reporter.abort();

    let mut failures = Vec::new();
    for (label, settlement) in labels.into_iter().zip(settlements) {
        match settlement.error {
            None => println!("uploaded {}", label),
            Some(source) => {
                println!("failed   {}: {}", label, source);
                failures.push(FailedUpload { label, source });
            }
        }
    }

    MultiError::new(failures).into_result()?;
    Ok(())
}
