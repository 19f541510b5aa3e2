// Live streaming - cancellable polling loop merging incremental query
// results into bounded circular buffers
//
// Each subscription owns its buffers inside the spawned task; nothing is
// shared between subscriptions and cancelling drops all of it. Ticks are
// serialized: the next sleep only starts after the previous tick's query
// work has completed.
use crate::application::archive_repository::ArchiveRepository;
use crate::application::query_service::set_alias;
use crate::application::response::parse_response;
use crate::application::transform::apply_function_defs;
use crate::domain::error::GatewayResult;
use crate::domain::frame::{CircularFrame, Frame};
use crate::domain::target::TargetQuery;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lead times guarding against the archiver lagging behind "now": each
/// tick re-reads from 2 s before the previous window's end, up to 500 ms
/// before the current time.
const REFETCH_LEAD_MS: i64 = 2000;
const NOW_MARGIN_MS: i64 = 500;

const CHANNEL_CAPACITY: usize = 16;

/// A live subscription. Dropping the handle cancels the polling task.
pub struct StreamHandle {
    pub id: String,
    pub receiver: mpsc::Receiver<Vec<Frame>>,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct StreamQueryService {
    repository: Arc<dyn ArchiveRepository>,
}

impl StreamQueryService {
    pub fn new(repository: Arc<dyn ArchiveRepository>) -> Self {
        Self { repository }
    }

    /// Start a polling subscription over the given targets. The first
    /// emission covers the targets' full range (unless liveOnly is set);
    /// subsequent emissions are merged snapshots of the ring buffers.
    pub fn subscribe(&self, targets: Vec<TargetQuery>, suggested_interval_ms: i64) -> StreamHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4().to_string();

        let worker = StreamWorker {
            repository: self.repository.clone(),
            id: id.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run(targets, suggested_interval_ms, tx));

        StreamHandle {
            id,
            receiver: rx,
            cancel,
        }
    }
}

struct StreamWorker {
    repository: Arc<dyn ArchiveRepository>,
    id: String,
    cancel: CancellationToken,
}

impl StreamWorker {
    async fn run(
        self,
        mut targets: Vec<TargetQuery>,
        suggested_interval_ms: i64,
        tx: mpsc::Sender<Vec<Frame>>,
    ) {
        // The stream maintains its own window; auto-extrapolation would
        // fabricate rows the merge step then has to reject.
        for target in &mut targets {
            target
                .options
                .insert("disableExtrapol".to_string(), "true".to_string());
        }

        let stream_target = targets.iter().find(|t| t.stream).cloned();
        let interval_ms = stream_target
            .as_ref()
            .and_then(|t| parse_stream_interval(&t.strm_int))
            .unwrap_or(suggested_interval_ms.max(1) as u64);
        let live_only = stream_target
            .as_ref()
            .is_some_and(|t| t.option_enabled("liveOnly"));

        let mut buffers: HashMap<String, CircularFrame> = HashMap::new();

        if !live_only {
            match self.query_and_merge(&targets, &mut buffers).await {
                Ok(frames) => {
                    if tx.send(frames).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!("stream {}: initial query failed: {}", self.id, e);
                    return;
                }
            }
        }

        // Re-bin to the polling cadence: second-resolution bins when the
        // cadence allows it and the target was binned at all.
        let interval_sec = (interval_ms / 1000).to_string();
        for target in &mut targets {
            target.interval = if interval_ms >= 1000 && !target.interval.is_empty() {
                interval_sec.clone()
            } else {
                String::new()
            };
        }

        tracing::debug!("stream {}: polling every {} ms", self.id, interval_ms);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            }

            update_target_dates(&mut targets);
            match self.query_and_merge(&targets, &mut buffers).await {
                Ok(frames) => {
                    if tx.send(frames).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("stream {}: tick failed: {}", self.id, e);
                    break;
                }
            }
        }
    }

    /// One poll: the regular pipeline with a merge step between response
    /// parsing and alias/function application, exactly once per target.
    async fn query_and_merge(
        &self,
        targets: &[TargetQuery],
        buffers: &mut HashMap<String, CircularFrame>,
    ) -> GatewayResult<Vec<Frame>> {
        let urls_array = futures::future::join_all(
            targets.iter().map(|t| self.repository.build_urls(t)),
        )
        .await
        .into_iter()
        .collect::<GatewayResult<Vec<_>>>()?;

        let responses = self.repository.fetch_deduped(urls_array).await;

        let mut all_frames = Vec::new();
        for (target, url_responses) in targets.iter().zip(responses) {
            let batches = url_responses
                .into_iter()
                .collect::<GatewayResult<Vec<_>>>()?;
            let frames = parse_response(batches, target)?;
            let frames = merge_to_buffers(frames, buffers, target);
            let frames = set_alias(frames, target)?;
            let frames = apply_function_defs(&target.functions, frames)?;
            all_frames.extend(frames);
        }

        Ok(all_frames)
    }
}

/// Merge freshly parsed frames into the per-name ring buffers and return
/// buffer snapshots. Rows at or before the buffer's last time, or past
/// the tick's window end, are rejected. Frames without a name or without
/// a leading time column pass through unmerged.
pub fn merge_to_buffers(
    frames: Vec<Frame>,
    buffers: &mut HashMap<String, CircularFrame>,
    target: &TargetQuery,
) -> Vec<Frame> {
    let to = target.to.timestamp_millis();
    let capacity = target.strm_cap.parse::<usize>().ok().filter(|&c| c > 0);

    frames
        .into_iter()
        .map(|frame| {
            let Some(name) = frame.name.clone() else {
                return frame;
            };

            match buffers.entry(name) {
                Entry::Vacant(entry) => match CircularFrame::from_frame(&frame, capacity) {
                    Some(ring) => {
                        let snapshot = ring.to_frame();
                        entry.insert(ring);
                        snapshot
                    }
                    None => frame,
                },
                Entry::Occupied(mut entry) => {
                    let ring = entry.get_mut();
                    let last_time = ring.last_time().unwrap_or(i64::MIN);
                    let mut accepted = 0;
                    for row in frame.rows() {
                        if row.time <= last_time || row.time > to {
                            continue;
                        }
                        ring.push_row(row);
                        accepted += 1;
                    }
                    tracing::debug!(
                        "merged {} rows into buffer for {}",
                        accepted,
                        entry.key()
                    );
                    entry.get().to_frame()
                }
            }
        })
        .collect()
}

/// Advance the poll window: re-read from shortly before the previous end
/// up to shortly before now.
pub fn update_target_dates(targets: &mut [TargetQuery]) {
    let now = Utc::now();
    for target in targets {
        target.from = target.to - ChronoDuration::milliseconds(REFETCH_LEAD_MS);
        target.to = now - ChronoDuration::milliseconds(NOW_MARGIN_MS);
    }
}

/// Parse a stream interval override: a bare integer is milliseconds, a
/// `ms`/`s`/`m`/`h` suffix scales accordingly. Unparseable input falls
/// back to the caller's suggested interval.
pub fn parse_stream_interval(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ms) = value.parse::<u64>() {
        return Some(ms);
    }

    let (number, multiplier) = if let Some(stripped) = value.strip_suffix("ms") {
        (stripped, 1.0)
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped, 1000.0)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped, 60_000.0)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped, 3_600_000.0)
    } else {
        return None;
    };

    number
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| *n > 0.0)
        .map(|n| (n * multiplier) as u64)
}
