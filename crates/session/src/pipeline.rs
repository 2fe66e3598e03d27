//! Sampler and analysis workers
//!
//! The sampler snapshots every camera slot at the analysis rate and hands
//! the batch to a drop-oldest queue; the analysis thread drains the queue
//! through the orchestrator. Closing the queue stops both.

use crate::orchestrator::SessionOrchestrator;
use crate::SessionError;
use camera_capture::{FrameBatch, FrameSource};
use metrics::{counter, gauge, histogram};
use ring_buffer::RingBuffer;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Start the batch sampler on the current tokio runtime
pub fn spawn_sampler(
    sources: Vec<Arc<dyn FrameSource>>,
    queue: Arc<RingBuffer<FrameBatch>>,
    period: Duration,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence = 0u64;

        loop {
            ticker.tick().await;
            let frames = sources.iter().map(|source| source.poll()).collect();
            let batch = FrameBatch::new(sequence, frames);

            match queue.push(batch) {
                Ok(Some(dropped)) => {
                    counter!("kiosk_batches_dropped_total").increment(1);
                    debug!(batch = dropped.sequence, "Analysis behind, batch dropped");
                }
                Ok(None) => {}
                Err(_) => break,
            }
            sequence += 1;
            gauge!("kiosk_queue_depth").set(queue.len() as f64);
        }

        info!("Sampler stopped after {} batches", sequence);
        sequence
    })
}

/// Start the analysis thread; it yields the number of processed batches
pub fn spawn_analysis(
    orchestrator: SessionOrchestrator,
    queue: Arc<RingBuffer<FrameBatch>>,
) -> std::io::Result<thread::JoinHandle<Result<u64, SessionError>>> {
    thread::Builder::new()
        .name("analysis".to_string())
        .spawn(move || run_analysis(orchestrator, &queue))
}

fn run_analysis(
    mut orchestrator: SessionOrchestrator,
    queue: &RingBuffer<FrameBatch>,
) -> Result<u64, SessionError> {
    info!("Analysis thread started");
    let mut processed = 0u64;

    while let Some(batch) = queue.pop() {
        let started = Instant::now();
        if let Err(e) = orchestrator.tick(&batch) {
            error!("Analysis stopped: {}", e);
            orchestrator.shutdown();
            return Err(e);
        }
        histogram!("kiosk_tick_seconds").record(started.elapsed().as_secs_f64());
        processed += 1;
    }

    orchestrator.shutdown();
    info!("Analysis thread stopped after {} batches", processed);
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{PromptSink, RecordingSink, SessionArchive};
    use crate::Sinks;
    use attendant::detector::{DetectorError, Detectors, PoseDetector, PoseLandmarks};
    use attendant::{FrameAnalyzer, PresenceProbe};
    use camera_capture::{LatestFrame, VideoFrame};
    use instruction::{PresenceConfig, Prompt, Protocol, ProtocolConfig};
    use storage::SessionRecord;
    use uuid::Uuid;

    struct Failing;

    impl PoseDetector for Failing {
        fn detect_pose(&self, _frame: &VideoFrame) -> Result<Option<PoseLandmarks>, DetectorError> {
            Err(DetectorError::new("pose", "model unavailable"))
        }
    }

    struct Quiet;

    impl PromptSink for Quiet {
        fn announce(&self, _prompt: &Prompt) {}
    }

    impl RecordingSink for Quiet {
        fn start(&self, _session_id: Uuid) {}
        fn stop(&self, _session_id: Uuid) {}
    }

    impl SessionArchive for Quiet {
        fn archive(&self, _record: SessionRecord) {}
    }

    fn orchestrator(probe: Arc<dyn PoseDetector>) -> SessionOrchestrator {
        let protocol = Arc::new(Protocol::new(ProtocolConfig::standard(), 1).unwrap());
        let quiet = Arc::new(Quiet);
        SessionOrchestrator::new(
            protocol,
            PresenceConfig::default(),
            PresenceProbe::new(probe, PresenceProbe::DEFAULT_MAX_SIDE),
            FrameAnalyzer::new(Detectors::unavailable()),
            Sinks {
                prompts: quiet.clone(),
                recorder: quiet.clone(),
                archive: quiet,
            },
        )
        .unwrap()
        .0
    }

    fn batch(sequence: u64) -> FrameBatch {
        let mut frame = VideoFrame::blank(4, 4);
        frame.sequence = sequence;
        FrameBatch::new(sequence, vec![Some(Arc::new(frame))])
    }

    #[test]
    fn test_analysis_drains_closed_queue() {
        let queue = Arc::new(RingBuffer::new(5));
        for i in 0..3 {
            queue.push(batch(i)).unwrap();
        }
        queue.close();

        let probe = Arc::new(attendant::NoModelDetector);
        let handle = spawn_analysis(orchestrator(probe), queue).unwrap();
        assert_eq!(handle.join().unwrap().unwrap(), 3);
    }

    #[test]
    fn test_detector_fault_stops_analysis() {
        let queue = Arc::new(RingBuffer::new(5));
        queue.push(batch(0)).unwrap();
        queue.push(batch(1)).unwrap();

        let handle = spawn_analysis(orchestrator(Arc::new(Failing)), queue.clone()).unwrap();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(SessionError::Attendant(_))));
        // Second batch never processed
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_batches_latest_frames() {
        let slot = Arc::new(LatestFrame::new());
        slot.publish(VideoFrame::blank(2, 2));
        let live: Arc<dyn FrameSource> = slot;
        let missing: Arc<dyn FrameSource> = Arc::new(LatestFrame::new());
        let queue = Arc::new(RingBuffer::new(2));

        let sampler = spawn_sampler(
            vec![live, missing],
            queue.clone(),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(450)).await;
        queue.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sampled = sampler.await.unwrap();

        assert!(sampled >= 4);
        // Capacity 2: older batches were evicted
        assert_eq!(queue.total_dropped() as u64, sampled - 2);
        let batch = queue.pop().unwrap();
        assert_eq!(batch.camera_count(), 2);
        assert!(batch.get(camera_capture::CameraId(0)).is_some());
        assert!(batch.get(camera_capture::CameraId(1)).is_none());
    }
}
