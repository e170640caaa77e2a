//! C7: periodic counter snapshots into a bounded time series, plus the CSV
//! encoding used by the drain endpoint (§6 schema).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fedlb_core::LbInstance;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::TelemetryError;
use crate::ring_buffer::RingBuffer;

/// Default capacity sized generously for an experiment run (§4.7).
pub const DEFAULT_CAPACITY: usize = 20_000;

#[derive(Debug, Clone)]
pub struct Sample {
    pub total_queue: u64,
    pub queue: i64,
    pub first_received_queue: u64,
    pub second_received_queue: u64,
    pub current_response: u64,
    pub current_transport: u64,
    pub peer_data: Vec<i64>,
    pub peer_weight: Vec<i64>,
    pub peer_transport: Vec<u64>,
    pub backend_sessions: Vec<u64>,
}

pub struct Sampler {
    instance: Arc<LbInstance>,
    series: Mutex<RingBuffer<Sample>>,
    draining: AtomicBool,
}

impl Sampler {
    pub fn new(instance: Arc<LbInstance>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            instance,
            series: Mutex::new(RingBuffer::new(capacity)),
            draining: AtomicBool::new(false),
        })
    }

    /// Runs forever on `samplingPeriod`, exiting the process the tick after
    /// a drain request is observed.
    pub async fn run(self: Arc<Self>) {
        let period = self.instance.tunables.sampling_period;
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if self.draining.load(Ordering::SeqCst) {
                info!("drain acknowledged, exiting");
                std::process::exit(0);
            }
            let sample = self.snapshot().await;
            self.series.lock().await.push(sample);
        }
    }

    async fn snapshot(&self) -> Sample {
        let counters = self.instance.counters().snapshot();
        let peers = self.instance.peers_snapshot().await;
        let backends = self.instance.backends_snapshot().await;
        Sample {
            total_queue: counters.total_admitted,
            queue: counters.inflight,
            first_received_queue: counters.first_hop_ingress,
            second_received_queue: counters.second_hop_ingress,
            current_response: counters.local_responses,
            current_transport: counters.offloads,
            peer_data: peers.iter().map(|p| p.last_queue).collect(),
            peer_weight: peers.iter().map(|p| p.weight).collect(),
            peer_transport: peers.iter().map(|p| p.offloads).collect(),
            backend_sessions: backends.iter().map(|b| b.sessions).collect(),
        }
    }

    pub fn request_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Encode the full time series as CSV, column order per §6: the six
    /// scalar counters, then per-peer Data/Weight/Transport blocks, then
    /// per-backend Session columns, in stable ordinal order.
    pub async fn dump_csv(&self) -> Result<String, TelemetryError> {
        let peers = self.instance.peers_snapshot().await;
        let backends = self.instance.backends_snapshot().await;
        let series = self.series.lock().await;

        let mut header = vec![
            "TotalQueue".to_string(),
            "Queue".to_string(),
            "FirstReceivedQueue".to_string(),
            "SecondReceivedQueue".to_string(),
            "CurrentResponse".to_string(),
            "CurrentTransport".to_string(),
        ];
        for p in &peers {
            header.push(format!("{}_Data", p.id));
        }
        for p in &peers {
            header.push(format!("{}_Weight", p.id));
        }
        for p in &peers {
            header.push(format!("{}_Transport", p.id));
        }
        for b in &backends {
            header.push(format!("{}_Session", b.id));
        }

        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&header)?;
        for sample in series.iter() {
            let mut record: Vec<String> = vec![
                sample.total_queue.to_string(),
                sample.queue.to_string(),
                sample.first_received_queue.to_string(),
                sample.second_received_queue.to_string(),
                sample.current_response.to_string(),
                sample.current_transport.to_string(),
            ];
            record.extend(sample.peer_data.iter().map(i64::to_string));
            record.extend(sample.peer_weight.iter().map(i64::to_string));
            record.extend(sample.peer_transport.iter().map(u64::to_string));
            record.extend(sample.backend_sessions.iter().map(u64::to_string));
            writer.write_record(&record)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| TelemetryError::Csv(e.into_error()))?;
        Ok(String::from_utf8(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedlb_core::{Backend, Peer, Tunables};

    fn instance() -> Arc<LbInstance> {
        LbInstance::new(
            "10.0.0.2".to_string(),
            None,
            Tunables::default(),
            vec![Peer::new(0, "10.0.0.3".to_string()), Peer::new(1, "10.0.0.4".to_string())],
            vec![Backend::new(0, "10.0.1.10".to_string())],
        )
    }

    #[tokio::test]
    async fn csv_header_matches_schema() {
        let sampler = Sampler::new(instance(), 10);
        sampler.series.lock().await.push(sampler.snapshot().await);
        let csv = sampler.dump_csv().await.unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(
            header,
            "TotalQueue,Queue,FirstReceivedQueue,SecondReceivedQueue,CurrentResponse,CurrentTransport,\
0_Data,1_Data,0_Weight,1_Weight,0_Transport,1_Transport,0_Session"
        );
    }

    #[tokio::test]
    async fn one_row_per_sample() {
        let sampler = Sampler::new(instance(), 10);
        for _ in 0..3 {
            let s = sampler.snapshot().await;
            sampler.series.lock().await.push(s);
        }
        let csv = sampler.dump_csv().await.unwrap();
        assert_eq!(csv.lines().count(), 4); // header + 3 rows
    }

    #[tokio::test]
    async fn request_drain_sets_flag() {
        let sampler = Sampler::new(instance(), 10);
        assert!(!sampler.draining.load(Ordering::SeqCst));
        sampler.request_drain();
        assert!(sampler.draining.load(Ordering::SeqCst));
    }
}
