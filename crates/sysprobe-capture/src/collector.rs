//! eBPF collector: load, attach, drain

use crate::decode::CapturedEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use sysprobe_common::EventKind;

/// Collector counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub process_start: u64,
    pub file_open: u64,
    pub connect: u64,
    pub decode_errors: u64,
    pub forward_failures: u64,
}

impl CaptureStats {
    pub fn events(&self) -> u64 {
        self.process_start + self.file_open + self.connect
    }
}

#[derive(Default)]
struct CaptureStatsInner {
    process_start: AtomicU64,
    file_open: AtomicU64,
    connect: AtomicU64,
    decode_errors: AtomicU64,
    forward_failures: AtomicU64,
}

impl CaptureStatsInner {
    fn record(&self, event: &CapturedEvent) {
        let counter = match event.kind() {
            EventKind::ProcessStart => &self.process_start,
            EventKind::FileOpen => &self.file_open,
            EventKind::Connect => &self.connect,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            process_start: self.process_start.load(Ordering::Relaxed),
            file_open: self.file_open.load(Ordering::Relaxed),
            connect: self.connect.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
        }
    }
}

/// Decode one record and forward it, updating counters.
///
/// Returns false once the receiving side is gone.
async fn forward(
    raw: Result<CapturedEvent, crate::decode::DecodeError>,
    tx: &tokio::sync::mpsc::Sender<CapturedEvent>,
    stats: &CaptureStatsInner,
) -> bool {
    let event = match raw {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!("Dropping undecodable record: {}", e);
            stats.decode_errors.fetch_add(1, Ordering::Relaxed);
            return true;
        }
    };

    stats.record(&event);
    if let Err(e) = tx.send(event).await {
        tracing::error!("Failed to forward event: {}", e);
        stats.forward_failures.fetch_add(1, Ordering::Relaxed);
        return false;
    }
    true
}

#[cfg(target_os = "linux")]
pub use linux::EbpfCollector;

#[cfg(target_os = "linux")]
mod linux {
    use super::{forward, CaptureStats, CaptureStatsInner};
    use crate::attach::attach_plan;
    use crate::btf::resolve_task_offsets;
    use crate::config::{CaptureConfig, CaptureSettings, TaskOffsets};
    use crate::decode::{decode, CapturedEvent};
    use crate::error::{CaptureError, CaptureResult};
    use crate::loader::{bump_memlock_rlimit, is_wsl};

    use aya::maps::{HashMap as AyaHashMap, MapData, RingBuf};
    use aya::programs::TracePoint;
    use aya::{Ebpf, EbpfLoader};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use sysprobe_common::{names, SocketKey, SocketMeta};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    /// Linux eBPF collector
    pub struct EbpfCollector {
        settings: CaptureSettings,
        task: TaskOffsets,
        running: Arc<AtomicBool>,
        stats: Arc<CaptureStatsInner>,
        poller: Option<JoinHandle<()>>,
    }

    impl EbpfCollector {
        pub fn new(config: &CaptureConfig) -> Self {
            Self {
                settings: config.capture.clone(),
                task: config.task,
                running: Arc::new(AtomicBool::new(false)),
                stats: Arc::new(CaptureStatsInner::default()),
                poller: None,
            }
        }

        /// Load the object, attach the enabled probes and start draining
        /// into `tx`.
        pub async fn start(&mut self, tx: mpsc::Sender<CapturedEvent>) -> CaptureResult<()> {
            if self.running.load(Ordering::SeqCst) {
                return Err(CaptureError::AlreadyRunning);
            }

            info!("Starting eBPF capture...");
            bump_memlock_rlimit();

            let mut ebpf = self.load()?;
            self.attach(&mut ebpf)?;

            let events = ebpf
                .take_map(names::EVENTS_MAP)
                .ok_or(CaptureError::Map {
                    name: names::EVENTS_MAP,
                    reason: "not found".into(),
                })?;
            let ring = RingBuf::try_from(events).map_err(|e| CaptureError::Map {
                name: names::EVENTS_MAP,
                reason: e.to_string(),
            })?;

            self.running.store(true, Ordering::SeqCst);
            info!("eBPF capture started, polling ring buffer...");

            self.poller = Some(tokio::spawn(poll(
                ebpf,
                ring,
                tx,
                self.running.clone(),
                self.stats.clone(),
                Duration::from_millis(self.settings.poll_interval_ms),
            )));
            Ok(())
        }

        fn load(&self) -> CaptureResult<Ebpf> {
            let path = self.settings.bytecode_path.clone().ok_or_else(|| {
                CaptureError::Configuration(
                    "eBPF bytecode path not configured. Set capture.bytecode_path or SYSPROBE_BYTECODE."
                        .into(),
                )
            })?;
            let bytecode = std::fs::read(&path).map_err(|source| CaptureError::Bytecode {
                path: path.clone(),
                source,
            })?;
            info!("Loading eBPF program ({} bytes)...", bytecode.len());

            let wsl = is_wsl();
            let capture_argv = self.settings.argv.enabled(wsl);
            if wsl && !capture_argv && self.settings.argv != crate::config::ArgvCapture::Off {
                warn!("argv capture disabled on WSL; set SYSPROBE_CAPTURE_ARGV=force to override");
            }
            let (task, _) = resolve_task_offsets(self.task);

            let argv_flag = u8::from(capture_argv);
            let real_parent = task.real_parent;
            let tgid = task.tgid;

            let mut loader = EbpfLoader::new();
            loader
                .set_global(names::CAPTURE_ARGV_GLOBAL, &argv_flag, true)
                .set_global(names::TASK_REAL_PARENT_OFFSET_GLOBAL, &real_parent, true)
                .set_global(names::TASK_TGID_OFFSET_GLOBAL, &tgid, true);
            loader
                .load(&bytecode)
                .map_err(|e| CaptureError::Load(e.to_string()))
        }

        fn attach(&self, ebpf: &mut Ebpf) -> CaptureResult<()> {
            for spec in attach_plan(&self.settings) {
                let attach_error = |reason: String| CaptureError::Attach {
                    program: spec.program,
                    category: spec.category,
                    tracepoint: spec.name,
                    reason,
                };

                let program: &mut TracePoint = ebpf
                    .program_mut(spec.program)
                    .ok_or_else(|| attach_error("program not found".into()))?
                    .try_into()
                    .map_err(|e: aya::programs::ProgramError| attach_error(e.to_string()))?;
                program
                    .load()
                    .map_err(|e| attach_error(format!("load: {}", e)))?;

                match program.attach(spec.category, spec.name) {
                    Ok(_) => info!("Attached {} to {}/{}", spec.program, spec.category, spec.name),
                    Err(e) if !spec.required => {
                        warn!(
                            "Skipping optional tracepoint {}/{}: {}",
                            spec.category, spec.name, e
                        );
                    }
                    Err(e) => return Err(attach_error(e.to_string())),
                }
            }
            Ok(())
        }

        /// Stop polling and detach everything
        pub async fn stop(&mut self) -> CaptureResult<()> {
            info!("Stopping eBPF capture...");
            self.running.store(false, Ordering::SeqCst);
            if let Some(poller) = self.poller.take() {
                poller
                    .await
                    .map_err(|e| CaptureError::Task(e.to_string()))?;
            }
            Ok(())
        }

        pub fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        pub fn stats(&self) -> CaptureStats {
            self.stats.snapshot()
        }
    }

    async fn poll(
        ebpf: Ebpf,
        mut ring: RingBuf<MapData>,
        tx: mpsc::Sender<CapturedEvent>,
        running: Arc<AtomicBool>,
        stats: Arc<CaptureStatsInner>,
        interval: Duration,
    ) {
        'outer: while running.load(Ordering::SeqCst) {
            loop {
                let decoded = match ring.next() {
                    Some(item) => decode(&item),
                    None => break,
                };
                if !forward(decoded, &tx, &stats).await {
                    running.store(false, Ordering::SeqCst);
                    break 'outer;
                }
            }
            tokio::time::sleep(interval).await;
        }

        log_tracked_sockets(&ebpf);
        // Dropping the object detaches every program.
        drop(ebpf);
        info!("eBPF ring buffer polling stopped");
    }

    fn log_tracked_sockets(ebpf: &Ebpf) {
        let Some(map) = ebpf.map(names::SOCKET_META_MAP) else {
            return;
        };
        match AyaHashMap::<_, SocketKey, SocketMeta>::try_from(map) {
            Ok(sockets) => debug!("{} sockets tracked at shutdown", sockets.keys().count()),
            Err(e) => debug!("{} unreadable: {}", names::SOCKET_META_MAP, e),
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use stub::EbpfCollector;

// Stub for non-Linux platforms
#[cfg(not(target_os = "linux"))]
mod stub {
    use super::CaptureStats;
    use crate::config::CaptureConfig;
    use crate::decode::CapturedEvent;
    use crate::error::{CaptureError, CaptureResult};
    use tokio::sync::mpsc;

    pub struct EbpfCollector;

    impl EbpfCollector {
        pub fn new(_config: &CaptureConfig) -> Self {
            Self
        }

        pub async fn start(&mut self, _tx: mpsc::Sender<CapturedEvent>) -> CaptureResult<()> {
            Err(CaptureError::Unsupported)
        }

        pub async fn stop(&mut self) -> CaptureResult<()> {
            Ok(())
        }

        pub fn is_running(&self) -> bool {
            false
        }

        pub fn stats(&self) -> CaptureStats {
            CaptureStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeError};
    use sysprobe_common::sim::{SimChannel, SimMemory, SimTask};
    use sysprobe_common::{Capture, ExecCall, OpenCall};
    use tokio::sync::mpsc;

    /// Records as the poll loop would see them
    fn simulated_records() -> Vec<Vec<u8>> {
        let mut memory = SimMemory::new();
        let path = memory.alloc_str("/etc/hosts");
        let argv = memory.alloc_argv(&["curl", "example.com"]);
        let channel = SimChannel::with_records(8);
        let task = SimTask::new(10, Some(1), "curl");
        let capture = Capture::new(&channel, &memory, &task);

        capture
            .exec(&ExecCall {
                filename: 0,
                argv,
                capture_argv: true,
            })
            .unwrap();
        capture.open(&OpenCall { path, flags: 0 }).unwrap();
        capture.open(&OpenCall { path, flags: 1 }).unwrap();
        channel.drain()
    }

    #[tokio::test]
    async fn test_forward_counts_by_kind() {
        let (tx, mut rx) = mpsc::channel(16);
        let stats = CaptureStatsInner::default();

        for raw in simulated_records() {
            assert!(forward(decode(&raw), &tx, &stats).await);
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.process_start, 1);
        assert_eq!(snapshot.file_open, 2);
        assert_eq!(snapshot.connect, 0);
        assert_eq!(snapshot.events(), 3);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), EventKind::ProcessStart);
        assert_eq!(first.pid(), 10);
    }

    #[tokio::test]
    async fn test_forward_counts_decode_errors() {
        let (tx, mut rx) = mpsc::channel(4);
        let stats = CaptureStatsInner::default();

        let keep_going = forward(Err(DecodeError::ShortRecord { len: 3 }), &tx, &stats).await;

        assert!(keep_going);
        assert_eq!(stats.snapshot().decode_errors, 1);
        assert_eq!(stats.snapshot().events(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_stops_when_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let stats = CaptureStatsInner::default();

        let raw = simulated_records().remove(0);
        let keep_going = forward(decode(&raw), &tx, &stats).await;

        assert!(!keep_going);
        assert_eq!(stats.snapshot().forward_failures, 1);
    }
}
