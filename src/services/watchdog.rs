//! Connectivity watchdog
//!
//! Probes the check URL through the transparent proxy on a fixed interval and,
//! after too many consecutive failures, rotates to the next subscription
//! endpoint: refresh feed, select next, rewrite the outbound, restart xkeen.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::WatchdogConfig;
use crate::error::{PanelError, Result};
use crate::events::{Event, EventBus};
use crate::models::{format_uptime, Status, LATENCY_UNKNOWN};
use crate::subscription::SubscriptionStore;
use crate::xray::{outbound, ProcessController, RestartOutcome};

/// Timeout for one connectivity probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Lines kept in memory
pub const LOG_RING_SIZE: usize = 500;

/// Reachability check for the check URL
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<()>;
}

/// Plain HTTP GET; any response counts as reachable
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| PanelError::Internal(format!("Failed to build probe client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<()> {
        self.client.get(url).send().await?;
        Ok(())
    }
}

#[derive(Debug)]
struct ProbeState {
    connected: bool,
    latency_ms: i64,
    fail_count: u32,
    last_check: Option<DateTime<Utc>>,
}

struct LogSink {
    ring: VecDeque<String>,
    file: Option<File>,
}

/// Health watchdog with automatic failover
pub struct Watchdog {
    config: WatchdogConfig,
    outbounds_file: PathBuf,
    store: Arc<SubscriptionStore>,
    controller: Arc<ProcessController>,
    bus: EventBus,
    probe: Arc<dyn ConnectivityProbe>,
    enabled: AtomicBool,
    started: Instant,
    state: Mutex<ProbeState>,
    log: Mutex<LogSink>,
    failovers: AtomicU64,
}

impl Watchdog {
    /// Create a watchdog; probing starts disabled until toggled on
    pub fn new(
        config: WatchdogConfig,
        outbounds_file: impl Into<PathBuf>,
        store: Arc<SubscriptionStore>,
        controller: Arc<ProcessController>,
        bus: EventBus,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let file = config.log_file.as_ref().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Failed to open log file {}: {}", path.display(), e);
                    None
                }
            }
        });

        Self {
            config,
            outbounds_file: outbounds_file.into(),
            store,
            controller,
            bus,
            probe,
            enabled: AtomicBool::new(false),
            started: Instant::now(),
            state: Mutex::new(ProbeState {
                connected: false,
                latency_ms: LATENCY_UNKNOWN,
                fail_count: 0,
                last_check: None,
            }),
            log: Mutex::new(LogSink {
                ring: VecDeque::with_capacity(LOG_RING_SIZE),
                file,
            }),
            failovers: AtomicU64::new(0),
        }
    }

    pub fn controller(&self) -> &Arc<ProcessController> {
        &self.controller
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn fail_count(&self) -> u32 {
        self.state.lock().fail_count
    }

    /// Number of failover sequences started since boot
    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.note(if enabled {
            "Watchdog enabled"
        } else {
            "Watchdog disabled"
        });
        self.publish_status();
    }

    /// Run the watchdog loop (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.effective_interval();
        self.note(&format!("Watchdog started (interval: {}s)", period.as_secs()));

        self.check().await;

        // A slow failover must not release a burst of queued probes
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_enabled() {
                        self.check().await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.note("Watchdog stopped");
        self.log.lock().file = None;
        info!("Watchdog shutting down");
    }

    /// Probe once and run failover when the failure threshold is reached
    pub async fn check(&self) {
        let started = Instant::now();
        let result = self.probe.probe(&self.config.check_url).await;

        match result {
            Ok(()) => {
                let latency = started.elapsed().as_millis() as i64;
                {
                    let mut state = self.state.lock();
                    state.last_check = Some(Utc::now());
                    state.connected = true;
                    state.latency_ms = latency;
                    state.fail_count = 0;
                }
                self.note(&format!("[OK] Connection alive ({}ms)", latency));
                self.publish_status();
            }
            Err(e) => {
                let attempts = {
                    let mut state = self.state.lock();
                    state.last_check = Some(Utc::now());
                    state.connected = false;
                    state.latency_ms = LATENCY_UNKNOWN;
                    state.fail_count += 1;
                    state.fail_count
                };
                self.alert(&format!(
                    "[FAIL] Connection unavailable ({}), attempt {}/{}",
                    e, attempts, self.config.max_fails
                ));
                self.publish_status();

                if attempts >= self.config.max_fails {
                    self.failover().await;
                    self.state.lock().fail_count = 0;
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn failover(&self) {
        self.failovers.fetch_add(1, Ordering::SeqCst);
        self.alert("[FAILOVER] Switching to the next server...");

        if let Err(e) = self.store.refresh().await {
            self.alert(&format!("[ERROR] Subscription refresh failed: {}", e));
        }

        let endpoint = match self.store.select_next() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.alert(&format!("[ERROR] Server selection failed: {}", e));
                return;
            }
        };
        self.note(&format!(
            "[FAILOVER] Selected server: {} ({})",
            endpoint.name,
            endpoint.socket_addr()
        ));

        if let Err(e) = outbound::write_outbound(&self.outbounds_file, &endpoint) {
            self.alert(&format!("[ERROR] Xray config update failed: {}", e));
            return;
        }

        match self.controller.restart() {
            Ok(RestartOutcome::Initiated) => {
                self.note("[FAILOVER] Restart issued, waiting for next check")
            }
            Ok(RestartOutcome::AlreadyInProgress) => {
                self.note("[FAILOVER] Restart already in progress")
            }
            Err(e) => self.alert(&format!("[ERROR] Restart failed: {}", e)),
        }
    }

    /// Current status snapshot
    pub fn status(&self) -> Status {
        let restarting = self.controller.is_restarting();
        let xray_running = !restarting && self.controller.is_running();

        let mut status = {
            let state = self.state.lock();
            Status {
                connected: state.connected && !restarting,
                xray_running,
                restarting,
                latency_ms: state.latency_ms,
                last_check: state.last_check,
                watchdog_active: self.is_enabled(),
                uptime: if state.connected {
                    format_uptime(self.started.elapsed())
                } else {
                    String::new()
                },
                ..Default::default()
            }
        };

        if let Some(endpoint) = self.store.active_endpoint() {
            status.current_server = endpoint.name;
            status.protocol = endpoint.protocol.to_string();
        }
        status
    }

    pub fn publish_status(&self) {
        self.bus.publish(Event::status(&self.status()));
    }

    /// Last `n` log lines, oldest first; `n <= 0` returns the whole ring
    pub fn logs(&self, n: i64) -> Vec<String> {
        let ring: Vec<String> = {
            let log = self.log.lock();
            let wanted = usize::try_from(n).unwrap_or(0);
            if wanted > 0 && wanted <= log.ring.len() {
                return log.ring.iter().skip(log.ring.len() - wanted).cloned().collect();
            }
            log.ring.iter().cloned().collect()
        };

        // More than the ring holds: serve the tail of the durable file
        if n > 0 {
            if let Some(path) = &self.config.log_file {
                match tail_lines(path, n as usize) {
                    Ok(lines) => return lines,
                    Err(e) => debug!("Log file unreadable, serving ring: {}", e),
                }
            }
        }
        ring
    }

    fn note(&self, message: &str) {
        info!("{}", message);
        self.record(message);
    }

    fn alert(&self, message: &str) {
        warn!("{}", message);
        self.record(message);
    }

    fn record(&self, message: &str) {
        let line = format!("{} {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message);

        {
            let mut log = self.log.lock();
            if log.ring.len() == LOG_RING_SIZE {
                log.ring.pop_front();
            }
            log.ring.push_back(line.clone());

            if let Some(file) = log.file.as_mut() {
                if let Err(e) = writeln!(file, "{}", line) {
                    debug!("Log file write failed: {}", e);
                }
            }
        }

        self.bus.publish(Event::log(line));
    }
}

/// Last `n` lines of a file, reading backwards in blocks so large files are not loaded whole
fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    const BLOCK: u64 = 8 * 1024;

    let mut file = File::open(path)?;
    let mut start = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();

    while start > 0 && buf.iter().filter(|&&b| b == b'\n').count() <= n {
        let step = BLOCK.min(start);
        start -= step;
        file.seek(SeekFrom::Start(start))?;
        let mut chunk = vec![0; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text.trim().lines().collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// Handle for managing the watchdog
pub struct WatchdogHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl WatchdogHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for WatchdogHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::fs;
    use crate::subscription::FeedSource;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    struct FixedFeed(String);

    #[async_trait]
    impl FeedSource for FixedFeed {
        async fn fetch(&self, _url: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    /// Fails every probe while `down` is set
    struct ScriptedProbe {
        down: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(down: bool) -> Arc<Self> {
            Arc::new(Self {
                down: AtomicBool::new(down),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn probe(&self, _url: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(PanelError::Network("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        watchdog: Arc<Watchdog>,
        store: Arc<SubscriptionStore>,
        bus: EventBus,
    }

    const FEED: &str = "vless://u0@10.0.0.1:443?security=reality&type=tcp&sni=a.example#first\n\
                        vless://u1@10.0.0.2:443?security=reality&type=tcp&sni=b.example#second";

    /// Serves `FEED`, sleeping first once `slow` is set
    struct SlowFeed {
        slow: AtomicBool,
    }

    #[async_trait]
    impl FeedSource for SlowFeed {
        async fn fetch(&self, _url: &str) -> Result<String> {
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(35)).await;
            }
            Ok(FEED.to_string())
        }
    }

    async fn fixture(probe: Arc<dyn ConnectivityProbe>, log_file: bool) -> Fixture {
        fixture_with_feed(probe, Arc::new(FixedFeed(FEED.to_string())), log_file).await
    }

    async fn fixture_with_feed(
        probe: Arc<dyn ConnectivityProbe>,
        feed: Arc<dyn FeedSource>,
        log_file: bool,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let outbounds = dir.path().join("04_outbounds.json");
        fs::write(
            &outbounds,
            serde_json::to_vec_pretty(&json!({
                "outbounds": [
                    {"protocol": "vless", "tag": "proxy"},
                    {"protocol": "freedom", "tag": "direct"}
                ]
            }))
            .unwrap(),
        )
        .unwrap();

        let store = Arc::new(SubscriptionStore::new(dir.path().join("data"), feed));
        store.update_url("https://feed.example/sub").await.unwrap();

        let config = WatchdogConfig {
            check_interval: 10,
            check_url: "https://check.example".into(),
            max_fails: 3,
            log_file: log_file.then(|| dir.path().join("panel.log")),
        };
        let bus = EventBus::new();
        let controller = Arc::new(ProcessController::new(dir.path().join("missing-xkeen")));
        let watchdog = Arc::new(Watchdog::new(
            config,
            outbounds,
            store.clone(),
            controller,
            bus.clone(),
            probe,
        ));

        Fixture {
            dir,
            watchdog,
            store,
            bus,
        }
    }

    fn outbound_address(dir: &tempfile::TempDir) -> Value {
        let doc: Value =
            serde_json::from_slice(&fs::read(dir.path().join("04_outbounds.json")).unwrap())
                .unwrap();
        doc["outbounds"][0]["settings"]["vnext"][0]["address"].clone()
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let probe = ScriptedProbe::new(true);
        let f = fixture(probe.clone(), false).await;

        f.watchdog.check().await;
        f.watchdog.check().await;
        assert_eq!(f.watchdog.fail_count(), 2);
        assert!(!f.watchdog.status().connected);

        probe.down.store(false, Ordering::SeqCst);
        f.watchdog.check().await;

        let status = f.watchdog.status();
        assert_eq!(f.watchdog.fail_count(), 0);
        assert!(status.connected);
        assert!(status.latency_ms >= 0);
        assert_eq!(status.uptime, "0m");
        assert_eq!(status.current_server, "first");
        assert_eq!(status.protocol, "vless");
        assert_eq!(f.watchdog.failover_count(), 0);
    }

    #[tokio::test]
    async fn test_threshold_triggers_single_failover() {
        let f = fixture(ScriptedProbe::new(true), false).await;

        f.watchdog.check().await;
        f.watchdog.check().await;
        assert_eq!(f.watchdog.failover_count(), 0);

        f.watchdog.check().await;
        assert_eq!(f.watchdog.failover_count(), 1);
        assert_eq!(f.watchdog.fail_count(), 0);

        // Store advanced and the outbound followed it; restart failed (no daemon)
        assert_eq!(f.store.active_endpoint().unwrap().name, "second");
        assert_eq!(outbound_address(&f.dir), json!("10.0.0.2"));
        assert!(f
            .watchdog
            .logs(0)
            .iter()
            .any(|l| l.contains("[ERROR] Restart failed")));

        let status = f.watchdog.status();
        assert!(!status.connected);
        assert_eq!(status.latency_ms, LATENCY_UNKNOWN);
        assert!(status.uptime.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_probes_on_interval_while_enabled() {
        let probe = ScriptedProbe::new(true);
        let f = fixture(probe.clone(), false).await;
        f.watchdog.set_enabled(true);

        let (handle, shutdown) = WatchdogHandle::new();
        let watchdog = f.watchdog.clone();
        let task = tokio::spawn(async move { watchdog.run(shutdown).await });

        // Probes at 0s, 10s and 20s; the third one fails over
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.watchdog.failover_count(), 1);
        assert_eq!(f.watchdog.fail_count(), 0);

        f.watchdog.set_enabled(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);

        handle.shutdown();
        task.await.unwrap();
        assert!(f.watchdog.logs(1)[0].ends_with("Watchdog stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_failover_does_not_burst_missed_ticks() {
        let probe = ScriptedProbe::new(true);
        let feed = Arc::new(SlowFeed {
            slow: AtomicBool::new(false),
        });
        let f = fixture_with_feed(probe.clone(), feed.clone(), false).await;
        feed.slow.store(true, Ordering::SeqCst);
        f.watchdog.set_enabled(true);

        let (handle, shutdown) = WatchdogHandle::new();
        let watchdog = f.watchdog.clone();
        let task = tokio::spawn(async move { watchdog.run(shutdown).await });

        // Failover starts at 20s and its refresh holds it until 55s. The ticks
        // missed meanwhile collapse into one probe instead of three.
        tokio::time::sleep(Duration::from_secs(58)).await;
        assert_eq!(f.watchdog.failover_count(), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        assert_eq!(f.watchdog.fail_count(), 1);
        assert_eq!(f.store.active_endpoint().unwrap().name, "second");

        handle.shutdown();
        task.await.unwrap();
    }

    #[test]
    fn test_tail_lines_reads_only_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.log");
        let contents: String = (0..2000)
            .map(|i| format!("2024-01-01 00:00:00 line {}\n", i))
            .collect();
        fs::write(&path, contents).unwrap();

        let last = tail_lines(&path, 3).unwrap();
        assert_eq!(
            last,
            vec![
                "2024-01-01 00:00:00 line 1997",
                "2024-01-01 00:00:00 line 1998",
                "2024-01-01 00:00:00 line 1999",
            ]
        );

        // Spans several blocks
        let many = tail_lines(&path, 1500).unwrap();
        assert_eq!(many.len(), 1500);
        assert!(many[0].ends_with("line 500"));

        let all = tail_lines(&path, 5000).unwrap();
        assert_eq!(all.len(), 2000);
        assert!(all[0].ends_with("line 0"));
    }

    #[tokio::test]
    async fn test_failover_with_empty_store_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SubscriptionStore::new(
            dir.path(),
            Arc::new(FixedFeed(String::new())),
        ));
        let config = WatchdogConfig {
            max_fails: 1,
            ..Default::default()
        };
        let watchdog = Watchdog::new(
            config,
            dir.path().join("04_outbounds.json"),
            store,
            Arc::new(ProcessController::new("/nonexistent")),
            EventBus::new(),
            ScriptedProbe::new(true),
        );

        watchdog.check().await;
        assert_eq!(watchdog.failover_count(), 1);
        assert_eq!(watchdog.fail_count(), 0);

        let logs = watchdog.logs(0);
        assert!(logs.iter().any(|l| l.contains("[ERROR] Subscription refresh failed")));
        assert!(logs.iter().any(|l| l.contains("[ERROR] Server selection failed")));
        assert!(!dir.path().join("04_outbounds.json").exists());
    }

    #[tokio::test]
    async fn test_toggle_publishes_log_and_status() {
        let f = fixture(ScriptedProbe::new(false), false).await;
        let mut sub = f.bus.subscribe().unwrap();

        f.watchdog.set_enabled(true);

        let log = sub.recv().await.unwrap();
        assert_eq!(log.kind, EventKind::Log);
        assert!(log.data.as_str().unwrap().ends_with("Watchdog enabled"));

        let status = sub.recv().await.unwrap();
        assert_eq!(status.kind, EventKind::Status);
        assert_eq!(status.data["watchdog_active"], true);
    }

    #[tokio::test]
    async fn test_logs_window_and_file_fallback() {
        let f = fixture(ScriptedProbe::new(false), true).await;
        fs::write(
            f.dir.path().join("panel.log"),
            "2024-01-01 00:00:00 old one\n2024-01-01 00:00:01 old two\n",
        )
        .unwrap();

        f.watchdog.set_enabled(true);
        f.watchdog.check().await;

        let ring = f.watchdog.logs(0);
        assert_eq!(ring.len(), 2);
        assert!(ring[1].contains("[OK] Connection alive"));

        let last = f.watchdog.logs(1);
        assert_eq!(last, vec![ring[1].clone()]);

        // Asking for more than the ring holds reads the durable file
        let from_file = f.watchdog.logs(4);
        assert_eq!(from_file.len(), 4);
        assert!(from_file[0].ends_with("old one"));
        assert!(from_file[3].contains("[OK] Connection alive"));

        // Line format: "YYYY-MM-DD HH:MM:SS message"
        let stamp = &ring[0][..19];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn test_ring_is_bounded() {
        let f = fixture(ScriptedProbe::new(false), false).await;

        for i in 0..(LOG_RING_SIZE + 20) {
            f.watchdog.note(&format!("line {}", i));
        }

        let logs = f.watchdog.logs(0);
        assert_eq!(logs.len(), LOG_RING_SIZE);
        assert!(logs[0].ends_with("line 20"));
    }
}
