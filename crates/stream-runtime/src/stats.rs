//! Runtime statistics.
//!
//! Operators report events to listeners on their own thread. The plan reads
//! the collected numbers only after every operator thread has been joined.

use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receives execution events from one operator.
///
/// All callbacks run on the operator's thread.
pub trait OperatorListener: Send {
    fn on_input_tuple(&mut self);

    fn on_output_tuple(&mut self);

    /// The operator waited `_elapsed` for input.
    fn on_blocked(&mut self, _elapsed: Duration) {}

    /// The operator waited `_elapsed` for room on a full output.
    fn on_waited(&mut self, _elapsed: Duration) {}

    /// Time spent inside operator callbacks.
    fn on_busy(&mut self, _elapsed: Duration) {}

    fn on_shutdown(&mut self);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorStatistics {
    pub tuples_in: u64,
    pub tuples_out: u64,
    pub blocked_count: u64,
    pub blocked_time: Duration,
    pub waited_count: u64,
    pub waited_time: Duration,
    pub busy_time: Duration,
    pub wall_time: Duration,
    /// CPU time of the operator thread, where the platform reports it
    pub cpu_time: Option<Duration>,
    /// User-mode part of `cpu_time`
    pub user_time: Option<Duration>,
}

/// Listener that accumulates [`OperatorStatistics`] into a shared slot.
pub struct StatisticsListener {
    started: Instant,
    current: OperatorStatistics,
    slot: Arc<Mutex<OperatorStatistics>>,
}

impl StatisticsListener {
    /// Returns the listener and the slot it publishes into on shutdown.
    pub fn new() -> (Self, Arc<Mutex<OperatorStatistics>>) {
        let slot = Arc::new(Mutex::new(OperatorStatistics::default()));
        let listener = Self {
            started: Instant::now(),
            current: OperatorStatistics::default(),
            slot: slot.clone(),
        };
        (listener, slot)
    }
}

impl OperatorListener for StatisticsListener {
    fn on_input_tuple(&mut self) {
        self.current.tuples_in += 1;
    }

    fn on_output_tuple(&mut self) {
        self.current.tuples_out += 1;
    }

    fn on_blocked(&mut self, elapsed: Duration) {
        self.current.blocked_count += 1;
        self.current.blocked_time += elapsed;
    }

    fn on_waited(&mut self, elapsed: Duration) {
        self.current.waited_count += 1;
        self.current.waited_time += elapsed;
    }

    fn on_busy(&mut self, elapsed: Duration) {
        self.current.busy_time += elapsed;
    }

    /// Must run on the operator thread, which is created per operator.
    fn on_shutdown(&mut self) {
        self.current.wall_time = self.started.elapsed();
        self.current.cpu_time = thread_cpu_time();
        self.current.user_time = thread_user_time();
        *self.slot.lock() = self.current.clone();
    }
}

/// Statistics entry for one operator of a finished plan.
#[derive(Debug, Clone)]
pub struct OperatorReport {
    pub name: String,
    pub kind: String,
    pub statistics: OperatorStatistics,
}

#[derive(Debug, Clone, Default)]
pub struct PlanStatistics {
    pub execution_time: Duration,
    /// Resident memory in bytes before the run, when the platform exposes it
    pub memory_before: Option<u64>,
    pub memory_after: Option<u64>,
    pub operators: Vec<OperatorReport>,
}

impl PlanStatistics {
    pub fn memory_delta(&self) -> Option<i64> {
        match (self.memory_before, self.memory_after) {
            (Some(before), Some(after)) => Some(after as i64 - before as i64),
            _ => None,
        }
    }

    pub fn operator(&self, name: &str) -> Option<&OperatorStatistics> {
        self.operators
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.statistics)
    }

    pub fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{}", self)
    }
}

impl fmt::Display for PlanStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.operators {
            let s = &report.statistics;
            writeln!(f, "{} ({})", report.name, report.kind)?;
            writeln!(f, "  tuples:  {} -> {}", s.tuples_in, s.tuples_out)?;
            writeln!(
                f,
                "  blocked: {} times, {:.2}ms",
                s.blocked_count,
                millis(s.blocked_time)
            )?;
            writeln!(
                f,
                "  waited:  {} times, {:.2}ms",
                s.waited_count,
                millis(s.waited_time)
            )?;
            writeln!(
                f,
                "  busy:    {:.2}ms of {:.2}ms",
                millis(s.busy_time),
                millis(s.wall_time)
            )?;
            writeln!(
                f,
                "  cpu:     {} (user {})",
                optional_millis(s.cpu_time),
                optional_millis(s.user_time)
            )?;
        }
        writeln!(f, "total execution time: {:.2}ms", millis(self.execution_time))?;
        match self.memory_delta() {
            Some(delta) => writeln!(f, "memory delta: {} bytes", delta),
            None => writeln!(f, "memory delta: n/a"),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Milliseconds with two decimals, or `n/a`.
fn optional_millis(d: Option<Duration>) -> String {
    match d {
        Some(d) => format!("{:.2}ms", millis(d)),
        None => "n/a".to_string(),
    }
}

/// CPU time consumed by the calling thread.
#[cfg(unix)]
pub fn thread_cpu_time() -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    (rc == 0).then(|| Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(not(unix))]
pub fn thread_cpu_time() -> Option<Duration> {
    None
}

/// User-mode CPU time consumed by the calling thread.
#[cfg(target_os = "linux")]
pub fn thread_user_time() -> Option<Duration> {
    // SAFETY: rusage is plain old data, all-zero is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: `usage` is a valid, writable rusage.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_THREAD, &mut usage) };
    (rc == 0).then(|| {
        Duration::new(
            usage.ru_utime.tv_sec as u64,
            usage.ru_utime.tv_usec as u32 * 1000,
        )
    })
}

#[cfg(not(target_os = "linux"))]
pub fn thread_user_time() -> Option<Duration> {
    None
}

#[cfg(unix)]
fn page_size() -> Option<u64> {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|size| *size > 0)
}

#[cfg(not(unix))]
fn page_size() -> Option<u64> {
    None
}

/// Resident set size of this process in bytes.
///
/// Only available where `/proc/self/statm` exists. Advisory only.
pub fn resident_memory() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * page_size()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_publishes_on_shutdown() {
        let (mut listener, slot) = StatisticsListener::new();
        listener.on_input_tuple();
        listener.on_input_tuple();
        listener.on_output_tuple();
        listener.on_blocked(Duration::from_millis(3));
        listener.on_waited(Duration::from_millis(1));

        assert_eq!(slot.lock().tuples_in, 0);

        listener.on_shutdown();
        let stats = slot.lock().clone();
        assert_eq!(stats.tuples_in, 2);
        assert_eq!(stats.tuples_out, 1);
        assert_eq!(stats.blocked_count, 1);
        assert_eq!(stats.blocked_time, Duration::from_millis(3));
        assert_eq!(stats.waited_count, 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_shutdown_records_thread_cpu_time() {
        let stats = std::thread::spawn(|| {
            let (mut listener, slot) = StatisticsListener::new();
            let mut acc = 0u64;
            let started = Instant::now();
            while started.elapsed() < Duration::from_millis(20) {
                acc = acc.wrapping_mul(31).wrapping_add(7);
            }
            std::hint::black_box(acc);
            listener.on_shutdown();
            let stats = slot.lock().clone();
            stats
        })
        .join()
        .unwrap();

        let cpu = stats.cpu_time.unwrap();
        assert!(cpu > Duration::ZERO);
        assert!(stats.user_time.is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resident_memory_uses_system_page_size() {
        let bytes = resident_memory().unwrap();
        assert!(bytes > 0);
        assert_eq!(bytes % page_size().unwrap(), 0);
    }

    #[test]
    fn test_report_lists_operators() {
        let stats = PlanStatistics {
            execution_time: Duration::from_millis(12),
            memory_before: Some(1000),
            memory_after: Some(1500),
            operators: vec![OperatorReport {
                name: "gen".to_string(),
                kind: "generator".to_string(),
                statistics: OperatorStatistics {
                    tuples_out: 10,
                    ..Default::default()
                },
            }],
        };

        let mut out = Vec::new();
        stats.write_report(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("gen (generator)"));
        assert!(text.contains("tuples:  0 -> 10"));
        assert!(text.contains("memory delta: 500 bytes"));
        assert!(text.contains("cpu:     n/a (user n/a)"));
        assert_eq!(stats.operator("gen").unwrap().tuples_out, 10);
    }
}
