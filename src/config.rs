use std::env;

/// Fallback worker count when `MILLRACE_WORKERS` is unset or unusable.
pub const DEFAULT_WORKERS: usize = 100;

/// Fallback admission capacity when `MILLRACE_CAPACITY` is unset or unusable.
pub const DEFAULT_CAPACITY: usize = 100;

/// Configuration for a [`Queue`](crate::Queue).
///
/// Zero-valued counts fall back to the environment, then to the compile-time
/// defaults, so `Options::default()` always yields a working queue.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Name reported in stats and to the monitor; a generated id when `None`.
    pub tag: Option<String>,
    /// Number of workers to spawn.
    pub workers: usize,
    /// Capacity of the admission channel; admission blocks beyond it.
    pub capacity: usize,
    /// Announce queue lifecycle transitions at info level.
    pub verbose: bool,
    /// Address of a monitor sink, e.g. `"127.0.0.1:9147"`.
    pub monitor_addr: Option<String>,
}

impl Options {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn with_monitor(mut self, addr: impl Into<String>) -> Self {
        self.monitor_addr = Some(addr.into());
        self
    }

    pub(crate) fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            parse_count(env::var("MILLRACE_WORKERS").ok(), DEFAULT_WORKERS)
        }
    }

    pub(crate) fn resolved_capacity(&self) -> usize {
        if self.capacity > 0 {
            self.capacity
        } else {
            parse_count(env::var("MILLRACE_CAPACITY").ok(), DEFAULT_CAPACITY)
        }
    }
}

fn parse_count(raw: Option<String>, fallback: usize) -> usize {
    raw.and_then(|value| value.trim().parse().ok())
        .filter(|count| *count > 0)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_count_accepts_positive_numbers() {
        assert_eq!(parse_count(Some("8".to_string()), 100), 8);
        assert_eq!(parse_count(Some(" 12 ".to_string()), 100), 12);
    }

    #[test]
    fn parse_count_falls_back_on_garbage_or_zero() {
        assert_eq!(parse_count(None, 100), 100);
        assert_eq!(parse_count(Some("".to_string()), 100), 100);
        assert_eq!(parse_count(Some("many".to_string()), 100), 100);
        assert_eq!(parse_count(Some("0".to_string()), 100), 100);
    }

    #[test]
    fn explicit_counts_win_over_defaults() {
        let options = Options::default().with_workers(3).with_capacity(7);
        assert_eq!(options.resolved_workers(), 3);
        assert_eq!(options.resolved_capacity(), 7);
    }
}
