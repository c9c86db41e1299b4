//! Connectivity monitor.
//!
//! Turns periodic reachability observations into a single edge-triggered
//! "usable network" flag. A flip is only published after the new value has
//! been observed for `stable_polls` consecutive polls, so a flapping link does
//! not spam the sync engine.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// One reachability observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reachability {
    /// A network interface is up and names resolve.
    pub has_link: bool,
    /// The probe target answered.
    pub internet_reachable: bool,
}

impl Reachability {
    pub const ONLINE: Self = Self {
        has_link: true,
        internet_reachable: true,
    };
    pub const OFFLINE: Self = Self {
        has_link: false,
        internet_reachable: false,
    };

    /// Whether the network can be used for sync.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        self.has_link && self.internet_reachable
    }
}

/// Source of reachability observations.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> Reachability;
}

/// Probe that opens a TCP connection to a well-known address.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self) -> Reachability {
        let resolved =
            tokio::time::timeout(self.timeout, tokio::net::lookup_host(self.addr.as_str())).await;
        let Some(target) = resolved
            .ok()
            .and_then(Result::ok)
            .and_then(|mut addrs| addrs.next())
        else {
            tracing::debug!("Probe target {} did not resolve", self.addr);
            return Reachability::OFFLINE;
        };

        let connected = tokio::time::timeout(self.timeout, TcpStream::connect(target)).await;
        let internet_reachable = matches!(connected, Ok(Ok(_)));
        if !internet_reachable {
            tracing::debug!("Probe target {target} unreachable");
        }
        Reachability {
            has_link: true,
            internet_reachable,
        }
    }
}

#[derive(Debug)]
struct Debouncer {
    candidate: bool,
    streak: usize,
}

/// Edge-triggered, debounced connectivity state.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
    debouncer: Mutex<Debouncer>,
    stable_polls: usize,
}

impl ConnectivityMonitor {
    /// Create a monitor starting at `initial`. `stable_polls` is clamped to 1.
    #[must_use]
    pub fn new(initial: bool, stable_polls: usize) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            debouncer: Mutex::new(Debouncer {
                candidate: initial,
                streak: 0,
            }),
            stable_polls: stable_polls.max(1),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receiver that wakes only when the debounced value flips.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Feed one observation. Returns the new value when it caused an edge.
    pub fn observe(&self, reachability: Reachability) -> Option<bool> {
        let usable = reachability.is_usable();
        let mut debouncer = self.debouncer.lock().unwrap_or_else(PoisonError::into_inner);

        if usable == self.is_connected() {
            debouncer.candidate = usable;
            debouncer.streak = 0;
            return None;
        }

        if debouncer.candidate == usable {
            debouncer.streak += 1;
        } else {
            debouncer.candidate = usable;
            debouncer.streak = 1;
        }

        if debouncer.streak < self.stable_polls {
            return None;
        }

        debouncer.streak = 0;
        self.sender.send_replace(usable);
        tracing::info!(
            "Connectivity changed: {}",
            if usable { "online" } else { "offline" }
        );
        Some(usable)
    }

    /// Poll `probe` every `interval` forever.
    pub async fn run(&self, probe: &dyn ReachabilityProbe, interval: Duration) {
        tracing::info!("Starting connectivity monitoring (every {interval:?})");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reachability = probe.probe().await;
            self.observe(reachability);
        }
    }
}
