//! Tunnel pool: leases, provisioning, health checks and rotation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::TunnelsConfig;
use super::error::{HostError, TunnelError};
use super::host::HostNetwork;
use super::routing::RoutingPlan;
use super::store::TunnelConfigStore;
use super::types::{
    ranges_overlap, PoolStatus, TunnelConfig, TunnelId, TunnelSnapshot, TunnelState,
};
use crate::events::{AlertKind, EventHandle, PipelineEvent};

/// Exclusive borrow of one active tunnel.
///
/// Dropping a lease without calling [`TunnelManager::release`] hands the
/// tunnel back as healthy.
#[derive(Debug)]
pub struct TunnelLease {
    id: TunnelId,
    interface: String,
    address: IpAddr,
    dns: Vec<IpAddr>,
    slot: usize,
    serial: u64,
    manager: Weak<ManagerInner>,
    released: bool,
}

impl TunnelLease {
    pub fn id(&self) -> &TunnelId {
        &self.id
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Source address of the tunnel's local end.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Resolvers reachable through the tunnel; empty when the peer has none.
    pub fn dns(&self) -> &[IpAddr] {
        &self.dns
    }

    /// A lease with no pool behind it, for exercising workers directly.
    #[cfg(test)]
    pub(crate) fn unmanaged(id: &str, interface: &str, address: IpAddr) -> Self {
        Self {
            id: TunnelId::from(id),
            interface: interface.to_string(),
            address,
            dns: Vec::new(),
            slot: 0,
            serial: 0,
            manager: Weak::new(),
            released: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_dns(mut self, dns: Vec<IpAddr>) -> Self {
        self.dns = dns;
        self
    }
}

impl Drop for TunnelLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(inner) = self.manager.upgrade() {
            debug!(tunnel_id = %self.id, "Lease dropped without release");
            inner.finish_lease(self.slot, self.serial, true);
        }
    }
}

struct Slot {
    config: TunnelConfig,
    plan: RoutingPlan,
    state: TunnelState,
    borrower: Option<u64>,
    provision_count: u32,
    failed_probe_at: Option<Instant>,
    last_probe: Option<Instant>,
    draining_since: Option<Instant>,
    stuck_alerted: bool,
}

impl Slot {
    fn new(config: TunnelConfig, plan: RoutingPlan) -> Self {
        Self {
            config,
            plan,
            state: TunnelState::Provisioning,
            borrower: None,
            provision_count: 0,
            failed_probe_at: None,
            last_probe: None,
            draining_since: None,
            stuck_alerted: false,
        }
    }

    fn is_leasable(&self, now: Instant, cooldown: Duration) -> bool {
        self.state == TunnelState::Active
            && self.borrower.is_none()
            && self
                .failed_probe_at
                .map_or(true, |at| now.duration_since(at) >= cooldown)
    }

    fn begin_draining(&mut self, now: Instant) {
        if self.state != TunnelState::Draining {
            self.state = TunnelState::Draining;
            self.draining_since = Some(now);
            self.stuck_alerted = false;
        }
    }
}

#[derive(Default)]
struct Pool {
    slots: Vec<Option<Slot>>,
    cursor: usize,
    next_serial: u64,
    /// Unhealthy releases per tunnel; survives slot recycling.
    faults: HashMap<TunnelId, u32>,
    /// Configs whose provisioning recently failed.
    config_cooldown: HashMap<TunnelId, Instant>,
}

impl Pool {
    fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    fn installed(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().flatten()
    }

    fn free_index(&self) -> usize {
        self.slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.slots.len())
    }

    fn put(&mut self, index: usize, slot: Slot) {
        if index == self.slots.len() {
            self.slots.push(Some(slot));
        } else {
            self.slots[index] = Some(slot);
        }
    }

    /// Whether `config` may be installed next to everything already present.
    fn admits(&self, config: &TunnelConfig, interface: &str, skip: Option<usize>) -> bool {
        self.slots.iter().enumerate().all(|(index, slot)| {
            let Some(slot) = slot else { return true };
            if Some(index) == skip {
                return true;
            }
            slot.config.id != config.id
                && slot.plan.interface() != interface
                && !slot.config.overlaps(config)
        })
    }
}

/// Shared state of a [`TunnelManager`].
pub(crate) struct ManagerInner {
    config: TunnelsConfig,
    store: Arc<TunnelConfigStore>,
    host: Arc<dyn HostNetwork>,
    events: Option<EventHandle>,
    pool: Mutex<Pool>,
    released: Notify,
    wake_maintenance: Notify,
    host_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Owns the tunnel pool.
///
/// Pool bookkeeping lives behind one mutex that is never held across an
/// await. Host changes (provisioning and teardown) are serialized by a
/// separate async lock and run in spawned tasks so a cancelled caller can
/// not leave a routing context half configured.
pub struct TunnelManager {
    inner: Arc<ManagerInner>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl TunnelManager {
    pub fn new(
        config: TunnelsConfig,
        store: Arc<TunnelConfigStore>,
        host: Arc<dyn HostNetwork>,
        events: Option<EventHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                host,
                events,
                pool: Mutex::new(Pool::default()),
                released: Notify::new(),
                wake_maintenance: Notify::new(),
                host_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
            maintenance: Mutex::new(None),
        }
    }

    /// Starts the maintenance loop (teardown, replacement, health checks and
    /// warm-up). Calling it twice has no effect.
    pub fn start(&self) {
        let mut handle = lock(&self.maintenance);
        if handle.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(inner.run_maintenance()));
        info!(
            max_tunnels = self.inner.config.max_tunnels,
            configured = self.inner.store.len(),
            "Tunnel manager started"
        );
    }

    pub fn is_running(&self) -> bool {
        lock(&self.maintenance).is_some() && !self.inner.shutdown.is_cancelled()
    }

    pub fn config(&self) -> &TunnelsConfig {
        &self.inner.config
    }

    /// Leases an active tunnel, provisioning one when capacity allows.
    pub async fn acquire(&self, timeout: Duration) -> Result<TunnelLease, TunnelError> {
        self.acquire_avoiding(timeout, &[]).await
    }

    /// Like [`acquire`](Self::acquire), preferring tunnels not in `avoid`.
    ///
    /// With a zero timeout this never waits: if nothing is free right now it
    /// fails with `PoolExhausted`, starting a provisioning in the background
    /// when capacity allows.
    pub async fn acquire_avoiding(
        &self,
        timeout: Duration,
        avoid: &[TunnelId],
    ) -> Result<TunnelLease, TunnelError> {
        let started = Instant::now();
        let deadline = started + timeout;

        'outer: loop {
            if self.inner.shutdown.is_cancelled() {
                return Err(TunnelError::ShuttingDown);
            }

            // Registered before inspecting the pool so a release in between
            // is not missed.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            for allow_avoided in [false, true] {
                if let Some(lease) = self.inner.try_lease(avoid, allow_avoided) {
                    debug!(tunnel_id = %lease.id, "Tunnel leased");
                    return Ok(lease);
                }
                if let Some(index) = self.inner.reserve_slot(avoid, allow_avoided) {
                    self.provision_inline(index, started, deadline).await?;
                    continue 'outer;
                }
            }

            if Instant::now() >= deadline {
                return Err(TunnelError::PoolExhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(TunnelError::PoolExhausted {
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                _ = self.inner.shutdown.cancelled() => return Err(TunnelError::ShuttingDown),
            }
        }
    }

    async fn provision_inline(
        &self,
        index: usize,
        started: Instant,
        deadline: Instant,
    ) -> Result<(), TunnelError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(inner.provision_slot(index));

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TunnelError::PoolExhausted {
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }

        match tokio::time::timeout(remaining, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(TunnelError::Unavailable {
                reason: format!("provisioning task failed: {}", join_error),
            }),
            Err(_) => Err(TunnelError::Timeout {
                timeout_ms: deadline.duration_since(started).as_millis() as u64,
            }),
        }
    }

    /// Returns a leased tunnel. `observed_healthy = false` retires it: the
    /// tunnel is drained, torn down and replaced instead of reused.
    pub fn release(&self, mut lease: TunnelLease, observed_healthy: bool) {
        lease.released = true;
        self.inner
            .finish_lease(lease.slot, lease.serial, observed_healthy);
    }

    /// Probes the leased tunnel. A failed probe retires it.
    pub async fn health_check(&self, lease: &TunnelLease) -> bool {
        let result = self
            .inner
            .host
            .probe(
                &lease.interface,
                lease.address,
                self.inner.config.probe_target,
                self.inner.config.health_check_timeout(),
            )
            .await;

        match result {
            Ok(()) => {
                if let Some(slot) = self.inner.pool().slot_mut(lease.slot) {
                    if slot.borrower == Some(lease.serial) {
                        slot.last_probe = Some(Instant::now());
                    }
                }
                true
            }
            Err(e) => {
                self.inner.probe_failed(lease.slot, Some(lease.serial), &e);
                false
            }
        }
    }

    /// Number of unhealthy releases recorded for `id`.
    pub fn fault_count(&self, id: &TunnelId) -> u32 {
        self.inner.pool().faults.get(id).copied().unwrap_or(0)
    }

    pub fn status(&self) -> PoolStatus {
        let now = Instant::now();
        let pool = self.inner.pool();
        let tunnels = pool
            .installed()
            .map(|slot| TunnelSnapshot {
                id: slot.config.id.clone(),
                interface: slot.plan.interface().to_string(),
                table: slot.plan.table(),
                state: slot.state,
                leased: slot.borrower.is_some(),
                fault_count: pool.faults.get(&slot.config.id).copied().unwrap_or(0),
                provision_count: slot.provision_count,
                draining_for_secs: slot
                    .draining_since
                    .filter(|_| slot.state == TunnelState::Draining)
                    .map(|at| now.duration_since(at).as_secs()),
            })
            .collect();

        PoolStatus {
            running: self.is_running(),
            max_tunnels: self.inner.config.max_tunnels,
            configured: self.inner.store.len(),
            tunnels,
        }
    }

    /// Re-reads tunnel configurations. Installed tunnels are unaffected.
    pub fn reload_configs(&self) -> Result<usize, super::error::StoreError> {
        self.inner.store.reload()
    }

    /// Stops maintenance and tears down every routing context.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = lock(&self.maintenance).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let _host = self.inner.host_lock.lock().await;
        let slots: Vec<(usize, TunnelId, RoutingPlan)> = self
            .inner
            .pool()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.config.id.clone(), s.plan.clone())))
            .collect();

        for (index, id, plan) in slots {
            match plan.teardown(&*self.inner.host).await {
                Ok(()) => {
                    self.inner.emit(PipelineEvent::TunnelDestroyed {
                        tunnel_id: id,
                        interface: plan.interface().to_string(),
                    });
                }
                Err(e) => {
                    error!(tunnel_id = %id, interface = plan.interface(), error = %e, "Teardown failed during shutdown");
                }
            }
            if let Some(slot) = self.inner.pool().slots.get_mut(index) {
                *slot = None;
            }
        }

        self.inner.released.notify_waiters();
        info!("Tunnel manager stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManagerInner {
    fn pool(&self) -> MutexGuard<'_, Pool> {
        lock(&self.pool)
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.try_emit(event);
        }
    }

    fn alert(&self, alert: AlertKind, tunnel_id: Option<TunnelId>, message: String) {
        error!(alert = alert.as_str(), tunnel_id = ?tunnel_id, "{}", message);
        self.emit(PipelineEvent::OperationalAlert {
            alert,
            tunnel_id,
            message,
        });
    }

    fn try_lease(self: &Arc<Self>, avoid: &[TunnelId], allow_avoided: bool) -> Option<TunnelLease> {
        let now = Instant::now();
        let cooldown = self.config.cooldown();
        let mut pool = self.pool();

        let len = pool.slots.len();
        let start = pool.cursor;
        let index = (0..len).map(|offset| (start + offset) % len).find(|&i| {
            pool.slot(i).is_some_and(|slot| {
                slot.is_leasable(now, cooldown)
                    && (allow_avoided || !avoid.contains(&slot.config.id))
            })
        })?;

        pool.cursor = (index + 1) % len;
        let serial = pool.next_serial;
        pool.next_serial += 1;

        let slot = pool.slot_mut(index)?;
        slot.borrower = Some(serial);
        Some(TunnelLease {
            id: slot.config.id.clone(),
            interface: slot.plan.interface().to_string(),
            address: slot.config.address.addr(),
            dns: slot.config.dns.clone(),
            slot: index,
            serial,
            manager: Arc::downgrade(self),
            released: false,
        })
    }

    /// Claims a free slot for an unused config when capacity allows.
    fn reserve_slot(&self, avoid: &[TunnelId], allow_avoided: bool) -> Option<usize> {
        let configs = self.store.all();
        let now = Instant::now();
        let cooldown = self.config.cooldown();
        let mut pool = self.pool();

        if pool.installed().count() >= self.config.max_tunnels {
            return None;
        }
        pool.config_cooldown
            .retain(|_, failed_at| now.duration_since(*failed_at) < cooldown);

        let index = pool.free_index();
        let (config, interface) = configs.iter().find_map(|config| {
            if !allow_avoided && avoid.contains(&config.id) {
                return None;
            }
            if pool.config_cooldown.contains_key(&config.id) {
                return None;
            }
            let interface = self.interface_name(config, index);
            pool.admits(config, &interface, None)
                .then(|| (config.clone(), interface))
        })?;

        let table = self.config.table_base + index as u32;
        let plan = RoutingPlan::build(&config, &interface, table, self.config.firewall);
        debug!(tunnel_id = %config.id, interface = %interface, table, "Reserved pool slot");
        pool.put(index, Slot::new(config, plan));
        Some(index)
    }

    fn interface_name(&self, config: &TunnelConfig, index: usize) -> String {
        config
            .interface_name
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.config.interface_prefix, index))
    }

    /// Brings the reserved slot at `index` up, retrying with backoff. On
    /// final failure the slot is freed.
    async fn provision_slot(self: Arc<Self>, index: usize) -> Result<(), TunnelError> {
        let Some((id, plan, source)) = self.pool().slot(index).map(|s| {
            (s.config.id.clone(), s.plan.clone(), s.config.address.addr())
        }) else {
            return Err(TunnelError::Unavailable {
                reason: "pool slot vanished before provisioning".to_string(),
            });
        };

        let attempts = self.config.provision_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = {
                let _host = self.host_lock.lock().await;
                if self.shutdown.is_cancelled() {
                    self.free_slot(index);
                    return Err(TunnelError::ShuttingDown);
                }
                let result = self.bring_up(&plan, source).await;
                if result.is_ok() {
                    self.mark_active(index);
                }
                result
            };

            match result {
                Ok(()) => {
                    info!(tunnel_id = %id, interface = plan.interface(), attempt, "Tunnel active");
                    self.emit(PipelineEvent::TunnelProvisioned {
                        tunnel_id: id,
                        interface: plan.interface().to_string(),
                        attempts: attempt,
                    });
                    self.released.notify_waiters();
                    return Ok(());
                }
                Err(e) if e.is_permission_denied() => {
                    self.free_slot(index);
                    self.alert(
                        AlertKind::PermissionDenied,
                        Some(id),
                        format!("Cannot configure host networking: {}", e),
                    );
                    return Err(TunnelError::from(e));
                }
                Err(e) => {
                    warn!(tunnel_id = %id, attempt, attempts, error = %e, "Tunnel provisioning failed");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.provision_backoff(attempt)) => {}
                    _ = self.shutdown.cancelled() => {
                        self.free_slot(index);
                        return Err(TunnelError::ShuttingDown);
                    }
                }
            }
        }

        self.free_slot(index);
        self.pool()
            .config_cooldown
            .insert(id.clone(), Instant::now());
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        self.alert(
            AlertKind::ProvisioningExhausted,
            Some(id.clone()),
            format!("Giving up on tunnel after {} attempts: {}", attempts, reason),
        );
        Err(TunnelError::Unavailable {
            reason: format!("tunnel '{}' failed to provision: {}", id, reason),
        })
    }

    async fn bring_up(&self, plan: &RoutingPlan, source: IpAddr) -> Result<(), HostError> {
        plan.apply(&*self.host).await?;
        if self.config.verify_on_provision {
            let probe = self
                .host
                .probe(
                    plan.interface(),
                    source,
                    self.config.probe_target,
                    self.config.health_check_timeout(),
                )
                .await;
            if let Err(e) = probe {
                if let Err(teardown) = plan.teardown(&*self.host).await {
                    warn!(interface = plan.interface(), error = %teardown, "Cleanup after failed probe incomplete");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn mark_active(&self, index: usize) {
        let now = Instant::now();
        if let Some(slot) = self.pool().slot_mut(index) {
            slot.state = TunnelState::Active;
            slot.provision_count += 1;
            slot.failed_probe_at = None;
            slot.draining_since = None;
            slot.stuck_alerted = false;
            slot.last_probe = self.config.verify_on_provision.then_some(now);
        }
    }

    fn free_slot(&self, index: usize) {
        if let Some(slot) = self.pool().slots.get_mut(index) {
            *slot = None;
        }
        self.released.notify_waiters();
    }

    pub(crate) fn finish_lease(&self, index: usize, serial: u64, healthy: bool) {
        let now = Instant::now();
        let mut pool = self.pool();
        let Some(slot) = pool.slot_mut(index) else { return };
        if slot.borrower != Some(serial) {
            return;
        }
        slot.borrower = None;

        if healthy {
            let draining = slot.state == TunnelState::Draining;
            drop(pool);
            if draining {
                self.wake_maintenance.notify_one();
            }
            self.released.notify_waiters();
            return;
        }

        slot.begin_draining(now);
        let id = slot.config.id.clone();
        let interface = slot.plan.interface().to_string();
        *pool.faults.entry(id.clone()).or_insert(0) += 1;
        drop(pool);

        warn!(tunnel_id = %id, interface = %interface, "Tunnel released as unhealthy");
        self.emit(PipelineEvent::TunnelUnhealthy {
            tunnel_id: id,
            interface,
            reason: "fault observed by borrower".to_string(),
        });
        self.wake_maintenance.notify_one();
    }

    fn probe_failed(&self, index: usize, serial: Option<u64>, error: &HostError) {
        let now = Instant::now();
        let mut pool = self.pool();
        let Some(slot) = pool.slot_mut(index) else { return };
        if serial.is_some() && slot.borrower != serial {
            return;
        }
        slot.failed_probe_at = Some(now);
        slot.begin_draining(now);
        let id = slot.config.id.clone();
        let interface = slot.plan.interface().to_string();
        drop(pool);

        warn!(tunnel_id = %id, interface = %interface, error = %error, "Tunnel failed health check");
        self.emit(PipelineEvent::TunnelUnhealthy {
            tunnel_id: id,
            interface,
            reason: error.to_string(),
        });
        self.wake_maintenance.notify_one();
    }

    async fn run_maintenance(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.maintenance_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake_maintenance.notified() => {}
                _ = ticker.tick() => {}
            }
            self.maintain().await;
        }
        debug!("Tunnel maintenance loop stopped");
    }

    async fn maintain(self: &Arc<Self>) {
        self.recycle_drained().await;
        self.check_stuck();
        self.probe_idle().await;
        self.warm_up().await;
    }

    /// Tears down drained tunnels nobody holds and provisions replacements.
    async fn recycle_drained(self: &Arc<Self>) {
        let drained: Vec<(usize, TunnelId, RoutingPlan)> = self
            .pool()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let slot = slot.as_ref()?;
                (slot.state == TunnelState::Draining && slot.borrower.is_none())
                    .then(|| (i, slot.config.id.clone(), slot.plan.clone()))
            })
            .collect();

        for (index, id, plan) in drained {
            if self.shutdown.is_cancelled() {
                return;
            }

            let teardown = {
                let _host = self.host_lock.lock().await;
                plan.teardown(&*self.host).await
            };
            if let Err(e) = teardown {
                warn!(tunnel_id = %id, interface = plan.interface(), error = %e, "Teardown failed, will retry");
                continue;
            }

            if let Some(slot) = self.pool().slot_mut(index) {
                slot.state = TunnelState::Destroyed;
            }
            info!(tunnel_id = %id, interface = plan.interface(), "Tunnel torn down");
            self.emit(PipelineEvent::TunnelDestroyed {
                tunnel_id: id.clone(),
                interface: plan.interface().to_string(),
            });

            if self.prepare_replacement(index, &id) {
                if let Err(e) = Arc::clone(self).provision_slot(index).await {
                    warn!(tunnel_id = %id, error = %e, "Replacement tunnel failed");
                }
            } else {
                self.free_slot(index);
            }
        }
    }

    /// Resets a destroyed slot for re-provisioning with the current config.
    fn prepare_replacement(&self, index: usize, id: &TunnelId) -> bool {
        let Some(config) = self.store.get(id) else {
            info!(tunnel_id = %id, "Tunnel no longer configured, not replacing");
            return false;
        };

        let mut pool = self.pool();
        let interface = self.interface_name(&config, index);
        if !pool.admits(&config, &interface, Some(index)) {
            return false;
        }
        let table = self.config.table_base + index as u32;
        let plan = RoutingPlan::build(&config, &interface, table, self.config.firewall);
        let Some(slot) = pool.slot_mut(index) else { return false };
        let provision_count = slot.provision_count;
        *slot = Slot::new(config, plan);
        slot.provision_count = provision_count;
        true
    }

    fn check_stuck(&self) {
        let deadline = self.config.drain_deadline();
        let now = Instant::now();
        let mut stuck = Vec::new();
        {
            let mut pool = self.pool();
            for slot in pool.slots.iter_mut().flatten() {
                let overdue = slot.state == TunnelState::Draining
                    && !slot.stuck_alerted
                    && slot
                        .draining_since
                        .is_some_and(|since| now.duration_since(since) > deadline);
                if overdue {
                    slot.stuck_alerted = true;
                    stuck.push((slot.config.id.clone(), slot.borrower.is_some()));
                }
            }
        }

        for (id, leased) in stuck {
            let message = if leased {
                format!("Tunnel draining for over {}s, still leased", deadline.as_secs())
            } else {
                format!("Tunnel draining for over {}s, teardown keeps failing", deadline.as_secs())
            };
            self.alert(AlertKind::TeardownStuck, Some(id), message);
        }
    }

    async fn probe_idle(&self) {
        let interval = self.config.health_check_interval();
        let now = Instant::now();
        let due: Vec<(usize, String, IpAddr)> = self
            .pool()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let slot = slot.as_ref()?;
                let idle = slot.state == TunnelState::Active && slot.borrower.is_none();
                let stale = slot
                    .last_probe
                    .map_or(true, |at| now.duration_since(at) >= interval);
                (idle && stale).then(|| (i, slot.plan.interface().to_string(), slot.config.address.addr()))
            })
            .collect();

        for (index, interface, source) in due {
            let result = self
                .host
                .probe(
                    &interface,
                    source,
                    self.config.probe_target,
                    self.config.health_check_timeout(),
                )
                .await;
            match result {
                Ok(()) => {
                    if let Some(slot) = self.pool().slot_mut(index) {
                        slot.last_probe = Some(Instant::now());
                    }
                }
                Err(e) => self.probe_failed(index, None, &e),
            }
        }
    }

    /// Keeps `warm_tunnels` tunnels up ahead of demand.
    async fn warm_up(self: &Arc<Self>) {
        loop {
            let ready = self
                .pool()
                .installed()
                .filter(|s| matches!(s.state, TunnelState::Active | TunnelState::Provisioning))
                .count();
            if ready >= self.config.warm_tunnels || self.shutdown.is_cancelled() {
                return;
            }
            let Some(index) = self.reserve_slot(&[], true) else { return };
            if let Err(e) = Arc::clone(self).provision_slot(index).await {
                warn!(error = %e, "Warm-up provisioning failed");
                return;
            }
        }
    }
}
