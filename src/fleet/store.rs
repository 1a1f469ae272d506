//! Fleet state store
//!
//! [`FleetStore`] is a cheap, cloneable handle to the single authoritative
//! fleet state. Mutations are applied under a short write lock and are visible
//! to readers as soon as the call returns. Every mutation bumps a revision
//! counter that consumers can watch through [`FleetStore::subscribe`].

use super::alerts::AlertBuffer;
use crate::protocol::{
    AnomalyReport, PipeEnvironment, RobotState, RobotStatus, SeverityLevel,
};
use crate::transport::ConnectionStatus;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct FleetState {
    robots: HashMap<String, RobotState>,
    alerts: AlertBuffer,
    environment: HashMap<String, PipeEnvironment>,
    heartbeats: HashMap<String, u64>,
    connection_status: ConnectionStatus,
    selected_robot_id: Option<String>,
}

/// Handle to the process-wide fleet state
#[derive(Clone)]
pub struct FleetStore {
    state: Arc<RwLock<FleetState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FleetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetStore")
            .field("revision", &self.revision())
            .finish()
    }
}

impl FleetStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(FleetState::default())),
            revision: Arc::new(revision),
        }
    }

    // Every write replaces whole values, so a poisoned lock still guards
    // consistent state.
    fn read(&self) -> RwLockReadGuard<'_, FleetState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write<R>(&self, mutate: impl FnOnce(&mut FleetState) -> R) -> R {
        let result = {
            let mut state: RwLockWriteGuard<'_, FleetState> = self
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            mutate(&mut state)
        };
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
        result
    }

    /// Insert or fully replace the entry for `state.id`
    pub fn update_robot(&self, state: RobotState) {
        self.write(|fleet| {
            fleet.robots.insert(state.id.clone(), state);
        });
    }

    /// Remove a robot; returns the removed entry, if any
    pub fn remove_robot(&self, id: &str) -> Option<RobotState> {
        self.write(|fleet| fleet.robots.remove(id))
    }

    /// Prepend an alert, evicting the oldest past the cap
    pub fn add_alert(&self, report: AnomalyReport) -> Option<AnomalyReport> {
        self.write(|fleet| fleet.alerts.push(report))
    }

    /// Local-only: never sent back to the broker
    pub fn dismiss_alert(&self, id: &str) -> bool {
        self.write(|fleet| fleet.alerts.dismiss(id))
    }

    /// Local-only: never sent back to the broker
    pub fn acknowledge_alert(&self, id: &str) -> bool {
        self.write(|fleet| fleet.alerts.acknowledge(id))
    }

    /// Insert or fully replace the entry for `reading.section_id`
    pub fn update_environment(&self, reading: PipeEnvironment) {
        self.write(|fleet| {
            fleet.environment.insert(reading.section_id.clone(), reading);
        });
    }

    /// Record the last-seen time for a robot
    pub fn update_heartbeat(&self, robot_id: &str, timestamp: u64) {
        self.write(|fleet| {
            fleet.heartbeats.insert(robot_id.to_string(), timestamp);
        });
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.write(|fleet| fleet.connection_status = status);
    }

    /// Advisory selection; the id need not name a known robot
    pub fn set_selected_robot_id(&self, id: Option<String>) {
        self.write(|fleet| fleet.selected_robot_id = id);
    }

    pub fn robot(&self, id: &str) -> Option<RobotState> {
        self.read().robots.get(id).cloned()
    }

    pub fn robot_count(&self) -> usize {
        self.read().robots.len()
    }

    pub fn alerts(&self) -> Vec<AnomalyReport> {
        self.read().alerts.to_vec()
    }

    pub fn heartbeat(&self, robot_id: &str) -> Option<u64> {
        self.read().heartbeats.get(robot_id).copied()
    }

    pub fn environment(&self, section_id: &str) -> Option<PipeEnvironment> {
        self.read().environment.get(section_id).cloned()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.read().connection_status
    }

    pub fn selected_robot_id(&self) -> Option<String> {
        self.read().selected_robot_id.clone()
    }

    /// Number of mutations applied so far
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Watch the revision counter to learn about changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Consistent copy of the whole state
    pub fn snapshot(&self) -> FleetSnapshot {
        let revision = self.revision();
        let state = self.read();
        FleetSnapshot {
            robots: state.robots.clone(),
            alerts: state.alerts.to_vec(),
            environment: state.environment.clone(),
            heartbeats: state.heartbeats.clone(),
            connection_status: state.connection_status,
            selected_robot_id: state.selected_robot_id.clone(),
            revision,
        }
    }

    pub fn summary(&self) -> FleetSummary {
        self.snapshot().summary()
    }
}

/// Point-in-time copy of the fleet state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSnapshot {
    pub robots: HashMap<String, RobotState>,
    /// Newest first
    pub alerts: Vec<AnomalyReport>,
    pub environment: HashMap<String, PipeEnvironment>,
    pub heartbeats: HashMap<String, u64>,
    pub connection_status: ConnectionStatus,
    pub selected_robot_id: Option<String>,
    pub revision: u64,
}

impl FleetSnapshot {
    pub fn robot(&self, id: &str) -> Option<&RobotState> {
        self.robots.get(id)
    }

    /// The selected robot, if one is selected and currently known
    pub fn selected_robot(&self) -> Option<&RobotState> {
        self.selected_robot_id
            .as_deref()
            .and_then(|id| self.robots.get(id))
    }

    /// Robots whose last heartbeat is older than `timeout_ms` at `now_ms`,
    /// sorted by id. Robots that never sent a heartbeat are not listed.
    pub fn stale_robots(&self, now_ms: u64, timeout_ms: u64) -> Vec<&str> {
        let mut stale: Vec<&str> = self
            .heartbeats
            .iter()
            .filter(|&(_, &last_seen)| now_ms.saturating_sub(last_seen) > timeout_ms)
            .map(|(id, _)| id.as_str())
            .collect();
        stale.sort_unstable();
        stale
    }

    pub fn unacknowledged_alerts(&self) -> impl Iterator<Item = &AnomalyReport> {
        self.alerts.iter().filter(|alert| !alert.acknowledged)
    }

    /// Sections with a reading over an alert threshold, sorted by id
    pub fn hazardous_sections(&self) -> Vec<&PipeEnvironment> {
        let mut sections: Vec<&PipeEnvironment> = self
            .environment
            .values()
            .filter(|reading| reading.is_hazardous())
            .collect();
        sections.sort_by(|a, b| a.section_id.cmp(&b.section_id));
        sections
    }

    pub fn summary(&self) -> FleetSummary {
        let mut by_status = StatusCounts::default();
        for robot in self.robots.values() {
            by_status.record(robot.status);
        }

        let mean_battery = if self.robots.is_empty() {
            None
        } else {
            let total: f64 = self.robots.values().map(|robot| robot.battery).sum();
            Some(total / self.robots.len() as f64)
        };

        FleetSummary {
            robot_count: self.robots.len(),
            by_status,
            mean_battery,
            unacknowledged_alerts: self.unacknowledged_alerts().count(),
            highest_open_severity: self.unacknowledged_alerts().map(|a| a.severity).max(),
            hazardous_sections: self.hazardous_sections().len(),
            connection_status: self.connection_status,
        }
    }
}

/// Robot counts per reported status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub active: usize,
    pub idle: usize,
    pub maintenance: usize,
    pub error: usize,
    pub offline: usize,
}

impl StatusCounts {
    fn record(&mut self, status: RobotStatus) {
        let slot = match status {
            RobotStatus::Active => &mut self.active,
            RobotStatus::Idle => &mut self.idle,
            RobotStatus::Maintenance => &mut self.maintenance,
            RobotStatus::Error => &mut self.error,
            RobotStatus::Offline => &mut self.offline,
        };
        *slot += 1;
    }
}

/// Aggregate view for overview panels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSummary {
    pub robot_count: usize,
    pub by_status: StatusCounts,
    pub mean_battery: Option<f64>,
    pub unacknowledged_alerts: usize,
    pub highest_open_severity: Option<SeverityLevel>,
    pub hazardous_sections: usize,
    pub connection_status: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AnomalyType, Position, RobotType};
    use proptest::prelude::*;

    fn robot(id: &str, battery: f64) -> RobotState {
        let mut state = RobotState::new(id, format!("Robot {id}"), RobotType::Rover);
        state.battery = battery;
        state
    }

    fn alert(id: &str, severity: SeverityLevel) -> AnomalyReport {
        AnomalyReport {
            id: id.to_string(),
            anomaly_type: AnomalyType::Leak,
            severity,
            position: Position::origin(),
            section_id: "PIPE-001".to_string(),
            detected_by: "RV-001".to_string(),
            confidence: 0.9,
            description: "H2 above threshold".to_string(),
            timestamp: 0,
            acknowledged: false,
        }
    }

    fn reading(section_id: &str, h2: f64) -> PipeEnvironment {
        PipeEnvironment {
            section_id: section_id.to_string(),
            pressure: 50.0,
            temperature: 20.0,
            h2_concentration: h2,
            wall_thickness: 12.0,
            flow_rate: 400.0,
            humidity: 40.0,
            position: Position::origin(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_update_robot_replaces_whole_entry() {
        let store = FleetStore::new();
        store.update_robot(robot("RV-001", 87.0));

        let mut replacement = robot("RV-001", 40.0);
        replacement.name = "Rover Alpha".to_string();
        store.update_robot(replacement.clone());

        assert_eq!(store.robot_count(), 1);
        assert_eq!(store.robot("RV-001"), Some(replacement));
    }

    #[test]
    fn test_remove_robot() {
        let store = FleetStore::new();
        store.update_robot(robot("RV-001", 87.0));
        assert!(store.remove_robot("RV-001").is_some());
        assert!(store.remove_robot("RV-001").is_none());
        assert_eq!(store.robot_count(), 0);
    }

    #[test]
    fn test_alert_mutations() {
        let store = FleetStore::new();
        store.add_alert(alert("a1", SeverityLevel::Low));
        store.add_alert(alert("a2", SeverityLevel::High));

        assert!(store.acknowledge_alert("a2"));
        assert!(!store.acknowledge_alert("missing"));
        assert!(store.dismiss_alert("a1"));
        assert!(!store.dismiss_alert("a1"));

        let alerts = store.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].acknowledged);
    }

    #[test]
    fn test_heartbeat_environment_and_status() {
        let store = FleetStore::new();
        store.update_heartbeat("DR-002", 1000);
        store.update_heartbeat("DR-002", 2000);
        store.update_environment(reading("PIPE-001", 10.0));

        assert_eq!(store.heartbeat("DR-002"), Some(2000));
        assert_eq!(store.environment("PIPE-001").map(|r| r.h2_concentration), Some(10.0));
        assert_eq!(store.connection_status(), ConnectionStatus::Disconnected);

        store.set_connection_status(ConnectionStatus::Connected);
        assert_eq!(store.connection_status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_selection_may_reference_unknown_robot() {
        let store = FleetStore::new();
        store.set_selected_robot_id(Some("GHOST-9".to_string()));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.selected_robot_id.as_deref(), Some("GHOST-9"));
        assert!(snapshot.selected_robot().is_none());

        store.update_robot(robot("GHOST-9", 50.0));
        assert!(store.snapshot().selected_robot().is_some());

        store.set_selected_robot_id(None);
        assert!(store.selected_robot_id().is_none());
    }

    #[test]
    fn test_repeated_mutations_are_idempotent() {
        let store = FleetStore::new();
        for _ in 0..3 {
            store.update_robot(robot("RV-001", 87.0));
            store.add_alert(alert("a1", SeverityLevel::High));
            store.update_heartbeat("RV-001", 5000);
            store.acknowledge_alert("a1");
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.robots.len(), 1);
        assert_eq!(snapshot.alerts.len(), 1);
        assert_eq!(snapshot.heartbeats.len(), 1);
    }

    #[test]
    fn test_revision_and_subscribe() {
        let store = FleetStore::new();
        let mut rx = store.subscribe();
        assert_eq!(store.revision(), 0);

        store.update_heartbeat("RV-001", 1);
        assert_eq!(store.revision(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        // Clones share the same state
        let other = store.clone();
        other.update_heartbeat("RV-002", 1);
        assert_eq!(store.heartbeat("RV-002"), Some(1));
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_stale_robots() {
        let store = FleetStore::new();
        store.update_heartbeat("RV-001", 10_000);
        store.update_heartbeat("DR-002", 1_000);
        store.update_heartbeat("CR-001", 2_000);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.stale_robots(12_000, 5_000), vec!["CR-001", "DR-002"]);
        assert!(snapshot.stale_robots(12_000, 60_000).is_empty());
        // Heartbeats from the future are never stale
        assert!(snapshot.stale_robots(0, 0).is_empty());
    }

    #[test]
    fn test_summary() {
        let store = FleetStore::new();
        assert_eq!(store.summary().mean_battery, None);

        let mut idle = robot("DR-002", 40.0);
        idle.status = RobotStatus::Idle;
        let mut active = robot("RV-001", 80.0);
        active.status = RobotStatus::Active;
        store.update_robot(idle);
        store.update_robot(active);

        store.add_alert(alert("a1", SeverityLevel::Critical));
        store.add_alert(alert("a2", SeverityLevel::Medium));
        store.acknowledge_alert("a1");

        store.update_environment(reading("PIPE-001", 10.0));
        store.update_environment(reading("PIPE-002", 5_000.0));

        let summary = store.summary();
        assert_eq!(summary.robot_count, 2);
        assert_eq!(summary.by_status.active, 1);
        assert_eq!(summary.by_status.idle, 1);
        assert_eq!(summary.mean_battery, Some(60.0));
        assert_eq!(summary.unacknowledged_alerts, 1);
        assert_eq!(summary.highest_open_severity, Some(SeverityLevel::Medium));
        assert_eq!(summary.hazardous_sections, 1);

        let snapshot = store.snapshot();
        let hazardous = snapshot.hazardous_sections();
        assert_eq!(hazardous[0].section_id, "PIPE-002");
    }

    #[test]
    fn test_snapshot_serializes() {
        let store = FleetStore::new();
        store.update_robot(robot("RV-001", 87.0));
        let value = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(value["robots"]["RV-001"]["battery"], 87.0);
        assert_eq!(value["connection_status"], "disconnected");
    }

    proptest! {
        #[test]
        fn robots_keyed_by_id_last_write_wins(
            updates in prop::collection::vec((0usize..5, 0.0f64..100.0), 0..40)
        ) {
            let store = FleetStore::new();
            let mut expected: HashMap<String, f64> = HashMap::new();
            for (slot, battery) in &updates {
                let id = format!("RV-{slot:03}");
                store.update_robot(robot(&id, *battery));
                expected.insert(id, *battery);
            }

            let snapshot = store.snapshot();
            prop_assert_eq!(snapshot.robots.len(), expected.len());
            for (id, battery) in expected {
                prop_assert_eq!(snapshot.robots[&id].battery, battery);
            }
        }

        #[test]
        fn alert_count_never_exceeds_cap(count in 0usize..120) {
            let store = FleetStore::new();
            for i in 0..count {
                store.add_alert(alert(&format!("A{i}"), SeverityLevel::Info));
                prop_assert!(store.alerts().len() <= crate::fleet::MAX_ALERTS);
            }
            prop_assert_eq!(store.alerts().len(), count.min(crate::fleet::MAX_ALERTS));
        }
    }
}
