use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::models::{MacAddress, PresenceRecord};

/// Share of online observations a service must appear in to count as consistent
const CONSISTENT_SERVICE_RATIO: f64 = 0.8;

/// Missing hours between two peak hours that make a multi-hour gap
const MULTI_HOUR_GAP: u32 = 2;

/// Role inferred from presence behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorClass {
    Infrastructure,
    Server,
    Iot,
    Workstation,
    Portable,
    Mobile,
    Guest,
    Unknown,
}

impl BehaviorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorClass::Infrastructure => "infrastructure",
            BehaviorClass::Server => "server",
            BehaviorClass::Iot => "iot",
            BehaviorClass::Workstation => "workstation",
            BehaviorClass::Portable => "portable",
            BehaviorClass::Mobile => "mobile",
            BehaviorClass::Guest => "guest",
            BehaviorClass::Unknown => "unknown",
        }
    }

    /// Decision table over uptime percentage and daily rhythm.
    pub fn from_uptime(uptime_percent: f64, daily: bool) -> Self {
        let pick = |with_rhythm, without| if daily { with_rhythm } else { without };
        if uptime_percent >= 95.0 {
            BehaviorClass::Infrastructure
        } else if uptime_percent >= 85.0 {
            pick(BehaviorClass::Server, BehaviorClass::Iot)
        } else if uptime_percent >= 50.0 {
            pick(BehaviorClass::Workstation, BehaviorClass::Portable)
        } else if uptime_percent >= 20.0 {
            pick(BehaviorClass::Portable, BehaviorClass::Mobile)
        } else if uptime_percent >= 5.0 {
            BehaviorClass::Mobile
        } else {
            BehaviorClass::Guest
        }
    }
}

impl fmt::Display for BehaviorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence profile of one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorProfile {
    pub mac: MacAddress,
    /// Most recent observations, oldest first
    pub history: VecDeque<PresenceRecord>,
    /// Every observation ever recorded, including ones trimmed from history
    pub observation_count: u64,
    pub uptime_percent: f64,
    /// Local hours (0-23) of peak online presence, ascending
    pub peak_hours: Vec<u32>,
    pub has_daily_pattern: bool,
    pub classification: BehaviorClass,
    pub consistent_services: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
}

impl BehaviorProfile {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            history: VecDeque::new(),
            observation_count: 0,
            uptime_percent: 0.0,
            peak_hours: Vec::new(),
            has_daily_pattern: false,
            classification: BehaviorClass::Unknown,
            consistent_services: BTreeSet::new(),
            last_updated: Utc::now(),
        }
    }

    /// Rebuild from durable history (oldest first) and the stored total count.
    pub fn from_history(
        mac: MacAddress,
        history: Vec<PresenceRecord>,
        observation_count: u64,
        history_limit: usize,
    ) -> Self {
        let mut profile = Self::new(mac);
        let skip = history.len().saturating_sub(history_limit);
        profile.history = history.into_iter().skip(skip).collect();
        profile.observation_count = observation_count.max(profile.history.len() as u64);
        if let Some(last) = profile.history.back() {
            profile.last_updated = last.timestamp;
        }
        profile
    }

    /// Append one observation, trimming the oldest beyond `history_limit`.
    pub fn push(&mut self, record: PresenceRecord, history_limit: usize) {
        self.last_updated = record.timestamp;
        self.history.push_back(record);
        while self.history.len() > history_limit {
            self.history.pop_front();
        }
        self.observation_count += 1;
    }

    /// Recompute every derived field from the retained history.
    pub fn recompute(&mut self, min_observations: u64, offset: FixedOffset) {
        let total = self.history.len();
        let online: Vec<&PresenceRecord> = self.history.iter().filter(|r| r.is_online).collect();

        self.uptime_percent = if total == 0 {
            0.0
        } else {
            online.len() as f64 / total as f64 * 100.0
        };
        self.peak_hours = peak_hours(&online, offset);
        self.has_daily_pattern = has_daily_pattern(&self.peak_hours);
        self.consistent_services = consistent_services(&online);
        self.classification = if self.observation_count < min_observations {
            BehaviorClass::Unknown
        } else {
            BehaviorClass::from_uptime(self.uptime_percent, self.has_daily_pattern)
        };
    }
}

/// Hours whose online count is at least half the busiest hour's count.
fn peak_hours(online: &[&PresenceRecord], offset: FixedOffset) -> Vec<u32> {
    let mut per_hour: BTreeMap<u32, usize> = BTreeMap::new();
    for record in online {
        let hour = record.timestamp.with_timezone(&offset).hour();
        *per_hour.entry(hour).or_default() += 1;
    }
    let max = per_hour.values().copied().max().unwrap_or(0);
    if max == 0 {
        return Vec::new();
    }
    per_hour
        .into_iter()
        .filter(|(_, count)| count * 2 >= max)
        .map(|(hour, _)| hour)
        .collect()
}

/// 2-16 peak hours with at most two multi-hour gaps between neighbours.
fn has_daily_pattern(peak_hours: &[u32]) -> bool {
    if !(2..=16).contains(&peak_hours.len()) {
        return false;
    }
    let gaps = peak_hours
        .windows(2)
        .filter(|pair| pair[1] - pair[0] - 1 >= MULTI_HOUR_GAP)
        .count();
    gaps <= 2
}

fn consistent_services(online: &[&PresenceRecord]) -> BTreeSet<String> {
    if online.is_empty() {
        return BTreeSet::new();
    }
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in online {
        let unique: BTreeSet<&str> = record.services.iter().map(String::as_str).collect();
        for service in unique {
            *counts.entry(service).or_default() += 1;
        }
    }
    let threshold = online.len() as f64 * CONSISTENT_SERVICE_RATIO;
    counts
        .into_iter()
        .filter(|(_, count)| *count as f64 >= threshold)
        .map(|(service, _)| service.to_string())
        .collect()
}
