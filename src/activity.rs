use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityCategory, ActivityEvent, ActivityMetadata, AgentStatus, ServiceActivity,
};
use crate::persistence::{PersistOp, WriteBehind};
use crate::random::RandomSource;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const CATEGORY_ACTIONS: &[(ActivityCategory, &[&str])] = &[
    (
        ActivityCategory::Lead,
        &[
            "Processed 15 new leads",
            "Qualified inbound lead",
            "Enriched lead profile",
            "Scored overnight lead batch",
        ],
    ),
    (
        ActivityCategory::Call,
        &[
            "Completed customer inquiry",
            "Handled inbound support call",
            "Logged follow-up call",
        ],
    ),
    (
        ActivityCategory::Message,
        &[
            "Sent automated follow-up",
            "Replied to customer message",
            "Dispatched SMS reminder",
        ],
    ),
    (
        ActivityCategory::Appointment,
        &[
            "Booked discovery call",
            "Rescheduled client meeting",
            "Confirmed site visit",
        ],
    ),
    (
        ActivityCategory::Report,
        &["Generated monthly report", "Compiled pipeline summary"],
    ),
    (
        ActivityCategory::Workflow,
        &[
            "Automated invoice processing",
            "Updated CRM records",
            "Optimized workflow efficiency",
            "Classified 50 documents",
        ],
    ),
    (
        ActivityCategory::Analysis,
        &[
            "Analyzed market trends",
            "Detected anomaly in data",
            "Scored deal risk",
        ],
    ),
];

const INDUSTRIES: &[&str] = &[
    "Real Estate",
    "Healthcare",
    "Finance",
    "Insurance",
    "Logistics",
    "Retail",
    "Manufacturing",
    "Technology",
];

const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ACTIVE_SHARE: f64 = 0.7;
const UNASSIGNED_SOURCE: &str = "general";

fn random_tag(prefix: &str, len: usize, random: &dyn RandomSource) -> String {
    let mut tag = String::with_capacity(prefix.len() + 1 + len);
    tag.push_str(prefix);
    tag.push('-');
    for _ in 0..len {
        tag.push(ID_ALPHABET[random.index(ID_ALPHABET.len())] as char);
    }
    tag
}

/// Builds one synthetic event from the fixed vocabularies.
pub fn synthesize(
    sources: &[String],
    random: &dyn RandomSource,
    now: DateTime<Utc>,
) -> ActivityEvent {
    let (category, actions) = CATEGORY_ACTIONS[random.index(CATEGORY_ACTIONS.len())];
    let description = actions[random.index(actions.len())];
    let industry = INDUSTRIES[random.index(INDUSTRIES.len())];
    let source = if sources.is_empty() {
        UNASSIGNED_SOURCE.to_string()
    } else {
        sources[random.index(sources.len())].clone()
    };
    let status = if random.chance(ACTIVE_SHARE) {
        AgentStatus::Active
    } else {
        AgentStatus::Processing
    };
    let processing_ms = (random.next_f64() * 500.0).floor() as u32 + 50;
    let confidence = ((random.next_f64() * 20.0 + 80.0) * 10.0).round() / 10.0;

    ActivityEvent {
        id: Uuid::new_v4().to_string(),
        category,
        description: description.to_string(),
        source_ref: source,
        industry_ref: industry.to_string(),
        agent_id: random_tag("AGT", 6, random),
        client_ref: random_tag("CLI", 8, random),
        status,
        metadata: ActivityMetadata {
            processing_ms,
            confidence,
        },
        timestamp: now,
    }
}

/// Rolling window of the most recent events, newest first.
pub struct ActivityFeed {
    events: Mutex<VecDeque<ActivityEvent>>,
    cap: usize,
    writer: Arc<WriteBehind>,
}

impl ActivityFeed {
    pub fn new(cap: usize, writer: Arc<WriteBehind>) -> Self {
        let cap = cap.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
            writer,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Reloads the persisted window; falls back to an empty feed.
    pub fn restore(&self) -> usize {
        let loaded = match self.writer.adapter().recent_activity(self.cap) {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(error = %error, "activity history unavailable; starting empty");
                return 0;
            }
        };
        let Ok(mut events) = self.events.lock() else {
            return 0;
        };
        events.clear();
        // Loaded newest first; replay oldest first so ties keep their order.
        for event in loaded.into_iter().rev() {
            insert_sorted(&mut events, event);
        }
        events.truncate(self.cap);
        events.len()
    }

    /// Returns how many old entries were evicted.
    pub fn append(&self, event: ActivityEvent) -> AppResult<usize> {
        let mut events = self.events.lock().map_err(|_| AppError::poisoned("activity feed"))?;
        insert_sorted(&mut events, event.clone());
        let evicted = events.len().saturating_sub(self.cap);
        events.truncate(self.cap);
        self.writer.submit(PersistOp::Activity { event, cap: self.cap });
        Ok(evicted)
    }

    pub fn generate(
        &self,
        sources: &[String],
        random: &dyn RandomSource,
        now: DateTime<Utc>,
    ) -> AppResult<ActivityEvent> {
        let event = synthesize(sources, random, now);
        self.append(event.clone())?;
        Ok(event)
    }

    pub fn recent(&self, limit: usize) -> AppResult<Vec<ActivityEvent>> {
        let events = self.events.lock().map_err(|_| AppError::poisoned("activity feed"))?;
        Ok(events.iter().take(limit).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active agents per source service seen at or after `since`.
    pub fn active_by_service(&self, since: DateTime<Utc>) -> AppResult<Vec<ServiceActivity>> {
        let events = self.events.lock().map_err(|_| AppError::poisoned("activity feed"))?;
        let mut grouped: BTreeMap<&str, ServiceActivity> = BTreeMap::new();
        let active = events
            .iter()
            .filter(|event| event.timestamp >= since && event.status == AgentStatus::Active);
        for event in active {
            let entry = grouped
                .entry(event.source_ref.as_str())
                .or_insert_with(|| ServiceActivity {
                    service_ref: event.source_ref.clone(),
                    active_agents: 0,
                    last_seen: event.timestamp,
                });
            entry.active_agents += 1;
            entry.last_seen = entry.last_seen.max(event.timestamp);
        }
        Ok(grouped.into_values().collect())
    }
}

/// Newest first; an event stamped equal to existing ones goes in front of them.
fn insert_sorted(events: &mut VecDeque<ActivityEvent>, event: ActivityEvent) {
    let position = events
        .iter()
        .position(|existing| existing.timestamp <= event.timestamp)
        .unwrap_or(events.len());
    events.insert(position, event);
}

#[cfg(test)]
mod tests {
    use super::{synthesize, ActivityFeed, CATEGORY_ACTIONS, INDUSTRIES};
    use crate::clock::{Clock, ManualClock};
    use crate::models::AgentStatus;
    use crate::persistence::{MemoryAdapter, PersistenceAdapter, WriteBehind};
    use crate::random::{ScriptedRandom, SeededRandom};
    use chrono::Duration;
    use std::sync::Arc;

    fn sources() -> Vec<String> {
        vec!["lead_acquisition".to_string(), "deal_analysis".to_string()]
    }

    fn memory_feed(cap: usize) -> ActivityFeed {
        ActivityFeed::new(cap, Arc::new(WriteBehind::inline(Arc::new(MemoryAdapter::new()))))
    }

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let clock = ManualClock::fixed();
        let adapter = Arc::new(MemoryAdapter::new());
        let feed = ActivityFeed::new(12, Arc::new(WriteBehind::inline(adapter.clone())));
        let random = SeededRandom::new(3);
        let mut ids = Vec::new();

        for _ in 0..15 {
            clock.advance(Duration::seconds(1));
            ids.push(feed.generate(&sources(), &random, clock.now()).expect("generate").id);
        }

        assert_eq!(feed.len(), 12);
        let recent = feed.recent(100).expect("recent");
        let expected: Vec<_> = ids.iter().rev().take(12).cloned().collect();
        let actual: Vec<_> = recent.iter().map(|event| event.id.clone()).collect();
        assert_eq!(actual, expected);
        assert!(recent.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));

        let persisted = adapter.recent_activity(100).expect("persisted");
        assert_eq!(persisted.len(), 12);
        assert_eq!(persisted[0].id, expected[0]);
    }

    #[test]
    fn append_reports_evictions() {
        let clock = ManualClock::fixed();
        let feed = memory_feed(2);
        let random = SeededRandom::new(5);
        let mut evicted = 0;
        for _ in 0..5 {
            clock.advance(Duration::seconds(1));
            evicted += feed.append(synthesize(&sources(), &random, clock.now())).expect("append");
        }
        assert_eq!(evicted, 3);
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn late_arrivals_are_ordered_by_timestamp() {
        let clock = ManualClock::fixed();
        let feed = memory_feed(3);
        let random = SeededRandom::new(9);
        let base = clock.now();

        let newest = synthesize(&sources(), &random, base + Duration::seconds(10));
        let middle = synthesize(&sources(), &random, base + Duration::seconds(5));
        let oldest = synthesize(&sources(), &random, base);
        let stale = synthesize(&sources(), &random, base - Duration::seconds(5));
        for event in [middle.clone(), newest.clone(), oldest.clone(), stale] {
            feed.append(event).expect("append");
        }

        let ids: Vec<_> = feed
            .recent(10)
            .expect("recent")
            .into_iter()
            .map(|event| event.id)
            .collect();
        assert_eq!(ids, vec![newest.id, middle.id, oldest.id]);
    }

    #[test]
    fn restore_keeps_order_of_same_instant_events() {
        let clock = ManualClock::fixed();
        let adapter = Arc::new(MemoryAdapter::new());
        let feed = ActivityFeed::new(10, Arc::new(WriteBehind::inline(adapter.clone())));
        let random = SeededRandom::new(13);
        for _ in 0..4 {
            feed.generate(&sources(), &random, clock.now()).expect("generate");
        }
        let before = feed.recent(10).expect("recent");

        let restored = ActivityFeed::new(10, Arc::new(WriteBehind::inline(adapter)));
        assert_eq!(restored.restore(), 4);
        assert_eq!(restored.recent(10).expect("recent"), before);
    }

    #[test]
    fn synthesized_events_come_from_the_vocabularies() {
        let clock = ManualClock::fixed();
        let random = SeededRandom::new(21);
        for _ in 0..200 {
            let event = synthesize(&sources(), &random, clock.now());
            let (_, actions) = CATEGORY_ACTIONS
                .iter()
                .find(|(category, _)| *category == event.category)
                .expect("known category");
            assert!(actions.contains(&event.description.as_str()));
            assert!(INDUSTRIES.contains(&event.industry_ref.as_str()));
            assert!(sources().contains(&event.source_ref));
            assert!(event.agent_id.starts_with("AGT-") && event.agent_id.len() == 10);
            assert!(event.client_ref.starts_with("CLI-") && event.client_ref.len() == 12);
            assert!((50..550).contains(&event.metadata.processing_ms));
            assert!((80.0..=100.0).contains(&event.metadata.confidence));
        }
    }

    #[test]
    fn active_agents_are_grouped_by_service_within_window() {
        let clock = ManualClock::fixed();
        let feed = memory_feed(20);
        let start = clock.now();

        // category, action, industry, source, status(active), processing, confidence
        let active_lead = ScriptedRandom::new([0.0, 0.0, 0.0, 0.0, 0.1, 0.5, 0.5], 0.0);
        feed.append(synthesize(&sources(), &active_lead, start - Duration::seconds(600)))
            .expect("old event");
        for offset in [10, 20] {
            let random = ScriptedRandom::new([0.0, 0.0, 0.0, 0.0, 0.1, 0.5, 0.5], 0.0);
            feed.append(synthesize(&sources(), &random, start + Duration::seconds(offset)))
                .expect("recent event");
        }
        let processing = ScriptedRandom::new([0.0, 0.0, 0.0, 0.9, 0.95, 0.5, 0.5], 0.0);
        let processing_event = synthesize(&sources(), &processing, start + Duration::seconds(30));
        assert_eq!(processing_event.status, AgentStatus::Processing);
        feed.append(processing_event).expect("processing event");

        let grouped = feed.active_by_service(start - Duration::seconds(300)).expect("grouped");
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].service_ref, "lead_acquisition");
        assert_eq!(grouped[0].active_agents, 2);
        assert_eq!(grouped[0].last_seen, start + Duration::seconds(20));
    }
}
