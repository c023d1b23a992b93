use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Render unix millis as RFC 3339 UTC with millisecond precision.
pub fn format_ms(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

/// Parse an RFC 3339 timestamp (any offset) into unix millis.
pub fn parse_rfc3339(s: &str) -> Option<Ms> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.timestamp_millis())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    HoldCreated,
    Confirmed,
    Cancelled,
    Expired,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::HoldCreated => "HOLD_CREATED",
            HoldStatus::Confirmed => "CONFIRMED",
            HoldStatus::Cancelled => "CANCELLED",
            HoldStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOLD_CREATED" => Some(HoldStatus::HoldCreated),
            "CONFIRMED" => Some(HoldStatus::Confirmed),
            "CANCELLED" => Some(HoldStatus::Cancelled),
            "EXPIRED" => Some(HoldStatus::Expired),
            _ => None,
        }
    }

    /// Statuses that take part in the per-room exclusion constraint.
    pub fn is_active(&self) -> bool {
        matches!(self, HoldStatus::HoldCreated | HoldStatus::Confirmed)
    }

    /// `HOLD_CREATED → {CONFIRMED, CANCELLED, EXPIRED}`, `CONFIRMED → CANCELLED`.
    pub fn can_transition_to(&self, next: HoldStatus) -> bool {
        matches!(
            (self, next),
            (HoldStatus::HoldCreated, HoldStatus::Confirmed)
                | (HoldStatus::HoldCreated, HoldStatus::Cancelled)
                | (HoldStatus::HoldCreated, HoldStatus::Expired)
                | (HoldStatus::Confirmed, HoldStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookable room as seen through the catalog. Read-only to the hold engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_type: String,
    pub active: bool,
}

/// One allocated hold. Never deleted; terminal rows are kept for audit and replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_id: Ulid,
    pub guest_name: String,
    pub guest_phone: String,
    pub stay: Span,
    pub status: HoldStatus,
    pub created_at: Ms,
    pub expires_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub expired_at: Option<Ms>,
    pub updated_at: Option<Ms>,
}

impl Hold {
    /// Whether this hold makes its room unavailable for an overlapping stay at `now`.
    pub fn blocks(&self, now: Ms) -> bool {
        match self.status {
            HoldStatus::Confirmed => true,
            HoldStatus::HoldCreated => self.expires_at > now,
            HoldStatus::Cancelled | HoldStatus::Expired => false,
        }
    }

    /// Still `HOLD_CREATED` but past its expiry.
    pub fn is_overdue(&self, now: Ms) -> bool {
        self.status == HoldStatus::HoldCreated && self.expires_at <= now
    }

    pub fn apply_status(&mut self, status: HoldStatus, at: Ms) {
        self.status = status;
        self.updated_at = Some(at);
        match status {
            HoldStatus::Confirmed => self.confirmed_at = Some(at),
            HoldStatus::Cancelled => self.cancelled_at = Some(at),
            HoldStatus::Expired => self.expired_at = Some(at),
            HoldStatus::HoldCreated => {}
        }
    }
}

/// All holds allocated on one room, sorted by `stay.start`.
#[derive(Debug, Clone)]
pub struct RoomLedger {
    pub room_id: Ulid,
    pub holds: Vec<Hold>,
}

impl RoomLedger {
    pub fn new(room_id: Ulid) -> Self {
        Self {
            room_id,
            holds: Vec::new(),
        }
    }

    /// Insert hold maintaining sort order by stay start.
    pub fn insert_hold(&mut self, hold: Hold) {
        let pos = self
            .holds
            .binary_search_by_key(&hold.stay.start, |h| h.stay.start)
            .unwrap_or_else(|e| e);
        self.holds.insert(pos, hold);
    }

    pub fn hold(&self, id: &Ulid) -> Option<&Hold> {
        self.holds.iter().find(|h| h.id == *id)
    }

    pub fn hold_mut(&mut self, id: &Ulid) -> Option<&mut Hold> {
        self.holds.iter_mut().find(|h| h.id == *id)
    }

    /// Holds whose stay overlaps the query window.
    /// Binary search skips holds starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Hold> {
        let right_bound = self.holds.partition_point(|h| h.stay.start < query.end);
        self.holds[..right_bound]
            .iter()
            .filter(move |h| h.stay.end > query.start)
    }

    /// First hold that makes `stay` unavailable at `now`, if any.
    pub fn conflicting(&self, stay: &Span, now: Ms) -> Option<&Hold> {
        self.overlapping(stay).find(|h| h.blocks(now))
    }

    /// Holds in `HOLD_CREATED` or `CONFIRMED`, overdue or not.
    pub fn active_count(&self) -> usize {
        self.holds.iter().filter(|h| h.status.is_active()).count()
    }

    pub fn has_overdue(&self, now: Ms) -> bool {
        self.holds.iter().any(|h| h.is_overdue(now))
    }
}

/// Scope-qualified idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub scope: String,
    pub key: String,
}

impl IdempotencyKey {
    pub fn new(scope: &str, key: &str) -> Self {
        Self {
            scope: scope.to_string(),
            key: key.to_string(),
        }
    }

    /// Name of the advisory lock guarding this key.
    pub fn lock_name(&self) -> String {
        format!("{}:{}", self.scope, self.key)
    }
}

/// Stored outcome of the first successful call for an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub request_hash: String,
    /// Serialized response, returned verbatim on replay.
    pub response: String,
}

/// The event types. A committed transaction is one WAL frame of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HoldPlaced {
        hold: Hold,
    },
    HoldStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: HoldStatus,
        at: Ms,
    },
    IdempotencyRecorded {
        key: IdempotencyKey,
        record: IdempotencyRecord,
    },
}

// ── Request / response types ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHoldRequest {
    /// Unparsed; validated after the idempotency check.
    pub hotel_id: String,
    pub guest_name: String,
    pub guest_phone: String,
    pub check_in: Ms,
    pub check_out: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldResponse {
    pub hold_id: String,
    pub room_id: String,
    pub status: HoldStatus,
    pub expires_at: String,
}

impl HoldResponse {
    pub fn from_hold(hold: &Hold) -> Self {
        Self {
            hold_id: hold.id.to_string(),
            room_id: hold.room_id.to_string(),
            status: hold.status,
            expires_at: format_ms(hold.expires_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(start: Ms, end: Ms, status: HoldStatus, expires_at: Ms) -> Hold {
        Hold {
            id: Ulid::new(),
            hotel_id: Ulid::new(),
            room_id: Ulid::new(),
            guest_name: "Ann".into(),
            guest_phone: "+100".into(),
            stay: Span::new(start, end),
            status,
            created_at: 0,
            expires_at,
            confirmed_at: None,
            cancelled_at: None,
            expired_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert_eq!(a.duration_ms(), 100);
    }

    #[test]
    fn status_transitions() {
        use HoldStatus::*;
        assert!(HoldCreated.can_transition_to(Confirmed));
        assert!(HoldCreated.can_transition_to(Cancelled));
        assert!(HoldCreated.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Cancelled));

        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Confirmed.can_transition_to(Confirmed));
        for terminal in [Cancelled, Expired] {
            for next in [HoldCreated, Confirmed, Cancelled, Expired] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn status_text_roundtrip() {
        for s in [
            HoldStatus::HoldCreated,
            HoldStatus::Confirmed,
            HoldStatus::Cancelled,
            HoldStatus::Expired,
        ] {
            assert_eq!(HoldStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(HoldStatus::parse("confirmed"), Some(HoldStatus::Confirmed));
        assert_eq!(HoldStatus::parse("BOOKED"), None);
        assert_eq!(
            serde_json::to_string(&HoldStatus::HoldCreated).unwrap(),
            "\"HOLD_CREATED\""
        );
    }

    #[test]
    fn blocking_respects_expiry() {
        let now = 1_000;
        assert!(hold(0, 10, HoldStatus::HoldCreated, now + 1).blocks(now));
        assert!(!hold(0, 10, HoldStatus::HoldCreated, now).blocks(now));
        assert!(hold(0, 10, HoldStatus::Confirmed, 0).blocks(now));
        assert!(!hold(0, 10, HoldStatus::Cancelled, now + 1).blocks(now));
        assert!(!hold(0, 10, HoldStatus::Expired, now + 1).blocks(now));

        assert!(hold(0, 10, HoldStatus::HoldCreated, now).is_overdue(now));
        assert!(!hold(0, 10, HoldStatus::Confirmed, 0).is_overdue(now));
    }

    #[test]
    fn apply_status_sets_markers() {
        let mut h = hold(0, 10, HoldStatus::HoldCreated, 50);
        h.apply_status(HoldStatus::Confirmed, 20);
        assert_eq!(h.confirmed_at, Some(20));
        assert_eq!(h.updated_at, Some(20));
        h.apply_status(HoldStatus::Cancelled, 30);
        assert_eq!(h.cancelled_at, Some(30));
        assert_eq!(h.confirmed_at, Some(20));
        assert_eq!(h.expired_at, None);
        assert_eq!(h.updated_at, Some(30));
    }

    #[test]
    fn ledger_keeps_stay_order() {
        let mut ledger = RoomLedger::new(Ulid::new());
        ledger.insert_hold(hold(300, 400, HoldStatus::Confirmed, 0));
        ledger.insert_hold(hold(100, 200, HoldStatus::Confirmed, 0));
        ledger.insert_hold(hold(200, 300, HoldStatus::Confirmed, 0));
        let starts: Vec<Ms> = ledger.holds.iter().map(|h| h.stay.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn ledger_overlapping_skips_adjacent() {
        let mut ledger = RoomLedger::new(Ulid::new());
        ledger.insert_hold(hold(100, 200, HoldStatus::Confirmed, 0));
        ledger.insert_hold(hold(450, 600, HoldStatus::Confirmed, 0));
        ledger.insert_hold(hold(1000, 1100, HoldStatus::Confirmed, 0));

        let hits: Vec<_> = ledger.overlapping(&Span::new(200, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stay, Span::new(450, 600));
    }

    #[test]
    fn ledger_conflict_ignores_inactive_and_overdue() {
        let now = 5_000;
        let mut ledger = RoomLedger::new(Ulid::new());
        ledger.insert_hold(hold(0, 100, HoldStatus::Cancelled, now + 10));
        ledger.insert_hold(hold(0, 100, HoldStatus::Expired, now + 10));
        ledger.insert_hold(hold(0, 100, HoldStatus::HoldCreated, now));
        assert!(ledger.conflicting(&Span::new(50, 150), now).is_none());
        assert!(ledger.has_overdue(now));

        ledger.insert_hold(hold(90, 120, HoldStatus::HoldCreated, now + 1));
        let blocker = ledger.conflicting(&Span::new(50, 150), now).unwrap();
        assert_eq!(blocker.stay, Span::new(90, 120));
    }

    #[test]
    fn timestamps_render_with_millis() {
        assert_eq!(format_ms(1_769_947_200_000), "2026-02-01T12:00:00.000Z");
        assert_eq!(
            parse_rfc3339("2026-02-01T12:00:00Z"),
            Some(1_769_947_200_000)
        );
        assert_eq!(
            parse_rfc3339("2026-02-01T14:00:00+02:00"),
            Some(1_769_947_200_000)
        );
        assert_eq!(parse_rfc3339("yesterday"), None);
    }

    #[test]
    fn response_serializes_camel_case() {
        let h = hold(0, 10, HoldStatus::HoldCreated, 1_769_947_200_000);
        let json = serde_json::to_value(HoldResponse::from_hold(&h)).unwrap();
        assert_eq!(json["status"], "HOLD_CREATED");
        assert_eq!(json["expiresAt"], "2026-02-01T12:00:00.000Z");
        assert_eq!(json["holdId"], h.id.to_string());
        assert_eq!(json["roomId"], h.room_id.to_string());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::HoldPlaced {
            hold: hold(0, 10, HoldStatus::HoldCreated, 99),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
