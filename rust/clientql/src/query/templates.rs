//! Canned SQL statements the router selects between.
//!
//! Every template targets the same schema: `clients`, `schedule` and
//! `"contact-logs"`, joined on `client_id`. A template takes at most one
//! substitution, either a day count for its interval clause or a time bucket
//! for its `date_trunc` call.

use serde::Serialize;
use std::fmt;

/// Identifies one canned business question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    LateCancellations,
    NewMemberInactivity,
    CoachAttendanceRate,
    InactiveClients,
    MembershipExpiration,
    FollowUpDue,
    /// Fallback when no rule matches.
    RecentActivity,
}

impl TemplateId {
    pub const ALL: [TemplateId; 7] = [
        TemplateId::LateCancellations,
        TemplateId::NewMemberInactivity,
        TemplateId::CoachAttendanceRate,
        TemplateId::InactiveClients,
        TemplateId::MembershipExpiration,
        TemplateId::FollowUpDue,
        TemplateId::RecentActivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::LateCancellations => "late_cancellations",
            TemplateId::NewMemberInactivity => "new_member_inactivity",
            TemplateId::CoachAttendanceRate => "coach_attendance_rate",
            TemplateId::InactiveClients => "inactive_clients",
            TemplateId::MembershipExpiration => "membership_expiration",
            TemplateId::FollowUpDue => "follow_up_due",
            TemplateId::RecentActivity => "recent_activity",
        }
    }

    /// Day count used when the input carries none. `None` means the template
    /// has no interval parameter at all.
    pub fn default_day_count(&self) -> Option<u32> {
        match self {
            TemplateId::LateCancellations
            | TemplateId::MembershipExpiration
            | TemplateId::FollowUpDue => Some(30),
            TemplateId::InactiveClients => Some(60),
            TemplateId::NewMemberInactivity
            | TemplateId::CoachAttendanceRate
            | TemplateId::RecentActivity => None,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity for attendance-rate aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    #[default]
    Year,
    Month,
    Week,
}

impl TimeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Year => "year",
            TimeBucket::Month => "month",
            TimeBucket::Week => "week",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateParams {
    pub day_count: Option<u32>,
    pub time_bucket: Option<TimeBucket>,
}

/// Renders `id` with `params`. Missing parameters fall back to the
/// template defaults so the result never carries an open placeholder.
pub fn render(id: TemplateId, params: &TemplateParams) -> String {
    let days = params
        .day_count
        .or_else(|| id.default_day_count())
        .unwrap_or_default();
    let bucket = params.time_bucket.unwrap_or_default().as_str();

    match id {
        TemplateId::LateCancellations => format!(
            "SELECT c.client_id, c.first_name, c.last_name, c.email, c.phone,\n\
             \x20      COUNT(*) AS late_cancellations,\n\
             \x20      MAX(s.class_date) AS last_late_cancellation\n\
             FROM clients c\n\
             JOIN schedule s ON s.client_id = c.client_id\n\
             WHERE s.status = 'late_cancel'\n\
             \x20 AND s.class_date >= NOW() - INTERVAL '{days} days'\n\
             GROUP BY c.client_id, c.first_name, c.last_name, c.email, c.phone\n\
             ORDER BY late_cancellations DESC, last_late_cancellation DESC"
        ),
        TemplateId::NewMemberInactivity => "SELECT c.client_id, c.first_name, c.last_name, c.email, c.phone,\n\
             \x20      c.membership_type, c.membership_start\n\
             FROM clients c\n\
             WHERE c.membership_start >= NOW() - INTERVAL '30 days'\n\
             \x20 AND NOT EXISTS (\n\
             \x20   SELECT 1 FROM schedule s\n\
             \x20   WHERE s.client_id = c.client_id AND s.status = 'attended'\n\
             \x20 )\n\
             ORDER BY c.membership_start DESC"
            .to_string(),
        TemplateId::CoachAttendanceRate => format!(
            "SELECT s.coach_name,\n\
             \x20      DATE_TRUNC('{bucket}', s.class_date) AS period,\n\
             \x20      COUNT(*) AS booked,\n\
             \x20      COUNT(*) FILTER (WHERE s.status = 'attended') AS attended,\n\
             \x20      ROUND(100.0 * COUNT(*) FILTER (WHERE s.status = 'attended') / NULLIF(COUNT(*), 0), 2) AS attendance_rate\n\
             FROM schedule s\n\
             WHERE s.coach_name IS NOT NULL\n\
             GROUP BY s.coach_name, DATE_TRUNC('{bucket}', s.class_date)\n\
             ORDER BY period DESC, attendance_rate DESC"
        ),
        TemplateId::InactiveClients => format!(
            "SELECT c.client_id, c.first_name, c.last_name, c.email, c.phone, c.last_visit\n\
             FROM clients c\n\
             WHERE c.last_visit IS NULL\n\
             \x20  OR c.last_visit < NOW() - INTERVAL '{days} days'\n\
             ORDER BY c.last_visit ASC NULLS FIRST"
        ),
        TemplateId::MembershipExpiration => format!(
            "SELECT c.client_id, c.first_name, c.last_name, c.email, c.phone,\n\
             \x20      c.membership_type, c.membership_end\n\
             FROM clients c\n\
             WHERE c.membership_end BETWEEN NOW() AND NOW() + INTERVAL '{days} days'\n\
             ORDER BY c.membership_end ASC"
        ),
        TemplateId::FollowUpDue => format!(
            "SELECT c.client_id, c.first_name, c.last_name, c.email, c.phone,\n\
             \x20      MAX(l.contact_date) AS last_contact,\n\
             \x20      COUNT(l.client_id) AS contact_count\n\
             FROM clients c\n\
             LEFT JOIN \"contact-logs\" l ON l.client_id = c.client_id\n\
             GROUP BY c.client_id, c.first_name, c.last_name, c.email, c.phone\n\
             HAVING MAX(l.contact_date) IS NULL\n\
             \x20   OR MAX(l.contact_date) < NOW() - INTERVAL '{days} days'\n\
             ORDER BY last_contact ASC NULLS FIRST"
        ),
        TemplateId::RecentActivity => "SELECT c.client_id, c.first_name, c.last_name, c.email,\n\
             \x20      c.membership_type, c.last_visit,\n\
             \x20      (SELECT COUNT(*) FROM schedule s\n\
             \x20        WHERE s.client_id = c.client_id AND s.status = 'attended') AS classes_attended,\n\
             \x20      (SELECT MAX(l.contact_date) FROM \"contact-logs\" l\n\
             \x20        WHERE l.client_id = c.client_id) AS last_contact\n\
             FROM clients c\n\
             ORDER BY c.last_visit DESC NULLS LAST\n\
             LIMIT 50"
            .to_string(),
    }
}
