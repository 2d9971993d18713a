//! Keyword router that maps a free-text question onto a canned template.
//!
//! Rules are evaluated in a fixed order and the first match wins; there is
//! no scoring. Input that matches nothing gets the recent-activity overview.

use super::templates::{self, TemplateId, TemplateParams, TimeBucket};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static DAY_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+)\s*days?").unwrap_or_else(|err| panic!("invalid day-count pattern: {err}"))
});

/// Outcome of routing one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub template: TemplateId,
    pub day_count: Option<u32>,
    pub time_bucket: Option<TimeBucket>,
    pub sql: String,
}

/// How a rule derives template parameters from the normalized input.
#[derive(Debug, Clone, Copy)]
enum Extract {
    Nothing,
    DayCount,
    TimeBucket,
}

struct Rule {
    template: TemplateId,
    matches: fn(&str) -> bool,
    extract: Extract,
}

const RULES: &[Rule] = &[
    Rule {
        template: TemplateId::LateCancellations,
        matches: is_late_cancellation,
        extract: Extract::DayCount,
    },
    Rule {
        template: TemplateId::NewMemberInactivity,
        matches: is_new_member_inactivity,
        extract: Extract::Nothing,
    },
    Rule {
        template: TemplateId::CoachAttendanceRate,
        matches: is_coach_attendance,
        extract: Extract::TimeBucket,
    },
    Rule {
        template: TemplateId::InactiveClients,
        matches: is_inactive_clients,
        extract: Extract::DayCount,
    },
    Rule {
        template: TemplateId::MembershipExpiration,
        matches: is_membership_expiration,
        extract: Extract::DayCount,
    },
    Rule {
        template: TemplateId::FollowUpDue,
        matches: is_follow_up,
        extract: Extract::DayCount,
    },
];

fn is_late_cancellation(text: &str) -> bool {
    text.contains("late cancel") || (text.contains("cancel") && text.contains("last"))
}

fn is_new_member_inactivity(text: &str) -> bool {
    (text.contains("new") || text.contains("member"))
        && (text.contains("no class") || text.contains("haven") || text.contains("not attend"))
}

fn is_coach_attendance(text: &str) -> bool {
    text.contains("coach") && (text.contains("attend") || text.contains("rate"))
}

fn is_inactive_clients(text: &str) -> bool {
    text.contains("client") && (text.contains("haven't visit") || text.contains("not visit"))
}

fn is_membership_expiration(text: &str) -> bool {
    text.contains("expir") || text.contains("renew") || text.contains("expiration")
}

fn is_follow_up(text: &str) -> bool {
    text.contains("follow") || text.contains("contact") || text.contains("reach out")
}

/// First `<digits> day(s)` in `text`. Digit runs that overflow `u32` count
/// as absent.
pub fn extract_day_count(text: &str) -> Option<u32> {
    DAY_COUNT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

fn time_bucket(text: &str) -> TimeBucket {
    if text.contains("month") {
        TimeBucket::Month
    } else if text.contains("week") {
        TimeBucket::Week
    } else {
        TimeBucket::Year
    }
}

/// Stateless; cheap to clone and share across requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRouter;

impl QueryRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, input: &str) -> MatchResult {
        let text = input.trim().to_lowercase();

        let (template, params) = RULES
            .iter()
            .find(|rule| (rule.matches)(&text))
            .map(|rule| (rule.template, params_for(rule, &text)))
            .unwrap_or((TemplateId::RecentActivity, TemplateParams::default()));

        debug!(
            %template,
            day_count = ?params.day_count,
            time_bucket = ?params.time_bucket,
            "routed natural-language query"
        );

        MatchResult {
            template,
            day_count: params.day_count,
            time_bucket: params.time_bucket,
            sql: templates::render(template, &params),
        }
    }

    /// Rendered SQL for `input`.
    pub fn generate_query(&self, input: &str) -> String {
        self.route(input).sql
    }
}

fn params_for(rule: &Rule, text: &str) -> TemplateParams {
    match rule.extract {
        Extract::Nothing => TemplateParams::default(),
        Extract::DayCount => TemplateParams {
            day_count: extract_day_count(text).or_else(|| rule.template.default_day_count()),
            time_bucket: None,
        },
        Extract::TimeBucket => TemplateParams {
            day_count: None,
            time_bucket: Some(time_bucket(text)),
        },
    }
}
