use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum stored as snake_case text in Postgres and JSON.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(ComplaintStatus, "complaint status", {
    New => "new",
    UnderReview => "under_review",
    InProgress => "in_progress",
    AwaitingCustomer => "awaiting_customer",
    Resolved => "resolved",
    Closed => "closed",
    Rejected => "rejected",
});

text_enum!(Severity, "severity", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

text_enum!(ComplaintSource, "complaint source", {
    Phone => "phone",
    Email => "email",
    Web => "web",
    WalkIn => "walk_in",
    SocialMedia => "social_media",
    FieldVisit => "field_visit",
});

text_enum!(Role, "role", {
    Admin => "admin",
    Manager => "manager",
    Supervisor => "supervisor",
    Agent => "agent",
    Evaluator => "evaluator",
    Viewer => "viewer",
});

text_enum!(ServiceRequestStatus, "service request status", {
    Pending => "pending",
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

text_enum!(RequestType, "request type", {
    Installation => "installation",
    Maintenance => "maintenance",
    Repair => "repair",
    Inspection => "inspection",
});

text_enum!(Priority, "priority", {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

impl ComplaintStatus {
    /// Open complaints still need work from the team.
    pub fn is_open(&self) -> bool {
        !matches!(
            self,
            ComplaintStatus::Resolved | ComplaintStatus::Closed | ComplaintStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamMember {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub permissions: Vec<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Complaint {
    pub id: Uuid,
    pub number: i64,
    pub title: String,
    pub description: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub category: Option<String>,
    pub status: ComplaintStatus,
    pub severity: Severity,
    pub source: ComplaintSource,
    pub assigned_to: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub created_by: Uuid,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Complaint {
    pub fn reference(&self) -> String {
        format!("CMP-{:06}", self.number)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub id: Uuid,
    pub complaint_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub author_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub id: Uuid,
    pub complaint_id: Uuid,
    pub from_status: Option<ComplaintStatus>,
    pub to_status: ComplaintStatus,
    pub changed_by: Uuid,
    pub changed_by_name: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldTechnician {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub region: Option<String>,
    pub specialty: Option<String>,
    pub active: bool,
    pub hired_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub technician_id: Uuid,
    pub evaluator_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub evaluated_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedEvaluation {
    pub id: Uuid,
    pub technician_id: Uuid,
    pub evaluator_id: Uuid,
    pub service_request_id: Option<Uuid>,
    pub visit_date: NaiveDate,
    pub punctuality: i32,
    pub quality: i32,
    pub behavior: i32,
    pub cleanliness: i32,
    pub communication: i32,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DetailedEvaluation {
    pub fn overall(&self) -> f64 {
        let total = self.punctuality + self.quality + self.behavior + self.cleanliness
            + self.communication;
        total as f64 / 5.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub number: i64,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub address: String,
    pub description: String,
    pub request_type: RequestType,
    pub priority: Priority,
    pub status: ServiceRequestStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub technician_id: Option<Uuid>,
    pub complaint_id: Option<Uuid>,
    pub created_by: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub id: Uuid,
    pub complaint_id: Option<Uuid>,
    pub original_name: String,
    #[serde(skip_serializing)]
    pub stored_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Rating rows flattened for scoring, one per simple or detailed evaluation.
#[derive(Debug, Clone)]
pub struct RatingRecord {
    pub technician_id: Uuid,
    pub technician_name: String,
    pub rated_on: NaiveDate,
    pub rating: f64,
    pub criteria: Option<CriteriaScores>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CriteriaScores {
    pub punctuality: f64,
    pub quality: f64,
    pub behavior: f64,
    pub cleanliness: f64,
    pub communication: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianScore {
    pub technician_id: Uuid,
    pub technician_name: String,
    pub score: f64,
    pub average_rating: f64,
    pub evaluation_count: usize,
    pub detailed_count: usize,
    pub criteria: Option<CriteriaScores>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_round_trip_through_strings() {
        for status in ComplaintStatus::ALL {
            assert_eq!(status.as_str().parse::<ComplaintStatus>().unwrap(), *status);
        }
        assert_eq!("walk_in".parse::<ComplaintSource>().unwrap(), ComplaintSource::WalkIn);
        assert!("archived".parse::<ComplaintStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&ComplaintStatus::AwaitingCustomer).unwrap();
        assert_eq!(json, "\"awaiting_customer\"");
        let role: Role = serde_json::from_str("\"evaluator\"").unwrap();
        assert_eq!(role, Role::Evaluator);
    }

    #[test]
    fn terminal_and_resolved_statuses_are_not_open() {
        assert!(ComplaintStatus::New.is_open());
        assert!(ComplaintStatus::AwaitingCustomer.is_open());
        assert!(!ComplaintStatus::Resolved.is_open());
        assert!(!ComplaintStatus::Rejected.is_open());
    }

    #[test]
    fn detailed_overall_is_criteria_mean() {
        let evaluation = DetailedEvaluation {
            id: Uuid::new_v4(),
            technician_id: Uuid::new_v4(),
            evaluator_id: Uuid::new_v4(),
            service_request_id: None,
            visit_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            punctuality: 5,
            quality: 4,
            behavior: 5,
            cleanliness: 3,
            communication: 3,
            comments: None,
            created_at: Utc::now(),
        };
        assert!((evaluation.overall() - 4.0).abs() < f64::EPSILON);
    }
}
