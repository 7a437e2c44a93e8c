//! Role and permission table.
//!
//! This is the only place role defaults live. The HTTP layer enforces it and
//! `GET /api/permissions` publishes it, so UI gating and API gating read the
//! same data.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{ParseEnumError, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "complaints.view")]
    ComplaintsView,
    #[serde(rename = "complaints.create")]
    ComplaintsCreate,
    #[serde(rename = "complaints.edit")]
    ComplaintsEdit,
    #[serde(rename = "complaints.assign")]
    ComplaintsAssign,
    #[serde(rename = "complaints.change_status")]
    ComplaintsChangeStatus,
    #[serde(rename = "complaints.delete")]
    ComplaintsDelete,
    #[serde(rename = "notes.create")]
    NotesCreate,
    #[serde(rename = "technicians.view")]
    TechniciansView,
    #[serde(rename = "technicians.manage")]
    TechniciansManage,
    #[serde(rename = "evaluations.view")]
    EvaluationsView,
    #[serde(rename = "evaluations.create")]
    EvaluationsCreate,
    #[serde(rename = "evaluations.delete")]
    EvaluationsDelete,
    #[serde(rename = "service_requests.view")]
    ServiceRequestsView,
    #[serde(rename = "service_requests.create")]
    ServiceRequestsCreate,
    #[serde(rename = "service_requests.edit")]
    ServiceRequestsEdit,
    #[serde(rename = "service_requests.assign")]
    ServiceRequestsAssign,
    #[serde(rename = "service_requests.delete")]
    ServiceRequestsDelete,
    #[serde(rename = "team.view")]
    TeamView,
    #[serde(rename = "team.manage")]
    TeamManage,
    #[serde(rename = "reports.view")]
    ReportsView,
    #[serde(rename = "logs.view")]
    LogsView,
    #[serde(rename = "uploads.create")]
    UploadsCreate,
}

use Permission::*;

impl Permission {
    pub const ALL: &'static [Permission] = &[
        ComplaintsView,
        ComplaintsCreate,
        ComplaintsEdit,
        ComplaintsAssign,
        ComplaintsChangeStatus,
        ComplaintsDelete,
        NotesCreate,
        TechniciansView,
        TechniciansManage,
        EvaluationsView,
        EvaluationsCreate,
        EvaluationsDelete,
        ServiceRequestsView,
        ServiceRequestsCreate,
        ServiceRequestsEdit,
        ServiceRequestsAssign,
        ServiceRequestsDelete,
        TeamView,
        TeamManage,
        ReportsView,
        LogsView,
        UploadsCreate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintsView => "complaints.view",
            ComplaintsCreate => "complaints.create",
            ComplaintsEdit => "complaints.edit",
            ComplaintsAssign => "complaints.assign",
            ComplaintsChangeStatus => "complaints.change_status",
            ComplaintsDelete => "complaints.delete",
            NotesCreate => "notes.create",
            TechniciansView => "technicians.view",
            TechniciansManage => "technicians.manage",
            EvaluationsView => "evaluations.view",
            EvaluationsCreate => "evaluations.create",
            EvaluationsDelete => "evaluations.delete",
            ServiceRequestsView => "service_requests.view",
            ServiceRequestsCreate => "service_requests.create",
            ServiceRequestsEdit => "service_requests.edit",
            ServiceRequestsAssign => "service_requests.assign",
            ServiceRequestsDelete => "service_requests.delete",
            TeamView => "team.view",
            TeamManage => "team.manage",
            ReportsView => "reports.view",
            LogsView => "logs.view",
            UploadsCreate => "uploads.create",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| ParseEnumError {
                kind: "permission",
                value: value.to_string(),
            })
    }
}

const MANAGER: &[Permission] = &[
    ComplaintsView,
    ComplaintsCreate,
    ComplaintsEdit,
    ComplaintsAssign,
    ComplaintsChangeStatus,
    ComplaintsDelete,
    NotesCreate,
    TechniciansView,
    TechniciansManage,
    EvaluationsView,
    EvaluationsCreate,
    EvaluationsDelete,
    ServiceRequestsView,
    ServiceRequestsCreate,
    ServiceRequestsEdit,
    ServiceRequestsAssign,
    ServiceRequestsDelete,
    TeamView,
    ReportsView,
    LogsView,
    UploadsCreate,
];

const SUPERVISOR: &[Permission] = &[
    ComplaintsView,
    ComplaintsCreate,
    ComplaintsEdit,
    ComplaintsAssign,
    ComplaintsChangeStatus,
    NotesCreate,
    TechniciansView,
    EvaluationsView,
    EvaluationsCreate,
    ServiceRequestsView,
    ServiceRequestsCreate,
    ServiceRequestsEdit,
    ServiceRequestsAssign,
    TeamView,
    ReportsView,
    UploadsCreate,
];

const AGENT: &[Permission] = &[
    ComplaintsView,
    ComplaintsCreate,
    ComplaintsEdit,
    ComplaintsChangeStatus,
    NotesCreate,
    TechniciansView,
    ServiceRequestsView,
    ServiceRequestsCreate,
    UploadsCreate,
];

const EVALUATOR: &[Permission] = &[
    TechniciansView,
    EvaluationsView,
    EvaluationsCreate,
    ServiceRequestsView,
    ReportsView,
];

const VIEWER: &[Permission] = &[
    ComplaintsView,
    TechniciansView,
    EvaluationsView,
    ServiceRequestsView,
    ReportsView,
];

/// Default permissions granted by a role.
pub fn role_permissions(role: Role) -> &'static [Permission] {
    match role {
        Role::Admin => Permission::ALL,
        Role::Manager => MANAGER,
        Role::Supervisor => SUPERVISOR,
        Role::Agent => AGENT,
        Role::Evaluator => EVALUATOR,
        Role::Viewer => VIEWER,
    }
}

/// Role defaults plus explicitly granted names. Unknown names are dropped.
pub fn effective_permissions(role: Role, explicit: &[String]) -> BTreeSet<Permission> {
    let mut granted: BTreeSet<Permission> = role_permissions(role).iter().copied().collect();
    for name in explicit {
        match name.parse::<Permission>() {
            Ok(permission) => {
                granted.insert(permission);
            }
            Err(_) => tracing::debug!(permission = %name, "ignoring unknown permission grant"),
        }
    }
    granted
}

/// Rejects explicit grants that do not name a known permission.
pub fn validate_grants(explicit: &[String]) -> Result<(), ParseEnumError> {
    for name in explicit {
        name.parse::<Permission>()?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleEntry {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

pub fn role_table() -> Vec<RoleEntry> {
    Role::ALL
        .iter()
        .map(|role| RoleEntry {
            role: *role,
            permissions: role_permissions(*role).to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_holds_every_permission() {
        let granted = effective_permissions(Role::Admin, &[]);
        assert_eq!(granted.len(), Permission::ALL.len());
    }

    #[test]
    fn viewer_cannot_mutate() {
        let granted = effective_permissions(Role::Viewer, &[]);
        assert!(granted.contains(&ComplaintsView));
        assert!(!granted.contains(&ComplaintsCreate));
        assert!(!granted.contains(&TeamManage));
    }

    #[test]
    fn explicit_grants_extend_role_defaults() {
        let explicit = vec!["logs.view".to_string(), "bogus.permission".to_string()];
        let granted = effective_permissions(Role::Agent, &explicit);
        assert!(granted.contains(&LogsView));
        assert!(granted.contains(&ComplaintsCreate));
        assert!(!granted.contains(&TeamManage));
    }

    #[test]
    fn names_parse_back_to_permissions() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>().unwrap(), *permission);
            let json = serde_json::to_string(permission).unwrap();
            assert_eq!(json, format!("\"{}\"", permission.as_str()));
        }
    }

    #[test]
    fn grant_validation_reports_unknown_names() {
        assert!(validate_grants(&["team.view".to_string()]).is_ok());
        let err = validate_grants(&["team.fly".to_string()]).unwrap_err();
        assert_eq!(err.value, "team.fly");
    }

    #[test]
    fn role_table_lists_every_role() {
        let table = role_table();
        assert_eq!(table.len(), Role::ALL.len());
        let evaluator = table.iter().find(|entry| entry.role == Role::Evaluator).unwrap();
        assert!(evaluator.permissions.contains(&EvaluationsCreate));
        assert!(!evaluator.permissions.contains(&ComplaintsView));
    }
}
