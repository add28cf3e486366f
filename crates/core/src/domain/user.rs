use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vacation counters stored on the user record.
///
/// Counters are signed: the ledger adds and subtracts without a floor, so a
/// reversed leave on an already-reset balance may go below zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationBalance {
    pub annual_vacation_days: i32,
    pub vacation_days_used: i32,
    pub on_demand_vacation_days_used: i32,
    pub circumstantial_leave_days_used: i32,
    pub carried_over_vacation_days: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub department_id: Option<DepartmentId>,
    pub supervisor_id: Option<UserId>,
    pub active: bool,
    pub groups: Vec<GroupId>,
    pub vacation: VacationBalance,
}

impl User {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            email: format!("{id}@portal.local"),
            id: UserId(id),
            display_name: display_name.into(),
            department_id: None,
            supervisor_id: None,
            active: true,
            groups: Vec::new(),
            vacation: VacationBalance::default(),
        }
    }

    pub fn in_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(DepartmentId(department_id.into()));
        self
    }

    pub fn with_supervisor(mut self, supervisor_id: impl Into<String>) -> Self {
        self.supervisor_id = Some(UserId(supervisor_id.into()));
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.groups.push(GroupId(group_id.into()));
        self
    }

    pub fn with_vacation(mut self, vacation: VacationBalance) -> Self {
        self.vacation = vacation;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub name: String,
    pub head_id: Option<UserId>,
    pub director_id: Option<UserId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    Annual,
    OnDemand,
    Circumstantial,
    Sick,
    Unpaid,
}

impl LeaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::OnDemand => "on_demand",
            Self::Circumstantial => "circumstantial",
            Self::Sick => "sick",
            Self::Unpaid => "unpaid",
        }
    }
}

impl std::str::FromStr for LeaveType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "annual" | "annualleave" | "vacation" | "holiday" => Ok(Self::Annual),
            "ondemand" | "ondemandleave" => Ok(Self::OnDemand),
            "circumstantial" | "circumstantialleave" | "special" => Ok(Self::Circumstantial),
            "sick" | "sickleave" => Ok(Self::Sick),
            "unpaid" | "unpaidleave" => Ok(Self::Unpaid),
            _ => Err(format!("unsupported leave type `{value}`")),
        }
    }
}
