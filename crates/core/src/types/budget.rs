use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Budget Types
// =============================================================================

/// Dimension a spend limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Application,
    User,
    Organization,
    Feature,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Application => "application",
            Self::User => "user",
            Self::Organization => "organization",
            Self::Feature => "feature",
        };
        f.write_str(s)
    }
}

/// Budget scope identity: (type, id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetScope {
    pub scope_type: ScopeType,
    pub scope_id: String,
}

impl BudgetScope {
    pub fn new(scope_type: ScopeType, scope_id: impl Into<String>) -> Self {
        Self {
            scope_type,
            scope_id: scope_id.into(),
        }
    }

    pub fn application(id: impl Into<String>) -> Self {
        Self::new(ScopeType::Application, id)
    }
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope_type, self.scope_id)
    }
}

/// Accounting period of a budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Quarterly,
    Yearly,
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

impl BudgetPeriod {
    /// Start of the period window containing `now`.
    ///
    /// Daily: UTC midnight. Weekly: Monday UTC midnight. Monthly: the 1st.
    /// Quarterly: Jan/Apr/Jul/Oct 1st. Yearly: Jan 1.
    pub fn window_start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let date = match self {
            Self::Daily => today,
            Self::Weekly => {
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
            }
            Self::Monthly => NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today),
            Self::Quarterly => {
                let month = (today.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(today.year(), month, 1).unwrap_or(today)
            }
            Self::Yearly => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
        };
        midnight(date)
    }

    /// Start of the window following the one starting at `start`.
    pub fn next_start(self, start: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self {
            Self::Daily => start.checked_add_signed(Duration::days(1)),
            Self::Weekly => start.checked_add_signed(Duration::weeks(1)),
            Self::Monthly => start.checked_add_months(Months::new(1)),
            Self::Quarterly => start.checked_add_months(Months::new(3)),
            Self::Yearly => start.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Spend counter for one scope and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub scope: BudgetScope,
    pub period: BudgetPeriod,
    pub period_start: DateTime<Utc>,
    /// Warning threshold; `None` disables warnings.
    pub soft_limit: Option<f64>,
    /// Blocking threshold.
    pub hard_limit: f64,
    pub current_spend: f64,
}

impl BudgetRecord {
    /// Create an empty record whose window contains `now`.
    pub fn new(
        scope: BudgetScope,
        period: BudgetPeriod,
        soft_limit: Option<f64>,
        hard_limit: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            scope,
            period,
            period_start: period.window_start(now),
            soft_limit,
            hard_limit,
            current_spend: 0.0,
        }
    }

    pub fn with_spend(mut self, spend: f64) -> Self {
        self.current_spend = spend;
        self
    }

    /// End of the current window (exclusive).
    pub fn period_end(&self) -> DateTime<Utc> {
        self.period.next_start(self.period_start)
    }

    /// Reset spend if `now` has crossed into a later window.
    ///
    /// Returns `true` when a reset happened.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.period_end() {
            return false;
        }
        self.current_spend = 0.0;
        self.period_start = self.period.window_start(now);
        true
    }

    /// Spend left before the hard limit.
    pub fn remaining(&self) -> f64 {
        (self.hard_limit - self.current_spend).max(0.0)
    }
}

/// Result of a pre-call budget check for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheckResult {
    pub scope: BudgetScope,
    pub proceed: bool,
    pub warning: Option<String>,
    pub current_spend: f64,
    pub estimated_cost: f64,
    pub soft_limit: Option<f64>,
    pub hard_limit: Option<f64>,
}

impl BudgetCheckResult {
    /// Result for a scope without a configured budget.
    pub fn unlimited(scope: BudgetScope, estimated_cost: f64) -> Self {
        Self {
            scope,
            proceed: true,
            warning: None,
            current_spend: 0.0,
            estimated_cost,
            soft_limit: None,
            hard_limit: None,
        }
    }
}

/// Combined check over every scope applicable to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheckSummary {
    /// `false` when any scope breaches its hard limit.
    pub proceed: bool,
    pub warnings: Vec<String>,
    pub results: Vec<BudgetCheckResult>,
}

impl BudgetCheckSummary {
    /// First scope that blocks the request.
    pub fn blocking(&self) -> Option<&BudgetCheckResult> {
        self.results.iter().find(|r| !r.proceed)
    }
}
